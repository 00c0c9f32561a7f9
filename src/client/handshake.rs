//! Client side of the handshake.
//!
//! There is no reliability before a connection exists, so the request is
//! simply sent `spam_count` times per burst, and the burst is repeated every
//! `handshake_resend_interval` until the server answers.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::connection::{Connection, ConnectionKind, ConnectionStatus};
use crate::core::{ConnectionError, ConnectionResult};
use crate::transport::PacketType;

impl Connection {
    /// Send a burst of `Connection_Request` packets.
    pub fn send_connection_request_packet(&mut self) -> ConnectionResult<()> {
        self.spam(PacketType::ConnectionRequest)?;
        self.last_request_burst = Some(Instant::now());
        Ok(())
    }

    /// Poll until the server answers with `Connection_Established`.
    ///
    /// A zero `timeout` waits forever. This busy-polls the transport on the
    /// calling thread. On success the connection is `Good` and carries the
    /// client id the server assigned. A timeout leaves the connection
    /// `Connecting`.
    pub fn wait_until_connection_established(&mut self, timeout: Duration) -> ConnectionResult<()> {
        if self.kind != ConnectionKind::Client {
            return Err(ConnectionError::WrongKind {
                operation: "wait_until_connection_established",
                kind: self.kind,
            });
        }
        match self.status {
            ConnectionStatus::Good => return Ok(()),
            ConnectionStatus::Closed => return Err(ConnectionError::Closed),
            ConnectionStatus::Connecting => {}
        }

        let start = Instant::now();
        loop {
            if self.request_burst_due() {
                self.send_connection_request_packet()?;
            }

            let received = self.read_packet()?;
            if received {
                let header = self.incoming_packet().header;
                if header.packet_type == PacketType::ConnectionEstablished {
                    self.info.client_id = header.sender_client_id;
                    self.status = ConnectionStatus::Good;
                    info!(
                        "connection established after {:?}, client id {}",
                        start.elapsed(),
                        self.info.client_id
                    );
                    return Ok(());
                }
                debug!("ignoring {:?} while connecting", header.packet_type);
            }

            // The deadline holds even while packets keep arriving.
            if !timeout.is_zero() && start.elapsed() >= timeout {
                debug!("no answer from server within {:?}", timeout);
                return Err(ConnectionError::Timeout);
            }
            if !received {
                std::thread::yield_now();
            }
        }
    }

    fn request_burst_due(&self) -> bool {
        match (self.last_request_burst, self.config.handshake_resend_interval) {
            (None, _) => true,
            (Some(last), Some(interval)) => last.elapsed() >= interval,
            (Some(_), None) => false,
        }
    }
}
