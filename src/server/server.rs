//! Server connections and their per-peer children.
//!
//! A UDP server has one socket for everyone; each peer gets a virtual
//! [`ConnectionKind::UdpRemoteClient`] sharing it and addressed by the
//! peer's socket address. A TCP server accepts a real socket per peer.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use crate::connection::{Connection, ConnectionConfig, ConnectionKind, ConnectionStatus};
use crate::core::{ConnectionError, ConnectionResult, Transport};
use crate::transport::PacketType;

#[cfg(feature = "net")]
use crate::core::Protocol;

/// Open a server connection listening on `port` on all interfaces.
///
/// The connection is immediately `Good`; a server never dials.
#[cfg(feature = "net")]
#[cfg_attr(docsrs, doc(cfg(feature = "net")))]
pub fn create_server_connection(
    protocol: Protocol,
    port: u16,
    config: ConnectionConfig,
) -> ConnectionResult<Connection> {
    config.validate()?;
    let transport = crate::transport::socket::open_server(protocol, port)?;
    Connection::server_with_transport(transport, config)
}

/// Open a server connection on a specific local address.
#[cfg(feature = "net")]
#[cfg_attr(docsrs, doc(cfg(feature = "net")))]
pub fn create_server_connection_at(
    protocol: Protocol,
    addr: SocketAddr,
    config: ConnectionConfig,
) -> ConnectionResult<Connection> {
    config.validate()?;
    let transport = crate::transport::socket::open_server_at(protocol, addr)?;
    Connection::server_with_transport(transport, config)
}

/// Accept one pending TCP peer without blocking.
///
/// Returns `Ok(None)` when nobody is waiting. An accept failure tears the
/// whole server down.
pub fn accept_remote_client_connection(server: &mut Connection) -> ConnectionResult<Option<Connection>> {
    if server.kind != ConnectionKind::Server || server.protocol().is_datagram() {
        return Err(ConnectionError::WrongKind {
            operation: "accept_remote_client_connection",
            kind: server.kind,
        });
    }
    if server.is_closed() {
        return Err(ConnectionError::Closed);
    }

    match server.transport.accept() {
        Ok(Some((transport, addr))) => {
            let mut child = Connection::new(
                ConnectionKind::TcpRemoteClient,
                ConnectionStatus::Good,
                transport,
                Some(addr),
                server.config.clone(),
            )?;
            child.info.magic = server.info.magic;
            info!("accepted TCP client {}", addr);
            Ok(Some(child))
        }
        Ok(None) => Ok(None),
        Err(e) => {
            warn!("accept failed, closing server: {}", e);
            server.destroy();
            Err(e.into())
        }
    }
}

/// Create the virtual connection for UDP peer `addr` on `server`'s socket.
///
/// The child shares the server socket and never closes it.
pub fn create_remote_client_connection(
    server: &Connection,
    addr: SocketAddr,
    client_id: u32,
) -> ConnectionResult<Connection> {
    if server.kind != ConnectionKind::Server || !server.protocol().is_datagram() {
        return Err(ConnectionError::WrongKind {
            operation: "create_remote_client_connection",
            kind: server.kind,
        });
    }
    if server.is_closed() {
        return Err(ConnectionError::Closed);
    }

    let mut child = Connection::new(
        ConnectionKind::UdpRemoteClient,
        ConnectionStatus::Good,
        Arc::clone(&server.transport),
        Some(addr),
        server.config.clone(),
    )?;
    child.info.magic = server.info.magic;
    child.info.client_id = client_id;
    info!("created virtual connection for {} with client id {}", addr, client_id);
    Ok(child)
}

impl Connection {
    /// Create a server connection over an already open transport.
    pub fn server_with_transport(transport: Arc<dyn Transport>, config: ConnectionConfig) -> ConnectionResult<Self> {
        let connection = Connection::new(ConnectionKind::Server, ConnectionStatus::Good, transport, None, config)?;
        info!("created {:?} server connection", connection.protocol());
        Ok(connection)
    }

    /// Assign `client_id` and send a burst of `Connection_Established`.
    ///
    /// Only valid on remote client connections.
    pub fn send_connection_established_packet(&mut self, client_id: u32) -> ConnectionResult<()> {
        if !self.kind.is_remote_client() {
            return Err(ConnectionError::WrongKind {
                operation: "send_connection_established_packet",
                kind: self.kind,
            });
        }
        self.info.client_id = client_id;
        self.spam(PacketType::ConnectionEstablished)
    }
}
