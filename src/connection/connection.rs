//! The virtual connection: one logical endpoint over a [`Transport`].
//!
//! A connection owns its buffers, its acknowledgment state and its reliable
//! tracker. Nothing in here blocks; [`Connection::read_packet`] is meant to be
//! polled once per application tick.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, trace, warn};

use super::config::ConnectionConfig;
use crate::core::{
    ConnectionError, ConnectionResult, MAX_BODY_SIZE, PACKET_SIZE, Protocol, Received, Transport,
};
use crate::sync::{ConnectionInfo, ReliableTracker, TrackedPacket};
use crate::transport::{
    FramingBuffer, Packet, PacketError, PacketHeader, PacketType, TransportError, encode,
};

/// Role of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    /// Dials a server.
    Client,
    /// Listens for clients.
    Server,
    /// Server-side view of a UDP peer; shares the server's socket.
    UdpRemoteClient,
    /// Server-side view of a TCP peer; owns an accepted socket.
    TcpRemoteClient,
}

impl ConnectionKind {
    /// Check if this connection stands for one peer of a server.
    pub fn is_remote_client(self) -> bool {
        matches!(self, Self::UdpRemoteClient | Self::TcpRemoteClient)
    }
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// Unusable; every operation fails with [`ConnectionError::Closed`].
    Closed,
    /// Client waiting for `Connection_Established`.
    Connecting,
    /// Established.
    Good,
}

/// Running counters of a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Packets handed to the transport.
    pub packets_sent: u64,
    /// Valid packets surfaced to the caller.
    pub packets_received: u64,
    /// Packets discarded for a foreign magic or a malformed header.
    pub packets_dropped: u64,
    /// Reliable packets sent again after being reported lost.
    pub reliable_resent: u64,
    /// Reliable packets whose tracking was evicted at capacity.
    pub reliable_evicted: u64,
    /// Reliable packets confirmed delivered.
    pub reliable_acked: u64,
}

/// A virtual connection.
pub struct Connection {
    pub(crate) kind: ConnectionKind,
    pub(crate) status: ConnectionStatus,
    pub(crate) info: ConnectionInfo,
    pub(crate) transport: Arc<dyn Transport>,
    protocol: Protocol,
    remote: Option<SocketAddr>,
    incoming: FramingBuffer,
    outgoing: Box<[u8]>,
    incoming_packet: Packet,
    last_remote: Option<SocketAddr>,
    tracker: ReliableTracker,
    pub(crate) config: ConnectionConfig,
    pub(crate) last_request_burst: Option<Instant>,
    stats: ConnectionStats,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("kind", &self.kind)
            .field("status", &self.status)
            .field("protocol", &self.protocol)
            .field("remote", &self.remote)
            .field("info", &self.info)
            .field("pending_reliable", &self.tracker.len())
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub(crate) fn new(
        kind: ConnectionKind,
        status: ConnectionStatus,
        transport: Arc<dyn Transport>,
        remote: Option<SocketAddr>,
        config: ConnectionConfig,
    ) -> ConnectionResult<Self> {
        config.validate()?;
        let protocol = transport.protocol();
        Ok(Self {
            kind,
            status,
            info: ConnectionInfo::new(config.magic),
            transport,
            protocol,
            remote,
            incoming: FramingBuffer::new(config.incoming_buffer_size, protocol),
            outgoing: vec![0u8; PACKET_SIZE].into_boxed_slice(),
            incoming_packet: Packet::default(),
            last_remote: None,
            tracker: ReliableTracker::new(config.reliable_capacity),
            config,
            last_request_burst: None,
            stats: ConnectionStats::default(),
        })
    }

    /// Role of this connection.
    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    /// Lifecycle state.
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Check if the connection is established.
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Good
    }

    /// Check if the connection is closed.
    pub fn is_closed(&self) -> bool {
        self.status == ConnectionStatus::Closed
    }

    /// Transport protocol underneath.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Address of the peer, if known.
    ///
    /// Datagram connections send to this address.
    pub fn remote_address(&self) -> Option<SocketAddr> {
        self.remote
    }

    /// Local address of the underlying socket.
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.transport.local_address()
    }

    /// Sender of the most recently received bytes, when the transport reports it.
    pub fn last_remote_address(&self) -> Option<SocketAddr> {
        self.last_remote
    }

    /// Sequence and acknowledgment state.
    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// Client id assigned by the server.
    pub fn client_id(&self) -> u32 {
        self.info.client_id
    }

    /// The packet surfaced by the last successful [`Connection::read_packet`].
    ///
    /// Overwritten by the next read.
    pub fn incoming_packet(&self) -> &Packet {
        &self.incoming_packet
    }

    /// Counters.
    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Settings this connection was created with.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Reliable packets still waiting for an acknowledgment.
    pub fn pending_reliable(&self) -> &ReliableTracker {
        &self.tracker
    }

    fn ensure_open(&self) -> ConnectionResult<()> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        Ok(())
    }

    /// Send one packet, returning the sequence number it went out with.
    ///
    /// A transport failure closes the connection. For a UDP remote client
    /// only the virtual connection closes; the server socket stays open.
    pub fn send_packet(&mut self, packet_type: PacketType, body: &[u8]) -> ConnectionResult<u32> {
        self.ensure_open()?;
        if self.kind == ConnectionKind::Server {
            return Err(ConnectionError::WrongKind {
                operation: "send_packet",
                kind: self.kind,
            });
        }
        if body.len() > MAX_BODY_SIZE {
            return Err(PacketError::BodyTooLarge {
                len: body.len(),
                max: MAX_BODY_SIZE,
            }
            .into());
        }

        let mut header = PacketHeader::new(packet_type, self.info.magic, body.len());
        self.info.stamp(&mut header);
        let len = encode(&header, body, &mut self.outgoing)?;

        if let Err(e) = self.transport.send(self.remote, &self.outgoing[..len]) {
            self.fail(&e);
            return Err(e.into());
        }

        self.stats.packets_sent += 1;
        trace!(
            "{:?} sent {:?} seq={} ack={} field={:#010x}",
            self.kind,
            packet_type,
            header.sender_sequence_id,
            header.ack_id_for_remote_packets,
            header.ack_field_for_remote_packets
        );
        Ok(header.sender_sequence_id)
    }

    /// Send a packet and keep a copy until the remote acknowledges it.
    ///
    /// If the remote window later shows the packet as lost, the copy is sent
    /// again under a new sequence number.
    pub fn send_reliable_packet(&mut self, packet_type: PacketType, body: &[u8]) -> ConnectionResult<u32> {
        let sequence_id = self.send_packet(packet_type, body)?;
        let evicted = self.tracker.push(TrackedPacket {
            sequence_id,
            packet_type,
            body: body.to_vec(),
        });
        if let Some(evicted) = evicted {
            self.stats.reliable_evicted += 1;
            debug!(
                "{:?} stopped tracking reliable packet {} at capacity {}",
                self.kind,
                evicted.sequence_id,
                self.tracker.capacity()
            );
        }
        Ok(sequence_id)
    }

    /// Send a `Ping`.
    pub fn send_ping_packet(&mut self) -> ConnectionResult<u32> {
        self.send_packet(PacketType::Ping, &[])
    }

    /// Send `Connection_Closed`, `spam_count` times.
    pub fn send_connection_closed_packet(&mut self) -> ConnectionResult<()> {
        self.spam(PacketType::ConnectionClosed)
    }

    pub(crate) fn spam(&mut self, packet_type: PacketType) -> ConnectionResult<()> {
        for _ in 0..self.config.spam_count {
            self.send_packet(packet_type, &[])?;
        }
        Ok(())
    }

    /// Poll for the next valid packet.
    ///
    /// Returns `Ok(true)` when a packet with the right magic is available in
    /// [`Connection::incoming_packet`], `Ok(false)` when there is nothing to
    /// read right now. Malformed and foreign packets are dropped silently.
    ///
    /// A UDP remote client never touches the shared socket: it only sees
    /// bytes routed to it with [`Connection::push_incoming`]. A TCP server
    /// has nothing to read; its peers arrive through accept.
    pub fn read_packet(&mut self) -> ConnectionResult<bool> {
        self.ensure_open()?;
        if self.kind == ConnectionKind::Server && !self.protocol.is_datagram() {
            return Ok(false);
        }
        let may_receive = self.kind != ConnectionKind::UdpRemoteClient;

        loop {
            if may_receive && self.incoming.wants_more() {
                let transport = &self.transport;
                match self.incoming.fill(|buf| transport.receive(buf)) {
                    Ok(Received::Data { from, .. }) => {
                        if from.is_some() {
                            self.last_remote = from;
                        }
                    }
                    Ok(Received::NoData) => {}
                    Ok(Received::Closed) => {
                        info!("{:?} connection closed by remote", self.kind);
                        self.shut_down();
                        return Err(ConnectionError::Closed);
                    }
                    Err(e) => {
                        self.fail(&e);
                        return Err(e.into());
                    }
                }
            }

            match self.incoming.take_packet(&mut self.incoming_packet) {
                Ok(false) => return Ok(false),
                Ok(true) => {
                    if self.accept_incoming()? {
                        return Ok(true);
                    }
                }
                Err(e) if e.is_desync() && !self.protocol.is_datagram() => {
                    warn!("{:?} stream lost packet boundaries: {}", self.kind, e);
                    self.shut_down();
                    return Err(e.into());
                }
                Err(e) => {
                    self.stats.packets_dropped += 1;
                    debug!("{:?} dropping malformed packet: {}", self.kind, e);
                }
            }
        }
    }

    /// Append raw bytes received elsewhere for this connection.
    ///
    /// Used to route datagrams from a shared server socket.
    pub fn push_incoming(&mut self, bytes: &[u8]) -> ConnectionResult<()> {
        self.ensure_open()?;
        self.incoming.push(bytes)?;
        Ok(())
    }

    /// Process a packet decoded elsewhere as if it had been read here.
    ///
    /// Returns `Ok(false)` if the packet was dropped for a foreign magic.
    pub fn deliver_packet(&mut self, packet: &Packet) -> ConnectionResult<bool> {
        self.ensure_open()?;
        self.incoming_packet.set(packet.header, packet.body());
        self.accept_incoming()
    }

    /// Filter the packet in `incoming_packet` and run it through the ack engine.
    fn accept_incoming(&mut self) -> ConnectionResult<bool> {
        let header = self.incoming_packet.header;
        if header.magic != self.info.magic {
            self.stats.packets_dropped += 1;
            debug!(
                "{:?} dropping packet with magic {:#04x}, expected {:#04x}",
                self.kind, header.magic, self.info.magic
            );
            return Ok(false);
        }

        self.stats.packets_received += 1;
        trace!(
            "{:?} received {:?} seq={} ack={} field={:#010x}",
            self.kind,
            header.packet_type,
            header.sender_sequence_id,
            header.ack_id_for_remote_packets,
            header.ack_field_for_remote_packets
        );

        // Per-peer state of a UDP server lives in its virtual connections.
        if self.kind != ConnectionKind::Server {
            self.process_acks(&header)?;
        }

        if header.packet_type == PacketType::ConnectionClosed && self.kind != ConnectionKind::Server {
            info!("{:?} connection closed by remote", self.kind);
            self.shut_down();
        }
        Ok(true)
    }

    fn process_acks(&mut self, header: &PacketHeader) -> ConnectionResult<()> {
        let outcome = self.info.update_for_packet(header);

        for sequence_id in outcome.acked {
            if self.tracker.remove(sequence_id).is_some() {
                self.stats.reliable_acked += 1;
                trace!("{:?} reliable packet {} delivered", self.kind, sequence_id);
            }
        }

        for sequence_id in outcome.lost {
            let Some(lost) = self.tracker.remove(sequence_id) else {
                continue;
            };
            self.stats.reliable_resent += 1;
            let resent = self.send_reliable_packet(lost.packet_type, &lost.body)?;
            warn!(
                "{:?} reliable packet {} lost, resent as {}",
                self.kind, sequence_id, resent
            );
        }
        Ok(())
    }

    /// Close after a transport failure.
    fn fail(&mut self, error: &TransportError) {
        warn!("{:?} connection failed: {}", self.kind, error);
        self.shut_down();
    }

    fn shut_down(&mut self) {
        if self.kind != ConnectionKind::UdpRemoteClient {
            self.transport.close();
        }
        self.tracker.clear();
        self.incoming.clear();
        self.status = ConnectionStatus::Closed;
    }

    /// Tear the connection down.
    ///
    /// Sends `Connection_Closed` as a courtesy unless disabled, already closed
    /// or a server. Pending reliable packets are discarded. Calling it again
    /// does nothing.
    pub fn destroy(&mut self) {
        if self.is_closed() {
            return;
        }
        if self.kind != ConnectionKind::Server && self.config.send_close_on_destroy {
            if let Err(e) = self.send_connection_closed_packet() {
                debug!("{:?} could not send close notice: {}", self.kind, e);
            }
        }
        // A failed notice already shut the connection down.
        if !self.is_closed() {
            self.shut_down();
        }
        info!("{:?} connection destroyed", self.kind);
    }
}
