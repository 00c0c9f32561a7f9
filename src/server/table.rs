//! Demultiplexing a server's traffic into per-peer connections.
//!
//! The core connection never routes: a UDP server only reads datagrams and
//! reports who sent them. [`ClientTable`] is the piece that turns that into a
//! set of virtual connections, answering handshakes and forgetting peers that
//! say goodbye.

use std::collections::HashMap;
use std::collections::hash_map::{Iter, IterMut};
use std::net::SocketAddr;

use tracing::{debug, info, warn};

use super::server::{accept_remote_client_connection, create_remote_client_connection};
use crate::connection::Connection;
use crate::core::{ConnectionError, ConnectionResult, INVALID_CLIENT_ID};
use crate::transport::{Packet, PacketType};

/// Client table configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Maximum number of peers; further requests are dropped.
    pub max_clients: usize,

    /// Id handed to the first peer; later peers count up from it.
    pub first_client_id: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_clients: 1024,
            first_client_id: 1,
        }
    }
}

impl ServerConfig {
    /// Check the configuration.
    pub fn validate(&self) -> ConnectionResult<()> {
        if self.first_client_id == INVALID_CLIENT_ID {
            return Err(ConnectionError::Config(format!(
                "first_client_id must not be the invalid id {INVALID_CLIENT_ID:#x}"
            )));
        }
        Ok(())
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Create a builder holding the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of peers.
    pub fn max_clients(mut self, max: usize) -> Self {
        self.config.max_clients = max;
        self
    }

    /// Set the first client id handed out.
    pub fn first_client_id(mut self, id: u32) -> Self {
        self.config.first_client_id = id;
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> ConnectionResult<ServerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Something that happened during [`ClientTable::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A peer completed its side of the handshake.
    Connected {
        /// Peer address.
        addr: SocketAddr,
        /// Id assigned to the peer.
        client_id: u32,
    },

    /// A peer sent a packet.
    Packet {
        /// Peer address.
        addr: SocketAddr,
        /// The packet, already processed by the peer's ack engine.
        packet: Packet,
    },

    /// A peer closed its connection or failed; it is no longer in the table.
    Disconnected {
        /// Peer address.
        addr: SocketAddr,
    },
}

/// What to do with a child after it processed a packet.
enum Disposition {
    Keep,
    Remove,
}

/// Per-peer connections of one server, keyed by peer address.
#[derive(Debug)]
pub struct ClientTable {
    config: ServerConfig,
    clients: HashMap<SocketAddr, Connection>,
    next_client_id: u32,
}

impl Default for ClientTable {
    fn default() -> Self {
        Self::with_valid_config(ServerConfig::default())
    }
}

impl ClientTable {
    /// Create an empty table.
    pub fn new(config: ServerConfig) -> ConnectionResult<Self> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    fn with_valid_config(config: ServerConfig) -> Self {
        Self {
            next_client_id: config.first_client_id,
            clients: HashMap::new(),
            config,
        }
    }

    /// Number of peers.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Check if there are no peers.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Connection of the peer at `addr`.
    pub fn get(&self, addr: &SocketAddr) -> Option<&Connection> {
        self.clients.get(addr)
    }

    /// Mutable connection of the peer at `addr`, e.g. to send to it.
    pub fn get_mut(&mut self, addr: &SocketAddr) -> Option<&mut Connection> {
        self.clients.get_mut(addr)
    }

    /// All peers.
    pub fn iter(&self) -> Iter<'_, SocketAddr, Connection> {
        self.clients.iter()
    }

    /// All peers, mutably.
    pub fn iter_mut(&mut self) -> IterMut<'_, SocketAddr, Connection> {
        self.clients.iter_mut()
    }

    /// Destroy and forget the peer at `addr`.
    pub fn remove(&mut self, addr: &SocketAddr) -> Option<Connection> {
        let mut child = self.clients.remove(addr)?;
        child.destroy();
        Some(child)
    }

    /// Destroy every peer.
    pub fn destroy_all(&mut self) {
        for (_, mut child) in self.clients.drain() {
            child.destroy();
        }
    }

    /// Run one server tick: take in everything pending on `server`.
    ///
    /// Errors are failures of the server connection itself; the server is
    /// closed by then and the caller should [`ClientTable::destroy_all`].
    pub fn poll(&mut self, server: &mut Connection, events: &mut Vec<ServerEvent>) -> ConnectionResult<()> {
        if server.protocol().is_datagram() {
            self.poll_datagram(server, events)
        } else {
            self.poll_stream(server, events)
        }
    }

    fn poll_datagram(&mut self, server: &mut Connection, events: &mut Vec<ServerEvent>) -> ConnectionResult<()> {
        while server.read_packet()? {
            let Some(addr) = server.last_remote_address() else {
                continue;
            };
            self.route_datagram(server, addr, events);
        }
        Ok(())
    }

    fn route_datagram(&mut self, server: &Connection, addr: SocketAddr, events: &mut Vec<ServerEvent>) {
        let packet = server.incoming_packet();

        if let Some(child) = self.clients.get_mut(&addr) {
            let disposition = match child.deliver_packet(packet) {
                Ok(true) => Self::handle_child_packet(child, addr, events),
                Ok(false) => Disposition::Keep,
                Err(e) => {
                    warn!("dropping client {}: {}", addr, e);
                    events.push(ServerEvent::Disconnected { addr });
                    Disposition::Remove
                }
            };
            if let Disposition::Remove = disposition {
                self.clients.remove(&addr);
            }
            return;
        }

        if packet.packet_type() != PacketType::ConnectionRequest {
            debug!("dropping {:?} from unknown peer {}", packet.packet_type(), addr);
            return;
        }
        if self.clients.len() >= self.config.max_clients {
            debug!("client table full, ignoring request from {}", addr);
            return;
        }

        let client_id = take_client_id(&mut self.next_client_id, self.config.first_client_id);
        let mut child = match create_remote_client_connection(server, addr, client_id) {
            Ok(child) => child,
            Err(e) => {
                warn!("could not create connection for {}: {}", addr, e);
                return;
            }
        };
        let established = child
            .deliver_packet(packet)
            .and_then(|_| child.send_connection_established_packet(client_id));
        if let Err(e) = established {
            warn!("handshake with {} failed: {}", addr, e);
            return;
        }

        info!("client {} connected from {}", client_id, addr);
        self.clients.insert(addr, child);
        events.push(ServerEvent::Connected { addr, client_id });
    }

    fn poll_stream(&mut self, server: &mut Connection, events: &mut Vec<ServerEvent>) -> ConnectionResult<()> {
        while let Some(mut child) = accept_remote_client_connection(server)? {
            let Some(addr) = child.remote_address() else {
                continue;
            };
            if self.clients.len() >= self.config.max_clients {
                debug!("client table full, refusing {}", addr);
                child.destroy();
                continue;
            }
            self.clients.insert(addr, child);
        }

        let first_client_id = self.config.first_client_id;
        let mut removed = Vec::new();
        for (&addr, child) in self.clients.iter_mut() {
            loop {
                match child.read_packet() {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        debug!("client {} gone: {}", addr, e);
                        events.push(ServerEvent::Disconnected { addr });
                        removed.push(addr);
                        break;
                    }
                }

                if child.client_id() == INVALID_CLIENT_ID
                    && child.incoming_packet().packet_type() == PacketType::ConnectionRequest
                {
                    let client_id = take_client_id(&mut self.next_client_id, first_client_id);
                    if let Err(e) = child.send_connection_established_packet(client_id) {
                        warn!("handshake with {} failed: {}", addr, e);
                        events.push(ServerEvent::Disconnected { addr });
                        removed.push(addr);
                        break;
                    }
                    info!("client {} connected from {}", client_id, addr);
                    events.push(ServerEvent::Connected { addr, client_id });
                    continue;
                }

                if let Disposition::Remove = Self::handle_child_packet(child, addr, events) {
                    removed.push(addr);
                    break;
                }
            }
        }
        for addr in removed {
            self.clients.remove(&addr);
        }
        Ok(())
    }

    /// React to the packet sitting in `child.incoming_packet()`.
    fn handle_child_packet(child: &mut Connection, addr: SocketAddr, events: &mut Vec<ServerEvent>) -> Disposition {
        match child.incoming_packet().packet_type() {
            PacketType::ConnectionRequest => {
                // The peer missed every copy of the answer.
                if let Err(e) = child.send_packet(PacketType::ConnectionEstablished, &[]) {
                    warn!("answering {} failed: {}", addr, e);
                    events.push(ServerEvent::Disconnected { addr });
                    return Disposition::Remove;
                }
                Disposition::Keep
            }
            PacketType::ConnectionClosed => {
                info!("client {} at {} disconnected", child.client_id(), addr);
                events.push(ServerEvent::Disconnected { addr });
                Disposition::Remove
            }
            _ => {
                events.push(ServerEvent::Packet {
                    addr,
                    packet: child.incoming_packet().clone(),
                });
                Disposition::Keep
            }
        }
    }
}

/// Hand out `*next` and advance it, skipping the invalid id.
fn take_client_id(next: &mut u32, first: u32) -> u32 {
    let id = *next;
    *next = next.wrapping_add(1);
    if *next == INVALID_CLIENT_ID {
        *next = first;
    }
    id
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::connection::ConnectionConfig;
    use crate::core::{Protocol, Transport};
    use crate::test_util::init_logging;
    use crate::transport::decode;
    use crate::transport::memory::{MemoryNetwork, MemoryTransport};

    struct Udp {
        network: MemoryNetwork,
        server: Connection,
        server_addr: SocketAddr,
        table: ClientTable,
    }

    impl Udp {
        fn new(config: ServerConfig) -> Self {
            let network = MemoryNetwork::new();
            let socket = network.bind(Protocol::Udp);
            let server_addr = socket.local_addr();
            let server = Connection::server_with_transport(socket, ConnectionConfig::default()).unwrap();
            Self {
                network,
                server,
                server_addr,
                table: ClientTable::new(config).unwrap(),
            }
        }

        fn client(&self) -> (Connection, Arc<MemoryTransport>) {
            let transport = self.network.bind(Protocol::Udp);
            let connection =
                Connection::client_with_transport(transport.clone(), Some(self.server_addr), ConnectionConfig::default())
                    .unwrap();
            (connection, transport)
        }

        fn poll(&mut self) -> Vec<ServerEvent> {
            let mut events = Vec::new();
            self.table.poll(&mut self.server, &mut events).unwrap();
            events
        }

        fn connect(&mut self) -> (Connection, Arc<MemoryTransport>) {
            let (mut client, transport) = self.client();
            client.send_connection_request_packet().unwrap();
            self.poll();
            client.wait_until_connection_established(Duration::from_secs(5)).unwrap();
            // Swallow the rest of the answer burst.
            while client.read_packet().unwrap() {}
            (client, transport)
        }
    }

    #[test]
    fn test_udp_handshake() {
        init_logging();
        let mut udp = Udp::new(ServerConfigBuilder::new().first_client_id(7).build().unwrap());
        let (mut client, transport) = udp.client();
        client.send_connection_request_packet().unwrap();

        let events = udp.poll();
        assert_eq!(
            events,
            vec![ServerEvent::Connected {
                addr: transport.local_addr(),
                client_id: 7
            }]
        );
        assert_eq!(udp.table.len(), 1);

        client.wait_until_connection_established(Duration::from_secs(5)).unwrap();
        assert_eq!(client.client_id(), 7);
        assert_eq!(udp.table.get(&transport.local_addr()).unwrap().client_id(), 7);
    }

    #[test]
    fn test_udp_packets_are_routed() {
        let mut udp = Udp::new(ServerConfig::default());
        let (mut alice, alice_end) = udp.connect();
        let (mut bob, bob_end) = udp.connect();
        assert_eq!(udp.table.len(), 2);

        alice.send_reliable_packet(PacketType::Message, b"from alice").unwrap();
        bob.send_packet(PacketType::Message, b"from bob").unwrap();

        let mut bodies: Vec<(SocketAddr, Vec<u8>)> = udp
            .poll()
            .into_iter()
            .filter_map(|event| match event {
                ServerEvent::Packet { addr, packet } => Some((addr, packet.body().to_vec())),
                _ => None,
            })
            .collect();
        bodies.sort();
        let mut expected = vec![
            (alice_end.local_addr(), b"from alice".to_vec()),
            (bob_end.local_addr(), b"from bob".to_vec()),
        ];
        expected.sort();
        assert_eq!(bodies, expected);

        // Replies carry acknowledgments back.
        udp.table.get_mut(&alice_end.local_addr()).unwrap().send_ping_packet().unwrap();
        while alice.read_packet().unwrap() {}
        assert!(alice.pending_reliable().is_empty());
    }

    #[test]
    fn test_udp_disconnect() {
        let mut udp = Udp::new(ServerConfig::default());
        let (mut client, transport) = udp.connect();

        client.destroy();
        assert_eq!(
            udp.poll(),
            vec![ServerEvent::Disconnected {
                addr: transport.local_addr()
            }]
        );
        assert!(udp.table.is_empty());
    }

    #[test]
    fn test_invalid_first_client_id_is_rejected() {
        let built = ServerConfigBuilder::new().first_client_id(INVALID_CLIENT_ID).build();
        assert!(matches!(built, Err(ConnectionError::Config(_))));

        let config = ServerConfig {
            first_client_id: INVALID_CLIENT_ID,
            ..ServerConfig::default()
        };
        assert!(matches!(ClientTable::new(config), Err(ConnectionError::Config(_))));
    }

    #[test]
    fn test_client_ids_skip_invalid_id() {
        let mut next = INVALID_CLIENT_ID - 1;
        assert_eq!(take_client_id(&mut next, 5), INVALID_CLIENT_ID - 1);
        assert_eq!(take_client_id(&mut next, 5), 5);
        assert_eq!(take_client_id(&mut next, 5), 6);
    }

    #[test]
    fn test_unknown_peer_is_ignored() {
        let mut udp = Udp::new(ServerConfig::default());
        let (mut client, _) = udp.client();
        client.send_packet(PacketType::Message, b"hello?").unwrap();
        assert!(udp.poll().is_empty());
        assert!(udp.table.is_empty());
    }

    #[test]
    fn test_max_clients() {
        let mut udp = Udp::new(ServerConfigBuilder::new().max_clients(1).build().unwrap());
        let (_first, _) = udp.connect();

        let (mut second, _) = udp.client();
        second.send_connection_request_packet().unwrap();
        assert!(udp.poll().is_empty());
        assert_eq!(udp.table.len(), 1);
    }

    #[test]
    fn test_repeated_request_is_answered_again() {
        let mut udp = Udp::new(ServerConfig::default());
        let (mut client, transport) = udp.connect();
        let addr = transport.local_addr();

        client.send_packet(PacketType::ConnectionRequest, &[]).unwrap();
        assert!(udp.poll().is_empty());
        let mut answers = 0;
        while client.read_packet().unwrap() {
            if client.incoming_packet().packet_type() == PacketType::ConnectionEstablished {
                answers += 1;
            }
        }
        assert_eq!(answers, 1);
        assert!(udp.table.get(&addr).is_some());
    }

    #[test]
    fn test_remove_destroys_child() {
        let mut udp = Udp::new(ServerConfig::default());
        let (mut client, transport) = udp.connect();

        let child = udp.table.remove(&transport.local_addr()).unwrap();
        assert!(child.is_closed());
        assert!(udp.table.is_empty());

        assert!(client.read_packet().unwrap());
        assert_eq!(client.incoming_packet().packet_type(), PacketType::ConnectionClosed);
        assert!(client.is_closed());
    }

    #[test]
    fn test_lost_reliable_message_arrives_once() {
        init_logging();
        let mut udp = Udp::new(ServerConfig::default());
        let (mut client, transport) = udp.connect();
        let addr = transport.local_addr();

        let mut dropped = false;
        transport.set_drop_filter(move |bytes| {
            let hit = !dropped && decode(bytes).is_ok_and(|(_, body)| body == [3]);
            dropped |= hit;
            hit
        });

        for i in 1..=5u8 {
            client.send_reliable_packet(PacketType::Message, &[i]).unwrap();
        }

        let mut messages = Vec::new();
        for _ in 0..60 {
            client.send_ping_packet().unwrap();
            let mut events = Vec::new();
            udp.table.poll(&mut udp.server, &mut events).unwrap();
            for event in events {
                if let ServerEvent::Packet { packet, .. } = event {
                    if packet.packet_type() == PacketType::Message {
                        messages.push(packet.body()[0]);
                    }
                }
            }
            udp.table.get_mut(&addr).unwrap().send_ping_packet().unwrap();
            while client.read_packet().unwrap() {}
        }

        assert_eq!(messages, vec![1, 2, 4, 5, 3]);
        assert_eq!(client.stats().reliable_resent, 1);
        assert!(client.pending_reliable().is_empty());
    }

    #[test]
    fn test_tcp_table() {
        init_logging();
        let network = MemoryNetwork::new();
        let listener = network.bind(Protocol::Tcp);
        let mut server = Connection::server_with_transport(listener.clone(), ConnectionConfig::default()).unwrap();
        let mut table = ClientTable::default();

        let client_end = network.connect_stream(&listener);
        let client_addr = client_end.local_addr();
        let mut client =
            Connection::client_with_transport(client_end.clone(), None, ConnectionConfig::default()).unwrap();
        client.send_connection_request_packet().unwrap();

        let mut events = Vec::new();
        table.poll(&mut server, &mut events).unwrap();
        assert_eq!(
            events,
            vec![ServerEvent::Connected {
                addr: client_addr,
                client_id: 1
            }]
        );
        client.wait_until_connection_established(Duration::from_secs(5)).unwrap();
        assert_eq!(client.client_id(), 1);

        client.send_packet(PacketType::Message, b"over tcp").unwrap();
        events.clear();
        table.poll(&mut server, &mut events).unwrap();
        assert!(matches!(
            &events[..],
            [ServerEvent::Packet { packet, .. }] if packet.body() == b"over tcp"
        ));

        // An abrupt close is noticed on the next tick; the server stays up.
        client_end.close();
        events.clear();
        table.poll(&mut server, &mut events).unwrap();
        assert_eq!(events, vec![ServerEvent::Disconnected { addr: client_addr }]);
        assert!(table.is_empty());
        assert!(server.is_connected());
    }
}
