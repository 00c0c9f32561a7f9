//! Client connection construction.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::connection::{Connection, ConnectionConfig, ConnectionKind, ConnectionStatus};
use crate::core::{ConnectionResult, Transport};

#[cfg(feature = "net")]
use crate::core::Protocol;

/// Open a client connection to `host:port`.
///
/// The connection starts out [`ConnectionStatus::Connecting`]; drive the
/// handshake with [`Connection::wait_until_connection_established`]. Errors
/// opening the socket are returned as is and never retried.
#[cfg(feature = "net")]
#[cfg_attr(docsrs, doc(cfg(feature = "net")))]
pub fn create_client_connection(
    protocol: Protocol,
    host: &str,
    port: u16,
    config: ConnectionConfig,
) -> ConnectionResult<Connection> {
    config.validate()?;
    let (transport, remote) = crate::transport::socket::open_client(protocol, host, port)?;
    Connection::client_with_transport(transport, Some(remote), config)
}

/// Open a client connection and complete the handshake.
///
/// The connection is destroyed if the handshake fails.
#[cfg(feature = "net")]
#[cfg_attr(docsrs, doc(cfg(feature = "net")))]
pub fn connect(
    protocol: Protocol,
    host: &str,
    port: u16,
    config: ConnectionConfig,
    timeout: Duration,
) -> ConnectionResult<Connection> {
    let connection = create_client_connection(protocol, host, port, config)?;
    establish(connection, timeout)
}

/// Run the handshake on a fresh client connection, destroying it on failure.
pub fn establish(mut connection: Connection, timeout: Duration) -> ConnectionResult<Connection> {
    match connection.wait_until_connection_established(timeout) {
        Ok(()) => Ok(connection),
        Err(e) => {
            connection.destroy();
            Err(e)
        }
    }
}

impl Connection {
    /// Create a client connection over an already open transport.
    ///
    /// `remote` is the server address. Datagram transports need it; stream
    /// transports ignore it.
    pub fn client_with_transport(
        transport: Arc<dyn Transport>,
        remote: Option<SocketAddr>,
        config: ConnectionConfig,
    ) -> ConnectionResult<Self> {
        let connection = Connection::new(
            ConnectionKind::Client,
            ConnectionStatus::Connecting,
            transport,
            remote,
            config,
        )?;
        info!(
            "created {:?} client connection to {:?}",
            connection.protocol(),
            remote
        );
        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ConnectionError, Protocol};
    use crate::transport::memory::MemoryNetwork;

    #[test]
    fn test_client_starts_connecting() {
        let network = MemoryNetwork::new();
        let transport = network.bind(Protocol::Udp);
        let server = network.bind(Protocol::Udp).local_addr();

        let connection =
            Connection::client_with_transport(transport, Some(server), ConnectionConfig::default()).unwrap();
        assert_eq!(connection.kind(), ConnectionKind::Client);
        assert_eq!(connection.status(), ConnectionStatus::Connecting);
        assert_eq!(connection.remote_address(), Some(server));
        assert_eq!(connection.client_id(), crate::core::INVALID_CLIENT_ID);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let network = MemoryNetwork::new();
        let config = ConnectionConfig {
            spam_count: 0,
            ..ConnectionConfig::default()
        };
        let result = Connection::client_with_transport(network.bind(Protocol::Udp), None, config);
        assert!(matches!(result, Err(ConnectionError::Config(_))));
    }

    #[test]
    fn test_establish_destroys_on_timeout() {
        let network = MemoryNetwork::new();
        let transport = network.bind(Protocol::Udp);
        let server = network.bind(Protocol::Udp).local_addr();
        let connection =
            Connection::client_with_transport(transport.clone(), Some(server), ConnectionConfig::default())
                .unwrap();

        let result = establish(connection, Duration::from_millis(20));
        assert!(matches!(result, Err(ConnectionError::Timeout)));
        assert!(transport.is_closed());
    }

    #[cfg(feature = "net")]
    #[test]
    fn test_create_client_connection_unknown_host() {
        let result = create_client_connection(Protocol::Udp, "host.invalid", 9, ConnectionConfig::default());
        assert!(matches!(
            result,
            Err(ConnectionError::Transport(crate::transport::TransportError::HostNotFound))
        ));
    }
}
