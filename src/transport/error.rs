//! Transport error taxonomy.
//!
//! OS-specific error codes never leak past this module: every socket failure
//! is classified into one of the kinds below, with [`TransportError::Custom`]
//! as the fallback for anything the platform layer cannot place.

use std::io;

use thiserror::Error;

/// Transport layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The local address is already bound.
    #[error("address in use")]
    AddressInUse,

    /// The local address cannot be assigned.
    #[error("address unavailable")]
    AddressUnavailable,

    /// The local network is down.
    #[error("network down")]
    NetworkDown,

    /// No route to the remote network.
    #[error("network unreachable")]
    NetworkUnreachable,

    /// The network dropped the connection on reset.
    #[error("network reset")]
    NetworkReset,

    /// The remote host is down.
    #[error("host down")]
    HostDown,

    /// No route to the remote host.
    #[error("host unreachable")]
    HostUnreachable,

    /// The remote host name did not resolve.
    #[error("host not found")]
    HostNotFound,

    /// The connection was aborted locally.
    #[error("connection aborted")]
    ConnectionAborted,

    /// The remote reset the connection.
    #[error("connection reset")]
    ConnectionReset,

    /// The remote refused the connection.
    #[error("connection refused")]
    ConnectionRefused,

    /// Anything the platform layer could not classify.
    #[error("{0}")]
    Custom(String),
}

impl TransportError {
    /// Classify an I/O error.
    ///
    /// `WouldBlock` must be filtered out by the caller; it is not an error.
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::AddrInUse => TransportError::AddressInUse,
            io::ErrorKind::AddrNotAvailable => TransportError::AddressUnavailable,
            io::ErrorKind::NetworkDown => TransportError::NetworkDown,
            io::ErrorKind::NetworkUnreachable => TransportError::NetworkUnreachable,
            io::ErrorKind::HostUnreachable => TransportError::HostUnreachable,
            io::ErrorKind::ConnectionAborted => TransportError::ConnectionAborted,
            io::ErrorKind::ConnectionReset => TransportError::ConnectionReset,
            io::ErrorKind::ConnectionRefused => TransportError::ConnectionRefused,
            _ => TransportError::Custom(err.to_string()),
        }
    }

    /// Check if this error belongs to endpoint creation (bind/connect).
    pub fn is_open_error(&self) -> bool {
        matches!(
            self,
            TransportError::AddressInUse
                | TransportError::AddressUnavailable
                | TransportError::NetworkDown
                | TransportError::NetworkUnreachable
                | TransportError::NetworkReset
                | TransportError::HostDown
                | TransportError::HostUnreachable
                | TransportError::HostNotFound
        )
    }

    /// Check if this error is a failure of an already open connection.
    pub fn is_runtime_error(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionAborted
                | TransportError::ConnectionReset
                | TransportError::ConnectionRefused
        )
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        TransportError::from_io(&err)
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::addr_in_use(io::ErrorKind::AddrInUse, TransportError::AddressInUse)]
    #[case::addr_not_available(io::ErrorKind::AddrNotAvailable, TransportError::AddressUnavailable)]
    #[case::network_down(io::ErrorKind::NetworkDown, TransportError::NetworkDown)]
    #[case::network_unreachable(io::ErrorKind::NetworkUnreachable, TransportError::NetworkUnreachable)]
    #[case::host_unreachable(io::ErrorKind::HostUnreachable, TransportError::HostUnreachable)]
    #[case::aborted(io::ErrorKind::ConnectionAborted, TransportError::ConnectionAborted)]
    #[case::reset(io::ErrorKind::ConnectionReset, TransportError::ConnectionReset)]
    #[case::refused(io::ErrorKind::ConnectionRefused, TransportError::ConnectionRefused)]
    fn test_classify_io(#[case] kind: io::ErrorKind, #[case] expected: TransportError) {
        assert_eq!(TransportError::from_io(&io::Error::from(kind)), expected);
    }

    #[test]
    fn test_unclassified_becomes_custom() {
        let err = io::Error::new(io::ErrorKind::Other, "strange socket state");
        assert_eq!(
            TransportError::from(err),
            TransportError::Custom("strange socket state".into())
        );
    }

    #[test]
    fn test_open_and_runtime_errors() {
        assert!(TransportError::AddressInUse.is_open_error());
        assert!(TransportError::HostNotFound.is_open_error());
        assert!(!TransportError::ConnectionReset.is_open_error());

        assert!(TransportError::ConnectionReset.is_runtime_error());
        assert!(TransportError::ConnectionRefused.is_runtime_error());
        assert!(!TransportError::HostDown.is_runtime_error());
        assert!(!TransportError::Custom("x".into()).is_runtime_error());
    }
}
