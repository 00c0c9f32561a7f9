//! Connection configuration.

use std::time::Duration;

use crate::core::{
    ConnectionError, ConnectionResult, DEFAULT_MAGIC, DEFAULT_SPAM_COUNT, PACKET_SIZE, RELIABLE_CAPACITY,
};

/// Default interval between handshake request bursts.
pub const DEFAULT_HANDSHAKE_RESEND_INTERVAL: Duration = Duration::from_millis(250);

/// Per-connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Session tag stamped on every packet and required on every received one.
    pub magic: u8,

    /// Copies sent of each handshake and teardown packet.
    pub spam_count: usize,

    /// Reliable packets tracked before the oldest is evicted.
    pub reliable_capacity: usize,

    /// Size of the receive buffer; at least one full packet.
    pub incoming_buffer_size: usize,

    /// How often a connecting client repeats its request burst.
    /// `None` sends the burst only once.
    pub handshake_resend_interval: Option<Duration>,

    /// Send `Connection_Closed` when the connection is destroyed.
    pub send_close_on_destroy: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            magic: DEFAULT_MAGIC,
            spam_count: DEFAULT_SPAM_COUNT,
            reliable_capacity: RELIABLE_CAPACITY,
            incoming_buffer_size: 2 * PACKET_SIZE,
            handshake_resend_interval: Some(DEFAULT_HANDSHAKE_RESEND_INTERVAL),
            send_close_on_destroy: true,
        }
    }
}

impl ConnectionConfig {
    /// Start building a configuration from the defaults.
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::new()
    }

    /// Reject settings no connection can work with.
    pub fn validate(&self) -> ConnectionResult<()> {
        if self.spam_count == 0 {
            return Err(ConnectionError::Config("spam_count must be at least 1".into()));
        }
        if self.reliable_capacity == 0 {
            return Err(ConnectionError::Config("reliable_capacity must be at least 1".into()));
        }
        if self.incoming_buffer_size < PACKET_SIZE {
            return Err(ConnectionError::Config(format!(
                "incoming_buffer_size must be at least {PACKET_SIZE} bytes, got {}",
                self.incoming_buffer_size
            )));
        }
        Ok(())
    }
}

/// Builder for [`ConnectionConfig`].
#[derive(Debug, Default)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// Create a builder holding the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the session magic.
    pub fn magic(mut self, magic: u8) -> Self {
        self.config.magic = magic;
        self
    }

    /// Set how many copies of handshake and teardown packets are sent.
    pub fn spam_count(mut self, count: usize) -> Self {
        self.config.spam_count = count;
        self
    }

    /// Set the reliable tracker capacity.
    pub fn reliable_capacity(mut self, capacity: usize) -> Self {
        self.config.reliable_capacity = capacity;
        self
    }

    /// Set the receive buffer size.
    pub fn incoming_buffer_size(mut self, size: usize) -> Self {
        self.config.incoming_buffer_size = size;
        self
    }

    /// Set or disable the handshake resend interval.
    pub fn handshake_resend_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.handshake_resend_interval = interval;
        self
    }

    /// Enable or disable the courtesy `Connection_Closed` on destroy.
    pub fn send_close_on_destroy(mut self, enabled: bool) -> Self {
        self.config.send_close_on_destroy = enabled;
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> ConnectionResult<ConnectionConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.magic, 0x5A);
        assert_eq!(config.spam_count, 3);
        assert_eq!(config.reliable_capacity, 64);
        assert_eq!(config.incoming_buffer_size, 2 * PACKET_SIZE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ConnectionConfig::builder()
            .magic(0x42)
            .spam_count(5)
            .reliable_capacity(16)
            .handshake_resend_interval(None)
            .send_close_on_destroy(false)
            .build()
            .unwrap();
        assert_eq!(config.magic, 0x42);
        assert_eq!(config.spam_count, 5);
        assert_eq!(config.reliable_capacity, 16);
        assert_eq!(config.handshake_resend_interval, None);
        assert!(!config.send_close_on_destroy);
    }

    #[rstest]
    #[case::no_spam(ConnectionConfig::builder().spam_count(0))]
    #[case::no_tracking(ConnectionConfig::builder().reliable_capacity(0))]
    #[case::tiny_buffer(ConnectionConfig::builder().incoming_buffer_size(PACKET_SIZE - 1))]
    fn test_invalid_configs(#[case] builder: ConnectionConfigBuilder) {
        assert!(matches!(builder.build(), Err(ConnectionError::Config(_))));
    }
}
