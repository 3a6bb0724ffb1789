//! Controller configuration.

use std::time::Duration;

use uuid::Uuid;

use crate::core::constants::{
    DEFAULT_READ_BUFFER_SIZE, SERVICE_NAME, SERVICE_UUID, UNKNOWN_SENDER,
};

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Service identifier channels are registered under.
    pub service_id: Uuid,

    /// Service record name used when listening.
    pub service_name: String,

    /// Size of the per-session receive buffer.
    pub read_buffer_size: usize,

    /// Optional limit on a client connect attempt. `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,

    /// Sender label used when the adapter has no local name.
    pub fallback_sender: String,

    /// Capacity of the error broadcast channel.
    pub error_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            service_id: SERVICE_UUID,
            service_name: SERVICE_NAME.to_string(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            connect_timeout: None,
            fallback_sender: UNKNOWN_SENDER.to_string(),
            error_capacity: 16,
        }
    }
}

/// Builder for [`ControllerConfig`].
#[derive(Debug)]
pub struct ControllerConfigBuilder {
    config: ControllerConfig,
}

impl ControllerConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            config: ControllerConfig::default(),
        }
    }

    /// Set the service identifier. Both peers must agree on it.
    pub fn service_id(mut self, id: Uuid) -> Self {
        self.config.service_id = id;
        self
    }

    /// Set the service record name.
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.config.service_name = name.into();
        self
    }

    /// Set the receive buffer size.
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    /// Bound client connect attempts.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = Some(timeout);
        self
    }

    /// Set the fallback sender label.
    pub fn fallback_sender(mut self, label: impl Into<String>) -> Self {
        self.config.fallback_sender = label.into();
        self
    }

    /// Set the error channel capacity.
    pub fn error_capacity(mut self, capacity: usize) -> Self {
        self.config.error_capacity = capacity;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ControllerConfig {
        self.config
    }
}

impl Default for ControllerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.service_id, SERVICE_UUID);
        assert_eq!(config.service_name, "chat_service");
        assert_eq!(config.read_buffer_size, 1024);
        assert!(config.connect_timeout.is_none());
        assert_eq!(config.fallback_sender, "Unknown");
    }

    #[test]
    fn test_builder() {
        let config = ControllerConfigBuilder::new()
            .read_buffer_size(4096)
            .connect_timeout(Duration::from_secs(3))
            .fallback_sender("me")
            .build();

        assert_eq!(config.read_buffer_size, 4096);
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(3)));
        assert_eq!(config.fallback_sender, "me");
    }
}
