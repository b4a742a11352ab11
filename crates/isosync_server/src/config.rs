//! Server configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the reference sync server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Maximum changes returned by one fetch.
    pub max_fetch_batch: usize,
    /// Maximum records accepted by one save or delete call.
    pub max_push_batch: usize,
    /// Maximum number of records the zone may hold.
    pub record_quota: Option<usize>,
}

impl ServerConfig {
    /// Creates a configuration with default limits.
    pub fn new() -> Self {
        Self {
            max_fetch_batch: 500,
            max_push_batch: 400,
            record_quota: None,
        }
    }

    /// Sets the maximum fetch batch size.
    pub fn with_max_fetch_batch(mut self, size: usize) -> Self {
        self.max_fetch_batch = size.max(1);
        self
    }

    /// Sets the maximum push batch size.
    pub fn with_max_push_batch(mut self, size: usize) -> Self {
        self.max_push_batch = size.max(1);
        self
    }

    /// Limits the number of stored records.
    pub fn with_record_quota(mut self, quota: usize) -> Self {
        self.record_quota = Some(quota);
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_fetch_batch, 500);
        assert_eq!(config.record_quota, None);
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new()
            .with_max_fetch_batch(0)
            .with_max_push_batch(50)
            .with_record_quota(10);

        assert_eq!(config.max_fetch_batch, 1);
        assert_eq!(config.max_push_batch, 50);
        assert_eq!(config.record_quota, Some(10));
    }
}
