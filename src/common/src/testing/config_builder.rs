//! Test configuration builder for creating test setups quickly.

use std::time::Duration;

use crate::config::{BucketConfig, Configuration, DatabaseConfig};
use crate::retry::RetryConfig;

/// Builder for creating test configurations.
///
/// # Example
///
/// ```rust,ignore
/// use common::testing::TestConfigBuilder;
///
/// let config = TestConfigBuilder::new()
///     .in_memory()
///     .with_destination_bucket("purged")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct TestConfigBuilder {
    config: Configuration,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Configuration::default(),
        }
    }

    /// Configure for fully in-memory operation with millisecond retries.
    ///
    /// This sets:
    /// - Default storage DSN to `memory://`
    /// - Database DSN to `sqlite::memory:`
    /// - Retry delays of 1ms
    pub fn in_memory(mut self) -> Self {
        self.config.storage.default = "memory://".to_string();
        self.config.storage.buckets.clear();
        self.config.database = DatabaseConfig::in_memory();
        self.config.purge.retry = fast_retry(3);
        self.config.purge.index_retry = fast_retry(5);
        self
    }

    /// Route a bucket to its own store.
    pub fn with_bucket(mut self, bucket: &str, dsn: &str) -> Self {
        self.config.storage.buckets.insert(
            bucket.to_string(),
            BucketConfig {
                dsn: dsn.to_string(),
            },
        );
        self
    }

    pub fn with_destination_bucket(mut self, bucket: &str) -> Self {
        self.config.redaction.destination_bucket = Some(bucket.to_string());
        self
    }

    pub fn with_tombstone(mut self, tombstone: &str) -> Self {
        self.config.redaction.tombstone = tombstone.to_string();
        self
    }

    pub fn with_delimiter(mut self, delimiter: &str) -> Self {
        self.config.naming.delimiter = delimiter.to_string();
        self
    }

    pub fn with_retry_attempts(mut self, max_attempts: u32) -> Self {
        self.config.purge.retry = fast_retry(max_attempts);
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.config.purge.dry_run = true;
        self
    }

    pub fn build(self) -> Configuration {
        self.config
    }
}

fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_config() {
        let config = TestConfigBuilder::new().in_memory().build();

        assert_eq!(config.storage.default, "memory://");
        assert_eq!(config.database.dsn, "sqlite::memory:");
        assert_eq!(config.purge.retry.initial_delay, Duration::from_millis(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_overrides() {
        let config = TestConfigBuilder::new()
            .in_memory()
            .with_bucket("reports", "memory://")
            .with_destination_bucket("purged")
            .with_tombstone("{\"redacted\":true}")
            .with_delimiter("_")
            .with_retry_attempts(1)
            .dry_run()
            .build();

        assert!(config.storage.buckets.contains_key("reports"));
        assert_eq!(
            config.redaction.destination_bucket.as_deref(),
            Some("purged")
        );
        assert_eq!(config.redaction.tombstone, "{\"redacted\":true}");
        assert_eq!(config.naming.delimiter, "_");
        assert_eq!(config.purge.retry.max_attempts, 1);
        assert!(config.purge.dry_run);
    }
}
