use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::retry::RetryConfig;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub dsn: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dsn: String::from("sqlite://.data/purgeline.db"),
        }
    }
}

impl DatabaseConfig {
    /// Create an in-memory database configuration
    pub fn in_memory() -> Self {
        Self {
            dsn: String::from("sqlite::memory:"),
        }
    }
}

/// Adapter for a single bucket
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct BucketConfig {
    /// Object store DSN (memory://, file:///path, s3://host/bucket)
    pub dsn: String,
}

/// Object storage configuration.
///
/// Buckets listed under `buckets` are served by their own adapter; any
/// other bucket resolves to the `default` store under a `<bucket>/` prefix.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    pub default: String,
    #[serde(default)]
    pub buckets: HashMap<String, BucketConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            default: String::from("file:///.data/objects"),
            buckets: HashMap::new(),
        }
    }
}

/// Object naming convention used to derive the owning subject
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NamingConfig {
    /// Delimiter splitting the final path segment; the first token is the subject
    pub delimiter: String,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            delimiter: String::from("-"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestConfig {
    /// JSON field holding the owning subject of each line
    pub subject_field: String,
    /// Offset rows written per INSERT statement
    pub batch_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            subject_field: String::from("user_id"),
            batch_size: 1000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RedactionConfig {
    /// Line written in place of every redacted line
    pub tombstone: String,
    /// Bucket receiving rewritten objects. Rewrites in place when unset.
    #[serde(default)]
    pub destination_bucket: Option<String>,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            tombstone: String::from("{}"),
            destination_bucket: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PurgeConfig {
    /// Number of subjects purged in parallel
    pub concurrency: usize,
    /// Log actions without deleting or rewriting anything
    #[serde(default)]
    pub dry_run: bool,
    /// Retry policy for storage deletes and redaction I/O
    pub retry: RetryConfig,
    /// Retry policy for index mutations following a successful purge
    pub index_retry: RetryConfig,
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            dry_run: false,
            retry: RetryConfig::default(),
            index_retry: RetryConfig {
                max_attempts: 10,
                initial_delay: Duration::from_millis(50),
                max_delay: Duration::from_secs(2),
                backoff_multiplier: 2.0,
            },
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Bucket the approval report is published to
    pub bucket: String,
    /// Key prefix of the published report objects
    pub prefix: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            bucket: String::from("reports"),
            prefix: String::from("report"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Configuration {
    /// Database holding the location index and line offsets
    pub database: DatabaseConfig,
    /// Object storage configuration
    pub storage: StorageConfig,
    pub naming: NamingConfig,
    pub ingest: IngestConfig,
    pub redaction: RedactionConfig,
    pub purge: PurgeConfig,
    pub report: ReportConfig,
}

impl Configuration {
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(Path::new("purgeline.toml"))
            .extract()
            .map_err(Box::new)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        Self::figment(path).extract().map_err(Box::new)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("PURGELINE__").split("__"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.dsn.is_empty() {
            anyhow::bail!("Database DSN cannot be empty");
        }

        if self.storage.default.is_empty() {
            anyhow::bail!("Default storage DSN cannot be empty");
        }

        if let Some((bucket, _)) = self
            .storage
            .buckets
            .iter()
            .find(|(_, adapter)| adapter.dsn.is_empty())
        {
            anyhow::bail!("Storage DSN for bucket '{bucket}' cannot be empty");
        }

        if self.naming.delimiter.is_empty() {
            anyhow::bail!("Naming delimiter cannot be empty");
        }

        if self.ingest.subject_field.is_empty() {
            anyhow::bail!("Ingest subject field cannot be empty");
        }

        if self.ingest.batch_size == 0 {
            anyhow::bail!("ingest.batch_size must be positive");
        }

        if self.redaction.tombstone.contains(['\n', '\r']) {
            anyhow::bail!("Tombstone must be a single line");
        }

        if self.purge.concurrency == 0 {
            anyhow::bail!("purge.concurrency must be positive");
        }

        self.purge.retry.validate()?;
        self.purge.index_retry.validate()?;

        if self.report.bucket.is_empty() {
            anyhow::bail!("Report bucket cannot be empty");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configuration() {
        let config = Configuration::default();

        assert_eq!(config.database.dsn, "sqlite://.data/purgeline.db");
        assert_eq!(config.storage.default, "file:///.data/objects");
        assert_eq!(config.naming.delimiter, "-");
        assert_eq!(config.ingest.subject_field, "user_id");
        assert_eq!(config.redaction.tombstone, "{}");
        assert!(config.redaction.destination_bucket.is_none());
        assert_eq!(config.purge.concurrency, 8);
        assert!(!config.purge.dry_run);
        assert_eq!(config.purge.index_retry.max_attempts, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_configless_operation() {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .extract::<Configuration>()
            .unwrap();

        assert_eq!(config.database.dsn, "sqlite://.data/purgeline.db");
        assert_eq!(config.purge.retry.max_attempts, 3);
    }

    #[test]
    fn test_toml_and_env_layering() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "purgeline.toml",
                r#"
                [database]
                dsn = "sqlite::memory:"

                [storage]
                default = "memory://"

                [storage.buckets.datalake]
                dsn = "file:///tmp/datalake"

                [redaction]
                destination_bucket = "purged"

                [purge.retry]
                max_attempts = 5
                initial_delay = "250ms"
                max_delay = "10s"
                backoff_multiplier = 3.0
                "#,
            )?;
            jail.set_env("PURGELINE__NAMING__DELIMITER", "_");

            let config = Configuration::load().expect("config should load");

            assert_eq!(config.database.dsn, "sqlite::memory:");
            assert_eq!(config.storage.default, "memory://");
            assert_eq!(
                config.storage.buckets.get("datalake").unwrap().dsn,
                "file:///tmp/datalake"
            );
            assert_eq!(
                config.redaction.destination_bucket.as_deref(),
                Some("purged")
            );
            assert_eq!(config.purge.retry.max_attempts, 5);
            assert_eq!(config.purge.retry.initial_delay, Duration::from_millis(250));
            assert_eq!(config.purge.retry.max_delay, Duration::from_secs(10));
            assert_eq!(config.naming.delimiter, "_");
            // Untouched sections keep their defaults
            assert_eq!(config.purge.index_retry.max_attempts, 10);
            Ok(())
        });
    }

    #[test]
    fn test_multiline_tombstone_is_invalid() {
        let mut config = Configuration::default();
        config.redaction.tombstone = "{}\n{}".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_concurrency_is_invalid() {
        let mut config = Configuration::default();
        config.purge.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_delimiter_is_invalid() {
        let mut config = Configuration::default();
        config.naming.delimiter = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_bucket_dsn_is_invalid() {
        let mut config = Configuration::default();
        config
            .storage
            .buckets
            .insert("datalake".to_string(), BucketConfig::default());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("datalake"));
    }
}
