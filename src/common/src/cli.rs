use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI arguments shared by every purgeline command
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Only log warnings and errors")]
    pub quiet: bool,
}

/// Subcommands that only inspect configuration
#[derive(Subcommand, Debug, Clone)]
pub enum CommonCommands {
    /// Show current configuration and exit
    Config {
        #[arg(long, help = "Show configuration in JSON format")]
        json: bool,
    },
    /// Validate configuration and exit
    Validate,
    /// Show version information and exit
    Version,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::Configuration;
    use anyhow::{Context, Result};
    use tracing_subscriber::EnvFilter;

    /// Initialize logging based on CLI arguments.
    ///
    /// `--verbose` and `--quiet` win over `RUST_LOG`; the default is `info`.
    pub fn init_logging(args: &CommonArgs) {
        let filter = if args.quiet {
            EnvFilter::new("warn")
        } else if args.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
        };

        // Logs go to stderr so command output on stdout stays machine-readable
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                log::info!("Loading configuration from: {}", path.display());
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load().context("Failed to load configuration"),
        }
    }

    /// Display configuration in human-readable or JSON format
    pub fn display_config(config: &Configuration, json: bool) -> Result<()> {
        if json {
            let json = serde_json::to_string_pretty(config)
                .context("Failed to serialize configuration to JSON")?;
            println!("{json}");
        } else {
            println!("purgeline configuration:");
            println!("========================");
            println!("Database DSN: {}", config.database.dsn);
            println!("Default storage DSN: {}", config.storage.default);
            let mut buckets: Vec<_> = config.storage.buckets.iter().collect();
            buckets.sort_by(|a, b| a.0.cmp(b.0));
            for (bucket, adapter) in buckets {
                println!("Bucket '{bucket}' storage DSN: {}", adapter.dsn);
            }
            println!("Naming delimiter: {:?}", config.naming.delimiter);
            println!("Ingest subject field: {}", config.ingest.subject_field);
            println!("Tombstone: {}", config.redaction.tombstone);
            match &config.redaction.destination_bucket {
                Some(bucket) => println!("Redaction destination bucket: {bucket}"),
                None => println!("Redaction destination: in place"),
            }
            println!("Purge concurrency: {}", config.purge.concurrency);
            println!("Purge dry run: {}", config.purge.dry_run);
            println!(
                "Purge retry: {} attempts, {:?} initial delay",
                config.purge.retry.max_attempts, config.purge.retry.initial_delay
            );
            println!(
                "Report location: {}/{}",
                config.report.bucket, config.report.prefix
            );
        }
        Ok(())
    }

    /// Validate configuration and report any issues
    pub fn validate_config(config: &Configuration) -> Result<()> {
        log::info!("Validating configuration...");
        config.validate()?;
        log::info!("Configuration validation passed");
        Ok(())
    }

    /// Handle commands that don't need any backing store
    pub fn handle_common_command(command: &CommonCommands, config: &Configuration) -> Result<()> {
        match command {
            CommonCommands::Config { json } => display_config(config, *json),
            CommonCommands::Validate => validate_config(config),
            CommonCommands::Version => {
                println!("{}", version_info());
                Ok(())
            }
        }
    }

    /// Standard version information
    pub fn version_info() -> String {
        format!(
            "{} {} ({})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_RUST_VERSION")
        )
    }
}
