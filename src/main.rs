use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use common::cli::{CommonArgs, CommonCommands, utils};
use common::config::Configuration;
use common::model::PurgeReport;
use common::storage::read_all;
use common::{Database, ObjectRef, ObjectStoreRouter, Storage, SubjectId};
use indexer::{
    EventReconciler, Ingestor, LocationIndex, NamingConvention, RowOffsetStore, SqlLocationIndex,
    SqlRowOffsetStore, parse_notification,
};
use purger::{PurgeExecutor, RedactionEngine, ReportGenerator, parse_subject_list, render_text};
use serde::Serialize;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "purgeline")]
#[command(about = "purgeline - locate and purge a data subject's records in object storage")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: PurgelineCommands,
}

#[derive(Subcommand)]
enum PurgelineCommands {
    /// Apply storage notifications to the location index
    Reconcile {
        #[arg(help = "Notification JSON file, or - for stdin")]
        input: String,
    },
    /// Record which subject owns each line of shared objects
    Ingest {
        #[arg(required = true, help = "Object references, e.g. s3://bucket/key")]
        objects: Vec<String>,
    },
    /// Produce a purge report for approval
    Report {
        #[arg(help = "Comma separated subject IDs, @file or - for stdin")]
        subjects: String,

        #[arg(long, help = "Print the report as JSON instead of text")]
        json: bool,

        #[arg(long, help = "Write the report to the configured report location")]
        publish: bool,
    },
    /// Execute an approved purge report
    Purge {
        #[arg(help = "Report JSON file or object reference")]
        report: String,

        #[arg(long, help = "Log actions without deleting or rewriting anything")]
        dry_run: bool,
    },
    #[command(flatten)]
    Common(CommonCommands),
}

/// Backing stores shared by every data command
struct Stores {
    storage: Arc<dyn Storage>,
    index: Arc<dyn LocationIndex>,
    offsets: Arc<dyn RowOffsetStore>,
}

impl Stores {
    async fn connect(config: &Configuration) -> Result<Self> {
        let storage = ObjectStoreRouter::from_config(&config.storage)
            .context("Failed to configure object storage")?;
        let db = Database::connect(&config.database.dsn)
            .await
            .context("Failed to connect to the location database")?;

        Ok(Self {
            storage: Arc::new(storage),
            index: Arc::new(SqlLocationIndex::new(db.clone())),
            offsets: Arc::new(
                SqlRowOffsetStore::new(db).with_batch_size(config.ingest.batch_size),
            ),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    utils::init_logging(&cli.common);

    let mut config = utils::load_config(cli.common.config.as_ref())?;

    let command = match cli.command {
        PurgelineCommands::Common(common_cmd) => {
            return utils::handle_common_command(&common_cmd, &config);
        }
        command => command,
    };
    config.validate()?;

    let stores = Stores::connect(&config).await?;

    match command {
        PurgelineCommands::Reconcile { input } => {
            let payload = read_input(&input)?;
            let events = parse_notification(&payload).context("Invalid storage notification")?;
            let reconciler = EventReconciler::new(
                stores.index.clone(),
                NamingConvention::new(config.naming.delimiter.clone()),
            );
            let summary = reconciler.apply_all(&events).await?;
            print_json(&summary)?;
        }
        PurgelineCommands::Ingest { objects } => {
            let ingestor = Ingestor::new(
                stores.storage.clone(),
                stores.offsets.clone(),
                &config.ingest,
                config.redaction.tombstone.clone(),
            );
            let mut summaries = Vec::with_capacity(objects.len());
            for uri in &objects {
                let object = ObjectRef::parse(uri)?;
                summaries.push(ingestor.ingest(&object).await?);
            }
            print_json(&summaries)?;
        }
        PurgelineCommands::Report {
            subjects,
            json,
            publish,
        } => {
            let subjects = read_subjects(&subjects)?;
            if subjects.is_empty() {
                bail!("No subject IDs given");
            }
            let generator = ReportGenerator::new(
                stores.index.clone(),
                stores.offsets.clone(),
                stores.storage.clone(),
                config.report.clone(),
            );
            let report = generator.generate(&subjects).await?;
            if publish {
                let published = generator.publish(&report).await?;
                log::info!(
                    "Report written to {} and {}",
                    published.text,
                    published.json
                );
            }
            if json {
                println!("{}", report.to_json()?);
            } else {
                print!("{}", render_text(&report));
            }
        }
        PurgelineCommands::Purge { report, dry_run } => {
            let report = load_report(stores.storage.as_ref(), &report).await?;
            config.purge.dry_run |= dry_run;

            let redaction = RedactionEngine::new(stores.storage.clone(), &config.redaction);
            let executor = PurgeExecutor::new(
                stores.storage,
                stores.index,
                stores.offsets,
                redaction,
                config.purge.clone(),
            );
            let result = executor.execute(&report).await;
            print_json(&result)?;

            let unfinished = result.unfinished_count();
            if unfinished > 0 {
                bail!(
                    "{unfinished} subject(s) still have locations to purge, {} location(s) failed",
                    result.failed_count()
                );
            }
        }
        PurgelineCommands::Common(_) => {}
    }

    Ok(())
}

fn read_input(input: &str) -> Result<Vec<u8>> {
    if input == "-" {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("Failed to read stdin")?;
        Ok(buf)
    } else {
        std::fs::read(Path::new(input)).with_context(|| format!("Failed to read {input}"))
    }
}

fn read_subjects(arg: &str) -> Result<Vec<SubjectId>> {
    let text = match arg.strip_prefix('@') {
        Some(path) => String::from_utf8(read_input(path)?).context("Subject file is not UTF-8")?,
        None if arg == "-" => String::from_utf8(read_input(arg)?).context("stdin is not UTF-8")?,
        None => arg.to_string(),
    };
    Ok(parse_subject_list(&text))
}

async fn load_report(storage: &dyn Storage, source: &str) -> Result<PurgeReport> {
    let bytes = if source.contains("://") {
        let object = ObjectRef::parse(source)?;
        read_all(storage, &object)
            .await
            .with_context(|| format!("Failed to read report {object}"))?
    } else {
        read_input(source)?
    };
    PurgeReport::from_json(&bytes).context("Invalid purge report")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{json}");
    Ok(())
}
