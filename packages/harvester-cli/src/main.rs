//! Operator CLI for the document harvester.
//!
//! Wraps the trigger interface (run, run-all, purge), upload ingestion and
//! read-only catalog listings around a SQLite catalog and a filesystem
//! content store.

mod config;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use harvester::{
    next_eligible, AdapterRegistry, Cadence, DocumentCatalog, DocumentFilter, DocumentKind,
    DocumentStatus, Dispatcher, FsContentStore, HttpFetcher, NewSource, RunController, RunFilter,
    RunLog, RunSummary, Source, SourceCatalog, SourceFilter, SourceKind, SourceStatus,
    SqliteCatalog, Upload,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "harvest")]
#[command(about = "Harvest government documents and audit every run")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a source, or update the one with the same name
    AddSource {
        name: String,
        origin: String,
        #[arg(long, default_value = "gazette")]
        adapter: String,
        #[arg(long, default_value = "web")]
        kind: SourceKind,
        #[arg(long, default_value = "daily")]
        cadence: String,
        #[arg(long, default_value = "")]
        description: String,
    },

    /// List sources
    Sources {
        /// Include inactive sources
        #[arg(long)]
        all: bool,
    },

    /// Change a source's active flag and status
    SetState {
        name: String,
        #[arg(long)]
        active: bool,
        #[arg(long, default_value = "active")]
        status: SourceStatus,
    },

    /// Delete a source with its documents and runs
    DeleteSource { name: String },

    /// Harvest one source now
    Run { name: String },

    /// Harvest every eligible source
    RunAll,

    /// Delete runs older than the given age
    Purge {
        #[arg(long, default_value_t = 90)]
        days: u32,
    },

    /// List recent runs
    Runs {
        #[arg(long)]
        source: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// List catalogued documents
    Documents {
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        status: Option<DocumentStatus>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Ingest a local file into a source's catalog
    Ingest {
        source: String,
        file: PathBuf,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        external_id: Option<String>,
        #[arg(long)]
        kind: Option<DocumentKind>,
    },

    /// Print when a cadence next allows a run
    NextEligible {
        cadence: String,
        /// RFC 3339 timestamp, defaults to now
        #[arg(long)]
        from: Option<DateTime<Utc>>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,harvester=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Needs no catalog
    if let Commands::NextEligible { cadence, from } = &cli.command {
        let from = (*from).unwrap_or_else(Utc::now);
        println!(
            "{} ({})",
            next_eligible(cadence, from).to_rfc3339(),
            Cadence::from_label(cadence)
        );
        return Ok(());
    }

    let config = Config::from_env().context("Failed to load configuration")?;
    let catalog = Arc::new(
        SqliteCatalog::new(&config.database_url)
            .await
            .with_context(|| format!("Failed to open catalog at {}", config.database_url))?,
    );
    let content = Arc::new(FsContentStore::new(&config.content_root));

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current document");
            signal.cancel();
        }
    });

    let controller = RunController::new(
        catalog.clone(),
        content,
        AdapterRegistry::with_defaults(),
        Arc::new(HttpFetcher::new()),
    )
    .with_config(config.harvest.clone());
    let dispatcher = Dispatcher::new(controller).with_shutdown(shutdown);

    match cli.command {
        Commands::AddSource {
            name,
            origin,
            adapter,
            kind,
            cadence,
            description,
        } => {
            let new = NewSource::new(name, origin, adapter)
                .with_kind(kind)
                .with_cadence(cadence)
                .with_description(description);
            let source = catalog.upsert_source(&new, Utc::now()).await?;
            println!("{} {} ({})", "saved".green(), source.name, source.id);
        }
        Commands::Sources { all } => {
            let filter = SourceFilter {
                active: (!all).then_some(true),
                ..Default::default()
            };
            for source in catalog.list_sources(&filter).await? {
                print_source(&source);
            }
        }
        Commands::SetState {
            name,
            active,
            status,
        } => {
            let source = find_source(&dispatcher, &name).await?;
            let source = catalog
                .set_source_state(source.id, active, status, Utc::now())
                .await?;
            print_source(&source);
        }
        Commands::DeleteSource { name } => {
            let source = find_source(&dispatcher, &name).await?;
            catalog.delete_source(source.id).await?;
            println!("{} {}", "deleted".red(), source.name);
        }
        Commands::Run { name } => {
            let summary = dispatcher.run_source_by_name(&name).await?;
            print_summary(&summary);
            if !summary.success {
                bail!("run of {name} did not succeed");
            }
        }
        Commands::RunAll => {
            let batch = dispatcher.start_all_eligible_runs().await;
            if let Some(error) = batch.error {
                bail!("failed to list eligible sources: {error}");
            }
            for summary in &batch.details {
                print_summary(summary);
            }
            println!(
                "{} eligible, {} executed, {} succeeded, {} failed",
                batch.total, batch.executed, batch.succeeded, batch.failed
            );
            if batch.failed > 0 {
                bail!("{} source(s) failed", batch.failed);
            }
        }
        Commands::Purge { days } => {
            let summary = dispatcher.purge_old_runs(days).await;
            if let Some(error) = summary.error {
                bail!("purge failed: {error}");
            }
            println!(
                "purged {} run(s) started before {}",
                summary.deleted,
                summary.cutoff.to_rfc3339()
            );
        }
        Commands::Runs { source, limit } => {
            let mut filter = RunFilter {
                limit: Some(limit),
                ..Default::default()
            };
            if let Some(name) = source {
                filter.source_id = Some(find_source(&dispatcher, &name).await?.id);
            }
            for run in catalog.list_runs(&filter).await? {
                println!(
                    "{} {} {:<9} new={} updated={} unchanged={} failed={} {}",
                    run.id,
                    run.started_at.format("%Y-%m-%d %H:%M:%S"),
                    run.status.to_string(),
                    run.counts.new,
                    run.counts.updated,
                    run.counts.unchanged,
                    run.counts.failed,
                    run.message
                );
            }
        }
        Commands::Documents {
            source,
            status,
            limit,
        } => {
            let mut filter = DocumentFilter {
                status,
                limit: Some(limit),
                ..Default::default()
            };
            if let Some(name) = source {
                filter.source_id = Some(find_source(&dispatcher, &name).await?.id);
            }
            for doc in catalog.list_documents(&filter).await? {
                println!(
                    "{} v{} {} {} {}",
                    doc.external_id,
                    doc.version,
                    &doc.fingerprint[..doc.fingerprint.len().min(12)],
                    doc.storage_path,
                    doc.title
                );
            }
        }
        Commands::Ingest {
            source,
            file,
            title,
            external_id,
            kind,
        } => {
            let source = find_source(&dispatcher, &source).await?;
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let file_name = file
                .file_name()
                .and_then(|n| n.to_str())
                .context("file name is not valid UTF-8")?;

            let mut upload = Upload::new(file_name, bytes);
            if let Some(title) = title {
                upload = upload.with_title(title);
            }
            if let Some(id) = external_id {
                upload = upload.with_external_id(id);
            }
            if let Some(kind) = kind {
                upload = upload.with_kind(kind);
            }

            let decision = dispatcher
                .controller()
                .reconciler()
                .ingest_upload(&source, upload)
                .await;
            match decision.record() {
                Some(record) => println!(
                    "{} {} v{} {}",
                    decision.label().green(),
                    record.external_id,
                    record.version,
                    record.storage_path
                ),
                None => bail!("ingest failed: {decision:?}"),
            }
        }
        Commands::NextEligible { .. } => {}
    }

    Ok(())
}

async fn find_source(dispatcher: &Dispatcher, name: &str) -> Result<Source> {
    dispatcher
        .controller()
        .catalog()
        .get_source_by_name(name)
        .await?
        .with_context(|| format!("source not found: {name}"))
}

fn print_source(source: &Source) {
    let state = if source.active {
        source.status.to_string().green()
    } else {
        source.status.to_string().yellow()
    };
    let next = source
        .next_eligible_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "now".to_string());
    println!(
        "{} [{}] adapter={} cadence={} next={} {}",
        source.name, state, source.adapter, source.cadence, next, source.origin
    );
}

fn print_summary(summary: &RunSummary) {
    let name = summary
        .source_name
        .clone()
        .unwrap_or_else(|| summary.source_id.to_string());
    let marker = if summary.success {
        "ok".green()
    } else {
        "failed".red()
    };
    println!(
        "{} {} (attempts: {}) {}",
        marker, name, summary.attempts, summary.message
    );
}
