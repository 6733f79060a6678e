//! ClaimFlow CLI (`claimflow`)
//!
//! Runs the ingestion pipeline against a local data directory.
//!
//! ## Layout
//!
//! ```text
//! {data_dir}/blobs/{container}/{file}            source files
//! {data_dir}/blobs/{container}/{tenant}/{run}/   chunk files
//! {data_dir}/metadata.db                         runs, chunks, entities, checkpoints
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! # Ingest ./incoming/claims.csv for tenant "acme"
//! claimflow run --file claims.csv --tenant acme --source-dir ./incoming
//!
//! # Look at the result
//! claimflow summary --run-id 1
//! claimflow entity --id 6f1c2b6e-4a4b-4c8e-9a55-0d1f0f8e2a11
//! ```
//!
//! ## Configuration
//!
//! - `CLAIMFLOW_DATA_DIR`: Data directory (default: ./data)
//! - `CLAIMFLOW_*`: Pipeline settings, see `PipelineConfig`
//! - `RUST_LOG`: Log level (default: info)
//!
//! The stream transport lives in this process, so events are applied to the
//! entity actors before the command returns. `resume` re-publishes the chunks
//! that had not finished.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use claimflow_client::InMemoryTransport;
use claimflow_core::EntityId;
use claimflow_metadata::{MetadataStore, RunSummary, SqliteMetadataStore};
use claimflow_server::{CoordinatorError, Pipeline, PipelineConfig};
use object_store::local::LocalFileSystem;
use object_store::ObjectStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "claimflow")]
#[command(about = "Claims ingestion pipeline", long_about = None)]
struct Cli {
    /// Directory holding blob storage and the metadata database
    #[arg(long, env = "CLAIMFLOW_DATA_DIR", default_value = "./data", global = true)]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Schedule and execute a run, then apply its events
    Run {
        /// Source file name inside the storage container
        #[arg(long)]
        file: String,

        /// Tenant the run belongs to
        #[arg(long, default_value = "default")]
        tenant: String,

        /// Upload `file` from this local directory first
        #[arg(long)]
        source_dir: Option<PathBuf>,

        /// Print metrics after the run
        #[arg(long)]
        print_metrics: bool,
    },
    /// Resume an interrupted run
    Resume {
        #[arg(long)]
        run_id: i64,

        /// Print metrics after the run
        #[arg(long)]
        print_metrics: bool,
    },
    /// Print the summary of a run
    Summary {
        #[arg(long)]
        run_id: i64,
    },
    /// Print the state of an entity
    Entity {
        /// Entity (pet) identifier
        #[arg(long)]
        id: EntityId,
    },
    /// Print the metric registry
    Metrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    let log_level = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info".to_string())
        .parse()
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    claimflow_observability::init();

    let cli = Cli::parse();

    if let Commands::Metrics = cli.command {
        print!("{}", claimflow_observability::gather_text()?);
        return Ok(());
    }

    let config = PipelineConfig::from_env().context("Invalid CLAIMFLOW_* configuration")?;
    let pipeline = open_pipeline(&cli.data_dir, config).await?;

    match cli.command {
        Commands::Run {
            file,
            tenant,
            source_dir,
            print_metrics,
        } => {
            if let Some(dir) = source_dir {
                upload_source(&pipeline, &dir, &file).await?;
            }
            let run_id = pipeline.inner.schedule_run(&tenant, &file).await?;
            execute(&pipeline.inner, run_id).await?;
            if print_metrics {
                print!("{}", claimflow_observability::gather_text()?);
            }
        }
        Commands::Resume {
            run_id,
            print_metrics,
        } => {
            execute(&pipeline.inner, run_id).await?;
            if print_metrics {
                print!("{}", claimflow_observability::gather_text()?);
            }
        }
        Commands::Summary { run_id } => match pipeline.inner.run_summary(run_id).await? {
            Some(summary) => print_json(&summary)?,
            None => {
                let state = pipeline
                    .inner
                    .run(run_id)
                    .await?
                    .map(|r| r.state.to_string())
                    .unwrap_or_default();
                println!("Run {} is still in progress ({})", run_id, state);
            }
        },
        Commands::Entity { id } => match pipeline.inner.entity_state(id).await? {
            Some(state) => print_json(&state)?,
            None => println!("Entity {} not found", id),
        },
        Commands::Metrics => {}
    }

    Ok(())
}

struct LocalPipeline {
    inner: Pipeline,
    object_store: Arc<dyn ObjectStore>,
}

async fn open_pipeline(data_dir: &Path, config: PipelineConfig) -> Result<LocalPipeline> {
    let blob_dir = data_dir.join("blobs");
    std::fs::create_dir_all(&blob_dir)
        .with_context(|| format!("Failed to create {}", blob_dir.display()))?;

    let object_store: Arc<dyn ObjectStore> = Arc::new(
        LocalFileSystem::new_with_prefix(&blob_dir)
            .with_context(|| format!("Failed to open blob storage at {}", blob_dir.display()))?,
    );

    let db_path = data_dir.join("metadata.db");
    let metadata: Arc<dyn MetadataStore> = Arc::new(
        SqliteMetadataStore::new(&db_path)
            .await
            .with_context(|| format!("Failed to open metadata store at {}", db_path.display()))?,
    );

    info!(
        data_dir = %data_dir.display(),
        partitions = config.partition_count,
        max_rows_per_chunk = config.storage.max_rows_per_chunk,
        "Pipeline configured"
    );

    let transport = Arc::new(InMemoryTransport::new(config.partition_count));
    let inner = Pipeline::new(config, object_store.clone(), metadata, transport)?;

    Ok(LocalPipeline {
        inner,
        object_store,
    })
}

/// Execute a run with Ctrl-C as the cancel signal, then apply its events.
async fn execute(pipeline: &Pipeline, run_id: i64) -> Result<()> {
    let (cancel_tx, cancel) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Cancelling run, waiting for chunks in flight");
            let _ = cancel_tx.send(true);
        }
    });

    let summary: RunSummary = match pipeline.execute_run(run_id, cancel).await {
        Ok(summary) => summary,
        Err(CoordinatorError::Cancelled { run_id }) => {
            pipeline.drain_consumers().await?;
            anyhow::bail!(
                "Run {} cancelled; continue with `claimflow resume --run-id {}`",
                run_id,
                run_id
            );
        }
        Err(e) => return Err(e.into()),
    };

    let applied = pipeline.drain_consumers().await?;
    info!(run_id, events_applied = applied, "Consumers caught up");

    print_json(&summary)?;
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Copy a local file into the storage container.
async fn upload_source(pipeline: &LocalPipeline, dir: &Path, file: &str) -> Result<()> {
    let local = dir.join(file);
    let data = tokio::fs::read(&local)
        .await
        .with_context(|| format!("Failed to read {}", local.display()))?;

    let path = pipeline.inner.config().storage.source_path(file);
    pipeline
        .object_store
        .put(&path, data.into())
        .await
        .with_context(|| format!("Failed to upload {}", path))?;

    info!(source = %local.display(), path = %path, "Source uploaded");
    Ok(())
}
