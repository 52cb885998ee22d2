//! `bqem` command line tool.
//!
//! Runs a managed BigQuery emulator until interrupted, or refreshes the schema cache from
//! production so that test runs can resolve schemas offline.

use std::path::PathBuf;

use anyhow::{Context, bail};
use bqem::client::{BigQueryRestClient, DatabaseClient, TableRef};
use bqem::manager::Manager;
use bqem::schema::SchemaStore;
use clap::{Parser, Subcommand};
use config::load_config;
use config::shared::ManagerConfig;
use telemetry::init_tracing;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "bqem", author, version, about, long_about = None)]
struct Args {
    /// Emit debug logs, and run the emulator with debug logging.
    #[arg(long, global = true)]
    debug: bool,

    /// Schema cache file, overriding the configured `schema_path`.
    #[arg(long, global = true)]
    schema_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Launch an emulator and keep it running until Ctrl-C is pressed.
    Run(RunArgs),
    /// Fetch table schemas from production and write them to the schema cache.
    FetchSchema {
        /// Tables to fetch, as `project.dataset.table`.
        #[arg(required = true)]
        tables: Vec<String>,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Project id served by the emulator.
    #[arg(long)]
    project: Option<String>,

    /// First data port to try.
    #[arg(long)]
    port: Option<u16>,

    /// First gRPC port to try.
    #[arg(long)]
    grpc_port: Option<u16>,
}

impl RunArgs {
    fn apply(self, config: &mut ManagerConfig) {
        if let Some(project) = self.project {
            config.project = project;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(grpc_port) = self.grpc_port {
            config.grpc_port = grpc_port;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing(env!("CARGO_BIN_NAME"), args.debug)?;

    let mut config: ManagerConfig = load_config().context("loading configuration failed")?;
    config.debug_mode |= args.debug;
    if let Some(schema_path) = args.schema_path {
        config.schema_path = Some(schema_path);
    }

    match args.command {
        Command::Run(run_args) => {
            run_args.apply(&mut config);
            run_emulator(config).await
        }
        Command::FetchSchema { tables } => fetch_schemas(config, &tables).await,
    }
}

async fn run_emulator(config: ManagerConfig) -> anyhow::Result<()> {
    bqem::with_manager(config, async |manager: &mut Manager| {
        match manager.ports() {
            Some(ports) => info!(
                project_id = manager.project_id(),
                data_port = ports.data_port,
                grpc_port = ports.control_port,
                "emulator running, press Ctrl-C to stop"
            ),
            None => info!(
                project_id = manager.project_id(),
                "using an external emulator, press Ctrl-C to stop"
            ),
        }

        tokio::signal::ctrl_c().await?;
        info!("interrupt received, shutting down");

        Ok(())
    })
    .await?;

    Ok(())
}

/// Fetches every table from the remote source, replacing cached schemas, and writes the cache.
async fn fetch_schemas(config: ManagerConfig, tables: &[String]) -> anyhow::Result<()> {
    if !config.remote.enabled {
        bail!("the remote schema source is disabled (`remote.enabled` is false)");
    }
    if config.schema_path.is_none() {
        bail!("no schema cache file is configured (`schema_path`)");
    }

    let tables = tables
        .iter()
        .map(|path| path.parse::<TableRef>())
        .collect::<Result<Vec<_>, _>>()?;

    let remote = BigQueryRestClient::new(config.remote.endpoint, config.remote.access_token)?;
    let mut store = SchemaStore::load(config.schema_path)?;

    for table in &tables {
        let fetched = remote
            .get_table(table)
            .await
            .with_context(|| format!("fetching the schema of {table} failed"))?;

        let merged = store.merge(
            &table.project_id,
            &table.dataset_id,
            &table.table_id,
            fetched.schema,
        );
        if merged {
            info!(%table, "schema fetched");
        } else {
            warn!(%table, "remote table has no columns, skipping");
        }
    }

    if store.flush()? {
        info!(path = ?store.path(), tables = tables.len(), "schema cache written");
    } else {
        info!("no schemas fetched, schema cache left unchanged");
    }

    Ok(())
}
