//! ecom-elt: run the daily e-commerce ELT DAG.
//!
//! ```bash
//! # Run for yesterday (UTC)
//! ecom-elt run
//!
//! # Re-run a given logical date
//! ecom-elt run --date 2026-10-15
//!
//! # Show the tasks and what they will touch
//! ecom-elt plan --date 2026-10-15
//!
//! # Print the SQL a task submits
//! ecom-elt sql build_features
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use ecom_elt::config::EltConfig;
use ecom_elt::dags::{plan, EcomEltDaily};
use ecom_elt::events::LoggingEventSink;
use ecom_elt::storage::LocalObjectStore;
use ecom_elt::telemetry::{init_tracing, TracingConfig};
use ecom_elt::warehouse::DuckDbWarehouse;

#[derive(Parser)]
#[command(name = "ecom-elt")]
#[command(version)]
#[command(about = "Daily e-commerce ELT: stage the raw file, load it, build staging, fact and feature tables")]
struct Cli {
    /// TOML configuration file (defaults to config/ecom_elt.toml when present)
    #[arg(short, long, global = true, env = "ECOM_ELT_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON (also enabled by LOG_JSON=1)
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute the DAG for one logical date
    Run {
        /// Logical date (YYYY-MM-DD); defaults to yesterday in UTC
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Print tasks in execution order with their rendered targets
    Plan {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Print the rendered SQL of a query task
    Sql {
        /// build_stg, build_fact_orders or build_features
        task: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let tracing_config = TracingConfig::from_env();
    let json = tracing_config.json || cli.log_json;
    init_tracing(&tracing_config.with_json(json));

    match dispatch(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> Result<bool> {
    let config = EltConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let dag = EcomEltDaily::new(config).context("Invalid configuration")?;
    let date_or_latest = |date: Option<NaiveDate>| {
        date.unwrap_or_else(|| dag.definition().latest_logical_date(Utc::now()))
    };

    match cli.command {
        Commands::Run { date } => run(&dag, date_or_latest(date)).await,
        Commands::Plan { date } => {
            let store = Arc::new(LocalObjectStore::at(&dag.config().storage.root));
            let warehouse = Arc::new(DuckDbWarehouse::open_in_memory()?);
            let graph = dag.build(store, warehouse)?;
            let mut out = plan(&graph, &dag.template_vars(date_or_latest(date)));
            out["definition"] = serde_json::to_value(dag.definition())?;
            println!("{}", serde_json::to_string_pretty(&out)?);
            Ok(true)
        }
        Commands::Sql { task, date } => {
            println!("{}", dag.rendered_task_sql(&task, date_or_latest(date))?);
            Ok(true)
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(dag.config())?);
            Ok(true)
        }
    }
}

async fn run(dag: &EcomEltDaily, date: NaiveDate) -> Result<bool> {
    let config = dag.config();
    info!(
        dag_id = %dag.definition().dag_id,
        logical_date = %date,
        version = env!("CARGO_PKG_VERSION"),
        "Starting run"
    );

    let store = Arc::new(
        LocalObjectStore::new(&config.storage.root)
            .await
            .with_context(|| {
                format!("Failed to open object store at {}", config.storage.root.display())
            })?,
    );
    let warehouse = Arc::new(
        DuckDbWarehouse::open(&config.warehouse.path)
            .with_context(|| format!("Failed to open warehouse at {}", config.warehouse.path))?,
    );

    let graph = dag.build(store, warehouse)?;
    let ctx = Arc::new(dag.context(date, Arc::new(LoggingEventSink::new(tracing::Level::INFO))));

    let interrupt = {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after the running task");
                ctx.mark_cancelled_with_reason("interrupted");
            }
        })
    };

    let result = graph.execute(ctx).await;
    interrupt.abort();
    let result = result?;

    println!("{}", serde_json::to_string_pretty(&result.summary())?);
    if !result.success {
        warn!(error = result.error.as_deref().unwrap_or("unknown"), "Run failed");
    }
    Ok(result.success)
}
