//! Graph Loader - Loads economic-indicator files into Neo4j
//!
//! Every file in FOLDER_PATH is normalized, attached to the sector hierarchy
//! its name encodes, and merged in one transaction. Re-running over the same
//! files leaves the graph unchanged.
//!
//! Exit codes: 0 all files loaded, 1 a file failed, 2 fatal (config/store).

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use graph_loader::config::Config;
use graph_loader::orchestrator::{self, RunSummary};
use graph_loader::store::{MemoryStore, Neo4jStore};

#[derive(Parser, Debug)]
#[command(name = "graph-loader", about = "Loads economic-indicator files into a property graph")]
struct Args {
    /// JSON config with NEO4J_URI, NEO4J_USERNAME, NEO4J_PASSWORD and FOLDER_PATH
    config: PathBuf,

    /// Dry run - load into an in-memory graph, nothing is written to Neo4j
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Files processed in parallel (overrides MAX_CONCURRENT_FILES)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Write the run summary as JSON to this path
    #[arg(long)]
    summary_out: Option<PathBuf>,
}

async fn load(args: &Args) -> Result<RunSummary> {
    let config = Config::load(&args.config)?;
    let concurrency = args
        .concurrency
        .unwrap_or(config.max_concurrent_files)
        .max(1);
    let inputs = orchestrator::discover_inputs(&config.folder_path)?;

    println!("=== Graph Loader ===");
    println!("Folder: {}", config.folder_path.display());
    println!("Files: {}", inputs.len());
    println!("Mode: {}", if args.dry_run { "dry-run" } else { "live" });

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, finishing in-flight files");
                cancel.store(true, Ordering::SeqCst);
            }
        });
    }

    let summary = if args.dry_run {
        let store = MemoryStore::new();
        let summary = orchestrator::run(&store, &inputs, concurrency, &cancel).await;
        println!(
            "\nDry run - graph would hold {} nodes and {} edges",
            store.node_count(),
            store.edge_count()
        );
        summary
    } else {
        let neo4j = config.neo4j()?;
        let store = Neo4jStore::connect(&neo4j.uri, &neo4j.username, &neo4j.password, concurrency)
            .await
            .with_context(|| format!("Failed to connect to Neo4j at {}", neo4j.uri))?;
        store
            .ensure_constraints()
            .await
            .context("Failed to create key constraints")?;
        info!(uri = %neo4j.uri, "Connected to Neo4j");
        orchestrator::run(&store, &inputs, concurrency, &cancel).await
    };

    summary.print();

    if let Some(path) = &args.summary_out {
        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write summary to {}", path.display()))?;
        println!("Summary written to {}", path.display());
    }

    Ok(summary)
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("graph_loader=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    match load(&args).await {
        Ok(summary) if summary.is_success() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(1),
        Err(e) => {
            eprintln!("Fatal: {:#}", e);
            ExitCode::from(2)
        }
    }
}
