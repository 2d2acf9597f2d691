use clap::{Parser, Subcommand};
use dataship::catalog::Catalog;
use dataship::config::Config;
use dataship::logging;
use dataship::pipeline::ExportPipeline;
use dataship::resolver::{HttpRemoteSource, QueryResolver};
use dataship::storage::FsBlobStore;
use dataship::warehouse::FileWarehouse;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "dataship")]
#[command(about = "Warehouse result export pipeline")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export catalog queries to compressed artifacts in blob storage
    Export {
        /// Specific queries to export (comma-separated). Selecting a subset
        /// suppresses the shared bundle.
        #[arg(long)]
        queries: Option<String>,
        /// Maximum number of exports in flight at once
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// List the catalog entries available to export
    Catalog,
}

/// Splits a comma-separated `--queries` value into a selection. Blank
/// segments are dropped; a selection with no names at all means a full run,
/// not an empty one.
fn parse_query_selection(arg: Option<&str>) -> Option<Vec<String>> {
    let names: Vec<String> = arg?
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if names.is_empty() {
        None
    } else {
        Some(names)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    logging::init_logging();

    let cli = Cli::parse();
    let config = Config::load().unwrap_or_else(|e| {
        warn!("Falling back to default configuration: {}", e);
        Config::default()
    });
    let catalog = Catalog::builtin();

    match cli.command {
        Commands::Catalog => {
            for query in catalog.queries() {
                println!(
                    "{:<24} {:<9} {}",
                    query.name,
                    query.file_name().rsplit('.').nth(1).unwrap_or("?"),
                    query.description.as_deref().unwrap_or("")
                );
            }
        }
        Commands::Export {
            queries,
            concurrency,
        } => {
            let selected = parse_query_selection(queries.as_deref());
            let concurrency = concurrency.unwrap_or(config.export.parallel);

            let warehouse = Arc::new(FileWarehouse::new(&config.storage.warehouse_dir));
            let resolver = Arc::new(QueryResolver::new(Arc::new(HttpRemoteSource::new(
                &config.remote_source.base_url,
            ))));
            let store = Arc::new(FsBlobStore::new(&config.storage.root));
            let pipeline = ExportPipeline::new(
                catalog,
                warehouse,
                resolver,
                store,
                &config.export.bundle_name,
            );

            // Ctrl-C aborts pending exports and drains in-flight ones
            let (cancel_tx, cancel_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Cancellation requested, aborting remaining exports");
                    let _ = cancel_tx.send(true);
                }
            });

            info!("Starting export run");
            let report = pipeline
                .run(selected.as_deref(), concurrency, cancel_rx)
                .await?;

            println!("\n📦 Export results:");
            for result in &report.results {
                println!("   ✅ {}", result.file_name);
            }
            for failure in &report.failures {
                println!("   ❌ {}: {}", failure.query, failure.error);
            }
            if let Some(url) = &report.bundle_url {
                println!("   🗜️  bundle: {url}");
            }
            if let Some(e) = &report.bundle_error {
                println!("   ❌ bundle: {e}");
            }

            if !report.all_succeeded() {
                error!("Export run finished with failures");
                std::process::exit(1);
            }
        }
    }
    Ok(())
}
