use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use bidscout_common::{CrawlConfig, LogStore, MemoryAuditSink, ScrapingResult};
use bidscout_scout::{sources, Orchestrator};

#[derive(Parser)]
#[command(name = "bidscout", about = "Texas procurement portal scout")]
struct Cli {
    /// Maximum records to pull per portal.
    #[arg(long, default_value_t = 100)]
    limit: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll every portal in the catalog concurrently.
    RunAll,
    /// Poll a single portal by key.
    RunPortal { name: String },
    /// List the portals in the catalog.
    Portals,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("bidscout=info".parse()?))
        .init();

    let cli = Cli::parse();

    if let Command::Portals = cli.command {
        for portal in sources::all_portals() {
            println!("{:<14} {}", portal.name, portal.search_url);
        }
        return Ok(());
    }

    info!("Bidscout Scout starting...");

    let config = CrawlConfig::from_env();
    config.log_redacted();

    let store = Arc::new(LogStore);
    let audit = Arc::new(MemoryAuditSink::new());
    let orchestrator =
        Orchestrator::with_standard_portals(&config, sources::all_portals(), store, audit.clone())
            .await;

    orchestrator.on_progress(Box::new(|progress| {
        info!(
            portal = progress.portal.as_str(),
            status = %progress.status,
            percent = progress.percent_complete,
            records = progress.records_found,
            "{}",
            progress.message
        );
    }));

    let results = match cli.command {
        Command::RunAll => orchestrator.run_all(cli.limit).await,
        Command::RunPortal { name } => vec![orchestrator.run_portal(&name, cli.limit).await],
        Command::Portals => unreachable!(),
    };

    print_summary(&results);

    let attempts = audit.attempts();
    let failed = attempts.iter().filter(|a| !a.succeeded).count();
    println!("\n{} fetch attempts ({failed} failed)", attempts.len());

    if results.iter().all(|r| !r.success) {
        anyhow::bail!("every portal run failed");
    }
    Ok(())
}

fn print_summary(results: &[ScrapingResult]) {
    println!("\n{:<14} {:>8} {:>10}  {:<14} {}", "portal", "records", "ms", "strategy", "outcome");
    for result in results {
        let outcome = if result.success {
            "ok".to_string()
        } else {
            result
                .error_message
                .clone()
                .unwrap_or_else(|| "failed".to_string())
        };
        println!(
            "{:<14} {:>8} {:>10}  {:<14} {}",
            result.portal,
            result.record_count,
            result.duration_ms,
            result.strategy_used.as_deref().unwrap_or("-"),
            outcome
        );
    }
}
