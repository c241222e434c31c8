mod ai;
mod app;
mod config;
mod db;
mod delivery;
mod error;
mod feed;
mod models;
mod scheduler;
mod telegram;

use app::App;
use config::Config;
use error::Result;

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG overrides the default info level
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let mode = args.get(1).map(String::as_str);

    // Load configuration
    let config = Config::load()?;

    // Check for --stats flag (no credentials needed)
    if mode == Some("--stats") {
        return app::print_stats(&config).await;
    }

    let app = App::new(&config).await?;

    // Check for --once flag (single headless cycle)
    if mode == Some("--once") {
        let report = app.run_once().await?;
        println!(
            "Received {} items: {} sent, {} rejected, {} duplicates, {} not scored",
            report.received,
            report.broadcasts.len(),
            report.rejected,
            report.duplicates,
            report.scoring_skipped
        );
        for broadcast in &report.broadcasts {
            println!(
                "  {} delivered to {} subscribers ({} failed)",
                broadcast.fingerprint,
                broadcast.delivered(),
                broadcast.failures()
            );
        }
        if report.lost_claims > 0 {
            println!("  {} items were claimed by another cycle", report.lost_claims);
        }
        for fingerprint in &report.undelivered {
            println!("  {} was claimed but could not be delivered", fingerprint);
        }
        if let Some(reason) = &report.aborted {
            println!("Cycle stopped early after {} claims: {}", report.claimed, reason);
        }
        return Ok(());
    }

    tracing::info!(
        sources = config.sources.len(),
        interval = ?config.polling_interval(),
        "starting AI news alert service"
    );
    app.run_service().await
}
