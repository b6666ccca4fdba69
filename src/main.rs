use anyhow::{Context, Result};
use std::sync::Arc;

use map_price_monitor::api::ShoppingSearchClient;
use map_price_monitor::core::server::{self, AppState};
use map_price_monitor::core::{logging, Config, HealthChecker, ScanMetrics};
use map_price_monitor::monitoring::{MonitorDatabase, ViolationReporter, WebhookNotifier};
use map_price_monitor::scanner::{ListingFetcher, ScanContext, ScanScheduler};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    logging::init_logging(&config.server.log_level);

    tracing::info!("🚀 MAP price monitor starting...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Watching {} products, {} webhook sinks, interval {}",
        config.products.len(),
        config.notifications.webhooks.len(),
        config.scan.interval
    );

    let health = HealthChecker::new();
    let metrics = Arc::new(ScanMetrics::new().context("Failed to register metrics")?);

    let database = MonitorDatabase::open(&config.database.path)
        .await
        .with_context(|| format!("Failed to open database at {}", config.database.path))?;
    health.update_component("database", true).await;

    let context = ScanContext::new(database.scan_store(), database.vendor_ledger());
    let reporter = Arc::new(ViolationReporter::new(
        database.scan_store(),
        database.vendor_ledger(),
    ));

    if config.source.client_id.is_none() {
        tracing::warn!("⚠️  No search API credentials configured; requests may be rejected");
    }
    let source = Arc::new(ShoppingSearchClient::new(config.source.clone()));
    let fetcher = ListingFetcher::new(source, config.scan.fetch_settings());
    let notifier = WebhookNotifier::new(config.notifications.timeout())
        .context("Failed to build webhook client")?;

    let scheduler = Arc::new(ScanScheduler::new(
        config.scan_plan(),
        fetcher,
        context,
        notifier,
        metrics.clone(),
        health.clone(),
    ));

    let monitoring = scheduler.start();

    let state = AppState {
        scheduler: scheduler.clone(),
        reporter: reporter.clone(),
        health,
        metrics,
    };
    let port = config.server.port;
    tokio::spawn(async move { server::serve(state, port).await });
    tracing::info!("✅ HTTP endpoint running on port {}", port);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    tracing::info!("Shutdown requested");
    scheduler.stop();
    if let Some(handle) = monitoring {
        if let Err(e) = handle.await {
            tracing::warn!("Monitoring loop ended abnormally: {}", e);
        }
    }

    match reporter.generate_summary().await {
        Ok(summary) => tracing::info!("{}", reporter.format_summary(&summary)),
        Err(e) => tracing::warn!("Could not build final summary: {}", e),
    }

    database.close().await;
    Ok(())
}
