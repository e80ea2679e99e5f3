//! Announcement forwarder: binary entrypoint.
//!
//! One run per invocation (drive it from cron): read scraper output, forward
//! every item not yet delivered, record deliveries, exit.
//!
//! Usage: `announce-forwarder [ITEMS.jsonl ...]` (reads stdin when no file is given).

use anyhow::{Context, Result};
use chrono::{Days, Local};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use announce_forwarder::ledger::retention_days_from_env;
use announce_forwarder::sources::SourceAdapter;
use announce_forwarder::telemetry::{self, DEFAULT_LOG_DIR, ENV_LOG_DIR};
use announce_forwarder::{
    run_once, ConfigStore, DeliveryLedger, JsonLinesSource, NotificationPipeline, WebhookTransport,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();

    let log_dir = std::env::var(ENV_LOG_DIR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOG_DIR));
    let _log_guard = telemetry::init(&log_dir)?;

    // Startup failures are fatal: without config or ledger nothing is safe to send.
    let config = ConfigStore::open_default().context("loading config")?;
    let ledger = Arc::new(DeliveryLedger::open_default().context("opening delivery ledger")?);

    if let Some(days) = retention_days_from_env() {
        let cutoff = Local::now().date_naive().checked_sub_days(Days::new(days));
        if let Some(cutoff) = cutoff {
            ledger
                .prune_delivered_before(cutoff)
                .context("pruning delivery ledger")?;
        }
    }

    let transport = Arc::new(WebhookTransport::new());
    let pipeline = NotificationPipeline::new(config, ledger, transport);

    let adapters = build_adapters()?;
    let summary = run_once(&adapters, &pipeline).await;
    tracing::info!(total = summary.total(), "done");
    Ok(())
}

fn build_adapters() -> Result<Vec<Box<dyn SourceAdapter>>> {
    let paths: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    if !paths.is_empty() {
        return Ok(paths
            .into_iter()
            .map(|p| Box::new(JsonLinesSource::from_path(p)) as Box<dyn SourceAdapter>)
            .collect());
    }

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("reading items from stdin")?;
    Ok(vec![Box::new(JsonLinesSource::from_text("stdin", input))])
}
