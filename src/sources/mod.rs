// src/sources/mod.rs
pub mod jsonl;

use anyhow::Result;
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::ConfigSnapshot;
use crate::item::Item;
use crate::pipeline::{NotificationPipeline, Outcome};

pub use jsonl::JsonLinesSource;

/// Exchanges that can be switched on through `base.exchange`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Exchange {
    Okex,
    Binance,
    Bybit,
    Kucoin,
    Gate,
}

impl Exchange {
    pub const ALL: [Exchange; 5] = [
        Exchange::Okex,
        Exchange::Binance,
        Exchange::Bybit,
        Exchange::Kucoin,
        Exchange::Gate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::Okex => "OKEX",
            Exchange::Binance => "BINANCE",
            Exchange::Bybit => "BYBIT",
            Exchange::Kucoin => "KUCOIN",
            Exchange::Gate => "GATE",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Exchange {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        Exchange::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow::anyhow!("unknown exchange `{s}`"))
    }
}

/// Exchanges listed in `base.exchange`; unknown names are logged and skipped.
pub fn enabled_exchanges(snapshot: &ConfigSnapshot) -> Vec<Exchange> {
    let mut out = Vec::new();
    for name in snapshot.get_list("base", "exchange", &[]) {
        match name.parse::<Exchange>() {
            Ok(e) if !out.contains(&e) => out.push(e),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "ignoring entry in base.exchange"),
        }
    }
    out
}

/// One monitored page (or a feed of several), producing items in page order.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &str;
    /// Exchanges this adapter yields items for.
    fn exchanges(&self) -> Vec<Exchange>;
    /// Latest items, restricted to `enabled` exchanges.
    async fn fetch_latest(&self, enabled: &[Exchange]) -> Result<Vec<Item>>;
}

/// Per-run tally of outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub sent: usize,
    pub skipped_stale: usize,
    pub skipped_already_sent: usize,
    pub failed_transient: usize,
    /// Submissions aborted by a ledger error.
    pub errors: usize,
    pub source_errors: usize,
}

impl RunSummary {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Sent => self.sent += 1,
            Outcome::SkippedStale => self.skipped_stale += 1,
            Outcome::SkippedAlreadySent => self.skipped_already_sent += 1,
            Outcome::FailedTransient { .. } => self.failed_transient += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.sent + self.skipped_stale + self.skipped_already_sent + self.failed_transient + self.errors
    }
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "announce_source_errors_total",
            "Source adapter fetch/parse errors."
        );
    });
}

/// Poll every adapter serving an enabled exchange once and submit what it
/// returns. Adapter errors and per-item ledger errors are logged and counted;
/// they never stop the rest of the run.
pub async fn run_once(adapters: &[Box<dyn SourceAdapter>], pipeline: &NotificationPipeline) -> RunSummary {
    ensure_metrics_described();

    // Re-read config so a changed exchange list applies to this run.
    pipeline.config().refresh_if_changed();
    let enabled = enabled_exchanges(&pipeline.config().snapshot());
    if enabled.is_empty() {
        tracing::warn!("base.exchange enables no known exchange; nothing to poll");
    }

    let mut summary = RunSummary::default();
    for adapter in adapters {
        let wanted: Vec<Exchange> = adapter
            .exchanges()
            .into_iter()
            .filter(|e| enabled.contains(e))
            .collect();
        if wanted.is_empty() {
            tracing::debug!(source = adapter.name(), "no enabled exchange, skipping");
            continue;
        }

        let items = match adapter.fetch_latest(&wanted).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = ?e, source = adapter.name(), "source error");
                counter!("announce_source_errors_total").increment(1);
                summary.source_errors += 1;
                continue;
            }
        };

        for item in &items {
            match pipeline.submit(item).await {
                Ok(outcome) => summary.record(&outcome),
                Err(e) => {
                    tracing::error!(
                        origin = %item.origin,
                        title = %item.title,
                        error = %format!("{e:#}"),
                        "submission aborted, delivery state not recorded"
                    );
                    summary.errors += 1;
                }
            }
        }
    }

    tracing::info!(
        sent = summary.sent,
        stale = summary.skipped_stale,
        already_sent = summary.skipped_already_sent,
        failed = summary.failed_transient,
        errors = summary.errors,
        source_errors = summary.source_errors,
        "run finished"
    );
    summary
}
