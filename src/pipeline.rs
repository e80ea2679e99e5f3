// src/pipeline.rs
//! Dedup-and-delivery for one observed item.
//!
//! Order of operations per submission:
//! track key → skip if delivered → refresh config → staleness → sign → send
//! → mark delivered. Tracking happens before any network call, so a crash
//! mid-way leaves the key undelivered. The ledger write follows a successful
//! send immediately, with nothing in between.
//!
//! There is no internal retry. A failed send leaves the key undelivered and
//! the next poll, which re-offers the item, tries again.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::config::ConfigStore;
use crate::item::{DedupKey, Item};
use crate::ledger::DeliveryLedger;
use crate::notify::{rejection_in_body, FeishuMessage, Transport};
use crate::signer;
use crate::staleness::{self, StaleCheck};

/// Terminal state of one `submit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Sent,
    SkippedStale,
    SkippedAlreadySent,
    /// Send did not succeed; the key stays undelivered.
    FailedTransient { reason: String },
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Sent => "sent",
            Outcome::SkippedStale => "skipped_stale",
            Outcome::SkippedAlreadySent => "skipped_already_sent",
            Outcome::FailedTransient { .. } => "failed_transient",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::FailedTransient { reason } => write!(f, "failed_transient ({reason})"),
            other => f.write_str(other.as_str()),
        }
    }
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("announce_submitted_total", "Items submitted to the pipeline.");
        describe_counter!("announce_sent_total", "Items delivered and recorded.");
        describe_counter!(
            "announce_skipped_stale_total",
            "Items skipped because the publish date is too old."
        );
        describe_counter!(
            "announce_skipped_sent_total",
            "Items skipped because they were already delivered."
        );
        describe_counter!("announce_failed_total", "Sends that failed and will be retried on re-observation.");
        describe_counter!("announce_config_reloads_total", "Config snapshots swapped in after a file change.");
    });
}

type KeyLock = Arc<tokio::sync::Mutex<()>>;

pub struct NotificationPipeline {
    config: ConfigStore,
    ledger: Arc<DeliveryLedger>,
    transport: Arc<dyn Transport>,
    in_flight: Mutex<HashMap<DedupKey, KeyLock>>,
}

impl NotificationPipeline {
    pub fn new(config: ConfigStore, ledger: Arc<DeliveryLedger>, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            ledger,
            transport,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn ledger(&self) -> &DeliveryLedger {
        &self.ledger
    }

    /// Submit `item` using the wall clock.
    pub async fn submit(&self, item: &Item) -> Result<Outcome> {
        self.submit_at(item, Local::now()).await
    }

    /// Submit `item` as if the current time were `now`.
    ///
    /// Returns `Err` only when the ledger cannot be written; every other
    /// failure is an [`Outcome`]. Submissions of the same key are serialized,
    /// so at most one of them can reach the transport.
    pub async fn submit_at(&self, item: &Item, now: DateTime<Local>) -> Result<Outcome> {
        ensure_metrics_described();
        counter!("announce_submitted_total").increment(1);

        let key = item.dedup_key();
        let key_lock = self.acquire_key_lock(&key);
        let result = {
            let _held = key_lock.lock().await;
            self.process(item, &key, now).await
        };
        self.release_key_lock(&key, key_lock);
        result
    }

    async fn process(&self, item: &Item, key: &DedupKey, now: DateTime<Local>) -> Result<Outcome> {
        self.with_ledger(key, |ledger, key| ledger.ensure_tracked(key))
            .await
            .with_context(|| format!("ledger: tracking {key}"))?;

        if self.ledger.is_delivered(key) {
            tracing::debug!(key = %key, "already delivered");
            counter!("announce_skipped_sent_total").increment(1);
            return Ok(Outcome::SkippedAlreadySent);
        }

        if self.config.refresh_if_changed() {
            tracing::info!("using reloaded config");
        }
        let settings = self
            .config
            .snapshot()
            .delivery()
            .context("config: delivery settings")?;

        let check = staleness::check(&item.published_at, settings.max_age_days, now.naive_local());
        if let StaleCheck::Stale { age_days, .. } = check {
            tracing::warn!(
                origin = %item.origin,
                title = %item.title,
                published_at = %item.published_at,
                age_days,
                max_age_days = settings.max_age_days,
                "item older than the age limit, not sending"
            );
            counter!("announce_skipped_stale_total").increment(1);
            return Ok(Outcome::SkippedStale);
        }
        if check == StaleCheck::Unparsable {
            tracing::warn!(key = %key, origin = %item.origin, title = %item.title, "sending item with unknown publish date");
        }

        let timestamp = now.timestamp().to_string();
        let sign = signer::sign(&timestamp, &settings.secret);
        let message = FeishuMessage::text(timestamp, sign, item);
        let body = serde_json::to_vec(&message).context("serialize webhook message")?;

        let response = match self.transport.send(&settings.endpoint, &body).await {
            Ok(rsp) => rsp,
            Err(e) => {
                tracing::error!(key = %key, origin = %item.origin, title = %item.title, error = %format!("{e:#}"), "send failed");
                counter!("announce_failed_total").increment(1);
                return Ok(Outcome::FailedTransient { reason: format!("{e:#}") });
            }
        };

        if !response.is_success() {
            tracing::error!(
                key = %key,
                origin = %item.origin,
                title = %item.title,
                status = response.status,
                body = %response.body,
                "webhook returned non-200"
            );
            counter!("announce_failed_total").increment(1);
            return Ok(Outcome::FailedTransient {
                reason: format!("HTTP {}", response.status),
            });
        }

        let sent_on = now.date_naive();
        self.with_ledger(key, move |ledger, key| ledger.mark_delivered(key, sent_on))
            .await
            .with_context(|| format!("ledger: marking {key} delivered"))?;

        if let Some((code, msg)) = rejection_in_body(&response.body) {
            tracing::warn!(key = %key, code, msg = %msg, "webhook accepted the request but reported an error code");
        }
        tracing::info!(origin = %item.origin, title = %item.title, published_at = %item.published_at, "send success");
        counter!("announce_sent_total").increment(1);
        Ok(Outcome::Sent)
    }

    /// Ledger writes fsync; keep them off the async workers.
    async fn with_ledger<F>(&self, key: &DedupKey, op: F) -> Result<()>
    where
        F: FnOnce(&DeliveryLedger, &DedupKey) -> Result<()> + Send + 'static,
    {
        let ledger = Arc::clone(&self.ledger);
        let key = key.clone();
        tokio::task::spawn_blocking(move || op(&ledger, &key))
            .await
            .context("ledger task panicked")?
    }

    fn acquire_key_lock(&self, key: &DedupKey) -> KeyLock {
        let mut map = match self.in_flight.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.entry(key.clone()).or_default().clone()
    }

    fn release_key_lock(&self, key: &DedupKey, lock: KeyLock) {
        let mut map = match self.in_flight.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Only the map and `lock` hold it: nobody else is waiting.
        if Arc::strong_count(&lock) == 2 {
            map.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::TransportResponse;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        status: u16,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Transport for Fixed {
        async fn send(&self, _endpoint: &str, _body: &[u8]) -> Result<TransportResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TransportResponse { status: self.status, body: String::new() })
        }
    }

    fn setup(status: u16) -> (tempfile::TempDir, NotificationPipeline, Arc<Fixed>) {
        let dir = tempfile::tempdir().unwrap();
        let cfg = dir.path().join("config.ini");
        std::fs::write(&cfg, "[feishu]\naddr = http://127.0.0.1:9/hook\nsecret = s\n").unwrap();
        let config = ConfigStore::open(&cfg).unwrap();
        let ledger = Arc::new(DeliveryLedger::open(dir.path().join("ledger.json")).unwrap());
        let transport = Arc::new(Fixed { status, calls: AtomicUsize::new(0) });
        let p = NotificationPipeline::new(config, ledger, transport.clone());
        (dir, p, transport)
    }

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 7, 24, 10, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn key_locks_are_released() {
        let (_dir, p, t) = setup(200);
        let item = Item::new("OKX", "t", "2024-07-20", "c");
        assert_eq!(p.submit_at(&item, now()).await.unwrap(), Outcome::Sent);
        assert_eq!(p.submit_at(&item, now()).await.unwrap(), Outcome::SkippedAlreadySent);
        assert_eq!(t.calls.load(Ordering::SeqCst), 1);
        assert!(p.in_flight.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_200_is_transient() {
        let (_dir, p, _t) = setup(204);
        let item = Item::new("OKX", "t", "2024-07-20", "c");
        let out = p.submit_at(&item, now()).await.unwrap();
        assert_eq!(out, Outcome::FailedTransient { reason: "HTTP 204".into() });
        assert!(!p.ledger().is_delivered(&item.dedup_key()));
    }

    #[test]
    fn outcome_display() {
        assert_eq!(Outcome::Sent.to_string(), "sent");
        assert_eq!(
            Outcome::FailedTransient { reason: "HTTP 500".into() }.to_string(),
            "failed_transient (HTTP 500)"
        );
    }
}
