// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod item;
pub mod ledger;
pub mod normalize;
pub mod notify;
pub mod pipeline;
pub mod signer;
pub mod sources;
pub mod staleness;
pub mod telemetry;

// ---- Re-exports for stable public API ----
pub use crate::config::{ConfigSnapshot, ConfigStore, DeliverySettings};
pub use crate::item::{DedupKey, Item};
pub use crate::ledger::{DeliveryLedger, DeliveryRecord};
pub use crate::notify::{Transport, TransportResponse, WebhookTransport};
pub use crate::pipeline::{NotificationPipeline, Outcome};
pub use crate::sources::{run_once, Exchange, JsonLinesSource, RunSummary, SourceAdapter};
