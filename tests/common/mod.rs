// tests/common/mod.rs
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use announce_forwarder::notify::{FeishuMessage, Transport, TransportResponse};
use announce_forwarder::{ConfigStore, DeliveryLedger, NotificationPipeline};
use chrono::{DateTime, Local, TimeZone};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted reply for one call.
#[derive(Debug, Clone)]
pub enum Reply {
    Status(u16),
    Error(&'static str),
}

/// Transport double: records every call and answers from a script
/// (HTTP 200 once the script runs out).
#[derive(Default)]
pub struct RecordingTransport {
    pub calls: Mutex<Vec<(String, FeishuMessage)>>,
    script: Mutex<VecDeque<Reply>>,
    delay: Option<Duration>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scripted(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(replies.into()),
            ..Default::default()
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Default::default()
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<(String, FeishuMessage)> {
        self.calls.lock().unwrap().last().cloned()
    }
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, endpoint: &str, body: &[u8]) -> Result<TransportResponse> {
        let msg: FeishuMessage = serde_json::from_slice(body)?;
        self.calls.lock().unwrap().push((endpoint.to_string(), msg));
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        let reply = self.script.lock().unwrap().pop_front().unwrap_or(Reply::Status(200));
        match reply {
            Reply::Status(status) => Ok(TransportResponse {
                status,
                body: r#"{"code":0,"msg":"success"}"#.to_string(),
            }),
            Reply::Error(e) => Err(anyhow!(e)),
        }
    }
}

pub const ENDPOINT: &str = "https://open.feishu.invalid/open-apis/bot/v2/hook/test";
pub const SECRET: &str = "test-secret";

pub fn config_text(max_msg_days: i64, exchanges: &str) -> String {
    format!(
        "[feishu]\naddr = {ENDPOINT}\nsecret = {SECRET}\n\n[base]\nmax_msg_days = {max_msg_days}\nexchange = {exchanges}\n"
    )
}

pub struct Env {
    pub dir: tempfile::TempDir,
    pub config_path: PathBuf,
    pub ledger_path: PathBuf,
}

impl Env {
    pub fn new(max_msg_days: i64) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.ini");
        std::fs::write(&config_path, config_text(max_msg_days, "OKEX,BINANCE")).unwrap();
        let ledger_path = dir.path().join("state").join("msg_status.json");
        Self { dir, config_path, ledger_path }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// A fresh pipeline over the persisted state, as after a process restart.
    pub fn pipeline(&self, transport: Arc<dyn Transport>) -> NotificationPipeline {
        let config = ConfigStore::open(&self.config_path).unwrap();
        let ledger = Arc::new(DeliveryLedger::open(&self.ledger_path).unwrap());
        NotificationPipeline::new(config, ledger, transport)
    }
}

pub fn at(y: i32, m: u32, d: u32) -> DateTime<Local> {
    Local.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
}
