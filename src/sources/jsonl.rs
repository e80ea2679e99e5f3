// src/sources/jsonl.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::{Exchange, SourceAdapter};
use crate::item::Item;
use crate::normalize::clean_text;

/// One line of scraper output.
#[derive(Debug, Deserialize)]
struct Line {
    exchange: Exchange,
    origin: String,
    title: String,
    #[serde(default)]
    published_at: String,
    #[serde(default)]
    content: String,
}

/// Items written by external scrapers, one JSON object per line:
/// `{"exchange":"OKEX","origin":"OKEx_公告","title":..,"published_at":..,"content":..}`.
pub struct JsonLinesSource {
    name: String,
    input: Input,
}

enum Input {
    File(PathBuf),
    Text(String),
}

impl JsonLinesSource {
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            name: path.display().to_string(),
            input: Input::File(path),
        }
    }

    /// Already-read input (stdin, fixtures).
    pub fn from_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input: Input::Text(text.into()),
        }
    }

    async fn read(&self) -> Result<String> {
        match &self.input {
            Input::File(p) => tokio::fs::read_to_string(p)
                .await
                .with_context(|| format!("reading items from {}", p.display())),
            Input::Text(t) => Ok(t.clone()),
        }
    }
}

/// Parse scraper output; malformed lines are logged and skipped.
pub fn parse_lines(source: &str, text: &str, enabled: &[Exchange]) -> Vec<Item> {
    let mut out = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let line: Line = match serde_json::from_str(raw) {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(source, line = idx + 1, error = %e, "skipping malformed item line");
                continue;
            }
        };
        if !enabled.contains(&line.exchange) {
            continue;
        }
        let title = clean_text(&line.title);
        if title.is_empty() {
            tracing::warn!(source, line = idx + 1, "skipping item without title");
            continue;
        }
        out.push(Item {
            origin: clean_text(&line.origin),
            title,
            published_at: line.published_at.trim().to_string(),
            content: clean_text(&line.content),
        });
    }
    out
}

#[async_trait::async_trait]
impl SourceAdapter for JsonLinesSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn exchanges(&self) -> Vec<Exchange> {
        Exchange::ALL.to_vec()
    }

    async fn fetch_latest(&self, enabled: &[Exchange]) -> Result<Vec<Item>> {
        let text = self.read().await?;
        Ok(parse_lines(&self.name, &text, enabled))
    }
}
