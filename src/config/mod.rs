// src/config/mod.rs
//! Hot-reloadable, sectioned key/value configuration.
//!
//! Values are addressed as `section.key`. The store keeps one immutable
//! [`ConfigSnapshot`] and swaps it wholesale when the backing file's SHA-256
//! fingerprint changes; a reload that fails to read, parse or validate leaves
//! the previous snapshot in place.

mod parse;

use anyhow::{bail, Context, Result};
use metrics::counter;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use parse::{parse_sections, Sections};

pub const DEFAULT_CONFIG_PATH: &str = "config.ini";
pub const ENV_CONFIG_PATH: &str = "ANNOUNCE_CONFIG_PATH";
pub const DEFAULT_MAX_MSG_DAYS: i64 = 7;

/// Immutable view of one successfully loaded config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSnapshot {
    sections: Sections,
    fingerprint: String,
}

impl ConfigSnapshot {
    /// Parse `content` as read from a file with extension `hint_ext`.
    pub fn from_str_with_hint(content: &str, hint_ext: &str) -> Result<Self> {
        Ok(Self {
            sections: parse_sections(content, hint_ext)?,
            fingerprint: fingerprint(content.as_bytes()),
        })
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn raw(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|opts| opts.get(&key.to_lowercase()))
            .map(String::as_str)
    }

    pub fn get_string(&self, section: &str, key: &str, default: &str) -> String {
        self.raw(section, key).unwrap_or(default).to_string()
    }

    pub fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        let Some(raw) = self.raw(section, key) else {
            return default;
        };
        match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(section, key, value = raw, "not an integer, using default {default}");
                default
            }
        }
    }

    pub fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        let Some(raw) = self.raw(section, key) else {
            return default;
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "yes" | "true" | "on" => true,
            "0" | "no" | "false" | "off" => false,
            _ => {
                tracing::warn!(section, key, value = raw, "not a boolean, using default {default}");
                default
            }
        }
    }

    /// Comma-separated list; tokens trimmed, empty tokens dropped. A missing or
    /// blank value yields `default`.
    pub fn get_list(&self, section: &str, key: &str, default: &[&str]) -> Vec<String> {
        match self.raw(section, key).map(split_list) {
            Some(v) if !v.is_empty() => v,
            _ => default.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn get_int_list(&self, section: &str, key: &str, default: &[i64]) -> Vec<i64> {
        let Some(raw) = self.raw(section, key) else {
            return default.to_vec();
        };
        let tokens = split_list(raw);
        if tokens.is_empty() {
            return default.to_vec();
        }
        match tokens.iter().map(|t| t.parse()).collect::<Result<Vec<i64>, _>>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(section, key, value = raw, "not an integer list, using default");
                default.to_vec()
            }
        }
    }

    /// Option names of `section`, empty when the section does not exist.
    pub fn options(&self, section: &str) -> Vec<String> {
        self.sections
            .get(section)
            .map(|opts| opts.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// The values the notification pipeline needs at send time.
    pub fn delivery(&self) -> Result<DeliverySettings> {
        let endpoint = self.get_string("feishu", "addr", "").trim().to_string();
        let secret = self.get_string("feishu", "secret", "").trim().to_string();
        if endpoint.is_empty() {
            bail!("feishu.addr is missing or empty");
        }
        if secret.is_empty() {
            bail!("feishu.secret is missing or empty");
        }
        Ok(DeliverySettings {
            endpoint,
            secret,
            max_age_days: self.get_int("base", "max_msg_days", DEFAULT_MAX_MSG_DAYS),
        })
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Endpoint, secret and age limit in effect for one submission.
#[derive(Clone, PartialEq, Eq)]
pub struct DeliverySettings {
    pub endpoint: String,
    pub secret: String,
    pub max_age_days: i64,
}

impl fmt::Debug for DeliverySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliverySettings")
            .field("endpoint", &self.endpoint)
            .field("secret", &"<redacted>")
            .field("max_age_days", &self.max_age_days)
            .finish()
    }
}

/// Shared handle over the current snapshot. Clones share the same state.
#[derive(Clone)]
pub struct ConfigStore {
    path: PathBuf,
    current: Arc<RwLock<Arc<ConfigSnapshot>>>,
}

impl ConfigStore {
    /// Load `path`. Any read, parse or validation error is returned; the
    /// process cannot start without a usable config.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let snapshot = load_snapshot(&path)?;
        tracing::info!(path = %path.display(), fingerprint = %short(snapshot.fingerprint()), "config loaded");
        Ok(Self {
            path,
            current: Arc::new(RwLock::new(Arc::new(snapshot))),
        })
    }

    /// `$ANNOUNCE_CONFIG_PATH`, falling back to `config.ini`.
    pub fn open_default() -> Result<Self> {
        let path = std::env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::open(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The snapshot currently in effect.
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Re-fingerprint the backing file and swap in a fresh snapshot if it
    /// changed. Returns whether a swap happened. Failures are logged and the
    /// old snapshot stays active.
    pub fn refresh_if_changed(&self) -> bool {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "config reload: read failed, keeping previous snapshot");
                return false;
            }
        };
        let new_fp = fingerprint(&bytes);
        if new_fp == self.snapshot().fingerprint {
            return false;
        }

        let snapshot = match snapshot_from_bytes(&self.path, &bytes) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %format!("{e:#}"), "config reload rejected, keeping previous snapshot");
                return false;
            }
        };

        let mut guard = match self.current.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.fingerprint == snapshot.fingerprint {
            // Another caller swapped the same content in first.
            return false;
        }
        *guard = Arc::new(snapshot);
        drop(guard);

        counter!("announce_config_reloads_total").increment(1);
        tracing::info!(path = %self.path.display(), fingerprint = %short(&new_fp), "config reloaded");
        true
    }

    pub fn get_string(&self, section: &str, key: &str, default: &str) -> String {
        self.snapshot().get_string(section, key, default)
    }

    pub fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.snapshot().get_int(section, key, default)
    }

    pub fn get_list(&self, section: &str, key: &str, default: &[&str]) -> Vec<String> {
        self.snapshot().get_list(section, key, default)
    }
}

fn load_snapshot(path: &Path) -> Result<ConfigSnapshot> {
    let bytes = fs::read(path).with_context(|| format!("reading config {}", path.display()))?;
    snapshot_from_bytes(path, &bytes)
}

fn snapshot_from_bytes(path: &Path, bytes: &[u8]) -> Result<ConfigSnapshot> {
    let content = std::str::from_utf8(bytes)
        .with_context(|| format!("config {} is not valid UTF-8", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let snapshot = ConfigSnapshot::from_str_with_hint(content, &ext)
        .with_context(|| format!("parsing config {}", path.display()))?;
    snapshot
        .delivery()
        .with_context(|| format!("validating config {}", path.display()))?;
    Ok(snapshot)
}

fn fingerprint(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

fn short(fp: &str) -> &str {
    &fp[..fp.len().min(12)]
}
