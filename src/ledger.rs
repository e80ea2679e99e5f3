// src/ledger.rs
//! Durable record of which dedup keys have been delivered.
//!
//! On disk the ledger is one JSON object mapping each key to an integer:
//! `0` while undelivered, `YYYYMMDD` of the successful send afterwards.
//! Every mutation rewrites the file through a synced temp file and an atomic
//! rename before the call returns, so a crash never loses an acknowledged
//! write. A sibling `<ledger>.lock` file is held exclusively for the
//! lifetime of the ledger; a second process cannot open the same ledger.

use anyhow::{anyhow, Context, Result};
use chrono::{Datelike, NaiveDate};
use fs2::FileExt;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::item::DedupKey;

pub const DEFAULT_LEDGER_PATH: &str = ".msg_status.json";
pub const ENV_LEDGER_PATH: &str = "ANNOUNCE_LEDGER_PATH";
pub const ENV_RETENTION_DAYS: &str = "ANNOUNCE_LEDGER_RETENTION_DAYS";

/// Opt-in retention from `$ANNOUNCE_LEDGER_RETENTION_DAYS`. Unset, `0` or
/// not a day count means keep everything.
pub fn retention_days_from_env() -> Option<u64> {
    let raw = std::env::var(ENV_RETENTION_DAYS).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(0) => None,
        Ok(d) => Some(d),
        Err(_) => {
            tracing::warn!(value = %raw, "{ENV_RETENTION_DAYS} is not a day count, retention disabled");
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub delivered: bool,
    /// Day of the successful send; audit only.
    pub delivered_on: Option<NaiveDate>,
}

impl DeliveryRecord {
    fn from_raw(raw: u32) -> Self {
        if raw == 0 {
            return Self { delivered: false, delivered_on: None };
        }
        let (y, m, d) = (raw / 10_000, (raw / 100) % 100, raw % 100);
        Self {
            delivered: true,
            delivered_on: NaiveDate::from_ymd_opt(y as i32, m, d),
        }
    }
}

fn encode_date(d: NaiveDate) -> u32 {
    // Years before 1 AD cannot occur for a send date; clamp instead of wrapping.
    let y = d.year().max(1) as u32;
    y * 10_000 + d.month() * 100 + d.day()
}

pub struct DeliveryLedger {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, u32>>,
    _lock: File,
}

impl DeliveryLedger {
    /// Open (or create) the ledger at `path` and take the single-writer lock.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating ledger dir {}", dir.display()))?;
        }

        let lock_path = sibling(&path, "lock");
        let lock = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("opening ledger lock {}", lock_path.display()))?;
        lock.try_lock_exclusive().map_err(|e| {
            anyhow!(
                "ledger {} is in use by another process ({e})",
                path.display()
            )
        })?;

        let entries = read_entries(&path)?;
        tracing::info!(path = %path.display(), records = entries.len(), "ledger opened");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
            _lock: lock,
        })
    }

    /// `$ANNOUNCE_LEDGER_PATH`, falling back to `.msg_status.json`.
    pub fn open_default() -> Result<Self> {
        let path = std::env::var(ENV_LEDGER_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_LEDGER_PATH));
        Self::open(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert `key` as undelivered if it is not known yet. Idempotent.
    pub fn ensure_tracked(&self, key: &DedupKey) -> Result<()> {
        let mut entries = self.lock();
        if entries.contains_key(key.as_str()) {
            return Ok(());
        }
        entries.insert(key.as_str().to_string(), 0);
        settle(persist(&self.path, &entries), || {
            entries.remove(key.as_str());
        })
    }

    pub fn is_delivered(&self, key: &DedupKey) -> bool {
        self.lock().get(key.as_str()).is_some_and(|v| *v > 0)
    }

    /// Mark `key` delivered on `on_date`. Returns only after the change is on
    /// disk. If the file was never replaced the in-memory state is rolled
    /// back; once it has been, memory keeps matching it even though the
    /// directory sync error is still returned.
    pub fn mark_delivered(&self, key: &DedupKey, on_date: NaiveDate) -> Result<()> {
        let mut entries = self.lock();
        let previous = entries.insert(key.as_str().to_string(), encode_date(on_date));
        settle(persist(&self.path, &entries), || {
            match previous {
                Some(v) => entries.insert(key.as_str().to_string(), v),
                None => entries.remove(key.as_str()),
            };
        })
    }

    pub fn record(&self, key: &DedupKey) -> Option<DeliveryRecord> {
        self.lock().get(key.as_str()).copied().map(DeliveryRecord::from_raw)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop delivered records sent before `cutoff`. Undelivered keys are
    /// always kept, as are delivered records whose date cannot be decoded.
    pub fn prune_delivered_before(&self, cutoff: NaiveDate) -> Result<usize> {
        let mut entries = self.lock();
        let before = entries.clone();
        entries.retain(|_, raw| {
            let rec = DeliveryRecord::from_raw(*raw);
            !(rec.delivered && rec.delivered_on.is_some_and(|d| d < cutoff))
        });
        let removed = before.len() - entries.len();
        if removed == 0 {
            return Ok(0);
        }
        settle(persist(&self.path, &entries), || *entries = before)?;
        tracing::info!(removed, cutoff = %cutoff, "ledger pruned");
        Ok(removed)
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, u32>> {
        match self.entries.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "ledger".into());
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

fn read_entries(path: &Path) -> Result<BTreeMap<String, u32>> {
    let content = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("reading ledger {}", path.display()));
        }
    };
    if content.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_str(&content)
        .with_context(|| format!("ledger {} is corrupt", path.display()))
}

/// Where a rewrite failed relative to the rename that publishes it.
#[derive(Debug)]
enum PersistError {
    /// The ledger file still holds the previous state.
    NotWritten(anyhow::Error),
    /// The new file is in place; only its directory entry may not be durable.
    Unsynced(anyhow::Error),
}

/// Map a persist result onto the in-memory map: undo the change only when
/// the file was not replaced.
fn settle(res: std::result::Result<(), PersistError>, rollback: impl FnOnce()) -> Result<()> {
    match res {
        Ok(()) => Ok(()),
        Err(PersistError::NotWritten(e)) => {
            rollback();
            Err(e)
        }
        Err(PersistError::Unsynced(e)) => {
            tracing::error!(error = %format!("{e:#}"), "ledger replaced but directory sync failed");
            Err(e)
        }
    }
}

fn persist(path: &Path, entries: &BTreeMap<String, u32>) -> std::result::Result<(), PersistError> {
    persist_with(path, entries, sync_parent_dir)
}

fn persist_with(
    path: &Path,
    entries: &BTreeMap<String, u32>,
    sync_dir: impl FnOnce(&Path) -> Result<()>,
) -> std::result::Result<(), PersistError> {
    write_replacement(path, entries).map_err(PersistError::NotWritten)?;
    sync_dir(path).map_err(PersistError::Unsynced)
}

fn write_replacement(path: &Path, entries: &BTreeMap<String, u32>) -> Result<()> {
    let tmp = sibling(path, "tmp");
    let json = serde_json::to_vec(entries).context("serialize ledger")?;

    let mut f = File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
    f.write_all(&json)
        .with_context(|| format!("writing {}", tmp.display()))?;
    f.sync_all()
        .with_context(|| format!("syncing {}", tmp.display()))?;
    drop(f);

    fs::rename(&tmp, path).with_context(|| format!("replacing ledger {}", path.display()))
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };
    File::open(dir)
        .and_then(|d| d.sync_all())
        .with_context(|| format!("syncing ledger dir {}", dir.display()))
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> DedupKey {
        DedupKey::from_parts("OKX", s, "c")
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn track_then_deliver_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        {
            let l = DeliveryLedger::open(&path).unwrap();
            l.ensure_tracked(&key("a")).unwrap();
            l.ensure_tracked(&key("b")).unwrap();
            assert!(!l.is_delivered(&key("a")));
            l.mark_delivered(&key("a"), ymd(2024, 7, 24)).unwrap();
            assert!(l.is_delivered(&key("a")));
        }
        let l = DeliveryLedger::open(&path).unwrap();
        assert_eq!(l.len(), 2);
        assert_eq!(
            l.record(&key("a")),
            Some(DeliveryRecord { delivered: true, delivered_on: Some(ymd(2024, 7, 24)) })
        );
        assert_eq!(
            l.record(&key("b")),
            Some(DeliveryRecord { delivered: false, delivered_on: None })
        );
        assert_eq!(l.record(&key("zzz")), None);
    }

    #[test]
    fn on_disk_format_is_key_to_yyyymmdd() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        let l = DeliveryLedger::open(&path).unwrap();
        l.ensure_tracked(&key("a")).unwrap();
        l.ensure_tracked(&key("b")).unwrap();
        l.mark_delivered(&key("b"), ymd(2024, 7, 5)).unwrap();

        let raw: BTreeMap<String, u32> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw[key("a").as_str()], 0);
        assert_eq!(raw[key("b").as_str()], 20240705);
    }

    #[test]
    fn ensure_tracked_is_idempotent_and_never_resets_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let l = DeliveryLedger::open(dir.path().join("s.json")).unwrap();
        l.ensure_tracked(&key("a")).unwrap();
        l.mark_delivered(&key("a"), ymd(2024, 1, 2)).unwrap();
        l.ensure_tracked(&key("a")).unwrap();
        assert!(l.is_delivered(&key("a")));
        assert_eq!(l.len(), 1);
    }

    #[test]
    fn second_open_is_refused_while_locked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        let first = DeliveryLedger::open(&path).unwrap();
        assert!(DeliveryLedger::open(&path).is_err());
        drop(first);
        assert!(DeliveryLedger::open(&path).is_ok());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        fs::write(&path, "{not json").unwrap();
        assert!(DeliveryLedger::open(&path).is_err());
    }

    #[test]
    fn prune_keeps_undelivered_and_recent() {
        let dir = tempfile::tempdir().unwrap();
        let l = DeliveryLedger::open(dir.path().join("s.json")).unwrap();
        for k in ["old", "new", "pending"] {
            l.ensure_tracked(&key(k)).unwrap();
        }
        l.mark_delivered(&key("old"), ymd(2024, 1, 1)).unwrap();
        l.mark_delivered(&key("new"), ymd(2024, 7, 1)).unwrap();

        let removed = l.prune_delivered_before(ymd(2024, 6, 1)).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(l.record(&key("old")), None);
        assert!(l.is_delivered(&key("new")));
        assert!(!l.is_delivered(&key("pending")));
        assert_eq!(l.prune_delivered_before(ymd(2024, 6, 1)).unwrap(), 0);
    }

    #[test]
    fn failure_after_rename_counts_as_committed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        let entries = BTreeMap::from([(key("a").as_str().to_string(), 20240724)]);

        let res = persist_with(&path, &entries, |_| Err(anyhow!("dir sync failed")));
        assert!(matches!(res, Err(PersistError::Unsynced(_))));
        assert_eq!(read_entries(&path).unwrap(), entries);

        let mut rolled_back = false;
        assert!(settle(res, || rolled_back = true).is_err());
        assert!(!rolled_back);
    }

    #[test]
    fn failure_before_rename_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("s.json");
        let entries = BTreeMap::from([(key("a").as_str().to_string(), 0)]);

        let res = persist(&path, &entries);
        assert!(matches!(res, Err(PersistError::NotWritten(_))));
        assert!(!path.exists());

        let mut rolled_back = false;
        assert!(settle(res, || rolled_back = true).is_err());
        assert!(rolled_back);
    }

    #[test]
    fn legacy_nonzero_flag_counts_as_delivered() {
        let rec = DeliveryRecord::from_raw(1);
        assert!(rec.delivered);
        assert_eq!(rec.delivered_on, None);
    }
}
