// src/telemetry.rs
use anyhow::{Context, Result};
use chrono::{Days, Local, NaiveDate};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const DEFAULT_LOG_DIR: &str = "log";
pub const ENV_LOG_DIR: &str = "ANNOUNCE_LOG_DIR";
pub const LOG_RETENTION_DAYS: u64 = 7;
const LOG_FILE_PREFIX: &str = "announce.log";
const DEFAULT_FILTER: &str = "announce_forwarder=info,warn";

/// Console + daily rolling file (`<log_dir>/announce.log.YYYY-MM-DD`), with
/// files older than [`LOG_RETENTION_DAYS`] removed.
/// `LOG_FORMAT=json` switches both layers to JSON lines.
///
/// Keep the returned guard alive for the whole process, or buffered file
/// output is lost on exit.
pub fn init(log_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("creating log dir {}", log_dir.display()))?;

    // The appender only prunes when it rolls over, which a short cron run
    // rarely sees; sweep once at startup as well.
    let removed = cleanup_old_logs(log_dir, LOG_RETENTION_DAYS, Local::now().date_naive())
        .with_context(|| format!("pruning old logs in {}", log_dir.display()))?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .max_log_files(LOG_RETENTION_DAYS as usize)
        .build(log_dir)
        .context("building rolling log appender")?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    let res = if json {
        registry
            .with(fmt::layer().json())
            .with(fmt::layer().json().with_writer(non_blocking).with_ansi(false))
            .try_init()
    } else {
        registry
            .with(fmt::layer().compact())
            .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
            .try_init()
    };
    res.map_err(|e| anyhow::anyhow!("failed to set global tracing subscriber: {e}"))?;

    if removed > 0 {
        tracing::debug!(removed, "deleted expired log files");
    }
    Ok(guard)
}

/// Delete `announce.log.YYYY-MM-DD` files dated more than `retention_days`
/// before `today`. Other files are left alone. Returns how many were removed.
pub fn cleanup_old_logs(log_dir: &Path, retention_days: u64, today: NaiveDate) -> Result<usize> {
    let Some(cutoff) = today.checked_sub_days(Days::new(retention_days)) else {
        return Ok(0);
    };
    let prefix = format!("{LOG_FILE_PREFIX}.");

    let mut removed = 0;
    for entry in std::fs::read_dir(log_dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(date) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(&prefix))
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        else {
            continue;
        };
        if date < cutoff {
            std::fs::remove_file(&path)
                .with_context(|| format!("removing {}", path.display()))?;
            removed += 1;
        }
    }
    Ok(removed)
}
