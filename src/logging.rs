//! Logging setup: two rotating sinks, matching `original_source/logging.py`'s
//! `daemon.log` (human-readable, everything) and `sync.log` (JSON, sync-engine
//! events only), both rotated at 10 MiB with 5 backups.

use std::path::Path;

use rolling_file::{BasicRollingFileAppender, RollingConditionBasic};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::LogLevel;

const MAX_BYTES: u64 = 10 * 1024 * 1024;
const BACKUP_COUNT: usize = 5;

/// Target prefix used by every span/event the sync engine emits; the
/// JSON sink is filtered down to just this subtree, mirroring
/// `logging.Filter("spondex.sync")` in the original.
pub const SYNC_TARGET_PREFIX: &str = "liked_sync_daemon::engine";

/// Guards returned by `init` must be held for the process lifetime —
/// dropping them stops the background flush thread for that sink.
pub struct LoggingGuards {
    _daemon: tracing_appender::non_blocking::WorkerGuard,
    _sync: tracing_appender::non_blocking::WorkerGuard,
}

pub fn init(log_dir: &Path, level: LogLevel) -> anyhow::Result<LoggingGuards> {
    std::fs::create_dir_all(log_dir)?;

    let condition = RollingConditionBasic::new().max_size(MAX_BYTES);
    let daemon_appender = BasicRollingFileAppender::new(
        log_dir.join("daemon.log"),
        condition.clone(),
        BACKUP_COUNT,
    )?;
    let sync_appender =
        BasicRollingFileAppender::new(log_dir.join("sync.log"), condition, BACKUP_COUNT)?;

    let (daemon_writer, daemon_guard) = tracing_appender::non_blocking(daemon_appender);
    let (sync_writer, sync_guard) = tracing_appender::non_blocking(sync_appender);

    let env_filter = EnvFilter::try_new(level.as_filter_str())?
        .add_directive("sqlx=warn".parse()?)
        .add_directive("reqwest=warn".parse()?);

    let daemon_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(daemon_writer);

    let sync_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_ansi(false)
        .with_writer(sync_writer.with_filter(|meta| meta.target().starts_with(SYNC_TARGET_PREFIX)));

    Registry::default()
        .with(env_filter)
        .with(daemon_layer)
        .with(sync_layer)
        .try_init()?;

    install_panic_hook();

    Ok(LoggingGuards {
        _daemon: daemon_guard,
        _sync: sync_guard,
    })
}

/// Logs a panic via `tracing::error!` before the default hook prints to
/// stderr, so crashes are visible in `daemon.log` — the equivalent of
/// the original's `sys.excepthook`.
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!(panic = %info, "unhandled panic");
        default_hook(info);
    }));
}
