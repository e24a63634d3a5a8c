//! Process lifecycle for the foreground daemon: PID-file bookkeeping,
//! stale-socket detection, and signal-driven shutdown. Grounded on
//! `original_source/daemon.py`'s `Daemon` class, minus the double-fork
//! daemonization — this process runs in the foreground under a process
//! supervisor (systemd, launchd, a wrapper script) per the Open Question
//! resolution recorded in DESIGN.md, since tokio's multi-threaded runtime
//! does not survive `fork()` safely.

use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::Path;

use nix::sys::signal;
use nix::unistd::Pid;

use crate::error::{Result, SyncError};

/// Remove `sock_path` if nothing is listening on it. A connect failure
/// (refused, not found, any other OS error) means the file is a leftover
/// from a crashed prior instance; a successful connect means a live
/// daemon owns it, so the file is left alone (spec §6).
pub fn ensure_clean_socket(sock_path: &Path) {
    if !sock_path.exists() {
        return;
    }
    match StdUnixStream::connect(sock_path) {
        Ok(_) => {}
        Err(_) => {
            tracing::debug!(path = %sock_path.display(), "removing stale socket");
            let _ = std::fs::remove_file(sock_path);
        }
    }
}

/// Read the PID recorded in `pid_path`, if any.
pub fn read_pid(pid_path: &Path) -> Option<i32> {
    std::fs::read_to_string(pid_path).ok()?.trim().parse().ok()
}

/// Whether the process recorded in `pid_path` is still alive. Reaps a
/// stale PID file (process no longer exists) as a side effect, matching
/// `Daemon.is_running`'s cleanup behaviour.
pub fn is_running(pid_path: &Path) -> bool {
    let Some(pid) = read_pid(pid_path) else {
        return false;
    };

    match signal::kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::ESRCH) => {
            tracing::debug!(pid, "removing stale pid file");
            let _ = std::fs::remove_file(pid_path);
            false
        }
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => true,
    }
}

/// Write the current process's PID to `pid_path`.
pub fn write_pid_file(pid_path: &Path) -> Result<()> {
    std::fs::write(pid_path, std::process::id().to_string())
        .map_err(|e| SyncError::Fatal(anyhow::anyhow!("writing pid file {}: {e}", pid_path.display())))
}

/// Remove the PID and socket files, ignoring errors (either may already
/// be gone).
pub fn cleanup(pid_path: &Path, socket_path: &Path) {
    let _ = std::fs::remove_file(pid_path);
    let _ = std::fs::remove_file(socket_path);
}

/// Install handlers that call `on_signal` when SIGTERM or SIGINT arrives.
/// Must run inside a tokio runtime; each handler is its own background
/// task, matching the original's `loop.add_signal_handler` for both
/// signals.
pub async fn install_shutdown_signals<F>(on_signal: F)
where
    F: Fn() + Send + Sync + 'static,
{
    use tokio::signal::unix::{signal as unix_signal, SignalKind};

    let on_signal = std::sync::Arc::new(on_signal);

    let term_handler = on_signal.clone();
    tokio::spawn(async move {
        if let Ok(mut term) = unix_signal(SignalKind::terminate()) {
            term.recv().await;
            tracing::info!("received SIGTERM");
            term_handler();
        }
    });

    let int_handler = on_signal.clone();
    tokio::spawn(async move {
        if let Ok(mut int) = unix_signal(SignalKind::interrupt()) {
            int.recv().await;
            tracing::info!("received SIGINT");
            int_handler();
        }
    });
}

/// Refuse to start a second instance against the same state directory.
/// Returns the PID of the already-running instance, if any.
pub fn check_not_already_running(pid_path: &Path) -> Option<i32> {
    if is_running(pid_path) {
        read_pid(pid_path)
    } else {
        None
    }
}
