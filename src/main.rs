//! Process entry point. Loads configuration, wires the store, the two
//! service clients, the sync engine, the scheduler, and the RPC control
//! socket, then runs in the foreground until a shutdown signal or an
//! RPC `shutdown` command arrives. Grounded on
//! `original_source/daemon.py`'s `Daemon._async_main`, minus the
//! double-fork: this binary is meant to be supervised (systemd,
//! launchd, a wrapper script), not to background itself. There is no
//! CLI argument surface here — the corpus this crate is modelled on
//! reaches for `clap` when it wants one, and this spec's control
//! surface is the RPC socket (`rpc_client`), not a subcommand tree.

use std::sync::Arc;
use std::time::Duration;

use liked_sync_daemon::clients::service_a::ServiceAClient;
use liked_sync_daemon::clients::service_b::ServiceBClient;
use liked_sync_daemon::clients::ServiceClient;
use liked_sync_daemon::config::{self, Paths};
use liked_sync_daemon::daemon;
use liked_sync_daemon::engine::SyncEngine;
use liked_sync_daemon::rpc::{self, DaemonState};
use liked_sync_daemon::scheduler::SyncScheduler;
use liked_sync_daemon::store::Store;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("fatal: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let paths = Paths::discover()?;
    paths.ensure_dirs()?;

    if let Some(pid) = daemon::check_not_already_running(&paths.pid_path()) {
        anyhow::bail!("daemon already running (pid {pid})");
    }

    let app_config = config::load_config(&paths.config_path())?;

    let _logging_guards = liked_sync_daemon::logging::init(&paths.log_dir(), app_config.daemon.log_level)?;

    daemon::write_pid_file(&paths.pid_path())?;
    daemon::ensure_clean_socket(&paths.socket_path());

    let result = run_daemon(paths.clone(), app_config).await;

    daemon::cleanup(&paths.pid_path(), &paths.socket_path());
    result
}

async fn run_daemon(paths: Paths, app_config: config::AppConfig) -> anyhow::Result<()> {
    let store = Store::connect(&paths.store_path()).await?;

    let client_a: Arc<dyn ServiceClient> = Arc::new(ServiceAClient::new(app_config.service_a.clone()));
    let client_b: Arc<dyn ServiceClient> = Arc::new(ServiceBClient::new(app_config.service_b.clone()));

    let engine = Arc::new(SyncEngine::new(store.clone(), client_a, client_b, &app_config));

    let scheduler = if app_config.is_fully_configured() {
        let interval = Duration::from_secs(u64::from(app_config.sync.interval_minutes) * 60);
        let scheduler = SyncScheduler::new(engine.clone(), interval, app_config.sync.mode);
        scheduler.start().await;
        Some(scheduler)
    } else {
        tracing::warn!("service credentials incomplete; scheduler will not start");
        None
    };

    let state = Arc::new(DaemonState::new(store, Some(engine), scheduler.clone()));

    daemon::install_shutdown_signals({
        let state = state.clone();
        move || state.request_shutdown()
    })
    .await;

    let rpc_state = state.clone();
    let socket_path = paths.socket_path();
    let rpc_task = tokio::spawn(async move { rpc::serve(&socket_path, rpc_state).await });

    state.wait_for_shutdown().await;
    tracing::info!("initiating graceful shutdown");

    if let Some(scheduler) = &scheduler {
        scheduler.stop().await;
    }

    if let Err(err) = rpc_task.await {
        tracing::warn!(error = %err, "rpc task panicked during shutdown");
    }

    tracing::info!("daemon shut down cleanly");
    Ok(())
}
