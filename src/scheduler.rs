//! Periodic sync scheduling with pause/resume and manual trigger (spec
//! §4.5). Grounded on `original_source/sync/scheduler.py`'s `_loop`/
//! `_wait_for_trigger_or_stop` state machine; the `tokio::select!` over
//! sleep/trigger/stop and the `start`/`start_with_shutdown` split follow
//! `services/oauth_token_manager.rs`'s background-task idiom.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::engine::SyncEngine;
use crate::store::SyncMode;

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub paused: bool,
    pub interval_secs: u64,
    pub default_mode: SyncMode,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub next_sync_at: Option<DateTime<Utc>>,
}

pub struct SyncScheduler {
    engine: Arc<SyncEngine>,
    interval: Duration,
    default_mode: SyncMode,
    paused: AtomicBool,
    stop: Arc<Notify>,
    stopped: AtomicBool,
    trigger: Arc<Notify>,
    trigger_mode: Mutex<Option<SyncMode>>,
    task: Mutex<Option<JoinHandle<()>>>,
    last_sync_at: Mutex<Option<DateTime<Utc>>>,
    next_sync_at: Mutex<Option<DateTime<Utc>>>,
}

impl SyncScheduler {
    pub fn new(engine: Arc<SyncEngine>, interval: Duration, default_mode: SyncMode) -> Arc<Self> {
        Arc::new(Self {
            engine,
            interval,
            default_mode,
            paused: AtomicBool::new(false),
            stop: Arc::new(Notify::new()),
            stopped: AtomicBool::new(true),
            trigger: Arc::new(Notify::new()),
            trigger_mode: Mutex::new(None),
            task: Mutex::new(None),
            last_sync_at: Mutex::new(None),
            next_sync_at: Mutex::new(None),
        })
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    /// Start the background loop. A no-op if already running.
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }
        self.stopped.store(false, Ordering::SeqCst);
        let scheduler = self.clone();
        *task = Some(tokio::spawn(async move { scheduler.run_loop().await }));
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "scheduler_started"
        );
    }

    /// Signal the loop to stop and wait for the in-flight cycle (if any)
    /// to finish.
    pub async fn stop(&self) {
        if !self.is_running() {
            return;
        }
        self.stopped.store(true, Ordering::SeqCst);
        self.stop.notify_one();

        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        tracing::info!("scheduler_stopped");
    }

    /// Wake the loop immediately, optionally overriding the cycle mode.
    pub async fn trigger_now(&self, mode: Option<SyncMode>) {
        *self.trigger_mode.lock().await = mode;
        self.trigger.notify_one();
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        tracing::info!("scheduler_paused");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        tracing::info!("scheduler_resumed");
    }

    pub async fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.is_running(),
            paused: self.paused.load(Ordering::SeqCst),
            interval_secs: self.interval.as_secs(),
            default_mode: self.default_mode,
            last_sync_at: *self.last_sync_at.lock().await,
            next_sync_at: *self.next_sync_at.lock().await,
        }
    }

    async fn run_loop(self: Arc<Self>) {
        let mut first_run = true;

        loop {
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }

            if first_run {
                first_run = false;
                *self.next_sync_at.lock().await = Some(Utc::now());
            } else {
                *self.next_sync_at.lock().await =
                    Some(Utc::now() + chrono::Duration::from_std(self.interval).unwrap());

                tokio::select! {
                    _ = tokio::time::sleep(self.interval) => {}
                    _ = self.trigger.notified() => {}
                    _ = self.stop.notified() => {}
                }
            }

            if self.stopped.load(Ordering::SeqCst) {
                break;
            }

            if self.paused.load(Ordering::SeqCst) {
                self.trigger_mode.lock().await.take();
                continue;
            }

            let mode = self.trigger_mode.lock().await.take().unwrap_or(self.default_mode);

            match self.engine.run_sync(Some(mode)).await {
                Ok(_) => {
                    *self.last_sync_at.lock().await = Some(Utc::now());
                }
                Err(crate::error::SyncError::Busy) => {
                    tracing::debug!("scheduled tick skipped, cycle already in flight");
                }
                Err(err) => {
                    tracing::error!(error = %err, "scheduled_sync_failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{NullSession, ServiceClient, Session};
    use crate::config::AppConfig;
    use crate::matcher::RemoteTrack;
    use crate::store::{Service, Store};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct EmptyClient {
        service: Service,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ServiceClient for EmptyClient {
        fn service(&self) -> Service {
            self.service
        }
        async fn open_session(&self) -> crate::error::Result<Box<dyn Session>> {
            Ok(Box::new(NullSession))
        }
        async fn fetch_liked(&self, _since: Option<DateTime<Utc>>) -> crate::error::Result<Vec<RemoteTrack>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
        async fn like(&self, _remote_ids: &[String]) -> crate::error::Result<()> {
            Ok(())
        }
        async fn unlike(&self, _remote_ids: &[String]) -> crate::error::Result<()> {
            Ok(())
        }
        async fn search(&self, _artist: &str, _title: &str) -> crate::error::Result<Option<RemoteTrack>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn first_tick_runs_immediately_without_waiting_for_interval() {
        let store = Store::connect_in_memory().await.unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let client_a = Arc::new(EmptyClient { service: Service::A, calls: calls.clone() });
        let client_b = Arc::new(EmptyClient { service: Service::B, calls: calls.clone() });
        let engine = Arc::new(SyncEngine::new(store, client_a, client_b, &AppConfig::default()));
        let scheduler = SyncScheduler::new(engine, Duration::from_secs(3600), SyncMode::Incremental);

        scheduler.start().await;
        tokio::time::timeout(Duration::from_secs(2), async {
            while calls.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("first tick should fire without waiting for the configured interval");

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn pause_prevents_trigger_from_running_a_cycle() {
        let store = Store::connect_in_memory().await.unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let client_a = Arc::new(EmptyClient { service: Service::A, calls: calls.clone() });
        let client_b = Arc::new(EmptyClient { service: Service::B, calls: calls.clone() });
        let engine = Arc::new(SyncEngine::new(store, client_a, client_b, &AppConfig::default()));
        let scheduler = SyncScheduler::new(engine, Duration::from_secs(3600), SyncMode::Incremental);

        scheduler.start().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.pause();
        let before = calls.load(Ordering::SeqCst);

        scheduler.trigger_now(None).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), before);

        scheduler.stop().await;
    }
}
