//! Simulated hosts contending for one lock
//!
//! Each host opens its own session, takes the lock, counts down its hold
//! time, and releases. An observer logs the candidate set and holder on every
//! change under the lock root.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{error, info, warn};
use zlock_common::CoordinationError;
use zlock_coordination::{CoordinationClient, MemoryCoordinationService};
use zlock_recipe::{CancelSignal, LockConfig, LockError, SequentialLock};

use crate::startup::run_with_shutdown;

/// Demo parameters
#[derive(Debug, Clone)]
pub struct DemoSettings {
    pub hosts: u32,
    pub hold: Duration,
    pub lock: LockConfig,
}

/// How the demo hosts ended
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DemoReport {
    pub completed: usize,
    pub interrupted: usize,
    pub cancelled: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostOutcome {
    Completed,
    Interrupted,
    Cancelled,
    Failed,
}

/// Run all hosts to completion or until `shutdown` fires
pub async fn run(
    service: &MemoryCoordinationService,
    settings: &DemoSettings,
    shutdown: &CancelSignal,
) -> anyhow::Result<DemoReport> {
    info!(
        hosts = settings.hosts,
        hold = ?settings.hold,
        root = %settings.lock.root_path,
        "starting lock demo"
    );

    let observer_stop = CancelSignal::new();
    let observer = tokio::spawn(observe(
        service.clone(),
        settings.lock.clone(),
        observer_stop.clone(),
    ));

    let tasks = (1..=settings.hosts).map(|i| {
        let host_id = format!("host-{}", i);
        tokio::spawn(run_host(
            service.clone(),
            host_id,
            settings.lock.clone(),
            settings.hold,
            shutdown.clone(),
        ))
    });

    let mut report = DemoReport::default();
    for outcome in join_all(tasks).await {
        match outcome {
            Ok(HostOutcome::Completed) => report.completed += 1,
            Ok(HostOutcome::Interrupted) => report.interrupted += 1,
            Ok(HostOutcome::Cancelled) => report.cancelled += 1,
            Ok(HostOutcome::Failed) => report.failed += 1,
            Err(e) => {
                error!("host task panicked: {}", e);
                report.failed += 1;
            }
        }
    }

    observer_stop.cancel();
    if let Err(e) = observer.await {
        warn!("observer task failed: {}", e);
    }

    info!(
        completed = report.completed,
        interrupted = report.interrupted,
        cancelled = report.cancelled,
        failed = report.failed,
        leftover_candidates = service.children_of(&settings.lock.root_path).len(),
        "lock demo finished"
    );
    Ok(report)
}

async fn run_host(
    service: MemoryCoordinationService,
    host_id: String,
    lock_config: LockConfig,
    hold: Duration,
    shutdown: CancelSignal,
) -> HostOutcome {
    let session = service.connect();
    let session_id = session.id();
    let lock = match SequentialLock::with_cancel(
        Arc::new(session),
        &host_id,
        lock_config,
        shutdown.clone(),
    ) {
        Ok(lock) => lock,
        Err(e) => {
            error!(host_id = %host_id, "invalid lock configuration: {}", e);
            return HostOutcome::Failed;
        }
    };
    info!(host_id = %host_id, session = session_id, "host connected, requesting lock");

    let outcome = lock
        .run_exclusive(|| countdown(&host_id, hold, &shutdown))
        .await;
    let outcome = match outcome {
        Ok(true) => HostOutcome::Completed,
        Ok(false) => HostOutcome::Interrupted,
        Err(LockError::Cancelled) => {
            info!(host_id = %host_id, "gave up waiting for the lock");
            HostOutcome::Cancelled
        }
        Err(e) => {
            error!(host_id = %host_id, "lock failed: {}", e);
            HostOutcome::Failed
        }
    };
    // the session closes with the lock
    drop(lock);
    info!(host_id = %host_id, session = session_id, "host disconnected");
    outcome
}

/// Hold the lock for `hold`, logging once per second. Returns false when cut
/// short by shutdown.
async fn countdown(host_id: &str, hold: Duration, shutdown: &CancelSignal) -> bool {
    info!(host_id, "lock acquired, holding for {:?}", hold);
    let mut remaining = hold.as_secs();
    while remaining > 0 {
        info!(host_id, "releasing lock in {}s", remaining);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            _ = shutdown.cancelled() => {
                warn!(host_id, "shutdown while holding the lock, releasing early");
                return false;
            }
        }
        remaining -= 1;
    }
    true
}

/// Log the candidates and the holder every time the root's children change
async fn observe(service: MemoryCoordinationService, lock_config: LockConfig, stop: CancelSignal) {
    let root = lock_config.root_path.clone();
    let client: Arc<dyn CoordinationClient> = Arc::new(service.connect());
    let lock = match SequentialLock::new(client.clone(), "observer", lock_config) {
        Ok(lock) => lock,
        Err(e) => {
            warn!("observer disabled: {}", e);
            return;
        }
    };

    loop {
        let watch = match client.watch_children(&root).await {
            Ok(watch) => watch,
            Err(CoordinationError::NoSuchNode(_)) => {
                // the first host has not created the root yet
                if run_with_shutdown(tokio::time::sleep(Duration::from_millis(50)), &stop)
                    .await
                    .is_none()
                {
                    return;
                }
                continue;
            }
            Err(e) => {
                warn!(root = %root, "observer stopped: {}", e);
                return;
            }
        };

        let Some(event) = run_with_shutdown(watch, &stop).await else {
            return;
        };
        let Ok(event) = event else {
            continue;
        };

        info!(root = %root, children = ?event.children, "lock candidates changed");
        match lock.current_holder().await {
            Ok(Some(holder)) => {
                info!(root = %root, holder = %holder.host_id, candidate = %holder.node_path, "lock held")
            }
            Ok(None) => info!(root = %root, "lock is free"),
            Err(e) => warn!(root = %root, "could not read lock holder: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(hosts: u32) -> DemoSettings {
        DemoSettings {
            hosts,
            hold: Duration::ZERO,
            lock: LockConfig::default().with_poll_interval(10, 40),
        }
    }

    #[tokio::test]
    async fn test_every_host_gets_the_lock_once() {
        let service = MemoryCoordinationService::new();
        let report = run(&service, &settings(4), &CancelSignal::new())
            .await
            .unwrap();

        assert_eq!(report.completed, 4);
        assert_eq!(report.failed, 0);
        assert!(service.children_of("/locks").is_empty());
        assert_eq!(service.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_before_start_cancels_hosts() {
        let service = MemoryCoordinationService::new();
        let shutdown = CancelSignal::new();
        shutdown.cancel();

        let report = run(&service, &settings(3), &shutdown).await.unwrap();

        assert_eq!(report.cancelled, 3);
        assert_eq!(report.completed, 0);
        assert!(service.children_of("/locks").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_runs_full_hold() {
        let shutdown = CancelSignal::new();
        let started = tokio::time::Instant::now();

        assert!(countdown("host-1", Duration::from_secs(3), &shutdown).await);
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_countdown_stops_on_shutdown() {
        let shutdown = CancelSignal::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        assert!(!countdown("host-1", Duration::from_secs(60), &shutdown).await);
    }
}
