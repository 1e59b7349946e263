//! Graceful teardown.
//!
//! All framework background work (cron timers, cache refreshers, the admin
//! server) is spawned through a [`Workload`] so the supervisor can tell
//! when the process has actually gone quiet. On SIGINT/SIGTERM (or an
//! in-process request from the admin surface) every registered component
//! is destroyed, then the supervisor polls for quiescence: an empty
//! registry and a drained workload. A hard deadline forces exit either
//! way.

use std::{
    future::Future,
    sync::LazyLock,
    time::Duration,
};

use tokio::{task::JoinHandle, time::Instant};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::registry::Registry;

/// The default hard deadline for a graceful shutdown.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(20);

const POLL: Duration = Duration::from_millis(50);

static GLOBAL: LazyLock<Workload> = LazyLock::new(Workload::new);

/// The process-wide workload used by the entry point and default
/// collaborators.
pub fn workload() -> Workload {
    GLOBAL.clone()
}

/// A tracked set of background tasks plus the shutdown signal they watch.
/// Cheap to clone; clones share the same tracker and signal.
#[derive(Clone, Default)]
pub struct Workload {
    tracker: TaskTracker,
    token: CancellationToken,
}

impl Workload {
    pub fn new() -> Workload {
        Workload::default()
    }

    /// Spawn tracked work that is expected to wind itself down when
    /// shutdown is requested.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(fut)
    }

    /// Spawn tracked work that is simply dropped at shutdown. For
    /// disposable background work such as cache refreshers.
    pub fn spawn_cancellable<F>(&self, fut: F) -> JoinHandle<()>
    where
        F: Future + Send + 'static,
    {
        let token = self.token.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = fut => {}
            }
        })
    }

    /// Number of tracked tasks still running.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    pub fn idle(&self) -> bool {
        self.tracker.is_empty()
    }

    /// Ask for a graceful shutdown (what the admin surface's `DELETE /`
    /// does).
    pub fn request_shutdown(&self) {
        self.token.cancel();
    }

    /// Resolves once shutdown has been requested.
    pub async fn shutdown_requested(&self) {
        self.token.cancelled().await;
    }
}

/// Wait for SIGINT, SIGTERM, or an in-process shutdown request, then tear
/// the registry down. Returns the process exit code.
pub async fn supervise(registry: Registry, work: Workload, deadline: Duration) -> i32 {
    wait_for_signal(&work).await;
    log::info!("shutdown requested");
    teardown(&registry, &work, deadline).await
}

async fn wait_for_signal(work: &Workload) {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("could not install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
            _ = work.shutdown_requested() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::select! {
        _ = ctrl_c => {}
        _ = work.shutdown_requested() => {}
    }
}

/// Destroy every registered component, then poll for quiescence.
///
/// Per-component failures are logged and do not abort the loop; one bad
/// `on_stop` cannot block the rest. Exit code 0 means the registry
/// emptied and the workload drained before the deadline; 1 means the
/// deadline forced the exit.
pub async fn teardown(registry: &Registry, work: &Workload, deadline: Duration) -> i32 {
    work.request_shutdown();
    for label in registry.labels() {
        if let Err(e) = registry.destroy(&label).await {
            log::error!("teardown of {label} failed: {e}");
        }
    }

    let started = Instant::now();
    loop {
        if registry.is_empty() && work.idle() {
            log::info!("shutdown complete");
            return 0;
        }
        if started.elapsed() >= deadline {
            log::error!(
                "shutdown deadline exceeded ({} components, {} tasks left); forcing exit",
                registry.len(),
                work.pending()
            );
            return 1;
        }
        tokio::time::sleep(POLL).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    };

    use futures::future::BoxFuture;

    use super::*;
    use crate::{error::Result, registry::Component};

    struct Quiet;
    impl Component for Quiet {
        const LABEL: &'static str = "quiet";
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_empties_the_registry_and_exits_clean() {
        let registry = Registry::new();
        let work = Workload::new();
        registry.install(Quiet).await.unwrap();

        let code = teardown(&registry, &work, Duration::from_secs(20)).await;
        assert_eq!(code, 0);
        assert!(registry.is_empty());
    }

    struct Flaky;
    impl Component for Flaky {
        const LABEL: &'static str = "flaky";

        fn on_stop(&self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Err("pipe burst".into()) })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn one_bad_on_stop_does_not_block_the_rest() {
        let registry = Registry::new();
        let work = Workload::new();
        registry.install(Flaky).await.unwrap();
        registry.install(Quiet).await.unwrap();

        let code = teardown(&registry, &work, Duration::from_secs(20)).await;
        assert_eq!(code, 0);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn lingering_work_hits_the_deadline() {
        let registry = Registry::new();
        let work = Workload::new();
        work.spawn(async {
            // Ignores the shutdown signal on purpose.
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        let code = teardown(&registry, &work, Duration::from_secs(1)).await;
        assert_eq!(code, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellable_work_is_dropped_at_shutdown() {
        let registry = Registry::new();
        let work = Workload::new();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        work.spawn_cancellable(async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            flag.store(true, Ordering::SeqCst);
        });

        let code = teardown(&registry, &work, Duration::from_secs(20)).await;
        assert_eq!(code, 0);
        assert!(!finished.load(Ordering::SeqCst));
    }
}
