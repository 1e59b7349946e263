//! End-to-end scenarios across the public surface.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::future::{BoxFuture, join_all};
use kumiko::{
    Cache, CacheOptions, CacheSource, Cacheable, Component, Error, Hooks, KeyGen, KeySpec, Lock,
    LockOptions, LockSource, Lockable, MemoryCache, MemoryLock, Registry, Result, Runner,
    Scheduler, TaskDecl, Workload, scheduler::log_sink,
};
use tokio::time::Instant;

static LIFECYCLE_TRACE: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

fn record(step: &'static str) {
    LIFECYCLE_TRACE.lock().unwrap().push(step);
}

struct Ordered;

impl Component for Ordered {
    const LABEL: &'static str = "ordered";

    fn hooks() -> Hooks {
        Hooks::new()
            .before_init(|| {
                Box::pin(async {
                    record("A");
                    Ok(())
                })
            })
            .after_init(|| {
                Box::pin(async {
                    record("C");
                    Ok(())
                })
            })
            .before_destroy(|| {
                Box::pin(async {
                    record("D");
                    Ok(())
                })
            })
    }

    fn on_init(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async {
            record("B");
            Ok(())
        })
    }

    fn on_stop(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async {
            record("E");
            Ok(())
        })
    }
}

// S1: the full lifecycle of one component is A, B, C on the way up and
// D, E on the way down.
#[tokio::test]
async fn lifecycle_order_is_observed() {
    let registry = Registry::new();
    registry.install(Ordered).await.unwrap();
    registry.destroy("ordered").await.unwrap();
    assert_eq!(*LIFECYCLE_TRACE.lock().unwrap(), vec!["A", "B", "C", "D", "E"]);
}

struct Shared;

impl Component for Shared {
    const LABEL: &'static str = "shared";
}

// S2: repeated installs yield one instance, and lookup returns it.
#[tokio::test]
async fn singleton_identity_is_preserved() {
    let registry = Registry::new();
    let first = registry.install(Shared).await.unwrap();
    let second = registry.install(Shared).await.unwrap();
    let looked_up = registry.get::<Shared>().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &looked_up));
}

// S3: a cached pure method runs its body once; the second call is a hit.
#[tokio::test]
async fn cacheable_hit_runs_the_body_once() {
    let store: Arc<dyn Cache> = Arc::new(MemoryCache::new());
    let body_runs = Arc::new(AtomicUsize::new(0));
    let hits = Arc::new(AtomicUsize::new(0));
    let observed = hits.clone();
    let policy = Cacheable::new("Answers", "ultimate", CacheSource::instance(store))
        .options(CacheOptions::new().expires_in(Duration::from_secs(60)))
        .on_hit(move |_| {
            observed.fetch_add(1, Ordering::SeqCst);
        });

    for _ in 0..2 {
        let runs = body_runs.clone();
        let out = policy
            .call((), move |_| {
                let runs = runs.clone();
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(42u32)
                }
            })
            .await
            .unwrap();
        assert_eq!(out, 42);
    }
    assert_eq!(body_runs.load(Ordering::SeqCst), 1);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

// S4: five concurrent calls through a constant-key Lockable run in
// disjoint intervals, so the total elapsed time is at least 5 × 50 ms.
#[tokio::test(start_paused = true)]
async fn lockable_serializes_concurrent_calls() {
    let lock: Arc<dyn Lock> = Arc::new(MemoryLock::new());
    let policy = Arc::new(
        Lockable::new("Tally", "bump", LockSource::instance(lock))
            .key(KeySpec::Generated(KeyGen::custom(|_, _, _| "K".to_owned())))
            .options(LockOptions::new().timeout(Duration::from_secs(10))),
    );
    let intervals: Arc<Mutex<Vec<(Instant, Instant)>>> = Arc::new(Mutex::new(Vec::new()));

    let begun = Instant::now();
    let calls = (0..5).map(|i| {
        let policy = policy.clone();
        let intervals = intervals.clone();
        async move {
            policy
                .call(i, move |_| {
                    let intervals = intervals.clone();
                    async move {
                        let entered = Instant::now();
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        intervals.lock().unwrap().push((entered, Instant::now()));
                        Ok(())
                    }
                })
                .await
        }
    });
    for outcome in join_all(calls).await {
        outcome.unwrap();
    }

    assert!(begun.elapsed() >= Duration::from_millis(250));
    let intervals = intervals.lock().unwrap();
    assert_eq!(intervals.len(), 5);
    for (i, a) in intervals.iter().enumerate() {
        for b in intervals.iter().skip(i + 1) {
            assert!(a.1 <= b.0 || b.1 <= a.0, "intervals overlap");
        }
    }
}

// S5: with the lock pre-held by another author, acquisition times out in
// its configured window and leaves the holder untouched.
#[tokio::test(start_paused = true)]
async fn lock_timeout_leaves_the_holder_alone() {
    let lock = Arc::new(MemoryLock::new());
    lock.lock("Tally#bump", &LockOptions::new().auth("A")).await;

    let policy = Lockable::new("Tally", "bump", LockSource::instance(lock.clone()))
        .options(LockOptions::new().timeout(Duration::from_millis(100)));

    let begun = Instant::now();
    let err = policy.call((), |_| async { Ok(()) }).await.unwrap_err();
    let waited = begun.elapsed();

    match err {
        Error::LockTimeout { key, timeout } => {
            assert_eq!(key, "Tally#bump");
            assert_eq!(timeout, Duration::from_millis(100));
        }
        other => panic!("expected LockTimeout, got {other}"),
    }
    assert!(waited >= Duration::from_millis(100));
    assert!(waited <= Duration::from_millis(250));
    assert!(lock.locked("Tally#bump").await);
    assert!(!lock.unlock("Tally#bump", Some("B")).await);
}

#[derive(Default)]
struct Pulse;

impl Component for Pulse {
    const LABEL: &'static str = "pulse";
}

impl Runner for Pulse {
    fn tasks() -> Vec<TaskDecl<Self>> {
        vec![TaskDecl::new("beat", "* * * * * *", |_| async { Ok(()) })]
    }
}

// S6: destroying a runner stops its schedule; no further `started`
// events are emitted afterwards.
#[tokio::test]
async fn destroyed_runners_fire_no_more() {
    let registry = Registry::new();
    let work = Workload::new();
    let scheduler = Scheduler::configured(work.clone(), log_sink());
    scheduler.mount(&registry, Pulse::default).await.unwrap();

    let starts = Arc::new(AtomicUsize::new(0));
    {
        let starts = starts.clone();
        scheduler.events("pulse").unwrap().on_started(move |_| {
            starts.fetch_add(1, Ordering::SeqCst);
        });
    }

    // Let the schedule prove it is alive, then destroy the runner.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(starts.load(Ordering::SeqCst) >= 1);
    scheduler.destroy(&registry, "pulse").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let after_destroy = starts.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(starts.load(Ordering::SeqCst), after_destroy);
    assert!(registry.is_empty());
}
