//! The distributed-locking policy.

use std::{future::Future, sync::Arc};

use serde::Serialize;

use crate::{
    error::{Error, Result},
    lock::LockOptions,
    policy::key::{KeySpec, LockSource, arg_values},
};

type Observer = Arc<dyn Fn(&str) + Send + Sync>;

/// Lock options, fixed or recomputed per call.
#[derive(Clone)]
pub enum LockOptionsSource {
    Fixed(LockOptions),
    Supplier(Arc<dyn Fn() -> LockOptions + Send + Sync>),
}

impl LockOptionsSource {
    fn materialize(&self) -> LockOptions {
        match self {
            LockOptionsSource::Fixed(opts) => opts.clone(),
            LockOptionsSource::Supplier(f) => f(),
        }
    }
}

impl From<LockOptions> for LockOptionsSource {
    fn from(opts: LockOptions) -> Self {
        LockOptionsSource::Fixed(opts)
    }
}

/// Wraps a method in named mutual exclusion.
///
/// Calls whose generated keys coincide are serialized; different keys
/// proceed concurrently. Acquisition failure raises
/// [`LockTimeout`](Error::LockTimeout) and fires `on_timeout`. Once
/// acquired, the lock is released on every exit path of the body and
/// `on_released` fires, with the body's error propagated unchanged.
pub struct Lockable {
    class: String,
    method: String,
    lock: LockSource,
    key: KeySpec,
    options: LockOptionsSource,
    on_acquired: Option<Observer>,
    on_released: Option<Observer>,
    on_timeout: Option<Observer>,
}

impl Lockable {
    pub fn new(class: &str, method: &str, lock: LockSource) -> Lockable {
        Lockable {
            class: class.to_owned(),
            method: method.to_owned(),
            lock,
            key: KeySpec::default(),
            options: LockOptionsSource::Fixed(LockOptions::default()),
            on_acquired: None,
            on_released: None,
            on_timeout: None,
        }
    }

    pub fn key(mut self, key: KeySpec) -> Lockable {
        self.key = key;
        self
    }

    pub fn options(mut self, options: impl Into<LockOptionsSource>) -> Lockable {
        self.options = options.into();
        self
    }

    pub fn options_with(mut self, f: impl Fn() -> LockOptions + Send + Sync + 'static) -> Lockable {
        self.options = LockOptionsSource::Supplier(Arc::new(f));
        self
    }

    pub fn on_acquired(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Lockable {
        self.on_acquired = Some(Arc::new(f));
        self
    }

    pub fn on_released(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Lockable {
        self.on_released = Some(Arc::new(f));
        self
    }

    pub fn on_timeout(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Lockable {
        self.on_timeout = Some(Arc::new(f));
        self
    }

    pub async fn call<A, T, F, Fut>(&self, args: A, body: F) -> Result<T>
    where
        A: Serialize,
        F: FnOnce(A) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let lock = self.lock.resolve().await?;
        let opts = self.options.materialize();
        let arg_list = arg_values(&args)?;
        let key = self.key.render(&self.class, &self.method, &arg_list);

        if !lock.lock(&key, &opts).await {
            if let Some(timeout) = &self.on_timeout {
                timeout(&key);
            }
            return Err(Error::LockTimeout {
                key,
                timeout: opts.timeout.unwrap_or_default(),
            });
        }
        if let Some(acquired) = &self.on_acquired {
            acquired(&key);
        }

        let result = body(args).await;

        if !lock.unlock(&key, opts.auth.as_deref()).await {
            log::warn!("lock {key} was not released cleanly");
        }
        if let Some(released) = &self.on_released {
            released(&key);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use futures::future::join_all;
    use tokio::time::Instant;

    use super::*;
    use crate::lock::{Lock, MemoryLock};

    fn constant_key() -> KeySpec {
        KeySpec::literal("K")
    }

    #[tokio::test(start_paused = true)]
    async fn identical_keys_serialize_their_bodies() {
        let lock: Arc<dyn Lock> = Arc::new(MemoryLock::new());
        let policy = Arc::new(
            Lockable::new("Job", "step", LockSource::instance(lock))
                .key(constant_key())
                .options(LockOptions::new().timeout(Duration::from_secs(5))),
        );
        let running = Arc::new(AtomicUsize::new(0));
        let overlapped = Arc::new(AtomicUsize::new(0));

        let started = Instant::now();
        let calls = (0..5).map(|_| {
            let policy = policy.clone();
            let running = running.clone();
            let overlapped = overlapped.clone();
            async move {
                policy
                    .call((), |_| async {
                        if running.fetch_add(1, Ordering::SeqCst) > 0 {
                            overlapped.fetch_add(1, Ordering::SeqCst);
                        }
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            }
        });
        for outcome in join_all(calls).await {
            outcome.unwrap();
        }

        assert_eq!(overlapped.load(Ordering::SeqCst), 0);
        assert!(started.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn held_lock_times_out_and_stays_held() {
        let lock = Arc::new(MemoryLock::new());
        lock.lock("Job#step", &LockOptions::new().auth("A")).await;

        let timeouts = Arc::new(AtomicUsize::new(0));
        let observed = timeouts.clone();
        let policy = Lockable::new("Job", "step", LockSource::instance(lock.clone()))
            .options(LockOptions::new().timeout(Duration::from_millis(100)))
            .on_timeout(move |_| {
                observed.fetch_add(1, Ordering::SeqCst);
            });

        let started = Instant::now();
        let err = policy.call((), |_| async { Ok(()) }).await.unwrap_err();
        let waited = started.elapsed();

        assert!(matches!(err, Error::LockTimeout { .. }));
        assert!(waited >= Duration::from_millis(100));
        assert!(waited <= Duration::from_millis(250));
        assert_eq!(timeouts.load(Ordering::SeqCst), 1);
        // The pre-held lock is untouched.
        assert!(lock.locked("Job#step").await);
        assert!(!lock.unlock("Job#step", Some("B")).await);
    }

    #[tokio::test]
    async fn lock_releases_when_the_body_fails() {
        let lock: Arc<dyn Lock> = Arc::new(MemoryLock::new());
        let released = Arc::new(AtomicUsize::new(0));
        let observed = released.clone();
        let policy = Lockable::new("Job", "step", LockSource::instance(lock.clone()))
            .key(constant_key())
            .on_released(move |_| {
                observed.fetch_add(1, Ordering::SeqCst);
            });

        let err = policy
            .call((), |_| async { Err::<(), _>("boom".into()) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(!lock.locked("K").await);
    }

    #[tokio::test]
    async fn different_keys_do_not_contend() {
        let lock: Arc<dyn Lock> = Arc::new(MemoryLock::new());
        let policy = Lockable::new("Job", "step", LockSource::instance(lock));

        // No timeout configured: any contention would fail fast.
        let a = policy.call(1u32, |_| async { Ok(1) });
        let b = policy.call(2u32, |_| async { Ok(2) });
        let (a, b) = tokio::join!(a, b);
        assert_eq!(a.unwrap(), 1);
        assert_eq!(b.unwrap(), 2);
    }
}
