//! Named mutual exclusion.
//!
//! A lock entry is a (key, owner-token) pair. The empty token is an
//! anonymous lock anyone may release; a non-empty token restricts release
//! to the party presenting it. Acquisition may wait on a fixed backoff —
//! the only retry loop in the framework.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::Duration,
};

use futures::future::BoxFuture;
use rand::Rng;
use tokio::time::Instant;

use crate::{registry::Component, util::now_ms};

/// The wait tick between acquisition attempts.
const BACKOFF: Duration = Duration::from_millis(100);

#[derive(Clone, Debug, Default)]
pub struct LockOptions {
    /// How long an acquired lock is held before it is considered released.
    /// Distributed drivers require this; the in-process driver honors it.
    pub ttl: Option<Duration>,
    /// How long to wait for a busy lock. Absent or zero means fail fast.
    pub timeout: Option<Duration>,
    /// The owner-token stored on acquisition. Absent means anonymous.
    pub auth: Option<String>,
}

impl LockOptions {
    pub fn new() -> LockOptions {
        LockOptions::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> LockOptions {
        self.ttl = Some(ttl);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> LockOptions {
        self.timeout = Some(timeout);
        self
    }

    pub fn auth(mut self, token: impl Into<String>) -> LockOptions {
        self.auth = Some(token.into());
        self
    }

    /// A fresh random owner-token.
    pub fn random_auth(self) -> LockOptions {
        let token: u64 = rand::rng().random();
        self.auth(format!("{token:016x}"))
    }
}

/// Abstract named mutual exclusion with TTL, authorship, and wait.
pub trait Lock: Send + Sync + 'static {
    /// Attempt to acquire `key`. Waits up to the configured timeout on a
    /// fixed backoff of at most 100 ms per attempt; with no timeout the
    /// first failure is final. Returns whether the lock was acquired.
    fn lock<'f>(&'f self, key: &'f str, opts: &'f LockOptions) -> BoxFuture<'f, bool>;

    /// Release `key`. Succeeds iff the key is held and its owner-token is
    /// empty or equal to `auth`; otherwise the lock is left untouched.
    fn unlock<'f>(&'f self, key: &'f str, auth: Option<&'f str>) -> BoxFuture<'f, bool>;

    fn locked<'f>(&'f self, key: &'f str) -> BoxFuture<'f, bool>;
}

struct Owner {
    token: String,
    expires_at: Option<u64>,
}

impl Owner {
    fn live(&self, now: u64) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// The in-process lock driver.
#[derive(Default)]
pub struct MemoryLock {
    owners: Mutex<HashMap<String, Owner>>,
}

impl MemoryLock {
    pub fn new() -> MemoryLock {
        MemoryLock::default()
    }

    fn try_acquire(&self, key: &str, opts: &LockOptions) -> bool {
        let now = now_ms();
        let mut owners = self.owners.lock().expect("lock table poisoned");
        if owners.get(key).is_some_and(|o| o.live(now)) {
            return false;
        }
        let owner = Owner {
            token: opts.auth.clone().unwrap_or_default(),
            expires_at: opts.ttl.map(|ttl| now + ttl.as_millis() as u64),
        };
        owners.insert(key.to_owned(), owner);
        true
    }
}

impl Component for MemoryLock {
    const LABEL: &'static str = "lock";
}

impl Lock for MemoryLock {
    fn lock<'f>(&'f self, key: &'f str, opts: &'f LockOptions) -> BoxFuture<'f, bool> {
        Box::pin(async move {
            let deadline = opts
                .timeout
                .filter(|t| !t.is_zero())
                .map(|t| Instant::now() + t);
            loop {
                if self.try_acquire(key, opts) {
                    return true;
                }
                let Some(deadline) = deadline else {
                    return false;
                };
                let now = Instant::now();
                if now >= deadline {
                    return false;
                }
                tokio::time::sleep(BACKOFF.min(deadline - now)).await;
            }
        })
    }

    fn unlock<'f>(&'f self, key: &'f str, auth: Option<&'f str>) -> BoxFuture<'f, bool> {
        Box::pin(async move {
            let now = now_ms();
            let mut owners = self.owners.lock().expect("lock table poisoned");
            let Some(owner) = owners.get(key) else {
                return false;
            };
            if !owner.live(now) {
                owners.remove(key);
                return false;
            }
            if owner.token.is_empty() || Some(owner.token.as_str()) == auth {
                owners.remove(key);
                true
            } else {
                false
            }
        })
    }

    fn locked<'f>(&'f self, key: &'f str) -> BoxFuture<'f, bool> {
        Box::pin(async move {
            let owners = self.owners.lock().expect("lock table poisoned");
            owners.get(key).is_some_and(|o| o.live(now_ms()))
        })
    }
}
