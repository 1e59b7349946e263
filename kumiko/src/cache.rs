//! The cache contract and its in-process store.
//!
//! Values are JSON trees so that the admin surface can render them and a
//! distributed driver can serialize them. Expiries are absolute epoch
//! milliseconds. A stale or version-mismatched entry is a miss and is
//! deleted on read.

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use futures::future::BoxFuture;

use crate::{registry::Component, util::now_ms};

pub type CacheValue = serde_json::Value;

/// Write metadata for one entry.
#[derive(Clone, Debug, Default)]
pub struct CacheOptions {
    /// Absolute expiry in epoch milliseconds. `None` never expires.
    pub expiry: Option<u64>,
    /// Version tag. A read that presents a version only hits when the
    /// stored tag equals it.
    pub version: Option<String>,
    /// Ask the producing policy to refresh the entry near expiry. Only
    /// honored by stores that can watch their own expiries.
    pub renewable: bool,
}

impl CacheOptions {
    pub fn new() -> CacheOptions {
        CacheOptions::default()
    }

    pub fn expires_at(mut self, epoch_ms: u64) -> CacheOptions {
        self.expiry = Some(epoch_ms);
        self
    }

    pub fn expires_in(self, ttl: Duration) -> CacheOptions {
        let ms = now_ms().saturating_add(ttl.as_millis() as u64);
        self.expires_at(ms)
    }

    pub fn version(mut self, tag: impl Into<String>) -> CacheOptions {
        self.version = Some(tag.into());
        self
    }

    pub fn renewable(mut self) -> CacheOptions {
        self.renewable = true;
        self
    }
}

/// The outcome of a cache read.
#[derive(Clone, Debug, Default)]
pub struct Cached {
    pub value: Option<CacheValue>,
    pub version: Option<String>,
}

impl Cached {
    pub fn miss() -> Cached {
        Cached::default()
    }

    pub fn hit(&self) -> bool {
        self.value.is_some()
    }
}

/// An abstract key→value store with versioning and pattern queries.
///
/// While disabled, every operation other than `enable`/`disable` behaves
/// as a no-op (reads miss, writes vanish).
pub trait Cache: Send + Sync + 'static {
    fn get<'f>(&'f self, key: &'f str, version: Option<&'f str>) -> BoxFuture<'f, Cached>;

    fn set<'f>(&'f self, key: &'f str, value: CacheValue, opts: CacheOptions) -> BoxFuture<'f, ()>;

    fn delete<'f>(&'f self, key: &'f str) -> BoxFuture<'f, Option<CacheValue>>;

    /// Keys matching a glob pattern (`*`, `?`, `[class]`, `[!class]`).
    fn keys<'f>(&'f self, pattern: &'f str) -> BoxFuture<'f, Vec<String>>;

    fn count<'f>(&'f self, pattern: &'f str) -> BoxFuture<'f, usize>;

    fn enable(&self);

    fn disable(&self);

    fn enabled(&self) -> bool;

    /// Whether this store can watch its own expiries. Renewable entries
    /// degrade to plain ones on stores that cannot.
    fn renew_capable(&self) -> bool {
        false
    }
}

struct Entry {
    value: CacheValue,
    expiry: Option<u64>,
    version: Option<String>,
    #[allow(dead_code)]
    renewable: bool,
}

impl Entry {
    fn live(&self, now: u64) -> bool {
        self.expiry.is_none_or(|at| now < at)
    }
}

/// The in-process cache store.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    disabled: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> MemoryCache {
        MemoryCache::default()
    }

    fn matcher(pattern: &str) -> Option<glob::Pattern> {
        match glob::Pattern::new(pattern) {
            Ok(p) => Some(p),
            Err(e) => {
                log::warn!("bad cache pattern {pattern:?}: {e}");
                None
            }
        }
    }

    /// Drop dead entries, then collect the live keys matching `pattern`.
    fn live_keys(&self, pattern: &str) -> Vec<String> {
        let Some(matcher) = Self::matcher(pattern) else {
            return Vec::new();
        };
        let now = now_ms();
        let mut entries = self.entries.lock().expect("cache poisoned");
        entries.retain(|_, e| e.live(now));
        entries
            .keys()
            .filter(|k| matcher.matches(k))
            .cloned()
            .collect()
    }
}

impl Component for MemoryCache {
    const LABEL: &'static str = "cache";
}

impl Cache for MemoryCache {
    fn get<'f>(&'f self, key: &'f str, version: Option<&'f str>) -> BoxFuture<'f, Cached> {
        Box::pin(async move {
            if !self.enabled() {
                return Cached::miss();
            }
            let mut entries = self.entries.lock().expect("cache poisoned");
            let Some(entry) = entries.get(key) else {
                return Cached::miss();
            };
            let stale = !entry.live(now_ms())
                || version.is_some_and(|v| entry.version.as_deref() != Some(v));
            if stale {
                entries.remove(key);
                return Cached::miss();
            }
            Cached {
                value: Some(entry.value.clone()),
                version: entry.version.clone(),
            }
        })
    }

    fn set<'f>(&'f self, key: &'f str, value: CacheValue, opts: CacheOptions) -> BoxFuture<'f, ()> {
        Box::pin(async move {
            if !self.enabled() {
                return;
            }
            if opts.expiry.is_some_and(|at| at <= now_ms()) {
                return;
            }
            let entry = Entry {
                value,
                expiry: opts.expiry,
                version: opts.version,
                renewable: opts.renewable,
            };
            self.entries
                .lock()
                .expect("cache poisoned")
                .insert(key.to_owned(), entry);
        })
    }

    fn delete<'f>(&'f self, key: &'f str) -> BoxFuture<'f, Option<CacheValue>> {
        Box::pin(async move {
            if !self.enabled() {
                return None;
            }
            let mut entries = self.entries.lock().expect("cache poisoned");
            let prior = entries.remove(key)?;
            prior.live(now_ms()).then_some(prior.value)
        })
    }

    fn keys<'f>(&'f self, pattern: &'f str) -> BoxFuture<'f, Vec<String>> {
        Box::pin(async move {
            if !self.enabled() {
                return Vec::new();
            }
            let mut keys = self.live_keys(pattern);
            keys.sort();
            keys
        })
    }

    fn count<'f>(&'f self, pattern: &'f str) -> BoxFuture<'f, usize> {
        Box::pin(async move {
            if !self.enabled() {
                return 0;
            }
            self.live_keys(pattern).len()
        })
    }

    fn enable(&self) {
        self.disabled.store(false, Ordering::SeqCst);
    }

    fn disable(&self) {
        self.disabled.store(true, Ordering::SeqCst);
    }

    fn enabled(&self) -> bool {
        !self.disabled.load(Ordering::SeqCst)
    }

    fn renew_capable(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn soon() -> CacheOptions {
        CacheOptions::new().expires_in(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn round_trip_within_expiry() {
        let cache = MemoryCache::new();
        cache.set("answer", json!(42), soon()).await;
        let read = cache.get("answer", None).await;
        assert!(read.hit());
        assert_eq!(read.value, Some(json!(42)));
    }

    #[tokio::test]
    async fn expired_entries_miss_and_vanish_from_keys() {
        let cache = MemoryCache::new();
        let opts = CacheOptions::new().expires_at(now_ms() + 30);
        cache.set("blink", json!(1), opts).await;
        assert!(cache.get("blink", None).await.hit());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!cache.get("blink", None).await.hit());
        assert!(cache.keys("*").await.is_empty());
    }

    #[tokio::test]
    async fn set_with_past_expiry_is_a_noop() {
        let cache = MemoryCache::new();
        let opts = CacheOptions::new().expires_at(now_ms().saturating_sub(1000));
        cache.set("gone", json!(1), opts).await;
        assert!(!cache.get("gone", None).await.hit());
        assert_eq!(cache.count("*").await, 0);
    }

    #[tokio::test]
    async fn version_mismatch_is_a_miss_that_deletes() {
        let cache = MemoryCache::new();
        cache.set("v", json!("a"), soon().version("1")).await;
        assert!(cache.get("v", Some("1")).await.hit());

        cache.set("v", json!("a"), soon().version("1")).await;
        assert!(!cache.get("v", Some("2")).await.hit());
        // The mismatched entry was removed on read.
        assert!(!cache.get("v", None).await.hit());
    }

    #[tokio::test]
    async fn unversioned_reads_hit_versioned_entries() {
        let cache = MemoryCache::new();
        cache.set("v", json!("a"), soon().version("1")).await;
        let read = cache.get("v", None).await;
        assert!(read.hit());
        assert_eq!(read.version.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn delete_returns_the_prior_value() {
        let cache = MemoryCache::new();
        cache.set("k", json!([1, 2]), soon()).await;
        assert_eq!(cache.delete("k").await, Some(json!([1, 2])));
        assert_eq!(cache.delete("k").await, None);
    }

    #[tokio::test]
    async fn glob_patterns_filter_keys() {
        let cache = MemoryCache::new();
        for key in ["user#1", "user#2", "order#1", "u"] {
            cache.set(key, json!(null), soon()).await;
        }
        assert_eq!(cache.keys("user#*").await, vec!["user#1", "user#2"]);
        assert_eq!(cache.count("*#?").await, 3);
        assert_eq!(cache.keys("[!u]*").await, vec!["order#1"]);
    }

    #[tokio::test]
    async fn disabled_store_noops_everything() {
        let cache = MemoryCache::new();
        cache.set("k", json!(1), soon()).await;
        cache.disable();

        assert!(!cache.get("k", None).await.hit());
        cache.set("k2", json!(2), soon()).await;
        assert!(cache.keys("*").await.is_empty());
        assert_eq!(cache.count("*").await, 0);
        assert_eq!(cache.delete("k").await, None);

        cache.enable();
        assert!(cache.get("k", None).await.hit());
        assert!(!cache.get("k2", None).await.hit());
    }
}
