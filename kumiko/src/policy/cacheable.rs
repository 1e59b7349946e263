//! The caching policy.

use std::{future::Future, sync::Arc, time::Duration};

use serde::{Serialize, de::DeserializeOwned};

use crate::{
    cache::{Cache, CacheOptions},
    error::Result,
    policy::key::{CacheSource, KeySpec, arg_values},
    shutdown::{Workload, workload},
    util::now_ms,
};

type Observer = Arc<dyn Fn(&str) + Send + Sync>;

/// Cache write options, fixed or recomputed per call.
#[derive(Clone)]
pub enum OptionsSource {
    Fixed(CacheOptions),
    Supplier(Arc<dyn Fn() -> CacheOptions + Send + Sync>),
}

impl OptionsSource {
    pub(crate) fn materialize(&self) -> CacheOptions {
        match self {
            OptionsSource::Fixed(opts) => opts.clone(),
            OptionsSource::Supplier(f) => f(),
        }
    }
}

impl From<CacheOptions> for OptionsSource {
    fn from(opts: CacheOptions) -> Self {
        OptionsSource::Fixed(opts)
    }
}

/// Wraps a method so its results are served from a cache store.
///
/// On each call: resolve the store (straight delegation while disabled),
/// derive the key, and consult the store. A hit returns the stored value
/// and fires `on_hit`; a miss runs the body, stores the result under the
/// configured options, fires `on_miss`, and returns it. Concurrent misses
/// are not deduplicated — compose a [`Lockable`](crate::policy::Lockable)
/// above this when coalescing matters.
pub struct Cacheable {
    class: String,
    method: String,
    store: CacheSource,
    key: KeySpec,
    options: OptionsSource,
    on_hit: Option<Observer>,
    on_miss: Option<Observer>,
    work: Workload,
}

impl Cacheable {
    pub fn new(class: &str, method: &str, store: CacheSource) -> Cacheable {
        Cacheable {
            class: class.to_owned(),
            method: method.to_owned(),
            store,
            key: KeySpec::default(),
            options: OptionsSource::Fixed(CacheOptions::default()),
            on_hit: None,
            on_miss: None,
            work: workload(),
        }
    }

    pub fn key(mut self, key: KeySpec) -> Cacheable {
        self.key = key;
        self
    }

    pub fn options(mut self, options: impl Into<OptionsSource>) -> Cacheable {
        self.options = options.into();
        self
    }

    pub fn options_with(mut self, f: impl Fn() -> CacheOptions + Send + Sync + 'static) -> Cacheable {
        self.options = OptionsSource::Supplier(Arc::new(f));
        self
    }

    pub fn on_hit(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Cacheable {
        self.on_hit = Some(Arc::new(f));
        self
    }

    pub fn on_miss(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Cacheable {
        self.on_miss = Some(Arc::new(f));
        self
    }

    /// Background refreshers spawn through this workload.
    pub fn workload(mut self, work: Workload) -> Cacheable {
        self.work = work;
        self
    }

    pub async fn call<A, T, F, Fut>(&self, args: A, body: F) -> Result<T>
    where
        A: Serialize + Clone + Send + Sync + 'static,
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let store = self.store.resolve().await?;
        if !store.enabled() {
            return body(args).await;
        }
        let opts = self.options.materialize();
        let arg_list = arg_values(&args)?;
        let key = self.key.render(&self.class, &self.method, &arg_list);

        let cached = store.get(&key, opts.version.as_deref()).await;
        if let Some(value) = cached.value {
            let out: T = serde_json::from_value(value)?;
            if let Some(hit) = &self.on_hit {
                hit(&key);
            }
            return Ok(out);
        }

        let result = body(args.clone()).await?;
        store.set(&key, serde_json::to_value(&result)?, opts.clone()).await;
        if opts.renewable && store.renew_capable() {
            self.arm_refresh(store, key.clone(), opts, args, body);
        }
        if let Some(miss) = &self.on_miss {
            miss(&key);
        }
        Ok(result)
    }

    /// Keep a renewable entry warm: re-invoke the body at 90% of the
    /// entry's lifetime and overwrite it, until the key disappears or the
    /// store is disabled.
    fn arm_refresh<A, T, F, Fut>(
        &self,
        store: Arc<dyn Cache>,
        key: String,
        opts: CacheOptions,
        args: A,
        body: F,
    ) where
        A: Serialize + Clone + Send + Sync + 'static,
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let Some(expiry) = opts.expiry else {
            return;
        };
        let period = expiry.saturating_sub(now_ms());
        if period == 0 {
            return;
        }
        let lead = Duration::from_millis(period - period / 10);
        self.work.spawn_cancellable(async move {
            loop {
                tokio::time::sleep(lead).await;
                if !store.enabled() || !store.get(&key, None).await.hit() {
                    break;
                }
                match body(args.clone()).await {
                    Ok(result) => match serde_json::to_value(&result) {
                        Ok(value) => {
                            let mut next = opts.clone();
                            next.expiry = Some(now_ms() + period);
                            store.set(&key, value, next).await;
                            log::debug!("refreshed cache entry {key}");
                        }
                        Err(e) => {
                            log::warn!("refresh of {key} produced unserializable value: {e}");
                            break;
                        }
                    },
                    Err(e) => {
                        log::warn!("refresh of {key} failed: {e}");
                        break;
                    }
                }
            }
        });
    }
}
