//! Key derivation and lazy collaborator resolution shared by the policies.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;

use crate::{
    cache::{Cache, CacheValue},
    error::Result,
    lock::Lock,
    registry::{Component, Registry, global},
    scheduler::CronStore,
};

/// Joins key parts. Not a legal character in any Rust identifier, so a
/// generated key can never collide with a differently-shaped call.
pub const KEY_SEPARATOR: char = '#';

/// A pure function from (class-name, method-name, arguments…) to a key.
#[derive(Clone)]
pub struct KeyGen(Arc<dyn Fn(&str, &str, &[CacheValue]) -> String + Send + Sync>);

impl KeyGen {
    /// The default generator: parts joined with [`KEY_SEPARATOR`], string
    /// arguments rendered bare, everything else as JSON.
    pub fn joined() -> KeyGen {
        KeyGen(Arc::new(|class, method, args| {
            let mut key = format!("{class}{KEY_SEPARATOR}{method}");
            for arg in args {
                key.push(KEY_SEPARATOR);
                match arg {
                    CacheValue::String(s) => key.push_str(s),
                    other => key.push_str(&other.to_string()),
                }
            }
            key
        }))
    }

    /// Substitute any pure generator, e.g. for arguments that do not
    /// stringify usefully.
    pub fn custom(f: impl Fn(&str, &str, &[CacheValue]) -> String + Send + Sync + 'static) -> KeyGen {
        KeyGen(Arc::new(f))
    }

    pub fn generate(&self, class: &str, method: &str, args: &[CacheValue]) -> String {
        (self.0)(class, method, args)
    }
}

impl Default for KeyGen {
    fn default() -> Self {
        KeyGen::joined()
    }
}

/// Where a policy's key comes from: a literal, or a generator over the
/// call's class, method, and arguments.
#[derive(Clone)]
pub enum KeySpec {
    Literal(String),
    Generated(KeyGen),
}

impl KeySpec {
    pub fn literal(key: impl Into<String>) -> KeySpec {
        KeySpec::Literal(key.into())
    }

    pub fn generated() -> KeySpec {
        KeySpec::Generated(KeyGen::joined())
    }

    pub(crate) fn render(&self, class: &str, method: &str, args: &[CacheValue]) -> String {
        match self {
            KeySpec::Literal(key) => key.clone(),
            KeySpec::Generated(keygen) => keygen.generate(class, method, args),
        }
    }
}

impl Default for KeySpec {
    fn default() -> Self {
        KeySpec::generated()
    }
}

/// Serialize a call's arguments into a value list for key generation.
/// Tuples flatten to their elements; a unit argument contributes nothing.
pub(crate) fn arg_values<A: Serialize>(args: &A) -> Result<Vec<CacheValue>> {
    Ok(match serde_json::to_value(args)? {
        CacheValue::Array(list) => list,
        CacheValue::Null => Vec::new(),
        single => vec![single],
    })
}

type Resolver<S> = Arc<dyn Fn() -> BoxFuture<'static, Result<Arc<S>>> + Send + Sync>;

/// A lazily resolved collaborator: a direct instance, a component looked
/// up in a registry at call time, or an arbitrary supplier.
pub struct Source<S: ?Sized>(Resolver<S>);

impl<S: ?Sized> Clone for Source<S> {
    fn clone(&self) -> Self {
        Source(self.0.clone())
    }
}

impl<S: ?Sized + Send + Sync + 'static> Source<S> {
    pub fn instance(instance: Arc<S>) -> Source<S> {
        Source(Arc::new(move || {
            let instance = instance.clone();
            Box::pin(async move { Ok(instance) })
        }))
    }

    pub fn with(supplier: impl Fn() -> Arc<S> + Send + Sync + 'static) -> Source<S> {
        Source(Arc::new(move || {
            let instance = supplier();
            Box::pin(async move { Ok(instance) })
        }))
    }

    pub(crate) async fn resolve(&self) -> Result<Arc<S>> {
        (self.0)().await
    }
}

pub type CacheSource = Source<dyn Cache>;
pub type LockSource = Source<dyn Lock>;
pub type CronSource = Source<dyn CronStore>;

impl Source<dyn Cache> {
    /// Resolve the component type from the process-wide registry at call
    /// time (constructing it if marked auto).
    pub fn component<C: Cache + Component>() -> CacheSource {
        Self::component_in::<C>(global())
    }

    pub fn component_in<C: Cache + Component>(registry: Registry) -> CacheSource {
        Source(Arc::new(move || {
            let registry = registry.clone();
            Box::pin(async move {
                let store: Arc<dyn Cache> = registry.resolve::<C>().await?;
                Ok(store)
            })
        }))
    }
}

impl Source<dyn Lock> {
    pub fn component<C: Lock + Component>() -> LockSource {
        Self::component_in::<C>(global())
    }

    pub fn component_in<C: Lock + Component>(registry: Registry) -> LockSource {
        Source(Arc::new(move || {
            let registry = registry.clone();
            Box::pin(async move {
                let lock: Arc<dyn Lock> = registry.resolve::<C>().await?;
                Ok(lock)
            })
        }))
    }
}

impl Source<dyn CronStore> {
    pub fn component<C: CronStore + Component>() -> CronSource {
        Self::component_in::<C>(global())
    }

    pub fn component_in<C: CronStore + Component>(registry: Registry) -> CronSource {
        Source(Arc::new(move || {
            let registry = registry.clone();
            Box::pin(async move {
                let store: Arc<dyn CronStore> = registry.resolve::<C>().await?;
                Ok(store)
            })
        }))
    }
}
