//! Scoped value propagation.
//!
//! A carrier binding is visible for the dynamic extent of a [`Scoped::run`]
//! call on the current task, across any `.await` points inside it. Request
//! contexts, transactions, and the loaded configuration travel this way
//! instead of being threaded through every signature. There is no way to
//! install a value other than entering a `run` scope, so parallel tests and
//! sub-contexts never observe each other's bindings.

use std::{
    any::Any,
    cell::RefCell,
    collections::HashMap,
    future::Future,
    marker::PhantomData,
    sync::{Arc, RwLock},
};

use crate::error::{Error, Result};

/// The reserved carrier name under which the loaded configuration is bound
/// before any component is instantiated.
pub const CONFIGS: &str = "Configs";

type Value = Arc<dyn Any + Send + Sync>;

/// One active binding. Nested scopes share the slot so that `set` calls
/// made inside an unrelated inner scope stay visible to the outer one.
type Slot = Arc<RwLock<Value>>;

#[derive(Clone, Default)]
struct FrameMap {
    slots: HashMap<String, Vec<Slot>>,
}

impl FrameMap {
    fn innermost(&self, name: &str) -> Option<&Slot> {
        self.slots.get(name).and_then(|stack| stack.last())
    }

    fn push(&mut self, name: &str, value: Value) {
        self.slots
            .entry(name.to_owned())
            .or_default()
            .push(Arc::new(RwLock::new(value)));
    }

    /// Copy for a forked task: same values, fresh slots, so mutations in
    /// the fork are not observable in the parent.
    fn forked(&self) -> FrameMap {
        let slots = self
            .slots
            .iter()
            .map(|(name, stack)| {
                let stack = stack
                    .iter()
                    .map(|slot| {
                        let value = slot.read().expect("carrier slot poisoned").clone();
                        Arc::new(RwLock::new(value))
                    })
                    .collect();
                (name.clone(), stack)
            })
            .collect();
        FrameMap { slots }
    }
}

tokio::task_local! {
    static FRAMES: RefCell<FrameMap>;
}

fn snapshot() -> FrameMap {
    FRAMES
        .try_with(|frames| frames.borrow().clone())
        .unwrap_or_default()
}

/// A typed handle to a named carrier slot.
///
/// Handles are cheap and idempotent: two handles with the same name are
/// equivalent.
#[derive(Clone)]
pub struct Scoped<T> {
    name: String,
    _marker: PhantomData<fn() -> T>,
}

/// Obtain a typed handle to the named slot.
pub fn scoped<T>(name: impl Into<String>) -> Scoped<T> {
    Scoped {
        name: name.into(),
        _marker: PhantomData,
    }
}

impl<T: Clone + Send + Sync + 'static> Scoped<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute `f` with the handle bound to `value`, returning its result.
    ///
    /// Nested runs stack; on any exit (normal, failure, or cancellation)
    /// the outer binding is restored exactly.
    pub async fn run<F: Future>(&self, value: T, f: F) -> F::Output {
        let mut map = snapshot();
        map.push(&self.name, Arc::new(value));
        FRAMES.scope(RefCell::new(map), f).await
    }

    /// Synchronous variant of [`run`](Self::run) for non-async extents.
    pub fn run_sync<R>(&self, value: T, f: impl FnOnce() -> R) -> R {
        let mut map = snapshot();
        map.push(&self.name, Arc::new(value));
        FRAMES.sync_scope(RefCell::new(map), f)
    }

    /// Read the innermost active binding, if any.
    pub fn get(&self) -> Option<T> {
        let value = FRAMES
            .try_with(|frames| {
                frames
                    .borrow()
                    .innermost(&self.name)
                    .map(|slot| slot.read().expect("carrier slot poisoned").clone())
            })
            .ok()
            .flatten()?;
        value.downcast::<T>().ok().map(|v| (*v).clone())
    }

    /// Read the innermost active binding, or fail if none is active.
    pub fn get_or_fail(&self) -> Result<T> {
        self.get()
            .ok_or_else(|| Error::NoBindingInScope(self.name.clone()))
    }

    /// Replace the innermost binding within the current run.
    ///
    /// Outside any `run` for this name, this fails with `NoBindingInScope`.
    pub fn set(&self, value: T) -> Result<()> {
        let replaced = FRAMES
            .try_with(|frames| match frames.borrow().innermost(&self.name) {
                Some(slot) => {
                    *slot.write().expect("carrier slot poisoned") = Arc::new(value);
                    true
                }
                None => false,
            })
            .unwrap_or(false);
        if replaced {
            Ok(())
        } else {
            Err(Error::NoBindingInScope(self.name.clone()))
        }
    }
}

/// Wrap a future for `tokio::spawn` so the forked task inherits the
/// bindings active at fork time.
///
/// The fork gets its own slots: later `set` calls on either side are not
/// observable on the other.
pub fn fork<F: Future>(f: F) -> impl Future<Output = F::Output> {
    let map = snapshot().forked();
    FRAMES.scope(RefCell::new(map), f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn nested_runs_stack_and_restore() {
        let slot = scoped::<u32>("depth");
        slot.run(1, async {
            assert_eq!(slot.get(), Some(1));
            slot.run(2, async {
                assert_eq!(slot.get(), Some(2));
            })
            .await;
            assert_eq!(slot.get(), Some(1));
        })
        .await;
        assert_eq!(slot.get(), None);
    }

    #[tokio::test]
    async fn set_replaces_innermost_binding() {
        let slot = scoped::<&'static str>("mode");
        slot.run("initial", async {
            slot.set("replaced").unwrap();
            assert_eq!(slot.get(), Some("replaced"));
        })
        .await;
    }

    #[tokio::test]
    async fn set_survives_an_inner_scope_of_another_name() {
        let outer = scoped::<u32>("outer");
        let inner = scoped::<u32>("inner");
        outer
            .run(1, async {
                inner
                    .run(10, async {
                        outer.set(2).unwrap();
                    })
                    .await;
                assert_eq!(outer.get(), Some(2));
            })
            .await;
    }

    #[tokio::test]
    async fn set_outside_any_run_fails() {
        let slot = scoped::<u32>("unbound");
        let err = slot.set(7).unwrap_err();
        assert!(matches!(err, Error::NoBindingInScope(_)));
    }

    #[tokio::test]
    async fn get_or_fail_without_binding() {
        let slot = scoped::<u32>("missing");
        assert!(matches!(
            slot.get_or_fail(),
            Err(Error::NoBindingInScope(_))
        ));
    }

    #[tokio::test]
    async fn forked_task_inherits_without_leaking_back() {
        let slot = scoped::<u32>("forked");
        slot.run(41, async {
            let handle = tokio::spawn(fork(async {
                let slot = scoped::<u32>("forked");
                assert_eq!(slot.get(), Some(41));
                slot.set(99).unwrap();
                slot.get()
            }));
            assert_eq!(handle.await.unwrap(), Some(99));
            assert_eq!(slot.get(), Some(41));
        })
        .await;
    }

    #[tokio::test]
    async fn concurrent_runs_see_independent_stacks() {
        let a = tokio::spawn(async {
            let slot = scoped::<u32>("shared-name");
            slot.run(1, async {
                tokio::task::yield_now().await;
                slot.get()
            })
            .await
        });
        let b = tokio::spawn(async {
            let slot = scoped::<u32>("shared-name");
            slot.run(2, async {
                tokio::task::yield_now().await;
                slot.get()
            })
            .await
        });
        assert_eq!(a.await.unwrap(), Some(1));
        assert_eq!(b.await.unwrap(), Some(2));
    }

    #[test]
    fn run_sync_binds_for_the_closure_extent() {
        let slot = scoped::<u32>("sync");
        let seen = slot.run_sync(5, || slot.get());
        assert_eq!(seen, Some(5));
        assert_eq!(slot.get(), None);
    }
}
