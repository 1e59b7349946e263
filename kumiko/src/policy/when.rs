//! Conditional execution.

use std::{future::Future, sync::Arc};

use futures::future::BoxFuture;

use crate::error::{Error, Result};

/// A predicate evaluated per call: a constant, a function, or an async
/// function.
#[derive(Clone)]
pub enum Predicate {
    Value(bool),
    Fn(Arc<dyn Fn() -> bool + Send + Sync>),
    Async(Arc<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>),
}

impl Predicate {
    async fn eval(&self) -> bool {
        match self {
            Predicate::Value(v) => *v,
            Predicate::Fn(f) => f(),
            Predicate::Async(f) => f().await,
        }
    }
}

/// Wraps a body with a guard predicate. A falsy predicate raises
/// [`ConditionNotMet`](Error::ConditionNotMet) instead of delegating —
/// dev-only endpoints and enable-flag guards live behind this.
pub struct When {
    predicate: Predicate,
}

impl When {
    pub fn value(enabled: bool) -> When {
        When {
            predicate: Predicate::Value(enabled),
        }
    }

    pub fn with(f: impl Fn() -> bool + Send + Sync + 'static) -> When {
        When {
            predicate: Predicate::Fn(Arc::new(f)),
        }
    }

    pub fn with_async(f: impl Fn() -> BoxFuture<'static, bool> + Send + Sync + 'static) -> When {
        When {
            predicate: Predicate::Async(Arc::new(f)),
        }
    }

    pub async fn call<T, F, Fut>(&self, body: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.predicate.eval().await {
            body().await
        } else {
            Err(Error::ConditionNotMet)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[tokio::test]
    async fn truthy_predicates_delegate() {
        let when = When::value(true);
        assert_eq!(when.call(|| async { Ok(7) }).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn falsy_predicates_raise_condition_not_met() {
        let when = When::value(false);
        let err = when.call(|| async { Ok(7) }).await.unwrap_err();
        assert!(matches!(err, Error::ConditionNotMet));
    }

    #[tokio::test]
    async fn function_predicates_are_evaluated_per_call() {
        let flag = Arc::new(AtomicBool::new(false));
        let read = flag.clone();
        let when = When::with(move || read.load(Ordering::SeqCst));

        assert!(when.call(|| async { Ok(()) }).await.is_err());
        flag.store(true, Ordering::SeqCst);
        assert!(when.call(|| async { Ok(()) }).await.is_ok());
    }

    #[tokio::test]
    async fn async_predicates_may_suspend() {
        let when = When::with_async(|| {
            Box::pin(async {
                tokio::task::yield_now().await;
                true
            })
        });
        assert!(when.call(|| async { Ok(()) }).await.is_ok());
    }
}
