//! Error substitution.

use std::future::Future;

use crate::error::{Error, ErrorKind, Result};

/// Wraps a body so that errors of uncaught kinds are handed to a
/// substitute handler; kinds on the skip list re-propagate unchanged.
#[derive(Clone, Default)]
pub struct CatchError {
    skip: Vec<ErrorKind>,
}

impl CatchError {
    pub fn new() -> CatchError {
        CatchError::default()
    }

    /// Let this kind re-propagate instead of being substituted.
    pub fn skip(mut self, kind: ErrorKind) -> CatchError {
        self.skip.push(kind);
        self
    }

    pub async fn call<T, F, Fut, H>(&self, body: F, handler: H) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
        H: FnOnce(Error) -> Result<T>,
    {
        match body().await {
            Ok(value) => Ok(value),
            Err(e) if self.skip.contains(&e.kind()) => Err(e),
            Err(e) => handler(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn uncaught_errors_are_substituted() {
        let policy = CatchError::new();
        let out = policy
            .call(
                || async { Err::<u32, _>(Error::Internal("boom".to_owned())) },
                |_| Ok(0),
            )
            .await
            .unwrap();
        assert_eq!(out, 0);
    }

    #[tokio::test]
    async fn skipped_kinds_re_propagate() {
        let policy = CatchError::new().skip(ErrorKind::ConditionNotMet);
        let err = policy
            .call(|| async { Err::<u32, _>(Error::ConditionNotMet) }, |_| Ok(0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConditionNotMet));
    }

    #[tokio::test]
    async fn successes_pass_through_untouched() {
        let policy = CatchError::new();
        let out = policy
            .call(|| async { Ok(9) }, |_| Ok(0))
            .await
            .unwrap();
        assert_eq!(out, 9);
    }
}
