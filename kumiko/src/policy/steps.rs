//! Step-ordered invocation.
//!
//! A simple state-machine discipline on a single object without an
//! explicit state enum: each guarded method carries a monotonic step
//! number, and the instance remembers the last step it completed.

use std::{future::Future, sync::Mutex};

use crate::error::{Error, Result};

/// The last-step counter owned by the guarded instance.
#[derive(Default)]
pub struct Steps {
    last: Mutex<Option<u64>>,
}

impl Steps {
    pub fn new() -> Steps {
        Steps::default()
    }

    pub fn last(&self) -> Option<u64> {
        *self.last.lock().expect("step counter poisoned")
    }

    /// Begin a new pass through the machine.
    pub fn reset(&self) {
        *self.last.lock().expect("step counter poisoned") = None;
    }

    fn advance(&self, step: u64) -> Result<()> {
        let mut last = self.last.lock().expect("step counter poisoned");
        if let Some(completed) = *last
            && completed > step
        {
            return Err(Error::OutOfOrder {
                last: completed,
                step,
            });
        }
        *last = Some(step);
        Ok(())
    }
}

/// Wraps a method with a step number. Invoking it after a later step has
/// completed raises [`OutOfOrder`](Error::OutOfOrder); otherwise the
/// instance's counter moves to this step and the body runs.
pub struct StepOrdered {
    step: u64,
}

impl StepOrdered {
    pub fn new(step: u64) -> StepOrdered {
        StepOrdered { step }
    }

    pub async fn call<T, F, Fut>(&self, steps: &Steps, body: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        steps.advance(self.step)?;
        body().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn steps_advance_forward() {
        let steps = Steps::new();
        StepOrdered::new(1).call(&steps, || async { Ok(()) }).await.unwrap();
        StepOrdered::new(2).call(&steps, || async { Ok(()) }).await.unwrap();
        assert_eq!(steps.last(), Some(2));
    }

    #[tokio::test]
    async fn going_backwards_is_out_of_order() {
        let steps = Steps::new();
        StepOrdered::new(3).call(&steps, || async { Ok(()) }).await.unwrap();
        let err = StepOrdered::new(2)
            .call(&steps, || async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OutOfOrder { last: 3, step: 2 }));
        // The counter is untouched by the refused call.
        assert_eq!(steps.last(), Some(3));
    }

    #[tokio::test]
    async fn repeating_the_current_step_is_allowed() {
        let steps = Steps::new();
        let policy = StepOrdered::new(1);
        policy.call(&steps, || async { Ok(()) }).await.unwrap();
        policy.call(&steps, || async { Ok(()) }).await.unwrap();
    }

    #[tokio::test]
    async fn reset_starts_a_new_pass() {
        let steps = Steps::new();
        StepOrdered::new(5).call(&steps, || async { Ok(()) }).await.unwrap();
        steps.reset();
        StepOrdered::new(1).call(&steps, || async { Ok(()) }).await.unwrap();
    }
}
