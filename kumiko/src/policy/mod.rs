//! Cross-cutting invocation policies.
//!
//! Each policy wraps one method of a component: built once alongside the
//! instance, invoked as `policy.call(args, body)`. Policies derive a
//! stable key from the call, resolve their collaborator lazily from the
//! container, and propagate the body's errors unchanged after their own
//! cleanup.

pub mod cacheable;
pub mod catch;
pub mod key;
pub mod lockable;
pub mod steps;
pub mod when;

pub use cacheable::{Cacheable, OptionsSource};
pub use catch::CatchError;
pub use key::{CacheSource, CronSource, KEY_SEPARATOR, KeyGen, KeySpec, LockSource, Source};
pub use lockable::{LockOptionsSource, Lockable};
pub use steps::{StepOrdered, Steps};
pub use when::{Predicate, When};
