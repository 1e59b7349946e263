//! Kumiko is a component framework for backend services: a process-wide
//! container of named, lifecycle-managed singletons, a task-scoped value
//! carrier, cross-cutting invocation policies (caching, locking,
//! conditional execution, step ordering, error substitution), a cron
//! scheduler bound to the container's lifecycle, and a shutdown
//! supervisor that tears everything down on SIGINT/SIGTERM.

pub mod admin;
pub mod cache;
pub mod carrier;
pub mod configs;
pub mod entry;
pub mod error;
pub mod lifecycle;
pub mod lock;
pub mod policy;
pub mod registry;
pub mod scheduler;
pub mod shutdown;
mod util;

pub use cache::{Cache, CacheOptions, CacheValue, Cached, MemoryCache};
pub use carrier::{CONFIGS, Scoped, scoped};
pub use configs::Configs;
pub use entry::{App, Boot};
pub use error::{Error, ErrorKind, Result};
pub use lifecycle::{Hooks, Stage};
pub use lock::{Lock, LockOptions, MemoryLock};
pub use policy::{
    CacheSource, Cacheable, CatchError, KeyGen, KeySpec, LockSource, Lockable, StepOrdered, Steps,
    When,
};
pub use registry::{Component, ComponentId, ComponentInfo, Destroyed, Registry, global};
pub use scheduler::{
    ConfigCronStore, CronStore, Events, Runner, Scheduler, TaskDecl, TaskEvent,
};
pub use shutdown::{Workload, supervise, teardown, workload};
