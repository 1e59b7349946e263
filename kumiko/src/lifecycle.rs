//! Lifecycle hook declarations.
//!
//! Each component type carries three ordered hook lists, established at
//! declaration time via [`Component::hooks`](crate::registry::Component::hooks)
//! and immutable thereafter. Hooks take no receiver: pre-init work in
//! particular must not see the instance and must complete before `on_init`.

use std::{fmt, sync::Arc};

use futures::future::BoxFuture;

use crate::error::Result;

/// The lifecycle stage a hook (or hook failure) belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Stage {
    PreInit,
    Init,
    PostInit,
    PreDestroy,
    Stop,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::PreInit => "pre-init",
            Stage::Init => "init",
            Stage::PostInit => "post-init",
            Stage::PreDestroy => "pre-destroy",
            Stage::Stop => "stop",
        };
        write!(f, "{name}")
    }
}

/// A zero-argument lifecycle hook.
pub type Hook = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// The ordered hook lists of one component type.
///
/// Within a stage, hooks run in declaration order.
#[derive(Clone, Default)]
pub struct Hooks {
    pre_init: Vec<Hook>,
    post_init: Vec<Hook>,
    pre_destroy: Vec<Hook>,
}

impl Hooks {
    pub fn new() -> Hooks {
        Hooks::default()
    }

    /// Add a hook that runs after construction but before `on_init`.
    pub fn before_init<F>(mut self, f: F) -> Hooks
    where
        F: Fn() -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        self.pre_init.push(Arc::new(f));
        self
    }

    /// Add a hook that runs after `on_init`.
    pub fn after_init<F>(mut self, f: F) -> Hooks
    where
        F: Fn() -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        self.post_init.push(Arc::new(f));
        self
    }

    /// Add a hook that runs at destruction, before `on_stop`.
    pub fn before_destroy<F>(mut self, f: F) -> Hooks
    where
        F: Fn() -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        self.pre_destroy.push(Arc::new(f));
        self
    }

    pub(crate) fn pre_init(&self) -> &[Hook] {
        &self.pre_init
    }

    pub(crate) fn post_init(&self) -> &[Hook] {
        &self.post_init
    }

    pub(crate) fn pre_destroy(&self) -> &[Hook] {
        &self.pre_destroy
    }
}
