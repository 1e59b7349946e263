//! Cron expression stores.

use futures::future::BoxFuture;

use crate::{configs::Configs, registry::Component};

/// Supplies cron expressions asynchronously, keyed by the task's canonical
/// `<component-label>#<task-name>` key.
pub trait CronStore: Send + Sync + 'static {
    fn cron<'f>(&'f self, key: &'f str) -> BoxFuture<'f, Option<String>>;
}

/// Reads cron expressions from the carrier-bound configuration, under the
/// `jobs` table: `jobs."<label>#<task>" = "<expression>"`.
#[derive(Default)]
pub struct ConfigCronStore;

impl ConfigCronStore {
    pub fn new() -> ConfigCronStore {
        ConfigCronStore
    }
}

impl Component for ConfigCronStore {
    const LABEL: &'static str = "cron-store";
}

impl CronStore for ConfigCronStore {
    fn cron<'f>(&'f self, key: &'f str) -> BoxFuture<'f, Option<String>> {
        Box::pin(async move {
            let configs = Configs::current()?;
            configs.get::<String>(&format!("jobs.{key}"))
        })
    }
}
