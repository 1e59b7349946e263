//! The loaded configuration map.
//!
//! Loading and merging config sources is a boundary concern; the core
//! consumes the merged result. The entry point binds it under the
//! reserved carrier name before any component is instantiated, so
//! components read configuration from deep inside call chains without it
//! being threaded as a parameter.

use std::{future::Future, sync::Arc};

use serde::de::DeserializeOwned;

use crate::{
    carrier::{CONFIGS, Scoped, scoped},
    error::{Error, Result},
};

/// A merged configuration tree with dotted-path typed reads.
#[derive(Clone, Debug)]
pub struct Configs {
    root: serde_json::Value,
}

impl Default for Configs {
    fn default() -> Self {
        Configs {
            root: serde_json::Value::Object(Default::default()),
        }
    }
}

impl Configs {
    pub fn new() -> Configs {
        Configs::default()
    }

    pub fn from_toml_str(text: &str) -> Result<Configs> {
        let root = toml::from_str(text)
            .map_err(|e| Error::Internal(format!("config parse error: {e}")))?;
        Ok(Configs { root })
    }

    pub fn from_value(root: serde_json::Value) -> Configs {
        Configs { root }
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.root
    }

    /// Overlay another tree onto this one; tables merge recursively,
    /// everything else is replaced by the overlay.
    pub fn merge(self, overlay: Configs) -> Configs {
        Configs {
            root: merge_values(self.root, overlay.root),
        }
    }

    /// Read a typed value at a `.`-separated path.
    pub fn get<T: DeserializeOwned>(&self, path: &str) -> Option<T> {
        let mut node = &self.root;
        for part in path.split('.') {
            node = node.as_object()?.get(part)?;
        }
        serde_json::from_value(node.clone()).ok()
    }

    pub fn get_or<T: DeserializeOwned>(&self, path: &str, default: T) -> T {
        self.get(path).unwrap_or(default)
    }

    /// The carrier handle for the reserved configuration binding.
    pub fn handle() -> Scoped<Arc<Configs>> {
        scoped(CONFIGS)
    }

    /// Run `f` with this configuration bound on the carrier.
    pub async fn bind<F: Future>(self, f: F) -> F::Output {
        Configs::handle().run(Arc::new(self), f).await
    }

    /// The configuration bound on the current task, if any.
    pub fn current() -> Option<Arc<Configs>> {
        Configs::handle().get()
    }

    pub fn current_or_fail() -> Result<Arc<Configs>> {
        Configs::handle().get_or_fail()
    }
}

fn merge_values(base: serde_json::Value, overlay: serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, overlay) => overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [server]
        port = 8080
        host = "0.0.0.0"

        [jobs]
        "refresh#tick" = "0 * * * * *"
    "#;

    #[test]
    fn dotted_paths_read_typed_values() {
        let configs = Configs::from_toml_str(SAMPLE).unwrap();
        assert_eq!(configs.get::<u16>("server.port"), Some(8080));
        assert_eq!(
            configs.get::<String>("server.host").as_deref(),
            Some("0.0.0.0")
        );
        assert_eq!(configs.get::<u16>("server.missing"), None);
        assert_eq!(configs.get_or("server.missing", 7u16), 7);
    }

    #[test]
    fn job_table_keys_may_contain_the_task_separator() {
        let configs = Configs::from_toml_str(SAMPLE).unwrap();
        assert_eq!(
            configs.get::<String>("jobs.refresh#tick").as_deref(),
            Some("0 * * * * *")
        );
    }

    #[test]
    fn overlays_merge_tables_and_replace_leaves() {
        let base = Configs::from_toml_str(SAMPLE).unwrap();
        let overlay = Configs::from_toml_str("[server]\nport = 9090\n").unwrap();
        let merged = base.merge(overlay);
        assert_eq!(merged.get::<u16>("server.port"), Some(9090));
        // Sibling keys survive the overlay.
        assert_eq!(
            merged.get::<String>("server.host").as_deref(),
            Some("0.0.0.0")
        );
    }

    #[tokio::test]
    async fn bind_exposes_the_configuration_on_the_carrier() {
        assert!(Configs::current().is_none());
        let configs = Configs::from_toml_str(SAMPLE).unwrap();
        configs
            .bind(async {
                let current = Configs::current().unwrap();
                assert_eq!(current.get::<u16>("server.port"), Some(8080));
            })
            .await;
        assert!(Configs::current().is_none());
    }
}
