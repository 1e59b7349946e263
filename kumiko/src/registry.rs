//! The component container.
//!
//! A registry holds exactly one instance per registered name, supports typed
//! lookup by name or by type, and drives lifecycle hooks deterministically:
//! pre-init → `on_init` → post-init on the way up, pre-destroy → `on_stop`
//! on the way down. Registration and destruction are synchronous map
//! operations; the hooks themselves may suspend.

use std::{
    any::{Any, TypeId, type_name},
    collections::HashMap,
    sync::{Arc, LazyLock, RwLock},
    time::SystemTime,
};

use futures::future::BoxFuture;

use crate::{
    error::{Error, Result},
    lifecycle::{Hooks, Stage},
};

/// A registered, singleton-scoped, lifecycle-managed type.
///
/// `LABEL` is the stable name: fixed at declaration time, it survives any
/// symbol-renaming build step. Leave it empty to fall back to the short
/// reflected type name (fine for interactive use; long-lived services
/// should pin one).
pub trait Component: Send + Sync + 'static {
    const LABEL: &'static str = "";

    /// The hook lists for this type. Established once, at declaration.
    fn hooks() -> Hooks
    where
        Self: Sized,
    {
        Hooks::new()
    }

    fn on_init(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn on_stop(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// An opaque identifier for a `Component` type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ComponentId(TypeId);

impl ComponentId {
    pub fn of<C: Component>() -> ComponentId {
        ComponentId(TypeId::of::<C>())
    }
}

/// The name a type declares for itself, before any registry pinning.
pub fn declared_label<C: Component>() -> String {
    if !C::LABEL.is_empty() {
        return C::LABEL.to_owned();
    }
    let full = type_name::<C>();
    full.rsplit("::").next().unwrap_or(full).to_owned()
}

type Instance = Arc<dyn Any + Send + Sync>;
type StopFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;
type AutoCtor = Arc<dyn Fn() -> Box<dyn Any + Send> + Send + Sync>;

struct Entry {
    label: String,
    id: TypeId,
    type_name: &'static str,
    instance: Instance,
    stop: StopFn,
    registered_at: SystemTime,
}

/// A read-only snapshot of one registered component.
#[derive(Clone, Debug)]
pub struct ComponentInfo {
    pub label: String,
    pub id: ComponentId,
    pub type_name: &'static str,
    pub registered_at: SystemTime,
}

/// The record returned by a successful destroy.
#[derive(Clone)]
pub struct Destroyed {
    pub label: String,
    pub id: ComponentId,
    pub instance: Instance,
}

#[derive(Default)]
struct Inner {
    labels: HashMap<String, TypeId>,
    components: HashMap<TypeId, Entry>,
    pinned: HashMap<TypeId, String>,
    auto: HashMap<TypeId, AutoCtor>,
}

impl Inner {
    /// Stable-name resolution: explicit argument → pinned name → declared
    /// name. The caller pins the winner once the registration succeeds.
    fn resolve_label<C: Component>(&self, explicit: Option<&str>) -> String {
        match explicit {
            Some(name) => name.to_owned(),
            None => match self.pinned.get(&TypeId::of::<C>()) {
                Some(pinned) => pinned.clone(),
                None => declared_label::<C>(),
            },
        }
    }
}

/// A component registry. Cheap to clone; clones share the same store.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RwLock<Inner>>,
}

static GLOBAL: LazyLock<Registry> = LazyLock::new(Registry::default);

/// The process-wide registry used by policies and the entry point.
pub fn global() -> Registry {
    GLOBAL.clone()
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Bind an instance under its stable name without running any
    /// lifecycle stage. Most callers want [`install`](Self::install).
    pub fn register<C: Component>(&self, instance: C) -> Result<Arc<C>> {
        self.register_as(None, instance)
    }

    /// Bind an instance under an explicit name, overriding (and re-pinning)
    /// the type's stable name.
    pub fn register_named<C: Component>(&self, name: &str, instance: C) -> Result<Arc<C>> {
        self.register_as(Some(name), instance)
    }

    fn register_as<C: Component>(&self, name: Option<&str>, instance: C) -> Result<Arc<C>> {
        let instance = Arc::new(instance);
        let mut inner = self.inner.write().expect("registry poisoned");
        let label = inner.resolve_label::<C>(name);
        let ty = TypeId::of::<C>();
        if inner.labels.contains_key(&label) || inner.components.contains_key(&ty) {
            return Err(Error::DuplicateComponent(label));
        }
        inner.pinned.insert(ty, label.clone());
        let entry = Entry {
            label: label.clone(),
            id: ty,
            type_name: type_name::<C>(),
            instance: instance.clone(),
            stop: stop_fn::<C>(label.clone(), instance.clone()),
            registered_at: SystemTime::now(),
        };
        inner.labels.insert(label, ty);
        inner.components.insert(ty, entry);
        Ok(instance)
    }

    /// Construct-and-start: bind the instance, then run pre-init hooks,
    /// `on_init`, and post-init hooks in that order. A failure in any
    /// stage removes the partially-initialized instance and surfaces as
    /// `HookFailure`.
    ///
    /// Installing a type that is already registered returns the existing
    /// instance (singleton guarantee); the given one is dropped.
    pub async fn install<C: Component>(&self, instance: C) -> Result<Arc<C>> {
        self.install_as(None, instance).await
    }

    /// [`install`](Self::install) under an explicit stable name.
    pub async fn install_named<C: Component>(&self, name: &str, instance: C) -> Result<Arc<C>> {
        self.install_as(Some(name), instance).await
    }

    async fn install_as<C: Component>(&self, name: Option<&str>, instance: C) -> Result<Arc<C>> {
        if let Some(existing) = self.find::<C>() {
            return Ok(existing);
        }
        let instance = match self.register_as(name, instance) {
            Ok(instance) => instance,
            Err(Error::DuplicateComponent(label)) => {
                // Lost a race with a concurrent install of the same type.
                return self.find::<C>().ok_or(Error::DuplicateComponent(label));
            }
            Err(e) => return Err(e),
        };
        let label = self.label_for::<C>();
        let hooks = C::hooks();
        if let Err(e) = run_init_stages(&label, &hooks, instance.as_ref()).await {
            self.unbind(&label);
            return Err(e);
        }
        log::debug!("component {label} started");
        Ok(instance)
    }

    /// Typed lookup, permissive flavor: absent means `None`.
    pub fn find<C: Component>(&self) -> Option<Arc<C>> {
        let inner = self.inner.read().expect("registry poisoned");
        let entry = inner.components.get(&TypeId::of::<C>())?;
        entry.instance.clone().downcast::<C>().ok()
    }

    /// Typed lookup, strict flavor.
    pub fn get<C: Component>(&self) -> Result<Arc<C>> {
        self.find::<C>()
            .ok_or_else(|| Error::UnknownComponent(self.label_for::<C>()))
    }

    /// Strict typed lookup that constructs auto-marked components on the
    /// first miss. Policies resolve their collaborators through this.
    pub async fn resolve<C: Component>(&self) -> Result<Arc<C>> {
        if let Some(found) = self.find::<C>() {
            return Ok(found);
        }
        let ctor = {
            let inner = self.inner.read().expect("registry poisoned");
            inner.auto.get(&TypeId::of::<C>()).cloned()
        };
        match ctor {
            Some(ctor) => {
                let instance = *ctor()
                    .downcast::<C>()
                    .expect("auto constructor returned a foreign type");
                self.install(instance).await
            }
            None => Err(Error::UnknownComponent(self.label_for::<C>())),
        }
    }

    /// Permissive lookup by stable name.
    pub fn find_by_name(&self, name: &str) -> Option<Instance> {
        let inner = self.inner.read().expect("registry poisoned");
        let ty = inner.labels.get(name)?;
        inner.components.get(ty).map(|e| e.instance.clone())
    }

    /// Strict lookup by stable name.
    pub fn get_by_name(&self, name: &str) -> Result<Instance> {
        self.find_by_name(name)
            .ok_or_else(|| Error::UnknownComponent(name.to_owned()))
    }

    /// Strict lookup by name, asserting the component's type.
    pub fn get_named<C: Component>(&self, name: &str) -> Result<Arc<C>> {
        self.get_by_name(name)?
            .downcast::<C>()
            .map_err(|_| Error::TypeMismatch {
                label: name.to_owned(),
                expected: type_name::<C>(),
            })
    }

    /// Mark a defaultable type for construction on first strict
    /// [`resolve`](Self::resolve).
    pub fn mark_auto<C: Component + Default>(&self) {
        self.mark_auto_with(C::default);
    }

    /// Mark a type for auto-construction with an explicit constructor.
    pub fn mark_auto_with<C: Component>(&self, ctor: impl Fn() -> C + Send + Sync + 'static) {
        let ctor: AutoCtor = Arc::new(move || Box::new(ctor()));
        let mut inner = self.inner.write().expect("registry poisoned");
        inner.auto.insert(TypeId::of::<C>(), ctor);
    }

    /// Remove the named component, running its pre-destroy hooks and then
    /// `on_stop`, and return the destroyed record.
    ///
    /// The name becomes free for re-registration as soon as teardown
    /// begins. Destroying an unknown name is a no-op returning `None`; no
    /// hook runs. A hook failure still leaves the component removed.
    pub async fn destroy(&self, name: &str) -> Result<Option<Destroyed>> {
        let entry = {
            let mut inner = self.inner.write().expect("registry poisoned");
            match inner.labels.remove(name) {
                Some(ty) => inner.components.remove(&ty),
                None => None,
            }
        };
        let Some(entry) = entry else {
            return Ok(None);
        };
        let record = Destroyed {
            label: entry.label.clone(),
            id: ComponentId(entry.id),
            instance: entry.instance.clone(),
        };
        (entry.stop)().await?;
        log::debug!("component {} destroyed", record.label);
        Ok(Some(record))
    }

    /// Destroy the type's current registration and install a fresh
    /// instance under the same name. Returns the previous record (if any)
    /// alongside the new instance.
    pub async fn restart<C: Component>(&self, instance: C) -> Result<(Option<Destroyed>, Arc<C>)> {
        let label = self.label_for::<C>();
        let previous = self.destroy(&label).await?;
        let fresh = self.install_named(&label, instance).await?;
        Ok((previous, fresh))
    }

    /// The registered names, sorted.
    pub fn labels(&self) -> Vec<String> {
        let inner = self.inner.read().expect("registry poisoned");
        let mut labels: Vec<String> = inner.labels.keys().cloned().collect();
        labels.sort();
        labels
    }

    /// A read-only snapshot of every registered component, sorted by label.
    pub fn entries(&self) -> Vec<ComponentInfo> {
        let inner = self.inner.read().expect("registry poisoned");
        let mut entries: Vec<ComponentInfo> = inner
            .components
            .values()
            .map(|e| ComponentInfo {
                label: e.label.clone(),
                id: ComponentId(e.id),
                type_name: e.type_name,
                registered_at: e.registered_at,
            })
            .collect();
        entries.sort_by(|a, b| a.label.cmp(&b.label));
        entries
    }

    pub fn contains(&self, name: &str) -> bool {
        let inner = self.inner.read().expect("registry poisoned");
        inner.labels.contains_key(name)
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().expect("registry poisoned");
        inner.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The stable name the type would register under right now.
    pub fn label_for<C: Component>(&self) -> String {
        let inner = self.inner.read().expect("registry poisoned");
        inner
            .pinned
            .get(&TypeId::of::<C>())
            .cloned()
            .unwrap_or_else(declared_label::<C>)
    }

    fn unbind(&self, name: &str) {
        let mut inner = self.inner.write().expect("registry poisoned");
        if let Some(ty) = inner.labels.remove(name) {
            inner.components.remove(&ty);
        }
    }
}

async fn run_init_stages<C: Component>(label: &str, hooks: &Hooks, instance: &C) -> Result<()> {
    for hook in hooks.pre_init() {
        hook().await.map_err(|e| hook_failure(label, Stage::PreInit, e))?;
    }
    instance
        .on_init()
        .await
        .map_err(|e| hook_failure(label, Stage::Init, e))?;
    for hook in hooks.post_init() {
        hook().await.map_err(|e| hook_failure(label, Stage::PostInit, e))?;
    }
    Ok(())
}

fn stop_fn<C: Component>(label: String, instance: Arc<C>) -> StopFn {
    let hooks = C::hooks();
    Arc::new(move || {
        let label = label.clone();
        let instance = instance.clone();
        let pre_destroy = hooks.pre_destroy().to_vec();
        Box::pin(async move {
            for hook in pre_destroy {
                hook().await
                    .map_err(|e| hook_failure(&label, Stage::PreDestroy, e))?;
            }
            instance
                .on_stop()
                .await
                .map_err(|e| hook_failure(&label, Stage::Stop, e))?;
            Ok(())
        })
    })
}

fn hook_failure(label: &str, stage: Stage, source: Error) -> Error {
    Error::HookFailure {
        label: label.to_owned(),
        stage,
        source: Box::new(source),
    }
}
