//! The cron scheduler.
//!
//! A [`Runner`] component declares its tasks; mounting it resolves each
//! task's cron expression, spawns a timer per task, and records the
//! mapping for the admin surface. The scheduler is itself a component:
//! destroying it (which container teardown does) stops every runner, so
//! shutting down the container stops all scheduled work.

pub mod events;
pub mod store;
pub mod task;

use std::{
    collections::{BTreeMap, HashMap},
    str::FromStr,
    sync::{Arc, Mutex},
};

use futures::future::BoxFuture;
use tokio::sync::watch;

use crate::{
    error::{Error, Result},
    policy::key::KEY_SEPARATOR,
    registry::{Component, Destroyed, Registry},
    shutdown::{Workload, workload},
};

pub use events::{Events, TaskEvent};
pub use store::{ConfigCronStore, CronStore};
pub use task::{ErrorSink, Outcome, RunState, ScheduleSource, TaskDecl, TaskInfo};

use task::{TaskRun, TaskState};

/// A component that declares cron-scheduled tasks.
pub trait Runner: Component {
    fn tasks() -> Vec<TaskDecl<Self>>
    where
        Self: Sized;
}

type TriggerFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;
type RemountFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

struct TaskHandle {
    name: String,
    cron: String,
    state: Arc<TaskState>,
    stop: watch::Sender<bool>,
    trigger: TriggerFn,
}

struct RunnerHandle {
    tasks: Vec<TaskHandle>,
    events: Arc<Events>,
    remount: RemountFn,
}

impl RunnerHandle {
    fn stop_all(&self) {
        for task in &self.tasks {
            let _ = task.stop.send(true);
        }
    }
}

/// The per-process scheduler component. Cheap to clone; clones share the
/// same task registry.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    runners: Mutex<HashMap<String, RunnerHandle>>,
    sink: ErrorSink,
    work: Workload,
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler::new()
    }
}

impl Component for Scheduler {
    const LABEL: &'static str = "scheduler";

    fn on_stop(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.stop_all();
            Ok(())
        })
    }
}

/// The default error sink: handler failures are logged.
pub fn log_sink() -> ErrorSink {
    Arc::new(|component, task, error| {
        log::error!("scheduled task {component}#{task} failed: {error}");
    })
}

impl Scheduler {
    pub fn new() -> Scheduler {
        Scheduler::configured(workload(), log_sink())
    }

    /// A scheduler with an explicit workload and error sink.
    pub fn configured(work: Workload, sink: ErrorSink) -> Scheduler {
        Scheduler {
            inner: Arc::new(SchedulerInner {
                runners: Mutex::new(HashMap::new()),
                sink,
                work,
            }),
        }
    }

    /// Install the runner into `registry` (if absent) and start a cron
    /// timer per declared task.
    ///
    /// The constructor is kept for [`restart`](Self::restart). A task
    /// whose expression cannot be resolved or parsed is logged as invalid
    /// and skipped; the others continue.
    pub async fn mount<R: Runner>(
        &self,
        registry: &Registry,
        ctor: impl Fn() -> R + Send + Sync + 'static,
    ) -> Result<Arc<R>> {
        self.mount_with(registry.clone(), Arc::new(ctor)).await
    }

    fn mount_with<R: Runner>(
        &self,
        registry: Registry,
        ctor: Arc<dyn Fn() -> R + Send + Sync>,
    ) -> BoxFuture<'_, Result<Arc<R>>> {
        Box::pin(async move {
            let runner = registry.install(ctor()).await?;
            let label = registry.label_for::<R>();
            let events = Arc::new(Events::new());
            let mut tasks = Vec::new();

            for decl in R::tasks() {
                let Some(expr) = self.resolve_expr(&label, &decl).await else {
                    continue;
                };
                let schedule = match cron::Schedule::from_str(&expr) {
                    Ok(schedule) => schedule,
                    Err(e) => {
                        let invalid = Error::CronInvalid {
                            task: format!("{label}{KEY_SEPARATOR}{}", decl.name),
                            reason: e.to_string(),
                        };
                        log::warn!("skipping task: {invalid}");
                        continue;
                    }
                };

                let state = Arc::new(TaskState::default());
                let (stop, stop_rx) = watch::channel(false);
                let run = TaskRun {
                    component: label.clone(),
                    name: decl.name,
                    runner: runner.clone(),
                    handler: decl.handler.clone(),
                    events: events.clone(),
                    state: state.clone(),
                    sink: self.inner.sink.clone(),
                };
                let trigger: TriggerFn = {
                    let run = run.clone();
                    Arc::new(move || {
                        let run = run.clone();
                        Box::pin(async move {
                            run.fire().await;
                        })
                    })
                };
                self.inner.work.spawn(run.run(schedule, stop_rx, decl.once));
                log::debug!("mounted task {label}{KEY_SEPARATOR}{} ({expr})", decl.name);
                tasks.push(TaskHandle {
                    name: decl.name.to_owned(),
                    cron: expr,
                    state,
                    stop,
                    trigger,
                });
            }

            let remount: RemountFn = {
                let scheduler = self.clone();
                let registry = registry.clone();
                Arc::new(move || {
                    let scheduler = scheduler.clone();
                    let registry = registry.clone();
                    let ctor = ctor.clone();
                    Box::pin(async move {
                        scheduler.mount_with(registry, ctor).await.map(|_| ())
                    })
                })
            };
            let handle = RunnerHandle {
                tasks,
                events,
                remount,
            };
            self.inner
                .runners
                .lock()
                .expect("scheduler poisoned")
                .insert(label, handle);
            Ok(runner)
        })
    }

    async fn resolve_expr<R>(&self, label: &str, decl: &TaskDecl<R>) -> Option<String> {
        let key = format!("{label}{KEY_SEPARATOR}{}", decl.name);
        match &decl.schedule {
            ScheduleSource::Expr(expr) => Some(expr.clone()),
            ScheduleSource::Store(source) => {
                let store = match source.resolve().await {
                    Ok(store) => store,
                    Err(e) => {
                        log::warn!("skipping task {key}: cron store unavailable: {e}");
                        return None;
                    }
                };
                match store.cron(&key).await {
                    Some(expr) => Some(expr),
                    None => {
                        let invalid = Error::CronInvalid {
                            task: key,
                            reason: "no expression in store".to_owned(),
                        };
                        log::warn!("skipping task: {invalid}");
                        None
                    }
                }
            }
        }
    }

    /// Every mounted runner with its tasks' resolved cron expressions.
    pub fn jobs(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        let runners = self.inner.runners.lock().expect("scheduler poisoned");
        runners
            .iter()
            .map(|(label, handle)| {
                let tasks = handle
                    .tasks
                    .iter()
                    .map(|t| (t.name.clone(), t.cron.clone()))
                    .collect();
                (label.clone(), tasks)
            })
            .collect()
    }

    /// Snapshot one runner's tasks, in declaration order.
    pub fn tasks(&self, label: &str) -> Option<Vec<TaskInfo>> {
        let runners = self.inner.runners.lock().expect("scheduler poisoned");
        let handle = runners.get(label)?;
        Some(
            handle
                .tasks
                .iter()
                .map(|t| TaskInfo {
                    name: t.name.clone(),
                    cron: t.cron.clone(),
                    state: t.state.state(),
                    last: t.state.last(),
                })
                .collect(),
        )
    }

    /// The runner's event bus, for `on`/`emit` subscriptions.
    pub fn events(&self, label: &str) -> Option<Arc<Events>> {
        let runners = self.inner.runners.lock().expect("scheduler poisoned");
        runners.get(label).map(|h| h.events.clone())
    }

    /// Fire a task immediately, outside its schedule.
    pub async fn trigger(&self, label: &str, task: &str) -> Result<()> {
        let trigger = {
            let runners = self.inner.runners.lock().expect("scheduler poisoned");
            let handle = runners
                .get(label)
                .ok_or_else(|| Error::UnknownComponent(label.to_owned()))?;
            let task = handle
                .tasks
                .iter()
                .find(|t| t.name == task)
                .ok_or_else(|| Error::UnknownComponent(format!("{label}{KEY_SEPARATOR}{task}")))?;
            task.trigger.clone()
        };
        trigger().await;
        Ok(())
    }

    /// Fire the runner's first declared task immediately.
    pub async fn trigger_first(&self, label: &str) -> Result<()> {
        let trigger = {
            let runners = self.inner.runners.lock().expect("scheduler poisoned");
            let handle = runners
                .get(label)
                .ok_or_else(|| Error::UnknownComponent(label.to_owned()))?;
            let task = handle
                .tasks
                .first()
                .ok_or_else(|| Error::UnknownComponent(format!("{label} has no tasks")))?;
            task.trigger.clone()
        };
        trigger().await;
        Ok(())
    }

    /// Stop one task's timer.
    pub fn stop_task(&self, label: &str, task: &str) -> Result<()> {
        let runners = self.inner.runners.lock().expect("scheduler poisoned");
        let handle = runners
            .get(label)
            .ok_or_else(|| Error::UnknownComponent(label.to_owned()))?;
        let task = handle
            .tasks
            .iter()
            .find(|t| t.name == task)
            .ok_or_else(|| Error::UnknownComponent(format!("{label}{KEY_SEPARATOR}{task}")))?;
        let _ = task.stop.send(true);
        Ok(())
    }

    /// Stop every task of one runner.
    pub fn stop_runner(&self, label: &str) -> Result<()> {
        let runners = self.inner.runners.lock().expect("scheduler poisoned");
        let handle = runners
            .get(label)
            .ok_or_else(|| Error::UnknownComponent(label.to_owned()))?;
        handle.stop_all();
        Ok(())
    }

    /// Stop a runner and remove it from the registry.
    pub async fn destroy(&self, registry: &Registry, label: &str) -> Result<Option<Destroyed>> {
        let removed = {
            let mut runners = self.inner.runners.lock().expect("scheduler poisoned");
            runners.remove(label)
        };
        match removed {
            Some(handle) => {
                handle.stop_all();
                registry.destroy(label).await
            }
            None => Err(Error::UnknownComponent(label.to_owned())),
        }
    }

    /// Destroy and remount under the same name via the stored
    /// constructor. Task history (outcomes, subscribers) starts fresh.
    pub async fn restart(&self, registry: &Registry, label: &str) -> Result<()> {
        let remount = {
            let runners = self.inner.runners.lock().expect("scheduler poisoned");
            let handle = runners
                .get(label)
                .ok_or_else(|| Error::UnknownComponent(label.to_owned()))?;
            handle.remount.clone()
        };
        self.destroy(registry, label).await?;
        remount().await
    }

    /// Stop everything. Runs on container teardown via `on_stop`.
    pub fn stop_all(&self) {
        let mut runners = self.inner.runners.lock().expect("scheduler poisoned");
        for (label, handle) in runners.drain() {
            log::debug!("stopping runner {label}");
            handle.stop_all();
        }
    }
}
