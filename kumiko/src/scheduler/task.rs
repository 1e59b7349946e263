//! Task declarations and the cron timer loop.

use std::{
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};

use futures::future::BoxFuture;
use tokio::sync::watch;

use crate::{
    error::Result,
    policy::key::CronSource,
    scheduler::events::{Events, TaskEvent},
};

/// Routes handler failures, along with (component-name, task-name).
pub type ErrorSink = Arc<dyn Fn(&str, &str, &crate::error::Error) + Send + Sync>;

pub type TaskHandler<R> = Arc<dyn Fn(Arc<R>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Where a task's cron expression comes from.
#[derive(Clone)]
pub enum ScheduleSource {
    Expr(String),
    Store(CronSource),
}

/// One cron-annotated method of a runner.
pub struct TaskDecl<R: ?Sized> {
    pub(crate) name: &'static str,
    pub(crate) schedule: ScheduleSource,
    pub(crate) once: bool,
    pub(crate) handler: TaskHandler<R>,
}

impl<R: Send + Sync + 'static> TaskDecl<R> {
    /// Declare a task with a literal cron expression (the `cron` crate's
    /// seconds-first syntax).
    pub fn new<F, Fut>(name: &'static str, expr: &str, handler: F) -> TaskDecl<R>
    where
        F: Fn(Arc<R>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        TaskDecl {
            name,
            schedule: ScheduleSource::Expr(expr.to_owned()),
            once: false,
            handler: Arc::new(move |runner| Box::pin(handler(runner))),
        }
    }

    /// Declare a task whose expression a [`CronStore`](super::CronStore)
    /// supplies at mount time, queried with the task's canonical key.
    pub fn from_store<F, Fut>(name: &'static str, store: CronSource, handler: F) -> TaskDecl<R>
    where
        F: Fn(Arc<R>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        TaskDecl {
            name,
            schedule: ScheduleSource::Store(store),
            once: false,
            handler: Arc::new(move |runner| Box::pin(handler(runner))),
        }
    }

    /// Single-shot mode: the timer stops after the first successful fire.
    pub fn once(mut self) -> TaskDecl<R> {
        self.once = true;
        self
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Stopped,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed(String),
}

#[derive(Default)]
pub(crate) struct TaskState {
    state: Mutex<Option<RunState>>,
    last: Mutex<Option<Outcome>>,
}

impl TaskState {
    pub(crate) fn state(&self) -> RunState {
        self.state
            .lock()
            .expect("task state poisoned")
            .unwrap_or(RunState::Idle)
    }

    pub(crate) fn last(&self) -> Option<Outcome> {
        self.last.lock().expect("task state poisoned").clone()
    }

    fn set_state(&self, state: RunState) {
        *self.state.lock().expect("task state poisoned") = Some(state);
    }

    fn set_last(&self, outcome: Outcome) {
        *self.last.lock().expect("task state poisoned") = Some(outcome);
    }
}

/// A read-only snapshot of one mounted task.
#[derive(Clone, Debug)]
pub struct TaskInfo {
    pub name: String,
    pub cron: String,
    pub state: RunState,
    pub last: Option<Outcome>,
}

/// Everything one task's timer needs, bundled for the spawned loop and
/// for immediate triggers.
pub(crate) struct TaskRun<R> {
    pub component: String,
    pub name: &'static str,
    pub runner: Arc<R>,
    pub handler: TaskHandler<R>,
    pub events: Arc<Events>,
    pub state: Arc<TaskState>,
    pub sink: ErrorSink,
}

impl<R> Clone for TaskRun<R> {
    fn clone(&self) -> Self {
        TaskRun {
            component: self.component.clone(),
            name: self.name,
            runner: self.runner.clone(),
            handler: self.handler.clone(),
            events: self.events.clone(),
            state: self.state.clone(),
            sink: self.sink.clone(),
        }
    }
}

impl<R: Send + Sync + 'static> TaskRun<R> {
    /// The cron timer loop. Exits on a stop signal, or after the first
    /// successful fire in single-shot mode, and emits `stopped` either
    /// way.
    pub(crate) async fn run(self, schedule: cron::Schedule, mut stop: watch::Receiver<bool>, once: bool) {
        loop {
            let Some(next) = schedule.upcoming(chrono::Utc).next() else {
                break;
            };
            let delay = (next - chrono::Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop.changed() => break,
            }
            if self.fire().await && once {
                log::debug!("single-shot task {}#{} done", self.component, self.name);
                break;
            }
        }
        self.state.set_state(RunState::Stopped);
        self.events.emit(TaskEvent::Stopped, self.name, None);
    }

    /// One fire: `started`, the handler, `completed` or `failed`, then
    /// `run`. A failure goes to the error sink and never kills the timer.
    pub(crate) async fn fire(&self) -> bool {
        self.state.set_state(RunState::Running);
        self.events.emit(TaskEvent::Started, self.name, None);
        let outcome = (self.handler)(self.runner.clone()).await;
        self.state.set_state(RunState::Idle);
        let success = match outcome {
            Ok(()) => {
                self.state.set_last(Outcome::Completed);
                self.events.emit(TaskEvent::Completed, self.name, None);
                true
            }
            Err(e) => {
                self.state.set_last(Outcome::Failed(e.to_string()));
                (self.sink)(&self.component, self.name, &e);
                self.events.emit(TaskEvent::Failed, self.name, Some(&e));
                false
            }
        };
        self.events.emit(TaskEvent::Run, self.name, None);
        success
    }
}
