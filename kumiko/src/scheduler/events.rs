//! Per-runner task lifecycle events.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::error::Error;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TaskEvent {
    /// A fire began.
    Started,
    /// The handler returned successfully.
    Completed,
    /// The handler returned an error.
    Failed,
    /// A fire finished, regardless of outcome.
    Run,
    /// The task's timer stopped.
    Stopped,
}

type Subscriber = Arc<dyn Fn(&str, Option<&Error>) + Send + Sync>;

/// The event bus of one runner. Subscribers receive the task name and,
/// for `Failed`, the error.
#[derive(Default)]
pub struct Events {
    subscribers: Mutex<HashMap<TaskEvent, Vec<Subscriber>>>,
}

impl Events {
    pub fn new() -> Events {
        Events::default()
    }

    pub fn on(&self, event: TaskEvent, f: impl Fn(&str, Option<&Error>) + Send + Sync + 'static) {
        self.subscribers
            .lock()
            .expect("event bus poisoned")
            .entry(event)
            .or_default()
            .push(Arc::new(f));
    }

    pub fn emit(&self, event: TaskEvent, task: &str, error: Option<&Error>) {
        let subscribers = {
            let map = self.subscribers.lock().expect("event bus poisoned");
            map.get(&event).cloned().unwrap_or_default()
        };
        for subscriber in subscribers {
            subscriber(task, error);
        }
    }

    pub fn on_started(&self, f: impl Fn(&str) + Send + Sync + 'static) {
        self.on(TaskEvent::Started, move |task, _| f(task));
    }

    pub fn on_completed(&self, f: impl Fn(&str) + Send + Sync + 'static) {
        self.on(TaskEvent::Completed, move |task, _| f(task));
    }

    pub fn on_failed(&self, f: impl Fn(&str, &Error) + Send + Sync + 'static) {
        self.on(TaskEvent::Failed, move |task, error| {
            if let Some(error) = error {
                f(task, error);
            }
        });
    }

    pub fn on_run(&self, f: impl Fn(&str) + Send + Sync + 'static) {
        self.on(TaskEvent::Run, move |task, _| f(task));
    }

    pub fn on_stopped(&self, f: impl Fn(&str) + Send + Sync + 'static) {
        self.on(TaskEvent::Stopped, move |task, _| f(task));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn subscribers_receive_their_event_only() {
        let events = Events::new();
        let started = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        {
            let started = started.clone();
            events.on_started(move |_| {
                started.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let failed = failed.clone();
            events.on_failed(move |_, _| {
                failed.fetch_add(1, Ordering::SeqCst);
            });
        }

        events.emit(TaskEvent::Started, "tick", None);
        events.emit(TaskEvent::Run, "tick", None);
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(failed.load(Ordering::SeqCst), 0);

        let boom = Error::Internal("boom".to_owned());
        events.emit(TaskEvent::Failed, "tick", Some(&boom));
        assert_eq!(failed.load(Ordering::SeqCst), 1);
    }
}
