use std::{fmt, time::Duration};

use crate::lifecycle::Stage;

pub type Result<T> = std::result::Result<T, Error>;

/// An error raised by the framework core.
#[derive(Debug)]
pub enum Error {
    /// A strict lookup found no component under the requested name or type.
    UnknownComponent(String),

    /// A registration attempted to reuse a name that is already bound.
    DuplicateComponent(String),

    /// A typed lookup found a component of a different type under the name.
    TypeMismatch {
        label: String,
        expected: &'static str,
    },

    /// A carrier read or write with no active binding for the name.
    NoBindingInScope(String),

    /// A lock acquisition gave up after its deadline.
    LockTimeout { key: String, timeout: Duration },

    /// A `When` predicate evaluated to false.
    ConditionNotMet,

    /// A step-ordered method was invoked behind the instance's last
    /// completed step.
    OutOfOrder { last: u64, step: u64 },

    /// A cron expression could not be resolved or parsed at task setup.
    CronInvalid { task: String, reason: String },

    /// A lifecycle hook failed. Aborts the stage it occurred in.
    HookFailure {
        label: String,
        stage: Stage,
        source: Box<Error>,
    },

    /// An internal error with an unstructured string message.
    Internal(String),

    /// An error from outside the framework.
    Other(Box<dyn std::error::Error + Send + Sync>),
}

/// The kind of an [`Error`], without its payload.
///
/// Used by `CatchError` skip lists and the admin surface's status mapping.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnknownComponent,
    DuplicateComponent,
    TypeMismatch,
    NoBindingInScope,
    LockTimeout,
    ConditionNotMet,
    OutOfOrder,
    CronInvalid,
    HookFailure,
    Internal,
    Other,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnknownComponent(_) => ErrorKind::UnknownComponent,
            Error::DuplicateComponent(_) => ErrorKind::DuplicateComponent,
            Error::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            Error::NoBindingInScope(_) => ErrorKind::NoBindingInScope,
            Error::LockTimeout { .. } => ErrorKind::LockTimeout,
            Error::ConditionNotMet => ErrorKind::ConditionNotMet,
            Error::OutOfOrder { .. } => ErrorKind::OutOfOrder,
            Error::CronInvalid { .. } => ErrorKind::CronInvalid,
            Error::HookFailure { .. } => ErrorKind::HookFailure,
            Error::Internal(_) => ErrorKind::Internal,
            Error::Other(_) => ErrorKind::Other,
        }
    }

    /// Unwrap layers of hook-failure nesting to get the innermost error.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::HookFailure { source, .. } => source.root_cause(),
            _ => self,
        }
    }

    pub fn other<E: std::error::Error + Send + Sync + 'static>(e: E) -> Error {
        Error::Other(Box::new(e))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnknownComponent(name) => write!(f, "unknown component: {name}"),
            Error::DuplicateComponent(name) => write!(f, "duplicate component: {name}"),
            Error::TypeMismatch { label, expected } => {
                write!(f, "component {label} is not a {expected}")
            }
            Error::NoBindingInScope(name) => write!(f, "no binding in scope for {name}"),
            Error::LockTimeout { key, timeout } => {
                write!(f, "could not lock {key} within {timeout:?}")
            }
            Error::ConditionNotMet => write!(f, "condition not met"),
            Error::OutOfOrder { last, step } => {
                write!(f, "step {step} invoked after step {last} completed")
            }
            Error::CronInvalid { task, reason } => {
                write!(f, "invalid cron for task {task}: {reason}")
            }
            Error::HookFailure {
                label,
                stage,
                source,
            } => write!(f, "{stage} hook failed for {label}: {source}"),
            Error::Internal(msg) => write!(f, "internal error: {msg}"),
            Error::Other(e) => write!(f, "other: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::HookFailure { source, .. } => Some(source),
            Error::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Error::Internal(value)
    }
}

impl From<&str> for Error {
    fn from(value: &str) -> Self {
        Error::Internal(value.to_owned())
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::Internal(format!("json error: {value}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Internal(format!("io error: {value}"))
    }
}
