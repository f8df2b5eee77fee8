//! Error types used by the primitives, the task queue and the message bus.
//!
//! This module defines three error types:
//!
//! - [`Cancelled`]: a wait was abandoned because its cancellation token fired.
//! - [`TaskError`]: errors raised by user code: queue jobs, bus handlers, timer callbacks.
//! - [`BusError`]: errors raised by the message bus itself.
//!
//! The enums provide `as_label` for logs, mirroring each other so that every
//! failure can be reported with a short stable tag.
//!
//! Capacity rejection is **not** an error: [`TaskQueue::enqueue`](crate::TaskQueue::enqueue)
//! reports it with a `bool`.

use std::fmt::Display;

use thiserror::Error;

/// # A wait that was cancelled before it was resolved.
///
/// Returned by every cancellable suspension point
/// ([`AsyncLock::acquire`](crate::AsyncLock::acquire),
/// [`AsyncAutoResetEvent::wait`](crate::AsyncAutoResetEvent::wait), clock sleeps, ...).
/// It is deliberately distinct from [`TaskError`]: being cancelled is an outcome, not a failure.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("operation cancelled")]
pub struct Cancelled;

/// # Errors produced by user callbacks.
///
/// Queue jobs, bus handlers and timer callbacks all return `Result<_, TaskError>`.
/// A failure is logged at the dispatch boundary and never propagated further.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TaskError {
    /// Execution failed.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Execution stopped because its cancellation token fired.
    #[error("context cancelled")]
    Canceled,
}

impl TaskError {
    /// Shorthand for [`TaskError::Fail`] from anything printable.
    ///
    /// # Example
    /// ```
    /// use taskbus::TaskError;
    ///
    /// let err = TaskError::fail("connection refused");
    /// assert_eq!(err.to_string(), "execution failed: connection refused");
    /// ```
    pub fn fail(error: impl Display) -> Self {
        TaskError::Fail {
            error: error.to_string(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use taskbus::TaskError;
    ///
    /// assert_eq!(TaskError::Canceled.as_label(), "task_canceled");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Fail { .. } => "task_failed",
            TaskError::Canceled => "task_canceled",
        }
    }

    /// Returns `true` for [`TaskError::Canceled`].
    pub fn is_canceled(&self) -> bool {
        matches!(self, TaskError::Canceled)
    }
}

impl From<Cancelled> for TaskError {
    fn from(_: Cancelled) -> Self {
        TaskError::Canceled
    }
}

/// # Errors produced by the message bus.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The bus was disposed; nothing can be published or subscribed anymore.
    #[error("message bus is closed")]
    Closed,

    /// The caller's cancellation token fired before the call was accepted.
    #[error("operation cancelled")]
    Cancelled,

    /// A message was published by name, but no type is known under that name.
    #[error("unknown message type {name:?}")]
    UnknownMessageType {
        /// The name that failed to resolve.
        name: String,
    },

    /// A message was published by name with a payload of a different type.
    #[error("message type {name:?} expects {expected}, got {found}")]
    TypeMismatch {
        /// The name used for publishing.
        name: String,
        /// Type registered under `name`.
        expected: &'static str,
        /// Type of the payload that was supplied.
        found: &'static str,
    },
}

impl BusError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use taskbus::BusError;
    ///
    /// assert_eq!(BusError::Closed.as_label(), "bus_closed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            BusError::Closed => "bus_closed",
            BusError::Cancelled => "bus_cancelled",
            BusError::UnknownMessageType { .. } => "bus_unknown_message_type",
            BusError::TypeMismatch { .. } => "bus_type_mismatch",
        }
    }
}

impl From<Cancelled> for BusError {
    fn from(_: Cancelled) -> Self {
        BusError::Cancelled
    }
}
