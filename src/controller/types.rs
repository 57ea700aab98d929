//! Controller type definitions.
//!
//! This module contains error types, state enums, and command types for the controller.

use crate::core::types::ObjectKey;
use crate::store::StoreError;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors that can occur in the controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Controller is not running.
    #[error("controller is not running")]
    NotRunning,

    /// Store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Channel error.
    #[error("channel error: {0}")]
    ChannelError(String),
}

/// State of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ControllerState {
    /// Controller is stopped.
    Stopped,
    /// Controller is dispatching passes.
    Running,
    /// Controller accepts events but dispatches nothing.
    Paused,
}

/// Point-in-time view of the work queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Keys waiting for a worker.
    pub queued: usize,
    /// Keys with a pass running.
    pub in_flight: usize,
    /// Keys with a pending requeue timer.
    pub scheduled: usize,
    /// Keys whose last pass failed.
    pub failing: usize,
}

/// Commands that can be sent to the controller.
pub(crate) enum ControllerCommand {
    /// Queue a pass for a key.
    Enqueue {
        key: ObjectKey,
        response: oneshot::Sender<()>,
    },
    /// Report queue statistics.
    Stats {
        response: oneshot::Sender<QueueStats>,
    },
    /// Stop dispatching passes.
    Pause { response: oneshot::Sender<()> },
    /// Resume dispatching passes.
    Resume { response: oneshot::Sender<()> },
    /// Shutdown the controller.
    Shutdown { response: oneshot::Sender<()> },
}
