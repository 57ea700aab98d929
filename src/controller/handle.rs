//! Controller handle for controlling the controller.
//!
//! This module provides the `ControllerHandle` type that allows external control
//! of the controller through commands like enqueue, pause, resume, and shutdown.

use std::sync::Arc;

use tokio::sync::{RwLock, mpsc, oneshot};

use crate::core::types::ObjectKey;

use super::types::{ControllerCommand, ControllerError, ControllerState, QueueStats};

/// Buffer size for the command channel between ControllerHandle and Controller.
pub(crate) const COMMAND_CHANNEL_BUFFER: usize = 32;

/// Handle for controlling the controller.
#[derive(Clone)]
pub struct ControllerHandle {
    pub(crate) command_tx: mpsc::Sender<ControllerCommand>,
    pub(crate) state: Arc<RwLock<ControllerState>>,
}

impl ControllerHandle {
    /// Helper to send a command and wait for its response.
    async fn send_command<T>(
        &self,
        build_command: impl FnOnce(oneshot::Sender<T>) -> ControllerCommand,
        operation: &str,
    ) -> Result<T, ControllerError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(build_command(response_tx))
            .await
            .map_err(|_| ControllerError::NotRunning)?;

        response_rx.await.map_err(|_| {
            ControllerError::ChannelError(format!("failed to receive {} response", operation))
        })
    }

    /// Queue a reconcile pass for a CronJob.
    ///
    /// Returns once the key is queued, not once the pass has run.
    pub async fn enqueue(&self, key: ObjectKey) -> Result<(), ControllerError> {
        self.send_command(
            |response| ControllerCommand::Enqueue { key, response },
            "enqueue",
        )
        .await
    }

    /// Get work queue statistics.
    pub async fn stats(&self) -> Result<QueueStats, ControllerError> {
        self.send_command(|response| ControllerCommand::Stats { response }, "stats")
            .await
    }

    /// Pause the controller.
    ///
    /// While paused, events still mark keys for reconciliation but no pass
    /// is started until the controller resumes.
    pub async fn pause(&self) -> Result<(), ControllerError> {
        self.send_command(|response| ControllerCommand::Pause { response }, "pause")
            .await
    }

    /// Resume the controller after being paused.
    pub async fn resume(&self) -> Result<(), ControllerError> {
        self.send_command(|response| ControllerCommand::Resume { response }, "resume")
            .await
    }

    /// Shutdown the controller, waiting for in-flight passes.
    pub async fn shutdown(&self) -> Result<(), ControllerError> {
        self.send_command(
            |response| ControllerCommand::Shutdown { response },
            "shutdown",
        )
        .await
    }

    /// Get the current controller state.
    pub async fn state(&self) -> ControllerState {
        *self.state.read().await
    }

    /// Check if the controller is running.
    pub async fn is_running(&self) -> bool {
        *self.state.read().await == ControllerState::Running
    }

    /// Check if the controller is paused.
    pub async fn is_paused(&self) -> bool {
        *self.state.read().await == ControllerState::Paused
    }
}
