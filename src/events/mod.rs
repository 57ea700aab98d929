//! Controller events and event handling.
//!
//! This module provides event emission for the decisions a reconcile pass
//! makes (jobs created, jobs deleted, firings skipped) and for failures,
//! enabling observability into the controller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::core::types::ObjectKey;

/// Why a job was deleted by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionReason {
    /// Finished job beyond the history limit.
    HistoryLimit,
    /// Running job removed by the Replace concurrency policy.
    Replaced,
}

/// Why a firing did not produce a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Forbid policy with jobs still running.
    ConcurrencyForbid,
    /// Firing older than the starting deadline.
    MissedDeadline,
}

impl fmt::Display for DeletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeletionReason::HistoryLimit => write!(f, "history limit"),
            DeletionReason::Replaced => write!(f, "replaced"),
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ConcurrencyForbid => write!(f, "concurrency policy forbids overlap"),
            SkipReason::MissedDeadline => write!(f, "missed starting deadline"),
        }
    }
}

/// Events emitted by the controller.
#[derive(Debug, Clone)]
pub enum Event {
    /// A job was created for a firing.
    JobCreated {
        cronjob: ObjectKey,
        job: String,
        scheduled_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    /// A job owned by a CronJob was deleted.
    JobDeleted {
        cronjob: ObjectKey,
        job: String,
        reason: DeletionReason,
        timestamp: DateTime<Utc>,
    },

    /// A firing was not acted upon.
    RunSkipped {
        cronjob: ObjectKey,
        scheduled_at: Option<DateTime<Utc>>,
        reason: SkipReason,
        timestamp: DateTime<Utc>,
    },

    /// The declared schedule cannot be used until the CronJob is edited.
    ScheduleRejected {
        cronjob: ObjectKey,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A reconcile pass failed and will be retried.
    ReconcileFailed {
        cronjob: ObjectKey,
        error: String,
        /// Consecutive failures for this key, including this one.
        attempt: u32,
        retry_in: Duration,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Event::JobCreated { timestamp, .. } => *timestamp,
            Event::JobDeleted { timestamp, .. } => *timestamp,
            Event::RunSkipped { timestamp, .. } => *timestamp,
            Event::ScheduleRejected { timestamp, .. } => *timestamp,
            Event::ReconcileFailed { timestamp, .. } => *timestamp,
        }
    }

    /// Get the CronJob the event concerns.
    pub fn cronjob(&self) -> &ObjectKey {
        match self {
            Event::JobCreated { cronjob, .. } => cronjob,
            Event::JobDeleted { cronjob, .. } => cronjob,
            Event::RunSkipped { cronjob, .. } => cronjob,
            Event::ScheduleRejected { cronjob, .. } => cronjob,
            Event::ReconcileFailed { cronjob, .. } => cronjob,
        }
    }

    /// Create a JobCreated event.
    pub fn job_created(
        cronjob: ObjectKey,
        job: impl Into<String>,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Event::JobCreated {
            cronjob,
            job: job.into(),
            scheduled_at,
            timestamp: Utc::now(),
        }
    }

    /// Create a JobDeleted event.
    pub fn job_deleted(cronjob: ObjectKey, job: impl Into<String>, reason: DeletionReason) -> Self {
        Event::JobDeleted {
            cronjob,
            job: job.into(),
            reason,
            timestamp: Utc::now(),
        }
    }

    /// Create a RunSkipped event.
    pub fn run_skipped(
        cronjob: ObjectKey,
        scheduled_at: Option<DateTime<Utc>>,
        reason: SkipReason,
    ) -> Self {
        Event::RunSkipped {
            cronjob,
            scheduled_at,
            reason,
            timestamp: Utc::now(),
        }
    }

    /// Create a ScheduleRejected event.
    pub fn schedule_rejected(cronjob: ObjectKey, error: impl Into<String>) -> Self {
        Event::ScheduleRejected {
            cronjob,
            error: error.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a ReconcileFailed event.
    pub fn reconcile_failed(
        cronjob: ObjectKey,
        error: impl Into<String>,
        attempt: u32,
        retry_in: Duration,
    ) -> Self {
        Event::ReconcileFailed {
            cronjob,
            error: error.into(),
            attempt,
            retry_in,
            timestamp: Utc::now(),
        }
    }
}

/// Handler for receiving controller events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
