//! Work-queue controller.
//!
//! The controller turns store changes and timers into reconcile passes,
//! running at most one pass per CronJob at a time.

mod backoff;
mod engine;
mod handle;
mod queue;
mod types;

pub use backoff::BackoffPolicy;
pub use engine::Controller;
pub use handle::ControllerHandle;
pub use types::{ControllerError, ControllerState, QueueStats};
