//! cronlet - a CronJob reconciliation controller.
//!
//! Declarations (`CronJob`) name a cron schedule and a job template. The
//! controller watches a store of declarations and jobs, and on every pass
//! creates at most one job for the most recent missed firing, honouring
//! suspension, starting deadlines, concurrency policy, and history limits.

pub mod api;
pub mod config;
pub mod controller;
pub mod core;
pub mod events;
pub mod reconcile;
pub mod store;
pub mod testing;

pub use config::{
    ConfigError, ControllerConfig, StoreConfig, YamlLoader, load_cronjobs_from_directory,
};
pub use controller::{
    BackoffPolicy, Controller, ControllerError, ControllerHandle, ControllerState, QueueStats,
};
pub use core::clock::{Clock, ManualClock, SystemClock};
pub use core::cronjob::{
    ConcurrencyPolicy, CronFields, CronJob, CronJobSpec, CronJobStatus, JobTemplateSpec,
    ScheduleSpec,
};
pub use core::job::{FinishedState, Job, JobCondition, JobConditionType, JobStatus};
pub use core::schedule::{Schedule, ScheduleError, ScheduleWindow, compute_schedule};
pub use core::types::{ObjectKey, ObjectMeta, ObjectReference, OwnerReference, Uid};
pub use events::{Event, EventBus, EventHandler};
pub use reconcile::{Disposition, ReconcileError, ReconcileOutcome, Reconciler};
pub use store::{
    DeletePropagation, InMemoryStore, ObjectStore, SqliteStore, StoreError, WatchEvent,
};
