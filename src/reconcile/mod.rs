//! The reconciliation algorithm.
//!
//! Pure helpers decide (classification, history pruning, concurrency
//! admission, job construction); [`Reconciler`] applies their decisions to a
//! store. Each helper takes explicit inputs so it can be tested alone.

mod classify;
mod concurrency;
mod factory;
mod history;
mod reconciler;

pub use classify::{Classification, classify};
pub use concurrency::{Admission, admit};
pub use factory::{FactoryError, build_job, job_name};
pub use history::select_for_deletion;
pub use reconciler::{Disposition, ReconcileError, ReconcileOutcome, Reconciler};
