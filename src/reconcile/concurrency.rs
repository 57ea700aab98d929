//! Concurrency policy enforcement.

use crate::core::cronjob::ConcurrencyPolicy;
use crate::core::job::Job;

/// Whether a due firing may start.
#[derive(Debug, PartialEq)]
pub enum Admission<'a> {
    /// Start the new job.
    Proceed,
    /// Leave the firing for later; something is still running.
    Skip,
    /// Delete these running jobs, then start the new one.
    Replace(&'a [Job]),
}

/// Decide what to do with a due firing given the running jobs.
pub fn admit(policy: ConcurrencyPolicy, active: &[Job]) -> Admission<'_> {
    match policy {
        ConcurrencyPolicy::Allow => Admission::Proceed,
        ConcurrencyPolicy::Forbid if active.is_empty() => Admission::Proceed,
        ConcurrencyPolicy::Forbid => Admission::Skip,
        ConcurrencyPolicy::Replace if active.is_empty() => Admission::Proceed,
        ConcurrencyPolicy::Replace => Admission::Replace(active),
    }
}
