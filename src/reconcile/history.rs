//! Finished-job retention.

use crate::core::job::Job;

/// Pick the finished jobs to delete so that at most `limit` remain.
///
/// Oldest start time goes first; jobs that never recorded a start time sort
/// before all others. No limit means nothing is deleted.
pub fn select_for_deletion(finished: &[Job], limit: Option<u32>) -> Vec<&Job> {
    let Some(limit) = limit else {
        return Vec::new();
    };
    let limit = limit as usize;
    if finished.len() <= limit {
        return Vec::new();
    }

    let mut ordered: Vec<&Job> = finished.iter().collect();
    // None < Some(_), so missing start times lead.
    ordered.sort_by_key(|job| job.status.start_time);
    ordered.truncate(finished.len() - limit);
    ordered
}
