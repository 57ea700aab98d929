//! Core domain types: declarations, job instances, schedules and clocks.

pub mod clock;
pub mod cronjob;
pub mod job;
pub mod schedule;
pub mod types;
