//! Scheduler layer for the runner
//!
//! Turns the job source into a deduplicated job stream, hands jobs to a
//! fixed pool of workers and watches every job's VM until it is done.

pub mod pool;
pub mod stream;
pub mod wait;

pub use pool::{JobRunner, RunnerSettings};
