//! Domain types
//!
//! Structures shared between the job source, the virtualization backend
//! and the runner.

pub mod fleet;
pub mod hook;
pub mod job;
