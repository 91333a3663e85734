//! vmkite Core
//!
//! Core types shared by the vmkite crates.
//!
//! This crate contains:
//! - Jobs reported by the CI provider and their typed placement metadata
//! - Fleet records: job to VM assignments and reusable snapshots
//! - Hook events reported by guests

pub mod domain;
