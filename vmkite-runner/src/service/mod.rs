//! Service layer
//!
//! Hook handling logic that runs on behalf of the gateway.

mod snapshot;

pub use snapshot::SnapshotService;
