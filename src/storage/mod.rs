//! Snapshot persistence.
//!
//! # Data Flow
//! ```text
//! startup:  snapshot file → SnapshotStore::load → Engine::restore
//! shutdown: Engine::snapshot → SnapshotStore::save → snapshot file
//! ```
//!
//! # Design Decisions
//! - One JSON document holds every owned table
//! - Writes go to a sibling temp file and are renamed into place

pub mod snapshot;

pub use snapshot::{EngineSnapshot, SnapshotStore};
