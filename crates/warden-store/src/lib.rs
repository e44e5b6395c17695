//! Durable storage, version-control anchoring and checkpoints for Warden.
//!
//! # Main types
//!
//! - [`DurableStore`] — The durable store collaborator (`checkpoints`, `tasks`, `performance`).
//! - [`SqliteStore`] — Embedded SQLite implementation in WAL mode.
//! - [`VersionControl`] — Tag, checkout and enumerate version-control markers.
//! - [`GitRepository`] — git2-backed version control.
//! - [`CheckpointStore`] — Metrics snapshots anchored to tags, with rollback.

/// Checkpoint creation and rollback.
pub mod checkpoint;
/// Stored records.
pub mod model;
/// Durable store trait and SQLite implementation.
pub mod store;
/// Version-control collaborator.
pub mod vcs;

pub use checkpoint::{CheckpointStore, DEFAULT_LAST_GOOD_TAG};
pub use model::{Checkpoint, CheckpointMetrics, PerformanceRow, TaskRow, TaskState};
pub use store::{DurableStore, SqliteStore};
pub use vcs::{GitRepository, MemoryVersionControl, TagHandle, VersionControl};
