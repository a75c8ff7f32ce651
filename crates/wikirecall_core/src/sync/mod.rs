//! Unidirectional, destructive reconciliation of source notes against the
//! target collection.
//!
//! # Responsibility
//! - Diff source and collection identifier sets.
//! - Add, update (with in-place type migration), regroup and remove
//!   collection notes until the collection mirrors the source set.
//!
//! # Invariants
//! - Per note, migration happens before field comparison, fields before
//!   deck placement.
//! - Scheduling is seeded once at creation and never rewritten afterwards.
//! - A repeated run with unchanged input performs no writes.

pub mod diff;
pub mod engine;
pub mod report;

pub use diff::{diff_ids, IdDiff};
pub use engine::{sync, SyncEngine, SyncError};
pub use report::SyncReport;
