//! Core reconciliation engine for WikiRecall.
//!
//! WikiRecall keeps a spaced-repetition collection in sync with notes
//! extracted from an external wiki. The sync is unidirectional and
//! destructive: every run compares the full set of extracted source notes
//! against the notes previously synced into the collection, then adds,
//! updates, regroups and removes collection notes until the collection
//! exactly mirrors the source set. Collection-side edits made outside this
//! pipeline are overwritten; collection notes whose id no longer appears in
//! the source set are deleted.
//!
//! Extraction of source notes and any user-facing invocation surface live
//! outside this crate. The engine talks to the collection through the
//! [`store::Collection`] capability trait; [`store::SqliteCollection`] is
//! the bundled reference implementation.

pub mod db;
pub mod logging;
pub mod model;
pub mod schema;
pub mod store;
pub mod sync;

pub use logging::{default_log_level, init_logging, logging_status};
pub use model::source_note::{Schedule, SourceId, SourceNote};
pub use schema::{CardSpec, FieldSpec, NoteSchema, SchemaError, SchemaRegistry};
pub use store::sqlite::SqliteCollection;
pub use store::{
    CardHandle, CardQueue, Collection, DeckHandle, NoteHandle, StoreError, StoreResult,
    StoredCard, StoredNote,
};
pub use sync::{sync, IdDiff, SyncEngine, SyncError, SyncReport};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
