//! Domain value types consumed by the sync engine.

pub mod source_note;

pub use source_note::{Schedule, SourceId, SourceNote};
