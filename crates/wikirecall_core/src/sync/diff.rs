//! Identifier set algebra. Pure; no collection access.

use crate::model::source_note::SourceId;
use std::collections::BTreeSet;

/// Disjoint partition of source and collection identifiers.
///
/// `BTreeSet` keeps iteration order deterministic (sorted by id), so every
/// downstream pass and log line is reproducible across runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdDiff {
    /// Ids present in the source set only; notes to create.
    pub to_add: BTreeSet<SourceId>,
    /// Ids present on both sides; notes to reconcile in place.
    pub to_edit: BTreeSet<SourceId>,
    /// Ids present in the collection only; notes to delete.
    pub to_remove: BTreeSet<SourceId>,
}

/// Partitions the two identifier sets into add/edit/remove work lists.
pub fn diff_ids(source_ids: &BTreeSet<SourceId>, target_ids: &BTreeSet<SourceId>) -> IdDiff {
    IdDiff {
        to_add: source_ids.difference(target_ids).cloned().collect(),
        to_edit: source_ids.intersection(target_ids).cloned().collect(),
        to_remove: target_ids.difference(source_ids).cloned().collect(),
    }
}
