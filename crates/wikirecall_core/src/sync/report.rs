//! User-facing sync outcome summary.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Counts accumulated over one sync run.
///
/// `updated` counts notes whose fields actually changed, not every note
/// that was examined or regrouped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

impl Display for SyncReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Added {} {}.", self.added, note_noun(self.added))?;
        writeln!(f, "Updated {} {}.", self.updated, note_noun(self.updated))?;
        write!(f, "Removed {} {}.", self.removed, note_noun(self.removed))
    }
}

fn note_noun(count: usize) -> &'static str {
    if count == 1 {
        "note"
    } else {
        "notes"
    }
}
