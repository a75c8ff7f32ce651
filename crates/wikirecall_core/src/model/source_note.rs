//! Source note model.
//!
//! # Responsibility
//! - Define the immutable note value handed over by the extraction layer.
//! - Carry the optional review-progress snapshot used to seed new cards.
//!
//! # Invariants
//! - `id` is the sole correlation key between source and collection notes.
//! - A `Schedule` is complete by construction; a partial snapshot cannot be
//!   represented and is therefore rejected before it ever reaches the engine.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stable identifier of a source note.
///
/// An opaque token minted by the authoring side (by convention a
/// lexicographically time-ordered timestamp string). The engine never
/// inspects its content. Kept as a type alias to make semantic intent
/// explicit in signatures.
pub type SourceId = String;

/// Review-progress snapshot attached to a freshly authored note.
///
/// Applied once, to every card of the note, right after the note is first
/// persisted. Later syncs never touch scheduling again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Current review interval in days.
    pub ivl: i64,
    /// Ease factor in per-mille (2500 = 250%).
    pub ease: u32,
    /// Number of lapses recorded so far.
    pub lapses: u32,
    /// Calendar date the next review is due.
    pub due: NaiveDate,
}

impl Schedule {
    pub fn new(ivl: i64, ease: u32, lapses: u32, due: NaiveDate) -> Self {
        Self {
            ivl,
            ease,
            lapses,
            due,
        }
    }
}

/// One unit of learning content extracted from the authoring side.
///
/// Never persisted by this crate; the engine only reads it to decide what
/// the collection should look like.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceNote {
    /// Stable global ID, unique within one extracted set.
    pub id: SourceId,
    /// Name of the note type schema this note conforms to.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Field name to field text, keys determined by `type_name`.
    pub fields: BTreeMap<String, String>,
    /// Desired deck; `None` falls back to the caller-supplied default.
    pub target_deck: Option<String>,
    /// Initial scheduling, present only for notes authored with progress.
    pub schedule: Option<Schedule>,
}

impl SourceNote {
    /// Creates a note of the given type with no fields, deck or schedule.
    pub fn new(id: impl Into<SourceId>, type_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_name: type_name.into(),
            fields: BTreeMap::new(),
            target_deck: None,
            schedule: None,
        }
    }

    /// Sets one field value, replacing any previous value of that field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Sets the desired deck.
    pub fn with_deck(mut self, deck: impl Into<String>) -> Self {
        self.target_deck = Some(deck.into());
        self
    }

    /// Attaches an initial review schedule.
    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    /// Returns the deck this note's cards belong in.
    pub fn deck_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.target_deck.as_deref().unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::{Schedule, SourceNote};
    use chrono::NaiveDate;

    #[test]
    fn deck_falls_back_to_default_only_when_unset() {
        let plain = SourceNote::new("20240101120000000", "QuestionAnswer");
        assert_eq!(plain.deck_or("Default"), "Default");

        let routed = plain.clone().with_deck("Math");
        assert_eq!(routed.deck_or("Default"), "Math");
    }

    #[test]
    fn with_field_replaces_existing_value() {
        let note = SourceNote::new("20240101120000000", "QuestionAnswer")
            .with_field("Question", "2+2")
            .with_field("Question", "3+3");
        assert_eq!(note.fields.get("Question").map(String::as_str), Some("3+3"));
    }

    #[test]
    fn serde_roundtrip_preserves_schedule() {
        let due = NaiveDate::from_ymd_opt(2200, 9, 22).expect("valid date");
        let note = SourceNote::new("20240101120000000", "QuestionAnswer")
            .with_field("Question", "2+2")
            .with_field("Answer", "4")
            .with_deck("Math")
            .with_schedule(Schedule::new(5, 1800, 1, due));

        let json = serde_json::to_string(&note).expect("note serializes");
        let back: SourceNote = serde_json::from_str(&json).expect("note deserializes");
        assert_eq!(back, note);
        assert_eq!(back.schedule.expect("schedule kept").due, due);
    }
}
