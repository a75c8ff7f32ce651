//! Reconciliation driver.
//!
//! # Responsibility
//! - Verify registered note types before any mutation (preflight).
//! - Run the add/edit/remove passes over the identifier diff.
//! - Seed initial scheduling and enforce deck placement per note.
//!
//! # Invariants
//! - Per note, the order migrate -> fields -> deck is mandatory; field
//!   comparison against a stale layout must never happen.
//! - A fatal error aborts the run; changes already applied stay in place
//!   (no rollback).
//! - All cards of one note share a deck and, when seeded, one schedule.

use crate::model::source_note::{Schedule, SourceId, SourceNote};
use crate::schema::{NoteSchema, SchemaRegistry};
use crate::store::{CardQueue, Collection, NoteHandle, StoreError, StoredNote};
use crate::sync::diff::diff_ids;
use crate::sync::report::SyncReport;
use chrono::{Local, NaiveDate};
use log::info;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Sync failure. Every variant aborts the remainder of the run.
#[derive(Debug)]
pub enum SyncError {
    /// A registered note type was altered in the collection in a way the
    /// engine cannot safely interpret. Detected in preflight, before any
    /// mutation.
    DamagedType { type_name: String, details: String },
    /// A collection note carries a type the engine does not recognize.
    /// Signals schema corruption rather than bad user data.
    UnknownTargetType {
        source_id: SourceId,
        type_name: String,
    },
    /// A source note declares a type that was never registered.
    UnknownSourceType {
        source_id: SourceId,
        type_name: String,
    },
    /// Collection persistence failure.
    Store(StoreError),
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DamagedType { type_name, details } => write!(
                f,
                "note type `{type_name}` in the collection no longer matches its \
                 registered layout ({details}); aborting before any changes are made"
            ),
            Self::UnknownTargetType {
                source_id,
                type_name,
            } => write!(
                f,
                "synced note {source_id} has type `{type_name}`, which this engine does \
                 not recognize; this is probably a defect in the sync tool, please report it"
            ),
            Self::UnknownSourceType {
                source_id,
                type_name,
            } => write!(
                f,
                "source note {source_id} declares unregistered note type `{type_name}`"
            ),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Compares source notes against the collection and adds, edits and removes
/// collection notes as needed to bring the two in sync.
///
/// Keys on the stable source ids. Any changes made directly in the
/// collection are lost on the next run, and a note whose id disappears from
/// the source set is deleted permanently.
pub fn sync<C: Collection>(
    notes: &[SourceNote],
    store: &mut C,
    registry: &SchemaRegistry,
    default_deck: &str,
) -> Result<SyncReport, SyncError> {
    SyncEngine::new(store, registry, default_deck).run(notes)
}

/// One sync pass over a collection. See [`sync`] for the common entry point.
pub struct SyncEngine<'a, C: Collection> {
    store: &'a mut C,
    registry: &'a SchemaRegistry,
    default_deck: &'a str,
    today: NaiveDate,
}

impl<'a, C: Collection> SyncEngine<'a, C> {
    pub fn new(store: &'a mut C, registry: &'a SchemaRegistry, default_deck: &'a str) -> Self {
        Self {
            store,
            registry,
            default_deck,
            today: Local::now().date_naive(),
        }
    }

    /// Pins "today" for due-date offset computation. Tests use this to make
    /// seeded due dates deterministic.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Runs the full reconciliation pass.
    pub fn run(mut self, notes: &[SourceNote]) -> Result<SyncReport, SyncError> {
        let started_at = Instant::now();
        self.preflight()?;

        let source_map: BTreeMap<SourceId, &SourceNote> = notes
            .iter()
            .map(|note| (note.id.clone(), note))
            .collect();
        let source_ids: BTreeSet<SourceId> = source_map.keys().cloned().collect();

        let type_names = self.registry.names();
        let mut target_map: BTreeMap<SourceId, StoredNote> = self
            .store
            .notes_of_types(&type_names)?
            .into_iter()
            .map(|note| (note.source_id.clone(), note))
            .collect();
        let target_ids: BTreeSet<SourceId> = target_map.keys().cloned().collect();

        let diff = diff_ids(&source_ids, &target_ids);
        let mut report = SyncReport::default();

        for id in &diff.to_add {
            let Some(source) = source_map.get(id) else {
                continue;
            };
            self.add_note(source)?;
            report.added += 1;
        }

        for id in &diff.to_edit {
            let (Some(source), Some(stored)) = (source_map.get(id), target_map.remove(id)) else {
                continue;
            };
            if self.edit_note(source, stored)? {
                report.updated += 1;
            }
        }

        let doomed: Vec<NoteHandle> = diff
            .to_remove
            .iter()
            .filter_map(|id| target_map.get(id).map(|note| note.handle))
            .collect();
        self.store.remove_notes(&doomed)?;
        report.removed = doomed.len();

        info!(
            "event=sync module=sync status=ok added={} updated={} removed={} duration_ms={}",
            report.added,
            report.updated,
            report.removed,
            started_at.elapsed().as_millis()
        );
        Ok(report)
    }

    /// Verifies every recognized note type before any mutation: missing
    /// types are registered, structurally altered ones abort the run.
    fn preflight(&mut self) -> Result<(), SyncError> {
        for schema in self.registry.iter() {
            match self.store.type_layout(&schema.name)? {
                None => self.store.ensure_type(schema)?,
                Some(layout) => {
                    if !schema.layout_matches(&layout) {
                        return Err(SyncError::DamagedType {
                            type_name: schema.name.clone(),
                            details: layout_mismatch(schema, &layout),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn add_note(&mut self, source: &SourceNote) -> Result<(), SyncError> {
        let schema = self.source_schema(source)?;
        let fields = desired_fields(schema, source);
        let deck = self.store.deck_handle(source.deck_or(self.default_deck))?;
        let handle = self
            .store
            .create_note(&source.type_name, &source.id, &fields, deck)?;

        if let Some(schedule) = source.schedule {
            self.seed_schedule(handle, schedule)?;
        }
        Ok(())
    }

    /// Applies the authored progress snapshot to every card of a freshly
    /// created note. Runs exactly once; from here on the collection owns
    /// all scheduling state for this note.
    fn seed_schedule(&mut self, handle: NoteHandle, schedule: Schedule) -> Result<(), SyncError> {
        let days_from_today = (schedule.due - self.today).num_days();
        for mut card in self.store.cards_of(handle)? {
            card.queue = CardQueue::Review;
            card.ivl = schedule.ivl;
            card.ease = schedule.ease;
            card.lapses = schedule.lapses;
            self.store.update_card(&card)?;
            self.store.set_due_in_days(card.handle, days_from_today)?;
        }
        Ok(())
    }

    /// Reconciles one note present on both sides. Returns whether a field
    /// write happened. Migration must complete before the field comparison
    /// because field names depend on the type.
    fn edit_note(&mut self, source: &SourceNote, stored: StoredNote) -> Result<bool, SyncError> {
        let stored = if stored.type_name == source.type_name {
            stored
        } else {
            self.migrate_note(source, stored)?
        };

        let schema = self.source_schema(source)?;
        let fields = desired_fields(schema, source);
        let changed = fields != stored.fields;
        if changed {
            self.store.update_fields(stored.handle, &fields)?;
        }

        self.place_cards(source, stored.handle)?;
        Ok(changed)
    }

    /// Changes the stored note's type in place and returns the re-read
    /// note; the caller's previous record is stale after this.
    fn migrate_note(
        &mut self,
        source: &SourceNote,
        stored: StoredNote,
    ) -> Result<StoredNote, SyncError> {
        let old = self
            .registry
            .get(&stored.type_name)
            .ok_or_else(|| SyncError::UnknownTargetType {
                source_id: stored.source_id.clone(),
                type_name: stored.type_name.clone(),
            })?;
        let new = self.source_schema(source)?;

        let field_map = new.field_remap_from(old);
        let card_map = new.card_remap_from(old);
        info!(
            "event=type_migrate module=sync status=ok note={} from={} to={}",
            stored.source_id, old.name, new.name
        );
        self.store
            .change_note_type(stored.handle, &new.name, &field_map, &card_map)?;

        Ok(self.store.get_note(stored.handle)?)
    }

    /// Moves every card of the note into its desired deck, creating the
    /// deck on first use. No-op for cards already placed correctly.
    fn place_cards(&mut self, source: &SourceNote, handle: NoteHandle) -> Result<(), SyncError> {
        let deck = self.store.deck_handle(source.deck_or(self.default_deck))?;
        for card in self.store.cards_of(handle)? {
            if card.deck != deck {
                self.store.move_card(card.handle, deck)?;
            }
        }
        Ok(())
    }

    fn source_schema(&self, source: &SourceNote) -> Result<&'a NoteSchema, SyncError> {
        self.registry
            .get(&source.type_name)
            .ok_or_else(|| SyncError::UnknownSourceType {
                source_id: source.id.clone(),
                type_name: source.type_name.clone(),
            })
    }
}

/// Projects the source note onto the schema's field layout: every schema
/// field gets the source value or empty text, source fields outside the
/// schema are ignored.
fn desired_fields(schema: &NoteSchema, source: &SourceNote) -> BTreeMap<String, String> {
    schema
        .fields
        .iter()
        .map(|spec| {
            let value = source.fields.get(&spec.name).cloned().unwrap_or_default();
            (spec.name.clone(), value)
        })
        .collect()
}

fn layout_mismatch(expected: &NoteSchema, found: &NoteSchema) -> String {
    format!(
        "expected fields {:?} and cards {:?}, found fields {:?} and cards {:?}",
        expected.field_names(),
        expected.card_names(),
        found.field_names(),
        found.card_names()
    )
}

#[cfg(test)]
mod tests {
    use super::desired_fields;
    use crate::model::source_note::SourceNote;
    use crate::schema::{CardSpec, FieldSpec, NoteSchema};

    #[test]
    fn desired_fields_fills_missing_fields_and_drops_unknown_ones() {
        let schema = NoteSchema::new(
            "QuestionAnswer",
            vec![FieldSpec::new("Question"), FieldSpec::new("Answer")],
            vec![CardSpec::new("Forward")],
        );
        let source = SourceNote::new("20240101120000000", "QuestionAnswer")
            .with_field("Question", "2+2")
            .with_field("Stray", "ignored");

        let fields = desired_fields(&schema, &source);
        assert_eq!(fields.get("Question").map(String::as_str), Some("2+2"));
        assert_eq!(fields.get("Answer").map(String::as_str), Some(""));
        assert!(!fields.contains_key("Stray"));
    }
}
