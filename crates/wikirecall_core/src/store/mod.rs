//! Target collection contracts.
//!
//! # Responsibility
//! - Define the capability set the sync engine needs from a collection.
//! - Define the stored note/card records the engine reads back.
//!
//! # Invariants
//! - A collection assigns exactly one card per card template at note
//!   creation, all in the requested deck with default scheduling.
//! - Invalid persisted state is rejected with `InvalidData`, not masked.

use crate::db::DbError;
use crate::model::source_note::SourceId;
use crate::schema::NoteSchema;
use chrono::{Datelike, NaiveDate};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod sqlite;

/// Collection-side handle of a note.
pub type NoteHandle = i64;
/// Collection-side handle of a card.
pub type CardHandle = i64;
/// Collection-side handle of a deck.
pub type DeckHandle = i64;

pub type StoreResult<T> = Result<T, StoreError>;

/// Generic collection persistence error.
#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    NoteNotFound(NoteHandle),
    CardNotFound(CardHandle),
    DeckNotFound(DeckHandle),
    UnknownType(String),
    InvalidData(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NoteNotFound(handle) => write!(f, "note not found: {handle}"),
            Self::CardNotFound(handle) => write!(f, "card not found: {handle}"),
            Self::DeckNotFound(handle) => write!(f, "deck not found: {handle}"),
            Self::UnknownType(name) => write!(f, "note type not in collection: `{name}`"),
            Self::InvalidData(message) => {
                write!(f, "invalid persisted collection data: {message}")
            }
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Review queue a card currently sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardQueue {
    New,
    Learning,
    Review,
}

/// One synced note as the collection stores it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredNote {
    pub handle: NoteHandle,
    /// Correlation key back to the source note; indexed by the store.
    pub source_id: SourceId,
    pub type_name: String,
    /// Field name to field text, covering every field of `type_name`.
    pub fields: BTreeMap<String, String>,
}

/// One reviewable card belonging to a stored note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCard {
    pub handle: CardHandle,
    pub note: NoteHandle,
    /// Card template name within the note's type.
    pub template: String,
    pub deck: DeckHandle,
    pub queue: CardQueue,
    /// Review interval in days.
    pub ivl: i64,
    /// Ease factor in per-mille.
    pub ease: u32,
    pub lapses: u32,
    /// Due date as a day number (see [`epoch_day`]).
    pub due_day: i64,
}

/// Converts a calendar date to the day numbering used for `due_day`.
pub fn epoch_day(date: NaiveDate) -> i64 {
    i64::from(date.num_days_from_ce())
}

/// Capability set the sync engine requires from a target collection.
///
/// The engine is the sole writer for the duration of one sync run; the
/// caller must guarantee exclusive access for that window.
pub trait Collection {
    /// Registers a note type if it is missing. No-op when a type of that
    /// name already exists, regardless of its layout.
    fn ensure_type(&mut self, schema: &NoteSchema) -> StoreResult<()>;

    /// Returns the stored layout of a note type, or `None` if unregistered.
    fn type_layout(&self, type_name: &str) -> StoreResult<Option<NoteSchema>>;

    /// Returns every note whose type is one of `type_names`.
    fn notes_of_types(&self, type_names: &[&str]) -> StoreResult<Vec<StoredNote>>;

    /// Reads one note back by handle.
    fn get_note(&self, note: NoteHandle) -> StoreResult<StoredNote>;

    /// Creates a note of `type_name` in `deck`, with one default-scheduled
    /// card per card template. Fields absent from `fields` are stored empty.
    fn create_note(
        &mut self,
        type_name: &str,
        source_id: &str,
        fields: &BTreeMap<String, String>,
        deck: DeckHandle,
    ) -> StoreResult<NoteHandle>;

    /// Overwrites field values of an existing note.
    fn update_fields(
        &mut self,
        note: NoteHandle,
        fields: &BTreeMap<String, String>,
    ) -> StoreResult<()>;

    /// Bulk-deletes notes with their fields and cards. Irreversible.
    fn remove_notes(&mut self, notes: &[NoteHandle]) -> StoreResult<()>;

    /// Changes a note's type in place. `field_map`/`card_map` map old field
    /// and card template names to their successors (`None` drops them).
    /// Mapped fields keep their content and mapped cards their scheduling;
    /// templates of the new type with no inbound mapping get fresh
    /// default-scheduled cards in the note's current deck.
    fn change_note_type(
        &mut self,
        note: NoteHandle,
        new_type: &str,
        field_map: &BTreeMap<String, Option<String>>,
        card_map: &BTreeMap<String, Option<String>>,
    ) -> StoreResult<()>;

    /// Returns the note's cards in stable (creation) order.
    fn cards_of(&self, note: NoteHandle) -> StoreResult<Vec<StoredCard>>;

    /// Persists queue, interval, ease, lapse and deck state of one card.
    fn update_card(&mut self, card: &StoredCard) -> StoreResult<()>;

    /// Sets a card's due date `days_from_today` days from today, keeping
    /// the store's own due-date bookkeeping consistent. Negative offsets
    /// mean overdue.
    fn set_due_in_days(&mut self, card: CardHandle, days_from_today: i64) -> StoreResult<()>;

    /// Resolves a deck by name, creating it if absent. Idempotent.
    fn deck_handle(&mut self, name: &str) -> StoreResult<DeckHandle>;

    /// Moves one card into a deck.
    fn move_card(&mut self, card: CardHandle, deck: DeckHandle) -> StoreResult<()>;
}
