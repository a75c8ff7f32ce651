//! SQLite-backed reference collection.
//!
//! # Responsibility
//! - Implement the [`Collection`] capability set over the bundled schema.
//! - Keep SQL details inside this persistence boundary.
//!
//! # Invariants
//! - Note removal cascades to fields and cards (`foreign_keys=ON`).
//! - Read paths reject invalid persisted state instead of masking it.

use super::{
    epoch_day, CardHandle, CardQueue, Collection, DeckHandle, NoteHandle, StoreError, StoreResult,
    StoredCard, StoredNote,
};
use crate::db::{open_db, open_db_in_memory};
use crate::schema::{CardSpec, FieldSpec, NoteSchema};
use chrono::Local;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

const CARD_SELECT_SQL: &str = "SELECT
    id,
    note_id,
    template,
    deck_id,
    queue,
    ivl,
    ease,
    lapses,
    due_day
FROM cards";

/// Separator used to persist `maps_from` alias lists in one column.
const ALIAS_SEP: char = '\u{1f}';

/// Handles per `IN (…)` clause, well below SQLite's variable limit.
const SQL_BATCH_SIZE: usize = 500;

/// SQLite-backed target collection.
#[derive(Debug)]
pub struct SqliteCollection {
    conn: Connection,
}

impl SqliteCollection {
    /// Wraps an already bootstrapped connection (see [`crate::db::open_db`]).
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Opens (or creates) a collection file and applies migrations.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Ok(Self::new(open_db(path)?))
    }

    /// Opens a fresh in-memory collection, mainly for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        Ok(Self::new(open_db_in_memory()?))
    }

    fn note_fields(&self, note: NoteHandle) -> StoreResult<BTreeMap<String, String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, value FROM note_fields WHERE note_id = ?1;")?;
        let mut rows = stmt.query([note])?;
        let mut fields = BTreeMap::new();
        while let Some(row) = rows.next()? {
            fields.insert(row.get(0)?, row.get(1)?);
        }
        Ok(fields)
    }

    fn type_exists(&self, type_name: &str) -> StoreResult<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM note_types WHERE name = ?1);",
            [type_name],
            |row| row.get(0),
        )?;
        Ok(exists)
    }
}

impl Collection for SqliteCollection {
    fn ensure_type(&mut self, schema: &NoteSchema) -> StoreResult<()> {
        if self.type_exists(&schema.name)? {
            return Ok(());
        }

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO note_types (name) VALUES (?1);",
            [schema.name.as_str()],
        )?;
        for (ord, spec) in schema.fields.iter().enumerate() {
            tx.execute(
                "INSERT INTO note_type_fields (type_name, ord, name, maps_from)
                 VALUES (?1, ?2, ?3, ?4);",
                params![
                    schema.name,
                    ord as i64,
                    spec.name,
                    encode_aliases(&spec.maps_from)
                ],
            )?;
        }
        for (ord, spec) in schema.cards.iter().enumerate() {
            tx.execute(
                "INSERT INTO note_type_cards (type_name, ord, name, maps_from)
                 VALUES (?1, ?2, ?3, ?4);",
                params![
                    schema.name,
                    ord as i64,
                    spec.name,
                    encode_aliases(&spec.maps_from)
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn type_layout(&self, type_name: &str) -> StoreResult<Option<NoteSchema>> {
        if !self.type_exists(type_name)? {
            return Ok(None);
        }

        let mut fields = Vec::new();
        let mut stmt = self.conn.prepare(
            "SELECT name, maps_from FROM note_type_fields WHERE type_name = ?1 ORDER BY ord;",
        )?;
        let mut rows = stmt.query([type_name])?;
        while let Some(row) = rows.next()? {
            fields.push(FieldSpec {
                name: row.get(0)?,
                maps_from: decode_aliases(&row.get::<_, String>(1)?),
            });
        }

        let mut cards = Vec::new();
        let mut stmt = self.conn.prepare(
            "SELECT name, maps_from FROM note_type_cards WHERE type_name = ?1 ORDER BY ord;",
        )?;
        let mut rows = stmt.query([type_name])?;
        while let Some(row) = rows.next()? {
            cards.push(CardSpec {
                name: row.get(0)?,
                maps_from: decode_aliases(&row.get::<_, String>(1)?),
            });
        }

        Ok(Some(NoteSchema::new(type_name, fields, cards)))
    }

    fn notes_of_types(&self, type_names: &[&str]) -> StoreResult<Vec<StoredNote>> {
        if type_names.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT id, source_id, type_name FROM notes
             WHERE type_name IN ({}) ORDER BY id;",
            placeholders(type_names.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(type_names.iter().copied()))?;

        let mut heads: Vec<(NoteHandle, String, String)> = Vec::new();
        while let Some(row) = rows.next()? {
            heads.push((row.get(0)?, row.get(1)?, row.get(2)?));
        }
        drop(rows);
        drop(stmt);

        let mut notes = Vec::with_capacity(heads.len());
        for (handle, source_id, type_name) in heads {
            let fields = self.note_fields(handle)?;
            notes.push(StoredNote {
                handle,
                source_id,
                type_name,
                fields,
            });
        }
        Ok(notes)
    }

    fn get_note(&self, note: NoteHandle) -> StoreResult<StoredNote> {
        let head: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT source_id, type_name FROM notes WHERE id = ?1;",
                [note],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (source_id, type_name) = head.ok_or(StoreError::NoteNotFound(note))?;
        Ok(StoredNote {
            handle: note,
            source_id,
            type_name,
            fields: self.note_fields(note)?,
        })
    }

    fn create_note(
        &mut self,
        type_name: &str,
        source_id: &str,
        fields: &BTreeMap<String, String>,
        deck: DeckHandle,
    ) -> StoreResult<NoteHandle> {
        let layout = self
            .type_layout(type_name)?
            .ok_or_else(|| StoreError::UnknownType(type_name.to_string()))?;

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO notes (source_id, type_name) VALUES (?1, ?2);",
            params![source_id, type_name],
        )?;
        let note = tx.last_insert_rowid();

        for spec in &layout.fields {
            let value = fields.get(&spec.name).map(String::as_str).unwrap_or("");
            tx.execute(
                "INSERT INTO note_fields (note_id, name, value) VALUES (?1, ?2, ?3);",
                params![note, spec.name, value],
            )?;
        }
        for spec in &layout.cards {
            tx.execute(
                "INSERT INTO cards (note_id, template, deck_id) VALUES (?1, ?2, ?3);",
                params![note, spec.name, deck],
            )?;
        }
        tx.commit()?;
        Ok(note)
    }

    fn update_fields(
        &mut self,
        note: NoteHandle,
        fields: &BTreeMap<String, String>,
    ) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        let changed = tx.execute(
            "UPDATE notes SET updated_at = (strftime('%s', 'now') * 1000) WHERE id = ?1;",
            [note],
        )?;
        if changed == 0 {
            return Err(StoreError::NoteNotFound(note));
        }

        for (name, value) in fields {
            tx.execute(
                "INSERT INTO note_fields (note_id, name, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(note_id, name) DO UPDATE SET value = excluded.value;",
                params![note, name, value],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn remove_notes(&mut self, notes: &[NoteHandle]) -> StoreResult<()> {
        if notes.is_empty() {
            return Ok(());
        }

        let tx = self.conn.transaction()?;
        for chunk in notes.chunks(SQL_BATCH_SIZE) {
            let sql = format!(
                "DELETE FROM notes WHERE id IN ({});",
                placeholders(chunk.len())
            );
            tx.execute(&sql, params_from_iter(chunk.iter().copied()))?;
        }
        tx.commit()?;
        Ok(())
    }

    fn change_note_type(
        &mut self,
        note: NoteHandle,
        new_type: &str,
        field_map: &BTreeMap<String, Option<String>>,
        card_map: &BTreeMap<String, Option<String>>,
    ) -> StoreResult<()> {
        let stored = self.get_note(note)?;
        let layout = self
            .type_layout(new_type)?
            .ok_or_else(|| StoreError::UnknownType(new_type.to_string()))?;
        let cards = self.cards_of(note)?;
        let fallback_deck = cards
            .first()
            .map(|card| card.deck)
            .ok_or_else(|| StoreError::InvalidData(format!("note {note} has no cards")))?;

        let tx = self.conn.transaction()?;
        tx.execute(
            "UPDATE notes SET type_name = ?1, updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?2;",
            params![new_type, note],
        )?;

        // Fields: rebuild the whole row set under the new layout, carrying
        // content across wherever the map defines a correspondence.
        tx.execute("DELETE FROM note_fields WHERE note_id = ?1;", [note])?;
        let mut inherited: BTreeMap<&str, &str> = BTreeMap::new();
        for (old_name, target) in field_map {
            if let (Some(new_name), Some(value)) = (target, stored.fields.get(old_name)) {
                inherited.entry(new_name.as_str()).or_insert(value.as_str());
            }
        }
        for spec in &layout.fields {
            let value = inherited.get(spec.name.as_str()).copied().unwrap_or("");
            tx.execute(
                "INSERT INTO note_fields (note_id, name, value) VALUES (?1, ?2, ?3);",
                params![note, spec.name, value],
            )?;
        }

        // Cards: mapped cards keep scheduling under the new template name,
        // unmapped cards are dropped, unclaimed templates start fresh.
        let mut claimed: BTreeSet<String> = BTreeSet::new();
        for card in &cards {
            let target = card_map.get(&card.template).cloned().flatten();
            match target {
                Some(new_template) if !claimed.contains(&new_template) => {
                    tx.execute(
                        "UPDATE cards SET template = ?1 WHERE id = ?2;",
                        params![new_template, card.handle],
                    )?;
                    claimed.insert(new_template);
                }
                _ => {
                    tx.execute("DELETE FROM cards WHERE id = ?1;", [card.handle])?;
                }
            }
        }
        for spec in &layout.cards {
            if claimed.contains(&spec.name) {
                continue;
            }
            tx.execute(
                "INSERT INTO cards (note_id, template, deck_id) VALUES (?1, ?2, ?3);",
                params![note, spec.name, fallback_deck],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn cards_of(&self, note: NoteHandle) -> StoreResult<Vec<StoredCard>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{CARD_SELECT_SQL} WHERE note_id = ?1 ORDER BY id;"))?;
        let mut rows = stmt.query([note])?;
        let mut cards = Vec::new();
        while let Some(row) = rows.next()? {
            cards.push(parse_card_row(row)?);
        }
        Ok(cards)
    }

    fn update_card(&mut self, card: &StoredCard) -> StoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE cards
             SET
                template = ?1,
                deck_id = ?2,
                queue = ?3,
                ivl = ?4,
                ease = ?5,
                lapses = ?6,
                due_day = ?7
             WHERE id = ?8;",
            params![
                card.template,
                card.deck,
                queue_to_db(card.queue),
                card.ivl,
                card.ease,
                card.lapses,
                card.due_day,
                card.handle,
            ],
        )?;

        if changed == 0 {
            return Err(StoreError::CardNotFound(card.handle));
        }
        Ok(())
    }

    fn set_due_in_days(&mut self, card: CardHandle, days_from_today: i64) -> StoreResult<()> {
        let due_day = epoch_day(Local::now().date_naive()) + days_from_today;
        let changed = self.conn.execute(
            "UPDATE cards SET due_day = ?1 WHERE id = ?2;",
            params![due_day, card],
        )?;

        if changed == 0 {
            return Err(StoreError::CardNotFound(card));
        }
        Ok(())
    }

    fn deck_handle(&mut self, name: &str) -> StoreResult<DeckHandle> {
        let existing: Option<DeckHandle> = self
            .conn
            .query_row("SELECT id FROM decks WHERE name = ?1;", [name], |row| {
                row.get(0)
            })
            .optional()?;
        if let Some(handle) = existing {
            return Ok(handle);
        }

        self.conn
            .execute("INSERT INTO decks (name) VALUES (?1);", [name])?;
        Ok(self.conn.last_insert_rowid())
    }

    fn move_card(&mut self, card: CardHandle, deck: DeckHandle) -> StoreResult<()> {
        let deck_exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM decks WHERE id = ?1);",
            [deck],
            |row| row.get(0),
        )?;
        if !deck_exists {
            return Err(StoreError::DeckNotFound(deck));
        }

        let changed = self.conn.execute(
            "UPDATE cards SET deck_id = ?1 WHERE id = ?2;",
            params![deck, card],
        )?;

        if changed == 0 {
            return Err(StoreError::CardNotFound(card));
        }
        Ok(())
    }
}

fn parse_card_row(row: &Row<'_>) -> StoreResult<StoredCard> {
    let queue_text: String = row.get("queue")?;
    let queue = parse_queue(&queue_text).ok_or_else(|| {
        StoreError::InvalidData(format!("invalid queue value `{queue_text}` in cards.queue"))
    })?;

    let ease = u32::try_from(row.get::<_, i64>("ease")?).map_err(|_| {
        StoreError::InvalidData("out-of-range ease factor in cards.ease".to_string())
    })?;
    let lapses = u32::try_from(row.get::<_, i64>("lapses")?).map_err(|_| {
        StoreError::InvalidData("out-of-range lapse count in cards.lapses".to_string())
    })?;

    Ok(StoredCard {
        handle: row.get("id")?,
        note: row.get("note_id")?,
        template: row.get("template")?,
        deck: row.get("deck_id")?,
        queue,
        ivl: row.get("ivl")?,
        ease,
        lapses,
        due_day: row.get("due_day")?,
    })
}

fn queue_to_db(queue: CardQueue) -> &'static str {
    match queue {
        CardQueue::New => "new",
        CardQueue::Learning => "learning",
        CardQueue::Review => "review",
    }
}

fn parse_queue(value: &str) -> Option<CardQueue> {
    match value {
        "new" => Some(CardQueue::New),
        "learning" => Some(CardQueue::Learning),
        "review" => Some(CardQueue::Review),
        _ => None,
    }
}

fn encode_aliases(aliases: &[String]) -> String {
    aliases.join(&ALIAS_SEP.to_string())
}

fn decode_aliases(value: &str) -> Vec<String> {
    value
        .split(ALIAS_SEP)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

fn placeholders(count: usize) -> String {
    let mut out = String::with_capacity(count * 2);
    for index in 0..count {
        if index > 0 {
            out.push(',');
        }
        out.push('?');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{decode_aliases, encode_aliases, placeholders, SqliteCollection, SQL_BATCH_SIZE};
    use crate::schema::{CardSpec, FieldSpec, NoteSchema};
    use crate::store::{Collection, StoreError};
    use std::collections::BTreeMap;

    #[test]
    fn alias_codec_roundtrips_and_ignores_empty_parts() {
        let aliases = vec!["Question".to_string(), "Front".to_string()];
        assert_eq!(decode_aliases(&encode_aliases(&aliases)), aliases);
        assert!(decode_aliases("").is_empty());
    }

    #[test]
    fn placeholders_are_comma_separated() {
        assert_eq!(placeholders(1), "?");
        assert_eq!(placeholders(3), "?,?,?");
    }

    #[test]
    fn deck_handle_is_idempotent() {
        let mut store = SqliteCollection::open_in_memory().unwrap();
        let first = store.deck_handle("Default").unwrap();
        let second = store.deck_handle("Default").unwrap();
        assert_eq!(first, second);
        assert_ne!(first, store.deck_handle("Math").unwrap());
    }

    #[test]
    fn remove_notes_spanning_several_batches_deletes_them_all() {
        let mut store = SqliteCollection::open_in_memory().unwrap();
        let schema = NoteSchema::new(
            "QuestionAnswer",
            vec![FieldSpec::new("Question"), FieldSpec::new("Answer")],
            vec![CardSpec::new("Forward")],
        );
        store.ensure_type(&schema).unwrap();
        let deck = store.deck_handle("Default").unwrap();

        let count = SQL_BATCH_SIZE * 2 + 1;
        let mut handles = Vec::with_capacity(count);
        for index in 0..count {
            let handle = store
                .create_note(
                    "QuestionAnswer",
                    &format!("2024010112{index:07}"),
                    &BTreeMap::new(),
                    deck,
                )
                .unwrap();
            handles.push(handle);
        }

        store.remove_notes(&handles).unwrap();
        assert!(store.notes_of_types(&["QuestionAnswer"]).unwrap().is_empty());
    }

    #[test]
    fn move_card_rejects_stale_deck_handle() {
        let mut store = SqliteCollection::open_in_memory().unwrap();
        let schema = NoteSchema::new(
            "QuestionAnswer",
            vec![FieldSpec::new("Question"), FieldSpec::new("Answer")],
            vec![CardSpec::new("Forward")],
        );
        store.ensure_type(&schema).unwrap();
        let deck = store.deck_handle("Default").unwrap();
        let note = store
            .create_note("QuestionAnswer", "20240101120000000", &BTreeMap::new(), deck)
            .unwrap();
        let card = store.cards_of(note).unwrap()[0].handle;

        let err = store.move_card(card, deck + 1).unwrap_err();
        assert!(matches!(err, StoreError::DeckNotFound(_)));
    }

    #[test]
    fn out_of_range_card_counters_are_rejected_on_read() {
        let mut store = SqliteCollection::open_in_memory().unwrap();
        let schema = NoteSchema::new(
            "QuestionAnswer",
            vec![FieldSpec::new("Question"), FieldSpec::new("Answer")],
            vec![CardSpec::new("Forward")],
        );
        store.ensure_type(&schema).unwrap();
        let deck = store.deck_handle("Default").unwrap();
        let note = store
            .create_note("QuestionAnswer", "20240101120000000", &BTreeMap::new(), deck)
            .unwrap();

        store
            .conn
            .execute("UPDATE cards SET ease = -1 WHERE note_id = ?1;", [note])
            .unwrap();
        let err = store.cards_of(note).unwrap_err();
        assert!(err.to_string().contains("out-of-range"));
    }

    #[test]
    fn ensure_type_persists_layout_and_is_idempotent() {
        let mut store = SqliteCollection::open_in_memory().unwrap();
        let schema = NoteSchema::new(
            "QuestionAnswer",
            vec![FieldSpec::new("Question"), FieldSpec::new("Answer")],
            vec![CardSpec::new("Forward")],
        );

        store.ensure_type(&schema).unwrap();
        store.ensure_type(&schema).unwrap();

        let layout = store.type_layout("QuestionAnswer").unwrap().unwrap();
        assert!(layout.layout_matches(&schema));
        assert!(store.type_layout("Missing").unwrap().is_none());
    }
}
