use chrono::{Duration, Local};
use wikirecall_core::store::epoch_day;
use wikirecall_core::{
    sync, CardQueue, CardSpec, Collection, FieldSpec, NoteSchema, Schedule, SchemaRegistry,
    SourceNote, SqliteCollection, SyncEngine,
};

fn pair_schema() -> NoteSchema {
    NoteSchema::new(
        "Pair",
        vec![FieldSpec::new("First"), FieldSpec::new("Second")],
        vec![CardSpec::new("Front"), CardSpec::new("Back")],
    )
}

fn registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry.register(pair_schema()).unwrap();
    registry
}

fn pair_note() -> SourceNote {
    SourceNote::new("20240101120000000", "Pair")
        .with_field("First", "bonjour")
        .with_field("Second", "hello")
}

#[test]
fn seeds_every_card_of_a_new_note() {
    let mut store = SqliteCollection::open_in_memory().unwrap();
    let registry = registry();
    let today = Local::now().date_naive();

    let note = pair_note().with_schedule(Schedule::new(5, 1800, 1, today + Duration::days(4)));
    SyncEngine::new(&mut store, &registry, "Default")
        .with_today(today)
        .run(&[note])
        .unwrap();

    let stored = store
        .notes_of_types(&registry.names())
        .unwrap()
        .into_iter()
        .next()
        .unwrap();
    let cards = store.cards_of(stored.handle).unwrap();
    assert_eq!(cards.len(), 2);
    for card in cards {
        assert_eq!(card.queue, CardQueue::Review);
        assert_eq!(card.ivl, 5);
        assert_eq!(card.ease, 1800);
        assert_eq!(card.lapses, 1);
        assert_eq!(card.due_day, epoch_day(today) + 4);
    }
}

#[test]
fn overdue_snapshot_yields_negative_offset() {
    let mut store = SqliteCollection::open_in_memory().unwrap();
    let registry = registry();
    let today = Local::now().date_naive();

    let note = pair_note().with_schedule(Schedule::new(10, 2100, 0, today - Duration::days(3)));
    SyncEngine::new(&mut store, &registry, "Default")
        .with_today(today)
        .run(&[note])
        .unwrap();

    let stored = store
        .notes_of_types(&registry.names())
        .unwrap()
        .into_iter()
        .next()
        .unwrap();
    for card in store.cards_of(stored.handle).unwrap() {
        assert_eq!(card.due_day, epoch_day(today) - 3);
    }
}

#[test]
fn note_without_snapshot_keeps_default_scheduling() {
    let mut store = SqliteCollection::open_in_memory().unwrap();
    let registry = registry();

    sync(&[pair_note()], &mut store, &registry, "Default").unwrap();

    let stored = store
        .notes_of_types(&registry.names())
        .unwrap()
        .into_iter()
        .next()
        .unwrap();
    for card in store.cards_of(stored.handle).unwrap() {
        assert_eq!(card.queue, CardQueue::New);
        assert_eq!(card.ivl, 0);
        assert_eq!(card.ease, 2500);
        assert_eq!(card.lapses, 0);
        assert_eq!(card.due_day, 0);
    }
}

#[test]
fn later_edits_never_touch_scheduling() {
    let mut store = SqliteCollection::open_in_memory().unwrap();
    let registry = registry();
    let today = Local::now().date_naive();

    let note = pair_note().with_schedule(Schedule::new(5, 1800, 1, today + Duration::days(4)));
    SyncEngine::new(&mut store, &registry, "Default")
        .with_today(today)
        .run(&[note.clone()])
        .unwrap();

    let stored = store
        .notes_of_types(&registry.names())
        .unwrap()
        .into_iter()
        .next()
        .unwrap();
    let before = store.cards_of(stored.handle).unwrap();

    // Field edit, deck move and a different snapshot: none of it may
    // change review state after creation.
    let edited = pair_note()
        .with_field("Second", "hi")
        .with_deck("Languages")
        .with_schedule(Schedule::new(99, 1300, 7, today + Duration::days(40)));
    let report = sync(&[edited], &mut store, &registry, "Default").unwrap();
    assert_eq!(report.updated, 1);

    let after = store.cards_of(stored.handle).unwrap();
    assert_eq!(before.len(), after.len());
    for (b, a) in before.iter().zip(after.iter()) {
        assert_eq!(b.queue, a.queue);
        assert_eq!(b.ivl, a.ivl);
        assert_eq!(b.ease, a.ease);
        assert_eq!(b.lapses, a.lapses);
        assert_eq!(b.due_day, a.due_day);
        assert_ne!(b.deck, a.deck);
    }
}
