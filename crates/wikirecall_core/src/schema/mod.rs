//! Note type schemas and the registry the engine recognizes them through.
//!
//! # Responsibility
//! - Describe a note type's field and card layout.
//! - Compute field/card remaps used when a note changes type in place.
//! - Keep the set of recognized schemas in a validated registry.
//!
//! # Invariants
//! - Schema, field and card names are non-empty and unique per schema.
//! - Remaps are deterministic: exact-name matches win over `maps_from`
//!   aliases, and every target field/card is claimed at most once.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// One field of a note type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    /// Field names in *other* schemas whose content this field inherits
    /// when a note migrates to this type.
    pub maps_from: Vec<String>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            maps_from: Vec::new(),
        }
    }

    pub fn mapped_from(name: impl Into<String>, aliases: &[&str]) -> Self {
        Self {
            name: name.into(),
            maps_from: aliases.iter().map(|alias| alias.to_string()).collect(),
        }
    }
}

/// One card template of a note type. Cards generated from it carry their
/// own scheduling state in the collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardSpec {
    pub name: String,
    /// Card template names in other schemas whose scheduling a card of this
    /// template inherits when a note migrates to this type.
    pub maps_from: Vec<String>,
}

impl CardSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            maps_from: Vec::new(),
        }
    }

    pub fn mapped_from(name: impl Into<String>, aliases: &[&str]) -> Self {
        Self {
            name: name.into(),
            maps_from: aliases.iter().map(|alias| alias.to_string()).collect(),
        }
    }
}

/// Field and card layout of one note type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteSchema {
    pub name: String,
    /// Ordered field layout.
    pub fields: Vec<FieldSpec>,
    /// Ordered card templates; the store creates one card per template.
    pub cards: Vec<CardSpec>,
}

impl NoteSchema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldSpec>, cards: Vec<CardSpec>) -> Self {
        Self {
            name: name.into(),
            fields,
            cards,
        }
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|spec| spec.name.as_str()).collect()
    }

    pub fn card_names(&self) -> Vec<&str> {
        self.cards.iter().map(|spec| spec.name.as_str()).collect()
    }

    /// Returns whether `other` has the same field and card layout.
    ///
    /// Only names and their order matter; `maps_from` aliases are remap
    /// metadata, not structure.
    pub fn layout_matches(&self, other: &NoteSchema) -> bool {
        self.field_names() == other.field_names() && self.card_names() == other.card_names()
    }

    /// Maps each of `old`'s field names to the field of this schema that
    /// inherits its content during a type change, or `None` if the content
    /// is dropped.
    pub fn field_remap_from(&self, old: &NoteSchema) -> BTreeMap<String, Option<String>> {
        let targets: Vec<(&str, &[String])> = self
            .fields
            .iter()
            .map(|spec| (spec.name.as_str(), spec.maps_from.as_slice()))
            .collect();
        remap(&old.field_names(), &targets)
    }

    /// Maps each of `old`'s card template names to the template of this
    /// schema that inherits its scheduling during a type change, or `None`
    /// if the card is dropped.
    pub fn card_remap_from(&self, old: &NoteSchema) -> BTreeMap<String, Option<String>> {
        let targets: Vec<(&str, &[String])> = self
            .cards
            .iter()
            .map(|spec| (spec.name.as_str(), spec.maps_from.as_slice()))
            .collect();
        remap(&old.card_names(), &targets)
    }
}

/// Two-pass remap: exact-name matches claim their target first, then
/// leftover old names claim the first unclaimed target listing them as an
/// alias. Old names with no target map to `None`.
fn remap(old_names: &[&str], targets: &[(&str, &[String])]) -> BTreeMap<String, Option<String>> {
    let mut claimed: BTreeSet<&str> = BTreeSet::new();
    let mut out: BTreeMap<String, Option<String>> = BTreeMap::new();

    for old in old_names {
        if targets.iter().any(|(name, _)| name == old) {
            claimed.insert(*old);
            out.insert(old.to_string(), Some(old.to_string()));
        }
    }

    for old in old_names {
        if out.contains_key(*old) {
            continue;
        }
        let target = targets.iter().find(|(name, aliases)| {
            !claimed.contains(name) && aliases.iter().any(|alias| alias == old)
        });
        match target {
            Some((name, _)) => {
                claimed.insert(*name);
                out.insert(old.to_string(), Some(name.to_string()));
            }
            None => {
                out.insert(old.to_string(), None);
            }
        }
    }

    out
}

/// Schema registration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    InvalidName(String),
    DuplicateType(String),
    EmptyLayout(String),
    DuplicateField { type_name: String, field: String },
    DuplicateCard { type_name: String, card: String },
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName(value) => write!(f, "schema name is invalid: `{value}`"),
            Self::DuplicateType(value) => write!(f, "schema already registered: `{value}`"),
            Self::EmptyLayout(value) => {
                write!(f, "schema `{value}` needs at least one field and one card")
            }
            Self::DuplicateField { type_name, field } => {
                write!(f, "schema `{type_name}` declares field `{field}` twice")
            }
            Self::DuplicateCard { type_name, card } => {
                write!(f, "schema `{type_name}` declares card `{card}` twice")
            }
        }
    }
}

impl Error for SchemaError {}

/// The set of note type schemas this engine recognizes.
///
/// Collection notes of any other type are invisible to the sync and never
/// touched by it.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, NoteSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one schema.
    pub fn register(&mut self, schema: NoteSchema) -> Result<(), SchemaError> {
        let name = schema.name.trim();
        if name.is_empty() || name != schema.name {
            return Err(SchemaError::InvalidName(schema.name));
        }
        if self.schemas.contains_key(name) {
            return Err(SchemaError::DuplicateType(schema.name));
        }
        if schema.fields.is_empty() || schema.cards.is_empty() {
            return Err(SchemaError::EmptyLayout(schema.name));
        }

        let mut seen_fields = BTreeSet::new();
        for spec in &schema.fields {
            if !seen_fields.insert(spec.name.as_str()) {
                return Err(SchemaError::DuplicateField {
                    type_name: schema.name.clone(),
                    field: spec.name.clone(),
                });
            }
        }
        let mut seen_cards = BTreeSet::new();
        for spec in &schema.cards {
            if !seen_cards.insert(spec.name.as_str()) {
                return Err(SchemaError::DuplicateCard {
                    type_name: schema.name.clone(),
                    card: spec.name.clone(),
                });
            }
        }

        self.schemas.insert(schema.name.clone(), schema);
        Ok(())
    }

    pub fn get(&self, type_name: &str) -> Option<&NoteSchema> {
        self.schemas.get(type_name)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.schemas.contains_key(type_name)
    }

    /// Returns registered type names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.schemas.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NoteSchema> {
        self.schemas.values()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{CardSpec, FieldSpec, NoteSchema, SchemaError, SchemaRegistry};

    fn qa() -> NoteSchema {
        NoteSchema::new(
            "QuestionAnswer",
            vec![FieldSpec::new("Question"), FieldSpec::new("Answer")],
            vec![CardSpec::new("Forward")],
        )
    }

    fn cloze() -> NoteSchema {
        NoteSchema::new(
            "Cloze",
            vec![FieldSpec::mapped_from("Text", &["Question"])],
            vec![CardSpec::mapped_from("ClozeCard", &["Forward"])],
        )
    }

    #[test]
    fn field_remap_uses_aliases_and_drops_the_rest() {
        let remap = cloze().field_remap_from(&qa());
        assert_eq!(remap.get("Question"), Some(&Some("Text".to_string())));
        assert_eq!(remap.get("Answer"), Some(&None));
    }

    #[test]
    fn exact_name_match_wins_over_alias() {
        let old = NoteSchema::new(
            "Pair",
            vec![FieldSpec::new("Front"), FieldSpec::new("Text")],
            vec![CardSpec::new("Forward")],
        );
        // `Text` aliases `Front`, but the old layout also has a literal
        // `Text` field, which must claim the target.
        let remap = cloze().field_remap_from(&old);
        assert_eq!(remap.get("Text"), Some(&Some("Text".to_string())));
        assert_eq!(remap.get("Front"), Some(&None));
    }

    #[test]
    fn card_remap_follows_aliases() {
        let remap = cloze().card_remap_from(&qa());
        assert_eq!(remap.get("Forward"), Some(&Some("ClozeCard".to_string())));
    }

    #[test]
    fn layout_matches_ignores_aliases_but_not_order() {
        let mut renamed = qa();
        renamed.fields[0].maps_from = vec!["Text".to_string()];
        assert!(qa().layout_matches(&renamed));

        let mut reordered = qa();
        reordered.fields.reverse();
        assert!(!qa().layout_matches(&reordered));
    }

    #[test]
    fn registry_rejects_invalid_and_duplicate_schemas() {
        let mut registry = SchemaRegistry::new();
        registry.register(qa()).expect("first registration succeeds");

        assert!(matches!(
            registry.register(qa()),
            Err(SchemaError::DuplicateType(_))
        ));
        assert!(matches!(
            registry.register(NoteSchema::new("  ", vec![], vec![])),
            Err(SchemaError::InvalidName(_))
        ));
        assert!(matches!(
            registry.register(NoteSchema::new("Empty", vec![], vec![])),
            Err(SchemaError::EmptyLayout(_))
        ));
    }

    #[test]
    fn registry_rejects_duplicate_field_names() {
        let mut registry = SchemaRegistry::new();
        let schema = NoteSchema::new(
            "Broken",
            vec![FieldSpec::new("Question"), FieldSpec::new("Question")],
            vec![CardSpec::new("Forward")],
        );
        assert!(matches!(
            registry.register(schema),
            Err(SchemaError::DuplicateField { .. })
        ));
    }

    #[test]
    fn names_are_sorted() {
        let mut registry = SchemaRegistry::new();
        registry.register(qa()).expect("qa registers");
        registry.register(cloze()).expect("cloze registers");
        assert_eq!(registry.names(), vec!["Cloze", "QuestionAnswer"]);
    }
}
