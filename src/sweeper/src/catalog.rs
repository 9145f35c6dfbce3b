//! Relation catalog: the declarative list of everything a sweep checks.
//!
//! Entries are built once from configuration, validated before any store
//! access and never mutated afterwards.

use common::config::{CatalogConfig, FieldRuleConfig, RelationConfig};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

/// Catalog validation failures. All of them are fatal configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog entry {entry:?}: {field} cannot be empty")]
    EmptyName { entry: String, field: &'static str },

    #[error("catalog entry {entry:?}: {field} {value:?} must not contain '/'")]
    InvalidName {
        entry: String,
        field: &'static str,
        value: String,
    },

    #[error("catalog entry {entry:?}: deprecated and replacement field are both {field:?}")]
    IdenticalFields { entry: String, field: String },

    #[error("duplicate catalog entry name {0:?}")]
    DuplicateName(String),

    #[error("unknown catalog entry {0:?}")]
    UnknownEntry(String),
}

/// Children in `child_collection` must point at an existing parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relation {
    pub name: String,
    pub child_collection: String,
    pub foreign_key_field: String,
    pub parent_collection: String,
}

impl Relation {
    pub fn new(
        child_collection: impl Into<String>,
        foreign_key_field: impl Into<String>,
        parent_collection: impl Into<String>,
    ) -> Self {
        let child_collection = child_collection.into();
        let foreign_key_field = foreign_key_field.into();
        let parent_collection = parent_collection.into();
        Self {
            name: format!("{child_collection}.{foreign_key_field}->{parent_collection}"),
            child_collection,
            foreign_key_field,
            parent_collection,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn is_self_reference(&self) -> bool {
        self.child_collection == self.parent_collection
    }
}

impl From<&RelationConfig> for Relation {
    fn from(config: &RelationConfig) -> Self {
        let relation = Relation::new(
            config.child_collection.clone(),
            config.foreign_key_field.clone(),
            config.parent_collection.clone(),
        );
        match &config.name {
            Some(name) => relation.named(name.clone()),
            None => relation,
        }
    }
}

/// `deprecated_field` may go once `replacement_field` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldPruneRule {
    pub name: String,
    pub collection: String,
    pub deprecated_field: String,
    pub replacement_field: String,
}

impl FieldPruneRule {
    pub fn new(
        collection: impl Into<String>,
        deprecated_field: impl Into<String>,
        replacement_field: impl Into<String>,
    ) -> Self {
        let collection = collection.into();
        let deprecated_field = deprecated_field.into();
        let replacement_field = replacement_field.into();
        Self {
            name: format!("{collection}.{deprecated_field}->{replacement_field}"),
            collection,
            deprecated_field,
            replacement_field,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl From<&FieldRuleConfig> for FieldPruneRule {
    fn from(config: &FieldRuleConfig) -> Self {
        let rule = FieldPruneRule::new(
            config.collection.clone(),
            config.deprecated_field.clone(),
            config.replacement_field.clone(),
        );
        match &config.name {
            Some(name) => rule.named(name.clone()),
            None => rule,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Relation,
    FieldPrune,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::Relation => f.write_str("relation"),
            EntryKind::FieldPrune => f.write_str("field_prune"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CatalogEntry {
    Relation(Relation),
    FieldPrune(FieldPruneRule),
}

impl CatalogEntry {
    pub fn name(&self) -> &str {
        match self {
            CatalogEntry::Relation(relation) => &relation.name,
            CatalogEntry::FieldPrune(rule) => &rule.name,
        }
    }

    pub fn kind(&self) -> EntryKind {
        match self {
            CatalogEntry::Relation(_) => EntryKind::Relation,
            CatalogEntry::FieldPrune(_) => EntryKind::FieldPrune,
        }
    }

    /// The collection this entry scans.
    pub fn collection(&self) -> &str {
        match self {
            CatalogEntry::Relation(relation) => &relation.child_collection,
            CatalogEntry::FieldPrune(rule) => &rule.collection,
        }
    }

    /// One-line description for listings.
    pub fn describe(&self) -> String {
        match self {
            CatalogEntry::Relation(r) => format!(
                "{}.{} -> {}{}",
                r.child_collection,
                r.foreign_key_field,
                r.parent_collection,
                if r.is_self_reference() {
                    " (self)"
                } else {
                    ""
                }
            ),
            CatalogEntry::FieldPrune(rule) => format!(
                "{}: drop {} when {} is set",
                rule.collection, rule.deprecated_field, rule.replacement_field
            ),
        }
    }

    fn validate(&self) -> Result<(), CatalogError> {
        let entry = self.name();
        check_name(entry, "entry name", entry, false)?;

        match self {
            CatalogEntry::Relation(r) => {
                check_name(entry, "child_collection", &r.child_collection, true)?;
                check_name(entry, "foreign_key_field", &r.foreign_key_field, true)?;
                check_name(entry, "parent_collection", &r.parent_collection, true)?;
            }
            CatalogEntry::FieldPrune(rule) => {
                check_name(entry, "collection", &rule.collection, true)?;
                check_name(entry, "deprecated_field", &rule.deprecated_field, true)?;
                check_name(entry, "replacement_field", &rule.replacement_field, true)?;
                if rule.deprecated_field == rule.replacement_field {
                    return Err(CatalogError::IdenticalFields {
                        entry: entry.to_string(),
                        field: rule.deprecated_field.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

fn check_name(
    entry: &str,
    field: &'static str,
    value: &str,
    addressable: bool,
) -> Result<(), CatalogError> {
    if value.trim().is_empty() {
        return Err(CatalogError::EmptyName {
            entry: entry.to_string(),
            field,
        });
    }
    if addressable && value.contains('/') {
        return Err(CatalogError::InvalidName {
            entry: entry.to_string(),
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Validated, ordered list of catalog entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Result<Self, CatalogError> {
        {
            let mut seen = HashSet::new();
            for entry in &entries {
                entry.validate()?;
                if !seen.insert(entry.name()) {
                    return Err(CatalogError::DuplicateName(entry.name().to_string()));
                }
            }
        }
        Ok(Self { entries })
    }

    /// Relations first, then field rules, each in the order configured.
    pub fn from_config(config: &CatalogConfig) -> Result<Self, CatalogError> {
        let entries = config
            .relations
            .iter()
            .map(|r| CatalogEntry::Relation(r.into()))
            .chain(
                config
                    .field_rules
                    .iter()
                    .map(|rule| CatalogEntry::FieldPrune(rule.into())),
            )
            .collect();
        Self::new(entries)
    }

    /// Restrict to the named entries, keeping catalog order. An empty list
    /// keeps everything.
    pub fn select(&self, names: &[String]) -> Result<Self, CatalogError> {
        if names.is_empty() {
            return Ok(self.clone());
        }
        if let Some(unknown) = names.iter().find(|name| self.get(name).is_none()) {
            return Err(CatalogError::UnknownEntry(unknown.clone()));
        }
        let entries = self
            .entries
            .iter()
            .filter(|entry| names.iter().any(|name| name == entry.name()))
            .cloned()
            .collect();
        Ok(Self { entries })
    }

    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|entry| entry.name() == name)
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::testing::TestConfigBuilder;

    #[test]
    fn test_names_are_derived_when_omitted() {
        let config = TestConfigBuilder::new()
            .with_relation("boxroTalks", "articleId", "storyArticles")
            .with_field_rule("banners", "thumbnail", "cardThumbnail")
            .build();

        let catalog = Catalog::from_config(&config.catalog).unwrap();
        let names: Vec<&str> = catalog.entries().iter().map(CatalogEntry::name).collect();
        assert_eq!(
            names,
            vec![
                "boxroTalks.articleId->storyArticles",
                "banners.thumbnail->cardThumbnail"
            ]
        );
        assert_eq!(catalog.entries()[1].kind(), EntryKind::FieldPrune);
        assert_eq!(catalog.entries()[0].collection(), "boxroTalks");
    }

    #[test]
    fn test_explicit_names_win() {
        let config = TestConfigBuilder::new()
            .with_named_relation("talk-articles", "boxroTalks", "articleId", "storyArticles")
            .build();

        let catalog = Catalog::from_config(&config.catalog).unwrap();
        assert!(catalog.get("talk-articles").is_some());
    }

    #[test]
    fn test_rejects_empty_names() {
        let result = Catalog::new(vec![CatalogEntry::Relation(Relation::new(
            "boxroTalks",
            "  ",
            "storyArticles",
        ))]);
        assert!(matches!(
            result,
            Err(CatalogError::EmptyName {
                field: "foreign_key_field",
                ..
            })
        ));

        let result = Catalog::new(vec![CatalogEntry::FieldPrune(
            FieldPruneRule::new("banners", "thumbnail", "cardThumbnail").named(""),
        )]);
        assert!(matches!(
            result,
            Err(CatalogError::EmptyName {
                field: "entry name",
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_slash_in_collection() {
        let result = Catalog::new(vec![CatalogEntry::Relation(Relation::new(
            "users/u1/talks",
            "articleId",
            "storyArticles",
        ))]);
        assert!(matches!(result, Err(CatalogError::InvalidName { .. })));
    }

    #[test]
    fn test_rejects_identical_prune_fields() {
        let result = Catalog::new(vec![CatalogEntry::FieldPrune(FieldPruneRule::new(
            "banners",
            "thumbnail",
            "thumbnail",
        ))]);
        assert!(matches!(result, Err(CatalogError::IdenticalFields { .. })));
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let config = TestConfigBuilder::new()
            .with_relation("boxroTalks", "articleId", "storyArticles")
            .with_relation("boxroTalks", "articleId", "storyArticles")
            .build();

        let result = Catalog::from_config(&config.catalog);
        assert_eq!(
            result,
            Err(CatalogError::DuplicateName(
                "boxroTalks.articleId->storyArticles".to_string()
            ))
        );
    }

    #[test]
    fn test_accepts_self_reference() {
        let relation = Relation::new("comments", "parentCommentId", "comments");
        assert!(relation.is_self_reference());

        let catalog = Catalog::new(vec![CatalogEntry::Relation(relation)]).unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(catalog.entries()[0].describe().ends_with("(self)"));
    }

    #[test]
    fn test_select_keeps_catalog_order() {
        let config = TestConfigBuilder::new()
            .with_named_relation("a", "boxroTalks", "articleId", "storyArticles")
            .with_named_relation("b", "comments", "talkId", "boxroTalks")
            .with_field_rule("banners", "thumbnail", "cardThumbnail")
            .build();
        let catalog = Catalog::from_config(&config.catalog).unwrap();

        let selected = catalog
            .select(&["banners.thumbnail->cardThumbnail".to_string(), "a".to_string()])
            .unwrap();
        let names: Vec<&str> = selected.entries().iter().map(CatalogEntry::name).collect();
        assert_eq!(names, vec!["a", "banners.thumbnail->cardThumbnail"]);

        assert_eq!(catalog.select(&[]).unwrap().len(), 3);
        assert_eq!(
            catalog.select(&["nope".to_string()]),
            Err(CatalogError::UnknownEntry("nope".to_string()))
        );
    }
}
