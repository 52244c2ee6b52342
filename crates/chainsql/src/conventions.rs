//! Naming conventions: how tables relate to each other.
//!
//! Chain expressions like `book.author.name` or `author:book.title` are
//! resolved through a [`Conventions`] implementation. Two are provided:
//!
//! - [`StaticConventions`]: pure naming masks (`id`, `%s_id`, `%s`).
//! - [`SchemaConventions`]: relations declared from the real schema
//!   (primary keys and foreign keys per table).

use crate::error::{OrmError, OrmResult};
use std::fmt;

/// Primary key of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimaryKey {
    Single(String),
    Composite(Vec<String>),
}

impl PrimaryKey {
    pub fn columns(&self) -> Vec<&str> {
        match self {
            PrimaryKey::Single(c) => vec![c.as_str()],
            PrimaryKey::Composite(cols) => cols.iter().map(String::as_str).collect(),
        }
    }

    /// Comma separated column list.
    pub fn to_select(&self) -> String {
        self.columns().join(", ")
    }
}

/// Target of a relation: the table reached and the column used to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub table: String,
    pub column: String,
}

impl Reference {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }
}

/// Relationship oracle consumed by the chain parser.
pub trait Conventions: Send + Sync + fmt::Debug {
    /// Primary key of `table`, if it has one.
    fn primary(&self, table: &str) -> Option<PrimaryKey>;

    /// `table` has many rows of the related table named by `key`.
    ///
    /// Returns the referencing table and its column pointing at `table`.
    fn has_many(&self, table: &str, key: &str) -> OrmResult<Option<Reference>>;

    /// `table` belongs to the table named by `key`.
    ///
    /// Returns the referenced table and the foreign key column in `table`.
    fn belongs_to(&self, table: &str, key: &str) -> OrmResult<Option<Reference>>;

    /// Fully qualified table names, used to detect `schema.table` chains.
    fn known_tables(&self) -> Vec<String> {
        Vec::new()
    }
}

fn unqualified(table: &str) -> &str {
    table.rsplit('.').next().unwrap_or(table)
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Conventions derived from naming masks only.
///
/// `%s` in a mask is replaced by the table or relation name.
#[derive(Debug, Clone)]
pub struct StaticConventions {
    primary: String,
    foreign: String,
    table: String,
}

impl Default for StaticConventions {
    fn default() -> Self {
        Self {
            primary: "id".to_string(),
            foreign: "%s_id".to_string(),
            table: "%s".to_string(),
        }
    }
}

impl StaticConventions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_primary(mut self, mask: impl Into<String>) -> Self {
        self.primary = mask.into();
        self
    }

    pub fn with_foreign(mut self, mask: impl Into<String>) -> Self {
        self.foreign = mask.into();
        self
    }

    pub fn with_table(mut self, mask: impl Into<String>) -> Self {
        self.table = mask.into();
        self
    }

    fn apply(mask: &str, name: &str) -> String {
        mask.replacen("%s", name, 1)
    }
}

impl Conventions for StaticConventions {
    fn primary(&self, table: &str) -> Option<PrimaryKey> {
        Some(PrimaryKey::Single(Self::apply(&self.primary, unqualified(table))))
    }

    fn has_many(&self, table: &str, key: &str) -> OrmResult<Option<Reference>> {
        Ok(Some(Reference::new(
            Self::apply(&self.table, key),
            Self::apply(&self.foreign, unqualified(table)),
        )))
    }

    fn belongs_to(&self, _table: &str, key: &str) -> OrmResult<Option<Reference>> {
        Ok(Some(Reference::new(
            Self::apply(&self.table, key),
            Self::apply(&self.foreign, key),
        )))
    }
}

/// A table declaration for [`SchemaConventions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    name: String,
    primary: Option<PrimaryKey>,
    foreign_keys: Vec<(String, String)>,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary: None,
            foreign_keys: Vec::new(),
        }
    }

    pub fn primary(mut self, column: impl Into<String>) -> Self {
        self.primary = Some(PrimaryKey::Single(column.into()));
        self
    }

    pub fn composite_primary<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary = Some(PrimaryKey::Composite(
            columns.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// `column` references the primary key of `target`.
    pub fn foreign_key(mut self, column: impl Into<String>, target: impl Into<String>) -> Self {
        self.foreign_keys.push((column.into(), target.into()));
        self
    }
}

/// Conventions backed by declared primary and foreign keys.
#[derive(Debug, Clone, Default)]
pub struct SchemaConventions {
    tables: Vec<TableDef>,
}

impl SchemaConventions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(mut self, table: TableDef) -> Self {
        self.tables.push(table);
        self
    }

    fn find(&self, table: &str) -> Option<&TableDef> {
        self.tables
            .iter()
            .find(|t| t.name == table)
            .or_else(|| self.tables.iter().find(|t| unqualified(&t.name) == table))
    }

    /// Tables holding a foreign key to `table`, with the referencing columns.
    fn referencing(&self, table: &str) -> Vec<(&str, Vec<&str>)> {
        let target = self.find(table).map_or(table, |t| t.name.as_str());
        self.tables
            .iter()
            .filter_map(|t| {
                let columns: Vec<&str> = t
                    .foreign_keys
                    .iter()
                    .filter(|(_, to)| to == target || unqualified(to) == unqualified(target))
                    .map(|(col, _)| col.as_str())
                    .collect();
                (!columns.is_empty()).then_some((t.name.as_str(), columns))
            })
            .collect()
    }
}

impl Conventions for SchemaConventions {
    fn primary(&self, table: &str) -> Option<PrimaryKey> {
        self.find(table).and_then(|t| t.primary.clone())
    }

    fn has_many(&self, table: &str, key: &str) -> OrmResult<Option<Reference>> {
        let short = unqualified(table);
        let mut column_candidates = Vec::new();
        let mut candidates: Vec<(&str, Reference)> = Vec::new();

        for (target_ns, columns) in self.referencing(table) {
            if !contains_ci(target_ns, key) {
                continue;
            }
            let target = unqualified(target_ns);
            for column in columns {
                let candidate = Reference::new(target_ns, column);
                if contains_ci(column, short) {
                    if target == key || target_ns == key {
                        return Ok(Some(candidate));
                    }
                    column_candidates.push(candidate.clone());
                }
                candidates.push((target, candidate));
            }
        }

        if column_candidates.len() == 1 {
            return Ok(column_candidates.pop());
        }
        if candidates.len() == 1 {
            return Ok(candidates.pop().map(|(_, c)| c));
        }
        if let Some((_, c)) = candidates
            .iter()
            .find(|(t, _)| t.eq_ignore_ascii_case(key))
        {
            return Ok(Some(c.clone()));
        }
        if !candidates.is_empty() {
            return Err(OrmError::AmbiguousRelation {
                table: table.to_string(),
                relation: key.to_string(),
            });
        }
        Ok(None)
    }

    fn belongs_to(&self, table: &str, key: &str) -> OrmResult<Option<Reference>> {
        Ok(self.find(table).and_then(|t| {
            t.foreign_keys
                .iter()
                .find(|(column, _)| contains_ci(column, key))
                .map(|(column, target)| Reference::new(target.clone(), column.clone()))
        }))
    }

    fn known_tables(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library() -> SchemaConventions {
        SchemaConventions::new()
            .table(TableDef::new("author").primary("id"))
            .table(
                TableDef::new("book")
                    .primary("id")
                    .foreign_key("author_id", "author")
                    .foreign_key("translator_id", "author"),
            )
            .table(
                TableDef::new("book_tag")
                    .composite_primary(["book_id", "tag_id"])
                    .foreign_key("book_id", "book")
                    .foreign_key("tag_id", "tag"),
            )
            .table(TableDef::new("tag").primary("id"))
    }

    #[test]
    fn static_masks() {
        let c = StaticConventions::new();
        assert_eq!(c.primary("book"), Some(PrimaryKey::Single("id".into())));
        assert_eq!(
            c.belongs_to("book", "author").unwrap(),
            Some(Reference::new("author", "author_id"))
        );
        assert_eq!(
            c.has_many("author", "book").unwrap(),
            Some(Reference::new("book", "author_id"))
        );
    }

    #[test]
    fn static_custom_masks() {
        let c = StaticConventions::new()
            .with_primary("id_%s")
            .with_foreign("id_%s")
            .with_table("tbl_%s");
        assert_eq!(c.primary("book"), Some(PrimaryKey::Single("id_book".into())));
        assert_eq!(
            c.belongs_to("tbl_book", "author").unwrap(),
            Some(Reference::new("tbl_author", "id_author"))
        );
    }

    #[test]
    fn schema_belongs_to_matches_column_substring() {
        let c = library();
        assert_eq!(
            c.belongs_to("book", "translator").unwrap(),
            Some(Reference::new("author", "translator_id"))
        );
        assert_eq!(c.belongs_to("book", "publisher").unwrap(), None);
    }

    #[test]
    fn schema_has_many_prefers_column_named_after_parent() {
        let c = library();
        assert_eq!(
            c.has_many("author", "book").unwrap(),
            Some(Reference::new("book", "author_id"))
        );
        assert_eq!(
            c.has_many("book", "book_tag").unwrap(),
            Some(Reference::new("book_tag", "book_id"))
        );
    }

    #[test]
    fn schema_has_many_ambiguous() {
        let c = SchemaConventions::new()
            .table(TableDef::new("user").primary("id"))
            .table(
                TableDef::new("inbox_message")
                    .primary("id")
                    .foreign_key("recipient_id", "user"),
            )
            .table(
                TableDef::new("outbox_message")
                    .primary("id")
                    .foreign_key("sender_id", "user"),
            );
        let err = c.has_many("user", "message").unwrap_err();
        assert!(matches!(err, OrmError::AmbiguousRelation { .. }));
    }

    #[test]
    fn composite_primary_select_list() {
        let c = library();
        assert_eq!(c.primary("book_tag").unwrap().to_select(), "book_id, tag_id");
    }
}
