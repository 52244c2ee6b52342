//! Driver capabilities and SQL dialects.

use crate::external::ExternalTables;
use std::fmt;

/// Optional driver features the builder adapts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// `col IN (SELECT ...)` can be inlined.
    SubSelect,
    /// Columns not listed in `GROUP BY` may be selected.
    SelectUngroupedColumns,
    /// `(a = ? AND b = ?) OR (...)` is preferred over `(a, b) IN (...)`.
    MultiColumnAsOrCondition,
    /// Tables may be addressed as `schema.table`.
    Schema,
}

/// How the executed statement spells its placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?`
    QuestionMark,
    /// `$1`, `$2`, ...
    Numbered,
}

/// Capability interface consumed by the builder.
pub trait Driver: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn is_supported(&self, feature: Feature) -> bool;

    /// Character wrapped around identifiers.
    fn quote_char(&self) -> char;

    /// Quote a (possibly dotted) identifier.
    fn quote_identifier(&self, name: &str) -> String {
        quote_with(self.quote_char(), name)
    }

    /// Append the dialect's LIMIT / OFFSET syntax.
    fn apply_limit(&self, sql: &mut String, limit: Option<u64>, offset: Option<u64>);

    /// Post-process a finished statement (external table prefixes).
    fn rewrite_external(&self, sql: String) -> String {
        sql
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::QuestionMark
    }
}

fn quote_with(quote: char, name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    out.push(quote);
    for ch in name.chars() {
        match ch {
            '.' => {
                out.push(quote);
                out.push('.');
                out.push(quote);
            }
            c if c == quote => {
                out.push(quote);
                out.push(quote);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

fn effective_offset(offset: Option<u64>) -> Option<u64> {
    offset.filter(|&o| o > 0)
}

/// MySQL / MariaDB dialect.
#[derive(Debug, Clone, Default)]
pub struct MySqlDriver {
    external: Option<ExternalTables>,
}

impl MySqlDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix the configured tables with their database name.
    pub fn with_external_tables(mut self, tables: ExternalTables) -> Self {
        self.external = Some(tables);
        self
    }
}

impl Driver for MySqlDriver {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn is_supported(&self, feature: Feature) -> bool {
        matches!(
            feature,
            Feature::SubSelect | Feature::SelectUngroupedColumns | Feature::MultiColumnAsOrCondition
        )
    }

    fn quote_char(&self) -> char {
        '`'
    }

    fn apply_limit(&self, sql: &mut String, limit: Option<u64>, offset: Option<u64>) {
        let offset = effective_offset(offset);
        if limit.is_none() && offset.is_none() {
            return;
        }
        match limit {
            Some(limit) => sql.push_str(&format!(" LIMIT {limit}")),
            None => sql.push_str(" LIMIT 18446744073709551615"),
        }
        if let Some(offset) = offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
    }

    fn rewrite_external(&self, sql: String) -> String {
        match &self.external {
            Some(tables) => tables.rewrite(&sql),
            None => sql,
        }
    }
}

/// PostgreSQL dialect.
#[derive(Debug, Clone, Default)]
pub struct PostgresDriver {
    external: Option<ExternalTables>,
}

impl PostgresDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_external_tables(mut self, tables: ExternalTables) -> Self {
        self.external = Some(tables);
        self
    }
}

impl Driver for PostgresDriver {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn is_supported(&self, feature: Feature) -> bool {
        matches!(
            feature,
            Feature::SubSelect | Feature::MultiColumnAsOrCondition | Feature::Schema
        )
    }

    fn quote_char(&self) -> char {
        '"'
    }

    fn apply_limit(&self, sql: &mut String, limit: Option<u64>, offset: Option<u64>) {
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = effective_offset(offset) {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
    }

    fn rewrite_external(&self, sql: String) -> String {
        match &self.external {
            Some(tables) => tables.rewrite(&sql),
            None => sql,
        }
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Numbered
    }
}

/// SQLite dialect.
#[derive(Debug, Clone, Default)]
pub struct SqliteDriver {
    external: Option<ExternalTables>,
}

impl SqliteDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attached databases are addressed as `name.table`.
    pub fn with_external_tables(mut self, tables: ExternalTables) -> Self {
        self.external = Some(tables);
        self
    }
}

impl Driver for SqliteDriver {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn is_supported(&self, feature: Feature) -> bool {
        matches!(feature, Feature::SubSelect | Feature::SelectUngroupedColumns)
    }

    fn quote_char(&self) -> char {
        '"'
    }

    fn apply_limit(&self, sql: &mut String, limit: Option<u64>, offset: Option<u64>) {
        let offset = effective_offset(offset);
        if limit.is_none() && offset.is_none() {
            return;
        }
        match limit {
            Some(limit) => sql.push_str(&format!(" LIMIT {limit}")),
            None => sql.push_str(" LIMIT -1"),
        }
        if let Some(offset) = offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
    }

    fn rewrite_external(&self, sql: String) -> String {
        match &self.external {
            Some(tables) => tables.rewrite(&sql),
            None => sql,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limited(driver: &dyn Driver, limit: Option<u64>, offset: Option<u64>) -> String {
        let mut sql = "SELECT *".to_string();
        driver.apply_limit(&mut sql, limit, offset);
        sql
    }

    #[test]
    fn quote_identifier_splits_dots_and_escapes() {
        assert_eq!(MySqlDriver::new().quote_identifier("a.b"), "`a`.`b`");
        assert_eq!(MySqlDriver::new().quote_identifier("we`ird"), "`we``ird`");
        assert_eq!(PostgresDriver::new().quote_identifier("users"), "\"users\"");
    }

    #[test]
    fn mysql_limit_syntax() {
        let d = MySqlDriver::new();
        assert_eq!(limited(&d, Some(10), None), "SELECT * LIMIT 10");
        assert_eq!(limited(&d, Some(10), Some(20)), "SELECT * LIMIT 10 OFFSET 20");
        assert_eq!(
            limited(&d, None, Some(5)),
            "SELECT * LIMIT 18446744073709551615 OFFSET 5"
        );
        assert_eq!(limited(&d, None, Some(0)), "SELECT *");
    }

    #[test]
    fn postgres_limit_syntax() {
        let d = PostgresDriver::new();
        assert_eq!(limited(&d, Some(3), Some(6)), "SELECT * LIMIT 3 OFFSET 6");
        assert_eq!(limited(&d, None, Some(6)), "SELECT * OFFSET 6");
    }

    #[test]
    fn sqlite_limit_syntax() {
        let d = SqliteDriver::new();
        assert_eq!(limited(&d, None, Some(2)), "SELECT * LIMIT -1 OFFSET 2");
    }

    #[test]
    fn feature_matrix() {
        assert!(MySqlDriver::new().is_supported(Feature::SelectUngroupedColumns));
        assert!(!MySqlDriver::new().is_supported(Feature::Schema));
        assert!(PostgresDriver::new().is_supported(Feature::Schema));
        assert!(!PostgresDriver::new().is_supported(Feature::SelectUngroupedColumns));
        assert!(!SqliteDriver::new().is_supported(Feature::MultiColumnAsOrCondition));
    }
}
