//! External tables: tables that live in another database on the same server.
//!
//! Statements are built with bare table names. Before execution the driver
//! rewrites every quoted reference to a configured table into the
//! `database.table` form:
//!
//! - column prefixes: `` `country`.`name` `` becomes `` `shared`.`country`.`name` ``
//! - table names between `FROM` and the next `JOIN`/`WHERE`/`ORDER BY`/`GROUP BY`
//! - table names between `JOIN` and the next `ON`/`AS`
//! - the target of `INSERT INTO` and `UPDATE`
//!
//! Both backtick and double-quote identifiers are recognized; the quote found
//! in the statement is reused for the database name.

use crate::error::{OrmError, OrmResult};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

/// One database and the tables it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalDatabase {
    pub name: String,
    #[serde(default)]
    pub tables: Vec<String>,
}

/// Deserializable external table configuration.
///
/// ```toml
/// [[external_tables]]
/// name = "shared"
/// tables = ["country", "currency"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalTablesConfig {
    #[serde(default)]
    pub external_tables: Vec<ExternalDatabase>,
}

impl ExternalTablesConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a database with its tables.
    pub fn database<I, S>(mut self, name: impl Into<String>, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.external_tables.push(ExternalDatabase {
            name: name.into(),
            tables: tables.into_iter().map(Into::into).collect(),
        });
        self
    }
}

/// Compiled rewriter for [`ExternalTablesConfig`].
#[derive(Debug, Clone)]
pub struct ExternalTables {
    databases: Vec<ExternalDatabase>,
    column_prefix: Regex,
    quoted_table: Regex,
    from_start: Regex,
    from_end: Regex,
    join_start: Regex,
    join_end: Regex,
    target_start: Regex,
    target_end: Regex,
}

fn compile(pattern: &str) -> OrmResult<Regex> {
    Regex::new(pattern)
        .map_err(|e| OrmError::Other(format!("invalid external table pattern: {e}")))
}

impl ExternalTables {
    pub fn new(config: ExternalTablesConfig) -> OrmResult<Self> {
        Ok(Self {
            databases: config.external_tables,
            column_prefix: compile(r#"(?i)(^|[^.])([`"])([a-z_][a-z0-9_]*)([`"])\."#)?,
            quoted_table: compile(r#"(?i)(^|[^.])([`"])([a-z_][a-z0-9_]*)([`"])"#)?,
            from_start: compile(r"\bFROM\b")?,
            from_end: compile(r"\b(?:JOIN|WHERE|ORDER BY|GROUP BY|FORCE INDEX)\b")?,
            join_start: compile(r"\bJOIN\b")?,
            join_end: compile(r"\b(?:ON|AS|FORCE INDEX)\b")?,
            target_start: compile(r"\b(?:INSERT INTO|UPDATE)\b")?,
            target_end: compile(r"\b(?:SET|VALUES)\b|[(?]")?,
        })
    }

    /// Database owning `table`, if it is external.
    pub fn database_of(&self, table: &str) -> Option<&str> {
        self.databases
            .iter()
            .find(|db| db.tables.iter().any(|t| t == table))
            .map(|db| db.name.as_str())
    }

    fn prefix(&self, quote: &str, table: &str) -> String {
        match self.database_of(table) {
            Some(db) => format!("{quote}{db}{quote}.{quote}{table}{quote}"),
            None => format!("{quote}{table}{quote}"),
        }
    }

    fn replace_quoted(&self, re: &Regex, text: &str, suffix: &str) -> String {
        re.replace_all(text, |caps: &Captures<'_>| {
            let (lead, open, name, close) = (&caps[1], &caps[2], &caps[3], &caps[4]);
            if open != close {
                return caps[0].to_string();
            }
            format!("{lead}{}{suffix}", self.prefix(open, name))
        })
        .into_owned()
    }

    fn rewrite_segments(&self, sql: &str, start: &Regex, end: &Regex) -> String {
        let mut out = String::with_capacity(sql.len() + 16);
        let mut pos = 0;
        while let Some(m) = start.find_at(sql, pos) {
            out.push_str(&sql[pos..m.end()]);
            let stop = end.find_at(sql, m.end()).map_or(sql.len(), |e| e.start());
            out.push_str(&self.replace_quoted(&self.quoted_table, &sql[m.end()..stop], ""));
            pos = stop;
        }
        out.push_str(&sql[pos..]);
        out
    }

    /// Rewrite all references to external tables in `sql`.
    pub fn rewrite(&self, sql: &str) -> String {
        if self.databases.is_empty() {
            return sql.to_string();
        }
        let sql = self.replace_quoted(&self.column_prefix, sql, ".");
        let sql = self.rewrite_segments(&sql, &self.from_start, &self.from_end);
        let sql = self.rewrite_segments(&sql, &self.target_start, &self.target_end);
        self.rewrite_segments(&sql, &self.join_start, &self.join_end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables() -> ExternalTables {
        ExternalTables::new(ExternalTablesConfig::new().database("shared", ["country", "currency"]))
            .unwrap()
    }

    #[test]
    fn prefixes_from_and_columns() {
        let sql = "SELECT `country`.* FROM `country` WHERE (`country`.`code` = ?)";
        assert_eq!(
            tables().rewrite(sql),
            "SELECT `shared`.`country`.* FROM `shared`.`country` WHERE (`shared`.`country`.`code` = ?)"
        );
    }

    #[test]
    fn prefixes_joined_tables_only_before_alias() {
        let sql = "SELECT `user`.* FROM `user` LEFT JOIN `country` AS `country` ON `user`.`country_id` = `country`.`id`";
        assert_eq!(
            tables().rewrite(sql),
            "SELECT `user`.* FROM `user` LEFT JOIN `shared`.`country` AS `country` ON `user`.`country_id` = `shared`.`country`.`id`"
        );
    }

    #[test]
    fn never_prefixes_twice() {
        let once = tables().rewrite("SELECT * FROM `country`");
        assert_eq!(once, "SELECT * FROM `shared`.`country`");
        assert_eq!(tables().rewrite(&once), once);
    }

    #[test]
    fn prefixes_mutation_targets() {
        assert_eq!(
            tables().rewrite("INSERT INTO `country`"),
            "INSERT INTO `shared`.`country`"
        );
        assert_eq!(
            tables().rewrite("UPDATE `currency` SET ? WHERE (`code` = ?)"),
            "UPDATE `shared`.`currency` SET ? WHERE (`code` = ?)"
        );
    }

    #[test]
    fn double_quoted_identifiers() {
        let sql = r#"SELECT "currency".* FROM "currency""#;
        assert_eq!(
            tables().rewrite(sql),
            r#"SELECT "shared"."currency".* FROM "shared"."currency""#
        );
    }

    #[test]
    fn unlisted_tables_are_untouched() {
        let sql = "SELECT * FROM `book` WHERE (`id` = ?)";
        assert_eq!(tables().rewrite(sql), sql);
    }

    #[test]
    fn config_from_toml() {
        let cfg: ExternalTablesConfig = toml::from_str(
            r#"
            [[external_tables]]
            name = "shared"
            tables = ["country"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.external_tables[0].name, "shared");
        assert_eq!(cfg.external_tables[0].tables, vec!["country".to_string()]);
    }
}
