//! Relationship-aware SQL builder.
//!
//! A [`SqlBuilder`] collects fragments for one table: select columns, where
//! and left-join conditions, ordering, grouping, limits, aliases and index
//! hints. Fragments may reference related tables through chains:
//!
//! - `author.name` follows a belongs-to relation (`book.author_id -> author.id`)
//! - `:book.title` follows a has-many relation (`author.id <- book.author_id`)
//! - `:book(translator).title` picks the referencing column explicitly
//! - `!schema.table` is kept as written
//!
//! When a query is built, each chain is replaced by `alias.column` and the
//! joins it needs are rendered as `LEFT JOIN`s.
//!
//! ```ignore
//! let mut b = SqlBuilder::new("book", driver, conventions);
//! b.add_where("author.name", args!["Jakub"])?;
//! assert_eq!(
//!     b.build_select_query(None)?,
//!     "SELECT `book`.* FROM `book` LEFT JOIN `author` ON `book`.`author_id` = `author`.`id` WHERE (`author`.`name` = ?)"
//! );
//! ```

mod bind;
mod chain;
mod join;
mod query;
mod quote;

pub(crate) use quote::skip_quoted;

use crate::conventions::{Conventions, PrimaryKey};
use crate::driver::{Driver, Feature};
use crate::error::{OrmError, OrmResult};
use crate::value::{Arg, Value};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio_postgres::types::ToSql;

/// Which condition list a call adds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClauseKind {
    /// Main `WHERE` clause.
    Where,
    /// Extra `ON` condition of the join it references.
    Left,
}

impl ClauseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClauseKind::Where => "where",
            ClauseKind::Left => "left",
        }
    }
}

impl fmt::Display for ClauseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SQL text with its parameters in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

impl BuiltQuery {
    pub fn new(sql: String, params: Vec<Value>) -> Self {
        Self { sql, params }
    }

    /// Parameters as references compatible with tokio-postgres.
    pub fn params_ref(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
    }
}

/// Index names for a `FORCE INDEX` hint.
///
/// Accepts a comma separated string or a list; blank entries are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexNames(Vec<String>);

impl IndexNames {
    fn from_parts<'a>(parts: impl IntoIterator<Item = &'a str>) -> Self {
        Self(
            parts
                .into_iter()
                .flat_map(|p| p.split(','))
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for IndexNames {
    fn from(v: &str) -> Self {
        Self::from_parts([v])
    }
}

impl From<String> for IndexNames {
    fn from(v: String) -> Self {
        Self::from_parts([v.as_str()])
    }
}

impl From<Option<&str>> for IndexNames {
    fn from(v: Option<&str>) -> Self {
        Self::from_parts(v)
    }
}

impl From<Vec<&str>> for IndexNames {
    fn from(v: Vec<&str>) -> Self {
        Self::from_parts(v)
    }
}

impl From<Vec<String>> for IndexNames {
    fn from(v: Vec<String>) -> Self {
        Self::from_parts(v.iter().map(String::as_str))
    }
}

impl<const N: usize> From<[&str; N]> for IndexNames {
    fn from(v: [&str; N]) -> Self {
        Self::from_parts(v)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct LeftCondition {
    text: String,
    params: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ConditionEntry {
    kind: ClauseKind,
    fingerprint: String,
    text: String,
}

#[derive(Serialize)]
#[serde(untagged)]
enum FingerprintArg<'a> {
    Value(&'a Value),
    SubQuery { sql: String, params: Vec<Value> },
}

/// Builds SQL for one table. Cheap to clone; clones are independent.
#[derive(Clone)]
pub struct SqlBuilder {
    table: String,
    driver: Arc<dyn Driver>,
    conventions: Arc<dyn Conventions>,
    select: Vec<String>,
    select_params: Vec<Value>,
    wheres: Vec<String>,
    where_params: Vec<Value>,
    left: Vec<LeftCondition>,
    order: Vec<String>,
    order_params: Vec<Value>,
    group: String,
    group_params: Vec<Value>,
    having: String,
    having_params: Vec<Value>,
    limit: Option<u64>,
    offset: Option<u64>,
    conditions: Vec<ConditionEntry>,
    fingerprints: HashSet<String>,
    aliases: HashMap<String, String>,
    force_indexes: BTreeMap<Option<String>, Vec<String>>,
}

impl fmt::Debug for SqlBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlBuilder")
            .field("table", &self.table)
            .field("driver", &self.driver.name())
            .field("select", &self.select)
            .field("where", &self.wheres)
            .field("left", &self.left)
            .field("order", &self.order)
            .field("group", &self.group)
            .field("having", &self.having)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .field("aliases", &self.aliases)
            .field("force_indexes", &self.force_indexes)
            .finish()
    }
}

fn unqualified(table: &str) -> &str {
    table.rsplit('.').next().unwrap_or(table)
}

impl SqlBuilder {
    pub fn new(
        table: impl Into<String>,
        driver: Arc<dyn Driver>,
        conventions: Arc<dyn Conventions>,
    ) -> Self {
        Self {
            table: table.into(),
            driver,
            conventions,
            select: Vec::new(),
            select_params: Vec::new(),
            wheres: Vec::new(),
            where_params: Vec::new(),
            left: Vec::new(),
            order: Vec::new(),
            order_params: Vec::new(),
            group: String::new(),
            group_params: Vec::new(),
            having: String::new(),
            having_params: Vec::new(),
            limit: None,
            offset: None,
            conditions: Vec::new(),
            fingerprints: HashSet::new(),
            aliases: HashMap::new(),
            force_indexes: BTreeMap::new(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn conventions(&self) -> &Arc<dyn Conventions> {
        &self.conventions
    }

    /// Primary key of the base table.
    pub fn primary(&self) -> Option<PrimaryKey> {
        self.conventions.primary(&self.table)
    }

    // ==================== Select / order / group ====================

    /// Add a select fragment, e.g. `"id, author.name"`.
    pub fn add_select(&mut self, columns: &str) -> OrmResult<()> {
        self.add_select_with_params(columns, Vec::new())
    }

    /// Add a select fragment whose placeholders take `params`.
    pub fn add_select_with_params(&mut self, columns: &str, params: Vec<Value>) -> OrmResult<()> {
        if columns.trim().is_empty() {
            return Err(OrmError::EmptySelectColumn);
        }
        self.select.push(columns.to_string());
        self.select_params.extend(params);
        Ok(())
    }

    pub fn add_order(&mut self, columns: &str) {
        self.add_order_with_params(columns, Vec::new());
    }

    pub fn add_order_with_params(&mut self, columns: &str, params: Vec<Value>) {
        self.order.push(columns.to_string());
        self.order_params.extend(params);
    }

    /// Replace the `GROUP BY` clause.
    pub fn set_group(&mut self, columns: &str) {
        self.set_group_with_params(columns, Vec::new());
    }

    pub fn set_group_with_params(&mut self, columns: &str, params: Vec<Value>) {
        self.group = columns.to_string();
        self.group_params = params;
    }

    /// Replace the `HAVING` clause.
    pub fn set_having(&mut self, having: &str) {
        self.set_having_with_params(having, Vec::new());
    }

    pub fn set_having_with_params(&mut self, having: &str, params: Vec<Value>) {
        self.having = having.to_string();
        self.having_params = params;
    }

    pub fn set_limit(&mut self, limit: Option<u64>, offset: Option<u64>) {
        self.limit = limit;
        self.offset = offset;
    }

    // ==================== Conditions ====================

    /// Add a `WHERE` condition. Returns `false` if the same condition with
    /// the same arguments was already added.
    pub fn add_where(&mut self, condition: &str, args: Vec<Arg>) -> OrmResult<bool> {
        self.add_condition(ClauseKind::Where, condition, args)
    }

    /// Add a condition to the `ON` clause of the join it references.
    pub fn add_left(&mut self, condition: &str, args: Vec<Arg>) -> OrmResult<bool> {
        self.add_condition(ClauseKind::Left, condition, args)
    }

    pub fn add_condition(
        &mut self,
        kind: ClauseKind,
        condition: &str,
        args: Vec<Arg>,
    ) -> OrmResult<bool> {
        let fingerprint = self.fingerprint(kind, condition, &args)?;
        if self.fingerprints.contains(&fingerprint) {
            tracing::trace!(
                target: "chainsql.builder",
                table = %self.table,
                kind = kind.as_str(),
                condition,
                "duplicate condition ignored"
            );
            return Ok(false);
        }

        let bound = bind::bind(condition, &args, self.driver.as_ref())?;
        match kind {
            ClauseKind::Where => {
                self.wheres.push(bound.condition);
                self.where_params.extend(bound.params);
            }
            ClauseKind::Left => self.left.push(LeftCondition {
                text: bound.condition,
                params: bound.params,
            }),
        }

        self.fingerprints.insert(fingerprint.clone());
        self.conditions.push(ConditionEntry {
            kind,
            fingerprint,
            text: condition.to_string(),
        });
        Ok(true)
    }

    fn fingerprint(&self, kind: ClauseKind, condition: &str, args: &[Arg]) -> OrmResult<String> {
        let mut parts = Vec::with_capacity(args.len());
        for arg in args {
            parts.push(match arg {
                Arg::Value(v) => FingerprintArg::Value(v),
                Arg::SubQuery(sub) => {
                    let built = sub.builder.compile_subquery()?;
                    FingerprintArg::SubQuery {
                        sql: built.sql,
                        params: built.params,
                    }
                }
            });
        }
        let json = serde_json::to_string(&(condition, &parts))
            .map_err(|e| OrmError::Other(format!("cannot fingerprint condition: {e}")))?;
        Ok(format!("{kind}:{json}"))
    }

    /// Match several columns against rows of values.
    ///
    /// Rendered as `(a = ? AND b = ?) OR (...)` when the driver prefers it,
    /// otherwise as `(a, b) IN (?)`.
    pub fn add_where_composition(
        &mut self,
        columns: &[&str],
        rows: Vec<Vec<Value>>,
    ) -> OrmResult<bool> {
        if let Some(row) = rows.iter().find(|r| r.len() != columns.len()) {
            return Err(OrmError::ArgumentCountMismatch {
                placeholders: columns.len(),
                arguments: row.len(),
            });
        }
        if rows.is_empty() {
            return self.add_where("FALSE", Vec::new());
        }

        if self.driver.is_supported(Feature::MultiColumnAsOrCondition) {
            let fragment = format!("({} = ?)", columns.join(" = ? AND "));
            let condition = vec![fragment; rows.len()].join(" OR ");
            let args = rows.into_iter().flatten().map(Arg::from).collect();
            self.add_where(&condition, args)
        } else {
            let condition = format!("({}) IN", columns.join(", "));
            let tuples = rows.into_iter().map(Value::List).collect::<Vec<_>>();
            self.add_where(&condition, vec![Arg::from(Value::List(tuples))])
        }
    }

    /// Restrict to one row (or several) by primary key.
    ///
    /// - single key: `table.id = ?` (or `IN` for a list)
    /// - composite key given as a list of its components: one condition per column
    /// - composite key given as a list of lists: a composition over all rows
    /// - [`Value::Assignments`]: one condition per named column
    pub fn add_where_primary(&mut self, key: impl Into<Value>) -> OrmResult<bool> {
        let key = key.into();
        if let Value::Assignments(pairs) = key {
            let mut added = false;
            for (column, value) in pairs {
                added |= self.add_where(&column, vec![Arg::from(value)])?;
            }
            return Ok(added);
        }

        let table = unqualified(&self.table).to_string();
        match self.primary() {
            Some(PrimaryKey::Single(column)) => {
                self.add_where(&format!("{table}.{column}"), vec![Arg::from(key)])
            }
            Some(PrimaryKey::Composite(columns)) => match key {
                Value::List(items) if items.iter().all(|v| matches!(v, Value::List(_))) => {
                    let rows = items
                        .into_iter()
                        .filter_map(|v| match v {
                            Value::List(row) => Some(row),
                            _ => None,
                        })
                        .collect();
                    let qualified: Vec<String> =
                        columns.iter().map(|c| format!("{table}.{c}")).collect();
                    let refs: Vec<&str> = qualified.iter().map(String::as_str).collect();
                    self.add_where_composition(&refs, rows)
                }
                Value::List(items) if items.len() == columns.len() => {
                    let mut added = false;
                    for (column, value) in columns.iter().zip(items) {
                        added |= self.add_where(&format!("{table}.{column}"), vec![Arg::from(value)])?;
                    }
                    Ok(added)
                }
                other => Err(OrmError::ArgumentCountMismatch {
                    placeholders: columns.len(),
                    arguments: match other {
                        Value::List(items) => items.len(),
                        _ => 1,
                    },
                }),
            },
            None => Err(OrmError::validation(format!(
                "Table '{}' has no primary key",
                self.table
            ))),
        }
    }

    /// Drop all left-join conditions.
    pub fn remove_left_conditions(&mut self) {
        self.left.clear();
        let fingerprints = &mut self.fingerprints;
        self.conditions.retain(|c| {
            if c.kind == ClauseKind::Left {
                fingerprints.remove(&c.fingerprint);
                false
            } else {
                true
            }
        });
    }

    /// Copy conditions, their parameters and aliases from `other`.
    pub fn import_conditions(&mut self, other: &SqlBuilder) {
        self.wheres = other.wheres.clone();
        self.where_params = other.where_params.clone();
        self.left = other.left.clone();
        self.conditions = other.conditions.clone();
        self.fingerprints = other.fingerprints.clone();
        self.aliases = other.aliases.clone();
    }

    /// Original text of every distinct condition added so far.
    pub fn get_conditions(&self) -> Vec<&str> {
        self.conditions.iter().map(|c| c.text.as_str()).collect()
    }

    // ==================== Aliases and hints ====================

    /// Register `alias` as a shortcut for `chain` (e.g. `"book.author"`).
    pub fn add_alias(&mut self, chain: &str, alias: &str) -> OrmResult<()> {
        if self.aliases.contains_key(alias) {
            return Err(OrmError::DuplicateAlias(alias.to_string()));
        }
        self.aliases.insert(alias.to_string(), chain.to_string());
        Ok(())
    }

    /// Force the base table to use the given indexes. Empty input clears the hint.
    pub fn set_force_index(&mut self, indexes: impl Into<IndexNames>) {
        self.store_force_index(None, indexes.into());
    }

    /// Force a joined table (by alias or table name) to use the given indexes.
    pub fn set_force_index_for(&mut self, table: &str, indexes: impl Into<IndexNames>) {
        let key = if table == self.table || table == unqualified(&self.table) {
            None
        } else {
            Some(table.to_string())
        };
        self.store_force_index(key, indexes.into());
    }

    /// Remove an index hint; `None` means the base table.
    pub fn clear_force_index(&mut self, table: Option<&str>) {
        match table {
            Some(t) => self.set_force_index_for(t, IndexNames::default()),
            None => self.set_force_index(IndexNames::default()),
        }
    }

    fn store_force_index(&mut self, key: Option<String>, indexes: IndexNames) {
        if indexes.is_empty() {
            self.force_indexes.remove(&key);
        } else {
            self.force_indexes.insert(key, indexes.0);
        }
    }

    pub fn force_index(&self, table: Option<&str>) -> Option<&[String]> {
        let key = table
            .filter(|t| *t != self.table && *t != unqualified(&self.table))
            .map(str::to_string);
        self.force_indexes.get(&key).map(Vec::as_slice)
    }

    /// A new builder selecting `function` (e.g. `COUNT(*)`) over this
    /// builder's conditions.
    pub fn aggregate(&self, function: &str) -> OrmResult<SqlBuilder> {
        let mut builder = SqlBuilder::new(
            self.table.clone(),
            Arc::clone(&self.driver),
            Arc::clone(&self.conventions),
        );
        builder.import_conditions(self);
        builder.add_select(function)?;
        Ok(builder)
    }

    // ==================== Accessors ====================

    pub fn get_select(&self) -> &[String] {
        &self.select
    }

    pub fn get_where(&self) -> &[String] {
        &self.wheres
    }

    pub fn get_left(&self) -> Vec<&str> {
        self.left.iter().map(|l| l.text.as_str()).collect()
    }

    pub fn get_order(&self) -> &[String] {
        &self.order
    }

    pub fn get_group(&self) -> &str {
        &self.group
    }

    pub fn get_having(&self) -> &str {
        &self.having
    }

    /// Parameters of the `WHERE` clause alone, as used by UPDATE and DELETE.
    pub fn get_where_parameters(&self) -> &[Value] {
        &self.where_params
    }

    pub fn get_limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn get_offset(&self) -> Option<u64> {
        self.offset
    }

    pub fn get_aliases(&self) -> &HashMap<String, String> {
        &self.aliases
    }
}
