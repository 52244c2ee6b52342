//! Relationship chains embedded in SQL fragments.
//!
//! Grammar (identifiers are ASCII, case-insensitive):
//!
//! ```text
//! chain  := node+ '.' (word | '*')
//! node   := delim? word ('(' word ')')?
//! delim  := '.' | ':' | '!'     ('!' only on the first node)
//! word   := [a-z][a-z0-9_]*
//! ```
//!
//! A match never starts with `.` and never inside a quoted region. Each
//! match is resolved into a column reference plus the joins it needs.

use super::join::{Join, JoinPlan};
use super::quote::skip_quoted;
use crate::conventions::{Conventions, PrimaryKey};
use crate::error::{OrmError, OrmResult};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Node {
    pub delim: Option<char>,
    pub key: String,
    pub through: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChainMatch {
    pub start: usize,
    pub end: usize,
    pub nodes: Vec<Node>,
    pub column: String,
}

impl ChainMatch {
    fn escaped(&self) -> bool {
        self.nodes.first().and_then(|n| n.delim) == Some('!')
    }
}

fn is_word_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Parse `[a-z][a-z0-9_]*` at `pos`, returning its end.
fn word_at(text: &[u8], pos: usize) -> Option<usize> {
    if !text.get(pos)?.is_ascii_alphabetic() {
        return None;
    }
    let mut end = pos + 1;
    while end < text.len() && is_word_char(text[end]) {
        end += 1;
    }
    Some(end)
}

fn node_at(src: &str, pos: usize, first: bool) -> Option<(Node, usize)> {
    let text = src.as_bytes();
    let mut i = pos;
    let delim = match text.get(i) {
        Some(b'.') | Some(b':') => Some(text[i] as char),
        Some(b'!') if first => Some('!'),
        _ => None,
    };
    if delim.is_some() {
        i += 1;
    }
    let key_end = word_at(text, i)?;
    let key = src[i..key_end].to_string();
    i = key_end;

    let mut through = None;
    if text.get(i) == Some(&b'(') {
        if let Some(t_end) = word_at(text, i + 1) {
            if text.get(t_end) == Some(&b')') {
                through = Some(src[i + 1..t_end].to_string());
                i = t_end + 1;
            }
        }
    }

    Some((Node { delim, key, through }, i))
}

/// Try to match a chain starting exactly at `pos`.
fn match_at(src: &str, pos: usize) -> Option<ChainMatch> {
    let text = src.as_bytes();
    if text.get(pos) == Some(&b'.') {
        return None;
    }

    // Greedy node list, then back off until a column follows.
    let mut nodes = Vec::new();
    let mut ends = Vec::new();
    let mut i = pos;
    while let Some((node, end)) = node_at(src, i, nodes.is_empty()) {
        nodes.push(node);
        ends.push(end);
        i = end;
    }

    while let Some(end) = ends.pop() {
        if text.get(end) == Some(&b'.') {
            let col_start = end + 1;
            let col_end = if text.get(col_start) == Some(&b'*') {
                Some(col_start + 1)
            } else {
                word_at(text, col_start)
            };
            if let Some(col_end) = col_end {
                nodes.truncate(ends.len() + 1);
                return Some(ChainMatch {
                    start: pos,
                    end: col_end,
                    nodes,
                    column: src[col_start..col_end].to_string(),
                });
            }
        }
    }
    None
}

/// Find every chain in `src`, left to right, skipping quoted regions.
pub(crate) fn scan(src: &str) -> Vec<ChainMatch> {
    let text = src.as_bytes();
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < text.len() {
        if let Some(end) = skip_quoted(text, pos) {
            pos = end;
            continue;
        }
        if pos > 0 && is_word_char(text[pos - 1]) {
            pos += 1;
            continue;
        }
        match match_at(src, pos) {
            Some(m) => {
                pos = m.end;
                out.push(m);
            }
            None => pos += 1,
        }
    }
    out
}

fn unqualified(table: &str) -> &str {
    table.rsplit('.').next().unwrap_or(table)
}

/// Resolves chains against the conventions and registered aliases.
pub(crate) struct ChainResolver<'a> {
    table: &'a str,
    conventions: &'a dyn Conventions,
    aliases: &'a HashMap<String, String>,
    schema_aware: bool,
    known_tables: Option<Vec<String>>,
    expanding: Vec<String>,
}

impl<'a> ChainResolver<'a> {
    pub(crate) fn new(
        table: &'a str,
        conventions: &'a dyn Conventions,
        aliases: &'a HashMap<String, String>,
        schema_aware: bool,
    ) -> Self {
        Self {
            table,
            conventions,
            aliases,
            schema_aware,
            known_tables: None,
            expanding: Vec::new(),
        }
    }

    /// Replace every chain in `fragment` with `alias.column`, adding the
    /// joins it requires to `joins`.
    pub(crate) fn rewrite(&mut self, fragment: &str, joins: &mut JoinPlan) -> OrmResult<String> {
        Ok(self.rewrite_with_targets(fragment, joins)?.0)
    }

    /// Like [`rewrite`](Self::rewrite), also returning the alias every
    /// resolved chain ends on, in order of appearance.
    pub(crate) fn rewrite_with_targets(
        &mut self,
        fragment: &str,
        joins: &mut JoinPlan,
    ) -> OrmResult<(String, Vec<String>)> {
        let matches = scan(fragment);
        if matches.is_empty() {
            return Ok((fragment.to_string(), Vec::new()));
        }
        let mut out = String::with_capacity(fragment.len() + 16);
        let mut targets = Vec::with_capacity(matches.len());
        let mut last = 0;
        for m in matches {
            out.push_str(&fragment[last..m.start]);
            if m.escaped() {
                out.push_str(&fragment[m.start + 1..m.end]);
            } else {
                let alias = self.resolve(&m, joins)?;
                out.push_str(&format!("{alias}.{}", m.column));
                targets.push(alias);
            }
            last = m.end;
        }
        out.push_str(&fragment[last..]);
        Ok((out, targets))
    }

    fn is_known_table(&mut self, name: &str) -> bool {
        let conventions = self.conventions;
        self.known_tables
            .get_or_insert_with(|| conventions.known_tables())
            .iter()
            .any(|t| t == name)
    }

    /// `schema` `.` `table` becomes a single `schema.table` key.
    fn fold_schema(&mut self, nodes: &mut Vec<Node>) {
        if !self.schema_aware || nodes.len() < 2 {
            return;
        }
        let qualified = format!("{}.{}", nodes[0].key, nodes[1].key);
        if !self.is_known_table(&nodes[1].key) && self.is_known_table(&qualified) {
            let schema = nodes.remove(0);
            nodes[0].key = qualified;
            nodes[0].delim = schema.delim;
        }
    }

    fn single_primary(&self, table: &str) -> OrmResult<String> {
        match self.conventions.primary(table) {
            Some(PrimaryKey::Single(column)) => Ok(column),
            Some(PrimaryKey::Composite(_)) => Err(OrmError::validation(format!(
                "Composite primary key of '{table}' cannot be used to join"
            ))),
            None => Err(OrmError::validation(format!(
                "Table '{table}' has no primary key to join on"
            ))),
        }
    }

    /// Resolve one chain, returning the alias its column belongs to.
    fn resolve(&mut self, m: &ChainMatch, joins: &mut JoinPlan) -> OrmResult<String> {
        let mut nodes = m.nodes.clone();
        if nodes[0].delim.is_none() {
            nodes[0].delim = Some('.');
        }
        self.fold_schema(&mut nodes);

        let base = self.table;
        let base_alias = unqualified(base);

        if nodes[0].delim == Some('.') {
            let first = nodes[0].key.as_str();
            if first == base || first == base_alias {
                if nodes.len() > 1 {
                    return Err(OrmError::RedundantTablePrefix(first.to_string()));
                }
                return Ok(first.to_string());
            }
        }

        let current_alias = self.expanding.last().cloned();
        let mut parent = base.to_string();
        let mut parent_alias = base_alias.to_string();
        let mut table_alias = String::new();
        let last_index = nodes.len() - 1;

        for (index, node) in nodes.iter().enumerate() {
            let is_last = index == last_index;
            let is_alias = index == 0 && self.aliases.contains_key(&node.key);
            let (table, column, primary);

            if is_alias {
                if node.delim != Some('.') {
                    return Err(OrmError::BadAliasSyntax {
                        alias: node.key.clone(),
                        delimiter: node.delim.unwrap_or(':'),
                    });
                }
                let join = self.expand_alias(&node.key, joins)?;
                table = join.table;
                column = join.column;
                primary = join.primary;
                parent_alias = join.parent_alias;
            } else if node.delim == Some(':') {
                match &node.through {
                    Some(through) => {
                        let reference = self
                            .conventions
                            .belongs_to(&node.key, through)?
                            .ok_or_else(|| OrmError::relation_not_found(&parent, &node.key))?;
                        table = node.key.clone();
                        primary = reference.column;
                    }
                    None => {
                        let reference = self
                            .conventions
                            .has_many(&parent, &node.key)?
                            .ok_or_else(|| {
                                OrmError::relation_not_found(&parent, format!("related({})", node.key))
                            })?;
                        table = reference.table;
                        primary = reference.column;
                    }
                }
                column = self.single_primary(&parent)?;
            } else {
                let reference = self
                    .conventions
                    .belongs_to(&parent, &node.key)?
                    .ok_or_else(|| OrmError::relation_not_found(&parent, &node.key))?;
                primary = self.single_primary(&reference.table)?;
                table = reference.table;
                column = reference.column;
            }

            let mut join = Join {
                table: table.clone(),
                alias: String::new(),
                parent_alias: parent_alias.clone(),
                column,
                primary,
            };
            table_alias = match &current_alias {
                Some(alias) if is_last => alias.clone(),
                _ if is_alias => node.key.clone(),
                _ if parent == table => {
                    joins.free_alias(&format!("{parent_alias}_ref"), base_alias, &join)
                }
                _ => joins.free_alias(&node.key, base_alias, &join),
            };
            join.alias = table_alias.clone();

            joins.add(join);
            parent = table;
            parent_alias = table_alias.clone();
        }

        Ok(table_alias)
    }

    /// Expand a registered alias into its joins. All but the last join are
    /// merged into `joins`; the last is returned for the caller to re-key.
    fn expand_alias(&mut self, alias: &str, joins: &mut JoinPlan) -> OrmResult<Join> {
        if self.expanding.iter().any(|a| a == alias) {
            return Err(OrmError::RecursiveAlias(alias.to_string()));
        }
        let expression = self
            .aliases
            .get(alias)
            .cloned()
            .unwrap_or_default();
        let probe = format!("{expression}.x");
        let chain = scan(&probe)
            .into_iter()
            .find(|m| m.start == 0 && m.end == probe.len())
            .ok_or_else(|| OrmError::relation_not_found(self.table, expression.clone()))?;

        self.expanding.push(alias.to_string());
        let mut required = JoinPlan::new();
        let result = self.resolve(&chain, &mut required);
        self.expanding.pop();
        result?;

        let last = required
            .pop()
            .ok_or_else(|| OrmError::relation_not_found(self.table, expression))?;
        joins.merge(required);
        Ok(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(m: &ChainMatch) -> Vec<String> {
        m.nodes
            .iter()
            .map(|n| {
                let mut s: String = n.delim.map(String::from).unwrap_or_default();
                s.push_str(&n.key);
                if let Some(t) = &n.through {
                    s.push_str(&format!("({t})"));
                }
                s
            })
            .collect()
    }

    #[test]
    fn scan_simple_chain() {
        let found = scan("author.name = ?");
        assert_eq!(found.len(), 1);
        assert_eq!(keys(&found[0]), vec!["author"]);
        assert_eq!(found[0].column, "name");
        assert_eq!((found[0].start, found[0].end), (0, 11));
    }

    #[test]
    fn scan_multi_step_and_star() {
        let found = scan("SELECT book.author.*, :book_tag(tag).id");
        assert_eq!(found.len(), 2);
        assert_eq!(keys(&found[0]), vec!["book", ".author"]);
        assert_eq!(found[0].column, "*");
        assert_eq!(keys(&found[1]), vec![":book_tag(tag)"]);
        assert_eq!(found[1].column, "id");
    }

    #[test]
    fn scan_ignores_numbers_quotes_and_lone_words() {
        assert!(scan("price > 5.5").is_empty());
        assert!(scan("name = 'a.b'").is_empty());
        assert!(scan("`author`.name").is_empty());
        assert!(scan("id = ?").is_empty());
    }

    #[test]
    fn scan_escape() {
        let found = scan("!db.table = 1");
        assert_eq!(found.len(), 1);
        assert!(found[0].escaped());
    }

    #[test]
    fn scan_inside_function_call() {
        let found = scan("COUNT(DISTINCT author.id)");
        assert_eq!(found.len(), 1);
        assert_eq!(keys(&found[0]), vec!["author"]);
        assert_eq!(found[0].column, "id");
    }
}
