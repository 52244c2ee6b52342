//! Join planning and rendering.

use std::collections::HashSet;

/// One `LEFT JOIN` discovered while resolving chains.
///
/// Rendered as `LEFT JOIN table [AS alias] ON parent_alias.column = alias.primary`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct Join {
    pub table: String,
    pub alias: String,
    pub parent_alias: String,
    pub column: String,
    pub primary: String,
}

impl Join {
    /// Same joined table on the same keys, whatever its alias.
    fn same_target(&self, other: &Join) -> bool {
        self.table == other.table
            && self.parent_alias == other.parent_alias
            && self.column == other.column
            && self.primary == other.primary
    }
}

/// Ordered, de-duplicated set of joins.
#[derive(Debug, Default)]
pub(crate) struct JoinPlan {
    joins: Vec<Join>,
    seen: HashSet<Join>,
}

impl JoinPlan {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a join unless an identical one exists. Returns whether it was new.
    pub(crate) fn add(&mut self, join: Join) -> bool {
        if self.seen.contains(&join) {
            return false;
        }
        self.seen.insert(join.clone());
        self.joins.push(join);
        true
    }

    pub(crate) fn pop(&mut self) -> Option<Join> {
        let join = self.joins.pop()?;
        self.seen.remove(&join);
        Some(join)
    }

    pub(crate) fn merge(&mut self, other: JoinPlan) {
        for join in other.joins {
            self.add(join);
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Render position of the join aliased `alias`.
    pub(crate) fn position(&self, alias: &str) -> Option<usize> {
        self.joins.iter().position(|j| j.alias == alias)
    }

    /// First of `candidate`, `candidate_2`, `candidate_3`, ... usable as the
    /// alias of `join`. An alias is usable unless it is `reserved` or
    /// another join already goes by it.
    pub(crate) fn free_alias(&self, candidate: &str, reserved: &str, join: &Join) -> String {
        let taken = |alias: &str| {
            alias == reserved
                || self
                    .joins
                    .iter()
                    .any(|j| j.alias == alias && !j.same_target(join))
        };
        if !taken(candidate) {
            return candidate.to_string();
        }
        (2..)
            .map(|n| format!("{candidate}_{n}"))
            .find(|alias| !taken(alias))
            .unwrap_or_else(|| candidate.to_string())
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Join> {
        self.joins.iter()
    }
}
