//! Binding condition arguments to `?` placeholders.
//!
//! Each argument is matched with the next placeholder. The text around the
//! placeholder is rewritten depending on the argument:
//!
//! | argument        | no operator          | explicit operator                    |
//! |-----------------|----------------------|--------------------------------------|
//! | scalar          | `= ?`                | unchanged                            |
//! | `NULL`          | `IS NULL`            | `NOT` gives `IS NOT NULL`, else error |
//! | list / subquery | `IN (?)` / `IN (sql)` | only `IN`, `NOT`, `NOT IN`            |
//! | empty list      | `IS NULL AND FALSE`  | `NOT ...` gives `IS NULL OR TRUE`     |
//! | literal         | unchanged            | unchanged                            |

use super::quote::skip_quoted;
use crate::driver::{Driver, Feature};
use crate::error::{OrmError, OrmResult};
use crate::value::{Arg, SubQuery, Value};

/// A condition after binding, with the parameters it consumes in order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Bound {
    pub condition: String,
    pub params: Vec<Value>,
}

const OPERATOR_CHARS: &[u8] = b"&|^~+-*/%(,<>=";

const OPERATOR_WORDS: &[&str] = &[
    "REGEXP", "ALL", "AND", "ANY", "BETWEEN", "EXISTS", "IN", "LIKE", "ILIKE", "RLIKE", "OR",
    "NOT", "SOME", "INTERVAL",
];

fn is_word(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

pub(crate) fn next_placeholder(sql: &str, from: usize) -> Option<usize> {
    let bytes = sql.as_bytes();
    let mut i = from;
    while i < bytes.len() {
        if let Some(end) = skip_quoted(bytes, i) {
            i = end;
            continue;
        }
        if bytes[i] == b'?' {
            return Some(i);
        }
        i += 1;
    }
    None
}

pub(crate) fn count_placeholders(sql: &str) -> usize {
    let mut count = 0;
    let mut from = 0;
    while let Some(pos) = next_placeholder(sql, from) {
        count += 1;
        from = pos + 1;
    }
    count
}

/// A located placeholder and the operator written before it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Slot {
    /// Start of the operator, or of the placeholder when there is none.
    start: usize,
    /// Start of the placeholder (`?` or `(?)`).
    placeholder: usize,
    end: usize,
    operator: Option<String>,
}

fn skip_space_back(bytes: &[u8], mut pos: usize) -> usize {
    while pos > 0 && bytes[pos - 1].is_ascii_whitespace() {
        pos -= 1;
    }
    pos
}

fn word_before(sql: &str, end: usize) -> (usize, &str) {
    let bytes = sql.as_bytes();
    let mut start = end;
    while start > 0 && is_word(bytes[start - 1]) {
        start -= 1;
    }
    (start, &sql[start..end])
}

/// Operator ending right before `pos` (whitespace allowed in between).
fn operator_before(sql: &str, pos: usize) -> Option<(usize, String)> {
    let bytes = sql.as_bytes();
    let end = skip_space_back(bytes, pos);
    if end == 0 {
        return None;
    }
    let last = bytes[end - 1];
    if OPERATOR_CHARS.contains(&last) {
        return Some((end - 1, (last as char).to_string()));
    }

    let (start, word) = word_before(sql, end);
    if !OPERATOR_WORDS.contains(&word) {
        return None;
    }
    if word == "IN" {
        let (not_start, not) = word_before(sql, skip_space_back(bytes, start));
        if not == "NOT" {
            return Some((not_start, "NOT IN".to_string()));
        }
    }
    Some((start, word.to_string()))
}

fn locate(sql: &str, q: usize) -> Slot {
    let bytes = sql.as_bytes();
    let wrapped = q > 0 && bytes[q - 1] == b'(' && bytes.get(q + 1) == Some(&b')');
    let (placeholder, end) = if wrapped { (q - 1, q + 2) } else { (q, q + 1) };

    if let Some((start, operator)) = operator_before(sql, placeholder) {
        return Slot {
            start,
            placeholder,
            end,
            operator: Some(operator),
        };
    }
    if wrapped && placeholder > 0 {
        // `x (?)`: the bracket itself counts as the operator.
        return Slot {
            start: q - 1,
            placeholder: q,
            end: q + 1,
            operator: Some("(".to_string()),
        };
    }
    if placeholder == 0 && !wrapped {
        return Slot {
            start: 0,
            placeholder: 0,
            end: 1,
            operator: Some(String::new()),
        };
    }
    Slot {
        start: placeholder,
        placeholder,
        end,
        operator: None,
    }
}

/// Rows of a sub-query that cannot be inlined.
fn materialize(sub: &SubQuery, sql: &str, params: &[Value]) -> OrmResult<Vec<Value>> {
    let source = sub
        .source
        .as_ref()
        .ok_or_else(|| OrmError::SubQueryNotMaterialized(sub.builder.table_name().to_string()))?;
    Ok(source
        .fetch(sql, params)?
        .into_iter()
        .map(|mut row| {
            if row.len() == 1 {
                row.remove(0)
            } else {
                Value::List(row)
            }
        })
        .collect())
}

enum ListSource<'a> {
    Values(&'a [Value]),
    Rows(Vec<Value>),
}

impl ListSource<'_> {
    fn items(&self) -> &[Value] {
        match self {
            ListSource::Values(v) => v,
            ListSource::Rows(v) => v,
        }
    }
}

fn check_empty_list(condition: &str, prefix: &str) -> OrmResult<&'static str> {
    let has_brackets = condition.contains('(');
    let has_operators = condition.contains("AND") || condition.contains("OR");
    let has_not = condition.contains("NOT");
    let has_prefix_not = prefix.contains("NOT");
    if !has_brackets && (has_operators || (has_not && !has_prefix_not)) {
        return Err(OrmError::PossibleSqlCorruption(condition.to_string()));
    }
    Ok(if has_prefix_not {
        "IS NULL OR TRUE"
    } else {
        "IS NULL AND FALSE"
    })
}

/// Bind `args` into `condition`.
pub(crate) fn bind(condition: &str, args: &[Arg], driver: &dyn Driver) -> OrmResult<Bound> {
    let mut condition = condition.trim().to_string();
    let placeholders = count_placeholders(&condition);
    if placeholders == 0 && args.len() == 1 {
        condition.push_str(" ?");
    } else if placeholders != args.len() {
        return Err(OrmError::ArgumentCountMismatch {
            placeholders,
            arguments: args.len(),
        });
    }

    let mut params = Vec::with_capacity(args.len());
    let mut cursor = 0;

    for arg in args {
        let q = next_placeholder(&condition, cursor).ok_or(OrmError::ArgumentCountMismatch {
            placeholders,
            arguments: args.len(),
        })?;
        let slot = locate(&condition, q);
        let operator = slot.operator.as_deref();

        let (span_start, replacement) = match arg {
            Arg::Value(Value::Null) => match operator {
                Some("NOT") => (slot.start, Some("IS NOT NULL".to_string())),
                Some(op) => {
                    return Err(OrmError::OperatorArgumentConflict {
                        operator: op.to_string(),
                        argument: "NULL",
                    });
                }
                None => (slot.placeholder, Some("IS NULL".to_string())),
            },
            Arg::Value(Value::List(_)) | Arg::SubQuery(_) => {
                let prefix = match operator {
                    Some("NOT") | Some("NOT IN") => "NOT IN ",
                    Some("IN") => "IN ",
                    Some(op) => {
                        return Err(OrmError::OperatorArgumentConflict {
                            operator: op.to_string(),
                            argument: "array",
                        });
                    }
                    None => "IN ",
                };

                let list = match arg {
                    Arg::SubQuery(sub) => {
                        let built = sub.builder.compile_subquery()?;
                        if driver.is_supported(Feature::SubSelect) {
                            params.extend(built.params);
                            let inlined = format!("{prefix}({})", built.sql);
                            condition.replace_range(slot.start..slot.end, &inlined);
                            cursor = slot.start + inlined.len();
                            continue;
                        }
                        ListSource::Rows(materialize(sub, &built.sql, &built.params)?)
                    }
                    Arg::Value(Value::List(items)) => ListSource::Values(items),
                    Arg::Value(_) => ListSource::Values(&[]),
                };

                if list.items().is_empty() {
                    let folded = check_empty_list(&condition, prefix)?;
                    (slot.start, Some(folded.to_string()))
                } else {
                    params.push(Value::List(list.items().to_vec()));
                    (slot.start, Some(format!("{prefix}(?)")))
                }
            }
            Arg::Value(literal @ Value::Literal(_)) => {
                params.push(literal.clone());
                (slot.end, None)
            }
            Arg::Value(value) => {
                params.push(value.clone());
                if operator.is_some() {
                    (slot.end, None)
                } else {
                    (slot.placeholder, Some("= ?".to_string()))
                }
            }
        };

        cursor = match replacement {
            Some(text) => {
                condition.replace_range(span_start..slot.end, &text);
                span_start + text.len()
            }
            None => slot.end,
        };
    }

    Ok(Bound { condition, params })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use crate::driver::MySqlDriver;

    fn b(condition: &str, args: Vec<Arg>) -> OrmResult<Bound> {
        bind(condition, &args, &MySqlDriver::new())
    }

    #[test]
    fn shorthand_appends_placeholder_and_equals() {
        let bound = b("id", args![5]).unwrap();
        assert_eq!(bound.condition, "id = ?");
        assert_eq!(bound.params, vec![Value::Int(5)]);
    }

    #[test]
    fn explicit_operators_are_kept() {
        assert_eq!(b("age > ?", args![18]).unwrap().condition, "age > ?");
        assert_eq!(b("name LIKE ?", args!["a%"]).unwrap().condition, "name LIKE ?");
        assert_eq!(
            b("a BETWEEN ? AND ?", args![1, 2]).unwrap().condition,
            "a BETWEEN ? AND ?"
        );
    }

    #[test]
    fn null_handling() {
        assert_eq!(b("deleted_at", args![Value::Null]).unwrap().condition, "deleted_at IS NULL");
        assert_eq!(
            b("deleted_at NOT ?", args![Value::Null]).unwrap().condition,
            "deleted_at IS NOT NULL"
        );
        let err = b("deleted_at > ?", args![Value::Null]).unwrap_err();
        assert!(matches!(err, OrmError::OperatorArgumentConflict { argument: "NULL", .. }));
    }

    #[test]
    fn lists_become_in() {
        let bound = b("id", args![vec![1, 2]]).unwrap();
        assert_eq!(bound.condition, "id IN (?)");
        assert_eq!(bound.params, vec![Value::list([1, 2])]);

        assert_eq!(b("id IN ?", args![vec![1]]).unwrap().condition, "id IN (?)");
        assert_eq!(b("id IN (?)", args![vec![1]]).unwrap().condition, "id IN (?)");
        assert_eq!(b("id NOT ?", args![vec![1]]).unwrap().condition, "id NOT IN (?)");
        assert_eq!(b("id NOT IN ?", args![vec![1]]).unwrap().condition, "id NOT IN (?)");

        let err = b("id > ?", args![vec![1]]).unwrap_err();
        assert!(matches!(err, OrmError::OperatorArgumentConflict { argument: "array", .. }));
    }

    #[test]
    fn empty_lists_fold() {
        let empty: Vec<i64> = vec![];
        let bound = b("id IN ?", args![empty.clone()]).unwrap();
        assert_eq!(bound.condition, "id IS NULL AND FALSE");
        assert!(bound.params.is_empty());

        assert_eq!(
            b("id NOT IN ?", args![empty.clone()]).unwrap().condition,
            "id IS NULL OR TRUE"
        );
        assert_eq!(
            b("(a = 1 OR id IN ?)", args![empty.clone()]).unwrap().condition,
            "(a = 1 OR id IS NULL AND FALSE)"
        );

        let err = b("a = 1 OR id IN ?", args![empty]).unwrap_err();
        assert!(matches!(err, OrmError::PossibleSqlCorruption(_)));
    }

    #[test]
    fn argument_count_must_match() {
        let err = b("a = ? AND b = ?", args![1]).unwrap_err();
        assert!(matches!(
            err,
            OrmError::ArgumentCountMismatch {
                placeholders: 2,
                arguments: 1
            }
        ));
        assert!(b("a", args![]).is_ok());
        assert!(b("a", args![1, 2]).is_err());
    }

    #[test]
    fn literals_keep_placeholder() {
        let lit = crate::value::SqlLiteral::new("NOW()");
        let bound = b("created < ?", args![lit.clone()]).unwrap();
        assert_eq!(bound.condition, "created < ?");
        assert_eq!(bound.params, vec![Value::Literal(lit)]);
    }

    #[test]
    fn quoted_question_marks_are_not_placeholders() {
        let bound = b("title = '?' AND id = ?", args![3]).unwrap();
        assert_eq!(bound.condition, "title = '?' AND id = ?");
        assert_eq!(bound.params, vec![Value::Int(3)]);
    }

    #[test]
    fn bare_placeholder_counts_as_operator() {
        assert_eq!(b("? = 1", args![1]).unwrap().condition, "? = 1");
        let err = b("?", args![Value::Null]).unwrap_err();
        assert!(matches!(err, OrmError::OperatorArgumentConflict { .. }));
    }

    #[test]
    fn mixed_arguments_bind_in_order() {
        let bound = b("a = ? AND b ? AND c", args![1, Value::Null, vec!["x"]]);
        // `c` has no placeholder, so counts differ.
        assert!(bound.is_err());

        let bound = b("a = ? AND b ? AND c ?", args![1, Value::Null, vec!["x"]]).unwrap();
        assert_eq!(bound.condition, "a = ? AND b IS NULL AND c IN (?)");
        assert_eq!(bound.params, vec![Value::Int(1), Value::list(["x"])]);
    }
}
