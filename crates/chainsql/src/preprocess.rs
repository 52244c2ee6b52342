//! Expansion of builder placeholders into the form a driver executes.
//!
//! Builder SQL uses one `?` per bound [`Value`]. Before execution every
//! placeholder is expanded according to its value:
//!
//! - scalars become a driver placeholder (`?` or `$n`)
//! - lists become `?, ?, ?`; nested lists become tuples `(?, ?), (?, ?)`
//! - literals are inlined, with their own parameters expanded in place
//! - assignments become `a = ?, b = ?` after `SET`, and
//!   `(a, b) VALUES (?, ?)` elsewhere (a list of assignments gives a
//!   multi-row `VALUES` list)

use crate::builder::{skip_quoted, BuiltQuery};
use crate::driver::{Driver, PlaceholderStyle};
use crate::error::{OrmError, OrmResult};
use crate::value::Value;

/// Expands builder SQL for one driver.
pub struct Preprocessor<'a> {
    driver: &'a dyn Driver,
    sql: String,
    params: Vec<Value>,
}

impl<'a> Preprocessor<'a> {
    pub fn new(driver: &'a dyn Driver) -> Self {
        Self {
            driver,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    /// Expand `sql` with `params`, consuming one value per placeholder.
    pub fn process(mut self, sql: &str, params: Vec<Value>) -> OrmResult<BuiltQuery> {
        let expected = params.len();
        let mut params = params.into_iter();
        let used = self.expand(sql, &mut params, expected)?;
        let left = params.count();
        if left > 0 {
            return Err(OrmError::ArgumentCountMismatch {
                placeholders: used,
                arguments: used + left,
            });
        }
        Ok(BuiltQuery::new(self.sql, self.params))
    }

    fn expand(
        &mut self,
        sql: &str,
        params: &mut impl Iterator<Item = Value>,
        expected: usize,
    ) -> OrmResult<usize> {
        let bytes = sql.as_bytes();
        let mut used = 0;
        let mut last = 0;
        let mut i = 0;
        while i < bytes.len() {
            if let Some(end) = skip_quoted(bytes, i) {
                i = end;
                continue;
            }
            if bytes[i] != b'?' {
                i += 1;
                continue;
            }
            self.sql.push_str(&sql[last..i]);
            let value = params.next().ok_or(OrmError::ArgumentCountMismatch {
                placeholders: used + 1,
                arguments: expected,
            })?;
            used += 1;
            let after_set = sql[..i].trim_end().to_ascii_uppercase().ends_with("SET");
            self.value(value, after_set)?;
            i += 1;
            last = i;
        }
        self.sql.push_str(&sql[last..]);
        Ok(used)
    }

    fn placeholder(&mut self, value: Value) {
        self.params.push(value);
        match self.driver.placeholder_style() {
            PlaceholderStyle::QuestionMark => self.sql.push('?'),
            PlaceholderStyle::Numbered => {
                let n = self.params.len();
                self.sql.push_str(&format!("${n}"));
            }
        }
    }

    fn scalar(&mut self, value: Value) -> OrmResult<()> {
        match value {
            Value::Literal(literal) => {
                let expected = literal.params.len();
                let mut params = literal.params.into_iter();
                let used = self.expand(&literal.sql, &mut params, expected)?;
                if used != expected {
                    return Err(OrmError::ArgumentCountMismatch {
                        placeholders: used,
                        arguments: expected,
                    });
                }
                Ok(())
            }
            Value::List(_) | Value::Assignments(_) => Err(OrmError::validation(format!(
                "{} value cannot be nested here",
                value.kind()
            ))),
            other => {
                self.placeholder(other);
                Ok(())
            }
        }
    }

    fn list(&mut self, items: Vec<Value>) -> OrmResult<()> {
        if items.is_empty() {
            self.sql.push_str("NULL");
            return Ok(());
        }
        for (n, item) in items.into_iter().enumerate() {
            if n > 0 {
                self.sql.push_str(", ");
            }
            match item {
                Value::List(tuple) => {
                    self.sql.push('(');
                    for (m, v) in tuple.into_iter().enumerate() {
                        if m > 0 {
                            self.sql.push_str(", ");
                        }
                        self.scalar(v)?;
                    }
                    self.sql.push(')');
                }
                other => self.scalar(other)?,
            }
        }
        Ok(())
    }

    fn value(&mut self, value: Value, after_set: bool) -> OrmResult<()> {
        match value {
            Value::Assignments(pairs) if after_set => {
                if pairs.is_empty() {
                    return Err(OrmError::validation("nothing to SET"));
                }
                for (n, (column, v)) in pairs.into_iter().enumerate() {
                    if n > 0 {
                        self.sql.push_str(", ");
                    }
                    self.sql.push_str(&self.driver.quote_identifier(&column));
                    self.sql.push_str(" = ");
                    self.scalar(v)?;
                }
                Ok(())
            }
            Value::Assignments(pairs) => self.values(vec![pairs]),
            Value::List(items)
                if !items.is_empty()
                    && items.iter().all(|v| matches!(v, Value::Assignments(_))) =>
            {
                let rows = items
                    .into_iter()
                    .filter_map(|v| match v {
                        Value::Assignments(pairs) => Some(pairs),
                        _ => None,
                    })
                    .collect();
                self.values(rows)
            }
            Value::List(items) => self.list(items),
            other => self.scalar(other),
        }
    }

    /// `(a, b) VALUES (?, ?), (?, ?)`; columns come from the first row.
    fn values(&mut self, rows: Vec<Vec<(String, Value)>>) -> OrmResult<()> {
        let columns: Vec<String> = match rows.first() {
            Some(first) if !first.is_empty() => first.iter().map(|(c, _)| c.clone()).collect(),
            _ => return Err(OrmError::validation("nothing to insert")),
        };
        let quoted: Vec<String> = columns
            .iter()
            .map(|c| self.driver.quote_identifier(c))
            .collect();
        self.sql.push_str(&format!("({}) VALUES ", quoted.join(", ")));

        for (n, row) in rows.into_iter().enumerate() {
            if row.len() != columns.len() || row.iter().zip(&columns).any(|((c, _), e)| c != e) {
                return Err(OrmError::validation(format!(
                    "row {n} does not have the columns of the first row"
                )));
            }
            if n > 0 {
                self.sql.push_str(", ");
            }
            self.sql.push('(');
            for (m, (_, v)) in row.into_iter().enumerate() {
                if m > 0 {
                    self.sql.push_str(", ");
                }
                self.scalar(v)?;
            }
            self.sql.push(')');
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{MySqlDriver, PostgresDriver};
    use crate::value::SqlLiteral;

    fn pg(sql: &str, params: Vec<Value>) -> OrmResult<BuiltQuery> {
        Preprocessor::new(&PostgresDriver::new()).process(sql, params)
    }

    fn my(sql: &str, params: Vec<Value>) -> OrmResult<BuiltQuery> {
        Preprocessor::new(&MySqlDriver::new()).process(sql, params)
    }

    #[test]
    fn numbers_placeholders_for_postgres() {
        let q = pg("SELECT * FROM t WHERE a = ? AND b = ?", vec![1.into(), "x".into()]).unwrap();
        assert_eq!(q.sql, "SELECT * FROM t WHERE a = $1 AND b = $2");
        assert_eq!(q.params, vec![Value::Int(1), Value::from("x")]);
    }

    #[test]
    fn expands_lists_and_tuples() {
        let q = pg("a IN (?)", vec![Value::list([1, 2, 3])]).unwrap();
        assert_eq!(q.sql, "a IN ($1, $2, $3)");

        let q = my(
            "(a, b) IN (?)",
            vec![Value::List(vec![Value::list([1, 2]), Value::list([3, 4])])],
        )
        .unwrap();
        assert_eq!(q.sql, "(a, b) IN ((?, ?), (?, ?))");
        assert_eq!(q.params.len(), 4);
    }

    #[test]
    fn inlines_literals() {
        let params = vec![SqlLiteral::new("NOW()").into(), 7.into()];
        let q = pg("created < ? AND id = ?", params).unwrap();
        assert_eq!(q.sql, "created < NOW() AND id = $1");

        let lit = SqlLiteral::with_params("id + ?", vec![Value::Int(1)]);
        let q = pg("SET n = ?", vec![lit.into()]).unwrap();
        assert_eq!(q.sql, "SET n = id + $1");
    }

    #[test]
    fn update_assignments() {
        let q = pg(
            r#"UPDATE "book" SET ? WHERE ("id" = ?)"#,
            vec![Value::assignments([("title", "Dune"), ("pages", "412")]), 3.into()],
        )
        .unwrap();
        assert_eq!(
            q.sql,
            r#"UPDATE "book" SET "title" = $1, "pages" = $2 WHERE ("id" = $3)"#
        );
        assert_eq!(q.params.len(), 3);
    }

    #[test]
    fn insert_assignments_and_multi_row() {
        let q = my(
            "INSERT INTO `book` ?",
            vec![Value::assignments([("title", "Dune")])],
        )
        .unwrap();
        assert_eq!(q.sql, "INSERT INTO `book` (`title`) VALUES (?)");

        let rows = Value::List(vec![
            Value::assignments([("id", 1), ("tag", 2)]),
            Value::assignments([("id", 3), ("tag", 4)]),
        ]);
        let q = pg("INSERT INTO \"book_tag\" ?", vec![rows]).unwrap();
        assert_eq!(
            q.sql,
            r#"INSERT INTO "book_tag" ("id", "tag") VALUES ($1, $2), ($3, $4)"#
        );
    }

    #[test]
    fn quoted_question_marks_are_kept() {
        let q = pg("a = '?' AND b = ?", vec![1.into()]).unwrap();
        assert_eq!(q.sql, "a = '?' AND b = $1");
    }

    #[test]
    fn placeholder_count_must_match() {
        assert!(matches!(
            pg("a = ? AND b = ?", vec![1.into()]).unwrap_err(),
            OrmError::ArgumentCountMismatch { .. }
        ));
        assert!(matches!(
            pg("a = ?", vec![1.into(), 2.into()]).unwrap_err(),
            OrmError::ArgumentCountMismatch {
                placeholders: 1,
                arguments: 2
            }
        ));
    }
}
