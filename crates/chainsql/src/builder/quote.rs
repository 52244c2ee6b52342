//! Identifier quoting over finished SQL text.
//!
//! Every bare identifier is wrapped in the driver's quotes, except:
//! - all-uppercase words (keywords such as `SELECT`, `IS NULL`, `FORCE INDEX`)
//! - words directly followed by `(` (function calls)
//! - anything inside `'strings'`, `` `quoted` ``, `"quoted"` or `[bracketed]` names
//! - words after a `::` cast and words starting with a digit

use crate::driver::Driver;

fn is_word(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

/// Index just past the quoted region starting at `start`, if `sql[start]`
/// opens one.
pub(crate) fn skip_quoted(sql: &[u8], start: usize) -> Option<usize> {
    let close = match sql[start] {
        b'\'' => b'\'',
        b'"' => b'"',
        b'`' => b'`',
        b'[' => b']',
        _ => return None,
    };
    let end = sql[start + 1..]
        .iter()
        .position(|&b| b == close)
        .map_or(sql.len(), |p| start + 1 + p + 1);
    Some(end)
}

/// Quote bare identifiers in `sql` for `driver`.
pub(crate) fn delimite(sql: &str, driver: &dyn Driver) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len() + sql.len() / 4);
    let mut i = 0;

    while i < bytes.len() {
        if let Some(end) = skip_quoted(bytes, i) {
            out.push_str(&sql[i..end]);
            i = end;
            continue;
        }
        if !is_word(bytes[i]) {
            let start = i;
            while i < bytes.len() && !is_word(bytes[i]) && skip_quoted(bytes, i).is_none() {
                i += 1;
            }
            out.push_str(&sql[start..i]);
            continue;
        }

        let start = i;
        while i < bytes.len() && is_word(bytes[i]) {
            i += 1;
        }
        let word = &sql[start..i];

        let first = bytes[start];
        let starts_identifier = first.is_ascii_alphabetic() || first == b'_';
        let is_call = bytes.get(i) == Some(&b'(');
        let after_cast = start >= 2 && &bytes[start - 2..start] == b"::";
        let is_keyword = word.to_uppercase() == word;

        if starts_identifier && !is_call && !after_cast && !is_keyword {
            out.push_str(&driver.quote_identifier(word));
        } else {
            out.push_str(word);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{MySqlDriver, PostgresDriver};

    fn q(sql: &str) -> String {
        delimite(sql, &MySqlDriver::new())
    }

    #[test]
    fn quotes_identifiers_but_not_keywords() {
        assert_eq!(
            q("SELECT author.* FROM author WHERE (id = ?)"),
            "SELECT `author`.* FROM `author` WHERE (`id` = ?)"
        );
    }

    #[test]
    fn leaves_functions_and_numbers() {
        assert_eq!(q("SELECT COUNT(id), max(age) FROM t"), "SELECT COUNT(`id`), max(`age`) FROM `t`");
        assert_eq!(q("HAVING id > 5.5"), "HAVING `id` > 5.5");
    }

    #[test]
    fn skips_quoted_regions() {
        assert_eq!(q("name = 'john doe'"), "`name` = 'john doe'");
        assert_eq!(q("`already`.col"), "`already`.`col`");
        assert_eq!(q("x IN (SELECT `id` FROM `t`)"), "`x` IN (SELECT `id` FROM `t`)");
    }

    #[test]
    fn postgres_casts_are_left_alone() {
        assert_eq!(
            delimite("created::date = ?", &PostgresDriver::new()),
            "\"created\"::date = ?"
        );
    }

    #[test]
    fn mixed_case_is_quoted() {
        assert_eq!(q("FORCE INDEX (nameOfTheForceIndex)"), "FORCE INDEX (`nameOfTheForceIndex`)");
    }
}
