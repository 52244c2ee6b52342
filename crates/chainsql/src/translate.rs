//! Translation of raw driver failures into typed errors.
//!
//! The [`Database`](crate::Database) facade runs every failed statement's
//! [`DriverError`] through an [`ErrorTranslator`] before returning it.

use crate::error::{DriverError, OrmError};
use std::fmt;

/// Maps a driver failure to an [`OrmError`].
///
/// Implementations must be pure: the same input always yields the same kind
/// of error, and unknown failures are returned as [`OrmError::Driver`].
pub trait ErrorTranslator: Send + Sync + fmt::Debug {
    fn translate(&self, err: DriverError) -> OrmError;
}

/// PostgreSQL SQLSTATE codes.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresErrorTranslator;

impl ErrorTranslator for PostgresErrorTranslator {
    fn translate(&self, err: DriverError) -> OrmError {
        match err.sqlstate.as_deref() {
            Some("23505") => OrmError::UniqueViolation(err.describe()),
            Some("23503") => OrmError::ForeignKeyViolation(err.describe()),
            Some("23514") => OrmError::CheckViolation(err.describe()),
            _ => OrmError::Driver(err),
        }
    }
}

/// MySQL reports integrity failures as SQLSTATE 23000 and tells them apart
/// by vendor code.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlErrorTranslator;

const MYSQL_DUPLICATE_ENTRY: i32 = 1062;
const MYSQL_ROW_IS_REFERENCED: i32 = 1451;

impl ErrorTranslator for MySqlErrorTranslator {
    fn translate(&self, err: DriverError) -> OrmError {
        if err.sqlstate.as_deref() != Some("23000") {
            return OrmError::Driver(err);
        }
        match err.code {
            Some(MYSQL_DUPLICATE_ENTRY) => OrmError::UniqueViolation(err.describe()),
            Some(MYSQL_ROW_IS_REFERENCED) => OrmError::ForeignKeyViolation(err.describe()),
            _ => OrmError::Driver(err),
        }
    }
}

/// Leaves every failure as [`OrmError::Driver`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughTranslator;

impl ErrorTranslator for PassthroughTranslator {
    fn translate(&self, err: DriverError) -> OrmError {
        OrmError::Driver(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postgres_integrity_codes() {
        let t = PostgresErrorTranslator;
        let err = t.translate(
            DriverError::new("duplicate key value")
                .with_sqlstate("23505")
                .with_constraint("users_email_key"),
        );
        assert!(err.is_unique_violation());
        assert_eq!(
            err.to_string(),
            "Unique constraint violation: users_email_key: duplicate key value"
        );

        let err = t.translate(DriverError::new("fk").with_sqlstate("23503"));
        assert!(err.is_foreign_key_violation());

        let err = t.translate(DriverError::new("check").with_sqlstate("23514"));
        assert!(matches!(err, OrmError::CheckViolation(_)));
    }

    #[test]
    fn mysql_needs_state_and_vendor_code() {
        let t = MySqlErrorTranslator;
        let dup = DriverError::new("Duplicate entry").with_sqlstate("23000");
        assert!(t.translate(dup.clone().with_code(1062)).is_unique_violation());
        assert!(
            t.translate(dup.clone().with_code(1451))
                .is_foreign_key_violation()
        );
        assert!(matches!(
            t.translate(dup.clone().with_code(1048)),
            OrmError::Driver(_)
        ));
        assert!(matches!(
            t.translate(DriverError::new("x").with_sqlstate("42000").with_code(1062)),
            OrmError::Driver(_)
        ));
    }

    #[test]
    fn unknown_errors_pass_through_unchanged() {
        let raw = DriverError::new("syntax error").with_sqlstate("42601");
        match PostgresErrorTranslator.translate(raw.clone()) {
            OrmError::Driver(inner) => assert_eq!(inner, raw),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            PassthroughTranslator.translate(raw),
            OrmError::Driver(_)
        ));
    }
}
