//! Error types for chainsql

use std::fmt;
use thiserror::Error;

/// Result type alias for chainsql operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error types for query building and execution
#[derive(Debug, Error)]
pub enum OrmError {
    /// Placeholder count in a condition differs from the number of arguments
    #[error("Argument count ({arguments}) does not match placeholder count ({placeholders})")]
    ArgumentCountMismatch {
        placeholders: usize,
        arguments: usize,
    },

    /// An explicit operator was combined with a NULL or list argument
    #[error("Column operator '{operator}' does not accept {argument} argument")]
    OperatorArgumentConflict {
        operator: String,
        argument: &'static str,
    },

    /// Folding an empty list would change the meaning of the condition
    #[error("Possible SQL query corruption in '{0}'. Add parentheses around operators")]
    PossibleSqlCorruption(String),

    /// No belongs-to / has-many reference for a chain step
    #[error("No reference found for ${table}->{relation}")]
    RelationNotFound { table: String, relation: String },

    /// More than one has-many candidate matches a chain step
    #[error("Ambiguous reference for ${table}->related({relation})")]
    AmbiguousRelation { table: String, relation: String },

    /// An alias was used with a has-many or escape delimiter
    #[error("Bad syntax when using alias: '{delimiter}{alias}...' must be written as '{alias}...'")]
    BadAliasSyntax { alias: String, delimiter: char },

    /// An alias expands (directly or indirectly) into itself
    #[error("Alias '{0}' refers to itself")]
    RecursiveAlias(String),

    /// Alias name already registered
    #[error("Alias '{0}' is already used")]
    DuplicateAlias(String),

    /// A chain starts with the base table name and continues with more keys
    #[error(
        "Do not prefix table chain with origin table name '{0}'. Register an alias to make a self reference"
    )]
    RedundantTablePrefix(String),

    /// LIMIT/OFFSET set before building UPDATE/DELETE
    #[error("LIMIT clause is not supported in {0} query")]
    UnsupportedLimitOnMutation(&'static str),

    /// A condition of an UPDATE/DELETE needs a JOIN
    #[error("JOIN is not supported in {0} query")]
    UnsupportedJoinOnMutation(&'static str),

    /// A select fragment was empty
    #[error("Select column must be a non-empty string")]
    EmptySelectColumn,

    /// A left condition does not constrain any joined table
    #[error("Left condition '{0}' does not reference a joined table")]
    DetachedLeftCondition(String),

    /// A sub-query argument has no select list and its table no primary key
    #[error("Sub-query on '{0}' must have a select column")]
    SubQueryWithoutSelect(String),

    /// Sub-selects are unsupported and no row source was attached
    #[error("Sub-query on '{0}' cannot be inlined and has no row source")]
    SubQueryNotMaterialized(String),

    /// Query execution error
    #[error("Query error: {0}")]
    Query(#[from] tokio_postgres::Error),

    /// Untranslated driver failure
    #[error("Driver error: {0}")]
    Driver(DriverError),

    /// Row not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unique / primary key constraint violation
    #[error("Unique constraint violation: {0}")]
    UniqueViolation(String),

    /// Foreign key constraint violation
    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// Check constraint violation
    #[error("Check constraint violation: {0}")]
    CheckViolation(String),

    /// Query timeout error
    #[error("Query timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl OrmError {
    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn relation_not_found(table: &str, relation: impl Into<String>) -> Self {
        Self::RelationNotFound {
            table: table.to_string(),
            relation: relation.into(),
        }
    }

    /// Check if this is a unique violation error
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation(_))
    }

    /// Check if this is a foreign key violation error
    pub fn is_foreign_key_violation(&self) -> bool {
        matches!(self, Self::ForeignKeyViolation(_))
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Whether the error was raised while building SQL (before any I/O).
    pub fn is_build_error(&self) -> bool {
        matches!(
            self,
            Self::ArgumentCountMismatch { .. }
                | Self::OperatorArgumentConflict { .. }
                | Self::PossibleSqlCorruption(_)
                | Self::RelationNotFound { .. }
                | Self::AmbiguousRelation { .. }
                | Self::BadAliasSyntax { .. }
                | Self::RecursiveAlias(_)
                | Self::DuplicateAlias(_)
                | Self::RedundantTablePrefix(_)
                | Self::UnsupportedLimitOnMutation(_)
                | Self::UnsupportedJoinOnMutation(_)
                | Self::EmptySelectColumn
                | Self::DetachedLeftCondition(_)
                | Self::SubQueryWithoutSelect(_)
                | Self::SubQueryNotMaterialized(_)
        )
    }
}

/// A raw failure reported by a database driver, before translation.
///
/// `sqlstate` is the five character SQLSTATE class/subclass; `code` is the
/// vendor specific error number when the server reports one (MySQL does,
/// PostgreSQL does not).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverError {
    pub sqlstate: Option<String>,
    pub code: Option<i32>,
    pub message: String,
    pub constraint: Option<String>,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            sqlstate: None,
            code: None,
            message: message.into(),
            constraint: None,
        }
    }

    pub fn with_sqlstate(mut self, sqlstate: impl Into<String>) -> Self {
        self.sqlstate = Some(sqlstate.into());
        self
    }

    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraint = Some(constraint.into());
        self
    }

    /// Extract the server error details from a tokio-postgres error.
    pub fn from_postgres(err: &tokio_postgres::Error) -> Self {
        match err.as_db_error() {
            Some(db_err) => {
                let mut out =
                    Self::new(db_err.message()).with_sqlstate(db_err.code().code().to_string());
                if let Some(constraint) = db_err.constraint() {
                    out = out.with_constraint(constraint);
                }
                out
            }
            None => Self::new(err.to_string()),
        }
    }

    pub(crate) fn describe(&self) -> String {
        match &self.constraint {
            Some(constraint) => format!("{}: {}", constraint, self.message),
            None => self.message.clone(),
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.sqlstate, self.code) {
            (Some(state), Some(code)) => write!(f, "[{state}/{code}] {}", self.message),
            (Some(state), None) => write!(f, "[{state}] {}", self.message),
            (None, Some(code)) => write!(f, "[{code}] {}", self.message),
            (None, None) => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for DriverError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relation_not_found_message_names_table_and_relation() {
        let err = OrmError::relation_not_found("book", "publisher");
        assert_eq!(err.to_string(), "No reference found for $book->publisher");
        assert!(err.is_build_error());
    }

    #[test]
    fn driver_error_display() {
        let err = DriverError::new("Duplicate entry")
            .with_sqlstate("23000")
            .with_code(1062);
        assert_eq!(err.to_string(), "[23000/1062] Duplicate entry");
        assert_eq!(DriverError::new("boom").to_string(), "boom");
    }

    #[test]
    fn driver_error_describe_prefixes_constraint() {
        let err = DriverError::new("violates").with_constraint("users_email_key");
        assert_eq!(err.describe(), "users_email_key: violates");
    }
}
