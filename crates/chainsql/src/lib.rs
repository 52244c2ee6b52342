//! # chainsql
//!
//! A SQL builder that follows table relationships written inside SQL
//! fragments.
//!
//! ## Features
//!
//! - **Relationship chains**: `author.name` and `:book.title` become `LEFT JOIN`s
//!   resolved through pluggable naming conventions
//! - **Operator-aware binding**: `NULL`, lists, empty lists and sub-queries are
//!   rewritten into valid SQL
//! - **Dialects**: MySQL, PostgreSQL and SQLite quoting and limits
//! - **External tables**: configured tables are addressed as `database.table`
//! - **Typed driver errors**: unique / foreign key / check violations
//!
//! ## Example
//!
//! ```ignore
//! use chainsql::{args, MySqlDriver, SqlBuilder, StaticConventions};
//! use std::sync::Arc;
//!
//! let mut books = SqlBuilder::new(
//!     "book",
//!     Arc::new(MySqlDriver::new()),
//!     Arc::new(StaticConventions::new()),
//! );
//! books.add_where("author.name", args!["Jakub"])?;
//! books.add_order("title");
//!
//! assert_eq!(
//!     books.build_select_query(None)?,
//!     "SELECT `book`.* FROM `book` LEFT JOIN `author` ON `book`.`author_id` = `author`.`id` \
//!      WHERE (`author`.`name` = ?) ORDER BY `title`"
//! );
//! ```

pub mod builder;
pub mod client;
pub mod conventions;
pub mod database;
pub mod driver;
pub mod error;
pub mod external;
pub mod preprocess;
pub mod translate;
pub mod value;

pub use builder::{BuiltQuery, ClauseKind, IndexNames, SqlBuilder};
pub use client::GenericClient;
pub use conventions::{
    Conventions, PrimaryKey, Reference, SchemaConventions, StaticConventions, TableDef,
};
pub use database::{Database, DatabaseConfig, QueryType};
pub use driver::{Driver, Feature, MySqlDriver, PlaceholderStyle, PostgresDriver, SqliteDriver};
pub use error::{DriverError, OrmError, OrmResult};
pub use external::{ExternalDatabase, ExternalTables, ExternalTablesConfig};
pub use preprocess::Preprocessor;
pub use translate::{
    ErrorTranslator, MySqlErrorTranslator, PassthroughTranslator, PostgresErrorTranslator,
};
pub use value::{Arg, RowSource, SqlLiteral, SubQuery, Value};
