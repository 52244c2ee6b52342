//! Execution facade: builds, expands, logs, times and runs statements.
//!
//! ```ignore
//! let db = Database::new(client, Arc::new(PostgresDriver::new()), Arc::new(conventions))
//!     .with_config(DatabaseConfig::new().with_query_timeout(Duration::from_secs(5)));
//!
//! let mut books = db.table("book");
//! books.add_where("author.name", args!["Jakub"])?;
//! let rows = db.fetch_all(&books).await?;
//! ```

use crate::builder::{BuiltQuery, SqlBuilder};
use crate::client::GenericClient;
use crate::conventions::Conventions;
use crate::driver::Driver;
use crate::error::{OrmError, OrmResult};
use crate::preprocess::Preprocessor;
use crate::translate::{ErrorTranslator, PostgresErrorTranslator};
use crate::value::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_postgres::Row;
use tokio_postgres::types::FromSql;

/// Timeouts and logging for a [`Database`].
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Query timeout duration. `None` means no timeout (default).
    pub query_timeout: Option<Duration>,
    /// Statements slower than this are logged at `warn`.
    pub slow_query_threshold: Option<Duration>,
    /// Maximum logged SQL length in bytes. `None` logs the full statement.
    pub max_logged_sql: Option<usize>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            query_timeout: None,
            slow_query_threshold: None,
            max_logged_sql: Some(200),
        }
    }
}

impl DatabaseConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queries exceeding this duration return [`OrmError::Timeout`].
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    pub fn with_slow_query_threshold(mut self, threshold: Duration) -> Self {
        self.slow_query_threshold = Some(threshold);
        self
    }

    pub fn with_max_logged_sql(mut self, len: usize) -> Self {
        self.max_logged_sql = Some(len);
        self
    }

    pub fn no_truncate(mut self) -> Self {
        self.max_logged_sql = None;
        self
    }
}

/// Statement kind, as logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Select,
    Insert,
    Update,
    Delete,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Select => "select",
            QueryType::Insert => "insert",
            QueryType::Update => "update",
            QueryType::Delete => "delete",
        }
    }
}

pub(crate) fn truncate_sql_bytes(sql: &str, max_bytes: usize) -> &str {
    if sql.len() <= max_bytes {
        return sql;
    }
    let mut end = max_bytes;
    while end > 0 && !sql.is_char_boundary(end) {
        end -= 1;
    }
    &sql[..end]
}

/// A client bundled with the dialect, conventions and error translation
/// used to build and run statements.
pub struct Database<C> {
    client: C,
    driver: Arc<dyn Driver>,
    conventions: Arc<dyn Conventions>,
    translator: Arc<dyn ErrorTranslator>,
    config: DatabaseConfig,
}

impl<C: GenericClient> Database<C> {
    /// Uses [`PostgresErrorTranslator`] until another translator is set.
    pub fn new(client: C, driver: Arc<dyn Driver>, conventions: Arc<dyn Conventions>) -> Self {
        Self {
            client,
            driver,
            conventions,
            translator: Arc::new(PostgresErrorTranslator),
            config: DatabaseConfig::default(),
        }
    }

    pub fn with_translator(mut self, translator: Arc<dyn ErrorTranslator>) -> Self {
        self.translator = translator;
        self
    }

    pub fn with_config(mut self, config: DatabaseConfig) -> Self {
        self.config = config;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// A new builder for `table` sharing this database's driver and conventions.
    pub fn table(&self, table: impl Into<String>) -> SqlBuilder {
        SqlBuilder::new(table, Arc::clone(&self.driver), Arc::clone(&self.conventions))
    }

    /// Expand builder SQL for the builder's driver.
    pub fn prepare(
        &self,
        builder: &SqlBuilder,
        sql: &str,
        params: Vec<Value>,
    ) -> OrmResult<BuiltQuery> {
        Preprocessor::new(builder.driver().as_ref()).process(sql, params)
    }

    fn prepare_select(&self, builder: &SqlBuilder) -> OrmResult<BuiltQuery> {
        let built = builder.build_select(None)?;
        self.prepare(builder, &built.sql, built.params)
    }

    pub async fn fetch_all(&self, builder: &SqlBuilder) -> OrmResult<Vec<Row>> {
        let query = self.prepare_select(builder)?;
        let params = query.params_ref();
        self.observe(
            QueryType::Select,
            &query.sql,
            params.len(),
            self.client.query(&query.sql, &params),
        )
        .await
    }

    /// First row; [`OrmError::NotFound`] when there is none.
    pub async fn fetch_one(&self, builder: &SqlBuilder) -> OrmResult<Row> {
        let query = self.prepare_select(builder)?;
        let params = query.params_ref();
        self.observe(
            QueryType::Select,
            &query.sql,
            params.len(),
            self.client.query_one(&query.sql, &params),
        )
        .await
    }

    pub async fn fetch_opt(&self, builder: &SqlBuilder) -> OrmResult<Option<Row>> {
        let query = self.prepare_select(builder)?;
        let params = query.params_ref();
        self.observe(
            QueryType::Select,
            &query.sql,
            params.len(),
            self.client.query_opt(&query.sql, &params),
        )
        .await
    }

    /// Run `function` (e.g. `MAX(price)`) over the builder's conditions.
    pub async fn aggregate<T>(&self, builder: &SqlBuilder, function: &str) -> OrmResult<T>
    where
        T: for<'a> FromSql<'a>,
    {
        let aggregate = builder.aggregate(function)?;
        let row = self.fetch_one(&aggregate).await?;
        Ok(row.try_get(0)?)
    }

    /// `COUNT(column)`, or `COUNT(*)` without a column.
    pub async fn count(&self, builder: &SqlBuilder, column: Option<&str>) -> OrmResult<i64> {
        let function = format!("COUNT({})", column.unwrap_or("*"));
        self.aggregate(builder, &function).await
    }

    /// Insert one row ([`Value::Assignments`]) or several (a list of them).
    pub async fn insert(&self, builder: &SqlBuilder, data: Value) -> OrmResult<u64> {
        let sql = format!("{} ?", builder.build_insert_query());
        let query = self.prepare(builder, &sql, vec![data])?;
        self.execute(QueryType::Insert, &query).await
    }

    /// Returns 0 without touching the database when `data` is empty.
    pub async fn update(&self, builder: &SqlBuilder, data: Vec<(String, Value)>) -> OrmResult<u64> {
        if data.is_empty() {
            return Ok(0);
        }
        let sql = builder.build_update_query()?;
        let mut params = Vec::with_capacity(1 + builder.get_where_parameters().len());
        params.push(Value::Assignments(data));
        params.extend(builder.get_where_parameters().iter().cloned());
        let query = self.prepare(builder, &sql, params)?;
        self.execute(QueryType::Update, &query).await
    }

    pub async fn delete(&self, builder: &SqlBuilder) -> OrmResult<u64> {
        let sql = builder.build_delete_query()?;
        let query = self.prepare(builder, &sql, builder.get_where_parameters().to_vec())?;
        self.execute(QueryType::Delete, &query).await
    }

    async fn execute(&self, query_type: QueryType, query: &BuiltQuery) -> OrmResult<u64> {
        let params = query.params_ref();
        self.observe(
            query_type,
            &query.sql,
            params.len(),
            self.client.execute(&query.sql, &params),
        )
        .await
    }

    fn logged_sql<'s>(&self, sql: &'s str) -> std::borrow::Cow<'s, str> {
        match self.config.max_logged_sql {
            Some(max) if sql.len() > max => format!("{}...", truncate_sql_bytes(sql, max)).into(),
            _ => sql.into(),
        }
    }

    /// Log, time out and translate one statement.
    async fn observe<T, F>(
        &self,
        query_type: QueryType,
        sql: &str,
        param_count: usize,
        future: F,
    ) -> OrmResult<T>
    where
        F: std::future::Future<Output = OrmResult<T>> + Send,
    {
        let logged = self.logged_sql(sql);
        tracing::debug!(
            target: "chainsql.sql",
            query_type = query_type.as_str(),
            param_count,
            sql = %logged,
        );

        let start = Instant::now();
        let result = match self.config.query_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, future).await {
                Ok(result) => result,
                Err(_) => Err(OrmError::Timeout(timeout)),
            },
            None => future.await,
        };
        let elapsed = start.elapsed();

        if let Some(threshold) = self.config.slow_query_threshold {
            if elapsed > threshold {
                tracing::warn!(
                    target: "chainsql.slow",
                    query_type = query_type.as_str(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    sql = %logged,
                    "slow query"
                );
            }
        }

        result.map_err(|err| self.translate(err))
    }

    fn translate(&self, err: OrmError) -> OrmError {
        match err {
            OrmError::Driver(raw) => {
                let translated = self.translator.translate(raw);
                tracing::debug!(target: "chainsql.error", error = %translated, "statement failed");
                translated
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = DatabaseConfig::new();
        assert_eq!(config.query_timeout, None);
        assert_eq!(config.slow_query_threshold, None);
        assert_eq!(config.max_logged_sql, Some(200));

        let config = DatabaseConfig::new()
            .with_query_timeout(Duration::from_secs(5))
            .with_slow_query_threshold(Duration::from_millis(100))
            .no_truncate();
        assert_eq!(config.query_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.slow_query_threshold, Some(Duration::from_millis(100)));
        assert_eq!(config.max_logged_sql, None);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_sql_bytes("SELECT 1", 100), "SELECT 1");
        assert_eq!(truncate_sql_bytes("SELECT 1", 6), "SELECT");
        // 'é' is two bytes; cutting inside it backs off.
        assert_eq!(truncate_sql_bytes("né", 2), "n");
    }

    #[test]
    fn query_type_names() {
        assert_eq!(QueryType::Select.as_str(), "select");
        assert_eq!(QueryType::Delete.as_str(), "delete");
    }
}
