//! Compile-only checks for the execution facade.

#![allow(dead_code)]

use chainsql::{
    args, Database, DatabaseConfig, GenericClient, MySqlErrorTranslator, OrmResult,
    PostgresDriver, StaticConventions, Value,
};
use std::sync::Arc;
use std::time::Duration;

fn database<C: GenericClient>(client: C) -> Database<C> {
    Database::new(
        client,
        Arc::new(PostgresDriver::new()),
        Arc::new(StaticConventions::new()),
    )
    .with_config(
        DatabaseConfig::new()
            .with_query_timeout(Duration::from_secs(5))
            .with_slow_query_threshold(Duration::from_millis(200)),
    )
}

async fn _fetch_and_count_compile(client: tokio_postgres::Client) -> OrmResult<()> {
    let db = database(client);
    let mut books = db.table("book");
    books.add_where("author.name", args!["Jakub"])?;

    let rows = db.fetch_all(&books).await?;
    let total = db.count(&books, None).await?;
    let newest: Option<chrono::DateTime<chrono::Utc>> =
        db.aggregate(&books, "MAX(published_at)").await?;
    let first = db.fetch_opt(&books).await?;
    let _ = (rows, total, newest, first);
    Ok(())
}

async fn _mutations_in_transaction_compile(client: &mut tokio_postgres::Client) -> OrmResult<()> {
    let tx = client.transaction().await?;
    {
        let db = database(&tx).with_translator(Arc::new(MySqlErrorTranslator));
        let book = db.table("book");
        db.insert(&book, Value::assignments([("title", "Dune")])).await?;

        let mut one = db.table("book");
        one.add_where_primary(1)?;
        db.update(&one, vec![("title".to_string(), Value::from("Dune Messiah"))])
            .await?;
        db.delete(&one).await?;
    }
    tx.commit().await?;
    Ok(())
}
