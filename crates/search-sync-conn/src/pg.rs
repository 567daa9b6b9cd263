//! Postgres access: pooled queries and server-side cursors.
//!
//! Every statement is wrapped in `row_to_json`, so rows arrive as JSON
//! objects ready to be enriched into documents. This also sidesteps 64-bit
//! integer and numeric columns being surfaced as strings: JSON numbers are
//! read as integers when they fit and floating point otherwise.

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Object, Pool, PoolConfig, RecyclingMethod, Runtime};
use serde_json::Value;
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row};
use tracing::{debug, info, warn};

use search_sync_types::Document;

use crate::error::ConnError;

const CURSOR_NAME: &str = "catchup_cursor";

/// Relational source the indexers read from.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run a read query and return every row as a document.
    async fn query(&self, sql: &str) -> Result<Vec<Document>, ConnError>;

    /// Run a point lookup whose single column is an id, bound to `$1`.
    ///
    /// Bind `$1` as `$1::bigint` in the statement.
    async fn query_ids(&self, sql: &str, id: i64) -> Result<Vec<i64>, ConnError>;

    /// Open a server-side cursor over `sql`.
    ///
    /// The cursor holds a dedicated connection until [`RowCursor::close`].
    async fn open_cursor(&self, sql: &str) -> Result<Box<dyn RowCursor>, ConnError>;
}

/// A streaming cursor over a query result.
#[async_trait]
pub trait RowCursor: Send {
    /// Read up to `max_rows` rows. An empty result means the cursor is exhausted.
    async fn read(&mut self, max_rows: usize) -> Result<Vec<Document>, ConnError>;

    /// Close the cursor and release its connection.
    async fn close(self: Box<Self>) -> Result<(), ConnError>;
}

/// Wrap a statement so each row comes back as a single JSON column.
pub fn json_select(sql: &str) -> String {
    format!("select row_to_json(q) from ({sql}) q")
}

fn row_to_document(row: &Row) -> Result<Document, ConnError> {
    let value: Value = row.try_get(0)?;
    match value {
        Value::Object(doc) => Ok(doc),
        other => Err(ConnError::Parse(format!(
            "expected a json object row, got {other}"
        ))),
    }
}

fn first_id(doc: &Document) -> Option<i64> {
    let value = doc.values().next()?;
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
}

/// Pooled Postgres database.
///
/// Built once at startup and shared by reference.
#[derive(Clone)]
pub struct PgDatabase {
    pool: Pool,
}

impl PgDatabase {
    /// Create the connection pool. Connections are opened lazily by the pool.
    pub fn connect(database_url: &str, pool_size: usize) -> Result<Self, ConnError> {
        if database_url.trim().is_empty() {
            return Err(ConnError::Config("database url is empty".to_string()));
        }

        info!(pool_size = pool_size, "creating database pool");
        let mut pg_config = Config::new();
        pg_config.url = Some(database_url.to_string());
        pg_config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        pg_config.pool = Some(PoolConfig::new(pool_size));

        let pool = pg_config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ConnError::Config(format!("pool creation failed: {e}")))?;

        Ok(Self { pool })
    }

    /// The underlying pool.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    async fn query_params(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Document>, ConnError> {
        let client = self.pool.get().await?;
        let rows = client.query(&json_select(sql), params).await?;
        rows.iter().map(row_to_document).collect()
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn query(&self, sql: &str) -> Result<Vec<Document>, ConnError> {
        self.query_params(sql, &[]).await
    }

    async fn query_ids(&self, sql: &str, id: i64) -> Result<Vec<i64>, ConnError> {
        let docs = self.query_params(sql, &[&id]).await?;
        Ok(docs.iter().filter_map(first_id).collect())
    }

    async fn open_cursor(&self, sql: &str) -> Result<Box<dyn RowCursor>, ConnError> {
        let client = self.pool.get().await?;
        let declare = format!(
            "BEGIN; DECLARE {CURSOR_NAME} NO SCROLL CURSOR FOR {}",
            json_select(sql)
        );
        if let Err(e) = client.batch_execute(&declare).await {
            // The connection may be inside an aborted transaction.
            drop(Object::take(client));
            return Err(e.into());
        }
        debug!("opened cursor");
        Ok(Box::new(PgCursor {
            client: Some(client),
        }))
    }
}

/// Server-side cursor bound to one pooled connection.
///
/// [`close`](RowCursor::close) commits and hands the connection back to the
/// pool. A cursor dropped without closing detaches its connection from the
/// pool instead, so a connection left mid-transaction is never reused.
pub struct PgCursor {
    client: Option<Object>,
}

#[async_trait]
impl RowCursor for PgCursor {
    async fn read(&mut self, max_rows: usize) -> Result<Vec<Document>, ConnError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| ConnError::Config("cursor already closed".to_string()))?;
        let rows = client
            .query(&format!("FETCH FORWARD {max_rows} FROM {CURSOR_NAME}"), &[])
            .await?;
        rows.iter().map(row_to_document).collect()
    }

    async fn close(self: Box<Self>) -> Result<(), ConnError> {
        let mut this = self;
        let Some(client) = this.client.take() else {
            return Ok(());
        };
        match client
            .batch_execute(&format!("CLOSE {CURSOR_NAME}; COMMIT"))
            .await
        {
            Ok(()) => {
                debug!("closed cursor");
                Ok(())
            }
            Err(e) => {
                drop(Object::take(client));
                Err(e.into())
            }
        }
    }
}

impl Drop for PgCursor {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            warn!("cursor dropped without close, discarding its connection");
            drop(Object::take(client));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_select_wraps_statement() {
        assert_eq!(
            json_select("select * from users where 1=1"),
            "select row_to_json(q) from (select * from users where 1=1) q"
        );
    }

    #[test]
    fn test_first_id_reads_widened_numbers() {
        let doc = json!({"track_id": 42.0}).as_object().cloned().unwrap();
        assert_eq!(first_id(&doc), Some(42));
        let doc = json!({"track_id": 7}).as_object().cloned().unwrap();
        assert_eq!(first_id(&doc), Some(7));
        let doc = json!({"track_id": null}).as_object().cloned().unwrap();
        assert_eq!(first_id(&doc), None);
    }

    #[test]
    fn test_empty_url_rejected() {
        assert!(matches!(
            PgDatabase::connect("", 4),
            Err(ConnError::Config(_))
        ));
    }
}
