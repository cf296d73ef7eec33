//! Asynchronous query execution.
//!
//! [`QueryExecutor`] is the seam between compilation and the database: it
//! takes an unexecuted [`CompiledQuery`] and returns rows as JSON objects
//! plus an optional exact count. The SQLite implementation binds statements
//! through sea-query-binder and decodes rows column by column.

use async_trait::async_trait;
use sea_query::SqliteQueryBuilder;
use sea_query_binder::SqlxBinder;
use serde_json::Value as Json;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, SqlitePool, TypeInfo};
use thiserror::Error;

use crate::compiler::CompiledQuery;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecuteError {
    /// Database error, with the driver's message carried verbatim.
    #[error("{0}")]
    Database(String),
}

/// Rows and optional count returned by an executor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    pub rows: Vec<Json>,
    pub count: Option<u64>,
}

/// Executes compiled queries against some relational store.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn fetch(&self, query: &CompiledQuery) -> Result<QueryOutput, ExecuteError>;
}

/// SQLite-backed executor over an sqlx pool.
pub struct SqlxExecutor {
    pool: SqlitePool,
}

impl SqlxExecutor {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueryExecutor for SqlxExecutor {
    async fn fetch(&self, query: &CompiledQuery) -> Result<QueryOutput, ExecuteError> {
        let (sql, values) = query.select.build_sqlx(SqliteQueryBuilder);
        tracing::debug!(%sql, "executing filter query");
        let rows = sqlx::query_with(&sql, values)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        let rows = rows.iter().map(row_to_json).collect();

        let count = match &query.count {
            Some(stmt) => {
                let (sql, values) = stmt.build_sqlx(SqliteQueryBuilder);
                tracing::debug!(%sql, "executing count query");
                let row = sqlx::query_with(&sql, values)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(db_error)?;
                let count: i64 = row.try_get(0).map_err(db_error)?;
                Some(count.max(0) as u64)
            }
            None => None,
        };

        Ok(QueryOutput { rows, count })
    }
}

fn db_error(err: sqlx::Error) -> ExecuteError {
    let message = err.to_string();
    if message.is_empty() {
        ExecuteError::Database("query execution failed".to_string())
    } else {
        ExecuteError::Database(message)
    }
}

/// Decode a row into a JSON object keyed by column name. SQLite's dynamic
/// typing makes the declared type advisory, so decoding falls back to text.
fn row_to_json(row: &SqliteRow) -> Json {
    let mut object = serde_json::Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "INTEGER" | "INT" | "INT4" | "INT8" | "BIGINT" => row
                .try_get::<Option<i64>, _>(index)
                .ok()
                .flatten()
                .map(Json::from),
            "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => row
                .try_get::<Option<f64>, _>(index)
                .ok()
                .flatten()
                .map(Json::from),
            "BOOLEAN" | "BOOL" => row
                .try_get::<Option<bool>, _>(index)
                .ok()
                .flatten()
                .map(Json::from),
            _ => row
                .try_get::<Option<String>, _>(index)
                .ok()
                .flatten()
                .map(Json::from),
        };
        object.insert(column.name().to_string(), value.unwrap_or(Json::Null));
    }
    Json::Object(object)
}
