//! # Postgres Executors
//!
//! [`Executor`] for a `PgPool` (each call auto-commits) and for [`PgTx`]
//! (everything runs inside one transaction the caller commits or rolls
//! back).
//!
//! ## Column Decoding
//! ```text
//! TEXT/VARCHAR/BPCHAR/NAME  → SqlValue::Text
//! INT2/INT4                 → SqlValue::Int4
//! INT8                      → SqlValue::Int8
//! FLOAT4/FLOAT8             → SqlValue::Float8
//! BOOL                      → SqlValue::Bool
//! TIMESTAMPTZ/TIMESTAMP     → SqlValue::Timestamptz (TIMESTAMP read as UTC)
//! JSON/JSONB                → SqlValue::Jsonb
//! TEXT[]/VARCHAR[]          → SqlValue::TextArray
//! ```
//! Anything else is a [`DbError::Decode`]; cast it in SQL first.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use futures_util::TryStreamExt;
use sqlx::postgres::{PgArguments, PgConnection, PgPool, PgRow};
use sqlx::types::Json;
use sqlx::{Column, Postgres, Row as _, Transaction, TypeInfo};
use tokio::sync::Mutex;
use tracing::debug;

use crate::batch::{Batch, BatchResults, StatementResult};
use crate::error::{DbError, DbResult};
use crate::executor::{CommandTag, Executor, Rows};
use crate::value::{Row, SqlValue};

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

// =============================================================================
// Binding & Decoding
// =============================================================================

fn bind_all(mut query: PgQuery<'_>, args: Vec<SqlValue>) -> PgQuery<'_> {
    for arg in args {
        query = match arg {
            SqlValue::Text(v) => query.bind(v),
            SqlValue::Int4(v) => query.bind(v),
            SqlValue::Int8(v) => query.bind(v),
            SqlValue::Float8(v) => query.bind(v),
            SqlValue::Bool(v) => query.bind(v),
            SqlValue::Timestamptz(v) => query.bind(v),
            SqlValue::Jsonb(v) => query.bind(v.map(Json)),
            SqlValue::TextArray(v) => query.bind(v),
        };
    }
    query
}

fn is_text_type(name: &str) -> bool {
    matches!(name, "TEXT" | "VARCHAR" | "BPCHAR" | "NAME")
}

fn decode_row(row: &PgRow) -> DbResult<Row> {
    let mut columns = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());

    for (i, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            name if is_text_type(name) => SqlValue::Text(row.try_get(i)?),
            // Postgres' one-byte "char" decodes as i8, not text
            "CHAR" => SqlValue::Int4(row.try_get::<Option<i8>, _>(i)?.map(i32::from)),
            "INT2" => SqlValue::Int4(row.try_get::<Option<i16>, _>(i)?.map(i32::from)),
            "INT4" => SqlValue::Int4(row.try_get(i)?),
            "INT8" => SqlValue::Int8(row.try_get(i)?),
            "FLOAT4" => SqlValue::Float8(row.try_get::<Option<f32>, _>(i)?.map(f64::from)),
            "FLOAT8" => SqlValue::Float8(row.try_get(i)?),
            "BOOL" => SqlValue::Bool(row.try_get(i)?),
            "TIMESTAMPTZ" => SqlValue::Timestamptz(row.try_get::<Option<DateTime<Utc>>, _>(i)?),
            "TIMESTAMP" => SqlValue::Timestamptz(
                row.try_get::<Option<NaiveDateTime>, _>(i)?
                    .map(|t| t.and_utc()),
            ),
            "JSON" | "JSONB" => SqlValue::Jsonb(
                row.try_get::<Option<Json<serde_json::Value>>, _>(i)?
                    .map(|j| j.0),
            ),
            "TEXT[]" | "VARCHAR[]" | "_TEXT" | "_VARCHAR" => SqlValue::TextArray(row.try_get(i)?),
            other => {
                return Err(DbError::Decode {
                    column: column.name().to_string(),
                    message: format!("unsupported column type {other}"),
                })
            }
        };
        columns.push(column.name().to_string());
        values.push(value);
    }

    Ok(Row::new(columns, values))
}

/// Whether the statement hands back rows (`SELECT`, `WITH`, `... RETURNING`).
fn returns_rows(sql: &str) -> bool {
    let mut words = sql.split_whitespace();
    let first = words.next().unwrap_or_default().to_ascii_uppercase();
    if first == "SELECT" || first == "WITH" {
        return true;
    }
    sql.split_whitespace()
        .any(|w| w.eq_ignore_ascii_case("RETURNING"))
}

// =============================================================================
// Statement Runners
// =============================================================================

async fn run_statement(
    conn: &mut PgConnection,
    sql: &str,
    args: Vec<SqlValue>,
) -> DbResult<StatementResult> {
    let query = bind_all(sqlx::query(sql), args);

    if returns_rows(sql) {
        let rows = query
            .fetch_all(&mut *conn)
            .await?
            .iter()
            .map(decode_row)
            .collect::<DbResult<Vec<_>>>()?;
        Ok(StatementResult::returning(rows))
    } else {
        let done = query.execute(&mut *conn).await?;
        Ok(StatementResult::affected(done.rows_affected()))
    }
}

async fn run_query(conn: &mut PgConnection, sql: &str, args: Vec<SqlValue>) -> DbResult<Rows> {
    let mut stream = bind_all(sqlx::query(sql), args).fetch(&mut *conn);
    let mut rows = Vec::new();

    loop {
        match stream.try_next().await {
            Ok(Some(row)) => rows.push(decode_row(&row)?),
            Ok(None) => return Ok(Rows::new(rows)),
            Err(err) if rows.is_empty() => return Err(err.into()),
            Err(err) => return Ok(Rows::with_error(rows, err.into())),
        }
    }
}

async fn run_batch(conn: &mut PgConnection, batch: Batch) -> Vec<DbResult<StatementResult>> {
    let mut results = Vec::with_capacity(batch.len());
    let mut failed = false;

    for (index, statement) in batch.into_statements().into_iter().enumerate() {
        if failed {
            results.push(Err(DbError::BatchAborted { index }));
            continue;
        }
        let result = run_statement(&mut *conn, &statement.sql, statement.args).await;
        failed = result.is_err();
        results.push(result);
    }

    results
}

fn all_failed(count: usize, err: &DbError) -> BatchResults {
    BatchResults::new(
        (0..count)
            .map(|_| Err(DbError::TransactionFailed(err.to_string())))
            .collect(),
    )
}

// =============================================================================
// PgPool
// =============================================================================

#[async_trait]
impl Executor for PgPool {
    async fn exec(&self, sql: &str, args: Vec<SqlValue>) -> DbResult<CommandTag> {
        let mut conn = self.acquire().await?;
        run_statement(&mut conn, sql, args).await.map(|r| r.tag)
    }

    async fn query(&self, sql: &str, args: Vec<SqlValue>) -> DbResult<Rows> {
        let mut conn = self.acquire().await?;
        run_query(&mut conn, sql, args).await
    }

    /// Runs the batch inside one implicit transaction: all statements
    /// commit together or none do.
    async fn send_batch(&self, batch: Batch) -> BatchResults {
        let count = batch.len();
        let mut tx = match self.begin().await {
            Ok(tx) => tx,
            Err(err) => return all_failed(count, &err.into()),
        };

        let results = run_batch(&mut tx, batch).await;

        if results.iter().any(Result::is_err) {
            // Dropping an open transaction rolls it back.
            drop(tx);
            return BatchResults::new(results);
        }

        match tx.commit().await {
            Ok(()) => {
                debug!(count, "Batch committed");
                BatchResults::new(results)
            }
            Err(err) => all_failed(count, &err.into()),
        }
    }
}

// =============================================================================
// PgTx
// =============================================================================

/// A transaction usable as an [`Executor`].
///
/// ## Usage
/// ```rust,ignore
/// let tx = db.begin().await?;
/// let topic = TopicRepository.retrieve_by_id(&tx, "topic-1", &[for_update]).await?;
/// TopicRepository.update_total_los(&tx, &topic.topic_id, 12).await?;
/// tx.commit().await?;
/// ```
pub struct PgTx {
    tx: Mutex<Transaction<'static, Postgres>>,
}

impl PgTx {
    /// Opens a transaction on `pool`.
    pub async fn begin(pool: &PgPool) -> DbResult<Self> {
        let tx = pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;
        Ok(PgTx { tx: Mutex::new(tx) })
    }

    pub async fn commit(self) -> DbResult<()> {
        self.tx
            .into_inner()
            .commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))
    }

    pub async fn rollback(self) -> DbResult<()> {
        self.tx
            .into_inner()
            .rollback()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))
    }
}

impl std::fmt::Debug for PgTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgTx").finish_non_exhaustive()
    }
}

#[async_trait]
impl Executor for PgTx {
    async fn exec(&self, sql: &str, args: Vec<SqlValue>) -> DbResult<CommandTag> {
        let mut tx = self.tx.lock().await;
        run_statement(&mut tx, sql, args).await.map(|r| r.tag)
    }

    async fn query(&self, sql: &str, args: Vec<SqlValue>) -> DbResult<Rows> {
        let mut tx = self.tx.lock().await;
        run_query(&mut tx, sql, args).await
    }

    /// Runs the batch inside the open transaction; a failure leaves the
    /// transaction aborted until the caller rolls it back.
    async fn send_batch(&self, batch: Batch) -> BatchResults {
        let mut tx = self.tx.lock().await;
        BatchResults::new(run_batch(&mut tx, batch).await)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_returns_rows() {
        assert!(returns_rows("SELECT 1"));
        assert!(returns_rows("  with x AS (SELECT 1) SELECT * FROM x"));
        assert!(returns_rows(
            "INSERT INTO quizzes (quiz_id) VALUES ($1) ON CONFLICT DO NOTHING RETURNING quiz_id"
        ));
        assert!(!returns_rows("UPDATE topics SET total_los = $1 WHERE topic_id = $2"));
        assert!(!returns_rows("DELETE FROM student_topic_overdue WHERE student_id = $1"));
    }

    #[test]
    fn test_text_types() {
        for name in ["TEXT", "VARCHAR", "BPCHAR", "NAME"] {
            assert!(is_text_type(name), "{name}");
        }
        assert!(!is_text_type("CHAR"));
        assert!(!is_text_type("INT2"));
    }
}
