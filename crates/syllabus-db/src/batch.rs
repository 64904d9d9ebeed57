//! # Batches
//!
//! Many statements, one round trip.
//!
//! ## Batch Upsert Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  records: [r1, r2, r3, r4, r5]                                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  validate all ── any fails? ──► Err(Validation), nothing sent           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  now = Utc::now()   (one instant for the whole call)                    │
//! │  stamp + queue r1..r5 ──► Batch [s1, s2, s3, s4, s5]                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  executor.send_batch(batch)                                             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  results.exec() × 5, in order                                           │
//! │    s1 ok(1)  s2 ok(1)  s3 Err ──► "batchResults.Exec: <cause>"          │
//! │                               (s4, s5 are never consulted)              │
//! │    any ok(0) ──► RowsAffected, distinct from executor errors            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Statements already executed are not undone here. On a bare pool the
//! batch runs inside one implicit transaction, like a pipelined batch; on a
//! [`PgTx`](crate::postgres::PgTx) rollback is the caller's decision.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::entity::{insert_sql, upsert_sql, Entity, Upsert};
use crate::error::{DbError, DbResult, ResultExt};
use crate::executor::{CommandTag, Executor};
use crate::value::{Row, SqlValue};

// =============================================================================
// Batch
// =============================================================================

/// One queued statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<SqlValue>,
}

/// Statements waiting to be sent together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    statements: Vec<Statement>,
}

impl Batch {
    pub fn new() -> Self {
        Batch::default()
    }

    /// Appends a statement; it runs after everything queued before it.
    pub fn queue(&mut self, sql: impl Into<String>, args: Vec<SqlValue>) {
        self.statements.push(Statement {
            sql: sql.into(),
            args,
        });
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn into_statements(self) -> Vec<Statement> {
        self.statements
    }
}

// =============================================================================
// BatchResults
// =============================================================================

/// What one statement produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementResult {
    pub tag: CommandTag,
    pub rows: Vec<Row>,
}

impl StatementResult {
    /// A write that touched `rows_affected` rows.
    pub fn affected(rows_affected: u64) -> Self {
        StatementResult {
            tag: CommandTag::new(rows_affected),
            rows: Vec::new(),
        }
    }

    /// A statement that returned `rows`.
    pub fn returning(rows: Vec<Row>) -> Self {
        StatementResult {
            tag: CommandTag::new(rows.len() as u64),
            rows,
        }
    }
}

/// Per-statement results, read once each in submission order.
#[derive(Debug)]
pub struct BatchResults {
    results: VecDeque<DbResult<StatementResult>>,
    queued: usize,
}

impl BatchResults {
    pub fn new(results: Vec<DbResult<StatementResult>>) -> Self {
        let queued = results.len();
        BatchResults {
            results: results.into(),
            queued,
        }
    }

    fn next_result(&mut self) -> DbResult<StatementResult> {
        self.results
            .pop_front()
            .unwrap_or(Err(DbError::BatchExhausted {
                queued: self.queued,
            }))
    }

    /// Result of the next statement as a command tag.
    pub fn exec(&mut self) -> DbResult<CommandTag> {
        self.next_result().map(|r| r.tag)
    }

    /// Rows of the next statement.
    pub fn query(&mut self) -> DbResult<Vec<Row>> {
        self.next_result().map(|r| r.rows)
    }

    /// First row of the next statement; none is [`DbError::NotFound`].
    pub fn query_row(&mut self) -> DbResult<Row> {
        self.query()?
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found("row", ""))
    }

    /// Results not yet read.
    pub fn remaining(&self) -> usize {
        self.results.len()
    }
}

// =============================================================================
// Queuing Helpers
// =============================================================================

fn validate_all<E: Entity>(records: &[E]) -> DbResult<()> {
    for record in records {
        record.validate()?;
    }
    Ok(())
}

fn queue_stamped<E: Entity + Clone>(
    batch: &mut Batch,
    records: &[E],
    sql: &str,
    now: DateTime<Utc>,
) -> Vec<E> {
    records
        .iter()
        .map(|record| {
            let mut stamped = record.clone();
            stamped.set_timestamps(now);
            batch.queue(sql, stamped.values());
            stamped
        })
        .collect()
}

/// Validates every record, then queues one upsert per record stamped with
/// `now`.
///
/// The caller's records are left untouched; the stamped copies come back
/// so they can be written back once the batch succeeded. A validation
/// failure returns before anything is queued.
pub fn queue_upserts<E: Entity + Clone>(
    batch: &mut Batch,
    records: &[E],
    upsert: &Upsert,
    now: DateTime<Utc>,
) -> DbResult<Vec<E>> {
    validate_all(records)?;
    let sql = upsert_sql::<E>(upsert)?;
    Ok(queue_stamped(batch, records, &sql, now))
}

/// Same as [`queue_upserts`] with a plain `INSERT`.
pub fn queue_inserts<E: Entity + Clone>(
    batch: &mut Batch,
    records: &[E],
    now: DateTime<Utc>,
) -> DbResult<Vec<E>> {
    validate_all(records)?;
    Ok(queue_stamped(batch, records, &insert_sql::<E>(), now))
}

/// Upserts `records` in one batch, each required to touch exactly one row.
///
/// Audit timestamps reach the caller's records only when every statement
/// succeeded.
pub async fn upsert_each<E: Entity + Clone>(
    db: &dyn Executor,
    records: &mut [E],
    upsert: &Upsert,
) -> DbResult<()> {
    let mut batch = Batch::new();
    let stamped = queue_upserts(&mut batch, records, upsert, Utc::now())?;
    exec_each(db, batch, "upsert", E::TABLE).await?;
    records.clone_from_slice(&stamped);
    Ok(())
}

/// Sends `batch` and requires every statement to touch exactly one row.
///
/// The first executor error fails the call as `batchResults.Exec: <cause>`;
/// a statement touching any other count fails it as
/// `cannot <action> <entity>`. Either way, later results are not read.
pub async fn exec_each(
    db: &dyn Executor,
    batch: Batch,
    action: &str,
    entity: &str,
) -> DbResult<()> {
    if batch.is_empty() {
        return Ok(());
    }

    let queued = batch.len();
    debug!(entity, queued, "Sending batch");

    let mut results = db.send_batch(batch).await;
    for _ in 0..queued {
        let tag = results.exec().context("batchResults.Exec")?;
        if tag.rows_affected() != 1 {
            return Err(DbError::rows_affected(action, entity, 1, tag.rows_affected()));
        }
    }
    Ok(())
}

/// Sends `batch` and reads each statement's result without a row-count
/// requirement, returning the total rows touched.
pub async fn exec_all(db: &dyn Executor, batch: Batch) -> DbResult<u64> {
    let queued = batch.len();
    let mut results = db.send_batch(batch).await;
    let mut total = 0;
    for _ in 0..queued {
        total += results.exec().context("batchResults.Exec")?.rows_affected();
    }
    Ok(total)
}

// =============================================================================
// Unit Tests
// =============================================================================
