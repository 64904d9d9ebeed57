//! # Executor Interface
//!
//! The four primitives every repository is written against. Repositories
//! never own a connection: the caller hands in whichever executor the
//! operation should run on (the pool, a transaction, or a test double).
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Executor Implementations                         │
//! │                                                                         │
//! │                    ┌──────────────────────────┐                         │
//! │   Repository ────► │   dyn Executor           │                         │
//! │                    │   exec / query /         │                         │
//! │                    │   query_row / send_batch │                         │
//! │                    └────────────┬─────────────┘                         │
//! │             ┌───────────────────┼────────────────────┐                  │
//! │             ▼                   ▼                    ▼                  │
//! │        ┌─────────┐        ┌───────────┐       ┌──────────────┐          │
//! │        │ PgPool  │        │   PgTx    │       │ MockExecutor │          │
//! │        │ (auto-  │        │ (caller   │       │ (tests)      │          │
//! │        │ commit) │        │ commits)  │       │              │          │
//! │        └─────────┘        └───────────┘       └──────────────┘          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Dropping a returned future cancels the call on the executor; nothing in
//! this layer spawns work of its own.

use async_trait::async_trait;

use crate::batch::{Batch, BatchResults};
use crate::error::{DbError, DbResult};
use crate::value::{Row, SqlValue};

// =============================================================================
// CommandTag
// =============================================================================

/// Outcome of a statement that doesn't return rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandTag {
    rows_affected: u64,
}

impl CommandTag {
    pub fn new(rows_affected: u64) -> Self {
        CommandTag { rows_affected }
    }

    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }
}

// =============================================================================
// Rows
// =============================================================================

/// Rows returned by [`Executor::query`].
///
/// Iterating yields each row in order. A cursor failure that happened after
/// some rows were already read is held back and reported by
/// [`Rows::finish`], so it can't be lost by a caller that stops at the last
/// row.
#[derive(Debug)]
pub struct Rows {
    rows: std::vec::IntoIter<Row>,
    error: Option<DbError>,
}

impl Rows {
    pub fn new(rows: Vec<Row>) -> Self {
        Rows {
            rows: rows.into_iter(),
            error: None,
        }
    }

    /// Rows followed by a cursor failure.
    pub fn with_error(rows: Vec<Row>, error: DbError) -> Self {
        Rows {
            rows: rows.into_iter(),
            error: Some(error),
        }
    }

    /// Reports the cursor failure, if one occurred.
    pub fn finish(self) -> DbResult<()> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Iterator for Rows {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        self.rows.next()
    }
}

// =============================================================================
// Executor
// =============================================================================

/// Runs statements against Postgres (or something that behaves like it).
#[async_trait]
pub trait Executor: Send + Sync {
    /// Runs a statement and reports how many rows it touched.
    async fn exec(&self, sql: &str, args: Vec<SqlValue>) -> DbResult<CommandTag>;

    /// Runs a query and returns its rows.
    async fn query(&self, sql: &str, args: Vec<SqlValue>) -> DbResult<Rows>;

    /// Runs a query expected to match one row.
    ///
    /// Zero rows is [`DbError::NotFound`]; rows past the first are ignored.
    async fn query_row(&self, sql: &str, args: Vec<SqlValue>) -> DbResult<Row> {
        let mut rows = self.query(sql, args).await?;
        match rows.next() {
            Some(row) => Ok(row),
            None => {
                rows.finish()?;
                Err(DbError::not_found("row", ""))
            }
        }
    }

    /// Sends every queued statement in one round trip.
    ///
    /// Results come back in submission order and must be read through
    /// [`BatchResults`]; errors surface per statement, not here.
    async fn send_batch(&self, batch: Batch) -> BatchResults;
}

// =============================================================================
// Unit Tests
// =============================================================================
