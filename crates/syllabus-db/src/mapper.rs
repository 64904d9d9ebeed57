//! # Result Mapper
//!
//! Turns [`Rows`] into records.
//!
//! ```text
//! executor.query(sql, args) ──► Rows ──► scan_all::<Topic>() ──► Vec<Topic>
//!                                          │
//!                                          ├── scan error on row k  → Err, rows k+1.. unread
//!                                          └── cursor error at end  → Err (after the last row)
//! ```
//!
//! Zero rows is an empty `Vec`, never an error. The single-row path
//! ([`find_one`]) is the only place "nothing matched" becomes
//! [`DbError::NotFound`].

use std::collections::HashMap;
use std::hash::Hash;

use crate::entity::Entity;
use crate::error::{DbError, DbResult};
use crate::executor::{Executor, Rows};
use crate::value::{FromSqlValue, Row, SqlValue};

/// Scans one row into `E`.
pub fn scan_one<E: Entity>(row: &Row) -> DbResult<E> {
    E::from_row(row)
}

/// Scans every row into `E`.
///
/// The first scan failure aborts the whole read; a cursor failure reported
/// after the last row fails it too.
pub fn scan_all<E: Entity>(mut rows: Rows) -> DbResult<Vec<E>> {
    let mut records = Vec::new();
    for row in rows.by_ref() {
        records.push(E::from_row(&row)?);
    }
    rows.finish()?;
    Ok(records)
}

/// Reads a single column out of every row.
pub fn scan_column<T: FromSqlValue>(mut rows: Rows, column: &str) -> DbResult<Vec<T>> {
    let mut values = Vec::new();
    for row in rows.by_ref() {
        values.push(row.get(column)?);
    }
    rows.finish()?;
    Ok(values)
}

/// Runs `sql` and scans every row into `E`.
pub async fn find_all<E: Entity>(
    db: &dyn Executor,
    sql: &str,
    args: Vec<SqlValue>,
) -> DbResult<Vec<E>> {
    scan_all(db.query(sql, args).await?)
}

/// Runs `sql` expecting one row.
///
/// Zero rows is reported as `<E::TABLE> not found: <key>`.
pub async fn find_one<E: Entity>(
    db: &dyn Executor,
    sql: &str,
    args: Vec<SqlValue>,
    key: &str,
) -> DbResult<E> {
    match db.query_row(sql, args).await {
        Ok(row) => E::from_row(&row),
        Err(DbError::NotFound { .. }) => Err(DbError::not_found(E::TABLE, key)),
        Err(err) => Err(err),
    }
}

/// Groups records by a key, keeping each group's original order.
pub fn group_by<K, V, F>(records: Vec<V>, key: F) -> HashMap<K, Vec<V>>
where
    K: Eq + Hash,
    F: Fn(&V) -> K,
{
    let mut groups: HashMap<K, Vec<V>> = HashMap::new();
    for record in records {
        groups.entry(key(&record)).or_default().push(record);
    }
    groups
}

/// Indexes records by a unique key; a later duplicate replaces an earlier one.
pub fn index_by<K, V, F>(records: Vec<V>, key: F) -> HashMap<K, V>
where
    K: Eq + Hash,
    F: Fn(&V) -> K,
{
    records.into_iter().map(|r| (key(&r), r)).collect()
}

// =============================================================================
// Unit Tests
// =============================================================================
