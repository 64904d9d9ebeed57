//! # Entity Field Map
//!
//! Each record type declares its table, its column list and how to move
//! between a record and a row. The same `FIELDS` list drives
//! `SELECT`, `INSERT` and the scan back into the record, so insert and
//! select stay column-for-column symmetric.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      One Mapping, Three Uses                            │
//! │                                                                         │
//! │   Topic::FIELDS = [topic_id, name, country, ...]                        │
//! │        │                                                                │
//! │        ├──► SELECT topic_id,name,country,... FROM topics                │
//! │        ├──► INSERT INTO topics (topic_id,name,...) VALUES ($1,$2,...)   │
//! │        └──► Topic::from_row(&row)  reads the same names back            │
//! │                                                                         │
//! │   topic.values() yields arguments in exactly FIELDS order               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The mappings themselves live next to each repository.

use chrono::{DateTime, Utc};
use syllabus_core::ValidationError;

use crate::error::{DbError, DbResult};
use crate::value::{Row, SqlValue};

// =============================================================================
// Entity Trait
// =============================================================================

/// A record stored one-per-row in a single table.
pub trait Entity: Sized + Send + Sync {
    /// Table the record is stored in.
    const TABLE: &'static str;

    /// Column names, in the order [`Entity::values`] produces them.
    const FIELDS: &'static [&'static str];

    /// Primary-key columns. Never updated by an upsert.
    const PRIMARY_KEY: &'static [&'static str];

    /// Argument values in `FIELDS` order.
    fn values(&self) -> Vec<SqlValue>;

    /// Scans a row selected with [`columns`] back into a record.
    fn from_row(row: &Row) -> DbResult<Self>;

    /// Stamps the audit columns before the record is queued.
    fn set_timestamps(&mut self, now: DateTime<Utc>);

    /// Precondition checked before the record is queued.
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }

    fn table_name() -> &'static str {
        Self::TABLE
    }

    /// Column names with their matching values.
    fn field_map(&self) -> (&'static [&'static str], Vec<SqlValue>) {
        (Self::FIELDS, self.values())
    }
}

// =============================================================================
// Column & Statement Helpers
// =============================================================================

/// `col1,col2,...` for the entity.
pub fn columns<E: Entity>() -> String {
    E::FIELDS.join(",")
}

/// `alias.col1,alias.col2,...` for joins.
pub fn prefixed_columns<E: Entity>(alias: &str) -> String {
    E::FIELDS
        .iter()
        .map(|f| format!("{alias}.{f}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// `$start,$start+1,...` for `count` placeholders.
pub fn placeholders_from(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("${i}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// `$1,$2,...,$count`.
pub fn placeholders(count: usize) -> String {
    placeholders_from(1, count)
}

/// `INSERT INTO <table> (<fields>) VALUES ($1..$n)`.
pub fn insert_sql<E: Entity>() -> String {
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        E::TABLE,
        columns::<E>(),
        placeholders(E::FIELDS.len())
    )
}

/// What an upsert collides on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conflict {
    /// `ON CONFLICT ON CONSTRAINT <name>`
    Constraint(&'static str),
    /// `ON CONFLICT (<col>, ...)`
    Columns(&'static [&'static str]),
}

/// Conflict policy for one entity's upsert.
///
/// `update` is the bounded set of columns overwritten on conflict; it may
/// never include a primary-key column or `created_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upsert {
    pub conflict: Conflict,
    pub update: &'static [&'static str],
}

impl Upsert {
    /// Checks `update` against the entity's columns.
    pub fn check<E: Entity>(&self) -> DbResult<()> {
        for column in self.update {
            if *column == "created_at" || E::PRIMARY_KEY.contains(column) {
                return Err(DbError::Internal(format!(
                    "upsert on {} must not update {}",
                    E::TABLE,
                    column
                )));
            }
            if !E::FIELDS.contains(column) {
                return Err(DbError::Internal(format!(
                    "upsert on {} names unknown column {}",
                    E::TABLE,
                    column
                )));
            }
        }
        if let Conflict::Columns(cols) = self.conflict {
            if let Some(column) = cols.iter().find(|c| self.update.contains(*c)) {
                return Err(DbError::Internal(format!(
                    "upsert on {} must not update conflict column {}",
                    E::TABLE,
                    column
                )));
            }
        }
        Ok(())
    }
}

/// `INSERT ... ON CONFLICT ... DO UPDATE SET col = EXCLUDED.col, ...`.
///
/// An empty `update` list produces `DO NOTHING`, which makes a conflicting
/// row report zero affected rows.
pub fn upsert_sql<E: Entity>(upsert: &Upsert) -> DbResult<String> {
    upsert.check::<E>()?;

    let target = match upsert.conflict {
        Conflict::Constraint(name) => format!("ON CONSTRAINT {name}"),
        Conflict::Columns(cols) => format!("({})", cols.join(", ")),
    };

    let action = if upsert.update.is_empty() {
        "DO NOTHING".to_string()
    } else {
        let set = upsert
            .update
            .iter()
            .map(|c| format!("{c} = EXCLUDED.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("DO UPDATE SET {set}")
    };

    Ok(format!("{} ON CONFLICT {} {}", insert_sql::<E>(), target, action))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Tag {
        tag_id: String,
        label: String,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    }

    impl Entity for Tag {
        const TABLE: &'static str = "tags";
        const FIELDS: &'static [&'static str] = &["tag_id", "label", "created_at", "updated_at"];
        const PRIMARY_KEY: &'static [&'static str] = &["tag_id"];

        fn values(&self) -> Vec<SqlValue> {
            vec![
                self.tag_id.as_str().into(),
                self.label.as_str().into(),
                self.created_at.into(),
                self.updated_at.into(),
            ]
        }

        fn from_row(row: &Row) -> DbResult<Self> {
            Ok(Tag {
                tag_id: row.get("tag_id")?,
                label: row.get("label")?,
                created_at: row.get("created_at")?,
                updated_at: row.get("updated_at")?,
            })
        }

        fn set_timestamps(&mut self, now: DateTime<Utc>) {
            self.created_at = now;
            self.updated_at = now;
        }
    }

    #[test]
    fn test_column_helpers() {
        assert_eq!(columns::<Tag>(), "tag_id,label,created_at,updated_at");
        assert_eq!(
            prefixed_columns::<Tag>("t"),
            "t.tag_id,t.label,t.created_at,t.updated_at"
        );
        assert_eq!(placeholders(3), "$1,$2,$3");
        assert_eq!(placeholders_from(4, 2), "$4,$5");
        assert_eq!(Tag::table_name(), "tags");
    }

    #[test]
    fn test_insert_sql() {
        assert_eq!(
            insert_sql::<Tag>(),
            "INSERT INTO tags (tag_id,label,created_at,updated_at) VALUES ($1,$2,$3,$4)"
        );
    }

    #[test]
    fn test_upsert_sql_updates_bounded_columns() {
        let upsert = Upsert {
            conflict: Conflict::Constraint("tags_pk"),
            update: &["label", "updated_at"],
        };
        let sql = upsert_sql::<Tag>(&upsert).unwrap();
        assert!(sql.ends_with(
            "ON CONFLICT ON CONSTRAINT tags_pk DO UPDATE SET label = EXCLUDED.label, updated_at = EXCLUDED.updated_at"
        ));
    }

    #[test]
    fn test_upsert_rejects_key_and_created_at() {
        let pk = Upsert {
            conflict: Conflict::Constraint("tags_pk"),
            update: &["tag_id"],
        };
        assert!(upsert_sql::<Tag>(&pk).is_err());

        let created = Upsert {
            conflict: Conflict::Columns(&["label"]),
            update: &["created_at"],
        };
        assert!(upsert_sql::<Tag>(&created).is_err());

        let conflict_col = Upsert {
            conflict: Conflict::Columns(&["label"]),
            update: &["label"],
        };
        assert!(upsert_sql::<Tag>(&conflict_col).is_err());

        let unknown = Upsert {
            conflict: Conflict::Columns(&["label"]),
            update: &["color"],
        };
        assert!(upsert_sql::<Tag>(&unknown).is_err());
    }

    #[test]
    fn test_upsert_without_update_does_nothing() {
        let upsert = Upsert {
            conflict: Conflict::Columns(&["tag_id"]),
            update: &[],
        };
        assert!(upsert_sql::<Tag>(&upsert)
            .unwrap()
            .ends_with("ON CONFLICT (tag_id) DO NOTHING"));
    }
}
