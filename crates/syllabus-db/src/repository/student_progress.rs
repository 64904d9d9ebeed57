//! # Student Progress Repositories
//!
//! Per-student, per-topic progress. Both tables are keyed by
//! `(student_id, topic_id)`.
//!
//! Overdue markers are hard-deleted once they stop applying, so
//! `student_topic_overdue` has no `deleted_at` and its reads carry no
//! soft-delete filter.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use syllabus_core::validation::validate_id;
use syllabus_core::{StudentTopicCompleteness, StudentTopicOverdue, ValidationError};

use crate::batch::upsert_each;
use crate::entity::{Conflict, Entity, Upsert};
use crate::error::DbResult;
use crate::executor::Executor;
use crate::mapper::{find_all, group_by};
use crate::query::QueryBuilder;
use crate::value::{Row, SqlValue};

impl Entity for StudentTopicCompleteness {
    const TABLE: &'static str = "student_topic_completeness";
    const FIELDS: &'static [&'static str] = &[
        "student_id",
        "topic_id",
        "total_finished_los",
        "is_completed",
        "created_at",
        "updated_at",
        "deleted_at",
    ];
    const PRIMARY_KEY: &'static [&'static str] = &["student_id", "topic_id"];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            (&self.student_id).into(),
            (&self.topic_id).into(),
            self.total_finished_los.into(),
            self.is_completed.into(),
            self.created_at.into(),
            self.updated_at.into(),
            self.deleted_at.into(),
        ]
    }

    fn from_row(row: &Row) -> DbResult<Self> {
        Ok(StudentTopicCompleteness {
            student_id: row.get("student_id")?,
            topic_id: row.get("topic_id")?,
            total_finished_los: row.get("total_finished_los")?,
            is_completed: row.get("is_completed")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            deleted_at: row.get("deleted_at")?,
        })
    }

    fn set_timestamps(&mut self, now: DateTime<Utc>) {
        self.created_at = now;
        self.updated_at = now;
    }

    fn validate(&self) -> Result<(), ValidationError> {
        validate_id("student_id", &self.student_id)?;
        validate_id("topic_id", &self.topic_id)
    }
}

impl Entity for StudentTopicOverdue {
    const TABLE: &'static str = "student_topic_overdue";
    const FIELDS: &'static [&'static str] =
        &["student_id", "topic_id", "due_date", "created_at", "updated_at"];
    const PRIMARY_KEY: &'static [&'static str] = &["student_id", "topic_id"];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            (&self.student_id).into(),
            (&self.topic_id).into(),
            self.due_date.into(),
            self.created_at.into(),
            self.updated_at.into(),
        ]
    }

    fn from_row(row: &Row) -> DbResult<Self> {
        Ok(StudentTopicOverdue {
            student_id: row.get("student_id")?,
            topic_id: row.get("topic_id")?,
            due_date: row.get("due_date")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn set_timestamps(&mut self, now: DateTime<Utc>) {
        self.created_at = now;
        self.updated_at = now;
    }

    fn validate(&self) -> Result<(), ValidationError> {
        validate_id("student_id", &self.student_id)?;
        validate_id("topic_id", &self.topic_id)
    }
}

pub(crate) const COMPLETENESS_UPSERT: Upsert = Upsert {
    conflict: Conflict::Constraint("student_topic_completeness_pk"),
    update: &["total_finished_los", "is_completed", "updated_at", "deleted_at"],
};

pub(crate) const OVERDUE_UPSERT: Upsert = Upsert {
    conflict: Conflict::Constraint("student_topic_overdue_pk"),
    update: &["due_date", "updated_at"],
};

// =============================================================================
// StudentTopicCompletenessRepository
// =============================================================================

/// Repository for `student_topic_completeness`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StudentTopicCompletenessRepository;

impl StudentTopicCompletenessRepository {
    #[tracing::instrument(name = "StudentTopicCompletenessRepo.Upsert", skip_all, fields(count = items.len()))]
    pub async fn upsert(
        &self,
        db: &dyn Executor,
        items: &mut [StudentTopicCompleteness],
    ) -> DbResult<()> {
        upsert_each(db, items, &COMPLETENESS_UPSERT).await
    }

    /// Active progress rows grouped by student.
    #[tracing::instrument(name = "StudentTopicCompletenessRepo.RetrieveByStudentIDs", skip_all, fields(count = student_ids.len()))]
    pub async fn retrieve_by_student_ids(
        &self,
        db: &dyn Executor,
        student_ids: &[String],
    ) -> DbResult<HashMap<String, Vec<StudentTopicCompleteness>>> {
        let mut query = QueryBuilder::select::<StudentTopicCompleteness>();
        query
            .and_bind("student_id = ANY({})", student_ids)
            .and_where("deleted_at IS NULL")
            .order_by("student_id, topic_id");
        let (sql, args) = query.build();

        let rows: Vec<StudentTopicCompleteness> = find_all(db, &sql, args).await?;
        Ok(group_by(rows, |r| r.student_id.clone()))
    }
}

// =============================================================================
// StudentTopicOverdueRepository
// =============================================================================

/// Repository for `student_topic_overdue`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StudentTopicOverdueRepository;

impl StudentTopicOverdueRepository {
    /// Records or moves overdue markers.
    #[tracing::instrument(name = "StudentTopicOverdueRepo.Upsert", skip_all, fields(count = items.len()))]
    pub async fn upsert(&self, db: &dyn Executor, items: &mut [StudentTopicOverdue]) -> DbResult<()> {
        upsert_each(db, items, &OVERDUE_UPSERT).await
    }

    /// A student's overdue markers, optionally limited to some topics.
    #[tracing::instrument(name = "StudentTopicOverdueRepo.Retrieve", skip_all, fields(student_id = %student_id))]
    pub async fn retrieve(
        &self,
        db: &dyn Executor,
        student_id: &str,
        topic_ids: Option<&[String]>,
    ) -> DbResult<Vec<StudentTopicOverdue>> {
        let mut query = QueryBuilder::select::<StudentTopicOverdue>();
        query
            .and_bind("student_id = {}", student_id)
            .and_opt("topic_id = ANY({})", topic_ids)
            .order_by("due_date, topic_id");
        let (sql, args) = query.build();

        find_all(db, &sql, args).await
    }

    /// Deletes a student's markers for the given topics and returns how many
    /// rows went.
    #[tracing::instrument(name = "StudentTopicOverdueRepo.Remove", skip_all, fields(student_id = %student_id, count = topic_ids.len()))]
    pub async fn remove(
        &self,
        db: &dyn Executor,
        student_id: &str,
        topic_ids: &[String],
    ) -> DbResult<u64> {
        let mut query = QueryBuilder::new("DELETE FROM student_topic_overdue");
        query
            .and_bind("student_id = {}", student_id)
            .and_bind("topic_id = ANY({})", topic_ids);
        let (sql, args) = query.build();

        Ok(db.exec(&sql, args).await?.rows_affected())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{assert_round_trip, row_of, MockExecutor};

    #[test]
    fn test_round_trip() {
        let mut completeness = StudentTopicCompleteness::new("s1", "t1");
        completeness.total_finished_los = 3;
        assert_round_trip(&completeness);
        assert_round_trip(&StudentTopicOverdue::new("s1", "t1", Utc::now()));
    }

    #[tokio::test]
    async fn test_upsert_conflicts_on_student_and_topic() {
        let db = MockExecutor::new();
        let mut items = vec![StudentTopicCompleteness::new("s1", "t1")];

        StudentTopicCompletenessRepository
            .upsert(&db, &mut items)
            .await
            .unwrap();

        let batches = db.batches();
        let sql = &batches[0].statements()[0].sql;
        assert!(sql.contains("ON CONFLICT ON CONSTRAINT student_topic_completeness_pk"));
        assert!(sql.contains("is_completed = EXCLUDED.is_completed"));
    }

    #[tokio::test]
    async fn test_retrieve_by_student_ids_groups() {
        let db = MockExecutor::new();
        db.push_rows(vec![
            row_of(&StudentTopicCompleteness::new("s1", "t1")),
            row_of(&StudentTopicCompleteness::new("s1", "t2")),
            row_of(&StudentTopicCompleteness::new("s2", "t1")),
        ]);

        let grouped = StudentTopicCompletenessRepository
            .retrieve_by_student_ids(&db, &["s1".to_string(), "s2".to_string()])
            .await
            .unwrap();

        assert_eq!(grouped["s1"].len(), 2);
        assert_eq!(grouped["s2"].len(), 1);
    }

    #[tokio::test]
    async fn test_overdue_retrieve_omits_topic_filter() {
        let db = MockExecutor::new();

        StudentTopicOverdueRepository
            .retrieve(&db, "s1", None)
            .await
            .unwrap();
        let without = db.last().unwrap();

        let topics = vec!["t1".to_string()];
        StudentTopicOverdueRepository
            .retrieve(&db, "s1", Some(topics.as_slice()))
            .await
            .unwrap();
        let with = db.last().unwrap();

        assert!(without.sql.ends_with("WHERE student_id = $1 ORDER BY due_date, topic_id"));
        assert_eq!(without.args.len(), 1);
        assert!(with.sql.contains("student_id = $1 AND topic_id = ANY($2)"));
        assert!(!with.sql.contains("deleted_at"));
    }

    #[tokio::test]
    async fn test_remove_is_hard_delete() {
        let db = MockExecutor::new();
        db.push_affected(2);

        let removed = StudentTopicOverdueRepository
            .remove(&db, "s1", &["t1".to_string(), "t2".to_string()])
            .await
            .unwrap();

        assert_eq!(removed, 2);
        assert_eq!(
            db.last().unwrap().sql,
            "DELETE FROM student_topic_overdue WHERE student_id = $1 AND topic_id = ANY($2)"
        );
    }
}
