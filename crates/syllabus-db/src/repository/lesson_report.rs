//! # Lesson Report Repository
//!
//! A lesson has one report; the report has one detail row per student.

use chrono::{DateTime, Utc};
use syllabus_core::{new_id, LessonReport, LessonReportDetail, ValidationError};
use tracing::debug;

use crate::batch::upsert_each;
use crate::entity::{insert_sql, Conflict, Entity, Upsert};
use crate::error::{DbError, DbResult};
use crate::executor::Executor;
use crate::mapper::{find_all, find_one};
use crate::query::QueryBuilder;
use crate::repository::{expect_one, expect_some};
use crate::value::{Row, SqlValue};

impl Entity for LessonReport {
    const TABLE: &'static str = "lesson_reports";
    const FIELDS: &'static [&'static str] = &[
        "lesson_report_id",
        "report_submitting_status",
        "form_config_id",
        "lesson_id",
        "created_at",
        "updated_at",
        "deleted_at",
    ];
    const PRIMARY_KEY: &'static [&'static str] = &["lesson_report_id"];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            (&self.lesson_report_id).into(),
            self.report_submitting_status.as_str().into(),
            (&self.form_config_id).into(),
            (&self.lesson_id).into(),
            self.created_at.into(),
            self.updated_at.into(),
            self.deleted_at.into(),
        ]
    }

    fn from_row(row: &Row) -> DbResult<Self> {
        Ok(LessonReport {
            lesson_report_id: row.get("lesson_report_id")?,
            report_submitting_status: row.get_parsed("report_submitting_status")?,
            form_config_id: row.get("form_config_id")?,
            lesson_id: row.get("lesson_id")?,
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
        LessonReport::validate(self)
    }
}

impl Entity for LessonReportDetail {
    const TABLE: &'static str = "lesson_report_details";
    const FIELDS: &'static [&'static str] = &[
        "lesson_report_detail_id",
        "lesson_report_id",
        "student_id",
        "created_at",
        "updated_at",
        "deleted_at",
    ];
    const PRIMARY_KEY: &'static [&'static str] = &["lesson_report_detail_id"];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            (&self.lesson_report_detail_id).into(),
            (&self.lesson_report_id).into(),
            (&self.student_id).into(),
            self.created_at.into(),
            self.updated_at.into(),
            self.deleted_at.into(),
        ]
    }

    fn from_row(row: &Row) -> DbResult<Self> {
        Ok(LessonReportDetail {
            lesson_report_detail_id: row.get("lesson_report_detail_id")?,
            lesson_report_id: row.get("lesson_report_id")?,
            student_id: row.get("student_id")?,
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
        LessonReportDetail::validate(self)
    }
}

/// A student keeps one detail row per report; re-submitting revives it.
pub(crate) const DETAIL_UPSERT: Upsert = Upsert {
    conflict: Conflict::Constraint("lesson_report_details_lesson_report_id_student_id_un"),
    update: &["updated_at", "deleted_at"],
};

/// Repository for `lesson_reports` and `lesson_report_details`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LessonReportRepository;

impl LessonReportRepository {
    /// Inserts a report. An empty id is generated and written back once the
    /// insert succeeded.
    ///
    /// ## Returns
    /// * `Err(DbError::RowsAffected)` - `cannot insert new lesson_reports`
    #[tracing::instrument(name = "LessonReportRepo.Create", skip_all, fields(lesson_id = %report.lesson_id))]
    pub async fn create(&self, db: &dyn Executor, report: &mut LessonReport) -> DbResult<()> {
        let mut record = report.clone();
        if record.lesson_report_id.is_empty() {
            record.lesson_report_id = new_id();
        }
        record.set_timestamps(Utc::now());
        record.validate()?;

        let tag = db.exec(&insert_sql::<LessonReport>(), record.values()).await?;
        if tag.rows_affected() != 1 {
            return Err(DbError::cannot_insert(LessonReport::TABLE, tag.rows_affected()));
        }

        debug!(lesson_report_id = %record.lesson_report_id, "Lesson report created");
        *report = record;
        Ok(())
    }

    /// Saves the submitting status and form config of an active report.
    #[tracing::instrument(name = "LessonReportRepo.Update", skip_all, fields(lesson_report_id = %report.lesson_report_id))]
    pub async fn update(&self, db: &dyn Executor, report: &LessonReport) -> DbResult<()> {
        report.validate()?;

        let mut query = QueryBuilder::new("UPDATE lesson_reports SET updated_at = NOW()");
        query
            .push_head_bind(
                ", report_submitting_status = {}",
                report.report_submitting_status.as_str(),
            )
            .push_head_bind(", form_config_id = {}", &report.form_config_id)
            .and_bind("lesson_report_id = {}", &report.lesson_report_id)
            .and_where("deleted_at IS NULL");
        let (sql, args) = query.build();

        let tag = db.exec(&sql, args).await?;
        expect_one(tag, "update", LessonReport::TABLE)
    }

    #[tracing::instrument(name = "LessonReportRepo.FindByID", skip_all, fields(lesson_report_id = %lesson_report_id))]
    pub async fn find_by_id(&self, db: &dyn Executor, lesson_report_id: &str) -> DbResult<LessonReport> {
        let mut query = QueryBuilder::select::<LessonReport>();
        query
            .and_bind("lesson_report_id = {}", lesson_report_id)
            .and_where("deleted_at IS NULL");
        let (sql, args) = query.build();

        find_one(db, &sql, args, lesson_report_id).await
    }

    /// The active report of a lesson.
    #[tracing::instrument(name = "LessonReportRepo.FindByLessonID", skip_all, fields(lesson_id = %lesson_id))]
    pub async fn find_by_lesson_id(&self, db: &dyn Executor, lesson_id: &str) -> DbResult<LessonReport> {
        let mut query = QueryBuilder::select::<LessonReport>();
        query
            .and_bind("lesson_id = {}", lesson_id)
            .and_where("deleted_at IS NULL")
            .order_by("created_at DESC");
        let (sql, args) = query.build();

        find_one(db, &sql, args, lesson_id).await
    }

    /// Soft-deletes a report.
    ///
    /// ## Returns
    /// * `Err(DbError::NotFound)` - the report was missing or already deleted
    #[tracing::instrument(name = "LessonReportRepo.Delete", skip_all, fields(lesson_report_id = %lesson_report_id))]
    pub async fn delete(&self, db: &dyn Executor, lesson_report_id: &str) -> DbResult<()> {
        let mut query =
            QueryBuilder::new("UPDATE lesson_reports SET deleted_at = NOW(), updated_at = NOW()");
        query
            .and_bind("lesson_report_id = {}", lesson_report_id)
            .and_where("deleted_at IS NULL");
        let (sql, args) = query.build();

        let tag = db.exec(&sql, args).await?;
        expect_some(tag, LessonReport::TABLE, lesson_report_id)?;
        Ok(())
    }

    /// Writes one detail row per student in one batch.
    ///
    /// Details without an id get a fresh one; the caller's records receive
    /// the ids only when every statement succeeded.
    #[tracing::instrument(name = "LessonReportRepo.UpsertDetails", skip_all, fields(count = details.len()))]
    pub async fn upsert_details(
        &self,
        db: &dyn Executor,
        details: &mut [LessonReportDetail],
    ) -> DbResult<()> {
        let mut records = details.to_vec();
        for record in records.iter_mut() {
            if record.lesson_report_detail_id.is_empty() {
                record.lesson_report_detail_id = new_id();
            }
        }

        upsert_each(db, &mut records, &DETAIL_UPSERT).await?;

        details.clone_from_slice(&records);
        Ok(())
    }

    /// Active detail rows of a report.
    #[tracing::instrument(name = "LessonReportRepo.FindDetails", skip_all, fields(lesson_report_id = %lesson_report_id))]
    pub async fn find_details(
        &self,
        db: &dyn Executor,
        lesson_report_id: &str,
    ) -> DbResult<Vec<LessonReportDetail>> {
        let mut query = QueryBuilder::select::<LessonReportDetail>();
        query
            .and_bind("lesson_report_id = {}", lesson_report_id)
            .and_where("deleted_at IS NULL")
            .order_by("student_id");
        let (sql, args) = query.build();

        find_all(db, &sql, args).await
    }

    /// Soft-deletes every detail row of a report, returning how many there
    /// were.
    #[tracing::instrument(name = "LessonReportRepo.DeleteDetails", skip_all, fields(lesson_report_id = %lesson_report_id))]
    pub async fn delete_details(&self, db: &dyn Executor, lesson_report_id: &str) -> DbResult<u64> {
        let mut query = QueryBuilder::new(
            "UPDATE lesson_report_details SET deleted_at = NOW(), updated_at = NOW()",
        );
        query
            .and_bind("lesson_report_id = {}", lesson_report_id)
            .and_where("deleted_at IS NULL");
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
    use crate::batch::StatementResult;
    use crate::testing::{assert_round_trip, row_of, MockExecutor};
    use syllabus_core::ReportSubmittingStatus;

    fn report(id: &str) -> LessonReport {
        let mut report = LessonReport::new("lesson-1");
        report.lesson_report_id = id.to_string();
        report.form_config_id = Some("form-1".to_string());
        report
    }

    #[test]
    fn test_round_trip() {
        assert_round_trip(&report("lr-1"));
        assert_round_trip(&LessonReportDetail::new("lrd-1", "lr-1", "student-1"));
    }

    #[tokio::test]
    async fn test_create_generates_id_on_success() {
        let db = MockExecutor::new();
        let mut report = LessonReport::new("lesson-1");

        LessonReportRepository.create(&db, &mut report).await.unwrap();

        assert!(!report.lesson_report_id.is_empty());
        assert!(db.last().unwrap().sql.starts_with("INSERT INTO lesson_reports"));
    }

    #[tokio::test]
    async fn test_create_zero_rows() {
        let db = MockExecutor::new();
        db.push_affected(0);
        let mut report = LessonReport::new("lesson-1");

        let err = LessonReportRepository.create(&db, &mut report).await.unwrap_err();

        assert_eq!(err.to_string(), "cannot insert new lesson_reports");
        assert!(report.lesson_report_id.is_empty());
    }

    #[tokio::test]
    async fn test_update_requires_exactly_one_row() {
        let db = MockExecutor::new();
        db.push_affected(0);
        let mut report = report("lr-1");
        report.report_submitting_status = ReportSubmittingStatus::Submitted;

        let err = LessonReportRepository.update(&db, &report).await.unwrap_err();

        assert_eq!(err.to_string(), "cannot update lesson_reports");
        let stmt = db.last().unwrap();
        assert_eq!(
            stmt.sql,
            "UPDATE lesson_reports SET updated_at = NOW(), report_submitting_status = $1, form_config_id = $2 \
             WHERE lesson_report_id = $3 AND deleted_at IS NULL"
        );
        assert_eq!(
            stmt.args[0],
            SqlValue::from("LESSON_REPORT_SUBMITTING_STATUS_SUBMITTED")
        );
    }

    #[tokio::test]
    async fn test_find_by_lesson_id() {
        let db = MockExecutor::new();
        db.push_rows(vec![row_of(&report("lr-1"))]);

        let found = LessonReportRepository
            .find_by_lesson_id(&db, "lesson-1")
            .await
            .unwrap();

        assert_eq!(found.lesson_report_id, "lr-1");
    }

    #[tokio::test]
    async fn test_delete_missing_report() {
        let db = MockExecutor::new();
        db.push_affected(0);

        let err = LessonReportRepository.delete(&db, "lr-9").await.unwrap_err();
        assert_eq!(err.to_string(), "lesson_reports not found: lr-9");
    }

    #[tokio::test]
    async fn test_upsert_details_fills_ids_after_success() {
        let db = MockExecutor::new();
        let mut details = vec![
            LessonReportDetail::new("", "lr-1", "student-1"),
            LessonReportDetail::new("lrd-2", "lr-1", "student-2"),
        ];

        LessonReportRepository
            .upsert_details(&db, &mut details)
            .await
            .unwrap();

        assert!(!details[0].lesson_report_detail_id.is_empty());
        assert_eq!(details[1].lesson_report_detail_id, "lrd-2");
        assert!(db.batches()[0].statements()[0].sql.contains(
            "ON CONFLICT ON CONSTRAINT lesson_report_details_lesson_report_id_student_id_un"
        ));
    }

    #[tokio::test]
    async fn test_upsert_details_failure_leaves_ids() {
        let db = MockExecutor::new();
        db.push_batch(vec![Ok(StatementResult::affected(1)), Err(DbError::PoolExhausted)]);
        let mut details = vec![
            LessonReportDetail::new("", "lr-1", "student-1"),
            LessonReportDetail::new("", "lr-1", "student-2"),
        ];

        let err = LessonReportRepository
            .upsert_details(&db, &mut details)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "batchResults.Exec: Connection pool exhausted");
        assert!(details.iter().all(|d| d.lesson_report_detail_id.is_empty()));
    }

    #[tokio::test]
    async fn test_delete_details_counts() {
        let db = MockExecutor::new();
        db.push_affected(3);

        assert_eq!(LessonReportRepository.delete_details(&db, "lr-1").await.unwrap(), 3);
    }
}
