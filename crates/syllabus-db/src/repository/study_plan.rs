//! # Study Plan Repository
//!
//! Course study plans, paged by name with the id as tiebreaker.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use syllabus_core::{StudyPlan, ValidationError};

use crate::batch::upsert_each;
use crate::entity::{Conflict, Entity, Upsert};
use crate::error::DbResult;
use crate::executor::Executor;
use crate::mapper::{find_all, find_one, index_by};
use crate::query::{Page, QueryBuilder, SortOrder};
use crate::value::{Row, SqlValue};

impl Entity for StudyPlan {
    const TABLE: &'static str = "study_plans";
    const FIELDS: &'static [&'static str] = &[
        "study_plan_id",
        "name",
        "course_id",
        "book_id",
        "master_study_plan_id",
        "school_id",
        "status",
        "track_school_progress",
        "created_at",
        "updated_at",
        "deleted_at",
    ];
    const PRIMARY_KEY: &'static [&'static str] = &["study_plan_id"];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            (&self.study_plan_id).into(),
            (&self.name).into(),
            (&self.course_id).into(),
            (&self.book_id).into(),
            (&self.master_study_plan_id).into(),
            self.school_id.into(),
            self.status.as_str().into(),
            self.track_school_progress.into(),
            self.created_at.into(),
            self.updated_at.into(),
            self.deleted_at.into(),
        ]
    }

    fn from_row(row: &Row) -> DbResult<Self> {
        Ok(StudyPlan {
            study_plan_id: row.get("study_plan_id")?,
            name: row.get("name")?,
            course_id: row.get("course_id")?,
            book_id: row.get("book_id")?,
            master_study_plan_id: row.get("master_study_plan_id")?,
            school_id: row.get("school_id")?,
            status: row.get_parsed("status")?,
            track_school_progress: row.get("track_school_progress")?,
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
        StudyPlan::validate(self)
    }
}

/// `master_study_plan_id` is fixed when a plan is copied and kept on
/// conflict.
pub(crate) const STUDY_PLAN_UPSERT: Upsert = Upsert {
    conflict: Conflict::Constraint("study_plans_pk"),
    update: &[
        "name",
        "course_id",
        "book_id",
        "school_id",
        "status",
        "track_school_progress",
        "updated_at",
        "deleted_at",
    ],
};

const DEFAULT_LIMIT: u32 = 5;

/// Keyset cursor: the last plan of the previous page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyPlanCursor {
    pub name: String,
    pub study_plan_id: String,
}

impl From<&StudyPlan> for StudyPlanCursor {
    fn from(plan: &StudyPlan) -> Self {
        StudyPlanCursor {
            name: plan.name.clone(),
            study_plan_id: plan.study_plan_id.clone(),
        }
    }
}

/// Repository for `study_plans`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StudyPlanRepository;

impl StudyPlanRepository {
    #[tracing::instrument(name = "StudyPlanRepo.BulkUpsert", skip_all, fields(count = plans.len()))]
    pub async fn bulk_upsert(&self, db: &dyn Executor, plans: &mut [StudyPlan]) -> DbResult<()> {
        upsert_each(db, plans, &STUDY_PLAN_UPSERT).await
    }

    #[tracing::instrument(name = "StudyPlanRepo.FindByID", skip_all, fields(study_plan_id = %study_plan_id))]
    pub async fn find_by_id(&self, db: &dyn Executor, study_plan_id: &str) -> DbResult<StudyPlan> {
        let mut query = QueryBuilder::select::<StudyPlan>();
        query
            .and_bind("study_plan_id = {}", study_plan_id)
            .and_where("deleted_at IS NULL");
        let (sql, args) = query.build();

        find_one(db, &sql, args, study_plan_id).await
    }

    #[tracing::instrument(name = "StudyPlanRepo.FindByIDs", skip_all, fields(count = study_plan_ids.len()))]
    pub async fn find_by_ids(
        &self,
        db: &dyn Executor,
        study_plan_ids: &[String],
    ) -> DbResult<HashMap<String, StudyPlan>> {
        let mut query = QueryBuilder::select::<StudyPlan>();
        query
            .and_bind("study_plan_id = ANY({})", study_plan_ids)
            .and_where("deleted_at IS NULL");
        let (sql, args) = query.build();

        let plans: Vec<StudyPlan> = find_all(db, &sql, args).await?;
        Ok(index_by(plans, |p| p.study_plan_id.clone()))
    }

    /// One page of a course's active plans ordered by `(name, study_plan_id)`.
    ///
    /// Pass the last plan of the previous page as `after`; a zero `limit`
    /// means 5.
    #[tracing::instrument(name = "StudyPlanRepo.RetrieveByCourse", skip_all, fields(course_id = %course_id, limit = limit))]
    pub async fn retrieve_by_course(
        &self,
        db: &dyn Executor,
        course_id: &str,
        after: Option<&StudyPlanCursor>,
        limit: u32,
    ) -> DbResult<Vec<StudyPlan>> {
        let cursor = after.map(|c| {
            vec![
                SqlValue::from(c.name.as_str()),
                SqlValue::from(c.study_plan_id.as_str()),
            ]
        });

        let mut query = QueryBuilder::select::<StudyPlan>();
        query
            .and_bind("course_id = {}", course_id)
            .and_where("deleted_at IS NULL")
            .paginate(Page::keyset(
                &["name", "study_plan_id"],
                cursor,
                SortOrder::Asc,
                limit,
                DEFAULT_LIMIT,
            ));
        let (sql, args) = query.build();

        find_all(db, &sql, args).await
    }

    #[tracing::instrument(name = "StudyPlanRepo.SoftDelete", skip_all, fields(count = study_plan_ids.len()))]
    pub async fn soft_delete(&self, db: &dyn Executor, study_plan_ids: &[String]) -> DbResult<u64> {
        let mut query =
            QueryBuilder::new("UPDATE study_plans SET deleted_at = NOW(), updated_at = NOW()");
        query
            .and_bind("study_plan_id = ANY({})", study_plan_ids)
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
    use crate::testing::{assert_round_trip, fixtures, row_of, MockExecutor};

    #[test]
    fn test_round_trip() {
        assert_round_trip(&fixtures::study_plan("sp-1"));
    }

    #[tokio::test]
    async fn test_first_page_defaults_to_five() {
        let db = MockExecutor::new();

        StudyPlanRepository
            .retrieve_by_course(&db, "course-1", None, 0)
            .await
            .unwrap();

        let stmt = db.last().unwrap();
        assert!(stmt.sql.ends_with(
            "WHERE course_id = $1 AND deleted_at IS NULL ORDER BY name ASC, study_plan_id ASC LIMIT $2"
        ));
        assert_eq!(stmt.args[1], SqlValue::from(5_i64));
    }

    #[tokio::test]
    async fn test_next_page_starts_after_cursor() {
        let db = MockExecutor::new();
        let last = fixtures::study_plan("sp-5");
        db.push_rows(vec![row_of(&fixtures::study_plan("sp-6"))]);

        let page = StudyPlanRepository
            .retrieve_by_course(&db, "course-1", Some(&StudyPlanCursor::from(&last)), 5)
            .await
            .unwrap();

        assert_eq!(page.len(), 1);
        let stmt = db.last().unwrap();
        assert!(stmt.sql.contains("AND (name, study_plan_id) > ($2, $3)"));
        assert!(!stmt.sql.contains("OFFSET"));
        assert_eq!(stmt.args[1], SqlValue::from("Plan sp-5"));
        assert_eq!(stmt.args[2], SqlValue::from("sp-5"));
    }

    #[tokio::test]
    async fn test_find_by_id_not_found() {
        let db = MockExecutor::new();
        db.push_rows(Vec::new());

        let err = StudyPlanRepository.find_by_id(&db, "sp-9").await.unwrap_err();
        assert_eq!(err.to_string(), "study_plans not found: sp-9");
    }

    #[tokio::test]
    async fn test_bulk_upsert_keeps_master_plan() {
        let db = MockExecutor::new();
        let mut plans = vec![fixtures::study_plan("sp-1")];

        StudyPlanRepository.bulk_upsert(&db, &mut plans).await.unwrap();

        let batches = db.batches();
        let sql = &batches[0].statements()[0].sql;
        assert!(!sql.contains("master_study_plan_id = EXCLUDED"));
    }
}
