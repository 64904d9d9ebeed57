//! # Assignment Repositories
//!
//! Assignments and the `topics_assignments` association that places them
//! inside topics.
//!
//! Filters on [`AssignmentRepository::retrieve_assignments`] use the fixed
//! placeholder form: every predicate is always present, and a NULL argument
//! turns it into a tautology.
//!
//! ```text
//! ($1::text[] IS NULL OR assignment_id = ANY($1))
//! ($2::text[] IS NULL OR topic_id = ANY($2))
//! ($3::text   IS NULL OR status = $3)
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use syllabus_core::{Assignment, TopicsAssignments, ValidationError};
use tracing::debug;

use crate::batch::upsert_each;
use crate::entity::{Conflict, Entity, Upsert};
use crate::error::DbResult;
use crate::executor::Executor;
use crate::mapper::{find_all, group_by};
use crate::query::{Page, QueryBuilder};
use crate::value::{Row, SqlValue};

// =============================================================================
// Field Maps
// =============================================================================

impl Entity for Assignment {
    const TABLE: &'static str = "assignments";
    const FIELDS: &'static [&'static str] = &[
        "assignment_id",
        "name",
        "content",
        "attachment",
        "settings",
        "check_list",
        "max_grade",
        "instruction",
        "type",
        "status",
        "is_required_grade",
        "display_order",
        "original_topic",
        "topic_id",
        "created_at",
        "updated_at",
        "deleted_at",
    ];
    const PRIMARY_KEY: &'static [&'static str] = &["assignment_id"];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            (&self.assignment_id).into(),
            (&self.name).into(),
            (&self.content).into(),
            (&self.attachment).into(),
            (&self.settings).into(),
            (&self.check_list).into(),
            self.max_grade.into(),
            (&self.instruction).into(),
            self.assignment_type.as_str().into(),
            self.status.as_str().into(),
            self.is_required_grade.into(),
            self.display_order.into(),
            (&self.original_topic).into(),
            (&self.topic_id).into(),
            self.created_at.into(),
            self.updated_at.into(),
            self.deleted_at.into(),
        ]
    }

    fn from_row(row: &Row) -> DbResult<Self> {
        Ok(Assignment {
            assignment_id: row.get("assignment_id")?,
            name: row.get("name")?,
            content: row.get("content")?,
            attachment: row.get("attachment")?,
            settings: row.get("settings")?,
            check_list: row.get("check_list")?,
            max_grade: row.get("max_grade")?,
            instruction: row.get("instruction")?,
            assignment_type: row.get_parsed("type")?,
            status: row.get_parsed("status")?,
            is_required_grade: row.get("is_required_grade")?,
            display_order: row.get("display_order")?,
            original_topic: row.get("original_topic")?,
            topic_id: row.get("topic_id")?,
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
        Assignment::validate(self)
    }
}

impl Entity for TopicsAssignments {
    const TABLE: &'static str = "topics_assignments";
    const FIELDS: &'static [&'static str] = &[
        "topic_id",
        "assignment_id",
        "display_order",
        "created_at",
        "updated_at",
        "deleted_at",
    ];
    const PRIMARY_KEY: &'static [&'static str] = &["topic_id", "assignment_id"];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            (&self.topic_id).into(),
            (&self.assignment_id).into(),
            self.display_order.into(),
            self.created_at.into(),
            self.updated_at.into(),
            self.deleted_at.into(),
        ]
    }

    fn from_row(row: &Row) -> DbResult<Self> {
        Ok(TopicsAssignments {
            topic_id: row.get("topic_id")?,
            assignment_id: row.get("assignment_id")?,
            display_order: row.get("display_order")?,
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
        TopicsAssignments::validate(self)
    }
}

/// `original_topic` records where the assignment was first authored and is
/// never overwritten.
pub(crate) const ASSIGNMENT_UPSERT: Upsert = Upsert {
    conflict: Conflict::Constraint("assignments_pk"),
    update: &[
        "name",
        "content",
        "attachment",
        "settings",
        "check_list",
        "max_grade",
        "instruction",
        "type",
        "status",
        "is_required_grade",
        "display_order",
        "topic_id",
        "updated_at",
        "deleted_at",
    ],
};

pub(crate) const TOPICS_ASSIGNMENTS_UPSERT: Upsert = Upsert {
    conflict: Conflict::Columns(&["topic_id", "assignment_id"]),
    update: &["display_order", "updated_at", "deleted_at"],
};

const DEFAULT_LIMIT: u32 = 10;

// =============================================================================
// AssignmentRepository
// =============================================================================

/// Filters for [`AssignmentRepository::retrieve_assignments`].
/// `None` leaves the predicate in place but always true.
#[derive(Debug, Clone, Default)]
pub struct AssignmentFilter {
    pub assignment_ids: Option<Vec<String>>,
    pub topic_ids: Option<Vec<String>>,
    pub status: Option<String>,

    /// 0 means the default page size (10).
    pub limit: u32,
    pub offset: u32,
}

/// Repository for `assignments`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssignmentRepository;

impl AssignmentRepository {
    /// Inserts or updates assignments in one batch.
    ///
    /// Every assignment is checked before queuing (it must reference a
    /// topic); one bad record aborts the call before anything is sent.
    #[tracing::instrument(name = "AssignmentRepo.BulkUpsert", skip_all, fields(count = assignments.len()))]
    pub async fn bulk_upsert(&self, db: &dyn Executor, assignments: &mut [Assignment]) -> DbResult<()> {
        upsert_each(db, assignments, &ASSIGNMENT_UPSERT).await
    }

    /// Active assignments matching the filter, in display order.
    #[tracing::instrument(name = "AssignmentRepo.RetrieveAssignments", skip_all)]
    pub async fn retrieve_assignments(
        &self,
        db: &dyn Executor,
        filter: &AssignmentFilter,
    ) -> DbResult<Vec<Assignment>> {
        let mut query = QueryBuilder::select::<Assignment>();
        query
            .and_where("deleted_at IS NULL")
            .and_nullable(
                "({}::text[] IS NULL OR assignment_id = ANY({}))",
                filter.assignment_ids.clone(),
            )
            .and_nullable(
                "({}::text[] IS NULL OR topic_id = ANY({}))",
                filter.topic_ids.clone(),
            )
            .and_nullable("({}::text IS NULL OR status = {})", filter.status.as_deref())
            .order_by("display_order, assignment_id")
            .paginate(Page::offset(filter.limit, filter.offset, DEFAULT_LIMIT));
        let (sql, args) = query.build();

        find_all(db, &sql, args).await
    }

    /// Active assignments of each topic, grouped by topic id.
    #[tracing::instrument(name = "AssignmentRepo.RetrieveByTopicIDs", skip_all, fields(count = topic_ids.len()))]
    pub async fn retrieve_by_topic_ids(
        &self,
        db: &dyn Executor,
        topic_ids: &[String],
    ) -> DbResult<HashMap<String, Vec<Assignment>>> {
        let mut query = QueryBuilder::select::<Assignment>();
        query
            .and_bind("topic_id = ANY({})", topic_ids)
            .and_where("deleted_at IS NULL")
            .order_by("topic_id, display_order, assignment_id");
        let (sql, args) = query.build();

        let assignments: Vec<Assignment> = find_all(db, &sql, args).await?;
        debug!(found = assignments.len(), "Assignments loaded");
        Ok(group_by(assignments, |a| a.topic_id.clone().unwrap_or_default()))
    }

    /// Soft-deletes assignments, returning how many were still active.
    #[tracing::instrument(name = "AssignmentRepo.SoftDelete", skip_all, fields(count = assignment_ids.len()))]
    pub async fn soft_delete(&self, db: &dyn Executor, assignment_ids: &[String]) -> DbResult<u64> {
        let mut query =
            QueryBuilder::new("UPDATE assignments SET deleted_at = NOW(), updated_at = NOW()");
        query
            .and_bind("assignment_id = ANY({})", assignment_ids)
            .and_where("deleted_at IS NULL");
        let (sql, args) = query.build();

        Ok(db.exec(&sql, args).await?.rows_affected())
    }
}

// =============================================================================
// TopicsAssignmentsRepository
// =============================================================================

/// Repository for `topics_assignments`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TopicsAssignmentsRepository;

impl TopicsAssignmentsRepository {
    /// Places assignments in topics; an existing pair gets its display
    /// order refreshed and is revived if it was deleted.
    #[tracing::instrument(name = "TopicsAssignmentsRepo.BulkUpsert", skip_all, fields(count = items.len()))]
    pub async fn bulk_upsert(&self, db: &dyn Executor, items: &mut [TopicsAssignments]) -> DbResult<()> {
        upsert_each(db, items, &TOPICS_ASSIGNMENTS_UPSERT).await
    }

    #[tracing::instrument(name = "TopicsAssignmentsRepo.SoftDeleteByAssignmentIDs", skip_all, fields(count = assignment_ids.len()))]
    pub async fn soft_delete_by_assignment_ids(
        &self,
        db: &dyn Executor,
        assignment_ids: &[String],
    ) -> DbResult<u64> {
        let mut query = QueryBuilder::new(
            "UPDATE topics_assignments SET deleted_at = NOW(), updated_at = NOW()",
        );
        query
            .and_bind("assignment_id = ANY({})", assignment_ids)
            .and_where("deleted_at IS NULL");
        let (sql, args) = query.build();

        Ok(db.exec(&sql, args).await?.rows_affected())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
