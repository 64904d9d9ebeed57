//! # Repository Module
//!
//! Per-entity record access.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Stateless Repositories                               │
//! │                                                                         │
//! │  Service code                                                           │
//! │       │                                                                 │
//! │       │  TopicRepository.retrieve_by_ids(&tx, &ids)                     │
//! │       ▼                                                                 │
//! │  TopicRepository (unit struct, holds nothing)                           │
//! │  ├── Entity impl for Topic   (table, FIELDS, values, from_row)          │
//! │  ├── TOPIC_UPSERT            (conflict target + updatable columns)      │
//! │  └── methods: QueryBuilder → Executor → mapper                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  &dyn Executor  (PgPool, PgTx or MockExecutor, chosen per call)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Shared Rules
//! - Active reads filter `deleted_at IS NULL`
//! - Writes that must touch one row check the count and fail with
//!   [`DbError::RowsAffected`] otherwise
//! - Every public method runs inside a `<Entity>Repo.<Method>` span
//!
//! ## Available Repositories
//!
//! - [`BookRepository`], [`ChapterRepository`], [`TopicRepository`] - content tree
//! - [`AssignmentRepository`], [`TopicsAssignmentsRepository`] - assignments
//! - [`QuizRepository`], [`QuizSetRepository`] - quizzes
//! - [`LessonRepository`], [`LessonReportRepository`] - lessons
//! - [`StudentTopicCompletenessRepository`], [`StudentTopicOverdueRepository`] - progress
//! - [`StudyPlanRepository`], [`PresetStudyPlanRepository`] - study plans
//! - [`UserGroupRepository`] - user groups

use crate::error::{DbError, DbResult};
use crate::executor::CommandTag;

pub mod assignment;
pub mod book;
pub mod chapter;
pub mod lesson;
pub mod lesson_report;
pub mod preset_study_plan;
pub mod quiz;
pub mod student_progress;
pub mod study_plan;
pub mod topic;
pub mod user_group;

pub use assignment::{AssignmentFilter, AssignmentRepository, TopicsAssignmentsRepository};
pub use book::{BookFilter, BookRepository};
pub use chapter::ChapterRepository;
pub use lesson::{LessonCursor, LessonFilter, LessonRepository};
pub use lesson_report::LessonReportRepository;
pub use preset_study_plan::{PresetStudyPlanFilter, PresetStudyPlanRepository};
pub use quiz::{QuizFilter, QuizRepository, QuizSetRepository};
pub use student_progress::{StudentTopicCompletenessRepository, StudentTopicOverdueRepository};
pub use study_plan::{StudyPlanCursor, StudyPlanRepository};
pub use topic::TopicRepository;
pub use user_group::UserGroupRepository;

/// Requires a write to have touched exactly one row.
pub(crate) fn expect_one(tag: CommandTag, action: &str, entity: &str) -> DbResult<()> {
    match tag.rows_affected() {
        1 => Ok(()),
        n => Err(DbError::rows_affected(action, entity, 1, n)),
    }
}

/// Requires a targeted soft delete to have touched at least one row.
pub(crate) fn expect_some(tag: CommandTag, entity: &str, key: &str) -> DbResult<u64> {
    match tag.rows_affected() {
        0 => Err(DbError::not_found(entity, key)),
        n => Ok(n),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
