//! # Lesson Repository
//!
//! Lessons and their live-stream seat counter.
//!
//! ## Streaming Seats
//! ```text
//! increase_streaming(lesson, learner, max)
//!   UPDATE ... counter + 1, learner_ids + learner
//!   WHERE counter < max AND learner NOT IN learner_ids
//!     1 row  → seat taken
//!     0 rows → full, already streaming, or lesson gone: "cannot update lessons"
//!
//! decrease_streaming(lesson, learner)
//!   UPDATE ... counter - 1, learner_ids - learner
//!   WHERE counter > 0 AND learner IN learner_ids
//! ```
//!
//! The guard sits in the `WHERE` clause so two learners racing for the last
//! seat cannot both win; callers that read the learner list first should
//! lock it with `&[for_update]`.
//!
//! ## Lesson Links
//! `lesson_members`, `lessons_teachers` and `lessons_courses` are replaced
//! as a whole set in one batch:
//! ```text
//! 1. DELETE links of the lesson not in the new set   (any count)
//! 2. upsert each link of the new set                 (1 row each)
//! ```
//! Links are physical rows without `deleted_at`; kept links keep their
//! `created_at`.

use chrono::{DateTime, Utc};
use syllabus_core::validation::validate_id;
use syllabus_core::{new_id, Lesson, LessonCourse, LessonMember, LessonTeacher, ValidationError};
use tracing::debug;

use crate::batch::{queue_upserts, Batch};
use crate::entity::{insert_sql, Conflict, Entity, Upsert};
use crate::error::{DbError, DbResult, ResultExt};
use crate::executor::Executor;
use crate::mapper::{find_all, find_one, scan_column};
use crate::query::{Page, QueryBuilder, QueryEnhancer, SortOrder};
use crate::repository::expect_one;
use crate::value::{Row, SqlValue};

impl Entity for Lesson {
    const TABLE: &'static str = "lessons";
    const FIELDS: &'static [&'static str] = &[
        "lesson_id",
        "name",
        "course_id",
        "teacher_id",
        "start_time",
        "end_time",
        "lesson_type",
        "status",
        "stream_learner_counter",
        "learner_ids",
        "created_at",
        "updated_at",
        "deleted_at",
    ];
    const PRIMARY_KEY: &'static [&'static str] = &["lesson_id"];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            (&self.lesson_id).into(),
            (&self.name).into(),
            (&self.course_id).into(),
            (&self.teacher_id).into(),
            self.start_time.into(),
            self.end_time.into(),
            (&self.lesson_type).into(),
            (&self.status).into(),
            self.stream_learner_counter.into(),
            (&self.learner_ids).into(),
            self.created_at.into(),
            self.updated_at.into(),
            self.deleted_at.into(),
        ]
    }

    fn from_row(row: &Row) -> DbResult<Self> {
        Ok(Lesson {
            lesson_id: row.get("lesson_id")?,
            name: row.get("name")?,
            course_id: row.get("course_id")?,
            teacher_id: row.get("teacher_id")?,
            start_time: row.get("start_time")?,
            end_time: row.get("end_time")?,
            lesson_type: row.get("lesson_type")?,
            status: row.get("status")?,
            stream_learner_counter: row.get("stream_learner_counter")?,
            learner_ids: row.get("learner_ids")?,
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
        validate_id("lesson_id", &self.lesson_id)?;
        validate_id("course_id", &self.course_id)
    }
}

macro_rules! lesson_link_entity {
    ($ty:ident, $table:literal, $member:ident) => {
        impl Entity for $ty {
            const TABLE: &'static str = $table;
            const FIELDS: &'static [&'static str] =
                &["lesson_id", stringify!($member), "created_at", "updated_at"];
            const PRIMARY_KEY: &'static [&'static str] = &["lesson_id", stringify!($member)];

            fn values(&self) -> Vec<SqlValue> {
                vec![
                    (&self.lesson_id).into(),
                    (&self.$member).into(),
                    self.created_at.into(),
                    self.updated_at.into(),
                ]
            }

            fn from_row(row: &Row) -> DbResult<Self> {
                Ok($ty {
                    lesson_id: row.get("lesson_id")?,
                    $member: row.get(stringify!($member))?,
                    created_at: row.get("created_at")?,
                    updated_at: row.get("updated_at")?,
                })
            }

            fn set_timestamps(&mut self, now: DateTime<Utc>) {
                self.created_at = now;
                self.updated_at = now;
            }

            fn validate(&self) -> Result<(), ValidationError> {
                validate_id("lesson_id", &self.lesson_id)?;
                validate_id(stringify!($member), &self.$member)
            }
        }
    };
}

lesson_link_entity!(LessonMember, "lesson_members", user_id);
lesson_link_entity!(LessonTeacher, "lessons_teachers", teacher_id);
lesson_link_entity!(LessonCourse, "lessons_courses", course_id);

pub(crate) const LESSON_MEMBER_UPSERT: Upsert = Upsert {
    conflict: Conflict::Constraint("lesson_members_pk"),
    update: &["updated_at"],
};

pub(crate) const LESSON_TEACHER_UPSERT: Upsert = Upsert {
    conflict: Conflict::Constraint("lessons_teachers_pk"),
    update: &["updated_at"],
};

pub(crate) const LESSON_COURSE_UPSERT: Upsert = Upsert {
    conflict: Conflict::Constraint("lessons_courses_pk"),
    update: &["updated_at"],
};

const DEFAULT_LIMIT: u32 = 10;

/// Keyset cursor: the last lesson of the previous page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonCursor {
    pub created_at: DateTime<Utc>,
    pub lesson_id: String,
}

impl From<&Lesson> for LessonCursor {
    fn from(lesson: &Lesson) -> Self {
        LessonCursor {
            created_at: lesson.created_at,
            lesson_id: lesson.lesson_id.clone(),
        }
    }
}

/// Filters for [`LessonRepository::find`]. `None` keeps the predicate but
/// makes it always true.
#[derive(Debug, Clone, Default)]
pub struct LessonFilter {
    pub course_ids: Option<Vec<String>>,
    pub teacher_id: Option<String>,
    pub status: Option<String>,
    pub after: Option<LessonCursor>,
    /// 0 means the default page size (10).
    pub limit: u32,
}

/// Repository for `lessons`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LessonRepository;

impl LessonRepository {
    #[tracing::instrument(name = "LessonRepo.FindByID", skip_all, fields(lesson_id = %lesson_id))]
    pub async fn find_by_id(&self, db: &dyn Executor, lesson_id: &str) -> DbResult<Lesson> {
        let mut query = QueryBuilder::select::<Lesson>();
        query
            .and_bind("lesson_id = {}", lesson_id)
            .and_where("deleted_at IS NULL");
        let (sql, args) = query.build();

        find_one(db, &sql, args, lesson_id).await
    }

    /// One page of active lessons, newest first.
    #[tracing::instrument(name = "LessonRepo.Find", skip_all, fields(limit = filter.limit))]
    pub async fn find(&self, db: &dyn Executor, filter: &LessonFilter) -> DbResult<Vec<Lesson>> {
        let cursor = filter.after.as_ref().map(|c| {
            vec![
                SqlValue::from(c.created_at),
                SqlValue::from(c.lesson_id.as_str()),
            ]
        });

        let mut query = QueryBuilder::select::<Lesson>();
        query
            .and_where("deleted_at IS NULL")
            .and_nullable(
                "({}::text[] IS NULL OR course_id = ANY({}))",
                filter.course_ids.clone(),
            )
            .and_nullable("({}::text IS NULL OR teacher_id = {})", filter.teacher_id.as_deref())
            .and_nullable("({}::text IS NULL OR status = {})", filter.status.as_deref())
            .paginate(Page::keyset(
                &["created_at", "lesson_id"],
                cursor,
                SortOrder::Desc,
                filter.limit,
                DEFAULT_LIMIT,
            ));
        let (sql, args) = query.build();

        find_all(db, &sql, args).await
    }

    /// Learners currently streaming the lesson.
    ///
    /// ## Arguments
    /// * `enhancers` - `&[for_update]` to hold the row until the caller's
    ///   transaction ends
    #[tracing::instrument(name = "LessonRepo.GetStreamingLearners", skip_all, fields(lesson_id = %lesson_id))]
    pub async fn get_streaming_learners(
        &self,
        db: &dyn Executor,
        lesson_id: &str,
        enhancers: &[QueryEnhancer],
    ) -> DbResult<Vec<String>> {
        let mut query = QueryBuilder::new("SELECT learner_ids FROM lessons");
        query
            .and_bind("lesson_id = {}", lesson_id)
            .and_where("deleted_at IS NULL")
            .enhance(enhancers);
        let (sql, args) = query.build();

        let rows = db.query(&sql, args).await?;
        scan_column::<Vec<String>>(rows, "learner_ids")?
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found(Lesson::TABLE, lesson_id))
    }

    /// Takes a streaming seat for `learner_id` while fewer than `max`
    /// learners are streaming.
    ///
    /// ## Returns
    /// * `Err(DbError::RowsAffected)` - no seat left, learner already
    ///   streaming, or the lesson is missing
    #[tracing::instrument(name = "LessonRepo.IncreaseStreaming", skip_all, fields(lesson_id = %lesson_id, learner_id = %learner_id, max = max))]
    pub async fn increase_streaming(
        &self,
        db: &dyn Executor,
        lesson_id: &str,
        learner_id: &str,
        max: i32,
    ) -> DbResult<()> {
        let mut query = QueryBuilder::new(
            "UPDATE lessons SET updated_at = NOW(), stream_learner_counter = stream_learner_counter + 1",
        );
        let learner = query.bind(learner_id);
        query
            .push_head(&format!(", learner_ids = array_append(learner_ids, {learner})"))
            .and_bind("lesson_id = {}", lesson_id)
            .and_where("deleted_at IS NULL")
            .and_bind("stream_learner_counter < {}", max)
            .and_where(format!("NOT ({learner} = ANY(learner_ids))"));
        let (sql, args) = query.build();

        let tag = db.exec(&sql, args).await?;
        expect_one(tag, "update", Lesson::TABLE)
    }

    /// Gives back the seat held by `learner_id`.
    #[tracing::instrument(name = "LessonRepo.DecreaseStreaming", skip_all, fields(lesson_id = %lesson_id, learner_id = %learner_id))]
    pub async fn decrease_streaming(
        &self,
        db: &dyn Executor,
        lesson_id: &str,
        learner_id: &str,
    ) -> DbResult<()> {
        let mut query = QueryBuilder::new(
            "UPDATE lessons SET updated_at = NOW(), stream_learner_counter = stream_learner_counter - 1",
        );
        let learner = query.bind(learner_id);
        query
            .push_head(&format!(", learner_ids = array_remove(learner_ids, {learner})"))
            .and_bind("lesson_id = {}", lesson_id)
            .and_where("deleted_at IS NULL")
            .and_where("stream_learner_counter > 0")
            .and_where(format!("{learner} = ANY(learner_ids)"));
        let (sql, args) = query.build();

        let tag = db.exec(&sql, args).await?;
        expect_one(tag, "update", Lesson::TABLE)
    }

    /// Inserts one lesson.
    ///
    /// An empty `lesson_id` is generated; the caller's record receives it
    /// and the audit stamps only after the insert succeeded.
    ///
    /// ## Returns
    /// * `Err(DbError::RowsAffected)` - `cannot insert new lessons`
    #[tracing::instrument(name = "LessonRepo.Create", skip_all, fields(course_id = %lesson.course_id))]
    pub async fn create(&self, db: &dyn Executor, lesson: &mut Lesson) -> DbResult<()> {
        let mut record = lesson.clone();
        if record.lesson_id.is_empty() {
            record.lesson_id = new_id();
        }
        record.set_timestamps(Utc::now());
        record.validate()?;

        let tag = db.exec(&insert_sql::<Lesson>(), record.values()).await?;
        if tag.rows_affected() != 1 {
            return Err(DbError::cannot_insert(Lesson::TABLE, tag.rows_affected()));
        }

        debug!(lesson_id = %record.lesson_id, "Lesson created");
        *lesson = record;
        Ok(())
    }

    /// Rewrites the schedule, staff and streaming state of an active lesson.
    ///
    /// ## Returns
    /// * `Err(DbError::RowsAffected)` - `cannot update lessons` when the
    ///   lesson is missing or deleted
    #[tracing::instrument(name = "LessonRepo.Update", skip_all, fields(lesson_id = %lesson.lesson_id))]
    pub async fn update(&self, db: &dyn Executor, lesson: &mut Lesson) -> DbResult<()> {
        lesson.validate()?;

        let updated_at = Utc::now();
        let mut query = QueryBuilder::new("UPDATE lessons SET");
        query
            .push_head_bind(" name = {}", &lesson.name)
            .push_head_bind(", start_time = {}", lesson.start_time)
            .push_head_bind(", end_time = {}", lesson.end_time)
            .push_head_bind(", lesson_type = {}", &lesson.lesson_type)
            .push_head_bind(", status = {}", &lesson.status)
            .push_head_bind(", teacher_id = {}", &lesson.teacher_id)
            .push_head_bind(", course_id = {}", &lesson.course_id)
            .push_head_bind(", stream_learner_counter = {}", lesson.stream_learner_counter)
            .push_head_bind(", learner_ids = {}", &lesson.learner_ids)
            .push_head_bind(", updated_at = {}", updated_at)
            .and_bind("lesson_id = {}", &lesson.lesson_id)
            .and_where("deleted_at IS NULL");
        let (sql, args) = query.build();

        let tag = db.exec(&sql, args).await?;
        expect_one(tag, "update", Lesson::TABLE)?;
        lesson.updated_at = updated_at;
        Ok(())
    }

    /// Makes `user_ids` the lesson's exact member set, in one batch.
    #[tracing::instrument(name = "LessonRepo.UpsertLessonMembers", skip_all, fields(lesson_id = %lesson_id, count = user_ids.len()))]
    pub async fn upsert_lesson_members(
        &self,
        db: &dyn Executor,
        lesson_id: &str,
        user_ids: &[String],
    ) -> DbResult<()> {
        let links: Vec<LessonMember> = user_ids
            .iter()
            .map(|id| LessonMember::new(lesson_id, id.as_str()))
            .collect();
        replace_links(db, lesson_id, "user_id", user_ids, &links, &LESSON_MEMBER_UPSERT).await
    }

    /// Makes `teacher_ids` the lesson's exact teacher set, in one batch.
    #[tracing::instrument(name = "LessonRepo.UpsertLessonTeachers", skip_all, fields(lesson_id = %lesson_id, count = teacher_ids.len()))]
    pub async fn upsert_lesson_teachers(
        &self,
        db: &dyn Executor,
        lesson_id: &str,
        teacher_ids: &[String],
    ) -> DbResult<()> {
        let links: Vec<LessonTeacher> = teacher_ids
            .iter()
            .map(|id| LessonTeacher::new(lesson_id, id.as_str()))
            .collect();
        replace_links(db, lesson_id, "teacher_id", teacher_ids, &links, &LESSON_TEACHER_UPSERT)
            .await
    }

    /// Makes `course_ids` the lesson's exact course set, in one batch.
    #[tracing::instrument(name = "LessonRepo.UpsertLessonCourses", skip_all, fields(lesson_id = %lesson_id, count = course_ids.len()))]
    pub async fn upsert_lesson_courses(
        &self,
        db: &dyn Executor,
        lesson_id: &str,
        course_ids: &[String],
    ) -> DbResult<()> {
        let links: Vec<LessonCourse> = course_ids
            .iter()
            .map(|id| LessonCourse::new(lesson_id, id.as_str()))
            .collect();
        replace_links(db, lesson_id, "course_id", course_ids, &links, &LESSON_COURSE_UPSERT).await
    }

    #[tracing::instrument(name = "LessonRepo.GetLearnerIDs", skip_all, fields(lesson_id = %lesson_id))]
    pub async fn get_learner_ids(&self, db: &dyn Executor, lesson_id: &str) -> DbResult<Vec<String>> {
        linked_ids::<LessonMember>(db, lesson_id, "user_id").await
    }

    #[tracing::instrument(name = "LessonRepo.GetTeacherIDs", skip_all, fields(lesson_id = %lesson_id))]
    pub async fn get_teacher_ids(&self, db: &dyn Executor, lesson_id: &str) -> DbResult<Vec<String>> {
        linked_ids::<LessonTeacher>(db, lesson_id, "teacher_id").await
    }

    #[tracing::instrument(name = "LessonRepo.GetCourseIDs", skip_all, fields(lesson_id = %lesson_id))]
    pub async fn get_course_ids(&self, db: &dyn Executor, lesson_id: &str) -> DbResult<Vec<String>> {
        linked_ids::<LessonCourse>(db, lesson_id, "course_id").await
    }

    /// Removes every member link of the lesson; returns how many went.
    #[tracing::instrument(name = "LessonRepo.DeleteLessonMembers", skip_all, fields(lesson_id = %lesson_id))]
    pub async fn delete_lesson_members(&self, db: &dyn Executor, lesson_id: &str) -> DbResult<u64> {
        delete_links::<LessonMember>(db, lesson_id).await
    }

    #[tracing::instrument(name = "LessonRepo.DeleteLessonTeachers", skip_all, fields(lesson_id = %lesson_id))]
    pub async fn delete_lesson_teachers(&self, db: &dyn Executor, lesson_id: &str) -> DbResult<u64> {
        delete_links::<LessonTeacher>(db, lesson_id).await
    }

    #[tracing::instrument(name = "LessonRepo.DeleteLessonCourses", skip_all, fields(lesson_id = %lesson_id))]
    pub async fn delete_lesson_courses(&self, db: &dyn Executor, lesson_id: &str) -> DbResult<u64> {
        delete_links::<LessonCourse>(db, lesson_id).await
    }

    #[tracing::instrument(name = "LessonRepo.SoftDelete", skip_all, fields(count = lesson_ids.len()))]
    pub async fn soft_delete(&self, db: &dyn Executor, lesson_ids: &[String]) -> DbResult<u64> {
        let mut query =
            QueryBuilder::new("UPDATE lessons SET deleted_at = NOW(), updated_at = NOW()");
        query
            .and_bind("lesson_id = ANY({})", lesson_ids)
            .and_where("deleted_at IS NULL");
        let (sql, args) = query.build();

        Ok(db.exec(&sql, args).await?.rows_affected())
    }
}

// =============================================================================
// Link Helpers
// =============================================================================

/// Deletes the lesson's links outside `member_ids`, then upserts one link per
/// id. Every link is validated before the batch is sent.
async fn replace_links<E: Entity + Clone>(
    db: &dyn Executor,
    lesson_id: &str,
    member_column: &str,
    member_ids: &[String],
    links: &[E],
    upsert: &Upsert,
) -> DbResult<()> {
    validate_id("lesson_id", lesson_id)?;

    let mut batch = Batch::new();
    batch.queue(
        format!(
            "DELETE FROM {} WHERE lesson_id = $1 AND NOT ({} = ANY($2))",
            E::TABLE,
            member_column
        ),
        vec![lesson_id.into(), member_ids.into()],
    );
    let stamped = queue_upserts(&mut batch, links, upsert, Utc::now())?;

    let mut results = db.send_batch(batch).await;
    let removed = results.exec().context("batchResults.Exec")?;
    for _ in stamped.iter() {
        let tag = results.exec().context("batchResults.Exec")?;
        if tag.rows_affected() != 1 {
            return Err(DbError::cannot_upsert(E::TABLE, tag.rows_affected()));
        }
    }

    debug!(
        table = E::TABLE,
        removed = removed.rows_affected(),
        kept = stamped.len(),
        "Lesson links replaced"
    );
    Ok(())
}

async fn linked_ids<E: Entity>(
    db: &dyn Executor,
    lesson_id: &str,
    member_column: &str,
) -> DbResult<Vec<String>> {
    let mut query = QueryBuilder::new(format!("SELECT {} FROM {}", member_column, E::TABLE));
    query
        .and_bind("lesson_id = {}", lesson_id)
        .order_by(member_column);
    let (sql, args) = query.build();

    scan_column(db.query(&sql, args).await?, member_column)
}

async fn delete_links<E: Entity>(db: &dyn Executor, lesson_id: &str) -> DbResult<u64> {
    let mut query = QueryBuilder::new(format!("DELETE FROM {}", E::TABLE));
    query.and_bind("lesson_id = {}", lesson_id);
    let (sql, args) = query.build();

    Ok(db.exec(&sql, args).await?.rows_affected())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::StatementResult;
    use crate::query::for_update;
    use crate::testing::{assert_round_trip, fixtures, row_of, MockExecutor};

    #[test]
    fn test_round_trip() {
        assert_round_trip(&fixtures::lesson("lesson-1", "course-1"));
        assert_round_trip(&LessonMember::new("lesson-1", "student-1"));
        assert_round_trip(&LessonTeacher::new("lesson-1", "teacher-1"));
        assert_round_trip(&LessonCourse::new("lesson-1", "course-1"));
    }

    #[tokio::test]
    async fn test_create_assigns_id_on_success() {
        let db = MockExecutor::new();
        let mut lesson = fixtures::lesson("", "course-1");

        LessonRepository.create(&db, &mut lesson).await.unwrap();

        assert!(!lesson.lesson_id.is_empty());
        let stmt = db.last().unwrap();
        assert!(stmt.sql.starts_with("INSERT INTO lessons (lesson_id,name,course_id"));
        assert_eq!(stmt.args[0], SqlValue::from(lesson.lesson_id.as_str()));
    }

    #[tokio::test]
    async fn test_create_zero_rows_keeps_record() {
        let db = MockExecutor::new();
        db.push_affected(0);
        let mut lesson = fixtures::lesson("", "course-1");
        let before = lesson.clone();

        let err = LessonRepository.create(&db, &mut lesson).await.unwrap_err();

        assert_eq!(err.to_string(), "cannot insert new lessons");
        assert_eq!(lesson, before);
    }

    #[tokio::test]
    async fn test_update_sets_fields_of_active_lesson() {
        let db = MockExecutor::new();
        let mut lesson = fixtures::lesson("lesson-1", "course-1");
        let before = lesson.updated_at;

        LessonRepository.update(&db, &mut lesson).await.unwrap();

        let stmt = db.last().unwrap();
        assert!(stmt.sql.starts_with("UPDATE lessons SET name = $1, start_time = $2"));
        assert!(stmt.sql.ends_with("updated_at = $10 WHERE lesson_id = $11 AND deleted_at IS NULL"));
        assert!(!stmt.sql.contains("created_at"));
        assert_eq!(stmt.args[10], SqlValue::from("lesson-1"));
        assert!(lesson.updated_at >= before);
    }

    #[tokio::test]
    async fn test_update_missing_lesson() {
        let db = MockExecutor::new();
        db.push_affected(0);
        let mut lesson = fixtures::lesson("gone", "course-1");
        let before = lesson.clone();

        let err = LessonRepository.update(&db, &mut lesson).await.unwrap_err();

        assert_eq!(err.to_string(), "cannot update lessons");
        assert_eq!(lesson, before);
    }

    #[tokio::test]
    async fn test_upsert_lesson_members_replaces_set() {
        let db = MockExecutor::new();
        db.push_batch(vec![
            Ok(StatementResult::affected(3)),
            Ok(StatementResult::affected(1)),
            Ok(StatementResult::affected(1)),
        ]);
        let user_ids = vec!["student-1".to_string(), "student-2".to_string()];

        LessonRepository
            .upsert_lesson_members(&db, "lesson-1", &user_ids)
            .await
            .unwrap();

        let batch = &db.batches()[0];
        assert_eq!(batch.len(), 3);
        let delete = &batch.statements()[0];
        assert_eq!(
            delete.sql,
            "DELETE FROM lesson_members WHERE lesson_id = $1 AND NOT (user_id = ANY($2))"
        );
        assert_eq!(
            delete.args,
            vec![SqlValue::from("lesson-1"), SqlValue::from(user_ids.clone())]
        );
        assert!(batch.statements()[1].sql.ends_with(
            "ON CONFLICT ON CONSTRAINT lesson_members_pk DO UPDATE SET updated_at = EXCLUDED.updated_at"
        ));
        assert_eq!(batch.statements()[2].args[1], SqlValue::from("student-2"));
    }

    #[tokio::test]
    async fn test_upsert_lesson_teachers_empty_set_only_deletes() {
        let db = MockExecutor::new();

        LessonRepository
            .upsert_lesson_teachers(&db, "lesson-1", &[])
            .await
            .unwrap();

        let batch = &db.batches()[0];
        assert_eq!(batch.len(), 1);
        assert!(batch.statements()[0].sql.starts_with("DELETE FROM lessons_teachers"));
    }

    #[tokio::test]
    async fn test_upsert_lesson_courses_fails_fast() {
        let db = MockExecutor::new();
        db.push_batch(vec![
            Ok(StatementResult::affected(0)),
            Err(DbError::ForeignKeyViolation {
                message: "lessons_courses_lesson_id_fk".to_string(),
            }),
            Ok(StatementResult::affected(1)),
        ]);
        let course_ids = vec!["course-1".to_string(), "course-2".to_string()];

        let err = LessonRepository
            .upsert_lesson_courses(&db, "lesson-1", &course_ids)
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "batchResults.Exec: Foreign key violation: lessons_courses_lesson_id_fk"
        );
    }

    #[tokio::test]
    async fn test_upsert_links_rejects_empty_id_before_sending() {
        let db = MockExecutor::new();
        let user_ids = vec!["student-1".to_string(), String::new()];

        let err = LessonRepository
            .upsert_lesson_members(&db, "lesson-1", &user_ids)
            .await
            .unwrap_err();

        assert!(matches!(err, DbError::Validation(_)));
        assert!(db.batches().is_empty());
    }

    #[tokio::test]
    async fn test_get_teacher_ids() {
        let db = MockExecutor::new();
        db.push_rows(vec![
            row_of(&LessonTeacher::new("lesson-1", "teacher-1")),
            row_of(&LessonTeacher::new("lesson-1", "teacher-2")),
        ]);

        let ids = LessonRepository.get_teacher_ids(&db, "lesson-1").await.unwrap();

        assert_eq!(ids, vec!["teacher-1".to_string(), "teacher-2".to_string()]);
        assert_eq!(
            db.last().unwrap().sql,
            "SELECT teacher_id FROM lessons_teachers WHERE lesson_id = $1 ORDER BY teacher_id"
        );
    }

    #[tokio::test]
    async fn test_delete_lesson_members_is_hard_delete() {
        let db = MockExecutor::new();
        db.push_affected(4);

        let removed = LessonRepository
            .delete_lesson_members(&db, "lesson-1")
            .await
            .unwrap();

        assert_eq!(removed, 4);
        assert_eq!(
            db.last().unwrap().sql,
            "DELETE FROM lesson_members WHERE lesson_id = $1"
        );
    }

    #[tokio::test]
    async fn test_find_first_page() {
        let db = MockExecutor::new();
        db.push_rows(vec![row_of(&fixtures::lesson("lesson-2", "course-1"))]);
        let filter = LessonFilter {
            course_ids: Some(vec!["course-1".to_string()]),
            ..Default::default()
        };

        let lessons = LessonRepository.find(&db, &filter).await.unwrap();

        assert_eq!(lessons.len(), 1);
        let stmt = db.last().unwrap();
        assert!(stmt.sql.contains(
            "WHERE deleted_at IS NULL AND ($1::text[] IS NULL OR course_id = ANY($1)) \
             AND ($2::text IS NULL OR teacher_id = $2) AND ($3::text IS NULL OR status = $3) \
             ORDER BY created_at DESC, lesson_id DESC LIMIT $4"
        ));
        assert_eq!(stmt.args[3], SqlValue::from(10_i64));
    }

    #[tokio::test]
    async fn test_find_after_cursor() {
        let db = MockExecutor::new();
        let last = fixtures::lesson("lesson-9", "course-1");
        let filter = LessonFilter {
            after: Some(LessonCursor::from(&last)),
            limit: 3,
            ..Default::default()
        };

        LessonRepository.find(&db, &filter).await.unwrap();

        let stmt = db.last().unwrap();
        assert!(stmt.sql.contains("AND (created_at, lesson_id) < ($4, $5)"));
        assert_eq!(stmt.args[3], SqlValue::from(last.created_at));
        assert_eq!(stmt.args[5], SqlValue::from(3_i64));
    }

    #[tokio::test]
    async fn test_get_streaming_learners_locks() {
        let db = MockExecutor::new();
        db.push_rows(vec![Row::from_pairs([(
            "learner_ids",
            SqlValue::from(vec!["s1".to_string(), "s2".to_string()]),
        )])]);

        let learners = LessonRepository
            .get_streaming_learners(&db, "lesson-1", &[for_update])
            .await
            .unwrap();

        assert_eq!(learners, vec!["s1".to_string(), "s2".to_string()]);
        assert!(db.last().unwrap().sql.ends_with("FOR UPDATE"));
    }

    #[tokio::test]
    async fn test_get_streaming_learners_missing_lesson() {
        let db = MockExecutor::new();

        let err = LessonRepository
            .get_streaming_learners(&db, "gone", &[])
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "lessons not found: gone");
    }

    #[tokio::test]
    async fn test_increase_streaming_full() {
        let db = MockExecutor::new();
        db.push_affected(0);

        let err = LessonRepository
            .increase_streaming(&db, "lesson-1", "s3", 2)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "cannot update lessons");
        let stmt = db.last().unwrap();
        assert_eq!(
            stmt.sql,
            "UPDATE lessons SET updated_at = NOW(), stream_learner_counter = stream_learner_counter + 1, \
             learner_ids = array_append(learner_ids, $1) WHERE lesson_id = $2 AND deleted_at IS NULL \
             AND stream_learner_counter < $3 AND NOT ($1 = ANY(learner_ids))"
        );
        assert_eq!(
            stmt.args,
            vec![SqlValue::from("s3"), SqlValue::from("lesson-1"), SqlValue::from(2_i32)]
        );
    }

    #[tokio::test]
    async fn test_decrease_streaming_takes_one_row() {
        let db = MockExecutor::new();

        LessonRepository
            .decrease_streaming(&db, "lesson-1", "s1")
            .await
            .unwrap();

        let sql = db.last().unwrap().sql;
        assert!(sql.contains("array_remove(learner_ids, $1)"));
        assert!(sql.ends_with("AND stream_learner_counter > 0 AND $1 = ANY(learner_ids)"));
    }
}
