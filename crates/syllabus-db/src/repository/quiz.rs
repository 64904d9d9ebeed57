//! # Quiz Repositories
//!
//! Quizzes are addressed by `external_id` within a school; `quiz_id` is
//! the storage key and is generated when a quiz is first written.
//!
//! ## Upsert With Returned Ids
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  quizzes: [q1 (no id), q2 (no id)]                                      │
//! │       │  fresh uuid for each empty quiz_id                              │
//! │       ▼                                                                 │
//! │  INSERT ... ON CONFLICT ON CONSTRAINT quizzes_external_id_school_id_un  │
//! │  DO UPDATE SET ... RETURNING quiz_id          (one per quiz, batched)   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  results.query_row() × n                                                │
//! │    new external_id      → the generated id comes back                   │
//! │    existing external_id → the stored id comes back                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ids written into the caller's records only after every row was read    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use syllabus_core::validation::validate_id;
use syllabus_core::{new_id, Quiz, QuizSet, QuizStatus, ValidationError};
use tracing::debug;

use crate::batch::Batch;
use crate::entity::{insert_sql, prefixed_columns, upsert_sql, Conflict, Entity, Upsert};
use crate::error::{DbError, DbResult, ResultExt};
use crate::executor::{Executor, Rows};
use crate::mapper::{find_all, find_one, scan_column};
use crate::query::{Page, QueryBuilder};
use crate::repository::expect_some;
use crate::value::{Row, SqlValue};

impl Entity for Quiz {
    const TABLE: &'static str = "quizzes";
    const FIELDS: &'static [&'static str] = &[
        "quiz_id",
        "country",
        "school_id",
        "lo_ids",
        "external_id",
        "kind",
        "question",
        "explanation",
        "options",
        "tagged_los",
        "difficulty_level",
        "point",
        "question_tag_ids",
        "created_by",
        "approved_by",
        "status",
        "created_at",
        "updated_at",
        "deleted_at",
    ];
    const PRIMARY_KEY: &'static [&'static str] = &["quiz_id"];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            (&self.quiz_id).into(),
            (&self.country).into(),
            self.school_id.into(),
            (&self.lo_ids).into(),
            (&self.external_id).into(),
            self.kind.as_str().into(),
            (&self.question).into(),
            (&self.explanation).into(),
            (&self.options).into(),
            (&self.tagged_los).into(),
            self.difficulty_level.into(),
            self.point.into(),
            (&self.question_tag_ids).into(),
            (&self.created_by).into(),
            (&self.approved_by).into(),
            self.status.as_str().into(),
            self.created_at.into(),
            self.updated_at.into(),
            self.deleted_at.into(),
        ]
    }

    fn from_row(row: &Row) -> DbResult<Self> {
        Ok(Quiz {
            quiz_id: row.get("quiz_id")?,
            country: row.get("country")?,
            school_id: row.get("school_id")?,
            lo_ids: row.get("lo_ids")?,
            external_id: row.get("external_id")?,
            kind: row.get_parsed("kind")?,
            question: row.get("question")?,
            explanation: row.get("explanation")?,
            options: row.get("options")?,
            tagged_los: row.get("tagged_los")?,
            difficulty_level: row.get("difficulty_level")?,
            point: row.get("point")?,
            question_tag_ids: row.get("question_tag_ids")?,
            created_by: row.get("created_by")?,
            approved_by: row.get("approved_by")?,
            status: row.get_parsed("status")?,
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
        Quiz::validate(self)
    }
}

impl Entity for QuizSet {
    const TABLE: &'static str = "quiz_sets";
    const FIELDS: &'static [&'static str] = &[
        "quiz_set_id",
        "lo_id",
        "quiz_external_ids",
        "status",
        "created_at",
        "updated_at",
        "deleted_at",
    ];
    const PRIMARY_KEY: &'static [&'static str] = &["quiz_set_id"];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            (&self.quiz_set_id).into(),
            (&self.lo_id).into(),
            (&self.quiz_external_ids).into(),
            self.status.as_str().into(),
            self.created_at.into(),
            self.updated_at.into(),
            self.deleted_at.into(),
        ]
    }

    fn from_row(row: &Row) -> DbResult<Self> {
        Ok(QuizSet {
            quiz_set_id: row.get("quiz_set_id")?,
            lo_id: row.get("lo_id")?,
            quiz_external_ids: row.get("quiz_external_ids")?,
            status: row.get_parsed("status")?,
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
        validate_id("quiz_set_id", &self.quiz_set_id)?;
        validate_id("lo_id", &self.lo_id)
    }
}

/// The stored `quiz_id`, `created_by` and `created_at` survive a conflict.
pub(crate) const QUIZ_UPSERT: Upsert = Upsert {
    conflict: Conflict::Constraint("quizzes_external_id_school_id_un"),
    update: &[
        "country",
        "lo_ids",
        "kind",
        "question",
        "explanation",
        "options",
        "tagged_los",
        "difficulty_level",
        "point",
        "question_tag_ids",
        "approved_by",
        "status",
        "updated_at",
        "deleted_at",
    ],
};

const DEFAULT_LIMIT: u32 = 10;

// =============================================================================
// QuizRepository
// =============================================================================

/// Filters for [`QuizRepository::retrieve`]; `None` keeps the predicate
/// but makes it always true.
#[derive(Debug, Clone, Default)]
pub struct QuizFilter {
    pub school_id: Option<i32>,
    /// Quizzes tagged with any of these learning objectives.
    pub lo_ids: Option<Vec<String>>,
    pub external_ids: Option<Vec<String>>,
    pub kind: Option<String>,
    pub status: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

/// Repository for `quizzes`.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuizRepository;

impl QuizRepository {
    /// Inserts one quiz.
    ///
    /// An empty `quiz_id` is replaced with a fresh one, but the caller's
    /// record only receives it once the insert succeeded.
    ///
    /// ## Returns
    /// * `Err(DbError::RowsAffected)` - `cannot insert new quizzes`
    #[tracing::instrument(name = "QuizRepo.Create", skip_all, fields(external_id = %quiz.external_id))]
    pub async fn create(&self, db: &dyn Executor, quiz: &mut Quiz) -> DbResult<()> {
        let mut record = quiz.clone();
        if record.quiz_id.is_empty() {
            record.quiz_id = new_id();
        }
        record.set_timestamps(Utc::now());
        record.validate()?;

        let tag = db.exec(&insert_sql::<Quiz>(), record.values()).await?;
        if tag.rows_affected() != 1 {
            return Err(DbError::cannot_insert(Quiz::TABLE, tag.rows_affected()));
        }

        *quiz = record;
        Ok(())
    }

    /// Inserts or updates quizzes by `(external_id, school_id)` in one batch
    /// and fills in each record's stored `quiz_id`.
    ///
    /// Results are read in order; the first failure is returned as
    /// `batchResults.QueryRow: <cause>` and the records are left untouched.
    #[tracing::instrument(name = "QuizRepo.Upsert", skip_all, fields(count = quizzes.len()))]
    pub async fn upsert(&self, db: &dyn Executor, quizzes: &mut [Quiz]) -> DbResult<()> {
        for quiz in quizzes.iter() {
            quiz.validate()?;
        }
        if quizzes.is_empty() {
            return Ok(());
        }

        let sql = format!("{} RETURNING quiz_id", upsert_sql::<Quiz>(&QUIZ_UPSERT)?);
        let now = Utc::now();
        let mut records = quizzes.to_vec();
        let mut batch = Batch::new();
        for record in records.iter_mut() {
            if record.quiz_id.is_empty() {
                record.quiz_id = new_id();
            }
            record.set_timestamps(now);
            batch.queue(sql.clone(), record.values());
        }

        let mut results = db.send_batch(batch).await;
        for record in records.iter_mut() {
            let row = results.query_row().context("batchResults.QueryRow")?;
            record.quiz_id = row.get("quiz_id")?;
        }

        debug!(count = records.len(), "Quizzes upserted");
        quizzes.clone_from_slice(&records);
        Ok(())
    }

    #[tracing::instrument(name = "QuizRepo.Retrieve", skip_all)]
    pub async fn retrieve(&self, db: &dyn Executor, filter: &QuizFilter) -> DbResult<Vec<Quiz>> {
        let mut query = QueryBuilder::select::<Quiz>();
        query
            .and_where("deleted_at IS NULL")
            .and_nullable("({}::int IS NULL OR school_id = {})", filter.school_id)
            .and_nullable("({}::text[] IS NULL OR lo_ids && {})", filter.lo_ids.clone())
            .and_nullable(
                "({}::text[] IS NULL OR external_id = ANY({}))",
                filter.external_ids.clone(),
            )
            .and_nullable("({}::text IS NULL OR kind = {})", filter.kind.as_deref())
            .and_nullable("({}::text IS NULL OR status = {})", filter.status.as_deref())
            .order_by("created_at, quiz_id")
            .paginate(Page::offset(filter.limit, filter.offset, DEFAULT_LIMIT));
        let (sql, args) = query.build();

        find_all(db, &sql, args).await
    }

    #[tracing::instrument(name = "QuizRepo.GetByExternalID", skip_all, fields(external_id = %external_id, school_id = school_id))]
    pub async fn get_by_external_id(
        &self,
        db: &dyn Executor,
        external_id: &str,
        school_id: i32,
    ) -> DbResult<Quiz> {
        let mut query = QueryBuilder::select::<Quiz>();
        query
            .and_bind("external_id = {}", external_id)
            .and_bind("school_id = {}", school_id)
            .and_where("deleted_at IS NULL");
        let (sql, args) = query.build();

        find_one(db, &sql, args, external_id).await
    }

    /// Active quizzes of a school with the given external ids, in the order
    /// the ids were given. Unknown ids are skipped.
    #[tracing::instrument(name = "QuizRepo.GetByExternalIDs", skip_all, fields(count = external_ids.len(), school_id = school_id))]
    pub async fn get_by_external_ids(
        &self,
        db: &dyn Executor,
        external_ids: &[String],
        school_id: i32,
    ) -> DbResult<Vec<Quiz>> {
        let mut query = QueryBuilder::new(format!(
            "SELECT {} FROM quizzes q JOIN unnest(",
            prefixed_columns::<Quiz>("q")
        ));
        query
            .push_head_bind(
                "{}::text[]) WITH ORDINALITY AS wanted(external_id, position) \
                 ON q.external_id = wanted.external_id",
                external_ids,
            )
            .and_bind("q.school_id = {}", school_id)
            .and_where("q.deleted_at IS NULL")
            .order_by("wanted.position");
        let (sql, args) = query.build();

        find_all(db, &sql, args).await
    }

    /// Soft-deletes a quiz and marks it `QUIZ_STATUS_DELETED`.
    ///
    /// ## Returns
    /// * `Err(DbError::NotFound)` - no active quiz with that external id
    #[tracing::instrument(name = "QuizRepo.DeleteByExternalID", skip_all, fields(external_id = %external_id, school_id = school_id))]
    pub async fn delete_by_external_id(
        &self,
        db: &dyn Executor,
        external_id: &str,
        school_id: i32,
    ) -> DbResult<()> {
        let mut query =
            QueryBuilder::new("UPDATE quizzes SET deleted_at = NOW(), updated_at = NOW()");
        query
            .push_head_bind(", status = {}", QuizStatus::Deleted.as_str())
            .and_bind("external_id = {}", external_id)
            .and_bind("school_id = {}", school_id)
            .and_where("deleted_at IS NULL");
        let (sql, args) = query.build();

        let tag = db.exec(&sql, args).await?;
        expect_some(tag, Quiz::TABLE, external_id)?;
        Ok(())
    }
}

// =============================================================================
// QuizSetRepository
// =============================================================================

/// Repository for `quiz_sets`.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuizSetRepository;

impl QuizSetRepository {
    /// Inserts one quiz set; an empty id is generated and written back on
    /// success.
    #[tracing::instrument(name = "QuizSetRepo.Create", skip_all, fields(lo_id = %quiz_set.lo_id))]
    pub async fn create(&self, db: &dyn Executor, quiz_set: &mut QuizSet) -> DbResult<()> {
        let mut record = quiz_set.clone();
        if record.quiz_set_id.is_empty() {
            record.quiz_set_id = new_id();
        }
        record.set_timestamps(Utc::now());
        record.validate()?;

        let tag = db.exec(&insert_sql::<QuizSet>(), record.values()).await?;
        if tag.rows_affected() != 1 {
            return Err(DbError::cannot_insert(QuizSet::TABLE, tag.rows_affected()));
        }

        *quiz_set = record;
        Ok(())
    }

    /// The newest active quiz set of a learning objective.
    #[tracing::instrument(name = "QuizSetRepo.GetByLoID", skip_all, fields(lo_id = %lo_id))]
    pub async fn get_by_lo_id(&self, db: &dyn Executor, lo_id: &str) -> DbResult<QuizSet> {
        let mut query = QueryBuilder::select::<QuizSet>();
        query
            .and_bind("lo_id = {}", lo_id)
            .and_where("deleted_at IS NULL")
            .order_by("created_at DESC");
        let (sql, args) = query.build();

        find_one(db, &sql, args, lo_id).await
    }

    /// One page of a learning objective's quiz external ids, in set order.
    #[tracing::instrument(name = "QuizSetRepo.GetQuizExternalIDs", skip_all, fields(lo_id = %lo_id, limit = limit, offset = offset))]
    pub async fn get_quiz_external_ids(
        &self,
        db: &dyn Executor,
        lo_id: &str,
        limit: u32,
        offset: u32,
    ) -> DbResult<Vec<String>> {
        let mut query = QueryBuilder::new(
            "SELECT ids.quiz_external_id FROM quiz_sets qs \
             CROSS JOIN LATERAL unnest(qs.quiz_external_ids) WITH ORDINALITY AS ids(quiz_external_id, position)",
        );
        query
            .and_bind("qs.lo_id = {}", lo_id)
            .and_where("qs.deleted_at IS NULL")
            .order_by("ids.position")
            .paginate(Page::offset(limit, offset, DEFAULT_LIMIT));
        let (sql, args) = query.build();

        scan_column(db.query(&sql, args).await?, "quiz_external_id")
    }

    /// Number of quizzes in the active quiz set of each learning objective.
    ///
    /// Every requested id is present in the result; one without a set, or
    /// with an empty set, counts 0. When a learning objective has several
    /// active sets the newest one counts.
    #[tracing::instrument(name = "QuizSetRepo.GetTotalQuiz", skip_all, fields(count = lo_ids.len()))]
    pub async fn get_total_quiz(
        &self,
        db: &dyn Executor,
        lo_ids: &[String],
    ) -> DbResult<HashMap<String, i32>> {
        let mut query = QueryBuilder::new(
            "SELECT lo_id, array_length(quiz_external_ids, 1) AS total FROM quiz_sets",
        );
        query
            .and_bind("lo_id = ANY({})", lo_ids)
            .and_where("deleted_at IS NULL")
            .order_by("created_at, quiz_set_id");
        let (sql, args) = query.build();

        let mut totals: HashMap<String, i32> = scan_lo_totals(db.query(&sql, args).await?)?
            .into_iter()
            .map(|(lo_id, total)| (lo_id, total.unwrap_or(0)))
            .collect();
        for lo_id in lo_ids {
            totals.entry(lo_id.clone()).or_insert(0);
        }
        Ok(totals)
    }

    /// Quiz counts of approved quiz sets, keyed by learning objective.
    ///
    /// Learning objectives without an approved, non-empty set are absent.
    #[tracing::instrument(name = "QuizSetRepo.CountQuizOnLO", skip_all, fields(count = lo_ids.len()))]
    pub async fn count_quiz_on_lo(
        &self,
        db: &dyn Executor,
        lo_ids: &[String],
    ) -> DbResult<HashMap<String, i32>> {
        let mut query = QueryBuilder::new(
            "SELECT lo_id, array_length(quiz_external_ids, 1) AS total FROM quiz_sets",
        );
        query
            .and_bind("lo_id = ANY({})", lo_ids)
            .and_bind("status = {}", QuizStatus::Approved.as_str())
            .and_where("deleted_at IS NULL")
            .order_by("created_at, quiz_set_id");
        let (sql, args) = query.build();

        Ok(scan_lo_totals(db.query(&sql, args).await?)?
            .into_iter()
            .filter_map(|(lo_id, total)| total.map(|t| (lo_id, t)))
            .collect())
    }

    /// ## Returns
    /// * `Err(DbError::NotFound)` - no active quiz set with that id
    #[tracing::instrument(name = "QuizSetRepo.Delete", skip_all, fields(quiz_set_id = %quiz_set_id))]
    pub async fn delete(&self, db: &dyn Executor, quiz_set_id: &str) -> DbResult<()> {
        let mut query =
            QueryBuilder::new("UPDATE quiz_sets SET deleted_at = NOW(), updated_at = NOW()");
        query
            .and_bind("quiz_set_id = {}", quiz_set_id)
            .and_where("deleted_at IS NULL");
        let (sql, args) = query.build();

        let tag = db.exec(&sql, args).await?;
        expect_some(tag, QuizSet::TABLE, quiz_set_id)?;
        Ok(())
    }
}

/// `(lo_id, total)` pairs in row order; an empty array counts as NULL.
fn scan_lo_totals(mut rows: Rows) -> DbResult<Vec<(String, Option<i32>)>> {
    let mut totals = Vec::new();
    for row in rows.by_ref() {
        totals.push((row.get("lo_id")?, row.get("total")?));
    }
    rows.finish()?;
    Ok(totals)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::StatementResult;
    use crate::testing::{assert_round_trip, fixtures, row_of, MockExecutor};

    fn returned_id(id: &str) -> DbResult<StatementResult> {
        Ok(StatementResult::returning(vec![Row::from_pairs([(
            "quiz_id",
            SqlValue::from(id),
        )])]))
    }

    #[test]
    fn test_round_trip() {
        let mut quiz = fixtures::quiz("ext-1");
        quiz.quiz_id = "q1".to_string();
        assert_round_trip(&quiz);
        assert_round_trip(&QuizSet::new("lo-1", vec!["ext-1".to_string()]));
    }

    #[tokio::test]
    async fn test_create_failure_keeps_id_empty() {
        let db = MockExecutor::new();
        db.push_affected(0);
        let mut quiz = fixtures::quiz("ext-1");

        let err = QuizRepository.create(&db, &mut quiz).await.unwrap_err();

        assert_eq!(err.to_string(), "cannot insert new quizzes");
        assert!(quiz.quiz_id.is_empty());
    }

    #[tokio::test]
    async fn test_create_assigns_id() {
        let db = MockExecutor::new();
        let mut quiz = fixtures::quiz("ext-1");

        QuizRepository.create(&db, &mut quiz).await.unwrap();

        assert!(!quiz.quiz_id.is_empty());
        assert_eq!(db.last().unwrap().args[0], SqlValue::from(quiz.quiz_id.as_str()));
    }

    #[tokio::test]
    async fn test_upsert_takes_returned_ids() {
        let db = MockExecutor::new();
        db.push_batch(vec![returned_id("q-existing"), returned_id("q-new")]);
        let mut quizzes = vec![fixtures::quiz("ext-1"), fixtures::quiz("ext-2")];

        QuizRepository.upsert(&db, &mut quizzes).await.unwrap();

        assert_eq!(quizzes[0].quiz_id, "q-existing");
        assert_eq!(quizzes[1].quiz_id, "q-new");
        let batches = db.batches();
        let sql = &batches[0].statements()[0].sql;
        assert!(sql.contains("ON CONFLICT ON CONSTRAINT quizzes_external_id_school_id_un"));
        assert!(sql.ends_with("RETURNING quiz_id"));
    }

    #[tokio::test]
    async fn test_upsert_failure_labels_query_row() {
        let db = MockExecutor::new();
        db.push_batch(vec![
            returned_id("q1"),
            Err(DbError::UniqueViolation {
                constraint: "quizzes_pk".to_string(),
                message: "duplicate key".to_string(),
            }),
        ]);
        let mut quizzes = vec![fixtures::quiz("ext-1"), fixtures::quiz("ext-2")];

        let err = QuizRepository.upsert(&db, &mut quizzes).await.unwrap_err();

        assert!(err.to_string().starts_with("batchResults.QueryRow: Duplicate value"));
        assert!(quizzes.iter().all(|q| q.quiz_id.is_empty()));
    }

    #[tokio::test]
    async fn test_retrieve_fixed_placeholders() {
        let db = MockExecutor::new();
        let filter = QuizFilter {
            lo_ids: Some(vec!["lo-1".to_string()]),
            ..Default::default()
        };

        QuizRepository.retrieve(&db, &filter).await.unwrap();

        let stmt = db.last().unwrap();
        assert!(stmt.sql.contains("($2::text[] IS NULL OR lo_ids && $2)"));
        assert!(stmt.sql.ends_with("LIMIT $6 OFFSET $7"));
        assert!(stmt.args[0].is_null());
        assert_eq!(stmt.args[5], SqlValue::from(10_i64));
    }

    #[tokio::test]
    async fn test_get_by_external_id() {
        let db = MockExecutor::new();
        let mut quiz = fixtures::quiz("ext-1");
        quiz.quiz_id = "q1".to_string();
        db.push_rows(vec![row_of(&quiz)]);

        let found = QuizRepository.get_by_external_id(&db, "ext-1", 1).await.unwrap();

        assert_eq!(found, quiz);
        assert_eq!(
            db.last().unwrap().args,
            vec![SqlValue::from("ext-1"), SqlValue::from(1_i32)]
        );
    }

    #[tokio::test]
    async fn test_delete_by_external_id_not_found() {
        let db = MockExecutor::new();
        db.push_affected(0);

        let err = QuizRepository
            .delete_by_external_id(&db, "ext-9", 1)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "quizzes not found: ext-9");
        let stmt = db.last().unwrap();
        assert!(stmt.sql.starts_with(
            "UPDATE quizzes SET deleted_at = NOW(), updated_at = NOW(), status = $1 WHERE external_id = $2"
        ));
        assert_eq!(stmt.args[0], SqlValue::from("QUIZ_STATUS_DELETED"));
    }

    #[tokio::test]
    async fn test_get_quiz_external_ids_pages_in_order() {
        let db = MockExecutor::new();
        db.push_rows(vec![
            Row::from_pairs([("quiz_external_id", SqlValue::from("ext-3"))]),
            Row::from_pairs([("quiz_external_id", SqlValue::from("ext-4"))]),
        ]);

        let ids = QuizSetRepository
            .get_quiz_external_ids(&db, "lo-1", 0, 2)
            .await
            .unwrap();

        assert_eq!(ids, vec!["ext-3".to_string(), "ext-4".to_string()]);
        let stmt = db.last().unwrap();
        assert!(stmt.sql.ends_with("ORDER BY ids.position LIMIT $2 OFFSET $3"));
        assert_eq!(stmt.args[1], SqlValue::from(10_i64));
        assert_eq!(stmt.args[2], SqlValue::from(2_i64));
    }

    #[tokio::test]
    async fn test_quiz_set_delete_reports_not_found() {
        let db = MockExecutor::new();
        db.push_affected(0);

        let err = QuizSetRepository.delete(&db, "qs-1").await.unwrap_err();
        assert!(err.is_not_found());
    }

    fn lo_total(lo_id: &str, total: Option<i32>) -> Row {
        Row::from_pairs([("lo_id", SqlValue::from(lo_id)), ("total", SqlValue::from(total))])
    }

    #[tokio::test]
    async fn test_get_by_external_ids_keeps_requested_order() {
        let db = MockExecutor::new();
        let mut second = fixtures::quiz("ext-2");
        second.quiz_id = "q2".to_string();
        let mut first = fixtures::quiz("ext-1");
        first.quiz_id = "q1".to_string();
        db.push_rows(vec![row_of(&second), row_of(&first)]);
        let ids = vec!["ext-2".to_string(), "ext-1".to_string()];

        let quizzes = QuizRepository.get_by_external_ids(&db, &ids, 1).await.unwrap();

        assert_eq!(quizzes[0].external_id, "ext-2");
        let stmt = db.last().unwrap();
        assert!(stmt.sql.starts_with("SELECT q.quiz_id,"));
        assert!(stmt.sql.ends_with(
            "JOIN unnest($1::text[]) WITH ORDINALITY AS wanted(external_id, position) \
             ON q.external_id = wanted.external_id WHERE q.school_id = $2 AND q.deleted_at IS NULL \
             ORDER BY wanted.position"
        ));
        assert_eq!(stmt.args[0], SqlValue::from(ids));
    }

    #[tokio::test]
    async fn test_get_total_quiz_fills_missing_with_zero() {
        let db = MockExecutor::new();
        db.push_rows(vec![lo_total("lo-1", Some(3)), lo_total("lo-2", None)]);
        let lo_ids = vec!["lo-1".to_string(), "lo-2".to_string(), "lo-3".to_string()];

        let totals = QuizSetRepository.get_total_quiz(&db, &lo_ids).await.unwrap();

        assert_eq!(totals.len(), 3);
        assert_eq!(totals["lo-1"], 3);
        assert_eq!(totals["lo-2"], 0);
        assert_eq!(totals["lo-3"], 0);
    }

    #[tokio::test]
    async fn test_get_total_quiz_newest_set_wins() {
        let db = MockExecutor::new();
        db.push_rows(vec![lo_total("lo-1", Some(2)), lo_total("lo-1", Some(5))]);

        let totals = QuizSetRepository
            .get_total_quiz(&db, &["lo-1".to_string()])
            .await
            .unwrap();

        assert_eq!(totals["lo-1"], 5);
    }

    #[tokio::test]
    async fn test_count_quiz_on_lo_only_approved_non_empty() {
        let db = MockExecutor::new();
        db.push_rows(vec![lo_total("lo-1", Some(4)), lo_total("lo-2", None)]);
        let lo_ids = vec!["lo-1".to_string(), "lo-2".to_string(), "lo-3".to_string()];

        let counts = QuizSetRepository.count_quiz_on_lo(&db, &lo_ids).await.unwrap();

        assert_eq!(counts.len(), 1);
        assert_eq!(counts["lo-1"], 4);
        let stmt = db.last().unwrap();
        assert!(stmt.sql.contains("WHERE lo_id = ANY($1) AND status = $2 AND deleted_at IS NULL"));
        assert_eq!(stmt.args[1], SqlValue::from("QUIZ_STATUS_APPROVED"));
    }

    #[tokio::test]
    async fn test_count_quiz_on_lo_cursor_error_surfaces() {
        let db = MockExecutor::new();
        db.push_rows_then_error(vec![lo_total("lo-1", Some(4))], DbError::PoolExhausted);

        let err = QuizSetRepository
            .count_quiz_on_lo(&db, &["lo-1".to_string()])
            .await
            .unwrap_err();

        assert!(matches!(err, DbError::PoolExhausted));
    }
}
