//! # Test Support
//!
//! A scripted [`Executor`] and record fixtures, so repository behavior can
//! be checked without a running Postgres.
//!
//! ## Scripting
//! ```text
//! db.push_affected(1)              next exec()  → Ok(CommandTag(1))
//! db.push_rows(vec![row])          next query() → Ok(Rows[row])
//! db.push_error(err)               next exec()/query() → Err(err)
//! db.push_batch(vec![Ok(..), ..])  next send_batch() → those results
//!
//! Nothing scripted: exec → 1 row, query → no rows,
//!                   send_batch → 1 row per statement
//! ```
//!
//! Every statement is recorded; read them back with
//! [`MockExecutor::executed`] and [`MockExecutor::batches`].

use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::batch::{Batch, BatchResults, Statement, StatementResult};
use crate::entity::Entity;
use crate::error::{DbError, DbResult};
use crate::executor::{CommandTag, Executor, Rows};
use crate::value::{Row, SqlValue};

// =============================================================================
// MockExecutor
// =============================================================================

#[derive(Debug)]
enum Response {
    Affected(u64),
    Rows(Vec<Row>, Option<DbError>),
    Error(DbError),
}

#[derive(Debug, Default)]
struct State {
    responses: VecDeque<Response>,
    batch_responses: VecDeque<Vec<DbResult<StatementResult>>>,
    executed: Vec<Statement>,
    batches: Vec<Batch>,
}

/// In-memory [`Executor`] answering from a script.
#[derive(Debug, Default)]
pub struct MockExecutor {
    state: Mutex<State>,
}

impl MockExecutor {
    pub fn new() -> Self {
        MockExecutor::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Next single statement touches `n` rows.
    pub fn push_affected(&self, n: u64) {
        self.state().responses.push_back(Response::Affected(n));
    }

    /// Next single statement returns `rows`.
    pub fn push_rows(&self, rows: Vec<Row>) {
        self.state().responses.push_back(Response::Rows(rows, None));
    }

    /// Next query returns `rows`, then its cursor fails with `err`.
    pub fn push_rows_then_error(&self, rows: Vec<Row>, err: DbError) {
        self.state()
            .responses
            .push_back(Response::Rows(rows, Some(err)));
    }

    /// Next single statement fails with `err`.
    pub fn push_error(&self, err: DbError) {
        self.state().responses.push_back(Response::Error(err));
    }

    /// Next batch answers with `results`, one per queued statement.
    pub fn push_batch(&self, results: Vec<DbResult<StatementResult>>) {
        self.state().batch_responses.push_back(results);
    }

    /// Single statements run so far, in order.
    pub fn executed(&self) -> Vec<Statement> {
        self.state().executed.clone()
    }

    /// The most recent single statement.
    pub fn last(&self) -> Option<Statement> {
        self.state().executed.last().cloned()
    }

    /// Batches sent so far, in order.
    pub fn batches(&self) -> Vec<Batch> {
        self.state().batches.clone()
    }

    fn record(&self, sql: &str, args: Vec<SqlValue>) -> Option<Response> {
        let mut state = self.state();
        state.executed.push(Statement {
            sql: sql.to_string(),
            args,
        });
        state.responses.pop_front()
    }
}

#[async_trait]
impl Executor for MockExecutor {
    async fn exec(&self, sql: &str, args: Vec<SqlValue>) -> DbResult<CommandTag> {
        match self.record(sql, args) {
            None => Ok(CommandTag::new(1)),
            Some(Response::Affected(n)) => Ok(CommandTag::new(n)),
            Some(Response::Rows(rows, None)) => Ok(CommandTag::new(rows.len() as u64)),
            Some(Response::Rows(_, Some(err))) | Some(Response::Error(err)) => Err(err),
        }
    }

    async fn query(&self, sql: &str, args: Vec<SqlValue>) -> DbResult<Rows> {
        match self.record(sql, args) {
            None | Some(Response::Affected(_)) => Ok(Rows::new(Vec::new())),
            Some(Response::Rows(rows, None)) => Ok(Rows::new(rows)),
            Some(Response::Rows(rows, Some(err))) => Ok(Rows::with_error(rows, err)),
            Some(Response::Error(err)) => Err(err),
        }
    }

    async fn send_batch(&self, batch: Batch) -> BatchResults {
        let mut state = self.state();
        let results = state.batch_responses.pop_front().unwrap_or_else(|| {
            (0..batch.len())
                .map(|_| Ok(StatementResult::affected(1)))
                .collect()
        });
        state.batches.push(batch);
        BatchResults::new(results)
    }
}

// =============================================================================
// Mapping Checks
// =============================================================================

/// Scans `record`'s own values back through [`Entity::from_row`] and checks
/// nothing was lost.
pub fn assert_round_trip<E>(record: &E)
where
    E: Entity + PartialEq + Debug,
{
    let (fields, values) = record.field_map();
    assert_eq!(
        fields.len(),
        values.len(),
        "{}: FIELDS and values() disagree",
        E::TABLE
    );
    let row = Row::new(fields.iter().map(|f| f.to_string()).collect(), values);
    let scanned = E::from_row(&row).unwrap_or_else(|e| panic!("{}: {e}", E::TABLE));
    assert_eq!(&scanned, record);
}

/// A row holding `record` exactly as a `SELECT <fields>` would return it.
pub fn row_of<E: Entity>(record: &E) -> Row {
    let (fields, values) = record.field_map();
    Row::new(fields.iter().map(|f| f.to_string()).collect(), values)
}

// =============================================================================
// Fixtures
// =============================================================================

/// Valid records with their references filled in.
pub mod fixtures {
    use chrono::{Duration, Utc};
    use serde_json::json;
    use syllabus_core::*;

    pub fn book(id: &str) -> Book {
        let mut book = Book::new(id, format!("Book {id}"));
        book.country = Some("COUNTRY_VN".to_string());
        book.subject = Some("SUBJECT_MATHS".to_string());
        book.grade = Some(5);
        book.school_id = 1;
        book
    }

    pub fn chapter(id: &str, book_id: &str) -> Chapter {
        let mut chapter = Chapter::new(id, format!("Chapter {id}"));
        chapter.book_id = Some(book_id.to_string());
        chapter.school_id = 1;
        chapter.display_order = 1;
        chapter
    }

    pub fn topic(id: &str) -> Topic {
        let mut topic = Topic::new(id, format!("Topic {id}"));
        topic.chapter_id = Some("chapter-1".to_string());
        topic.school_id = 1;
        topic.display_order = 1;
        topic.attachment_names = vec!["worksheet.pdf".to_string()];
        topic.attachment_urls = vec!["https://cdn.test/worksheet.pdf".to_string()];
        topic
    }

    pub fn assignment(id: &str, topic_id: &str) -> Assignment {
        let mut assignment = Assignment::new(id, format!("Assignment {id}"));
        assignment.topic_id = Some(topic_id.to_string());
        assignment.original_topic = Some(topic_id.to_string());
        assignment.max_grade = 10;
        assignment.content = json!({"topic_id": topic_id, "lo_id": ["lo-1"]});
        assignment
    }

    pub fn quiz(external_id: &str) -> Quiz {
        let mut quiz = Quiz::new(external_id, QuizType::MultipleChoice);
        quiz.school_id = 1;
        quiz.lo_ids = vec!["lo-1".to_string()];
        quiz.question = json!({"raw": "2 + 2 = ?"});
        quiz.options = json!([{"raw": "4", "correct": true}, {"raw": "5", "correct": false}]);
        quiz.created_by = Some("teacher-1".to_string());
        quiz
    }

    pub fn lesson(id: &str, course_id: &str) -> Lesson {
        let mut lesson = Lesson::new(id, course_id);
        lesson.name = format!("Lesson {id}");
        lesson.teacher_id = Some("teacher-1".to_string());
        lesson.end_time = lesson.start_time + Duration::hours(1);
        lesson.learner_ids = vec!["student-1".to_string(), "student-2".to_string()];
        lesson
    }

    pub fn study_plan(id: &str) -> StudyPlan {
        let mut plan = StudyPlan::new(id, format!("Plan {id}"));
        plan.course_id = Some("course-1".to_string());
        plan.book_id = Some("book-1".to_string());
        plan.school_id = 1;
        plan
    }

    pub fn preset_study_plan(id: &str) -> PresetStudyPlan {
        let mut plan = PresetStudyPlan::new(id, format!("Preset {id}"));
        plan.country = "COUNTRY_VN".to_string();
        plan.grade = 5;
        plan.subject = "SUBJECT_MATHS".to_string();
        plan
    }

    pub fn preset_weekly(id: &str, plan_id: &str, topic_id: &str, week: i32) -> PresetStudyPlanWeekly {
        let mut weekly = PresetStudyPlanWeekly::new(id, plan_id, topic_id, week);
        weekly.start_date = Some(Utc::now());
        weekly.end_date = Some(Utc::now() + Duration::days(7));
        weekly
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
