//! # Topic Repository
//!
//! Topics belong to a chapter and are what students actually study.
//!
//! ## Book → Topics
//! ```text
//! books ──< chapters (book_id) ──< topics (chapter_id)
//!
//! find_by_book_ids: topics joined to their chapter, both active,
//! ordered chapter first, then topic display order
//! ```

use chrono::{DateTime, Utc};
use syllabus_core::{new_id, Topic, ValidationError};
use tracing::debug;

use crate::batch::upsert_each;
use crate::entity::{insert_sql, prefixed_columns, Conflict, Entity, Upsert};
use crate::error::{DbError, DbResult};
use crate::executor::Executor;
use crate::mapper::{find_all, find_one};
use crate::query::{Page, QueryBuilder, QueryEnhancer};
use crate::repository::expect_one;
use crate::value::{Row, SqlValue};

impl Entity for Topic {
    const TABLE: &'static str = "topics";
    const FIELDS: &'static [&'static str] = &[
        "topic_id",
        "name",
        "country",
        "grade",
        "subject",
        "topic_type",
        "status",
        "display_order",
        "chapter_id",
        "school_id",
        "icon_url",
        "total_los",
        "lo_display_order_counter",
        "essay_required",
        "instruction",
        "attachment_names",
        "attachment_urls",
        "copied_topic_id",
        "published_at",
        "created_at",
        "updated_at",
        "deleted_at",
    ];
    const PRIMARY_KEY: &'static [&'static str] = &["topic_id"];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            (&self.topic_id).into(),
            (&self.name).into(),
            (&self.country).into(),
            self.grade.into(),
            (&self.subject).into(),
            self.topic_type.as_str().into(),
            self.status.as_str().into(),
            self.display_order.into(),
            (&self.chapter_id).into(),
            self.school_id.into(),
            (&self.icon_url).into(),
            self.total_los.into(),
            self.lo_display_order_counter.into(),
            self.essay_required.into(),
            (&self.instruction).into(),
            (&self.attachment_names).into(),
            (&self.attachment_urls).into(),
            (&self.copied_topic_id).into(),
            self.published_at.into(),
            self.created_at.into(),
            self.updated_at.into(),
            self.deleted_at.into(),
        ]
    }

    fn from_row(row: &Row) -> DbResult<Self> {
        Ok(Topic {
            topic_id: row.get("topic_id")?,
            name: row.get("name")?,
            country: row.get("country")?,
            grade: row.get("grade")?,
            subject: row.get("subject")?,
            topic_type: row.get_parsed("topic_type")?,
            status: row.get_parsed("status")?,
            display_order: row.get("display_order")?,
            chapter_id: row.get("chapter_id")?,
            school_id: row.get("school_id")?,
            icon_url: row.get("icon_url")?,
            total_los: row.get("total_los")?,
            lo_display_order_counter: row.get("lo_display_order_counter")?,
            essay_required: row.get("essay_required")?,
            instruction: row.get("instruction")?,
            attachment_names: row.get("attachment_names")?,
            attachment_urls: row.get("attachment_urls")?,
            copied_topic_id: row.get("copied_topic_id")?,
            published_at: row.get("published_at")?,
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
        Topic::validate(self)
    }
}

/// Re-importing a topic replaces its content; counters (`total_los`,
/// `lo_display_order_counter`) and `copied_topic_id` keep their stored values.
pub(crate) const TOPIC_UPSERT: Upsert = Upsert {
    conflict: Conflict::Constraint("topics_pk"),
    update: &[
        "name",
        "country",
        "grade",
        "subject",
        "topic_type",
        "status",
        "display_order",
        "chapter_id",
        "school_id",
        "icon_url",
        "essay_required",
        "instruction",
        "attachment_names",
        "attachment_urls",
        "published_at",
        "updated_at",
        "deleted_at",
    ],
};

const DEFAULT_LIMIT: u32 = 10;

/// Repository for `topics`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TopicRepository;

impl TopicRepository {
    /// Inserts one topic.
    ///
    /// An empty `topic_id` gets a generated id. The id and timestamps are
    /// written back to `topic` only after the insert succeeded.
    ///
    /// ## Returns
    /// * `Err(DbError::RowsAffected)` - "cannot insert new topics"
    #[tracing::instrument(name = "TopicRepo.Create", skip_all)]
    pub async fn create(&self, db: &dyn Executor, topic: &mut Topic) -> DbResult<()> {
        let mut record = topic.clone();
        if record.topic_id.is_empty() {
            record.topic_id = new_id();
        }
        record.set_timestamps(Utc::now());
        record.validate()?;

        let tag = db.exec(&insert_sql::<Topic>(), record.values()).await?;
        if tag.rows_affected() != 1 {
            return Err(DbError::cannot_insert(Topic::TABLE, tag.rows_affected()));
        }

        debug!(topic_id = %record.topic_id, "Topic created");
        *topic = record;
        Ok(())
    }

    /// Gets an active topic by id.
    ///
    /// ## Returns
    /// * `Err(DbError::NotFound)` - no active topic with that id
    #[tracing::instrument(name = "TopicRepo.RetrieveByID", skip_all, fields(topic_id = %topic_id))]
    pub async fn retrieve_by_id(
        &self,
        db: &dyn Executor,
        topic_id: &str,
        enhancers: &[QueryEnhancer],
    ) -> DbResult<Topic> {
        let mut query = QueryBuilder::select::<Topic>();
        query
            .and_bind("topic_id = {}", topic_id)
            .and_where("deleted_at IS NULL")
            .enhance(enhancers);
        let (sql, args) = query.build();

        find_one(db, &sql, args, topic_id).await
    }

    /// Active topics with the given ids, in display order.
    #[tracing::instrument(name = "TopicRepo.RetrieveByIDs", skip_all, fields(count = topic_ids.len()))]
    pub async fn retrieve_by_ids(&self, db: &dyn Executor, topic_ids: &[String]) -> DbResult<Vec<Topic>> {
        let mut query = QueryBuilder::select::<Topic>();
        query
            .and_bind("topic_id = ANY({})", topic_ids)
            .and_where("deleted_at IS NULL")
            .order_by("display_order, topic_id");
        let (sql, args) = query.build();

        find_all(db, &sql, args).await
    }

    /// Active topics of active chapters in the given books.
    ///
    /// ## Arguments
    /// * `limit` - page size, 0 for the default (10)
    /// * `offset` - rows to skip
    #[tracing::instrument(name = "TopicRepo.FindByBookIDs", skip_all, fields(count = book_ids.len()))]
    pub async fn find_by_book_ids(
        &self,
        db: &dyn Executor,
        book_ids: &[String],
        limit: u32,
        offset: u32,
    ) -> DbResult<Vec<Topic>> {
        let mut query = QueryBuilder::new(format!(
            "SELECT {} FROM topics t JOIN chapters c ON t.chapter_id = c.chapter_id",
            prefixed_columns::<Topic>("t")
        ));
        query
            .and_bind("c.book_id = ANY({})", book_ids)
            .and_where("t.deleted_at IS NULL")
            .and_where("c.deleted_at IS NULL")
            .order_by("c.display_order, t.display_order, t.topic_id")
            .paginate(Page::offset(limit, offset, DEFAULT_LIMIT));
        let (sql, args) = query.build();

        find_all(db, &sql, args).await
    }

    /// Inserts or replaces topics in one batch.
    ///
    /// Every topic must reference a chapter; one that doesn't fails the call
    /// before anything is sent.
    ///
    /// ## Returns
    /// * `Err(DbError::Context)` - "batchResults.Exec: <cause>" on the first
    ///   failing statement
    #[tracing::instrument(name = "TopicRepo.BulkImport", skip_all, fields(count = topics.len()))]
    pub async fn bulk_import(&self, db: &dyn Executor, topics: &mut [Topic]) -> DbResult<()> {
        upsert_each(db, topics, &TOPIC_UPSERT).await
    }

    /// Sets the number of learning objectives in a topic.
    #[tracing::instrument(name = "TopicRepo.UpdateTotalLOs", skip_all, fields(topic_id = %topic_id))]
    pub async fn update_total_los(&self, db: &dyn Executor, topic_id: &str, total_los: i32) -> DbResult<()> {
        let mut query = QueryBuilder::new("UPDATE topics SET updated_at = NOW()");
        query
            .push_head_bind(", total_los = {}", total_los)
            .and_bind("topic_id = {}", topic_id)
            .and_where("deleted_at IS NULL");
        let (sql, args) = query.build();

        let tag = db.exec(&sql, args).await?;
        expect_one(tag, "update", Topic::TABLE)
    }

    /// Soft-deletes topics, returning how many were still active.
    #[tracing::instrument(name = "TopicRepo.SoftDelete", skip_all, fields(count = topic_ids.len()))]
    pub async fn soft_delete(&self, db: &dyn Executor, topic_ids: &[String]) -> DbResult<u64> {
        let mut query = QueryBuilder::new("UPDATE topics SET deleted_at = NOW(), updated_at = NOW()");
        query
            .and_bind("topic_id = ANY({})", topic_ids)
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
    use crate::query::for_share;
    use crate::testing::{assert_round_trip, fixtures, row_of, MockExecutor};

    #[test]
    fn test_round_trip() {
        assert_round_trip(&fixtures::topic("topic-1"));
    }

    #[tokio::test]
    async fn test_create_zero_rows_keeps_caller_id() {
        let db = MockExecutor::new();
        db.push_affected(0);
        let mut topic = fixtures::topic("");

        let err = TopicRepository.create(&db, &mut topic).await.unwrap_err();

        assert_eq!(err.to_string(), "cannot insert new topics");
        assert!(topic.topic_id.is_empty());
    }

    #[tokio::test]
    async fn test_create_generates_id_on_success() {
        let db = MockExecutor::new();
        let mut topic = fixtures::topic("");

        TopicRepository.create(&db, &mut topic).await.unwrap();

        assert!(!topic.topic_id.is_empty());
        let stmt = db.last().unwrap();
        assert!(stmt.sql.starts_with("INSERT INTO topics (topic_id,name,"));
        assert_eq!(stmt.args[0], SqlValue::from(topic.topic_id.as_str()));
    }

    #[tokio::test]
    async fn test_retrieve_by_id_for_share() {
        let db = MockExecutor::new();
        db.push_rows(vec![row_of(&fixtures::topic("topic-1"))]);

        TopicRepository
            .retrieve_by_id(&db, "topic-1", &[for_share])
            .await
            .unwrap();

        assert!(db.last().unwrap().sql.ends_with("deleted_at IS NULL FOR SHARE"));
    }

    #[tokio::test]
    async fn test_find_by_book_ids_defaults_to_ten() {
        let db = MockExecutor::new();

        TopicRepository
            .find_by_book_ids(&db, &["book-1".to_string()], 0, 0)
            .await
            .unwrap();

        let stmt = db.last().unwrap();
        assert!(stmt.sql.starts_with("SELECT t.topic_id,t.name,"));
        assert!(stmt.sql.contains("t.deleted_at IS NULL AND c.deleted_at IS NULL"));
        assert!(stmt.sql.ends_with("LIMIT $2 OFFSET $3"));
        assert_eq!(stmt.args[1], SqlValue::from(10_i64));
    }

    #[tokio::test]
    async fn test_bulk_import_third_of_five_fails() {
        let db = MockExecutor::new();
        db.push_batch(vec![
            Ok(StatementResult::affected(1)),
            Ok(StatementResult::affected(1)),
            Err(DbError::QueryFailed {
                message: "canceling statement due to user request".to_string(),
                code: Some("57014".to_string()),
            }),
            Ok(StatementResult::affected(1)),
            Ok(StatementResult::affected(1)),
        ]);
        let mut topics: Vec<Topic> = (1..=5).map(|i| fixtures::topic(&format!("t{i}"))).collect();

        let err = TopicRepository.bulk_import(&db, &mut topics).await.unwrap_err();

        assert!(err.to_string().starts_with("batchResults.Exec: "));
        assert!(err.is_cancelled());
        assert_eq!(db.batches()[0].len(), 5);
    }

    #[tokio::test]
    async fn test_bulk_import_requires_chapter() {
        let db = MockExecutor::new();
        let mut topics = vec![fixtures::topic("t1")];
        topics[0].chapter_id = None;

        let err = TopicRepository.bulk_import(&db, &mut topics).await.unwrap_err();

        assert!(matches!(err, DbError::Validation(_)));
        assert!(db.batches().is_empty());
    }

    #[tokio::test]
    async fn test_soft_delete_filters_active_rows() {
        let db = MockExecutor::new();
        db.push_affected(1);

        let n = TopicRepository
            .soft_delete(&db, &["t1".to_string(), "t2".to_string()])
            .await
            .unwrap();

        assert_eq!(n, 1);
        assert_eq!(
            db.last().unwrap().sql,
            "UPDATE topics SET deleted_at = NOW(), updated_at = NOW() WHERE topic_id = ANY($1) AND deleted_at IS NULL"
        );
    }
}
