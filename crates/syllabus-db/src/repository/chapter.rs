//! # Chapter Repository
//!
//! Chapters of a book, ordered by `display_order`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use syllabus_core::{Chapter, ValidationError};

use crate::batch::upsert_each;
use crate::entity::{Conflict, Entity, Upsert};
use crate::error::DbResult;
use crate::executor::Executor;
use crate::mapper::{find_all, find_one, index_by};
use crate::query::{QueryBuilder, QueryEnhancer};
use crate::repository::expect_one;
use crate::value::{Row, SqlValue};

impl Entity for Chapter {
    const TABLE: &'static str = "chapters";
    const FIELDS: &'static [&'static str] = &[
        "chapter_id",
        "name",
        "country",
        "subject",
        "grade",
        "display_order",
        "school_id",
        "book_id",
        "current_topic_display_order",
        "created_at",
        "updated_at",
        "deleted_at",
    ];
    const PRIMARY_KEY: &'static [&'static str] = &["chapter_id"];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            (&self.chapter_id).into(),
            (&self.name).into(),
            (&self.country).into(),
            (&self.subject).into(),
            self.grade.into(),
            self.display_order.into(),
            self.school_id.into(),
            (&self.book_id).into(),
            self.current_topic_display_order.into(),
            self.created_at.into(),
            self.updated_at.into(),
            self.deleted_at.into(),
        ]
    }

    fn from_row(row: &Row) -> DbResult<Self> {
        Ok(Chapter {
            chapter_id: row.get("chapter_id")?,
            name: row.get("name")?,
            country: row.get("country")?,
            subject: row.get("subject")?,
            grade: row.get("grade")?,
            display_order: row.get("display_order")?,
            school_id: row.get("school_id")?,
            book_id: row.get("book_id")?,
            current_topic_display_order: row.get("current_topic_display_order")?,
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
        Chapter::validate(self)
    }
}

pub(crate) const CHAPTER_UPSERT: Upsert = Upsert {
    conflict: Conflict::Constraint("chapters_pk"),
    update: &[
        "name",
        "country",
        "subject",
        "grade",
        "display_order",
        "school_id",
        "book_id",
        "updated_at",
        "deleted_at",
    ],
};

/// Repository for `chapters`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChapterRepository;

impl ChapterRepository {
    /// Gets an active chapter by id.
    ///
    /// ## Returns
    /// * `Err(DbError::NotFound)` - no active chapter with that id
    #[tracing::instrument(name = "ChapterRepo.FindByID", skip_all, fields(chapter_id = %chapter_id))]
    pub async fn find_by_id(
        &self,
        db: &dyn Executor,
        chapter_id: &str,
        enhancers: &[QueryEnhancer],
    ) -> DbResult<Chapter> {
        let mut query = QueryBuilder::select::<Chapter>();
        query
            .and_bind("chapter_id = {}", chapter_id)
            .and_where("deleted_at IS NULL")
            .enhance(enhancers);
        let (sql, args) = query.build();

        find_one(db, &sql, args, chapter_id).await
    }

    #[tracing::instrument(name = "ChapterRepo.FindByIDs", skip_all, fields(count = chapter_ids.len()))]
    pub async fn find_by_ids(
        &self,
        db: &dyn Executor,
        chapter_ids: &[String],
    ) -> DbResult<HashMap<String, Chapter>> {
        let mut query = QueryBuilder::select::<Chapter>();
        query
            .and_bind("chapter_id = ANY({})", chapter_ids)
            .and_where("deleted_at IS NULL");
        let (sql, args) = query.build();

        let chapters: Vec<Chapter> = find_all(db, &sql, args).await?;
        Ok(index_by(chapters, |c| c.chapter_id.clone()))
    }

    /// Active chapters of a book in display order.
    #[tracing::instrument(name = "ChapterRepo.FindByBookID", skip_all, fields(book_id = %book_id))]
    pub async fn find_by_book_id(&self, db: &dyn Executor, book_id: &str) -> DbResult<Vec<Chapter>> {
        let mut query = QueryBuilder::select::<Chapter>();
        query
            .and_bind("book_id = {}", book_id)
            .and_where("deleted_at IS NULL")
            .order_by("display_order, chapter_id");
        let (sql, args) = query.build();

        find_all(db, &sql, args).await
    }

    #[tracing::instrument(name = "ChapterRepo.Upsert", skip_all, fields(count = chapters.len()))]
    pub async fn upsert(&self, db: &dyn Executor, chapters: &mut [Chapter]) -> DbResult<()> {
        upsert_each(db, chapters, &CHAPTER_UPSERT).await
    }

    /// Records the highest topic display order handed out in the chapter.
    #[tracing::instrument(name = "ChapterRepo.UpdateCurrentTopicDisplayOrder", skip_all, fields(chapter_id = %chapter_id))]
    pub async fn update_current_topic_display_order(
        &self,
        db: &dyn Executor,
        chapter_id: &str,
        display_order: i32,
    ) -> DbResult<()> {
        let mut query = QueryBuilder::new("UPDATE chapters SET updated_at = NOW()");
        query
            .push_head_bind(", current_topic_display_order = {}", display_order)
            .and_bind("chapter_id = {}", chapter_id)
            .and_where("deleted_at IS NULL");
        let (sql, args) = query.build();

        let tag = db.exec(&sql, args).await?;
        expect_one(tag, "update", Chapter::TABLE)
    }

    #[tracing::instrument(name = "ChapterRepo.SoftDelete", skip_all, fields(count = chapter_ids.len()))]
    pub async fn soft_delete(&self, db: &dyn Executor, chapter_ids: &[String]) -> DbResult<u64> {
        let mut query =
            QueryBuilder::new("UPDATE chapters SET deleted_at = NOW(), updated_at = NOW()");
        query
            .and_bind("chapter_id = ANY({})", chapter_ids)
            .and_where("deleted_at IS NULL");
        let (sql, args) = query.build();

        Ok(db.exec(&sql, args).await?.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{assert_round_trip, fixtures, row_of, MockExecutor};

    #[test]
    fn test_round_trip() {
        assert_round_trip(&fixtures::chapter("chapter-1", "book-1"));
    }

    #[tokio::test]
    async fn test_find_by_book_id_orders_by_display_order() {
        let db = MockExecutor::new();
        db.push_rows(vec![
            row_of(&fixtures::chapter("c1", "book-1")),
            row_of(&fixtures::chapter("c2", "book-1")),
        ]);

        let chapters = ChapterRepository.find_by_book_id(&db, "book-1").await.unwrap();

        assert_eq!(chapters.len(), 2);
        let sql = db.last().unwrap().sql;
        assert!(sql.ends_with(
            "WHERE book_id = $1 AND deleted_at IS NULL ORDER BY display_order, chapter_id"
        ));
    }

    #[tokio::test]
    async fn test_find_by_ids_with_empty_input_still_queries() {
        let db = MockExecutor::new();

        let chapters = ChapterRepository.find_by_ids(&db, &[]).await.unwrap();

        assert!(chapters.is_empty());
        let stmt = db.last().unwrap();
        assert!(stmt.sql.contains("chapter_id = ANY($1)"));
        assert_eq!(stmt.args, vec![SqlValue::TextArray(Some(Vec::new()))]);
    }

    #[tokio::test]
    async fn test_soft_delete_reports_count() {
        let db = MockExecutor::new();
        db.push_affected(2);

        let ids = vec!["c1".to_string(), "c2".to_string(), "c3".to_string()];
        assert_eq!(ChapterRepository.soft_delete(&db, &ids).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_upsert_validation_sends_nothing() {
        let db = MockExecutor::new();
        let mut chapters = vec![fixtures::chapter("c1", "book-1")];
        chapters[0].name.clear();

        assert!(ChapterRepository.upsert(&db, &mut chapters).await.is_err());
        assert!(db.batches().is_empty());
    }
}
