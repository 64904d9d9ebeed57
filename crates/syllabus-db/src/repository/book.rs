//! # Book Repository
//!
//! Books are the root of the content tree. A book tracks the highest
//! chapter display order handed out so far, so new chapters can be
//! appended without scanning.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use syllabus_core::{Book, ValidationError};
use tracing::debug;

use crate::batch::upsert_each;
use crate::entity::{Conflict, Entity, Upsert};
use crate::error::DbResult;
use crate::executor::Executor;
use crate::mapper::{find_all, find_one, index_by};
use crate::query::{Page, QueryBuilder, QueryEnhancer};
use crate::repository::expect_one;
use crate::value::{Row, SqlValue};

impl Entity for Book {
    const TABLE: &'static str = "books";
    const FIELDS: &'static [&'static str] = &[
        "book_id",
        "name",
        "country",
        "subject",
        "grade",
        "school_id",
        "book_type",
        "current_chapter_display_order",
        "created_at",
        "updated_at",
        "deleted_at",
    ];
    const PRIMARY_KEY: &'static [&'static str] = &["book_id"];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            (&self.book_id).into(),
            (&self.name).into(),
            (&self.country).into(),
            (&self.subject).into(),
            self.grade.into(),
            self.school_id.into(),
            self.book_type.as_str().into(),
            self.current_chapter_display_order.into(),
            self.created_at.into(),
            self.updated_at.into(),
            self.deleted_at.into(),
        ]
    }

    fn from_row(row: &Row) -> DbResult<Self> {
        Ok(Book {
            book_id: row.get("book_id")?,
            name: row.get("name")?,
            country: row.get("country")?,
            subject: row.get("subject")?,
            grade: row.get("grade")?,
            school_id: row.get("school_id")?,
            book_type: row.get_parsed("book_type")?,
            current_chapter_display_order: row.get("current_chapter_display_order")?,
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
        Book::validate(self)
    }
}

/// On conflict the descriptive columns are replaced; the chapter counter
/// keeps its stored value.
pub(crate) const BOOK_UPSERT: Upsert = Upsert {
    conflict: Conflict::Constraint("books_pk"),
    update: &[
        "name",
        "country",
        "subject",
        "grade",
        "school_id",
        "book_type",
        "updated_at",
        "deleted_at",
    ],
};

const DEFAULT_LIMIT: u32 = 10;

/// Optional filters for [`BookRepository::list`]. Unset fields don't filter.
#[derive(Debug, Clone, Default)]
pub struct BookFilter {
    pub school_id: Option<i32>,
    pub country: Option<String>,
    pub subject: Option<String>,
    pub grade: Option<i32>,
    pub book_type: Option<String>,

    /// 0 means the default page size (10).
    pub limit: u32,
    pub offset: u32,
}

/// Repository for `books`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BookRepository;

impl BookRepository {
    /// Gets an active book by id.
    ///
    /// ## Arguments
    /// * `enhancers` - lock clauses, e.g. `&[for_update]` inside a transaction
    ///
    /// ## Returns
    /// * `Err(DbError::NotFound)` - no active book with that id
    #[tracing::instrument(name = "BookRepo.FindByID", skip_all, fields(book_id = %book_id))]
    pub async fn find_by_id(
        &self,
        db: &dyn Executor,
        book_id: &str,
        enhancers: &[QueryEnhancer],
    ) -> DbResult<Book> {
        let mut query = QueryBuilder::select::<Book>();
        query
            .and_bind("book_id = {}", book_id)
            .and_where("deleted_at IS NULL")
            .enhance(enhancers);
        let (sql, args) = query.build();

        find_one(db, &sql, args, book_id).await
    }

    /// Active books keyed by id. Unknown ids are simply absent.
    #[tracing::instrument(name = "BookRepo.FindByIDs", skip_all, fields(count = book_ids.len()))]
    pub async fn find_by_ids(
        &self,
        db: &dyn Executor,
        book_ids: &[String],
    ) -> DbResult<HashMap<String, Book>> {
        let mut query = QueryBuilder::select::<Book>();
        query
            .and_bind("book_id = ANY({})", book_ids)
            .and_where("deleted_at IS NULL");
        let (sql, args) = query.build();

        let books: Vec<Book> = find_all(db, &sql, args).await?;
        debug!(found = books.len(), "Books loaded");
        Ok(index_by(books, |b| b.book_id.clone()))
    }

    /// Lists active books, newest first.
    ///
    /// Each set filter adds its predicate and placeholder; unset filters add
    /// nothing.
    #[tracing::instrument(name = "BookRepo.List", skip_all)]
    pub async fn list(&self, db: &dyn Executor, filter: &BookFilter) -> DbResult<Vec<Book>> {
        let mut query = QueryBuilder::select::<Book>();
        query
            .and_where("deleted_at IS NULL")
            .and_opt("school_id = {}", filter.school_id)
            .and_opt("country = {}", filter.country.as_deref())
            .and_opt("subject = {}", filter.subject.as_deref())
            .and_opt("grade = {}", filter.grade)
            .and_opt("book_type = {}", filter.book_type.as_deref())
            .order_by("created_at DESC, book_id")
            .paginate(Page::offset(filter.limit, filter.offset, DEFAULT_LIMIT));
        let (sql, args) = query.build();

        find_all(db, &sql, args).await
    }

    /// Inserts or updates books in one batch.
    ///
    /// All books are validated first and stamped with the same instant.
    #[tracing::instrument(name = "BookRepo.Upsert", skip_all, fields(count = books.len()))]
    pub async fn upsert(&self, db: &dyn Executor, books: &mut [Book]) -> DbResult<()> {
        upsert_each(db, books, &BOOK_UPSERT).await
    }

    /// Records the highest chapter display order handed out.
    #[tracing::instrument(name = "BookRepo.UpdateCurrentChapterDisplayOrder", skip_all, fields(book_id = %book_id))]
    pub async fn update_current_chapter_display_order(
        &self,
        db: &dyn Executor,
        book_id: &str,
        display_order: i32,
    ) -> DbResult<()> {
        let mut query = QueryBuilder::new("UPDATE books SET updated_at = NOW()");
        query
            .push_head_bind(", current_chapter_display_order = {}", display_order)
            .and_bind("book_id = {}", book_id)
            .and_where("deleted_at IS NULL");
        let (sql, args) = query.build();

        let tag = db.exec(&sql, args).await?;
        expect_one(tag, "update", Book::TABLE)
    }

    /// Soft-deletes books, returning how many were still active.
    #[tracing::instrument(name = "BookRepo.SoftDelete", skip_all, fields(count = book_ids.len()))]
    pub async fn soft_delete(&self, db: &dyn Executor, book_ids: &[String]) -> DbResult<u64> {
        let mut query = QueryBuilder::new("UPDATE books SET deleted_at = NOW(), updated_at = NOW()");
        query
            .and_bind("book_id = ANY({})", book_ids)
            .and_where("deleted_at IS NULL");
        let (sql, args) = query.build();

        Ok(db.exec(&sql, args).await?.rows_affected())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
