//! # syllabus-db: Postgres Record Access
//!
//! Every statement the learning-content backend sends to Postgres is built
//! and mapped here.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Syllabus Data Flow                                │
//! │                                                                         │
//! │  Service layer (import books, report lessons, ...)                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  syllabus-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐     │   │
//! │  │  │ Repositories │──►│ QueryBuilder │   │ Batch / Results  │     │   │
//! │  │  │ (repository) │   │  (query.rs)  │   │   (batch.rs)     │     │   │
//! │  │  └──────┬───────┘   └──────────────┘   └──────────────────┘     │   │
//! │  │         │ &dyn Executor            ▲ mapper.rs scans rows       │   │
//! │  │         ▼                          │                            │   │
//! │  │  ┌──────────────────────────────────────────────────────────┐   │   │
//! │  │  │ Executor: PgPool │ PgTx │ MockExecutor (tests)           │   │   │
//! │  │  └──────────────────────────────────────────────────────────┘   │   │
//! │  │                                                                 │   │
//! │  │  CachedUserGroupRepository ──► Cache (MemoryCache / Redis)      │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Postgres (migrations/postgres/*.sql)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Pool configuration and the [`Database`] handle
//! - [`postgres`] - Executor implementations over sqlx
//! - [`executor`] - The [`Executor`] seam every repository runs through
//! - [`query`] - [`QueryBuilder`], pagination and lock decorators
//! - [`entity`] - Table mapping and generated INSERT/UPSERT statements
//! - [`batch`] - Batched writes and their per-statement results
//! - [`mapper`] - Row scanning and grouping
//! - [`cache`] - Cache backends and the cached user-group lookup
//! - [`repository`] - One repository per table
//! - [`migrations`] - Embedded schema migrations
//! - [`error`] - [`DbError`] and the `context` label helper
//!
//! ## Usage
//!
//! ```rust,ignore
//! use syllabus_db::{for_update, Database, DbConfig};
//!
//! let db = Database::new(DbConfig::from_env()?).await?;
//!
//! // Auto-commit reads go straight to the pool
//! let book = db.books().find_by_id(db.pool(), "book-1", &[]).await?;
//!
//! // Locked read-modify-write inside a transaction
//! let tx = db.begin().await?;
//! let chapter = db.chapters().find_by_id(&tx, "chapter-1", &[for_update]).await?;
//! db.chapters()
//!     .update_current_topic_display_order(&tx, &chapter.chapter_id, 4)
//!     .await?;
//! tx.commit().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod batch;
pub mod cache;
pub mod entity;
pub mod error;
pub mod executor;
pub mod mapper;
pub mod migrations;
pub mod pool;
pub mod postgres;
pub mod query;
pub mod repository;
pub mod value;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use batch::{Batch, BatchResults};
pub use cache::{Cache, CacheConfig, CachedUserGroupRepository, MemoryCache, RedisCache};
pub use entity::Entity;
pub use error::{DbError, DbResult, ResultExt};
pub use executor::{CommandTag, Executor, Rows};
pub use pool::{ConfigError, Database, DbConfig};
pub use postgres::PgTx;
pub use query::{for_share, for_update, Page, QueryBuilder, QueryEnhancer, SortOrder};
pub use value::{Row, SqlValue};

// Repository re-exports for convenience
pub use repository::{
    AssignmentFilter, AssignmentRepository, BookFilter, BookRepository, ChapterRepository,
    LessonCursor, LessonFilter, LessonReportRepository, LessonRepository, PresetStudyPlanFilter,
    PresetStudyPlanRepository, QuizFilter, QuizRepository, QuizSetRepository,
    StudentTopicCompletenessRepository, StudentTopicOverdueRepository, StudyPlanCursor,
    StudyPlanRepository, TopicRepository, TopicsAssignmentsRepository, UserGroupRepository,
};
