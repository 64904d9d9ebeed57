//! # Database Pool Management
//!
//! Connection pool creation and configuration for Postgres.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Database Connection Pool                           │
//! │                                                                         │
//! │  Service Startup                                                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbConfig::from_env() ← DATABASE_URL, DB_MAX_CONNECTIONS, ...           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Database::new(config).await ← Create pool + run migrations             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────┐                            │
//! │  │               PgPool                    │                            │
//! │  │  ┌─────┐ ┌─────┐ ┌─────┐ ┌─────┐        │                            │
//! │  │  │Conn1│ │Conn2│ │Conn3│ │Conn4│ ...    │  (max_connections)         │
//! │  │  └─────┘ └─────┘ └─────┘ └─────┘        │                            │
//! │  └─────────────────────────────────────────┘                            │
//! │       │                                                                 │
//! │       ├── db.pool()    → Executor, each call auto-commits               │
//! │       └── db.begin()   → PgTx, caller commits or rolls back             │
//! │                                                                         │
//! │  Repositories receive one of the two per call:                          │
//! │    TopicRepository.retrieve_by_id(db.pool(), "t1", &[]).await?          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::postgres::PgTx;
use crate::repository::{
    AssignmentRepository, BookRepository, ChapterRepository, LessonReportRepository,
    LessonRepository, PresetStudyPlanRepository, QuizRepository, QuizSetRepository,
    StudentTopicCompletenessRepository, StudentTopicOverdueRepository, StudyPlanRepository,
    TopicRepository, TopicsAssignmentsRepository, UserGroupRepository,
};

// =============================================================================
// Configuration
// =============================================================================

/// Why the configuration could not be read from the environment.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(String),

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}

/// Database configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("postgres://localhost/syllabus")
///     .max_connections(20)
///     .min_connections(2);
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Postgres connection URL.
    pub database_url: String,

    /// Maximum number of connections in the pool.
    /// Default: 10
    pub max_connections: u32,

    /// Minimum number of connections to keep alive.
    /// Default: 1
    pub min_connections: u32,

    /// How long to wait for a free connection.
    /// Default: 30 seconds
    pub connect_timeout: Duration,

    /// Idle timeout before closing a connection.
    /// Default: 10 minutes
    pub idle_timeout: Duration,

    /// Whether to run migrations on connect.
    /// Default: true
    pub run_migrations: bool,
}

impl DbConfig {
    /// Creates a configuration with default pool settings.
    pub fn new(database_url: impl Into<String>) -> Self {
        DbConfig {
            database_url: database_url.into(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            run_migrations: true,
        }
    }

    /// Reads the configuration from process environment variables.
    ///
    /// | Variable                  | Required | Default |
    /// |---------------------------|----------|---------|
    /// | `DATABASE_URL`            | yes      |         |
    /// | `DB_MAX_CONNECTIONS`      | no       | 10      |
    /// | `DB_MIN_CONNECTIONS`      | no       | 1       |
    /// | `DB_CONNECT_TIMEOUT_SECS` | no       | 30      |
    /// | `DB_RUN_MIGRATIONS`       | no       | true    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`DbConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::Missing("DATABASE_URL".to_string()))?;

        let mut config = DbConfig::new(url);

        if let Some(max) = parse_var::<u32, _>(&lookup, "DB_MAX_CONNECTIONS")? {
            config.max_connections = max;
        }
        if let Some(min) = parse_var::<u32, _>(&lookup, "DB_MIN_CONNECTIONS")? {
            config.min_connections = min;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "DB_CONNECT_TIMEOUT_SECS")? {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(run) = parse_var::<bool, _>(&lookup, "DB_RUN_MIGRATIONS")? {
            config.run_migrations = run;
        }

        if config.min_connections > config.max_connections {
            return Err(ConfigError::Invalid {
                key: "DB_MIN_CONNECTIONS".to_string(),
                value: config.min_connections.to_string(),
            });
        }

        Ok(config)
    }

    /// Sets the maximum number of connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the minimum number of connections.
    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Sets the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the idle timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets whether to run migrations on connect.
    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                value: raw,
            }),
    }
}

// =============================================================================
// Database
// =============================================================================

/// Main database handle: the pool plus repository access.
///
/// ## Usage
/// ```rust,ignore
/// let db = Database::new(DbConfig::from_env()?).await?;
///
/// // auto-commit
/// let book = db.books().find_by_id(db.pool(), "book-1", &[]).await?;
///
/// // one transaction
/// let tx = db.begin().await?;
/// db.topics().bulk_import(&tx, &mut topics).await?;
/// db.chapters().update_current_topic_display_order(&tx, "chapter-1", 12).await?;
/// tx.commit().await?;
/// ```
#[derive(Debug, Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Creates the connection pool.
    ///
    /// ## What This Does
    /// 1. Creates the pool with the configured limits
    /// 2. Runs migrations (if enabled)
    ///
    /// ## Returns
    /// * `Ok(Database)` - Ready-to-use database handle
    /// * `Err(DbError)` - Connection or migration failed
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Initializing database connection"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .connect(&config.database_url)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        info!("Database pool created");

        let db = Database { pool };

        if config.run_migrations {
            db.run_migrations().await?;
        }

        Ok(db)
    }

    /// Wraps an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Database { pool }
    }

    /// Runs database migrations.
    ///
    /// Automatically called by `new()` if `run_migrations` is true.
    pub async fn run_migrations(&self) -> DbResult<()> {
        info!("Running database migrations");
        migrations::run_migrations(&self.pool).await?;
        info!("Migrations complete");
        Ok(())
    }

    /// The pool, usable directly as an auto-commit executor.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Opens a transaction executor.
    pub async fn begin(&self) -> DbResult<PgTx> {
        debug!("Beginning transaction");
        PgTx::begin(&self.pool).await
    }

    /// Closes the pool. Later repository calls on it fail.
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }

    /// Whether the database answers `SELECT 1`.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    pub fn books(&self) -> BookRepository {
        BookRepository
    }

    pub fn chapters(&self) -> ChapterRepository {
        ChapterRepository
    }

    pub fn topics(&self) -> TopicRepository {
        TopicRepository
    }

    pub fn assignments(&self) -> AssignmentRepository {
        AssignmentRepository
    }

    pub fn topics_assignments(&self) -> TopicsAssignmentsRepository {
        TopicsAssignmentsRepository
    }

    pub fn quizzes(&self) -> QuizRepository {
        QuizRepository
    }

    pub fn quiz_sets(&self) -> QuizSetRepository {
        QuizSetRepository
    }

    pub fn lessons(&self) -> LessonRepository {
        LessonRepository
    }

    pub fn lesson_reports(&self) -> LessonReportRepository {
        LessonReportRepository
    }

    pub fn topic_completeness(&self) -> StudentTopicCompletenessRepository {
        StudentTopicCompletenessRepository
    }

    pub fn topic_overdue(&self) -> StudentTopicOverdueRepository {
        StudentTopicOverdueRepository
    }

    pub fn study_plans(&self) -> StudyPlanRepository {
        StudyPlanRepository
    }

    pub fn preset_study_plans(&self) -> PresetStudyPlanRepository {
        PresetStudyPlanRepository
    }

    pub fn user_groups(&self) -> UserGroupRepository {
        UserGroupRepository
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_config_builder() {
        let config = DbConfig::new("postgres://localhost/test")
            .max_connections(20)
            .min_connections(2)
            .run_migrations(false);

        assert_eq!(config.max_connections, 20);
        assert_eq!(config.min_connections, 2);
        assert!(!config.run_migrations);
        assert_eq!(config.idle_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_from_lookup_defaults() {
        let config = DbConfig::from_lookup(lookup(&[("DATABASE_URL", "postgres://db/app")])).unwrap();

        assert_eq!(config.database_url, "postgres://db/app");
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert!(config.run_migrations);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = DbConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://db/app"),
            ("DB_MAX_CONNECTIONS", "25"),
            ("DB_CONNECT_TIMEOUT_SECS", " 5 "),
            ("DB_RUN_MIGRATIONS", "false"),
        ]))
        .unwrap();

        assert_eq!(config.max_connections, 25);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert!(!config.run_migrations);
    }

    #[test]
    fn test_from_lookup_errors() {
        assert_eq!(
            DbConfig::from_lookup(lookup(&[])).unwrap_err(),
            ConfigError::Missing("DATABASE_URL".to_string())
        );

        let err = DbConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://db/app"),
            ("DB_MAX_CONNECTIONS", "lots"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "DB_MAX_CONNECTIONS"));

        let err = DbConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://db/app"),
            ("DB_MAX_CONNECTIONS", "2"),
            ("DB_MIN_CONNECTIONS", "3"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
