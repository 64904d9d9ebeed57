//! # syllabus-core: Entity Records for the Syllabus Data Layer
//!
//! This crate holds the records stored by `syllabus-db` and the rules a
//! record must satisfy before it is written. It performs no I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Syllabus Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 Service / use-case layer                        │   │
//! │  │     course import, quiz authoring, lesson reports, progress     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    syllabus-db (repositories)                   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ syllabus-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌────────────┐                 │   │
//! │  │   │   types   │  │  status   │  │ validation │                 │   │
//! │  │   │ Book      │  │ TopicSt.  │  │ ids, names │                 │   │
//! │  │   │ Topic ... │  │ QuizSt.   │  │ ranges     │                 │   │
//! │  │   └───────────┘  └───────────┘  └────────────┘                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - One record per table, with audit timestamps
//! - [`status`] - Enums stored as text columns
//! - [`error`] - Validation errors
//! - [`validation`] - Field rules checked before a record is queued

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod status;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::ValidationError;
pub use status::*;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Longest identifier accepted for any `*_id` column.
pub const MAX_ID_LEN: usize = 100;

/// Longest display name accepted for books, chapters, topics and plans.
pub const MAX_NAME_LEN: usize = 255;

/// Generates a new record identifier.
///
/// Used when a record is created without a caller-supplied id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
