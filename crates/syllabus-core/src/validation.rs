//! # Validation Module
//!
//! Field rules checked before a record is queued for writing.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Service layer                                                 │
//! │  └── Request shape, permissions                                         │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Repository (before queuing)                                   │
//! │  └── THIS MODULE: required references, lengths, ranges                  │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (Postgres)                                           │
//! │  ├── NOT NULL constraints                                               │
//! │  ├── *_pk and composite UNIQUE constraints                              │
//! │  └── Foreign key constraints                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Layer 2 exists so that one bad record fails a bulk write before any
//! statement reaches the database.

use crate::error::{ValidationError, ValidationResult};
use crate::types::{
    Assignment, Book, Chapter, LessonReport, LessonReportDetail, PresetStudyPlanWeekly, Quiz,
    StudyPlan, Topic, TopicsAssignments,
};
use crate::{MAX_ID_LEN, MAX_NAME_LEN};

// =============================================================================
// Field Validators
// =============================================================================

/// Validates a record identifier.
///
/// ## Rules
/// - Must not be empty or whitespace
/// - At most [`MAX_ID_LEN`] characters
/// - No whitespace or control characters
///
/// ## Example
/// ```rust
/// use syllabus_core::validation::validate_id;
///
/// assert!(validate_id("topic_id", "01FZ8T2Q").is_ok());
/// assert!(validate_id("topic_id", "").is_err());
/// assert!(validate_id("topic_id", "has space").is_err());
/// ```
pub fn validate_id(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::required(field));
    }

    if value.len() > MAX_ID_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_ID_LEN,
        });
    }

    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "must not contain whitespace".to_string(),
        });
    }

    Ok(())
}

/// Validates an optional reference that the record cannot be written without.
pub fn validate_reference(field: &str, value: Option<&str>) -> ValidationResult<()> {
    match value {
        Some(id) => validate_id(field, id),
        None => Err(ValidationError::required(field)),
    }
}

/// Validates a display name.
///
/// ## Rules
/// - Must not be empty
/// - At most [`MAX_NAME_LEN`] characters
pub fn validate_name(field: &str, value: &str) -> ValidationResult<()> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::required(field));
    }

    if value.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_NAME_LEN,
        });
    }

    Ok(())
}

/// Validates that an integer falls inside `min..=max`.
pub fn validate_range(field: &str, value: i64, min: i64, max: i64) -> ValidationResult<()> {
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min,
            max,
        });
    }
    Ok(())
}

/// Validates a display order (`0..=i16::MAX`, matching the SMALLINT columns).
pub fn validate_display_order(value: i32) -> ValidationResult<()> {
    validate_range("display_order", i64::from(value), 0, i64::from(i16::MAX))
}

// =============================================================================
// Record Validators
// =============================================================================

impl Book {
    pub fn validate(&self) -> ValidationResult<()> {
        validate_id("book_id", &self.book_id)?;
        validate_name("name", &self.name)
    }
}

impl Chapter {
    pub fn validate(&self) -> ValidationResult<()> {
        validate_id("chapter_id", &self.chapter_id)?;
        validate_name("name", &self.name)?;
        validate_display_order(self.display_order)
    }
}

impl Topic {
    /// A topic must belong to a chapter before it can be imported.
    pub fn validate(&self) -> ValidationResult<()> {
        validate_id("topic_id", &self.topic_id)?;
        validate_name("name", &self.name)?;
        validate_reference("chapter_id", self.chapter_id.as_deref())?;
        validate_display_order(self.display_order)?;
        if self.attachment_names.len() != self.attachment_urls.len() {
            return Err(ValidationError::InvalidFormat {
                field: "attachment_urls".to_string(),
                reason: "must have one url per attachment name".to_string(),
            });
        }
        Ok(())
    }
}

impl Assignment {
    pub fn validate(&self) -> ValidationResult<()> {
        validate_id("assignment_id", &self.assignment_id)?;
        validate_name("name", &self.name)?;
        validate_reference("topic_id", self.topic_id.as_deref())?;
        validate_display_order(self.display_order)?;
        validate_range("max_grade", i64::from(self.max_grade), 0, 1000)
    }
}

impl TopicsAssignments {
    pub fn validate(&self) -> ValidationResult<()> {
        validate_id("topic_id", &self.topic_id)?;
        validate_id("assignment_id", &self.assignment_id)?;
        validate_display_order(self.display_order)
    }
}

impl Quiz {
    pub fn validate(&self) -> ValidationResult<()> {
        validate_id("external_id", &self.external_id)?;
        validate_range("difficulty_level", i64::from(self.difficulty_level), 0, 5)?;
        validate_range("point", i64::from(self.point), 0, i64::from(i32::MAX))
    }
}

impl LessonReport {
    pub fn validate(&self) -> ValidationResult<()> {
        validate_id("lesson_id", &self.lesson_id)
    }
}

impl LessonReportDetail {
    pub fn validate(&self) -> ValidationResult<()> {
        validate_id("lesson_report_id", &self.lesson_report_id)?;
        validate_id("student_id", &self.student_id)
    }
}

impl StudyPlan {
    pub fn validate(&self) -> ValidationResult<()> {
        validate_id("study_plan_id", &self.study_plan_id)?;
        validate_name("name", &self.name)
    }
}

impl PresetStudyPlanWeekly {
    /// Weeks are numbered from 1 within a plan.
    pub fn validate(&self) -> ValidationResult<()> {
        validate_id("preset_study_plan_id", &self.preset_study_plan_id)?;
        validate_id("topic_id", &self.topic_id)?;
        validate_range("week", i64::from(self.week), 1, 53)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_id() {
        assert!(validate_id("topic_id", "topic-1").is_ok());
        assert!(validate_id("topic_id", "").is_err());
        assert!(validate_id("topic_id", "   ").is_err());
        assert!(validate_id("topic_id", "a\tb").is_err());
        assert!(validate_id("topic_id", &"x".repeat(MAX_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_validate_reference() {
        assert!(validate_reference("chapter_id", Some("chapter-1")).is_ok());
        assert_eq!(
            validate_reference("chapter_id", None).unwrap_err(),
            ValidationError::required("chapter_id")
        );
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("name", "Fractions").is_ok());
        assert!(validate_name("name", " ").is_err());
        assert!(validate_name("name", &"n".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_validate_display_order() {
        assert!(validate_display_order(0).is_ok());
        assert!(validate_display_order(-1).is_err());
        assert!(validate_display_order(i32::from(i16::MAX) + 1).is_err());
    }

    #[test]
    fn test_topic_requires_chapter() {
        let mut topic = Topic::new("topic-1", "Fractions");
        assert_eq!(
            topic.validate().unwrap_err(),
            ValidationError::required("chapter_id")
        );

        topic.chapter_id = Some("chapter-1".to_string());
        assert!(topic.validate().is_ok());

        topic.attachment_names = vec!["worksheet.pdf".to_string()];
        assert!(topic.validate().is_err());
    }

    #[test]
    fn test_weekly_week_range() {
        let mut weekly = PresetStudyPlanWeekly::new("weekly-1", "plan-1", "topic-1", 1);
        assert!(weekly.validate().is_ok());
        weekly.week = 0;
        assert!(weekly.validate().is_err());
    }
}
