//! # Text-Backed Enums
//!
//! Status and kind columns are stored as `TEXT` holding the upper-snake
//! name (`TOPIC_STATUS_PUBLISHED`, `QUIZ_TYPE_MCQ`, ...). Each enum here
//! round-trips through [`as_str`](TopicStatus::as_str) and [`FromStr`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Declares a text-backed enum with `as_str`, `FromStr`, `Display` and a
/// default variant.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $field:literal, default = $default:ident {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Text stored in the database column.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::$default
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(ValidationError::NotAllowed {
                        field: $field.to_string(),
                        allowed: $name::ALL.iter().map(|v| v.as_str().to_string()).collect(),
                    }),
                }
            }
        }
    };
}

text_enum! {
    /// Kind of content a book holds.
    BookType, "book_type", default = General {
        General => "BOOK_TYPE_GENERAL",
        AdHoc => "BOOK_TYPE_ADHOC",
    }
}

text_enum! {
    /// Publication state of a topic.
    TopicStatus, "status", default = Draft {
        None => "TOPIC_STATUS_NONE",
        Draft => "TOPIC_STATUS_DRAFT",
        Published => "TOPIC_STATUS_PUBLISHED",
    }
}

text_enum! {
    /// What a topic is used for inside a chapter.
    TopicType, "topic_type", default = Learning {
        Learning => "TOPIC_TYPE_LEARNING",
        Practical => "TOPIC_TYPE_PRACTICAL",
        Exam => "TOPIC_TYPE_EXAM",
        Assignment => "TOPIC_TYPE_ASSIGNMENT",
        LiveLesson => "TOPIC_TYPE_LIVE_LESSON",
    }
}

text_enum! {
    /// Whether an assignment is offered to students.
    AssignmentStatus, "status", default = Active {
        Active => "ASSIGNMENT_STATUS_ACTIVE",
        Inactive => "ASSIGNMENT_STATUS_INACTIVE",
    }
}

text_enum! {
    AssignmentType, "type", default = LearningObjective {
        LearningObjective => "ASSIGNMENT_TYPE_LEARNING_OBJECTIVE",
        Task => "ASSIGNMENT_TYPE_TASK",
    }
}

text_enum! {
    /// Review state shared by quizzes and quiz sets.
    QuizStatus, "status", default = New {
        New => "QUIZ_STATUS_NEW",
        Approved => "QUIZ_STATUS_APPROVED",
        Deleted => "QUIZ_STATUS_DELETED",
    }
}

text_enum! {
    /// Question format.
    QuizType, "kind", default = MultipleChoice {
        MultipleChoice => "QUIZ_TYPE_MCQ",
        FillInTheBlank => "QUIZ_TYPE_FIB",
        PairOfWords => "QUIZ_TYPE_POW",
        TermAndDefinition => "QUIZ_TYPE_TAD",
        ManualInput => "QUIZ_TYPE_MIQ",
        MultipleAnswer => "QUIZ_TYPE_MAQ",
        Ordering => "QUIZ_TYPE_ORD",
        Essay => "QUIZ_TYPE_ESQ",
    }
}

text_enum! {
    ReportSubmittingStatus, "report_submitting_status", default = Saved {
        Saved => "LESSON_REPORT_SUBMITTING_STATUS_SAVED",
        Submitted => "LESSON_REPORT_SUBMITTING_STATUS_SUBMITTED",
        Approved => "LESSON_REPORT_SUBMITTING_STATUS_APPROVED",
    }
}

text_enum! {
    StudyPlanStatus, "status", default = Active {
        Active => "STUDY_PLAN_STATUS_ACTIVE",
        Archived => "STUDY_PLAN_STATUS_ARCHIVED",
    }
}

text_enum! {
    /// Membership state of a user inside a group.
    UserGroupStatus, "status", default = Active {
        Active => "USER_GROUP_STATUS_ACTIVE",
        Inactive => "USER_GROUP_STATUS_INACTIVE",
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text_round_trip() {
        for status in TopicStatus::ALL {
            assert_eq!(status.as_str().parse::<TopicStatus>().unwrap(), *status);
        }
        assert_eq!(QuizType::Essay.as_str(), "QUIZ_TYPE_ESQ");
    }

    #[test]
    fn test_unknown_status_lists_allowed_values() {
        let err = "QUIZ_STATUS_ARCHIVED".parse::<QuizStatus>().unwrap_err();
        match err {
            ValidationError::NotAllowed { field, allowed } => {
                assert_eq!(field, "status");
                assert_eq!(allowed.len(), 3);
                assert!(allowed.contains(&"QUIZ_STATUS_DELETED".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_serde_uses_column_text() {
        let json = serde_json::to_string(&AssignmentStatus::Inactive).unwrap();
        assert_eq!(json, "\"ASSIGNMENT_STATUS_INACTIVE\"");
        assert_eq!(UserGroupStatus::default(), UserGroupStatus::Active);
    }
}
