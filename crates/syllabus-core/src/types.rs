//! # Domain Types
//!
//! One record per table. Field order matches column order in the schema.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Content Tree                                    │
//! │                                                                         │
//! │   Book ──► Chapter ──► Topic ──┬──► Assignment (via TopicsAssignments)  │
//! │                                └──► Quiz / QuizSet (by learning obj.)   │
//! │                                                                         │
//! │                         Planning & Progress                             │
//! │                                                                         │
//! │   StudyPlan            PresetStudyPlan ──► PresetStudyPlanWeekly        │
//! │   StudentTopicCompleteness   StudentTopicOverdue                        │
//! │                                                                         │
//! │                         Lessons & Users                                 │
//! │                                                                         │
//! │   Lesson ──► LessonReport ──► LessonReportDetail      UserGroup         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Audit Columns
//! Every record carries `created_at` and `updated_at`. Records that are
//! soft-deleted also carry a nullable `deleted_at`; a row with `deleted_at`
//! set is invisible to every active read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::status::{
    AssignmentStatus, AssignmentType, BookType, QuizStatus, QuizType, ReportSubmittingStatus,
    StudyPlanStatus, TopicStatus, TopicType, UserGroupStatus,
};

fn empty_object() -> Value {
    Value::Object(Default::default())
}

// =============================================================================
// Books & Chapters
// =============================================================================

/// A book: the root of the content tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub book_id: String,
    pub name: String,
    pub country: Option<String>,
    pub subject: Option<String>,
    pub grade: Option<i32>,
    pub school_id: i32,
    pub book_type: BookType,

    /// Highest chapter display order handed out so far.
    pub current_chapter_display_order: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Book {
    pub fn new(book_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Book {
            book_id: book_id.into(),
            name: name.into(),
            country: None,
            subject: None,
            grade: None,
            school_id: 0,
            book_type: BookType::default(),
            current_chapter_display_order: 0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

/// A chapter inside a book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub chapter_id: String,
    pub name: String,
    pub country: Option<String>,
    pub subject: Option<String>,
    pub grade: Option<i32>,
    pub display_order: i32,
    pub school_id: i32,
    pub book_id: Option<String>,

    /// Highest topic display order handed out so far.
    pub current_topic_display_order: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Chapter {
    pub fn new(chapter_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Chapter {
            chapter_id: chapter_id.into(),
            name: name.into(),
            country: None,
            subject: None,
            grade: None,
            display_order: 0,
            school_id: 0,
            book_id: None,
            current_topic_display_order: 0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

// =============================================================================
// Topics & Assignments
// =============================================================================

/// A topic: the unit students study and complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub topic_id: String,
    pub name: String,
    pub country: Option<String>,
    pub grade: Option<i32>,
    pub subject: Option<String>,
    pub topic_type: TopicType,
    pub status: TopicStatus,
    pub display_order: i32,
    pub chapter_id: Option<String>,
    pub school_id: i32,
    pub icon_url: Option<String>,

    /// Number of learning objectives attached to the topic.
    pub total_los: i32,
    pub lo_display_order_counter: i32,
    pub essay_required: bool,
    pub instruction: Option<String>,

    /// Parallel arrays: `attachment_names[i]` is served from `attachment_urls[i]`.
    pub attachment_names: Vec<String>,
    pub attachment_urls: Vec<String>,

    pub copied_topic_id: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Topic {
    pub fn new(topic_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Topic {
            topic_id: topic_id.into(),
            name: name.into(),
            country: None,
            grade: None,
            subject: None,
            topic_type: TopicType::default(),
            status: TopicStatus::default(),
            display_order: 0,
            chapter_id: None,
            school_id: 0,
            icon_url: None,
            total_los: 0,
            lo_display_order_counter: 0,
            essay_required: false,
            instruction: None,
            attachment_names: Vec::new(),
            attachment_urls: Vec::new(),
            copied_topic_id: None,
            published_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

/// Graded work attached to a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub assignment_id: String,
    pub name: String,
    pub content: Value,
    pub attachment: Vec<String>,
    pub settings: Value,
    pub check_list: Value,
    pub max_grade: i32,
    pub instruction: Option<String>,
    pub assignment_type: AssignmentType,
    pub status: AssignmentStatus,
    pub is_required_grade: bool,
    pub display_order: i32,

    /// Topic the assignment was first authored under.
    pub original_topic: Option<String>,
    pub topic_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Assignment {
    pub fn new(assignment_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Assignment {
            assignment_id: assignment_id.into(),
            name: name.into(),
            content: empty_object(),
            attachment: Vec::new(),
            settings: empty_object(),
            check_list: empty_object(),
            max_grade: 0,
            instruction: None,
            assignment_type: AssignmentType::default(),
            status: AssignmentStatus::default(),
            is_required_grade: false,
            display_order: 0,
            original_topic: None,
            topic_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

/// Association between a topic and an assignment shown inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicsAssignments {
    pub topic_id: String,
    pub assignment_id: String,
    pub display_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TopicsAssignments {
    pub fn new(topic_id: impl Into<String>, assignment_id: impl Into<String>) -> Self {
        let now = Utc::now();
        TopicsAssignments {
            topic_id: topic_id.into(),
            assignment_id: assignment_id.into(),
            display_order: 0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

// =============================================================================
// Quizzes
// =============================================================================

/// A single question. `external_id` is the author-facing identifier and is
/// unique per school.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quiz {
    pub quiz_id: String,
    pub country: Option<String>,
    pub school_id: i32,
    pub lo_ids: Vec<String>,
    pub external_id: String,
    pub kind: QuizType,
    pub question: Value,
    pub explanation: Value,
    pub options: Value,
    pub tagged_los: Vec<String>,
    pub difficulty_level: i32,
    pub point: i32,
    pub question_tag_ids: Vec<String>,
    pub created_by: Option<String>,
    pub approved_by: Option<String>,
    pub status: QuizStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Quiz {
    /// Creates a quiz without an id; one is assigned when it is first stored.
    pub fn new(external_id: impl Into<String>, kind: QuizType) -> Self {
        let now = Utc::now();
        Quiz {
            quiz_id: String::new(),
            country: None,
            school_id: 0,
            lo_ids: Vec::new(),
            external_id: external_id.into(),
            kind,
            question: empty_object(),
            explanation: empty_object(),
            options: Value::Array(Vec::new()),
            tagged_los: Vec::new(),
            difficulty_level: 1,
            point: 1,
            question_tag_ids: Vec::new(),
            created_by: None,
            approved_by: None,
            status: QuizStatus::default(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

/// The ordered quizzes of one learning objective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizSet {
    pub quiz_set_id: String,
    pub lo_id: String,
    pub quiz_external_ids: Vec<String>,
    pub status: QuizStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl QuizSet {
    pub fn new(lo_id: impl Into<String>, quiz_external_ids: Vec<String>) -> Self {
        let now = Utc::now();
        QuizSet {
            quiz_set_id: String::new(),
            lo_id: lo_id.into(),
            quiz_external_ids,
            status: QuizStatus::default(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

// =============================================================================
// Lessons & Reports
// =============================================================================

/// A scheduled (possibly live-streamed) lesson.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub lesson_id: String,
    pub name: String,
    pub course_id: String,
    pub teacher_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub lesson_type: String,
    pub status: String,

    /// Learners currently streaming; bounded by the caller-supplied maximum.
    pub stream_learner_counter: i32,
    pub learner_ids: Vec<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Lesson {
    pub fn new(lesson_id: impl Into<String>, course_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Lesson {
            lesson_id: lesson_id.into(),
            name: String::new(),
            course_id: course_id.into(),
            teacher_id: None,
            start_time: now,
            end_time: now,
            lesson_type: "LESSON_TYPE_ONLINE".to_string(),
            status: "LESSON_STATUS_NOT_STARTED".to_string(),
            stream_learner_counter: 0,
            learner_ids: Vec::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

/// Links a lesson to one of its members, teachers or courses.
///
/// The three link tables share this shape; only the member column differs.
macro_rules! lesson_link {
    ($(#[$doc:meta])* $name:ident, $member:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            pub lesson_id: String,
            pub $member: String,
            pub created_at: DateTime<Utc>,
            pub updated_at: DateTime<Utc>,
        }

        impl $name {
            pub fn new(lesson_id: impl Into<String>, $member: impl Into<String>) -> Self {
                let now = Utc::now();
                $name {
                    lesson_id: lesson_id.into(),
                    $member: $member.into(),
                    created_at: now,
                    updated_at: now,
                }
            }
        }
    };
}

lesson_link!(
    /// A learner attending a lesson.
    LessonMember,
    user_id
);
lesson_link!(
    /// A teacher running a lesson.
    LessonTeacher,
    teacher_id
);
lesson_link!(
    /// A course a lesson belongs to.
    LessonCourse,
    course_id
);

/// A teacher's report for one lesson.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonReport {
    pub lesson_report_id: String,
    pub report_submitting_status: ReportSubmittingStatus,
    pub form_config_id: Option<String>,
    pub lesson_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl LessonReport {
    pub fn new(lesson_id: impl Into<String>) -> Self {
        let now = Utc::now();
        LessonReport {
            lesson_report_id: String::new(),
            report_submitting_status: ReportSubmittingStatus::default(),
            form_config_id: None,
            lesson_id: lesson_id.into(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

/// Per-student section of a lesson report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonReportDetail {
    pub lesson_report_detail_id: String,
    pub lesson_report_id: String,
    pub student_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl LessonReportDetail {
    pub fn new(
        lesson_report_detail_id: impl Into<String>,
        lesson_report_id: impl Into<String>,
        student_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        LessonReportDetail {
            lesson_report_detail_id: lesson_report_detail_id.into(),
            lesson_report_id: lesson_report_id.into(),
            student_id: student_id.into(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

// =============================================================================
// Student Progress
// =============================================================================

/// How far one student got through one topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentTopicCompleteness {
    pub student_id: String,
    pub topic_id: String,
    pub total_finished_los: i32,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl StudentTopicCompleteness {
    pub fn new(student_id: impl Into<String>, topic_id: impl Into<String>) -> Self {
        let now = Utc::now();
        StudentTopicCompleteness {
            student_id: student_id.into(),
            topic_id: topic_id.into(),
            total_finished_los: 0,
            is_completed: false,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

/// Marker for a topic a student has not finished by its due date.
///
/// Markers are removed outright once the topic is done, so this table has
/// no `deleted_at` column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentTopicOverdue {
    pub student_id: String,
    pub topic_id: String,
    pub due_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StudentTopicOverdue {
    pub fn new(
        student_id: impl Into<String>,
        topic_id: impl Into<String>,
        due_date: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        StudentTopicOverdue {
            student_id: student_id.into(),
            topic_id: topic_id.into(),
            due_date,
            created_at: now,
            updated_at: now,
        }
    }
}

// =============================================================================
// Study Plans
// =============================================================================

/// A course's study plan, optionally copied from a master plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyPlan {
    pub study_plan_id: String,
    pub name: String,
    pub course_id: Option<String>,
    pub book_id: Option<String>,
    pub master_study_plan_id: Option<String>,
    pub school_id: i32,
    pub status: StudyPlanStatus,
    pub track_school_progress: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl StudyPlan {
    pub fn new(study_plan_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        StudyPlan {
            study_plan_id: study_plan_id.into(),
            name: name.into(),
            course_id: None,
            book_id: None,
            master_study_plan_id: None,
            school_id: 0,
            status: StudyPlanStatus::default(),
            track_school_progress: false,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

/// A reusable plan template for a country, grade and subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetStudyPlan {
    pub preset_study_plan_id: String,
    pub name: String,
    pub country: String,
    pub grade: i32,
    pub subject: String,
    pub start_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PresetStudyPlan {
    pub fn new(preset_study_plan_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        PresetStudyPlan {
            preset_study_plan_id: preset_study_plan_id.into(),
            name: name.into(),
            country: String::new(),
            grade: 0,
            subject: String::new(),
            start_date: now,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One topic scheduled in a given week of a preset plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetStudyPlanWeekly {
    pub preset_study_plan_weekly_id: String,
    pub preset_study_plan_id: String,
    pub topic_id: String,
    pub week: i32,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl PresetStudyPlanWeekly {
    pub fn new(
        preset_study_plan_weekly_id: impl Into<String>,
        preset_study_plan_id: impl Into<String>,
        topic_id: impl Into<String>,
        week: i32,
    ) -> Self {
        let now = Utc::now();
        PresetStudyPlanWeekly {
            preset_study_plan_weekly_id: preset_study_plan_weekly_id.into(),
            preset_study_plan_id: preset_study_plan_id.into(),
            topic_id: topic_id.into(),
            week,
            start_date: None,
            end_date: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

// =============================================================================
// Users
// =============================================================================

/// A user's membership in a group. The origin membership decides the
/// user's role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserGroup {
    pub user_id: String,
    pub group_id: String,
    pub is_origin: bool,
    pub status: UserGroupStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserGroup {
    pub fn new(user_id: impl Into<String>, group_id: impl Into<String>) -> Self {
        let now = Utc::now();
        UserGroup {
            user_id: user_id.into(),
            group_id: group_id.into(),
            is_origin: true,
            status: UserGroupStatus::default(),
            created_at: now,
            updated_at: now,
        }
    }
}
