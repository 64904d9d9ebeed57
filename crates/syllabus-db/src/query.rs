//! # Query Builder
//!
//! Composes parameterized SQL plus its ordered argument list.
//!
//! ## Placeholder Bookkeeping
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  QueryBuilder::select::<Topic>()                                        │
//! │    .and_where("deleted_at IS NULL")                 (no placeholder)    │
//! │    .and_opt("country = {}", None::<String>)         (skipped)           │
//! │    .and_opt("school_id = {}", Some(5))              → $1                │
//! │    .and_nullable("({}::text IS NULL OR status = {})", status)  → $2     │
//! │    .paginate(Page::offset(0, 20, 10))               → LIMIT $3 OFFSET $4│
//! │                                                                         │
//! │  Each bound value takes the next $N in call order, so predicates can    │
//! │  be added, dropped or reordered without renumbering anything by hand.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Optional Filters
//! Two styles exist and each call site keeps the one it was written with:
//!
//! - **Omission** ([`QueryBuilder::and_opt`]): an absent filter adds neither
//!   predicate nor placeholder. Placeholder count varies with the input.
//! - **Tautology** ([`QueryBuilder::and_nullable`]): the predicate is always
//!   present as `$N::type IS NULL OR col = $N`, so the statement text and its
//!   placeholder count are fixed. New call sites use this style.

use crate::entity::{columns, Entity};
use crate::value::SqlValue;

/// Marker replaced by the next placeholder in predicate templates.
const SLOT: &str = "{}";

// =============================================================================
// Lock Decorators
// =============================================================================

/// Rewrites a finished statement before it is executed.
///
/// ```rust,ignore
/// repo.find_by_id(&tx, "book-1", &[for_update]).await?;
/// ```
pub type QueryEnhancer = fn(&mut String);

/// Appends `FOR SHARE`.
pub fn for_share(sql: &mut String) {
    sql.push_str(" FOR SHARE");
}

/// Appends `FOR UPDATE`.
pub fn for_update(sql: &mut String) {
    sql.push_str(" FOR UPDATE");
}

/// Applies enhancers in order.
pub fn enhance(sql: &mut String, enhancers: &[QueryEnhancer]) {
    for enhancer in enhancers {
        enhancer(sql);
    }
}

// =============================================================================
// Pagination
// =============================================================================

/// Sort direction for keyset pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    fn keyword(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }

    fn comparison(self) -> &'static str {
        match self {
            SortOrder::Asc => ">",
            SortOrder::Desc => "<",
        }
    }
}

/// A page request. A query is paged by offset or by keyset, never both.
#[derive(Debug, Clone, PartialEq)]
pub enum Page {
    /// `LIMIT $n OFFSET $m` for legacy listings.
    Offset { limit: u32, offset: u32 },

    /// `(cols) > (cursor)` then `ORDER BY cols LIMIT $n`.
    ///
    /// `columns` is the sort column followed by the id tiebreaker. `after`
    /// holds the last row's values for those columns, or `None` for the
    /// first page.
    Keyset {
        columns: Vec<&'static str>,
        after: Option<Vec<SqlValue>>,
        order: SortOrder,
        limit: u32,
    },
}

/// Substitutes `default` for a zero (unset) limit.
pub fn limit_or_default(limit: u32, default: u32) -> u32 {
    if limit == 0 {
        default
    } else {
        limit
    }
}

impl Page {
    /// Offset page; a zero `limit` falls back to `default`.
    pub fn offset(limit: u32, offset: u32, default: u32) -> Self {
        Page::Offset {
            limit: limit_or_default(limit, default),
            offset,
        }
    }

    /// Keyset page; a zero `limit` falls back to `default`.
    pub fn keyset(
        columns: &[&'static str],
        after: Option<Vec<SqlValue>>,
        order: SortOrder,
        limit: u32,
        default: u32,
    ) -> Self {
        Page::Keyset {
            columns: columns.to_vec(),
            after,
            order,
            limit: limit_or_default(limit, default),
        }
    }

    /// Rows requested.
    pub fn limit(&self) -> u32 {
        match self {
            Page::Offset { limit, .. } | Page::Keyset { limit, .. } => *limit,
        }
    }
}

// =============================================================================
// QueryBuilder
// =============================================================================

/// Parameterized statement under construction.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    head: String,
    predicates: Vec<String>,
    tail: Vec<String>,
    order_by: Option<String>,
    page: Option<Page>,
    enhancers: Vec<QueryEnhancer>,
    args: Vec<SqlValue>,
}

impl QueryBuilder {
    /// Starts from arbitrary leading SQL (`SELECT ... FROM ...`,
    /// `UPDATE ... SET ...`, `DELETE FROM ...`).
    pub fn new(head: impl Into<String>) -> Self {
        QueryBuilder {
            head: head.into(),
            predicates: Vec::new(),
            tail: Vec::new(),
            order_by: None,
            page: None,
            enhancers: Vec::new(),
            args: Vec::new(),
        }
    }

    /// `SELECT <entity fields> FROM <table>`.
    pub fn select<E: Entity>() -> Self {
        QueryBuilder::new(format!("SELECT {} FROM {}", columns::<E>(), E::TABLE))
    }

    /// Binds a value and returns its placeholder (`$N`).
    pub fn bind(&mut self, value: impl Into<SqlValue>) -> String {
        self.args.push(value.into());
        format!("${}", self.args.len())
    }

    /// Appends raw SQL to the head.
    pub fn push_head(&mut self, sql: &str) -> &mut Self {
        self.head.push_str(sql);
        self
    }

    /// Appends `template` to the head with `{}` bound to `value`, for
    /// `SET col = $N` assignments.
    pub fn push_head_bind(&mut self, template: &str, value: impl Into<SqlValue>) -> &mut Self {
        let placeholder = self.bind(value);
        self.head.push_str(&template.replace(SLOT, &placeholder));
        self
    }

    /// Number of values bound so far.
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    /// Static predicate (no placeholder), e.g. `deleted_at IS NULL`.
    pub fn and_where(&mut self, predicate: impl Into<String>) -> &mut Self {
        self.predicates.push(predicate.into());
        self
    }

    /// Predicate with one bound value; each `{}` in `template` becomes the
    /// same `$N`.
    pub fn and_bind(&mut self, template: &str, value: impl Into<SqlValue>) -> &mut Self {
        let placeholder = self.bind(value);
        self.predicates.push(template.replace(SLOT, &placeholder));
        self
    }

    /// Omission style: `None` adds nothing.
    pub fn and_opt<V: Into<SqlValue>>(&mut self, template: &str, value: Option<V>) -> &mut Self {
        if let Some(value) = value {
            self.and_bind(template, value);
        }
        self
    }

    /// Tautology style: always adds `template`, binding `value` even when it
    /// is NULL. The template should read like `({}::text IS NULL OR col = {})`.
    pub fn and_nullable(&mut self, template: &str, value: impl Into<SqlValue>) -> &mut Self {
        self.and_bind(template, value)
    }

    /// Raw SQL placed after the `WHERE` clause (e.g. `GROUP BY`).
    pub fn push_tail(&mut self, sql: impl Into<String>) -> &mut Self {
        self.tail.push(sql.into());
        self
    }

    /// `ORDER BY <clause>`; ignored when a keyset page is set.
    pub fn order_by(&mut self, clause: impl Into<String>) -> &mut Self {
        self.order_by = Some(clause.into());
        self
    }

    /// Sets the page; a later call replaces an earlier one.
    pub fn paginate(&mut self, page: Page) -> &mut Self {
        self.page = Some(page);
        self
    }

    /// Decorators applied to the finished statement (lock clauses).
    pub fn enhance(&mut self, enhancers: &[QueryEnhancer]) -> &mut Self {
        self.enhancers.extend_from_slice(enhancers);
        self
    }

    /// Folds everything into SQL text and its arguments.
    pub fn build(mut self) -> (String, Vec<SqlValue>) {
        let mut order_by = self.order_by.take();
        let mut limit_clause = None;

        match self.page.take() {
            Some(Page::Offset { limit, offset }) => {
                let limit = self.bind(i64::from(limit));
                let offset = self.bind(i64::from(offset));
                limit_clause = Some(format!("LIMIT {limit} OFFSET {offset}"));
            }
            Some(Page::Keyset {
                columns,
                after,
                order,
                limit,
            }) => {
                let tuple = columns.join(", ");
                if let Some(cursor) = after {
                    let slots = cursor
                        .into_iter()
                        .map(|v| self.bind(v))
                        .collect::<Vec<_>>()
                        .join(", ");
                    self.predicates.push(format!(
                        "({tuple}) {} ({slots})",
                        order.comparison()
                    ));
                }
                order_by = Some(
                    columns
                        .iter()
                        .map(|c| format!("{c} {}", order.keyword()))
                        .collect::<Vec<_>>()
                        .join(", "),
                );
                let limit = self.bind(i64::from(limit));
                limit_clause = Some(format!("LIMIT {limit}"));
            }
            None => {}
        }

        let mut sql = self.head;
        if !self.predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.predicates.join(" AND "));
        }
        for tail in &self.tail {
            sql.push(' ');
            sql.push_str(tail);
        }
        if let Some(order_by) = order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(&order_by);
        }
        if let Some(limit_clause) = limit_clause {
            sql.push(' ');
            sql.push_str(&limit_clause);
        }
        enhance(&mut sql, &self.enhancers);

        (sql, self.args)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_omission_style_renumbers() {
        let school: Option<i32> = Some(7);
        let country: Option<String> = None;
        let subject = Some("math");

        let mut q = QueryBuilder::new("SELECT * FROM books");
        q.and_where("deleted_at IS NULL")
            .and_opt("country = {}", country)
            .and_opt("school_id = {}", school)
            .and_opt("subject = {}", subject);
        let (sql, args) = q.build();

        assert_eq!(
            sql,
            "SELECT * FROM books WHERE deleted_at IS NULL AND school_id = $1 AND subject = $2"
        );
        assert_eq!(args, vec![SqlValue::from(7_i32), SqlValue::from("math")]);
    }

    #[test]
    fn test_tautology_style_keeps_positions() {
        let build = |status: Option<&str>| {
            let mut q = QueryBuilder::new("SELECT * FROM quizzes");
            q.and_bind("lo_ids && {}", vec!["lo-1".to_string()])
                .and_nullable("({}::text IS NULL OR status = {})", status);
            q.build()
        };

        let (with, with_args) = build(Some("QUIZ_STATUS_NEW"));
        let (without, without_args) = build(None);

        assert_eq!(with, without);
        assert_eq!(
            with,
            "SELECT * FROM quizzes WHERE lo_ids && $1 AND ($2::text IS NULL OR status = $2)"
        );
        assert_eq!(with_args.len(), 2);
        assert!(without_args[1].is_null());
    }

    #[test]
    fn test_offset_page_defaults_limit() {
        let mut q = QueryBuilder::new("SELECT * FROM chapters");
        q.and_bind("book_id = {}", "book-1")
            .order_by("display_order ASC")
            .paginate(Page::offset(0, 20, 10));
        let (sql, args) = q.build();

        assert_eq!(
            sql,
            "SELECT * FROM chapters WHERE book_id = $1 ORDER BY display_order ASC LIMIT $2 OFFSET $3"
        );
        assert_eq!(args[1], SqlValue::from(10_i64));
        assert_eq!(args[2], SqlValue::from(20_i64));
    }

    #[test]
    fn test_explicit_limit_is_honoured() {
        assert_eq!(Page::offset(3, 0, 10).limit(), 3);
        assert_eq!(
            Page::keyset(&["name"], None, SortOrder::Asc, 0, 5).limit(),
            5
        );
    }

    #[test]
    fn test_keyset_first_and_next_page() {
        let first = {
            let mut q = QueryBuilder::new("SELECT * FROM study_plans");
            q.and_bind("course_id = {}", "course-1").paginate(Page::keyset(
                &["name", "study_plan_id"],
                None,
                SortOrder::Asc,
                0,
                5,
            ));
            q.build()
        };
        assert_eq!(
            first.0,
            "SELECT * FROM study_plans WHERE course_id = $1 ORDER BY name ASC, study_plan_id ASC LIMIT $2"
        );

        let next = {
            let mut q = QueryBuilder::new("SELECT * FROM study_plans");
            q.and_bind("course_id = {}", "course-1").paginate(Page::keyset(
                &["name", "study_plan_id"],
                Some(vec!["Plan B".into(), "sp-2".into()]),
                SortOrder::Asc,
                5,
                5,
            ));
            q.build()
        };
        assert_eq!(
            next.0,
            "SELECT * FROM study_plans WHERE course_id = $1 AND (name, study_plan_id) > ($2, $3) ORDER BY name ASC, study_plan_id ASC LIMIT $4"
        );
        assert_eq!(next.1.len(), 4);
    }

    #[test]
    fn test_keyset_descending_has_no_offset() {
        let mut q = QueryBuilder::new("SELECT * FROM lessons");
        q.order_by("ignored").paginate(Page::keyset(
            &["created_at", "lesson_id"],
            Some(vec![chrono::Utc::now().into(), "lesson-9".into()]),
            SortOrder::Desc,
            10,
            10,
        ));
        let (sql, _) = q.build();

        assert!(sql.contains("(created_at, lesson_id) < ($1, $2)"));
        assert!(sql.ends_with("ORDER BY created_at DESC, lesson_id DESC LIMIT $3"));
        assert!(!sql.contains("OFFSET"));
    }

    #[test]
    fn test_lock_enhancers_append() {
        let mut q = QueryBuilder::new("SELECT * FROM topics");
        q.and_bind("topic_id = {}", "t1").enhance(&[for_update]);
        let (sql, _) = q.build();
        assert_eq!(sql, "SELECT * FROM topics WHERE topic_id = $1 FOR UPDATE");

        let mut raw = "SELECT 1".to_string();
        enhance(&mut raw, &[for_share]);
        assert_eq!(raw, "SELECT 1 FOR SHARE");
    }

    #[test]
    fn test_head_bindings_number_first() {
        let mut q = QueryBuilder::new("UPDATE topics SET ");
        q.push_head_bind("total_los = {}", 4_i32)
            .push_head(", updated_at = NOW()")
            .and_bind("topic_id = {}", "t1")
            .and_where("deleted_at IS NULL");
        let (sql, args) = q.build();

        assert_eq!(
            sql,
            "UPDATE topics SET total_los = $1, updated_at = NOW() WHERE topic_id = $2 AND deleted_at IS NULL"
        );
        assert_eq!(args, vec![SqlValue::from(4_i32), SqlValue::from("t1")]);
    }
}
