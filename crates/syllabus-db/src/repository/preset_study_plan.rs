//! # Preset Study Plan Repository
//!
//! Preset plans are templates; each carries a schedule of weekly topics in
//! `preset_study_plans_weekly`.
//!
//! ## Bulk Import Batch
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  plans [p1, p2]          weeklies [w1, w2 of p1; w3 of p3]              │
//! │       │                                                                 │
//! │       ▼  SELECT stored weeks of p1, p3 (active only)                    │
//! │  changed = plans whose stored weeks exist and differ  → e.g. [p3]       │
//! │       │                                                                 │
//! │       ▼  one batch, one round trip                                      │
//! │  1. upsert p1, p2                      (1 row each)                     │
//! │  2. soft-delete weeklies of changed    (only if any, any count)         │
//! │  3. upsert w1, w2, w3                  (1 row each, revives w*)         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  results read in queue order; first error → "batchResults.Exec: ..."    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A schedule is compared as its sorted `(week, weekly id, topic id)` list.
//! p2 above has no incoming weeks, so its schedule stays as stored.
//!
//! Plans have no `deleted_at`; they are only ever replaced.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use syllabus_core::validation::{validate_id, validate_name};
use syllabus_core::{new_id, PresetStudyPlan, PresetStudyPlanWeekly, ValidationError};
use tracing::debug;

use crate::batch::{exec_each, queue_inserts, queue_upserts, Batch};
use crate::entity::{Conflict, Entity, Upsert};
use crate::error::{DbError, DbResult, ResultExt};
use crate::executor::Executor;
use crate::mapper::find_all;
use crate::query::{Page, QueryBuilder};
use crate::value::{Row, SqlValue};

impl Entity for PresetStudyPlan {
    const TABLE: &'static str = "preset_study_plans";
    const FIELDS: &'static [&'static str] = &[
        "preset_study_plan_id",
        "name",
        "country",
        "grade",
        "subject",
        "start_date",
        "created_at",
        "updated_at",
    ];
    const PRIMARY_KEY: &'static [&'static str] = &["preset_study_plan_id"];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            (&self.preset_study_plan_id).into(),
            (&self.name).into(),
            (&self.country).into(),
            self.grade.into(),
            (&self.subject).into(),
            self.start_date.into(),
            self.created_at.into(),
            self.updated_at.into(),
        ]
    }

    fn from_row(row: &Row) -> DbResult<Self> {
        Ok(PresetStudyPlan {
            preset_study_plan_id: row.get("preset_study_plan_id")?,
            name: row.get("name")?,
            country: row.get("country")?,
            grade: row.get("grade")?,
            subject: row.get("subject")?,
            start_date: row.get("start_date")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn set_timestamps(&mut self, now: DateTime<Utc>) {
        self.created_at = now;
        self.updated_at = now;
    }

    fn validate(&self) -> Result<(), ValidationError> {
        validate_id("preset_study_plan_id", &self.preset_study_plan_id)?;
        validate_name("name", &self.name)
    }
}

impl Entity for PresetStudyPlanWeekly {
    const TABLE: &'static str = "preset_study_plans_weekly";
    const FIELDS: &'static [&'static str] = &[
        "preset_study_plan_weekly_id",
        "preset_study_plan_id",
        "topic_id",
        "week",
        "start_date",
        "end_date",
        "created_at",
        "updated_at",
        "deleted_at",
    ];
    const PRIMARY_KEY: &'static [&'static str] = &["preset_study_plan_weekly_id"];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            (&self.preset_study_plan_weekly_id).into(),
            (&self.preset_study_plan_id).into(),
            (&self.topic_id).into(),
            self.week.into(),
            self.start_date.into(),
            self.end_date.into(),
            self.created_at.into(),
            self.updated_at.into(),
            self.deleted_at.into(),
        ]
    }

    fn from_row(row: &Row) -> DbResult<Self> {
        Ok(PresetStudyPlanWeekly {
            preset_study_plan_weekly_id: row.get("preset_study_plan_weekly_id")?,
            preset_study_plan_id: row.get("preset_study_plan_id")?,
            topic_id: row.get("topic_id")?,
            week: row.get("week")?,
            start_date: row.get("start_date")?,
            end_date: row.get("end_date")?,
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
        PresetStudyPlanWeekly::validate(self)
    }
}

pub(crate) const PLAN_UPSERT: Upsert = Upsert {
    conflict: Conflict::Constraint("preset_study_plans_pk"),
    update: &["name", "country", "grade", "subject", "start_date", "updated_at"],
};

/// Re-importing a week clears `deleted_at`, undoing step 2 for weeks that
/// are still scheduled.
pub(crate) const WEEKLY_UPSERT: Upsert = Upsert {
    conflict: Conflict::Constraint("preset_study_plans_weekly_pk"),
    update: &[
        "preset_study_plan_id",
        "topic_id",
        "week",
        "start_date",
        "end_date",
        "updated_at",
        "deleted_at",
    ],
};

const CLEAR_WEEKLIES: &str = "UPDATE preset_study_plans_weekly SET deleted_at = NOW(), updated_at = NOW() \
     WHERE preset_study_plan_id = ANY($1) AND deleted_at IS NULL";

/// `(week, weekly id, topic id)` entries of one plan, sorted.
type Schedule = Vec<(i32, String, String)>;

fn schedules<'a>(
    weeklies: impl Iterator<Item = &'a PresetStudyPlanWeekly>,
) -> BTreeMap<String, Schedule> {
    let mut plans: BTreeMap<String, Schedule> = BTreeMap::new();
    for weekly in weeklies {
        plans
            .entry(weekly.preset_study_plan_id.clone())
            .or_default()
            .push((
                weekly.week,
                weekly.preset_study_plan_weekly_id.clone(),
                weekly.topic_id.clone(),
            ));
    }
    for schedule in plans.values_mut() {
        schedule.sort();
    }
    plans
}

/// Optional filters for [`PresetStudyPlanRepository::retrieve`]. Unset
/// fields don't filter.
#[derive(Debug, Clone, Default)]
pub struct PresetStudyPlanFilter {
    pub country: Option<String>,
    pub grade: Option<i32>,
    pub subject: Option<String>,
    /// Plans starting at or after this instant.
    pub starts_from: Option<DateTime<Utc>>,
    pub limit: u32,
    pub offset: u32,
}

const DEFAULT_LIMIT: u32 = 10;

/// Repository for `preset_study_plans` and their weekly schedule.
#[derive(Debug, Clone, Copy, Default)]
pub struct PresetStudyPlanRepository;

impl PresetStudyPlanRepository {
    /// Inserts new plans in one batch, all stamped with the same instant.
    ///
    /// ## Returns
    /// * `Err(DbError::RowsAffected)` - `cannot insert new preset_study_plans`
    #[tracing::instrument(name = "PresetStudyPlanRepo.Create", skip_all, fields(count = plans.len()))]
    pub async fn create(&self, db: &dyn Executor, plans: &mut [PresetStudyPlan]) -> DbResult<()> {
        let mut batch = Batch::new();
        let stamped = queue_inserts(&mut batch, plans, Utc::now())?;
        exec_each(db, batch, "insert new", PresetStudyPlan::TABLE).await?;
        plans.clone_from_slice(&stamped);
        Ok(())
    }

    /// Imports plans and their weekly schedules in one batch.
    ///
    /// A plan's stored weeks are cleared only when the incoming weeklies
    /// name that plan and the stored schedule differs from the incoming
    /// one. Plans imported without weeklies keep their schedule.
    ///
    /// Weeklies without an id get a fresh one; the caller's records receive
    /// the ids and timestamps only when the whole batch succeeded.
    /// Statements that already ran are not undone here.
    #[tracing::instrument(name = "PresetStudyPlanRepo.BulkImport", skip_all, fields(plans = plans.len(), weeklies = weeklies.len()))]
    pub async fn bulk_import(
        &self,
        db: &dyn Executor,
        plans: &mut [PresetStudyPlan],
        weeklies: &mut [PresetStudyPlanWeekly],
    ) -> DbResult<()> {
        let mut weekly_records = weeklies.to_vec();
        for weekly in weekly_records.iter_mut() {
            if weekly.preset_study_plan_weekly_id.is_empty() {
                weekly.preset_study_plan_weekly_id = new_id();
            }
            weekly.validate()?;
        }
        for plan in plans.iter() {
            plan.validate()?;
        }

        let changed = self
            .changed_plans(db, &weekly_records)
            .await
            .context("r.changed_plans")?;

        let now = Utc::now();
        let mut batch = Batch::new();
        let stamped_plans = queue_upserts(&mut batch, plans, &PLAN_UPSERT, now)?;
        if !changed.is_empty() {
            batch.queue(CLEAR_WEEKLIES, vec![changed.clone().into()]);
        }
        let stamped_weeklies = queue_upserts(&mut batch, &weekly_records, &WEEKLY_UPSERT, now)?;

        if batch.is_empty() {
            return Ok(());
        }
        debug!(queued = batch.len(), changed = changed.len(), "Sending preset study plan import");

        let mut results = db.send_batch(batch).await;
        for _ in stamped_plans.iter() {
            let tag = results.exec().context("batchResults.Exec")?;
            if tag.rows_affected() != 1 {
                return Err(DbError::cannot_upsert(PresetStudyPlan::TABLE, tag.rows_affected()));
            }
        }
        if !changed.is_empty() {
            let cleared = results.exec().context("batchResults.Exec")?;
            debug!(cleared = cleared.rows_affected(), "Previous weeklies cleared");
        }
        for _ in stamped_weeklies.iter() {
            let tag = results.exec().context("batchResults.Exec")?;
            if tag.rows_affected() != 1 {
                return Err(DbError::cannot_upsert(
                    PresetStudyPlanWeekly::TABLE,
                    tag.rows_affected(),
                ));
            }
        }

        plans.clone_from_slice(&stamped_plans);
        weeklies.clone_from_slice(&stamped_weeklies);
        Ok(())
    }

    /// Plans named by `weeklies` whose stored active schedule exists and
    /// differs from the incoming one, in id order.
    async fn changed_plans(
        &self,
        db: &dyn Executor,
        weeklies: &[PresetStudyPlanWeekly],
    ) -> DbResult<Vec<String>> {
        let incoming = schedules(weeklies.iter());
        if incoming.is_empty() {
            return Ok(Vec::new());
        }

        let plan_ids: Vec<String> = incoming.keys().cloned().collect();
        let mut query = QueryBuilder::select::<PresetStudyPlanWeekly>();
        query
            .and_bind("preset_study_plan_id = ANY({})", plan_ids)
            .and_where("deleted_at IS NULL");
        let (sql, args) = query.build();
        let stored_rows: Vec<PresetStudyPlanWeekly> = find_all(db, &sql, args).await?;
        let stored = schedules(stored_rows.iter());

        Ok(incoming
            .into_iter()
            .filter(|(plan_id, weeks)| stored.get(plan_id).is_some_and(|before| before != weeks))
            .map(|(plan_id, _)| plan_id)
            .collect())
    }

    /// Preset plans matching the filter, earliest start first.
    #[tracing::instrument(name = "PresetStudyPlanRepo.Retrieve", skip_all)]
    pub async fn retrieve(
        &self,
        db: &dyn Executor,
        filter: &PresetStudyPlanFilter,
    ) -> DbResult<Vec<PresetStudyPlan>> {
        let mut query = QueryBuilder::select::<PresetStudyPlan>();
        query
            .and_opt("country = {}", filter.country.as_deref())
            .and_opt("grade = {}", filter.grade)
            .and_opt("subject = {}", filter.subject.as_deref())
            .and_opt("start_date >= {}", filter.starts_from)
            .order_by("start_date, preset_study_plan_id")
            .paginate(Page::offset(filter.limit, filter.offset, DEFAULT_LIMIT));
        let (sql, args) = query.build();

        find_all(db, &sql, args).await
    }

    /// Active weeks of one plan in week order.
    #[tracing::instrument(name = "PresetStudyPlanRepo.RetrieveWeeklies", skip_all, fields(preset_study_plan_id = %preset_study_plan_id))]
    pub async fn retrieve_weeklies(
        &self,
        db: &dyn Executor,
        preset_study_plan_id: &str,
    ) -> DbResult<Vec<PresetStudyPlanWeekly>> {
        let mut query = QueryBuilder::select::<PresetStudyPlanWeekly>();
        query
            .and_bind("preset_study_plan_id = {}", preset_study_plan_id)
            .and_where("deleted_at IS NULL")
            .order_by("week, preset_study_plan_weekly_id");
        let (sql, args) = query.build();

        find_all(db, &sql, args).await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::StatementResult;
    use crate::testing::{assert_round_trip, fixtures, row_of, MockExecutor};

    #[test]
    fn test_round_trip() {
        assert_round_trip(&fixtures::preset_study_plan("psp-1"));
        assert_round_trip(&fixtures::preset_weekly("w1", "psp-1", "t1", 1));
    }

    #[tokio::test]
    async fn test_create_shares_one_instant() {
        let db = MockExecutor::new();
        let mut plans = vec![
            fixtures::preset_study_plan("psp-1"),
            fixtures::preset_study_plan("psp-2"),
        ];

        PresetStudyPlanRepository.create(&db, &mut plans).await.unwrap();

        assert_eq!(plans[0].created_at, plans[1].created_at);
        let batch = &db.batches()[0];
        assert_eq!(batch.len(), 2);
        assert!(!batch.statements()[0].sql.contains("ON CONFLICT"));
    }

    #[tokio::test]
    async fn test_create_zero_rows() {
        let db = MockExecutor::new();
        db.push_batch(vec![Ok(StatementResult::affected(0))]);
        let mut plans = vec![fixtures::preset_study_plan("psp-1")];

        let err = PresetStudyPlanRepository
            .create(&db, &mut plans)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "cannot insert new preset_study_plans");
    }

    #[tokio::test]
    async fn test_bulk_import_batch_layout() {
        let db = MockExecutor::new();
        db.push_rows(vec![row_of(&fixtures::preset_weekly("w-old", "psp-1", "t0", 1))]);
        db.push_batch(vec![
            Ok(StatementResult::affected(1)),
            Ok(StatementResult::affected(4)),
            Ok(StatementResult::affected(1)),
            Ok(StatementResult::affected(1)),
        ]);
        let mut plans = vec![fixtures::preset_study_plan("psp-1")];
        let mut weeklies = vec![
            fixtures::preset_weekly("", "psp-1", "t1", 1),
            fixtures::preset_weekly("w2", "psp-1", "t2", 2),
        ];

        PresetStudyPlanRepository
            .bulk_import(&db, &mut plans, &mut weeklies)
            .await
            .unwrap();

        let select = &db.executed()[0];
        assert!(select.sql.ends_with(
            "FROM preset_study_plans_weekly WHERE preset_study_plan_id = ANY($1) AND deleted_at IS NULL"
        ));
        let batch = &db.batches()[0];
        assert_eq!(batch.len(), 4);
        assert!(batch.statements()[0].sql.starts_with("INSERT INTO preset_study_plans "));
        assert_eq!(batch.statements()[1].sql, CLEAR_WEEKLIES);
        assert_eq!(
            batch.statements()[1].args,
            vec![SqlValue::TextArray(Some(vec!["psp-1".to_string()]))]
        );
        assert!(batch.statements()[2].sql.starts_with("INSERT INTO preset_study_plans_weekly"));
        assert!(!weeklies[0].preset_study_plan_weekly_id.is_empty());
        assert_eq!(weeklies[1].preset_study_plan_weekly_id, "w2");
    }

    #[tokio::test]
    async fn test_bulk_import_fails_fast_on_third_of_five() {
        let db = MockExecutor::new();
        db.push_rows(vec![row_of(&fixtures::preset_weekly("w-old", "psp-1", "t0", 1))]);
        db.push_batch(vec![
            Ok(StatementResult::affected(1)),
            Ok(StatementResult::affected(0)),
            Err(DbError::ForeignKeyViolation {
                message: "preset_study_plans_weekly_plan_fk".to_string(),
            }),
            Ok(StatementResult::affected(1)),
            Ok(StatementResult::affected(1)),
        ]);
        let mut plans = vec![fixtures::preset_study_plan("psp-1")];
        let mut weeklies = vec![
            fixtures::preset_weekly("", "psp-1", "t1", 1),
            fixtures::preset_weekly("", "psp-1", "t2", 2),
            fixtures::preset_weekly("", "psp-1", "t3", 3),
        ];

        let err = PresetStudyPlanRepository
            .bulk_import(&db, &mut plans, &mut weeklies)
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "batchResults.Exec: Foreign key violation: preset_study_plans_weekly_plan_fk"
        );
        assert!(weeklies.iter().all(|w| w.preset_study_plan_weekly_id.is_empty()));
    }

    #[tokio::test]
    async fn test_bulk_import_rejects_bad_week_before_sending() {
        let db = MockExecutor::new();
        let mut plans = vec![fixtures::preset_study_plan("psp-1")];
        let mut weeklies = vec![fixtures::preset_weekly("w1", "psp-1", "t1", 0)];
        let before = plans.clone();

        let err = PresetStudyPlanRepository
            .bulk_import(&db, &mut plans, &mut weeklies)
            .await
            .unwrap_err();

        assert!(matches!(err, DbError::Validation(_)));
        assert!(db.executed().is_empty());
        assert!(db.batches().is_empty());
        assert_eq!(plans, before);
    }

    #[tokio::test]
    async fn test_bulk_import_weeklies_alone_replace_changed_schedule() {
        let db = MockExecutor::new();
        db.push_rows(vec![
            row_of(&fixtures::preset_weekly("w1", "psp-1", "t1", 1)),
            row_of(&fixtures::preset_weekly("w2", "psp-1", "t2", 2)),
        ]);
        let mut weeklies = vec![fixtures::preset_weekly("", "psp-1", "t9", 1)];

        PresetStudyPlanRepository
            .bulk_import(&db, &mut [], &mut weeklies)
            .await
            .unwrap();

        let batch = &db.batches()[0];
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.statements()[0].sql, CLEAR_WEEKLIES);
        assert_eq!(
            batch.statements()[0].args,
            vec![SqlValue::TextArray(Some(vec!["psp-1".to_string()]))]
        );
        assert!(batch.statements()[1].sql.starts_with("INSERT INTO preset_study_plans_weekly"));
    }

    #[tokio::test]
    async fn test_bulk_import_plan_without_weeklies_keeps_schedule() {
        let db = MockExecutor::new();
        let mut plans = vec![fixtures::preset_study_plan("psp-1")];

        PresetStudyPlanRepository
            .bulk_import(&db, &mut plans, &mut [])
            .await
            .unwrap();

        assert!(db.executed().is_empty());
        let batch = &db.batches()[0];
        assert_eq!(batch.len(), 1);
        assert!(batch.statements().iter().all(|s| s.sql != CLEAR_WEEKLIES));
    }

    #[tokio::test]
    async fn test_bulk_import_same_schedule_is_not_cleared() {
        let db = MockExecutor::new();
        db.push_rows(vec![
            row_of(&fixtures::preset_weekly("w2", "psp-1", "t2", 2)),
            row_of(&fixtures::preset_weekly("w1", "psp-1", "t1", 1)),
        ]);
        let mut weeklies = vec![
            fixtures::preset_weekly("w1", "psp-1", "t1", 1),
            fixtures::preset_weekly("w2", "psp-1", "t2", 2),
        ];

        PresetStudyPlanRepository
            .bulk_import(&db, &mut [], &mut weeklies)
            .await
            .unwrap();

        let batch = &db.batches()[0];
        assert_eq!(batch.len(), 2);
        assert!(batch.statements().iter().all(|s| s.sql != CLEAR_WEEKLIES));
    }

    #[tokio::test]
    async fn test_bulk_import_new_plan_has_nothing_to_clear() {
        let db = MockExecutor::new();
        let mut plans = vec![fixtures::preset_study_plan("psp-new")];
        let mut weeklies = vec![fixtures::preset_weekly("w1", "psp-new", "t1", 1)];

        PresetStudyPlanRepository
            .bulk_import(&db, &mut plans, &mut weeklies)
            .await
            .unwrap();

        assert_eq!(db.executed().len(), 1);
        assert_eq!(db.batches()[0].len(), 2);
    }

    #[tokio::test]
    async fn test_retrieve_omits_unset_filters() {
        let db = MockExecutor::new();
        let filter = PresetStudyPlanFilter {
            grade: Some(5),
            ..Default::default()
        };

        PresetStudyPlanRepository.retrieve(&db, &filter).await.unwrap();

        let stmt = db.last().unwrap();
        assert!(stmt.sql.ends_with(
            "FROM preset_study_plans WHERE grade = $1 ORDER BY start_date, preset_study_plan_id LIMIT $2 OFFSET $3"
        ));
        assert_eq!(stmt.args[0], SqlValue::from(5_i32));
    }
}
