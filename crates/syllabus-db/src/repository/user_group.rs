//! # User Group Repository
//!
//! A user belongs to one or more groups; the active origin membership
//! decides the user's role. Memberships are switched off by status, never
//! deleted, so `users_groups` has no `deleted_at`.

use chrono::{DateTime, Utc};
use syllabus_core::validation::validate_id;
use syllabus_core::{UserGroup, UserGroupStatus, ValidationError};

use crate::batch::upsert_each;
use crate::entity::{Conflict, Entity, Upsert};
use crate::error::DbResult;
use crate::executor::Executor;
use crate::mapper::find_one;
use crate::query::QueryBuilder;
use crate::value::{Row, SqlValue};

impl Entity for UserGroup {
    const TABLE: &'static str = "users_groups";
    const FIELDS: &'static [&'static str] = &[
        "user_id",
        "group_id",
        "is_origin",
        "status",
        "created_at",
        "updated_at",
    ];
    const PRIMARY_KEY: &'static [&'static str] = &["user_id", "group_id"];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            (&self.user_id).into(),
            (&self.group_id).into(),
            self.is_origin.into(),
            self.status.as_str().into(),
            self.created_at.into(),
            self.updated_at.into(),
        ]
    }

    fn from_row(row: &Row) -> DbResult<Self> {
        Ok(UserGroup {
            user_id: row.get("user_id")?,
            group_id: row.get("group_id")?,
            is_origin: row.get("is_origin")?,
            status: row.get_parsed("status")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn set_timestamps(&mut self, now: DateTime<Utc>) {
        self.created_at = now;
        self.updated_at = now;
    }

    fn validate(&self) -> Result<(), ValidationError> {
        validate_id("user_id", &self.user_id)?;
        validate_id("group_id", &self.group_id)
    }
}

pub(crate) const USER_GROUP_UPSERT: Upsert = Upsert {
    conflict: Conflict::Constraint("users_groups_pk"),
    update: &["is_origin", "status", "updated_at"],
};

/// Repository for `users_groups`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserGroupRepository;

impl UserGroupRepository {
    /// The user's active origin group.
    ///
    /// ## Returns
    /// * `Err(DbError::NotFound)` - the user has no active origin group
    #[tracing::instrument(name = "UserGroupRepo.FindUserGroup", skip_all, fields(user_id = %user_id))]
    pub async fn find_user_group(&self, db: &dyn Executor, user_id: &str) -> DbResult<UserGroup> {
        let mut query = QueryBuilder::select::<UserGroup>();
        query
            .and_bind("user_id = {}", user_id)
            .and_where("is_origin = TRUE")
            .and_bind("status = {}", UserGroupStatus::Active.as_str());
        let (sql, args) = query.build();

        find_one(db, &sql, args, user_id).await
    }

    #[tracing::instrument(name = "UserGroupRepo.Upsert", skip_all, fields(count = groups.len()))]
    pub async fn upsert(&self, db: &dyn Executor, groups: &mut [UserGroup]) -> DbResult<()> {
        upsert_each(db, groups, &USER_GROUP_UPSERT).await
    }
}
