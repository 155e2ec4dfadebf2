use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::catalog::resource::normalize_name;
use crate::error::BastionError;
use crate::grants::{junction_grants, write_both};
use crate::guard;
use crate::models::role::{self, Entity as Role, LOWEST_LEVEL, ROOT_LEVEL};
use crate::models::role_permission::{self, Entity as RolePermission};
use crate::models::{Category, EmbeddedGrants, PermissionStats, RoleType};

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RoleFilter {
    #[serde(rename = "type")]
    pub role_type: Option<RoleType>,
    /// Defaults to active roles only.
    pub is_active: Option<bool>,
    #[serde(default)]
    pub include_deleted: bool,
}

fn default_level() -> i32 {
    LOWEST_LEVEL
}

fn default_role_type() -> RoleType {
    RoleType::Custom
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct NewRole {
    #[validate(length(min = 1, max = 60, message = "name must be 1-60 characters"))]
    pub name: String,
    #[validate(length(min = 1, message = "display_name is required"))]
    pub display_name: String,
    pub description: Option<String>,
    #[serde(rename = "type", default = "default_role_type")]
    pub role_type: RoleType,
    #[validate(range(min = 1, max = 100, message = "level must be between 1 and 100"))]
    #[serde(default = "default_level")]
    pub level: i32,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate, ToSchema)]
pub struct RoleUpdate {
    #[validate(length(min = 1, max = 60, message = "name must be 1-60 characters"))]
    pub name: Option<String>,
    #[validate(length(min = 1, message = "display_name must not be empty"))]
    pub display_name: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub role_type: Option<RoleType>,
    #[validate(range(min = 1, max = 100, message = "level must be between 1 and 100"))]
    pub level: Option<i32>,
    pub is_default: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate, ToSchema)]
pub struct CloneRole {
    #[validate(length(min = 1, max = 60, message = "name must be 1-60 characters"))]
    pub name: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoleWithSummary {
    #[serde(flatten)]
    pub role: role::Model,
    pub permission_count: u64,
    pub categories: Vec<Category>,
}

/// Role records: lookup, lifecycle, cloning and assignment bookkeeping.
///
/// Mutations that could widen privilege take the acting role and go through
/// [`guard`] first.
#[derive(Clone)]
pub struct RoleRegistry {
    db: DatabaseConnection,
}

impl RoleRegistry {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn list(&self, filter: &RoleFilter) -> Result<Vec<role::Model>, BastionError> {
        let mut query =
            Role::find().filter(role::Column::IsActive.eq(filter.is_active.unwrap_or(true)));
        if !filter.include_deleted {
            query = query.filter(role::Column::IsDeleted.eq(false));
        }
        if let Some(role_type) = filter.role_type {
            query = query.filter(role::Column::RoleType.eq(role_type));
        }
        Ok(query
            .order_by_asc(role::Column::Level)
            .order_by_asc(role::Column::DisplayName)
            .all(&self.db)
            .await?)
    }

    pub async fn list_with_summary(&self) -> Result<Vec<RoleWithSummary>, BastionError> {
        let roles = self.list(&RoleFilter::default()).await?;
        let mut summaries = Vec::with_capacity(roles.len());
        for role in roles {
            let (permission_count, categories) = if role.permissions.0.is_empty() {
                let count = RolePermission::find()
                    .filter(role_permission::Column::RoleId.eq(role.id))
                    .count(&self.db)
                    .await?;
                (count, Vec::new())
            } else {
                (
                    role.permissions.0.len() as u64,
                    role.permission_stats.categories.clone(),
                )
            };
            summaries.push(RoleWithSummary {
                role,
                permission_count,
                categories,
            });
        }
        Ok(summaries)
    }

    /// A non-deleted role.
    pub async fn get(&self, id: i32) -> Result<role::Model, BastionError> {
        Role::find_by_id(id)
            .filter(role::Column::IsDeleted.eq(false))
            .one(&self.db)
            .await?
            .ok_or_else(|| BastionError::NotFound(format!("Role {id} not found")))
    }

    pub async fn get_by_name(&self, name: &str) -> Result<role::Model, BastionError> {
        Role::find()
            .filter(role::Column::Name.eq(normalize_name(name)))
            .filter(role::Column::IsDeleted.eq(false))
            .one(&self.db)
            .await?
            .ok_or_else(|| BastionError::NotFound(format!("Role '{name}' not found")))
    }

    /// An active, non-deleted role, or `None`. Used wherever a role must be
    /// resolvable to act.
    pub async fn find_usable(&self, id: i32) -> Result<Option<role::Model>, BastionError> {
        Ok(Role::find_by_id(id)
            .one(&self.db)
            .await?
            .filter(|r| r.is_usable()))
    }

    /// A non-deleted role that `actor` outranks, or `Forbidden`.
    pub async fn get_manageable(
        &self,
        id: i32,
        actor: Option<&role::Model>,
    ) -> Result<role::Model, BastionError> {
        let target = self.get(id).await?;
        if !guard::can_manage_role(actor, &target) {
            return Err(BastionError::Forbidden(format!(
                "Not allowed to change role '{}'",
                target.name
            )));
        }
        Ok(target)
    }

    pub async fn create(
        &self,
        input: NewRole,
        creator: Option<&role::Model>,
    ) -> Result<role::Model, BastionError> {
        input.validate()?;
        if !guard::can_create_role_with_level(creator, input.level) {
            return Err(BastionError::Forbidden(format!(
                "Not allowed to create a role at level {}",
                input.level
            )));
        }

        let name = normalize_name(&input.name);
        if self.name_taken(&name, None).await? {
            return Err(BastionError::Duplicate(format!("Role '{name}' already exists")));
        }
        if input.level == ROOT_LEVEL && self.root_taken(None).await? {
            return Err(BastionError::Duplicate(
                "A root role (level 1) already exists".to_string(),
            ));
        }

        let created = self
            .insert(
                name,
                input.display_name,
                input.description,
                input.role_type,
                input.level,
                input.is_default,
                creator.map(|r| r.name.clone()),
            )
            .await?;
        tracing::info!(role = %created.name, level = created.level, "role created");
        Ok(created)
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert(
        &self,
        name: String,
        display_name: String,
        description: Option<String>,
        role_type: RoleType,
        level: i32,
        is_default: bool,
        updated_by: Option<String>,
    ) -> Result<role::Model, BastionError> {
        let now = Utc::now().naive_utc();
        Ok(role::ActiveModel {
            name: Set(name),
            display_name: Set(display_name),
            description: Set(description),
            role_type: Set(role_type),
            level: Set(level),
            is_active: Set(true),
            is_default: Set(is_default),
            user_count: Set(0),
            is_deleted: Set(false),
            deleted_at: Set(None),
            permissions: Set(EmbeddedGrants::default()),
            permission_stats: Set(PermissionStats::default()),
            updated_by: Set(updated_by),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&self.db)
        .await?)
    }

    pub async fn update(
        &self,
        id: i32,
        input: RoleUpdate,
        actor: Option<&role::Model>,
    ) -> Result<role::Model, BastionError> {
        input.validate()?;
        let existing = self.get_manageable(id, actor).await?;

        if existing.is_system() {
            if input.role_type.is_some_and(|t| t != RoleType::System) {
                return Err(BastionError::SystemProtected(format!(
                    "Cannot change the type of system role '{}'",
                    existing.name
                )));
            }
            if input.level.is_some_and(|l| l != existing.level) {
                return Err(BastionError::SystemProtected(format!(
                    "Cannot change the level of system role '{}'",
                    existing.name
                )));
            }
            if input
                .name
                .as_deref()
                .is_some_and(|n| normalize_name(n) != existing.name)
            {
                return Err(BastionError::SystemProtected(format!(
                    "Cannot rename system role '{}'",
                    existing.name
                )));
            }
        }

        if let Some(level) = input.level {
            if level != existing.level && !guard::can_create_role_with_level(actor, level) {
                return Err(BastionError::Forbidden(format!(
                    "Not allowed to move a role to level {level}"
                )));
            }
            if level == ROOT_LEVEL && level != existing.level && self.root_taken(Some(id)).await? {
                return Err(BastionError::Duplicate(
                    "A root role (level 1) already exists".to_string(),
                ));
            }
        }

        if let Some(raw) = &input.name {
            let name = normalize_name(raw);
            if name != existing.name && self.name_taken(&name, Some(id)).await? {
                return Err(BastionError::Duplicate(format!("Role '{name}' already exists")));
            }
        }

        let mut model = existing.into_active_model();
        if let Some(name) = input.name {
            model.name = Set(normalize_name(&name));
        }
        if let Some(display_name) = input.display_name {
            model.display_name = Set(display_name);
        }
        if let Some(description) = input.description {
            model.description = Set(Some(description));
        }
        if let Some(role_type) = input.role_type {
            model.role_type = Set(role_type);
        }
        if let Some(level) = input.level {
            model.level = Set(level);
        }
        if let Some(is_default) = input.is_default {
            model.is_default = Set(is_default);
        }
        model.updated_by = Set(actor.map(|r| r.name.clone()));
        model.updated_at = Set(Utc::now().naive_utc());
        Ok(model.update(&self.db).await?)
    }

    /// Soft delete. Both grant forms are cleared with the role.
    pub async fn delete(&self, id: i32, actor: Option<&role::Model>) -> Result<(), BastionError> {
        let existing = self.get_manageable(id, actor).await?;
        if existing.is_system() {
            return Err(BastionError::SystemProtected(format!(
                "Cannot delete system role '{}'",
                existing.name
            )));
        }

        let now = Utc::now().naive_utc();
        let name = existing.name.clone();
        let txn = self.db.begin().await?;
        let cleared = write_both(&txn, existing, Vec::new(), actor.map(|r| r.name.as_str())).await?;
        let mut model = cleared.into_active_model();
        model.is_deleted = Set(true);
        model.deleted_at = Set(Some(now));
        model.is_active = Set(false);
        model.update(&txn).await?;
        txn.commit().await?;

        tracing::info!(role = %name, id, "role deleted");
        Ok(())
    }

    pub async fn toggle_status(
        &self,
        id: i32,
        actor: Option<&role::Model>,
    ) -> Result<role::Model, BastionError> {
        let existing = self.get_manageable(id, actor).await?;
        if existing.is_system() && existing.is_active {
            return Err(BastionError::SystemProtected(format!(
                "Cannot deactivate system role '{}'",
                existing.name
            )));
        }
        let next = !existing.is_active;
        let mut model = existing.into_active_model();
        model.is_active = Set(next);
        model.updated_by = Set(actor.map(|r| r.name.clone()));
        model.updated_at = Set(Utc::now().naive_utc());
        Ok(model.update(&self.db).await?)
    }

    /// Copy a role and its grants into a new custom role one level below the
    /// source.
    pub async fn clone_role(
        &self,
        id: i32,
        input: CloneRole,
        creator: Option<&role::Model>,
    ) -> Result<role::Model, BastionError> {
        input.validate()?;
        let source = self.get(id).await?;
        let level = (source.level + 1).min(LOWEST_LEVEL);

        if !guard::can_create_role_with_level(creator, level) {
            return Err(BastionError::Forbidden(format!(
                "Not allowed to create a role at level {level}"
            )));
        }

        let name = normalize_name(
            &input
                .name
                .unwrap_or_else(|| format!("{}-copy", source.name)),
        );
        if self.name_taken(&name, None).await? {
            return Err(BastionError::Duplicate(format!("Role '{name}' already exists")));
        }
        let display_name = input
            .display_name
            .unwrap_or_else(|| format!("{} (Copy)", source.display_name));

        let grants = if source.permissions.0.is_empty() {
            junction_grants(&self.db, source.id).await?
        } else {
            source.permissions.0.clone()
        };

        let actor = creator.map(|r| r.name.clone());
        let txn = self.db.begin().await?;
        let now = Utc::now().naive_utc();
        let fresh = role::ActiveModel {
            name: Set(name),
            display_name: Set(display_name),
            description: Set(source.description.clone()),
            role_type: Set(RoleType::Custom),
            level: Set(level),
            is_active: Set(true),
            is_default: Set(false),
            user_count: Set(0),
            is_deleted: Set(false),
            deleted_at: Set(None),
            permissions: Set(EmbeddedGrants::default()),
            permission_stats: Set(PermissionStats::default()),
            updated_by: Set(actor.clone()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
        let cloned = write_both(&txn, fresh, grants, actor.as_deref()).await?;
        txn.commit().await?;

        tracing::info!(source = %source.name, role = %cloned.name, "role cloned");
        Ok(cloned)
    }

    /// Record that a user now holds `target_id`, moving them off
    /// `previous_id` when given. Only the user counts are maintained here.
    pub async fn assign(
        &self,
        target_id: i32,
        previous_id: Option<i32>,
        assigner: Option<&role::Model>,
    ) -> Result<role::Model, BastionError> {
        let target = Role::find_by_id(target_id).one(&self.db).await?;
        if !guard::can_assign_role(assigner, target.as_ref()) {
            return Err(BastionError::Forbidden(format!(
                "Not allowed to assign role {target_id}"
            )));
        }
        let Some(target) = target else {
            return Err(BastionError::NotFound(format!("Role {target_id} not found")));
        };
        if !target.is_active {
            return Err(BastionError::Validation(format!(
                "Role '{}' is inactive",
                target.name
            )));
        }
        if previous_id == Some(target_id) {
            return Ok(target);
        }

        let txn = self.db.begin().await?;
        if let Some(previous_id) = previous_id {
            if let Some(previous) = Role::find_by_id(previous_id).one(&txn).await? {
                let count = (previous.user_count - 1).max(0);
                let mut model = previous.into_active_model();
                model.user_count = Set(count);
                model.update(&txn).await?;
            }
        }
        let count = target.user_count + 1;
        let mut model = target.into_active_model();
        model.user_count = Set(count);
        let updated = model.update(&txn).await?;
        txn.commit().await?;

        Ok(updated)
    }

    async fn name_taken(&self, name: &str, exclude: Option<i32>) -> Result<bool, BastionError> {
        let mut query = Role::find()
            .filter(role::Column::Name.eq(name))
            .filter(role::Column::IsDeleted.eq(false));
        if let Some(id) = exclude {
            query = query.filter(role::Column::Id.ne(id));
        }
        Ok(query.one(&self.db).await?.is_some())
    }

    async fn root_taken(&self, exclude: Option<i32>) -> Result<bool, BastionError> {
        let mut query = Role::find()
            .filter(role::Column::Level.eq(ROOT_LEVEL))
            .filter(role::Column::IsDeleted.eq(false));
        if let Some(id) = exclude {
            query = query.filter(role::Column::Id.ne(id));
        }
        Ok(query.one(&self.db).await?.is_some())
    }

    /// Insert or refresh a role by name without guard checks. Used by seeding.
    pub(crate) async fn upsert(&self, input: NewRole) -> Result<role::Model, BastionError> {
        input.validate()?;
        let name = normalize_name(&input.name);
        match Role::find()
            .filter(role::Column::Name.eq(name.as_str()))
            .filter(role::Column::IsDeleted.eq(false))
            .one(&self.db)
            .await?
        {
            Some(existing) => {
                let mut model = existing.into_active_model();
                model.display_name = Set(input.display_name);
                model.description = Set(input.description);
                model.role_type = Set(input.role_type);
                model.level = Set(input.level);
                model.is_default = Set(input.is_default);
                model.updated_at = Set(Utc::now().naive_utc());
                Ok(model.update(&self.db).await?)
            }
            None => {
                self.insert(
                    name,
                    input.display_name,
                    input.description,
                    input.role_type,
                    input.level,
                    input.is_default,
                    Some("seed".to_string()),
                )
                .await
            }
        }
    }
}
