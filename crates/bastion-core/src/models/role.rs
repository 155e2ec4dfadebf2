use chrono::NaiveDateTime;
use sea_orm::FromJsonQueryResult;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::action::ActionFlags;
use super::category::Category;

/// Levels at or below this are reserved for system roles.
pub const SYSTEM_LEVEL_MAX: i32 = 10;
/// The root role's level.
pub const ROOT_LEVEL: i32 = 1;
/// Least privileged level, also the default.
pub const LOWEST_LEVEL: i32 = 100;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum RoleType {
    #[sea_orm(string_value = "system")]
    System,
    #[sea_orm(string_value = "custom")]
    Custom,
}

/// One grant in the role-embedded form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct EmbeddedGrant {
    pub permission_id: i32,
    pub module: String,
    pub resource_id: Option<i32>,
    pub category: Category,
    pub display_name: String,
    pub actions: ActionFlags,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult, ToSchema)]
pub struct EmbeddedGrants(pub Vec<EmbeddedGrant>);

/// Summary kept next to the embedded grants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult, ToSchema)]
#[serde(default)]
pub struct PermissionStats {
    pub total_permissions: u32,
    pub categories: Vec<Category>,
    pub last_updated_at: Option<NaiveDateTime>,
}

impl PermissionStats {
    pub fn from_grants(grants: &[EmbeddedGrant], at: NaiveDateTime) -> Self {
        let mut categories: Vec<Category> = grants.iter().map(|g| g.category).collect();
        categories.sort();
        categories.dedup();
        PermissionStats {
            total_permissions: grants.len() as u32,
            categories,
            last_updated_at: Some(at),
        }
    }
}

/// A role. Lower `level` means more privileged; level 1 is the root role.
///
/// Names are unique among non-deleted roles, so uniqueness is enforced by the
/// registry rather than a table constraint.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[schema(as = Role)]
#[sea_orm(table_name = "roles")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub name: String,

    pub display_name: String,

    pub description: Option<String>,

    #[sea_orm(column_name = "type")]
    #[serde(rename = "type")]
    pub role_type: RoleType,

    pub level: i32,

    pub is_active: bool,

    pub is_default: bool,

    pub user_count: i32,

    pub is_deleted: bool,

    pub deleted_at: Option<NaiveDateTime>,

    #[sea_orm(column_type = "Json")]
    pub permissions: EmbeddedGrants,

    #[sea_orm(column_type = "Json")]
    pub permission_stats: PermissionStats,

    pub updated_by: Option<String>,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Model {
    pub fn is_system(&self) -> bool {
        self.role_type == RoleType::System
    }

    pub fn is_root(&self) -> bool {
        self.level == ROOT_LEVEL
    }

    /// Active and not soft-deleted.
    pub fn is_usable(&self) -> bool {
        self.is_active && !self.is_deleted
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::role_permission::Entity")]
    RolePermissions,
}

impl Related<super::role_permission::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RolePermissions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
