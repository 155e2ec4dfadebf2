use chrono::NaiveDateTime;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::action::ActionList;
use super::category::Category;
use super::policy::{AccessConditions, ApiRoutes, DataScope, FeatureFlags};

/// A controllable resource ("page"): a route plus the actions it supports and
/// the policy annotations the decision engine evaluates.
///
/// `name` is globally unique and stored lowercase (e.g. `hrm.employees`). An
/// inactive resource is invisible to access decisions.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[schema(as = Resource)]
#[sea_orm(table_name = "resources")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(unique)]
    pub name: String,

    pub display_name: String,

    pub description: Option<String>,

    pub route: String,

    pub icon: Option<String>,

    pub category: Option<Category>,

    pub parent_id: Option<i32>,

    pub sort_order: i32,

    #[sea_orm(column_type = "Json")]
    pub available_actions: ActionList,

    #[sea_orm(column_type = "Json")]
    pub api_routes: ApiRoutes,

    #[sea_orm(column_type = "Json", nullable)]
    pub access_conditions: Option<AccessConditions>,

    #[sea_orm(column_type = "Json", nullable)]
    pub feature_flags: Option<FeatureFlags>,

    #[sea_orm(column_type = "Json", nullable)]
    pub data_scope: Option<DataScope>,

    pub is_system: bool,

    pub is_active: bool,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "Entity",
        from = "Column::ParentId",
        to = "Column::Id"
    )]
    Parent,
    #[sea_orm(has_one = "super::permission::Entity")]
    Permission,
}

impl Related<super::permission::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Permission.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
