use std::collections::BTreeMap;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::cache::CacheNamespace;
use crate::error::BastionError;
use crate::models::permission::{self, Entity as Permission};
use crate::models::{Action, ActionList, Category, resource};

use super::resource::normalize_name;

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PermissionFilter {
    pub category: Option<Category>,
    /// Defaults to active permissions only.
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct NewPermission {
    /// Link to a resource; category and actions are then copied from it.
    pub resource_id: Option<i32>,
    #[validate(length(min = 1, max = 120, message = "module must be 1-120 characters"))]
    pub module: String,
    #[validate(length(min = 1, message = "display_name is required"))]
    pub display_name: String,
    pub description: Option<String>,
    pub category: Option<Category>,
    #[serde(default)]
    pub available_actions: Vec<Action>,
    #[serde(default)]
    pub sort_order: i32,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate, ToSchema)]
pub struct PermissionUpdate {
    #[validate(length(min = 1, message = "display_name must not be empty"))]
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub category: Option<Category>,
    pub available_actions: Option<Vec<Action>>,
    pub sort_order: Option<i32>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PermissionGroup {
    pub category: Category,
    pub count: usize,
    pub permissions: Vec<permission::Model>,
}

/// Durable catalog of grantable permissions.
#[derive(Clone)]
pub struct PermissionCatalog {
    db: DatabaseConnection,
    cache: CacheNamespace,
}

impl PermissionCatalog {
    pub fn new(db: DatabaseConnection, cache: CacheNamespace) -> Self {
        Self { db, cache }
    }

    pub async fn list(&self, filter: &PermissionFilter) -> Result<Vec<permission::Model>, BastionError> {
        let active = filter.is_active.unwrap_or(true);
        let category = filter.category;
        let shape = format!(
            "list:{active}:{}",
            category.map(|c| c.as_str()).unwrap_or_default()
        );
        self.cache
            .get_or_load(&shape, || async move {
                let mut query = Permission::find().filter(permission::Column::IsActive.eq(active));
                if let Some(category) = category {
                    query = query.filter(permission::Column::Category.eq(category));
                }
                let mut rows = query
                    .order_by_asc(permission::Column::SortOrder)
                    .all(&self.db)
                    .await?;
                rows.sort_by(|a, b| {
                    a.category
                        .as_str()
                        .cmp(b.category.as_str())
                        .then(a.sort_order.cmp(&b.sort_order))
                });
                Ok(rows)
            })
            .await
    }

    pub async fn grouped(&self) -> Result<Vec<PermissionGroup>, BastionError> {
        let rows = self.list(&PermissionFilter::default()).await?;
        let mut groups: BTreeMap<&'static str, PermissionGroup> = BTreeMap::new();
        for row in rows {
            let group = groups
                .entry(row.category.as_str())
                .or_insert_with(|| PermissionGroup {
                    category: row.category,
                    count: 0,
                    permissions: Vec::new(),
                });
            group.count += 1;
            group.permissions.push(row);
        }
        Ok(groups.into_values().collect())
    }

    pub async fn by_category(&self, category: Category) -> Result<Vec<permission::Model>, BastionError> {
        self.list(&PermissionFilter {
            category: Some(category),
            is_active: Some(true),
        })
        .await
    }

    pub async fn get(&self, id: i32) -> Result<permission::Model, BastionError> {
        Permission::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or_else(|| BastionError::NotFound(format!("Permission {id} not found")))
    }

    /// Resolve an active permission by its module key, falling back to the
    /// permission linked to an active resource of that name.
    pub async fn find_by_key(&self, key: &str) -> Result<Option<permission::Model>, BastionError> {
        let key = normalize_name(key);
        if let Some(found) = Permission::find()
            .filter(permission::Column::Module.eq(key.as_str()))
            .filter(permission::Column::IsActive.eq(true))
            .one(&self.db)
            .await?
        {
            return Ok(Some(found));
        }

        let linked = Permission::find()
            .inner_join(resource::Entity)
            .filter(resource::Column::Name.eq(key.as_str()))
            .filter(permission::Column::IsActive.eq(true))
            .one(&self.db)
            .await?;
        Ok(linked)
    }

    pub async fn create(&self, input: NewPermission) -> Result<permission::Model, BastionError> {
        input.validate()?;
        let module = normalize_name(&input.module);

        if Permission::find()
            .filter(permission::Column::Module.eq(module.as_str()))
            .one(&self.db)
            .await?
            .is_some()
        {
            return Err(BastionError::Duplicate(format!(
                "Permission for module '{module}' already exists"
            )));
        }

        let (category, actions) = match input.resource_id {
            Some(resource_id) => {
                let linked = self.linkable_resource(resource_id).await?;
                let category = linked.category.or(input.category).ok_or_else(|| {
                    BastionError::Validation(format!(
                        "Resource {resource_id} has no category; provide one"
                    ))
                })?;
                (category, linked.available_actions)
            }
            None => {
                let category = input.category.ok_or_else(|| {
                    BastionError::Validation("category is required".to_string())
                })?;
                (category, ActionList(input.available_actions))
            }
        };

        let now = Utc::now().naive_utc();
        let created = permission::ActiveModel {
            resource_id: Set(input.resource_id),
            module: Set(module),
            display_name: Set(input.display_name),
            description: Set(input.description),
            category: Set(category),
            available_actions: Set(actions),
            sort_order: Set(input.sort_order),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;
        tracing::info!(module = %created.module, id = created.id, "permission created");

        self.cache.invalidate().await;
        Ok(created)
    }

    /// Update a permission. Category and actions of a resource-linked
    /// permission follow the resource and cannot be set here.
    pub async fn update(&self, id: i32, input: PermissionUpdate) -> Result<permission::Model, BastionError> {
        input.validate()?;
        let existing = self.get(id).await?;

        if existing.resource_id.is_some()
            && (input.category.is_some() || input.available_actions.is_some())
        {
            return Err(BastionError::Validation(
                "category and available_actions of a resource-linked permission are managed by the resource"
                    .to_string(),
            ));
        }

        let mut model = existing.into_active_model();
        if let Some(display_name) = input.display_name {
            model.display_name = Set(display_name);
        }
        if let Some(description) = input.description {
            model.description = Set(Some(description));
        }
        if let Some(category) = input.category {
            model.category = Set(category);
        }
        if let Some(actions) = input.available_actions {
            model.available_actions = Set(ActionList(actions));
        }
        if let Some(sort_order) = input.sort_order {
            model.sort_order = Set(sort_order);
        }
        if let Some(active) = input.is_active {
            model.is_active = Set(active);
        }
        model.updated_at = Set(Utc::now().naive_utc());
        let updated = model.update(&self.db).await?;

        self.cache.invalidate().await;
        Ok(updated)
    }

    /// Soft delete: the permission is deactivated and stops resolving.
    pub async fn deactivate(&self, id: i32) -> Result<permission::Model, BastionError> {
        let existing = self.get(id).await?;
        let mut model = existing.into_active_model();
        model.is_active = Set(false);
        model.updated_at = Set(Utc::now().naive_utc());
        let updated = model.update(&self.db).await?;
        tracing::info!(module = %updated.module, id, "permission deactivated");

        self.cache.invalidate().await;
        Ok(updated)
    }

    async fn linkable_resource(&self, resource_id: i32) -> Result<resource::Model, BastionError> {
        let linked = resource::Entity::find_by_id(resource_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| {
                BastionError::Validation(format!("Resource {resource_id} does not exist"))
            })?;

        if Permission::find()
            .filter(permission::Column::ResourceId.eq(resource_id))
            .one(&self.db)
            .await?
            .is_some()
        {
            return Err(BastionError::Duplicate(format!(
                "Resource {resource_id} already has a permission"
            )));
        }
        Ok(linked)
    }
}
