use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::cache::CacheNamespace;
use crate::error::{BastionError, FieldError};
use crate::models::policy::{AccessConditions, ApiRoute, ApiRoutes, DataScope, FeatureFlags};
use crate::models::resource::{self, Entity as Resource};
use crate::models::{Action, ActionList, Category, permission};

/// Query filters for [`ResourceCatalog::list`].
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ResourceFilter {
    pub is_active: Option<bool>,
    pub category: Option<Category>,
    /// Case-insensitive match against name, display name and route.
    pub search: Option<String>,
}

impl ResourceFilter {
    /// Cache key of the stored query. `search` is applied after the cache,
    /// so free text never becomes a key.
    fn cache_shape(&self) -> String {
        format!(
            "list:{}:{}",
            self.is_active.map(|b| b.to_string()).unwrap_or_default(),
            self.category.map(|c| c.as_str()).unwrap_or_default()
        )
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct NewResource {
    #[validate(length(min = 1, max = 120, message = "name must be 1-120 characters"))]
    pub name: String,
    #[validate(length(min = 1, message = "display_name is required"))]
    pub display_name: String,
    pub description: Option<String>,
    #[validate(length(min = 1, message = "route is required"))]
    pub route: String,
    pub icon: Option<String>,
    pub category: Option<Category>,
    pub parent_id: Option<i32>,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default)]
    pub available_actions: Vec<Action>,
    #[serde(default)]
    pub api_routes: Vec<ApiRoute>,
    pub access_conditions: Option<AccessConditions>,
    pub feature_flags: Option<FeatureFlags>,
    pub data_scope: Option<DataScope>,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate, ToSchema)]
pub struct ResourceUpdate {
    #[validate(length(min = 1, max = 120, message = "name must be 1-120 characters"))]
    pub name: Option<String>,
    #[validate(length(min = 1, message = "display_name must not be empty"))]
    pub display_name: Option<String>,
    pub description: Option<String>,
    #[validate(length(min = 1, message = "route must not be empty"))]
    pub route: Option<String>,
    pub icon: Option<String>,
    pub category: Option<Category>,
    pub parent_id: Option<i32>,
    pub sort_order: Option<i32>,
    pub available_actions: Option<Vec<Action>>,
    pub api_routes: Option<Vec<ApiRoute>>,
    pub access_conditions: Option<AccessConditions>,
    pub feature_flags: Option<FeatureFlags>,
    pub data_scope: Option<DataScope>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, ToSchema)]
pub struct SortOrderUpdate {
    pub id: i32,
    pub sort_order: i32,
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct ReorderOutcome {
    pub updated: usize,
    /// Ids that did not exist; the rest of the batch is still applied.
    pub missing: Vec<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ResourceGroup {
    pub category: Option<Category>,
    pub count: usize,
    pub resources: Vec<resource::Model>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ResourceNode {
    #[serde(flatten)]
    pub resource: resource::Model,
    #[schema(no_recursion)]
    pub children: Vec<ResourceNode>,
}

/// Top-level nodes of one category; uncategorized resources go under `other`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ResourceTreeGroup {
    pub category: String,
    pub resources: Vec<ResourceNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CategoryCount {
    pub category: Option<Category>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ResourceStats {
    pub total: usize,
    pub active: usize,
    pub system: usize,
    pub custom: usize,
    pub by_category: Vec<CategoryCount>,
}

/// Durable catalog of resources with a read-through cache.
#[derive(Clone)]
pub struct ResourceCatalog {
    db: DatabaseConnection,
    cache: CacheNamespace,
    permission_cache: CacheNamespace,
}

impl ResourceCatalog {
    /// `permission_cache` is invalidated when an update is copied onto a
    /// linked permission.
    pub fn new(
        db: DatabaseConnection,
        cache: CacheNamespace,
        permission_cache: CacheNamespace,
    ) -> Self {
        Self {
            db,
            cache,
            permission_cache,
        }
    }

    pub async fn list(&self, filter: &ResourceFilter) -> Result<Vec<resource::Model>, BastionError> {
        let (is_active, category) = (filter.is_active, filter.category);
        let mut rows: Vec<resource::Model> = self
            .cache
            .get_or_load(&filter.cache_shape(), || async move {
                let mut query = Resource::find();
                if let Some(active) = is_active {
                    query = query.filter(resource::Column::IsActive.eq(active));
                }
                if let Some(category) = category {
                    query = query.filter(resource::Column::Category.eq(category));
                }
                let mut rows = query
                    .order_by_asc(resource::Column::SortOrder)
                    .all(&self.db)
                    .await?;
                sort_by_category(&mut rows);
                Ok(rows)
            })
            .await?;

        if let Some(needle) = filter.search.as_deref().map(|s| s.trim().to_lowercase()) {
            if !needle.is_empty() {
                rows.retain(|r| {
                    r.name.to_lowercase().contains(&needle)
                        || r.display_name.to_lowercase().contains(&needle)
                        || r.route.to_lowercase().contains(&needle)
                });
            }
        }
        Ok(rows)
    }

    pub async fn get(&self, id: i32) -> Result<resource::Model, BastionError> {
        Resource::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or_else(|| BastionError::NotFound(format!("Resource {id} not found")))
    }

    /// Fetch by name regardless of the active flag.
    pub async fn get_by_name(&self, name: &str) -> Result<resource::Model, BastionError> {
        Resource::find()
            .filter(resource::Column::Name.eq(normalize_name(name)))
            .one(&self.db)
            .await?
            .ok_or_else(|| BastionError::NotFound(format!("Resource '{name}' not found")))
    }

    /// The active resource called `name`, if any. Inactive resources are
    /// treated as absent.
    pub async fn find_active(&self, name: &str) -> Result<Option<resource::Model>, BastionError> {
        let name = normalize_name(name);
        Ok(self
            .active_resources()
            .await?
            .into_iter()
            .find(|r| r.name == name))
    }

    /// The first active resource declaring an API route that matches
    /// `(method, path)`.
    pub async fn find_by_api_route(
        &self,
        method: &str,
        path: &str,
    ) -> Result<Option<resource::Model>, BastionError> {
        Ok(self.active_resources().await?.into_iter().find(|r| {
            r.api_routes
                .0
                .iter()
                .any(|route| route.matches_method(method) && route.matches_path(path))
        }))
    }

    async fn active_resources(&self) -> Result<Vec<resource::Model>, BastionError> {
        self.list(&ResourceFilter {
            is_active: Some(true),
            ..Default::default()
        })
        .await
    }

    pub async fn grouped(&self) -> Result<Vec<ResourceGroup>, BastionError> {
        self.cache
            .get_or_load("grouped", || async move {
                let rows = self.active_resources().await?;
                let mut groups: BTreeMap<Option<&'static str>, ResourceGroup> = BTreeMap::new();
                for row in rows {
                    let group = groups
                        .entry(row.category.map(|c| c.as_str()))
                        .or_insert_with(|| ResourceGroup {
                            category: row.category,
                            count: 0,
                            resources: Vec::new(),
                        });
                    group.count += 1;
                    group.resources.push(row);
                }
                Ok(groups.into_values().collect())
            })
            .await
    }

    pub async fn tree(&self) -> Result<Vec<ResourceTreeGroup>, BastionError> {
        self.cache
            .get_or_load("tree", || async move {
                let rows = self.active_resources().await?;
                Ok(build_tree(rows))
            })
            .await
    }

    pub async fn stats(&self) -> Result<ResourceStats, BastionError> {
        self.cache
            .get_or_load("stats", || async move {
                let rows = Resource::find().all(&self.db).await?;
                let mut by_category: BTreeMap<Option<&'static str>, CategoryCount> = BTreeMap::new();
                for row in &rows {
                    by_category
                        .entry(row.category.map(|c| c.as_str()))
                        .or_insert(CategoryCount {
                            category: row.category,
                            count: 0,
                        })
                        .count += 1;
                }
                Ok(ResourceStats {
                    total: rows.len(),
                    active: rows.iter().filter(|r| r.is_active).count(),
                    system: rows.iter().filter(|r| r.is_system).count(),
                    custom: rows.iter().filter(|r| !r.is_system).count(),
                    by_category: by_category.into_values().collect(),
                })
            })
            .await
    }

    /// Active top-level resources of one category, by sort order.
    pub async fn by_category(&self, category: Category) -> Result<Vec<resource::Model>, BastionError> {
        self.cache
            .get_or_load(&format!("category:{category}"), || async move {
                Ok(Resource::find()
                    .filter(resource::Column::Category.eq(category))
                    .filter(resource::Column::IsActive.eq(true))
                    .filter(resource::Column::ParentId.is_null())
                    .order_by_asc(resource::Column::SortOrder)
                    .all(&self.db)
                    .await?)
            })
            .await
    }

    pub async fn create(&self, input: NewResource) -> Result<resource::Model, BastionError> {
        input.validate()?;
        validate_policies(
            input.access_conditions.as_ref(),
            &input.api_routes,
        )?;

        let name = normalize_name(&input.name);
        if self.name_taken(&name, None).await? {
            return Err(BastionError::Duplicate(format!(
                "Resource '{name}' already exists"
            )));
        }
        if let Some(parent_id) = input.parent_id {
            self.require_parent(parent_id, None).await?;
        }

        let now = Utc::now().naive_utc();
        let model = resource::ActiveModel {
            name: Set(name),
            display_name: Set(input.display_name),
            description: Set(input.description),
            route: Set(input.route),
            icon: Set(input.icon),
            category: Set(input.category),
            parent_id: Set(input.parent_id),
            sort_order: Set(input.sort_order),
            available_actions: Set(ActionList(input.available_actions)),
            api_routes: Set(ApiRoutes(input.api_routes)),
            access_conditions: Set(input.access_conditions),
            feature_flags: Set(input.feature_flags),
            data_scope: Set(input.data_scope),
            is_system: Set(input.is_system),
            is_active: Set(input.is_active),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        let created = model.insert(&self.db).await?;
        tracing::info!(resource = %created.name, id = created.id, "resource created");

        self.cache.invalidate().await;
        Ok(created)
    }

    /// Update a resource. A changed category or action set is copied onto
    /// the linked permission in the same transaction.
    pub async fn update(&self, id: i32, input: ResourceUpdate) -> Result<resource::Model, BastionError> {
        input.validate()?;
        let existing = self.get(id).await?;

        if existing.is_system && existing.is_active && input.is_active == Some(false) {
            return Err(BastionError::SystemProtected(format!(
                "Cannot deactivate system resource '{}'",
                existing.name
            )));
        }
        if let Some(raw) = &input.name {
            let name = normalize_name(raw);
            if name != existing.name {
                if existing.is_system {
                    return Err(BastionError::SystemProtected(format!(
                        "Cannot rename system resource '{}'",
                        existing.name
                    )));
                }
                if self.name_taken(&name, Some(id)).await? {
                    return Err(BastionError::Duplicate(format!(
                        "Resource '{name}' already exists"
                    )));
                }
            }
        }
        if let Some(parent_id) = input.parent_id {
            self.require_parent(parent_id, Some(id)).await?;
        }
        if input.access_conditions.is_some() || input.api_routes.is_some() {
            validate_policies(
                input.access_conditions.as_ref(),
                input.api_routes.as_deref().unwrap_or_default(),
            )?;
        }

        let category_changed = input.category.is_some_and(|c| existing.category != Some(c));
        let actions_changed = input
            .available_actions
            .as_ref()
            .is_some_and(|a| existing.available_actions.0 != *a);

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
        if let Some(route) = input.route {
            model.route = Set(route);
        }
        if let Some(icon) = input.icon {
            model.icon = Set(Some(icon));
        }
        if let Some(category) = input.category {
            model.category = Set(Some(category));
        }
        if let Some(parent_id) = input.parent_id {
            model.parent_id = Set(Some(parent_id));
        }
        if let Some(sort_order) = input.sort_order {
            model.sort_order = Set(sort_order);
        }
        if let Some(actions) = input.available_actions {
            model.available_actions = Set(ActionList(actions));
        }
        if let Some(routes) = input.api_routes {
            model.api_routes = Set(ApiRoutes(routes));
        }
        if let Some(conditions) = input.access_conditions {
            model.access_conditions = Set(Some(conditions));
        }
        if let Some(flags) = input.feature_flags {
            model.feature_flags = Set(Some(flags));
        }
        if let Some(scope) = input.data_scope {
            model.data_scope = Set(Some(scope));
        }
        if let Some(active) = input.is_active {
            model.is_active = Set(active);
        }
        let now = Utc::now().naive_utc();
        model.updated_at = Set(now);

        let txn = self.db.begin().await?;
        let updated = model.update(&txn).await?;

        let mut synced = false;
        if category_changed || actions_changed {
            if let Some(linked) = permission::Entity::find()
                .filter(permission::Column::ResourceId.eq(updated.id))
                .one(&txn)
                .await?
            {
                let mut perm = linked.into_active_model();
                if let Some(category) = updated.category {
                    perm.category = Set(category);
                }
                perm.available_actions = Set(updated.available_actions.clone());
                perm.updated_at = Set(now);
                perm.update(&txn).await?;
                synced = true;
                tracing::debug!(resource = %updated.name, "linked permission synced");
            }
        }
        txn.commit().await?;

        self.cache.invalidate().await;
        if synced {
            self.permission_cache.invalidate().await;
        }
        Ok(updated)
    }

    pub async fn toggle_status(&self, id: i32) -> Result<resource::Model, BastionError> {
        let existing = self.get(id).await?;
        if existing.is_system && existing.is_active {
            return Err(BastionError::SystemProtected(format!(
                "Cannot deactivate system resource '{}'",
                existing.name
            )));
        }
        let next = !existing.is_active;
        let mut model = existing.into_active_model();
        model.is_active = Set(next);
        model.updated_at = Set(Utc::now().naive_utc());
        let updated = model.update(&self.db).await?;

        self.cache.invalidate().await;
        Ok(updated)
    }

    pub async fn delete(&self, id: i32) -> Result<(), BastionError> {
        let existing = self.get(id).await?;
        if existing.is_system {
            return Err(BastionError::SystemProtected(format!(
                "Cannot delete system resource '{}'",
                existing.name
            )));
        }
        Resource::delete_by_id(id).exec(&self.db).await?;
        tracing::info!(resource = %existing.name, id, "resource deleted");

        self.cache.invalidate().await;
        Ok(())
    }

    /// Apply each `(id, sort_order)` pair on its own; a missing id does not
    /// stop the rest of the batch.
    pub async fn reorder(&self, orders: &[SortOrderUpdate]) -> Result<ReorderOutcome, BastionError> {
        let mut outcome = ReorderOutcome::default();
        for order in orders {
            let result = Resource::update_many()
                .col_expr(
                    resource::Column::SortOrder,
                    sea_orm::sea_query::Expr::value(order.sort_order),
                )
                .filter(resource::Column::Id.eq(order.id))
                .exec(&self.db)
                .await?;
            if result.rows_affected == 0 {
                outcome.missing.push(order.id);
            } else {
                outcome.updated += 1;
            }
        }

        self.cache.invalidate().await;
        Ok(outcome)
    }

    async fn name_taken(&self, name: &str, exclude: Option<i32>) -> Result<bool, BastionError> {
        let mut query = Resource::find().filter(resource::Column::Name.eq(name));
        if let Some(id) = exclude {
            query = query.filter(resource::Column::Id.ne(id));
        }
        Ok(query.one(&self.db).await?.is_some())
    }

    async fn require_parent(&self, parent_id: i32, child: Option<i32>) -> Result<(), BastionError> {
        if Some(parent_id) == child {
            return Err(BastionError::Validation(
                "A resource cannot be its own parent".to_string(),
            ));
        }
        let Some(mut ancestor) = Resource::find_by_id(parent_id).one(&self.db).await? else {
            return Err(BastionError::Validation(format!(
                "Parent resource {parent_id} does not exist"
            )));
        };
        let Some(child) = child else {
            return Ok(());
        };

        let mut seen = HashSet::from([parent_id]);
        while let Some(next) = ancestor.parent_id {
            if next == child {
                return Err(BastionError::Validation(format!(
                    "Resource {parent_id} descends from resource {child} and cannot be its parent"
                )));
            }
            if !seen.insert(next) {
                break;
            }
            match Resource::find_by_id(next).one(&self.db).await? {
                Some(row) => ancestor = row,
                None => break,
            }
        }
        Ok(())
    }
}

pub(crate) fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

fn sort_by_category(rows: &mut [resource::Model]) {
    rows.sort_by(|a, b| {
        a.category
            .map(|c| c.as_str())
            .cmp(&b.category.map(|c| c.as_str()))
            .then(a.sort_order.cmp(&b.sort_order))
    });
}

fn validate_policies(
    conditions: Option<&AccessConditions>,
    routes: &[ApiRoute],
) -> Result<(), BastionError> {
    let mut errors = Vec::new();

    if let Some(time) = conditions.and_then(|c| c.time_restricted.as_ref()) {
        if let Some(hours) = time.allowed_hours {
            if hours.start > 23 || hours.end > 23 {
                errors.push(FieldError::new(
                    "access_conditions.time_restricted.allowed_hours",
                    "hours must be between 0 and 23",
                ));
            }
        }
        if time.allowed_days.iter().any(|d| *d > 6) {
            errors.push(FieldError::new(
                "access_conditions.time_restricted.allowed_days",
                "days must be between 0 (Sunday) and 6",
            ));
        }
    }

    for route in routes {
        if !route.path.starts_with('/') {
            errors.push(FieldError::new(
                "api_routes",
                format!("route path '{}' must start with '/'", route.path),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(BastionError::ValidationErrors(errors))
    }
}

/// Nest resources under their parents, then group the roots by category.
/// Children whose parent is missing or inactive are dropped.
fn build_tree(rows: Vec<resource::Model>) -> Vec<ResourceTreeGroup> {
    let mut children: HashMap<i32, Vec<resource::Model>> = HashMap::new();
    let mut roots = Vec::new();
    let ids: HashSet<i32> = rows.iter().map(|r| r.id).collect();

    for row in rows {
        match row.parent_id {
            Some(parent) if ids.contains(&parent) => children.entry(parent).or_default().push(row),
            Some(_) => {}
            None => roots.push(row),
        }
    }

    fn attach(
        resource: resource::Model,
        children: &mut HashMap<i32, Vec<resource::Model>>,
    ) -> ResourceNode {
        let kids = children.remove(&resource.id).unwrap_or_default();
        ResourceNode {
            resource,
            children: kids.into_iter().map(|k| attach(k, children)).collect(),
        }
    }

    let mut groups: BTreeMap<String, Vec<ResourceNode>> = BTreeMap::new();
    for root in roots {
        let key = root
            .category
            .map(|c| c.as_str().to_string())
            .unwrap_or_else(|| "other".to_string());
        let node = attach(root, &mut children);
        groups.entry(key).or_default().push(node);
    }

    groups
        .into_iter()
        .map(|(category, resources)| ResourceTreeGroup { category, resources })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn row(id: i32, name: &str, category: Option<Category>, parent: Option<i32>) -> resource::Model {
        let at = NaiveDateTime::default();
        resource::Model {
            id,
            name: name.to_string(),
            display_name: name.to_string(),
            description: None,
            route: format!("/{name}"),
            icon: None,
            category,
            parent_id: parent,
            sort_order: id,
            available_actions: ActionList::default(),
            api_routes: ApiRoutes::default(),
            access_conditions: None,
            feature_flags: None,
            data_scope: None,
            is_system: false,
            is_active: true,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn test_tree_nests_children_and_groups_roots() {
        let rows = vec![
            row(1, "hrm.employees", Some(Category::Hrm), None),
            row(2, "hrm.employees.detail", Some(Category::Hrm), Some(1)),
            row(3, "misc", None, None),
            row(4, "orphan", Some(Category::Hrm), Some(99)),
        ];
        let tree = build_tree(rows);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].category, "hrm");
        assert_eq!(tree[0].resources.len(), 1);
        assert_eq!(tree[0].resources[0].children.len(), 1);
        assert_eq!(tree[1].category, "other");
    }

    #[test]
    fn test_cache_shape_ignores_search() {
        let plain = ResourceFilter::default().cache_shape();
        let searched = ResourceFilter {
            search: Some("Emp".into()),
            ..Default::default()
        }
        .cache_shape();
        assert_eq!(plain, searched);

        let active = ResourceFilter {
            is_active: Some(true),
            category: Some(Category::Hrm),
            ..Default::default()
        }
        .cache_shape();
        assert_eq!(active, "list:true:hrm");
    }

    #[test]
    fn test_policy_validation_rejects_bad_hours() {
        let conditions = AccessConditions {
            time_restricted: Some(crate::models::policy::TimeRestriction {
                enabled: true,
                allowed_hours: Some(crate::models::policy::HourRange { start: 9, end: 24 }),
                allowed_days: vec![7],
            }),
            ..Default::default()
        };
        match validate_policies(Some(&conditions), &[]) {
            Err(BastionError::ValidationErrors(errs)) => assert_eq!(errs.len(), 2),
            other => panic!("expected validation errors, got {other:?}"),
        }
    }
}
