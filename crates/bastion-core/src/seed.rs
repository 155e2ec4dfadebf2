//! Idempotent catalog seeding from a JSON document.
//!
//! ```json
//! {
//!   "resources": [{ "name": "hrm.employees", "display_name": "Employees",
//!                   "route": "/hrm/employees", "category": "hrm",
//!                   "available_actions": ["read", "write"] }],
//!   "permissions": [{ "module": "hrm.employees", "display_name": "Employees",
//!                     "resource": "hrm.employees" }],
//!   "roles": [{ "name": "manager", "display_name": "Manager", "level": 50,
//!               "grants": [{ "module": "hrm.employees", "actions": { "read": true } }] }]
//! }
//! ```
//!
//! Entries are matched by name (resources, roles) or module (permissions);
//! existing rows are refreshed, missing ones created. Parents must appear
//! before their children.

use std::path::Path;

use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};

use crate::catalog::permission::{NewPermission, PermissionUpdate};
use crate::catalog::resource::{normalize_name, NewResource, ResourceUpdate};
use crate::controllers::AppState;
use crate::error::BastionError;
use crate::grants::GrantInput;
use crate::models::{permission, Action, ActionFlags, Category};
use crate::roles::NewRole;

pub const SEED_ACTOR: &str = "seed";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SeedDocument {
    pub resources: Vec<SeedResource>,
    pub permissions: Vec<SeedPermission>,
    pub roles: Vec<SeedRole>,
}

impl SeedDocument {
    pub fn from_json(raw: &str) -> Result<Self, BastionError> {
        serde_json::from_str(raw)
            .map_err(|e| BastionError::Validation(format!("Invalid seed document: {e}")))
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, BastionError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            BastionError::Internal(format!("Cannot read seed file {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedResource {
    #[serde(flatten)]
    pub resource: NewResource,
    /// Name of the parent resource.
    pub parent: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedPermission {
    pub module: String,
    pub display_name: String,
    pub description: Option<String>,
    pub category: Option<Category>,
    #[serde(default)]
    pub available_actions: Vec<Action>,
    #[serde(default)]
    pub sort_order: i32,
    /// Name of the resource to link.
    pub resource: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedGrant {
    pub module: String,
    #[serde(default)]
    pub actions: ActionFlags,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedRole {
    #[serde(flatten)]
    pub role: NewRole,
    /// Replaces the role's grants when present.
    pub grants: Option<Vec<SeedGrant>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SeedReport {
    pub resources_created: usize,
    pub resources_updated: usize,
    pub permissions_created: usize,
    pub permissions_updated: usize,
    pub roles: usize,
    pub grants: usize,
    /// Grant modules that matched no active permission.
    pub unknown_modules: Vec<String>,
}

/// Apply a seed document. Stops at the first failing entry.
pub async fn apply(state: &AppState, doc: SeedDocument) -> Result<SeedReport, BastionError> {
    let mut report = SeedReport::default();

    for entry in doc.resources {
        seed_resource(state, entry, &mut report).await?;
    }
    for entry in doc.permissions {
        seed_permission(state, entry, &mut report).await?;
    }
    for entry in doc.roles {
        seed_role(state, entry, &mut report).await?;
    }

    tracing::info!(
        resources = report.resources_created + report.resources_updated,
        permissions = report.permissions_created + report.permissions_updated,
        roles = report.roles,
        grants = report.grants,
        "seed applied"
    );
    Ok(report)
}

async fn parent_id(state: &AppState, parent: Option<&str>) -> Result<Option<i32>, BastionError> {
    match parent {
        Some(name) => Ok(Some(state.resources.get_by_name(name).await?.id)),
        None => Ok(None),
    }
}

async fn seed_resource(
    state: &AppState,
    entry: SeedResource,
    report: &mut SeedReport,
) -> Result<(), BastionError> {
    let mut input = entry.resource;
    if let Some(id) = parent_id(state, entry.parent.as_deref()).await? {
        input.parent_id = Some(id);
    }

    match state.resources.get_by_name(&input.name).await {
        Ok(existing) => {
            let update = ResourceUpdate {
                name: None,
                display_name: Some(input.display_name),
                description: input.description,
                route: Some(input.route),
                icon: input.icon,
                category: input.category,
                parent_id: input.parent_id,
                sort_order: Some(input.sort_order),
                available_actions: Some(input.available_actions),
                api_routes: Some(input.api_routes),
                access_conditions: input.access_conditions,
                feature_flags: input.feature_flags,
                data_scope: input.data_scope,
                is_active: Some(input.is_active),
            };
            state.resources.update(existing.id, update).await?;
            report.resources_updated += 1;
        }
        Err(BastionError::NotFound(_)) => {
            state.resources.create(input).await?;
            report.resources_created += 1;
        }
        Err(e) => return Err(e),
    }
    Ok(())
}

async fn seed_permission(
    state: &AppState,
    entry: SeedPermission,
    report: &mut SeedReport,
) -> Result<(), BastionError> {
    let module = normalize_name(&entry.module);
    let existing = permission::Entity::find()
        .filter(permission::Column::Module.eq(module.as_str()))
        .one(&state.db)
        .await?;

    match existing {
        Some(existing) => {
            let linked = existing.resource_id.is_some();
            let update = PermissionUpdate {
                display_name: Some(entry.display_name),
                description: entry.description,
                category: if linked { None } else { entry.category },
                available_actions: (!linked && !entry.available_actions.is_empty())
                    .then_some(entry.available_actions),
                sort_order: Some(entry.sort_order),
                is_active: Some(true),
            };
            state.permissions.update(existing.id, update).await?;
            report.permissions_updated += 1;
        }
        None => {
            let resource_id = match entry.resource.as_deref() {
                Some(name) => Some(state.resources.get_by_name(name).await?.id),
                None => None,
            };
            state
                .permissions
                .create(NewPermission {
                    resource_id,
                    module,
                    display_name: entry.display_name,
                    description: entry.description,
                    category: entry.category,
                    available_actions: entry.available_actions,
                    sort_order: entry.sort_order,
                })
                .await?;
            report.permissions_created += 1;
        }
    }
    Ok(())
}

async fn seed_role(
    state: &AppState,
    entry: SeedRole,
    report: &mut SeedReport,
) -> Result<(), BastionError> {
    let role = state.roles.upsert(entry.role).await?;
    report.roles += 1;

    let Some(grants) = entry.grants else {
        return Ok(());
    };

    let mut inputs = Vec::with_capacity(grants.len());
    for grant in grants {
        match state.permissions.find_by_key(&grant.module).await? {
            Some(perm) => inputs.push(GrantInput {
                permission_id: perm.id,
                actions: grant.actions,
            }),
            None => {
                tracing::warn!(role = %role.name, module = %grant.module, "seed grant names no active permission");
                report.unknown_modules.push(grant.module);
            }
        }
    }

    let summary = state
        .grants
        .set_grants(role.id, inputs, Some(SEED_ACTOR))
        .await?;
    report.grants += summary.total_permissions as usize;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_seed_document() {
        let doc = SeedDocument::from_json(
            r#"{
                "resources": [{
                    "name": "HRM.Employees", "display_name": "Employees",
                    "route": "/hrm/employees", "category": "hrm",
                    "available_actions": ["read", "write"], "parent": "hrm.root"
                }],
                "roles": [{
                    "name": "manager", "display_name": "Manager", "level": 50,
                    "grants": [{"module": "hrm.employees", "actions": {"all": true}}]
                }]
            }"#,
        )
        .unwrap();

        assert_eq!(doc.resources.len(), 1);
        assert_eq!(doc.resources[0].parent.as_deref(), Some("hrm.root"));
        assert!(doc.resources[0].resource.is_active);
        assert!(doc.permissions.is_empty());
        let role = &doc.roles[0];
        assert_eq!(role.role.level, 50);
        assert!(role.grants.as_ref().unwrap()[0].actions.all);
    }

    #[test]
    fn test_reject_malformed_document() {
        let err = SeedDocument::from_json(r#"{"roles": {"name": "x"}}"#).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }
}
