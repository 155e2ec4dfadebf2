//! Role grants, kept in two set-equivalent forms:
//!
//! - embedded: `roles.permissions`, one JSON array per role, plus
//!   `roles.permission_stats`;
//! - junction: `role_permissions`, one row per `(role_id, permission_id)`.
//!
//! Every write touches both forms inside one database transaction, and writes
//! for the same role are serialized in-process. Reads prefer the embedded
//! array and fall back to the junction table when it is empty; the `source`
//! tag on [`RoleGrants`] records which one answered and carries no other
//! meaning.

pub mod migration;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    IntoActiveModel, PaginatorTrait, QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use utoipa::ToSchema;

use crate::catalog::PermissionCatalog;
use crate::error::BastionError;
use crate::models::role::{self, Entity as Role};
use crate::models::role_permission::{self, Entity as RolePermission};
use crate::models::{
    Action, ActionFlags, Category, EmbeddedGrant, EmbeddedGrants, PermissionStats, permission,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum GrantSource {
    Embedded,
    Junction,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GrantGroup {
    pub category: Category,
    pub permissions: Vec<EmbeddedGrant>,
}

/// All grants of one role.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoleGrants {
    pub role_id: i32,
    /// Keyed by permission module.
    pub grants: BTreeMap<String, EmbeddedGrant>,
    pub grouped: Vec<GrantGroup>,
    pub source: GrantSource,
    pub permission_stats: Option<PermissionStats>,
}

impl RoleGrants {
    fn new(role_id: i32, list: Vec<EmbeddedGrant>, source: GrantSource, stats: Option<PermissionStats>) -> Self {
        let mut grouped: BTreeMap<&'static str, GrantGroup> = BTreeMap::new();
        for grant in &list {
            grouped
                .entry(grant.category.as_str())
                .or_insert_with(|| GrantGroup {
                    category: grant.category,
                    permissions: Vec::new(),
                })
                .permissions
                .push(grant.clone());
        }
        let mut grouped: Vec<GrantGroup> = grouped.into_values().collect();
        for group in &mut grouped {
            group.permissions.sort_by(|a, b| a.module.cmp(&b.module));
        }

        RoleGrants {
            role_id,
            grants: list.into_iter().map(|g| (g.module.clone(), g)).collect(),
            grouped,
            source,
            permission_stats: stats,
        }
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
pub struct GrantInput {
    pub permission_id: i32,
    #[serde(default)]
    pub actions: ActionFlags,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GrantSummary {
    pub total_permissions: u32,
    pub categories: Vec<Category>,
    /// Requested permission ids that were unknown or inactive.
    pub dropped: Vec<i32>,
}

type LockMap = Arc<StdMutex<HashMap<i32, Arc<Mutex<()>>>>>;

/// Serializes grant writes per role within this process.
///
/// An entry lives only while some writer holds or waits on it.
#[derive(Clone, Default)]
struct RoleLocks(LockMap);

impl RoleLocks {
    async fn acquire(&self, role_id: i32) -> RoleLock {
        let entry = self
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(role_id)
            .or_default()
            .clone();
        let held = entry.clone().lock_owned().await;
        RoleLock {
            map: self.0.clone(),
            role_id,
            entry,
            held: Some(held),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

struct RoleLock {
    map: LockMap,
    role_id: i32,
    entry: Arc<Mutex<()>>,
    held: Option<OwnedMutexGuard<()>>,
}

impl Drop for RoleLock {
    fn drop(&mut self) {
        self.held.take();
        let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        // The map and this guard are the only owners left.
        if Arc::strong_count(&self.entry) == 2 {
            map.remove(&self.role_id);
        }
    }
}

#[derive(Clone)]
pub struct GrantStore {
    db: DatabaseConnection,
    permissions: PermissionCatalog,
    locks: RoleLocks,
}

impl GrantStore {
    pub fn new(db: DatabaseConnection, permissions: PermissionCatalog) -> Self {
        Self {
            db,
            permissions,
            locks: RoleLocks::default(),
        }
    }

    pub async fn get_grants(&self, role_id: i32) -> Result<RoleGrants, BastionError> {
        let role = find_live_role(&self.db, role_id).await?;
        read_grants(&self.db, &role).await
    }

    /// Replace every grant of a role. Unknown or inactive permission ids are
    /// dropped; a repeated id keeps its last entry.
    pub async fn set_grants(
        &self,
        role_id: i32,
        inputs: Vec<GrantInput>,
        actor: Option<&str>,
    ) -> Result<GrantSummary, BastionError> {
        find_live_role(&self.db, role_id).await?;
        let _lock = self.locks.acquire(role_id).await;
        let role = find_live_role(&self.db, role_id).await?;

        let requested: Vec<i32> = inputs.iter().map(|g| g.permission_id).collect();
        let valid: HashMap<i32, permission::Model> = if requested.is_empty() {
            HashMap::new()
        } else {
            permission::Entity::find()
                .filter(permission::Column::Id.is_in(requested.clone()))
                .filter(permission::Column::IsActive.eq(true))
                .all(&self.db)
                .await?
                .into_iter()
                .map(|p| (p.id, p))
                .collect()
        };

        let mut dropped = Vec::new();
        let mut by_permission: BTreeMap<i32, EmbeddedGrant> = BTreeMap::new();
        for input in inputs {
            match valid.get(&input.permission_id) {
                Some(perm) => {
                    by_permission.insert(perm.id, embed(perm, input.actions));
                }
                None => dropped.push(input.permission_id),
            }
        }
        if !dropped.is_empty() {
            tracing::warn!(role_id, ?dropped, "ignoring unknown or inactive permissions");
        }

        let grants: Vec<EmbeddedGrant> = by_permission.into_values().collect();
        let txn = self.db.begin().await?;
        let updated = write_both(&txn, role, grants, actor).await?;
        txn.commit().await?;

        tracing::info!(
            role_id,
            total = updated.permission_stats.total_permissions,
            "role grants replaced"
        );
        Ok(GrantSummary {
            total_permissions: updated.permission_stats.total_permissions,
            categories: updated.permission_stats.categories,
            dropped,
        })
    }

    /// Whether the role's grant on the permission keyed `key` allows
    /// `action`. An unknown key is a plain `false`.
    pub async fn check_grant(&self, role_id: i32, key: &str, action: Action) -> Result<bool, BastionError> {
        let Some(role) = Role::find_by_id(role_id).one(&self.db).await? else {
            return Ok(false);
        };
        self.check_loaded(&role, key, action).await
    }

    /// [`check_grant`](Self::check_grant) for an already-loaded role.
    pub async fn check_loaded(&self, role: &role::Model, key: &str, action: Action) -> Result<bool, BastionError> {
        let Some(perm) = self.permissions.find_by_key(key).await? else {
            return Ok(false);
        };

        let flags = if role.permissions.0.is_empty() {
            RolePermission::find()
                .filter(role_permission::Column::RoleId.eq(role.id))
                .filter(role_permission::Column::PermissionId.eq(perm.id))
                .one(&self.db)
                .await?
                .map(|row| row.actions)
        } else {
            role.permissions
                .0
                .iter()
                .find(|g| g.permission_id == perm.id)
                .map(|g| g.actions)
        };

        Ok(flags.is_some_and(|f| f.allows(action)))
    }

    /// Patch the actions of one existing grant in both forms.
    pub async fn update_action(
        &self,
        role_id: i32,
        permission_id: i32,
        actions: ActionFlags,
        actor: Option<&str>,
    ) -> Result<EmbeddedGrant, BastionError> {
        find_live_role(&self.db, role_id).await?;
        let _lock = self.locks.acquire(role_id).await;
        let role = find_live_role(&self.db, role_id).await?;
        let actions = actions.normalized();
        let now = Utc::now().naive_utc();

        let txn = self.db.begin().await?;

        let junction = RolePermission::find()
            .filter(role_permission::Column::RoleId.eq(role_id))
            .filter(role_permission::Column::PermissionId.eq(permission_id))
            .one(&txn)
            .await?;

        let mut embedded = role.permissions.clone();
        let position = embedded.0.iter().position(|g| g.permission_id == permission_id);

        if junction.is_none() && position.is_none() {
            return Err(BastionError::NotFound(format!(
                "Role {role_id} has no grant for permission {permission_id}"
            )));
        }

        if let Some(row) = junction {
            let mut row = row.into_active_model();
            row.actions = Set(actions);
            row.updated_by = Set(actor.map(str::to_string));
            row.updated_at = Set(now);
            row.update(&txn).await?;
        }

        let patched = match position {
            Some(index) => {
                embedded.0[index].actions = actions;
                let patched = embedded.0[index].clone();

                let mut stats = role.permission_stats.clone();
                stats.last_updated_at = Some(now);
                let mut model = role.into_active_model();
                model.permissions = Set(embedded);
                model.permission_stats = Set(stats);
                model.updated_by = Set(actor.map(str::to_string));
                model.updated_at = Set(now);
                model.update(&txn).await?;
                patched
            }
            None => {
                let perm = permission::Entity::find_by_id(permission_id)
                    .one(&txn)
                    .await?
                    .ok_or_else(|| {
                        BastionError::NotFound(format!("Permission {permission_id} not found"))
                    })?;
                embed(&perm, actions)
            }
        };

        txn.commit().await?;
        tracing::info!(role_id, permission_id, "grant actions updated");
        Ok(patched)
    }

    /// Number of junction rows for a role.
    pub async fn junction_count(&self, role_id: i32) -> Result<u64, BastionError> {
        Ok(RolePermission::find()
            .filter(role_permission::Column::RoleId.eq(role_id))
            .count(&self.db)
            .await?)
    }
}

async fn find_live_role(db: &DatabaseConnection, role_id: i32) -> Result<role::Model, BastionError> {
    Role::find_by_id(role_id)
        .filter(role::Column::IsDeleted.eq(false))
        .one(db)
        .await?
        .ok_or_else(|| BastionError::NotFound(format!("Role {role_id} not found")))
}

pub(crate) fn embed(perm: &permission::Model, actions: ActionFlags) -> EmbeddedGrant {
    EmbeddedGrant {
        permission_id: perm.id,
        module: perm.module.clone(),
        resource_id: perm.resource_id,
        category: perm.category,
        display_name: perm.display_name.clone(),
        actions: actions.normalized(),
    }
}

/// Read a role's grants: the embedded array when non-empty, else the
/// junction rows joined with their permissions.
pub(crate) async fn read_grants<C: ConnectionTrait>(
    conn: &C,
    role: &role::Model,
) -> Result<RoleGrants, BastionError> {
    if !role.permissions.0.is_empty() {
        return Ok(RoleGrants::new(
            role.id,
            role.permissions.0.clone(),
            GrantSource::Embedded,
            Some(role.permission_stats.clone()),
        ));
    }

    let list = junction_grants(conn, role.id).await?;
    Ok(RoleGrants::new(role.id, list, GrantSource::Junction, None))
}

pub(crate) async fn junction_grants<C: ConnectionTrait>(
    conn: &C,
    role_id: i32,
) -> Result<Vec<EmbeddedGrant>, BastionError> {
    let rows = RolePermission::find()
        .filter(role_permission::Column::RoleId.eq(role_id))
        .find_also_related(permission::Entity)
        .all(conn)
        .await?;

    let mut list: Vec<EmbeddedGrant> = rows
        .into_iter()
        .filter_map(|(row, perm)| perm.map(|p| embed(&p, row.actions)))
        .collect();
    list.sort_by_key(|g| g.permission_id);
    Ok(list)
}

/// Write `grants` as the complete grant set of `role` in both forms.
/// Callers own the transaction.
pub(crate) async fn write_both<C: ConnectionTrait>(
    conn: &C,
    role: role::Model,
    grants: Vec<EmbeddedGrant>,
    actor: Option<&str>,
) -> Result<role::Model, BastionError> {
    let now = Utc::now().naive_utc();
    let role_id = role.id;

    RolePermission::delete_many()
        .filter(role_permission::Column::RoleId.eq(role_id))
        .exec(conn)
        .await?;

    if !grants.is_empty() {
        let rows = grants.iter().map(|g| role_permission::ActiveModel {
            role_id: Set(role_id),
            permission_id: Set(g.permission_id),
            actions: Set(g.actions),
            updated_by: Set(actor.map(str::to_string)),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        });
        RolePermission::insert_many(rows).exec(conn).await?;
    }

    let stats = PermissionStats::from_grants(&grants, now);
    let mut model = role.into_active_model();
    model.permissions = Set(EmbeddedGrants(grants));
    model.permission_stats = Set(stats);
    model.updated_by = Set(actor.map(str::to_string));
    model.updated_at = Set(now);
    Ok(model.update(conn).await?)
}
