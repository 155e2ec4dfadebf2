//! Offline batch jobs moving grants between the junction and embedded forms.
//!
//! Neither job deletes junction rows, so both are idempotent and safe to
//! re-run. Each reports a per-role tally and ends with a global count check.

use std::collections::BTreeMap;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::Serialize;

use crate::error::BastionError;
use crate::models::role::{self, Entity as Role};
use crate::models::role_permission::{self, Entity as RolePermission};
use crate::models::{EmbeddedGrants, PermissionStats};

use super::junction_grants;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase", tag = "status", content = "detail")]
pub enum RoleOutcome {
    Ok,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleTally {
    pub role_id: i32,
    pub name: String,
    pub grants: usize,
    pub outcome: RoleOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleMismatch {
    pub role_id: i32,
    pub name: String,
    pub embedded: usize,
    pub junction: usize,
    /// Permission ids present in both forms whose effective action flags
    /// differ. `all` is expanded before comparing.
    pub differing_actions: Vec<i32>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Verification {
    pub roles_checked: usize,
    pub total_embedded: usize,
    pub total_junction: usize,
    pub mismatches: Vec<RoleMismatch>,
}

impl Verification {
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty() && self.total_embedded == self.total_junction
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ForwardReport {
    pub roles: Vec<RoleTally>,
    pub succeeded: usize,
    pub failed: usize,
    pub verification: Verification,
}

#[derive(Debug, Clone, Serialize)]
pub struct RollbackReport {
    pub roles: Vec<RoleTally>,
    pub succeeded: usize,
    pub failed: usize,
    /// Embedded grants still present after the rollback; zero on success.
    pub embedded_remaining: usize,
    /// Junction rows, identical before and after.
    pub junction_total: u64,
}

async fn live_roles(db: &DatabaseConnection) -> Result<Vec<role::Model>, BastionError> {
    Ok(Role::find()
        .filter(role::Column::IsDeleted.eq(false))
        .order_by_asc(role::Column::Id)
        .all(db)
        .await?)
}

/// Build every role's embedded array from its junction rows.
pub async fn migrate_forward(db: &DatabaseConnection) -> Result<ForwardReport, BastionError> {
    let roles = live_roles(db).await?;
    let mut tallies = Vec::with_capacity(roles.len());

    for role in roles {
        let role_id = role.id;
        let name = role.name.clone();
        let outcome = async {
            let grants = junction_grants(db, role_id).await?;
            let count = grants.len();
            let stats = PermissionStats::from_grants(&grants, Utc::now().naive_utc());
            let mut model = role.into_active_model();
            model.permissions = Set(EmbeddedGrants(grants));
            model.permission_stats = Set(stats);
            model.update(db).await?;
            Ok::<usize, BastionError>(count)
        }
        .await;

        let tally = match outcome {
            Ok(count) => {
                tracing::info!(role_id, role = %name, grants = count, "role migrated to embedded grants");
                RoleTally {
                    role_id,
                    name,
                    grants: count,
                    outcome: RoleOutcome::Ok,
                }
            }
            Err(e) => {
                tracing::error!(role_id, role = %name, error = %e, "role grant migration failed");
                RoleTally {
                    role_id,
                    name,
                    grants: 0,
                    outcome: RoleOutcome::Failed(e.to_string()),
                }
            }
        };
        tallies.push(tally);
    }

    let verification = verify(db).await?;
    let failed = tallies
        .iter()
        .filter(|t| matches!(t.outcome, RoleOutcome::Failed(_)))
        .count();
    Ok(ForwardReport {
        succeeded: tallies.len() - failed,
        failed,
        roles: tallies,
        verification,
    })
}

/// Clear every role's embedded array; junction rows are left alone.
pub async fn rollback(db: &DatabaseConnection) -> Result<RollbackReport, BastionError> {
    let roles = live_roles(db).await?;
    let mut tallies = Vec::with_capacity(roles.len());

    for role in roles {
        let role_id = role.id;
        let name = role.name.clone();
        let cleared = role.permissions.0.len();
        let mut model = role.into_active_model();
        model.permissions = Set(EmbeddedGrants::default());
        model.permission_stats = Set(PermissionStats {
            last_updated_at: Some(Utc::now().naive_utc()),
            ..Default::default()
        });

        let outcome = match model.update(db).await {
            Ok(_) => RoleOutcome::Ok,
            Err(e) => {
                tracing::error!(role_id, role = %name, error = %e, "embedded grant rollback failed");
                RoleOutcome::Failed(e.to_string())
            }
        };
        tallies.push(RoleTally {
            role_id,
            name,
            grants: cleared,
            outcome,
        });
    }

    let embedded_remaining = live_roles(db)
        .await?
        .iter()
        .map(|r| r.permissions.0.len())
        .sum();
    let junction_total = RolePermission::find().count(db).await?;
    let failed = tallies
        .iter()
        .filter(|t| matches!(t.outcome, RoleOutcome::Failed(_)))
        .count();

    Ok(RollbackReport {
        succeeded: tallies.len() - failed,
        failed,
        roles: tallies,
        embedded_remaining,
        junction_total,
    })
}

/// Compare both forms role by role: counts, permission sets and flags.
pub async fn verify(db: &DatabaseConnection) -> Result<Verification, BastionError> {
    let roles = live_roles(db).await?;
    let mut verification = Verification {
        roles_checked: roles.len(),
        ..Default::default()
    };

    for role in roles {
        let junction: BTreeMap<i32, role_permission::Model> = RolePermission::find()
            .filter(role_permission::Column::RoleId.eq(role.id))
            .all(db)
            .await?
            .into_iter()
            .map(|row| (row.permission_id, row))
            .collect();
        let embedded = &role.permissions.0;

        verification.total_embedded += embedded.len();
        verification.total_junction += junction.len();

        let mut same_set = embedded.len() == junction.len();
        let mut differing_actions = Vec::new();
        for grant in embedded {
            match junction.get(&grant.permission_id) {
                Some(row) if row.actions.normalized() != grant.actions.normalized() => {
                    differing_actions.push(grant.permission_id)
                }
                Some(_) => {}
                None => same_set = false,
            }
        }

        if !same_set || !differing_actions.is_empty() {
            verification.mismatches.push(RoleMismatch {
                role_id: role.id,
                name: role.name.clone(),
                embedded: embedded.len(),
                junction: junction.len(),
                differing_actions,
            });
        }
    }

    Ok(verification)
}
