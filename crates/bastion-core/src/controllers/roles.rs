use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::error::BastionError;
use crate::extractors::{Identity, Json};
use crate::grants::{GrantInput, GrantSummary, RoleGrants};
use crate::models::{role, Action, ActionFlags, EmbeddedGrant};
use crate::response::{ApiResponse, Created};
use crate::roles::{CloneRole, NewRole, RoleFilter, RoleUpdate, RoleWithSummary};

use super::{AppState, Deleted};

// ── Request / Response types ──

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignRoleRequest {
    /// Role the user held before, whose user count is decremented.
    pub previous_role_id: Option<i32>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetGrantsRequest {
    pub permissions: Vec<GrantInput>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateGrantRequest {
    pub actions: ActionFlags,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CheckPermissionQuery {
    /// Permission module or linked resource name.
    pub module: String,
    pub action: Action,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckPermissionResponse {
    pub module: String,
    pub action: Action,
    pub has_permission: bool,
}

// ── Routes ──

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/roles", get(list_roles).post(create_role))
        .route("/roles/with-summary", get(roles_with_summary))
        .route(
            "/roles/{id}",
            get(get_role).put(update_role).delete(delete_role),
        )
        .route("/roles/{id}/toggle-status", patch(toggle_role))
        .route("/roles/{id}/clone", post(clone_role))
        .route("/roles/{id}/assign", post(assign_role))
        .route(
            "/roles/{id}/permissions",
            get(get_role_permissions).put(set_role_permissions),
        )
        .route(
            "/roles/{id}/permissions/{permission_id}",
            patch(update_role_permission),
        )
        .route("/roles/{id}/check-permission", get(check_role_permission))
}

#[utoipa::path(
    get,
    path = "/api/rbac/roles",
    params(RoleFilter),
    responses((status = 200, description = "Roles ordered by level then display name", body = ApiResponse<Vec<role::Model>>)),
    tag = "roles"
)]
pub async fn list_roles(
    State(state): State<AppState>,
    Query(filter): Query<RoleFilter>,
) -> Result<ApiResponse<Vec<role::Model>>, BastionError> {
    Ok(ApiResponse::success(state.roles.list(&filter).await?))
}

#[utoipa::path(
    get,
    path = "/api/rbac/roles/with-summary",
    responses((status = 200, description = "Active roles with grant counts", body = ApiResponse<Vec<RoleWithSummary>>)),
    tag = "roles"
)]
pub async fn roles_with_summary(
    State(state): State<AppState>,
) -> Result<ApiResponse<Vec<RoleWithSummary>>, BastionError> {
    Ok(ApiResponse::success(state.roles.list_with_summary().await?))
}

#[utoipa::path(
    get,
    path = "/api/rbac/roles/{id}",
    params(("id" = i32, Path, description = "Role id")),
    responses(
        (status = 200, description = "Role", body = ApiResponse<role::Model>),
        (status = 404, description = "Not found or deleted")
    ),
    tag = "roles"
)]
pub async fn get_role(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<ApiResponse<role::Model>, BastionError> {
    Ok(ApiResponse::success(state.roles.get(id).await?))
}

#[utoipa::path(
    post,
    path = "/api/rbac/roles",
    request_body = NewRole,
    responses(
        (status = 201, description = "Role created", body = ApiResponse<role::Model>),
        (status = 401, description = "No caller role"),
        (status = 403, description = "Level above the caller's"),
        (status = 409, description = "Name already taken")
    ),
    tag = "roles"
)]
pub async fn create_role(
    State(state): State<AppState>,
    identity: Identity,
    Json(payload): Json<NewRole>,
) -> Result<Created<role::Model>, BastionError> {
    let creator = state.acting_role(&identity).await?;
    let created = state.roles.create(payload, creator.as_ref()).await?;
    Ok(Created(ApiResponse::success_with_message(
        created,
        "Role created successfully",
    )))
}

#[utoipa::path(
    put,
    path = "/api/rbac/roles/{id}",
    params(("id" = i32, Path, description = "Role id")),
    request_body = RoleUpdate,
    responses(
        (status = 200, description = "Role updated", body = ApiResponse<role::Model>),
        (status = 403, description = "Role not below the caller's, or level change above it"),
        (status = 409, description = "Duplicate name or protected system field")
    ),
    tag = "roles"
)]
pub async fn update_role(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<i32>,
    Json(payload): Json<RoleUpdate>,
) -> Result<ApiResponse<role::Model>, BastionError> {
    let actor = state.acting_role(&identity).await?;
    let updated = state.roles.update(id, payload, actor.as_ref()).await?;
    Ok(ApiResponse::success_with_message(
        updated,
        "Role updated successfully",
    ))
}

#[utoipa::path(
    delete,
    path = "/api/rbac/roles/{id}",
    params(("id" = i32, Path, description = "Role id")),
    responses(
        (status = 200, description = "Role soft-deleted", body = ApiResponse<Deleted>),
        (status = 403, description = "Role not below the caller's"),
        (status = 409, description = "System role")
    ),
    tag = "roles"
)]
pub async fn delete_role(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<i32>,
) -> Result<ApiResponse<Deleted>, BastionError> {
    let actor = state.acting_role(&identity).await?;
    state.roles.delete(id, actor.as_ref()).await?;
    Ok(ApiResponse::success_with_message(
        Deleted { id },
        "Role deleted successfully",
    ))
}

#[utoipa::path(
    patch,
    path = "/api/rbac/roles/{id}/toggle-status",
    params(("id" = i32, Path, description = "Role id")),
    responses(
        (status = 200, description = "Active flag flipped", body = ApiResponse<role::Model>),
        (status = 403, description = "Role not below the caller's"),
        (status = 409, description = "System role cannot be deactivated")
    ),
    tag = "roles"
)]
pub async fn toggle_role(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<i32>,
) -> Result<ApiResponse<role::Model>, BastionError> {
    let actor = state.acting_role(&identity).await?;
    let updated = state.roles.toggle_status(id, actor.as_ref()).await?;
    let message = if updated.is_active {
        "Role activated"
    } else {
        "Role deactivated"
    };
    Ok(ApiResponse::success_with_message(updated, message))
}

#[utoipa::path(
    post,
    path = "/api/rbac/roles/{id}/clone",
    params(("id" = i32, Path, description = "Source role id")),
    request_body = CloneRole,
    responses(
        (status = 201, description = "Role cloned with its grants", body = ApiResponse<role::Model>),
        (status = 403, description = "Clone level above the caller's")
    ),
    tag = "roles"
)]
pub async fn clone_role(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<i32>,
    Json(payload): Json<CloneRole>,
) -> Result<Created<role::Model>, BastionError> {
    let creator = state.acting_role(&identity).await?;
    let cloned = state.roles.clone_role(id, payload, creator.as_ref()).await?;
    Ok(Created(ApiResponse::success_with_message(
        cloned,
        "Role cloned successfully",
    )))
}

#[utoipa::path(
    post,
    path = "/api/rbac/roles/{id}/assign",
    params(("id" = i32, Path, description = "Role to assign")),
    request_body = AssignRoleRequest,
    responses(
        (status = 200, description = "Assignment recorded", body = ApiResponse<role::Model>),
        (status = 403, description = "Role more privileged than the caller's")
    ),
    tag = "roles"
)]
pub async fn assign_role(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<i32>,
    Json(payload): Json<AssignRoleRequest>,
) -> Result<ApiResponse<role::Model>, BastionError> {
    let assigner = state.acting_role(&identity).await?;
    let updated = state
        .roles
        .assign(id, payload.previous_role_id, assigner.as_ref())
        .await?;
    Ok(ApiResponse::success_with_message(updated, "Role assigned"))
}

#[utoipa::path(
    get,
    path = "/api/rbac/roles/{id}/permissions",
    params(("id" = i32, Path, description = "Role id")),
    responses(
        (status = 200, description = "Grants keyed by module and grouped by category", body = ApiResponse<RoleGrants>),
        (status = 404, description = "Role not found")
    ),
    tag = "grants"
)]
pub async fn get_role_permissions(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<ApiResponse<RoleGrants>, BastionError> {
    Ok(ApiResponse::success(state.grants.get_grants(id).await?))
}

#[utoipa::path(
    put,
    path = "/api/rbac/roles/{id}/permissions",
    params(("id" = i32, Path, description = "Role id")),
    request_body = SetGrantsRequest,
    responses(
        (status = 200, description = "Grants replaced", body = ApiResponse<GrantSummary>),
        (status = 403, description = "Role not below the caller's"),
        (status = 422, description = "Malformed grant list")
    ),
    tag = "grants"
)]
pub async fn set_role_permissions(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<i32>,
    Json(payload): Json<SetGrantsRequest>,
) -> Result<ApiResponse<GrantSummary>, BastionError> {
    let actor = state.acting_role(&identity).await?;
    state.roles.get_manageable(id, actor.as_ref()).await?;
    let label = identity.actor_label();
    let summary = state
        .grants
        .set_grants(id, payload.permissions, label.as_deref())
        .await?;
    Ok(ApiResponse::success_with_message(
        summary,
        "Role permissions updated",
    ))
}

#[utoipa::path(
    patch,
    path = "/api/rbac/roles/{id}/permissions/{permission_id}",
    params(
        ("id" = i32, Path, description = "Role id"),
        ("permission_id" = i32, Path, description = "Permission id")
    ),
    request_body = UpdateGrantRequest,
    responses(
        (status = 200, description = "Grant actions patched", body = ApiResponse<EmbeddedGrant>),
        (status = 403, description = "Role not below the caller's"),
        (status = 404, description = "Role does not hold this permission")
    ),
    tag = "grants"
)]
pub async fn update_role_permission(
    State(state): State<AppState>,
    identity: Identity,
    Path((id, permission_id)): Path<(i32, i32)>,
    Json(payload): Json<UpdateGrantRequest>,
) -> Result<ApiResponse<EmbeddedGrant>, BastionError> {
    let actor = state.acting_role(&identity).await?;
    state.roles.get_manageable(id, actor.as_ref()).await?;
    let label = identity.actor_label();
    let grant = state
        .grants
        .update_action(id, permission_id, payload.actions, label.as_deref())
        .await?;
    Ok(ApiResponse::success(grant))
}

#[utoipa::path(
    get,
    path = "/api/rbac/roles/{id}/check-permission",
    params(("id" = i32, Path, description = "Role id"), CheckPermissionQuery),
    responses((status = 200, description = "Whether the role's grant allows the action", body = ApiResponse<CheckPermissionResponse>)),
    tag = "grants"
)]
pub async fn check_role_permission(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Query(query): Query<CheckPermissionQuery>,
) -> Result<ApiResponse<CheckPermissionResponse>, BastionError> {
    let has_permission = state.grants.check_grant(id, &query.module, query.action).await?;
    Ok(ApiResponse::success(CheckPermissionResponse {
        module: query.module,
        action: query.action,
        has_permission,
    }))
}
