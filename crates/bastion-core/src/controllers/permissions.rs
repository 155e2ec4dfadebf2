use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::Router;

use crate::catalog::permission::{NewPermission, PermissionFilter, PermissionGroup, PermissionUpdate};
use crate::error::BastionError;
use crate::extractors::Json;
use crate::models::{permission, Category};
use crate::response::{ApiResponse, Created};

use super::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/permissions", get(list_permissions).post(create_permission))
        .route("/permissions/grouped", get(grouped_permissions))
        .route("/permissions/category/{category}", get(permissions_by_category))
        .route(
            "/permissions/{id}",
            get(get_permission)
                .put(update_permission)
                .delete(deactivate_permission),
        )
}

#[utoipa::path(
    get,
    path = "/api/rbac/permissions",
    params(PermissionFilter),
    responses((status = 200, description = "Permissions", body = ApiResponse<Vec<permission::Model>>)),
    tag = "permissions"
)]
pub async fn list_permissions(
    State(state): State<AppState>,
    Query(filter): Query<PermissionFilter>,
) -> Result<ApiResponse<Vec<permission::Model>>, BastionError> {
    Ok(ApiResponse::success(state.permissions.list(&filter).await?))
}

#[utoipa::path(
    get,
    path = "/api/rbac/permissions/grouped",
    responses((status = 200, description = "Active permissions grouped by category", body = ApiResponse<Vec<PermissionGroup>>)),
    tag = "permissions"
)]
pub async fn grouped_permissions(
    State(state): State<AppState>,
) -> Result<ApiResponse<Vec<PermissionGroup>>, BastionError> {
    Ok(ApiResponse::success(state.permissions.grouped().await?))
}

#[utoipa::path(
    get,
    path = "/api/rbac/permissions/category/{category}",
    params(("category" = Category, Path, description = "Category key")),
    responses((status = 200, description = "Active permissions of the category", body = ApiResponse<Vec<permission::Model>>)),
    tag = "permissions"
)]
pub async fn permissions_by_category(
    State(state): State<AppState>,
    Path(category): Path<Category>,
) -> Result<ApiResponse<Vec<permission::Model>>, BastionError> {
    Ok(ApiResponse::success(state.permissions.by_category(category).await?))
}

#[utoipa::path(
    get,
    path = "/api/rbac/permissions/{id}",
    params(("id" = i32, Path, description = "Permission id")),
    responses(
        (status = 200, description = "Permission", body = ApiResponse<permission::Model>),
        (status = 404, description = "Not found")
    ),
    tag = "permissions"
)]
pub async fn get_permission(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<ApiResponse<permission::Model>, BastionError> {
    Ok(ApiResponse::success(state.permissions.get(id).await?))
}

#[utoipa::path(
    post,
    path = "/api/rbac/permissions",
    request_body = NewPermission,
    responses(
        (status = 201, description = "Permission created", body = ApiResponse<permission::Model>),
        (status = 409, description = "Module already registered")
    ),
    tag = "permissions"
)]
pub async fn create_permission(
    State(state): State<AppState>,
    Json(payload): Json<NewPermission>,
) -> Result<Created<permission::Model>, BastionError> {
    let created = state.permissions.create(payload).await?;
    Ok(Created(ApiResponse::success_with_message(
        created,
        "Permission created successfully",
    )))
}

#[utoipa::path(
    put,
    path = "/api/rbac/permissions/{id}",
    params(("id" = i32, Path, description = "Permission id")),
    request_body = PermissionUpdate,
    responses(
        (status = 200, description = "Permission updated", body = ApiResponse<permission::Model>),
        (status = 422, description = "Category or actions of a resource-linked permission")
    ),
    tag = "permissions"
)]
pub async fn update_permission(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(payload): Json<PermissionUpdate>,
) -> Result<ApiResponse<permission::Model>, BastionError> {
    let updated = state.permissions.update(id, payload).await?;
    Ok(ApiResponse::success_with_message(
        updated,
        "Permission updated successfully",
    ))
}

/// Soft delete: the permission is deactivated and stays referenced by
/// existing grants.
#[utoipa::path(
    delete,
    path = "/api/rbac/permissions/{id}",
    params(("id" = i32, Path, description = "Permission id")),
    responses((status = 200, description = "Permission deactivated", body = ApiResponse<permission::Model>)),
    tag = "permissions"
)]
pub async fn deactivate_permission(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<ApiResponse<permission::Model>, BastionError> {
    let updated = state.permissions.deactivate(id).await?;
    Ok(ApiResponse::success_with_message(
        updated,
        "Permission deactivated",
    ))
}
