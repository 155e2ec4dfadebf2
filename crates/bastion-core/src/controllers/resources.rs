use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, put};
use axum::Router;

use crate::catalog::resource::{
    NewResource, ReorderOutcome, ResourceFilter, ResourceGroup, ResourceStats, ResourceTreeGroup,
    ResourceUpdate, SortOrderUpdate,
};
use crate::error::BastionError;
use crate::extractors::Json;
use crate::models::{resource, Category};
use crate::response::{ApiResponse, Created};

use super::{AppState, Deleted};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/resources", get(list_resources).post(create_resource))
        .route("/resources/grouped", get(grouped_resources))
        .route("/resources/tree", get(resource_tree))
        .route("/resources/stats", get(resource_stats))
        .route("/resources/category/{category}", get(resources_by_category))
        .route("/resources/by-name/{name}", get(get_resource_by_name))
        .route("/resources/batch/orders", put(reorder_resources))
        .route(
            "/resources/{id}",
            get(get_resource).put(update_resource).delete(delete_resource),
        )
        .route("/resources/{id}/toggle-status", patch(toggle_resource))
}

#[utoipa::path(
    get,
    path = "/api/rbac/resources",
    params(ResourceFilter),
    responses(
        (status = 200, description = "Resources ordered by category and sort order", body = ApiResponse<Vec<resource::Model>>)
    ),
    tag = "resources"
)]
pub async fn list_resources(
    State(state): State<AppState>,
    Query(filter): Query<ResourceFilter>,
) -> Result<ApiResponse<Vec<resource::Model>>, BastionError> {
    Ok(ApiResponse::success(state.resources.list(&filter).await?))
}

#[utoipa::path(
    get,
    path = "/api/rbac/resources/grouped",
    responses((status = 200, description = "Resources grouped by category", body = ApiResponse<Vec<ResourceGroup>>)),
    tag = "resources"
)]
pub async fn grouped_resources(
    State(state): State<AppState>,
) -> Result<ApiResponse<Vec<ResourceGroup>>, BastionError> {
    Ok(ApiResponse::success(state.resources.grouped().await?))
}

#[utoipa::path(
    get,
    path = "/api/rbac/resources/tree",
    responses((status = 200, description = "Parent/child tree per category", body = ApiResponse<Vec<ResourceTreeGroup>>)),
    tag = "resources"
)]
pub async fn resource_tree(
    State(state): State<AppState>,
) -> Result<ApiResponse<Vec<ResourceTreeGroup>>, BastionError> {
    Ok(ApiResponse::success(state.resources.tree().await?))
}

#[utoipa::path(
    get,
    path = "/api/rbac/resources/stats",
    responses((status = 200, description = "Catalog counts", body = ApiResponse<ResourceStats>)),
    tag = "resources"
)]
pub async fn resource_stats(
    State(state): State<AppState>,
) -> Result<ApiResponse<ResourceStats>, BastionError> {
    Ok(ApiResponse::success(state.resources.stats().await?))
}

#[utoipa::path(
    get,
    path = "/api/rbac/resources/category/{category}",
    params(("category" = Category, Path, description = "Category key, e.g. `hrm`")),
    responses((status = 200, description = "Active top-level resources of the category", body = ApiResponse<Vec<resource::Model>>)),
    tag = "resources"
)]
pub async fn resources_by_category(
    State(state): State<AppState>,
    Path(category): Path<Category>,
) -> Result<ApiResponse<Vec<resource::Model>>, BastionError> {
    Ok(ApiResponse::success(state.resources.by_category(category).await?))
}

#[utoipa::path(
    get,
    path = "/api/rbac/resources/{id}",
    params(("id" = i32, Path, description = "Resource id")),
    responses(
        (status = 200, description = "Resource", body = ApiResponse<resource::Model>),
        (status = 404, description = "Not found")
    ),
    tag = "resources"
)]
pub async fn get_resource(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<ApiResponse<resource::Model>, BastionError> {
    Ok(ApiResponse::success(state.resources.get(id).await?))
}

#[utoipa::path(
    get,
    path = "/api/rbac/resources/by-name/{name}",
    params(("name" = String, Path, description = "Resource name, e.g. `hrm.employees`")),
    responses(
        (status = 200, description = "Resource", body = ApiResponse<resource::Model>),
        (status = 404, description = "Not found")
    ),
    tag = "resources"
)]
pub async fn get_resource_by_name(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<ApiResponse<resource::Model>, BastionError> {
    Ok(ApiResponse::success(state.resources.get_by_name(&name).await?))
}

#[utoipa::path(
    post,
    path = "/api/rbac/resources",
    request_body = NewResource,
    responses(
        (status = 201, description = "Resource created", body = ApiResponse<resource::Model>),
        (status = 409, description = "Name already taken"),
        (status = 422, description = "Invalid input")
    ),
    tag = "resources"
)]
pub async fn create_resource(
    State(state): State<AppState>,
    Json(payload): Json<NewResource>,
) -> Result<Created<resource::Model>, BastionError> {
    let created = state.resources.create(payload).await?;
    Ok(Created(ApiResponse::success_with_message(
        created,
        "Resource created successfully",
    )))
}

#[utoipa::path(
    put,
    path = "/api/rbac/resources/{id}",
    params(("id" = i32, Path, description = "Resource id")),
    request_body = ResourceUpdate,
    responses(
        (status = 200, description = "Resource updated", body = ApiResponse<resource::Model>),
        (status = 404, description = "Not found"),
        (status = 409, description = "Duplicate name or system resource rename")
    ),
    tag = "resources"
)]
pub async fn update_resource(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(payload): Json<ResourceUpdate>,
) -> Result<ApiResponse<resource::Model>, BastionError> {
    let updated = state.resources.update(id, payload).await?;
    Ok(ApiResponse::success_with_message(
        updated,
        "Resource updated successfully",
    ))
}

#[utoipa::path(
    delete,
    path = "/api/rbac/resources/{id}",
    params(("id" = i32, Path, description = "Resource id")),
    responses(
        (status = 200, description = "Resource deleted", body = ApiResponse<Deleted>),
        (status = 404, description = "Not found"),
        (status = 409, description = "System resource")
    ),
    tag = "resources"
)]
pub async fn delete_resource(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<ApiResponse<Deleted>, BastionError> {
    state.resources.delete(id).await?;
    Ok(ApiResponse::success_with_message(
        Deleted { id },
        "Resource deleted successfully",
    ))
}

#[utoipa::path(
    patch,
    path = "/api/rbac/resources/{id}/toggle-status",
    params(("id" = i32, Path, description = "Resource id")),
    responses(
        (status = 200, description = "Active flag flipped", body = ApiResponse<resource::Model>),
        (status = 409, description = "System resource cannot be deactivated")
    ),
    tag = "resources"
)]
pub async fn toggle_resource(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<ApiResponse<resource::Model>, BastionError> {
    let updated = state.resources.toggle_status(id).await?;
    let message = if updated.is_active {
        "Resource activated"
    } else {
        "Resource deactivated"
    };
    Ok(ApiResponse::success_with_message(updated, message))
}

#[utoipa::path(
    put,
    path = "/api/rbac/resources/batch/orders",
    request_body = Vec<SortOrderUpdate>,
    responses((status = 200, description = "Sort orders applied", body = ApiResponse<ReorderOutcome>)),
    tag = "resources"
)]
pub async fn reorder_resources(
    State(state): State<AppState>,
    Json(orders): Json<Vec<SortOrderUpdate>>,
) -> Result<ApiResponse<ReorderOutcome>, BastionError> {
    Ok(ApiResponse::success(state.resources.reorder(&orders).await?))
}
