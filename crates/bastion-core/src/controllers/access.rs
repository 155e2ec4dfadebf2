use std::net::IpAddr;

use axum::extract::State;
use axum::routing::post;
use axum::Router;
use serde::Deserialize;
use utoipa::ToSchema;

use crate::engine::{Decision, RequestContext};
use crate::error::BastionError;
use crate::extractors::Json;
use crate::models::Action;
use crate::response::ApiResponse;

use super::AppState;

/// An explicit decision query. Denials come back as data, not as error
/// statuses.
#[derive(Debug, Deserialize, ToSchema)]
pub struct DecideRequest {
    pub role_id: Option<i32>,
    /// Resource name, e.g. `hrm.employees`.
    pub resource: String,
    pub action: Action,
    pub user_id: Option<String>,
    pub company_id: Option<String>,
    pub department_id: Option<String>,
    #[schema(value_type = Option<String>)]
    pub ip: Option<IpAddr>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/access/decide", post(decide))
}

#[utoipa::path(
    post,
    path = "/api/rbac/access/decide",
    request_body = DecideRequest,
    responses((status = 200, description = "Decision with reason and data filter", body = ApiResponse<Decision>)),
    tag = "access"
)]
pub async fn decide(
    State(state): State<AppState>,
    Json(payload): Json<DecideRequest>,
) -> Result<ApiResponse<Decision>, BastionError> {
    let ctx = RequestContext {
        user_id: payload.user_id,
        company_id: payload.company_id,
        department_id: payload.department_id,
        ip: payload.ip,
    };
    let decision = state
        .engine
        .decide(payload.role_id, &payload.resource, payload.action, &ctx)
        .await?;
    Ok(ApiResponse::success(decision))
}
