use axum::Router;

use crate::controllers::{access, permissions, resources, roles, AppState};

/// Prefix every bastion endpoint is mounted under.
pub const API_PREFIX: &str = "/api/rbac";

/// Build the bastion API routes.
pub fn build_routes() -> Router<AppState> {
    let api = Router::new()
        .merge(resources::routes())
        .merge(permissions::routes())
        .merge(roles::routes())
        .merge(access::routes());

    Router::new().nest(API_PREFIX, api)
}
