//! Request-level access control.
//!
//! ```rust,ignore
//! use axum::middleware::from_fn;
//! use bastion_core::middleware::{require_page_access, require_route_access};
//!
//! Router::new()
//!     // Explicit resource and action for one route
//!     .route("/api/employees", get(list_employees))
//!     .route_layer(from_fn(require_page_access("hrm.employees", Action::Read)))
//!     // Resolve every /api/ request against the resources' declared routes
//!     .layer(from_fn(require_route_access))
//! ```
//!
//! Both layers read an [`Identity`] and an `Arc<AccessEngine>` from the
//! request extensions. On success they insert a [`ResolvedAccess`] for the
//! handler.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::engine::{AccessEngine, DataFilter, Decision};
use crate::error::BastionError;
use crate::extractors::Identity;
use crate::models::Action;

/// What the access layer decided for the current request.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ResolvedAccess {
    pub resource: String,
    pub action: Action,
    pub data_filter: DataFilter,
}

impl ResolvedAccess {
    fn from_decision(decision: Decision) -> Option<Self> {
        Some(ResolvedAccess {
            resource: decision.resource?,
            action: decision.action,
            data_filter: decision.data_filter.unwrap_or_default(),
        })
    }
}

/// Build an [`Identity`] from gateway headers unless an upstream layer
/// already provided one. Only use behind a gateway that sets these headers.
pub async fn identity_from_headers(mut req: Request, next: Next) -> Response {
    if req.extensions().get::<Identity>().is_none() {
        let mut identity = Identity::from_headers(req.headers());
        if identity.ip.is_none() {
            identity.ip = req
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip());
        }
        req.extensions_mut().insert(identity);
    }
    next.run(req).await
}

fn is_unprotected(path: &str) -> bool {
    !path.starts_with("/api/") || path.starts_with("/api/auth/") || path.starts_with("/api/public/")
}

/// Resolve the request against the catalog's declared API routes and decide.
///
/// Paths outside `/api/`, and under `/api/auth/` or `/api/public/`, are not
/// checked. Requests matching no resource pass through. Faults inside the
/// check are logged and the request is let through.
pub async fn require_route_access(mut req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    if is_unprotected(&path) {
        return next.run(req).await;
    }

    let identity = req.extensions().get::<Identity>().cloned().unwrap_or_default();
    let Some(role_id) = identity.role_id else {
        return BastionError::Unauthenticated("Unauthorized".to_string()).into_response();
    };

    let Some(engine) = req.extensions().get::<Arc<AccessEngine>>().cloned() else {
        tracing::error!(%path, "access engine missing from request extensions, allowing");
        return next.run(req).await;
    };

    let method = req.method().as_str().to_string();
    match route_decision(&engine, role_id, &method, &path, &identity).await {
        Ok(None) => next.run(req).await,
        Ok(Some(decision)) => match decision.into_result() {
            Ok(decision) => {
                if let Some(access) = ResolvedAccess::from_decision(decision) {
                    req.extensions_mut().insert(access);
                }
                next.run(req).await
            }
            Err(denied) => denied.into_response(),
        },
        Err(e) => {
            tracing::error!(%method, %path, error = %e, "route access check failed, allowing");
            next.run(req).await
        }
    }
}

async fn route_decision(
    engine: &AccessEngine,
    role_id: i32,
    method: &str,
    path: &str,
    identity: &Identity,
) -> Result<Option<Decision>, BastionError> {
    let Some((resource, action)) = engine.resolve(method, path).await? else {
        return Ok(None);
    };
    let decision = engine
        .decide_for(&resource, Some(role_id), action, &identity.context())
        .await?;
    Ok(Some(decision))
}

/// Require `action` on the resource named `resource` for the wrapped routes.
///
/// A caller without a role is refused before the catalog is consulted. A
/// resource missing from the catalog follows the engine's unknown-resource
/// policy. Unlike [`require_route_access`], faults are returned as errors.
pub fn require_page_access(
    resource: &'static str,
    action: Action,
) -> impl Fn(
    Request,
    Next,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Response, BastionError>> + Send>>
+ Clone
+ Send {
    move |mut req: Request, next: Next| {
        Box::pin(async move {
            let identity = req.extensions().get::<Identity>().cloned().unwrap_or_default();
            let role_id = identity.role_id.ok_or_else(|| {
                BastionError::Unauthenticated("User role not found. Please log in again.".to_string())
            })?;

            let engine = req
                .extensions()
                .get::<Arc<AccessEngine>>()
                .cloned()
                .ok_or_else(|| BastionError::Internal("Access engine not found".to_string()))?;

            let decision = engine
                .decide(Some(role_id), resource, action, &identity.context())
                .await?
                .into_result()?;

            if let Some(access) = ResolvedAccess::from_decision(decision) {
                req.extensions_mut().insert(access);
            }
            Ok(next.run(req).await)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unprotected_paths() {
        assert!(is_unprotected("/health"));
        assert!(is_unprotected("/api-docs"));
        assert!(is_unprotected("/api/auth/login"));
        assert!(is_unprotected("/api/public/plans"));
        assert!(!is_unprotected("/api/hrm/employees"));
        assert!(!is_unprotected("/api/rbac/roles"));
    }
}
