use std::net::IpAddr;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::engine::RequestContext;
use crate::error::BastionError;

/// The already-authenticated caller, as supplied by an upstream layer.
///
/// Bastion never checks credentials. Something in front of it (an auth
/// middleware, or [`identity_from_headers`](crate::middleware::identity_from_headers)
/// behind a trusted gateway) puts an `Identity` into the request extensions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Identity {
    pub role_id: Option<i32>,
    pub user_id: Option<String>,
    pub company_id: Option<String>,
    pub department_id: Option<String>,
    #[schema(value_type = Option<String>)]
    pub ip: Option<IpAddr>,
}

pub const ROLE_ID_HEADER: &str = "x-role-id";
pub const USER_ID_HEADER: &str = "x-user-id";
pub const COMPANY_ID_HEADER: &str = "x-company-id";
pub const DEPARTMENT_ID_HEADER: &str = "x-department-id";

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// First address in `x-forwarded-for`, else `x-real-ip`.
pub fn client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    header(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next().and_then(|ip| ip.trim().parse().ok()))
        .or_else(|| header(headers, "x-real-ip").and_then(|v| v.parse().ok()))
}

impl Identity {
    /// Read the identity headers set by a trusted gateway. A malformed role
    /// id is treated as absent.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Identity {
            role_id: header(headers, ROLE_ID_HEADER).and_then(|v| v.parse().ok()),
            user_id: header(headers, USER_ID_HEADER),
            company_id: header(headers, COMPANY_ID_HEADER),
            department_id: header(headers, DEPARTMENT_ID_HEADER),
            ip: client_ip(headers),
        }
    }

    pub fn context(&self) -> RequestContext {
        RequestContext {
            user_id: self.user_id.clone(),
            company_id: self.company_id.clone(),
            department_id: self.department_id.clone(),
            ip: self.ip,
        }
    }

    /// Label recorded in `updated_by` columns.
    pub fn actor_label(&self) -> Option<String> {
        self.user_id
            .clone()
            .or_else(|| self.role_id.map(|id| format!("role:{id}")))
    }
}

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = BastionError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .filter(|identity| identity.role_id.is_some())
            .cloned()
            .ok_or_else(|| {
                BastionError::Unauthenticated("User role not found. Please log in again.".to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(ROLE_ID_HEADER, HeaderValue::from_static("7"));
        headers.insert(COMPANY_ID_HEADER, HeaderValue::from_static("acme"));
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );

        let identity = Identity::from_headers(&headers);
        assert_eq!(identity.role_id, Some(7));
        assert_eq!(identity.company_id.as_deref(), Some("acme"));
        assert_eq!(identity.user_id, None);
        assert_eq!(identity.ip, "203.0.113.9".parse().ok());
        assert_eq!(identity.actor_label().as_deref(), Some("role:7"));
    }

    #[test]
    fn test_malformed_role_and_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert(ROLE_ID_HEADER, HeaderValue::from_static("admin"));
        headers.insert("x-real-ip", HeaderValue::from_static("::1"));

        let identity = Identity::from_headers(&headers);
        assert_eq!(identity.role_id, None);
        assert_eq!(identity.ip, "::1".parse().ok());
    }
}
