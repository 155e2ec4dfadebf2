//! Policy annotations attached to a resource. All of them are stored as JSON
//! columns on the `resources` table.

use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::action::Action;

/// `(method, path, action)` override used when inferring the action for a
/// route-resolved request. `method` may be `*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ApiRoute {
    pub method: String,
    pub path: String,
    pub action: Action,
}

impl ApiRoute {
    pub fn matches_method(&self, method: &str) -> bool {
        self.method == "*" || self.method.eq_ignore_ascii_case(method)
    }

    /// Match a concrete request path against this route's pattern, where
    /// `:name` and `{name}` segments match any single segment.
    pub fn matches_path(&self, path: &str) -> bool {
        let pattern = self.path.trim_end_matches('/');
        let path = path.split('?').next().unwrap_or(path).trim_end_matches('/');

        let mut pattern_segments = pattern.split('/');
        let mut path_segments = path.split('/');
        loop {
            match (pattern_segments.next(), path_segments.next()) {
                (None, None) => return true,
                (Some(p), Some(s)) => {
                    let is_param = p.starts_with(':') || (p.starts_with('{') && p.ends_with('}'));
                    if !is_param && p != s {
                        return false;
                    }
                    if is_param && s.is_empty() {
                        return false;
                    }
                }
                _ => return false,
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult, ToSchema)]
pub struct ApiRoutes(pub Vec<ApiRoute>);

/// Inclusive hour window, `0..=23`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HourRange {
    pub start: u32,
    pub end: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct TimeRestriction {
    pub enabled: bool,
    pub allowed_hours: Option<HourRange>,
    /// Days of the week, 0 = Sunday.
    pub allowed_days: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct IpRestriction {
    pub enabled: bool,
    pub allowed_ips: Vec<String>,
    pub denied_ips: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult, ToSchema)]
#[serde(default)]
pub struct AccessConditions {
    pub allowed_roles: Vec<String>,
    pub denied_roles: Vec<String>,
    pub time_restricted: Option<TimeRestriction>,
    pub ip_restricted: Option<IpRestriction>,
}

/// Subscription gating. `minimum_plan_tier` is descriptive only; the engine
/// checks `requires_feature` against the tenant's plan features.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult, ToSchema)]
#[serde(default)]
pub struct FeatureFlags {
    pub requires_feature: Vec<String>,
    pub minimum_plan_tier: Option<String>,
    pub enabled_for_all: bool,
}

impl FeatureFlags {
    /// Features a tenant must hold, or an empty slice when ungated.
    pub fn required(&self) -> &[String] {
        if self.enabled_for_all {
            &[]
        } else {
            &self.requires_feature
        }
    }
}

/// Field visible only to the listed roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RestrictedField {
    pub field: String,
    pub allowed_roles: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult, ToSchema)]
#[serde(default)]
pub struct DataScope {
    pub filter_by_company: bool,
    pub filter_by_user: bool,
    pub filter_by_department: bool,
    /// JSON object merged into the filter; the string values `$userId`,
    /// `$companyId` and `$departmentId` are replaced with the caller's ids.
    #[schema(value_type = Option<Object>)]
    pub custom_filter: Option<serde_json::Value>,
    pub restricted_fields: Vec<RestrictedField>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(method: &str, path: &str) -> ApiRoute {
        ApiRoute {
            method: method.to_string(),
            path: path.to_string(),
            action: Action::Read,
        }
    }

    #[test]
    fn test_path_params_match_one_segment() {
        let r = route("GET", "/api/employees/:id");
        assert!(r.matches_path("/api/employees/42"));
        assert!(r.matches_path("/api/employees/42/"));
        assert!(!r.matches_path("/api/employees"));
        assert!(!r.matches_path("/api/employees/42/leaves"));

        let braces = route("GET", "/api/employees/{id}/leaves");
        assert!(braces.matches_path("/api/employees/7/leaves?page=2"));
    }

    #[test]
    fn test_wildcard_method() {
        assert!(route("*", "/x").matches_method("DELETE"));
        assert!(route("get", "/x").matches_method("GET"));
        assert!(!route("POST", "/x").matches_method("GET"));
    }

    #[test]
    fn test_enabled_for_all_clears_requirements() {
        let flags = FeatureFlags {
            requires_feature: vec!["payroll".into()],
            minimum_plan_tier: None,
            enabled_for_all: true,
        };
        assert!(flags.required().is_empty());
    }
}
