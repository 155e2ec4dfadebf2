//! Access decision engine.
//!
//! [`AccessEngine::decide`] runs the checks in a fixed order and stops at the
//! first denial:
//!
//! 1. resolve the resource (absent or inactive: apply [`UnknownResourcePolicy`])
//! 2. resolve the role (absent or unusable: `UNAUTHENTICATED`)
//! 3. check the role's grant (`FORBIDDEN`)
//! 4. check the tenant's plan features (`FEATURE_REQUIRED`, fails open)
//! 5. evaluate access conditions (`FORBIDDEN`)
//! 6. build the caller's [`DataFilter`]

pub mod conditions;
pub mod features;
pub mod scope;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use utoipa::ToSchema;

use crate::catalog::ResourceCatalog;
use crate::config::{Config, UnknownResourcePolicy};
use crate::error::BastionError;
use crate::grants::GrantStore;
use crate::models::resource;
use crate::models::Action;
use crate::roles::RoleRegistry;

pub use conditions::{Clock, FrozenClock, LocalMoment, OffsetClock, SystemClock};
pub use features::{HttpPlanFeatures, PlanFeatures, StaticPlanFeatures};
pub use scope::DataFilter;

/// Caller identity facts the engine evaluates against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: Option<String>,
    pub company_id: Option<String>,
    pub department_id: Option<String>,
    pub ip: Option<IpAddr>,
}

/// Why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Denial {
    Unauthenticated,
    Forbidden,
    FeatureRequired,
}

/// Outcome of one access decision.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Decision {
    pub allow: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denial: Option<Denial>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_features: Vec<String>,
    /// Name of the catalog resource the decision was made for, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_filter: Option<DataFilter>,
}

impl Decision {
    fn allowed(resource: Option<String>, action: Action, data_filter: Option<DataFilter>) -> Self {
        Self {
            allow: true,
            denial: None,
            reason: None,
            missing_features: Vec::new(),
            resource,
            action,
            data_filter,
        }
    }

    fn denied(resource: Option<String>, action: Action, denial: Denial, reason: String) -> Self {
        Self {
            allow: false,
            denial: Some(denial),
            reason: Some(reason),
            missing_features: Vec::new(),
            resource,
            action,
            data_filter: None,
        }
    }

    /// The decision as a result: allowed decisions pass through, denials
    /// become the matching [`BastionError`].
    pub fn into_result(self) -> Result<Decision, BastionError> {
        let reason = self.reason.clone().unwrap_or_default();
        match self.denial {
            None => Ok(self),
            Some(Denial::Unauthenticated) => Err(BastionError::Unauthenticated(reason)),
            Some(Denial::Forbidden) => Err(BastionError::Forbidden(reason)),
            Some(Denial::FeatureRequired) => Err(BastionError::FeatureRequired {
                message: reason,
                missing: self.missing_features,
            }),
        }
    }
}

/// Resolves resources and roles and decides whether a caller may act.
#[derive(Clone)]
pub struct AccessEngine {
    resources: ResourceCatalog,
    roles: RoleRegistry,
    grants: GrantStore,
    plan_features: Option<Arc<dyn PlanFeatures>>,
    clock: Arc<dyn Clock>,
    unknown_resource: UnknownResourcePolicy,
    feature_timeout: Duration,
}

impl AccessEngine {
    pub fn new(resources: ResourceCatalog, roles: RoleRegistry, grants: GrantStore) -> Self {
        Self {
            resources,
            roles,
            grants,
            plan_features: None,
            clock: Arc::new(SystemClock),
            unknown_resource: UnknownResourcePolicy::default(),
            feature_timeout: Duration::from_secs(2),
        }
    }

    /// Wire the engine from configuration: plan service, clock zone, unknown
    /// resource policy and lookup timeout.
    pub fn from_config(
        config: &Config,
        resources: ResourceCatalog,
        roles: RoleRegistry,
        grants: GrantStore,
    ) -> Result<Self, BastionError> {
        let mut engine = Self::new(resources, roles, grants)
            .with_unknown_resource_policy(config.unknown_resource_policy)
            .with_feature_timeout(config.feature_lookup_timeout());

        if let Some(url) = &config.plan_service_url {
            let plans = HttpPlanFeatures::new(url, config.feature_lookup_timeout())?;
            engine = engine.with_plan_features(Arc::new(plans));
        }
        if let Some(minutes) = config.access_tz_offset_minutes {
            let clock = OffsetClock::from_minutes(minutes).ok_or_else(|| {
                BastionError::Internal(format!("invalid ACCESS_TZ_OFFSET_MINUTES: {minutes}"))
            })?;
            engine = engine.with_clock(Arc::new(clock));
        }
        Ok(engine)
    }

    pub fn with_plan_features(mut self, plans: Arc<dyn PlanFeatures>) -> Self {
        self.plan_features = Some(plans);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_unknown_resource_policy(mut self, policy: UnknownResourcePolicy) -> Self {
        self.unknown_resource = policy;
        self
    }

    pub fn with_feature_timeout(mut self, timeout: Duration) -> Self {
        self.feature_timeout = timeout;
        self
    }

    /// Find the active resource declaring an API route for `(method, path)`
    /// and the action the request needs on it.
    pub async fn resolve(
        &self,
        method: &str,
        path: &str,
    ) -> Result<Option<(resource::Model, Action)>, BastionError> {
        let resource = self.resources.find_by_api_route(method, path).await?;
        Ok(resource.map(|r| {
            let action = infer_action(&r, method, path);
            (r, action)
        }))
    }

    /// Decide whether `role_id` may perform `action` on the resource named
    /// `key`.
    pub async fn decide(
        &self,
        role_id: Option<i32>,
        key: &str,
        action: Action,
        ctx: &RequestContext,
    ) -> Result<Decision, BastionError> {
        match self.resources.find_active(key).await? {
            Some(resource) => self.decide_for(&resource, role_id, action, ctx).await,
            None => {
                let decision = self.unknown_resource_decision(key, action);
                log_decision(key, role_id, &decision);
                Ok(decision)
            }
        }
    }

    /// [`decide`](Self::decide) for an already-resolved resource.
    pub async fn decide_for(
        &self,
        resource: &resource::Model,
        role_id: Option<i32>,
        action: Action,
        ctx: &RequestContext,
    ) -> Result<Decision, BastionError> {
        let decision = self.evaluate(resource, role_id, action, ctx).await?;
        log_decision(&resource.name, role_id, &decision);
        Ok(decision)
    }

    async fn evaluate(
        &self,
        resource: &resource::Model,
        role_id: Option<i32>,
        action: Action,
        ctx: &RequestContext,
    ) -> Result<Decision, BastionError> {
        let name = Some(resource.name.clone());

        let role = match role_id {
            Some(id) => self.roles.find_usable(id).await?,
            None => None,
        };
        let Some(role) = role else {
            return Ok(Decision::denied(
                name,
                action,
                Denial::Unauthenticated,
                "User role not found. Please log in again.".to_string(),
            ));
        };

        if !self.grants.check_loaded(&role, &resource.name, action).await? {
            return Ok(Decision::denied(
                name,
                action,
                Denial::Forbidden,
                format!("You don't have '{action}' permission for this resource"),
            ));
        }

        let missing = self.missing_plan_features(resource, ctx).await;
        if !missing.is_empty() {
            let mut decision = Decision::denied(
                name,
                action,
                Denial::FeatureRequired,
                "This feature requires a plan upgrade".to_string(),
            );
            decision.missing_features = missing;
            return Ok(decision);
        }

        if let Some(conditions) = &resource.access_conditions {
            if let Err(reason) =
                conditions::evaluate(conditions, &role.name, ctx.ip, self.clock.now())
            {
                return Ok(Decision::denied(name, action, Denial::Forbidden, reason));
            }
        }

        let filter = scope::build(resource.data_scope.as_ref(), &role.name, ctx);
        Ok(Decision::allowed(name, action, Some(filter)))
    }

    fn unknown_resource_decision(&self, key: &str, action: Action) -> Decision {
        match self.unknown_resource {
            UnknownResourcePolicy::Allow => {
                tracing::warn!(resource = %key, "resource not in catalog, allowing");
                Decision::allowed(None, action, None)
            }
            UnknownResourcePolicy::Deny => Decision::denied(
                None,
                action,
                Denial::Forbidden,
                format!("Resource '{key}' is not registered"),
            ),
        }
    }

    /// Required features the caller's company lacks. Lookup failures and
    /// timeouts allow the request.
    async fn missing_plan_features(
        &self,
        resource: &resource::Model,
        ctx: &RequestContext,
    ) -> Vec<String> {
        let required = resource
            .feature_flags
            .as_ref()
            .map(|f| f.required())
            .unwrap_or_default();
        if required.is_empty() {
            return Vec::new();
        }
        let Some(company_id) = ctx.company_id.as_deref() else {
            return Vec::new();
        };
        let Some(plans) = &self.plan_features else {
            tracing::debug!(resource = %resource.name, "no plan service configured, skipping feature check");
            return Vec::new();
        };

        match tokio::time::timeout(self.feature_timeout, plans.plan_features(company_id)).await {
            Ok(Ok(plan)) => features::missing_features(required, plan.as_deref()),
            Ok(Err(e)) => {
                tracing::warn!(resource = %resource.name, company_id, error = %e, "plan feature lookup failed, allowing");
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(resource = %resource.name, company_id, "plan feature lookup timed out, allowing");
                Vec::new()
            }
        }
    }
}

/// Action a request needs on `resource`. A declared API route matching both
/// method and path wins, then one matching the method alone, then the
/// method's default action.
pub fn infer_action(resource: &resource::Model, method: &str, path: &str) -> Action {
    let routes = &resource.api_routes.0;
    routes
        .iter()
        .find(|r| r.matches_method(method) && r.matches_path(path))
        .or_else(|| routes.iter().find(|r| r.matches_method(method)))
        .map(|r| r.action)
        .unwrap_or_else(|| Action::from_method(method))
}

fn log_decision(resource: &str, role_id: Option<i32>, decision: &Decision) {
    tracing::debug!(
        resource,
        role_id,
        action = %decision.action,
        allow = decision.allow,
        reason = decision.reason.as_deref().unwrap_or(""),
        "access decision"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::policy::{ApiRoute, ApiRoutes};
    use crate::models::ActionList;
    use chrono::NaiveDateTime;

    fn resource_with_routes(routes: Vec<ApiRoute>) -> resource::Model {
        let at = NaiveDateTime::default();
        resource::Model {
            id: 1,
            name: "hrm.employees".into(),
            display_name: "Employees".into(),
            description: None,
            route: "/hrm/employees".into(),
            icon: None,
            category: None,
            parent_id: None,
            sort_order: 0,
            available_actions: ActionList(vec![Action::Read, Action::Export]),
            api_routes: ApiRoutes(routes),
            access_conditions: None,
            feature_flags: None,
            data_scope: None,
            is_system: false,
            is_active: true,
            created_at: at,
            updated_at: at,
        }
    }

    fn route(method: &str, path: &str, action: Action) -> ApiRoute {
        ApiRoute {
            method: method.into(),
            path: path.into(),
            action,
        }
    }

    #[test]
    fn test_infer_action_defaults_to_method_table() {
        let r = resource_with_routes(vec![]);
        assert_eq!(infer_action(&r, "GET", "/api/x"), Action::Read);
        assert_eq!(infer_action(&r, "POST", "/api/x"), Action::Create);
        assert_eq!(infer_action(&r, "PATCH", "/api/x"), Action::Write);
        assert_eq!(infer_action(&r, "DELETE", "/api/x"), Action::Delete);
    }

    #[test]
    fn test_infer_action_prefers_exact_route() {
        let r = resource_with_routes(vec![
            route("GET", "/api/employees", Action::Read),
            route("GET", "/api/employees/export", Action::Export),
            route("*", "/api/employees/:id/approve", Action::Approve),
        ]);
        assert_eq!(infer_action(&r, "GET", "/api/employees/export"), Action::Export);
        assert_eq!(infer_action(&r, "GET", "/api/employees"), Action::Read);
        assert_eq!(infer_action(&r, "POST", "/api/employees/7/approve"), Action::Approve);
        // Method-only match falls back to the first route for that method.
        assert_eq!(infer_action(&r, "GET", "/api/employees/7"), Action::Read);
    }

    #[test]
    fn test_denial_maps_to_error() {
        let d = Decision::denied(None, Action::Read, Denial::Forbidden, "no".into());
        assert_eq!(d.into_result().unwrap_err().error_code(), "FORBIDDEN");

        let mut d = Decision::denied(None, Action::Read, Denial::FeatureRequired, "pay".into());
        d.missing_features = vec!["payroll".into()];
        match d.into_result() {
            Err(BastionError::FeatureRequired { missing, .. }) => assert_eq!(missing, vec!["payroll"]),
            other => panic!("unexpected {other:?}"),
        }

        let ok = Decision::allowed(None, Action::Read, None);
        assert!(ok.into_result().is_ok());
    }
}
