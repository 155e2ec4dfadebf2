use std::sync::Arc;

use bastion_core::config::UnknownResourcePolicy;
use bastion_core::engine::{Denial, FrozenClock, LocalMoment, RequestContext, StaticPlanFeatures};
use bastion_core::models::Action;
use bastion_core::seed::{self, SeedDocument};
use bastion_core::{App, AppState, Config};

const CATALOG: &str = r#"{
    "resources": [
        { "name": "hrm.employees", "display_name": "Employees", "route": "/hrm/employees",
          "category": "hrm", "available_actions": ["read", "write"],
          "data_scope": { "filter_by_company": true,
                          "restricted_fields": [{ "field": "salary", "allowed_roles": ["hr-admin"] }] } },
        { "name": "super-admin.dashboard", "display_name": "Dashboard", "route": "/super-admin/dashboard",
          "category": "super-admin", "available_actions": ["read"] },
        { "name": "hrm.payroll", "display_name": "Payroll", "route": "/hrm/payroll",
          "category": "hrm", "available_actions": ["read"],
          "feature_flags": { "requires_feature": ["payroll"] } },
        { "name": "hrm.timesheets", "display_name": "Timesheets", "route": "/hrm/timesheets",
          "category": "hrm", "available_actions": ["read"],
          "access_conditions": { "time_restricted": { "enabled": true,
                                                       "allowed_hours": { "start": 9, "end": 17 } } } }
    ],
    "permissions": [
        { "module": "hrm.employees", "display_name": "Employees", "resource": "hrm.employees" },
        { "module": "super-admin.dashboard", "display_name": "Dashboard", "resource": "super-admin.dashboard" },
        { "module": "hrm.payroll", "display_name": "Payroll", "resource": "hrm.payroll" },
        { "module": "hrm.timesheets", "display_name": "Timesheets", "resource": "hrm.timesheets" }
    ],
    "roles": [
        { "name": "super-admin", "display_name": "Super Admin", "type": "system", "level": 1 },
        { "name": "manager", "display_name": "Manager", "level": 50,
          "grants": [
            { "module": "hrm.employees", "actions": { "read": true } },
            { "module": "super-admin.dashboard", "actions": { "read": true } },
            { "module": "hrm.payroll", "actions": { "read": true } },
            { "module": "hrm.timesheets", "actions": { "read": true } }
          ] }
    ]
}"#;

async fn seeded_state() -> AppState {
    let app = App::with_config(Config::for_tests()).await.unwrap();
    let state = app.state().unwrap();
    seed::apply(&state, SeedDocument::from_json(CATALOG).unwrap())
        .await
        .unwrap();
    state
}

async fn manager_id(state: &AppState) -> i32 {
    state.roles.get_by_name("manager").await.unwrap().id
}

fn in_company(company_id: &str) -> RequestContext {
    RequestContext {
        company_id: Some(company_id.to_string()),
        user_id: Some("u-1".to_string()),
        ..Default::default()
    }
}

// ═══ Grants ═══

#[tokio::test]
async fn test_manager_reads_but_cannot_write_employees() {
    let state = seeded_state().await;
    let manager = manager_id(&state).await;
    let ctx = in_company("acme");

    let read = state
        .engine
        .decide(Some(manager), "hrm.employees", Action::Read, &ctx)
        .await
        .unwrap();
    assert!(read.allow);

    let write = state
        .engine
        .decide(Some(manager), "hrm.employees", Action::Write, &ctx)
        .await
        .unwrap();
    assert!(!write.allow);
    assert_eq!(write.denial, Some(Denial::Forbidden));
    assert_eq!(write.into_result().unwrap_err().error_code(), "FORBIDDEN");
}

#[tokio::test]
async fn test_dashboard_ignores_company_context() {
    let state = seeded_state().await;
    let manager = manager_id(&state).await;

    for ctx in [RequestContext::default(), in_company("acme"), in_company("other")] {
        let decision = state
            .engine
            .decide(Some(manager), "super-admin.dashboard", Action::Read, &ctx)
            .await
            .unwrap();
        assert!(decision.allow, "dashboard read should not depend on {ctx:?}");
    }
}

#[tokio::test]
async fn test_unknown_role_is_unauthenticated() {
    let state = seeded_state().await;

    let decision = state
        .engine
        .decide(Some(9999), "hrm.employees", Action::Read, &RequestContext::default())
        .await
        .unwrap();
    assert_eq!(decision.denial, Some(Denial::Unauthenticated));

    let anonymous = state
        .engine
        .decide(None, "hrm.employees", Action::Read, &RequestContext::default())
        .await
        .unwrap();
    assert_eq!(anonymous.denial, Some(Denial::Unauthenticated));
}

#[tokio::test]
async fn test_inactive_role_is_unauthenticated() {
    let state = seeded_state().await;
    let manager = manager_id(&state).await;
    let root = state.roles.get_by_name("super-admin").await.unwrap();
    state.roles.toggle_status(manager, Some(&root)).await.unwrap();

    let decision = state
        .engine
        .decide(Some(manager), "hrm.employees", Action::Read, &RequestContext::default())
        .await
        .unwrap();
    assert_eq!(decision.denial, Some(Denial::Unauthenticated));
}

// ═══ Unknown resources ═══

#[tokio::test]
async fn test_unknown_resource_allowed_by_default() {
    let state = seeded_state().await;
    let manager = manager_id(&state).await;

    let decision = state
        .engine
        .decide(Some(manager), "crm.leads", Action::Delete, &RequestContext::default())
        .await
        .unwrap();
    assert!(decision.allow);
    assert!(decision.resource.is_none());
}

#[tokio::test]
async fn test_unknown_resource_denied_when_configured() {
    let state = seeded_state().await;
    let manager = manager_id(&state).await;
    let engine = (*state.engine)
        .clone()
        .with_unknown_resource_policy(UnknownResourcePolicy::Deny);

    let decision = engine
        .decide(Some(manager), "crm.leads", Action::Read, &RequestContext::default())
        .await
        .unwrap();
    assert_eq!(decision.denial, Some(Denial::Forbidden));
}

#[tokio::test]
async fn test_inactive_resource_treated_as_unknown() {
    let state = seeded_state().await;
    let manager = manager_id(&state).await;
    let employees = state.resources.get_by_name("hrm.employees").await.unwrap();
    state.resources.toggle_status(employees.id).await.unwrap();

    let decision = state
        .engine
        .decide(Some(manager), "hrm.employees", Action::Write, &RequestContext::default())
        .await
        .unwrap();
    assert!(decision.allow);
    assert!(decision.resource.is_none());
}

// ═══ Plan features ═══

#[tokio::test]
async fn test_missing_plan_feature_is_reported() {
    let state = seeded_state().await;
    let manager = manager_id(&state).await;
    let plans = StaticPlanFeatures::new()
        .with_company("acme", ["payroll", "recruitment"])
        .with_company("basic", ["recruitment"]);
    let engine = (*state.engine).clone().with_plan_features(Arc::new(plans));

    let allowed = engine
        .decide(Some(manager), "hrm.payroll", Action::Read, &in_company("acme"))
        .await
        .unwrap();
    assert!(allowed.allow);

    let denied = engine
        .decide(Some(manager), "hrm.payroll", Action::Read, &in_company("basic"))
        .await
        .unwrap();
    assert_eq!(denied.denial, Some(Denial::FeatureRequired));
    assert_eq!(denied.missing_features, vec!["payroll".to_string()]);

    let err = denied.into_result().unwrap_err();
    assert_eq!(err.status_code(), axum::http::StatusCode::PAYMENT_REQUIRED);
}

#[tokio::test]
async fn test_company_without_plan_lacks_every_feature() {
    let state = seeded_state().await;
    let manager = manager_id(&state).await;
    let engine = (*state.engine)
        .clone()
        .with_plan_features(Arc::new(StaticPlanFeatures::new()));

    let decision = engine
        .decide(Some(manager), "hrm.payroll", Action::Read, &in_company("ghost"))
        .await
        .unwrap();
    assert_eq!(decision.denial, Some(Denial::FeatureRequired));
}

#[tokio::test]
async fn test_feature_check_skipped_without_plan_service() {
    let state = seeded_state().await;
    let manager = manager_id(&state).await;

    let decision = state
        .engine
        .decide(Some(manager), "hrm.payroll", Action::Read, &in_company("basic"))
        .await
        .unwrap();
    assert!(decision.allow);
}

// ═══ Conditions ═══

#[tokio::test]
async fn test_time_restriction_denies_after_hours() {
    let state = seeded_state().await;
    let manager = manager_id(&state).await;
    let evening = FrozenClock(LocalMoment { hour: 20, weekday: 3 });
    let engine = (*state.engine).clone().with_clock(Arc::new(evening));

    let decision = engine
        .decide(Some(manager), "hrm.timesheets", Action::Read, &RequestContext::default())
        .await
        .unwrap();
    assert_eq!(decision.denial, Some(Denial::Forbidden));

    let morning = FrozenClock(LocalMoment { hour: 9, weekday: 3 });
    let engine = engine.with_clock(Arc::new(morning));
    let decision = engine
        .decide(Some(manager), "hrm.timesheets", Action::Read, &RequestContext::default())
        .await
        .unwrap();
    assert!(decision.allow);
}

// ═══ Data scope ═══

#[tokio::test]
async fn test_allowed_decision_carries_data_filter() {
    let state = seeded_state().await;
    let manager = manager_id(&state).await;

    let decision = state
        .engine
        .decide(Some(manager), "hrm.employees", Action::Read, &in_company("acme"))
        .await
        .unwrap();
    let filter = decision.data_filter.unwrap();
    assert_eq!(filter.conditions["company_id"], "acme");
    assert_eq!(filter.hidden_fields, vec!["salary".to_string()]);
}

// ═══ Route resolution ═══

#[tokio::test]
async fn test_resolve_infers_action_from_route() {
    let state = seeded_state().await;
    state
        .resources
        .create(
            serde_json::from_value(serde_json::json!({
                "name": "hrm.leaves",
                "display_name": "Leaves",
                "route": "/hrm/leaves",
                "category": "hrm",
                "available_actions": ["read", "approve"],
                "api_routes": [
                    { "method": "GET", "path": "/api/leaves", "action": "read" },
                    { "method": "POST", "path": "/api/leaves/:id/approve", "action": "approve" }
                ]
            }))
            .unwrap(),
        )
        .await
        .unwrap();

    let (resource, action) = state
        .engine
        .resolve("POST", "/api/leaves/17/approve")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resource.name, "hrm.leaves");
    assert_eq!(action, Action::Approve);

    assert!(state.engine.resolve("GET", "/api/unknown").await.unwrap().is_none());
}
