use std::sync::Arc;

use bastion_core::engine::StaticPlanFeatures;
use bastion_core::models::Action;
use bastion_core::testing::TestOptions;
use bastion_core::TestApp;
use serde_json::json;

const CATALOG: &str = r#"{
    "resources": [
        { "name": "rbac.stats", "display_name": "RBAC statistics", "route": "/rbac/stats",
          "category": "users-permissions", "available_actions": ["read"],
          "api_routes": [{ "method": "GET", "path": "/api/rbac/resources/stats", "action": "read" }] },
        { "name": "rbac.grouped", "display_name": "Grouped permissions", "route": "/rbac/grouped",
          "category": "users-permissions", "available_actions": ["read"],
          "api_routes": [{ "method": "GET", "path": "/api/rbac/permissions/grouped", "action": "read" }],
          "feature_flags": { "requires_feature": ["advanced-rbac"] } },
        { "name": "core.settings", "display_name": "Settings", "route": "/settings",
          "category": "super-admin", "available_actions": ["read"], "is_system": true }
    ],
    "permissions": [
        { "module": "rbac.stats", "display_name": "RBAC statistics", "resource": "rbac.stats" },
        { "module": "rbac.grouped", "display_name": "Grouped permissions", "resource": "rbac.grouped" }
    ],
    "roles": [
        { "name": "manager", "display_name": "Manager", "level": 50,
          "grants": [{ "module": "rbac.grouped", "actions": { "read": true } }] },
        { "name": "auditor", "display_name": "Auditor", "type": "system", "level": 8 }
    ]
}"#;

async fn seeded(app: &TestApp) -> (i32, i32) {
    app.seed(CATALOG).await;
    let root = app.root_role().await;
    let manager = app.state.roles.get_by_name("manager").await.unwrap();
    (root.id, manager.id)
}

// ═══ Public endpoints ═══

#[tokio::test]
async fn test_welcome_and_health() {
    let app = TestApp::new().await;

    let res = app.client.get(&app.url("/")).await;
    assert_eq!(res.status, 200);
    assert!(res.json().get("message").is_some());

    let res = app.client.get(&app.url("/health")).await;
    assert_eq!(res.status, 200);
    assert_eq!(res.data()["status"], "ok");
}

#[tokio::test]
async fn test_openapi_json_lists_rbac_paths() {
    let app = TestApp::new().await;
    let res = app.client.get(&app.url("/api-docs/openapi.json")).await;
    assert_eq!(res.status, 200);
    let paths = &res.json()["paths"];
    assert!(paths.get("/api/rbac/roles").is_some());
    assert!(paths.get("/api/rbac/access/decide").is_some());
}

// ═══ Identity ═══

#[tokio::test]
async fn test_missing_role_is_unauthenticated() {
    let app = TestApp::new().await;
    let res = app.client.get(&app.url("/api/rbac/roles")).await;
    assert_eq!(res.status, 401);
    assert!(!res.is_success());
    assert_eq!(res.error_code(), "UNAUTHENTICATED");
}

#[tokio::test]
async fn test_list_roles_as_root() {
    let app = TestApp::new().await;
    let (root, _) = seeded(&app).await;

    let res = app.client.as_role(root).get(&app.url("/api/rbac/roles")).await;
    assert_eq!(res.status, 200);
    let names: Vec<String> = res
        .data()
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["super-admin", "auditor", "manager"]);
}

// ═══ Catalog CRUD ═══

#[tokio::test]
async fn test_create_resource_and_reject_duplicate() {
    let app = TestApp::new().await;
    let (root, _) = seeded(&app).await;
    let client = app.client.as_role(root);

    let body = json!({
        "name": "HRM.Employees",
        "display_name": "Employees",
        "route": "/hrm/employees",
        "category": "hrm",
        "available_actions": ["read", "write"]
    });
    let res = client.post(&app.url("/api/rbac/resources"), &body.to_string()).await;
    assert_eq!(res.status, 201);
    assert_eq!(res.data()["name"], "hrm.employees");

    let res = client.post(&app.url("/api/rbac/resources"), &body.to_string()).await;
    assert_eq!(res.status, 409);
    assert_eq!(res.error_code(), "DUPLICATE");
}

#[tokio::test]
async fn test_invalid_json_body() {
    let app = TestApp::new().await;
    let (root, _) = seeded(&app).await;

    let res = app
        .client
        .as_role(root)
        .post(&app.url("/api/rbac/resources"), "not valid json at all")
        .await;
    assert_eq!(res.status, 422);
    assert!(!res.is_success());
}

#[tokio::test]
async fn test_system_resource_delete_is_protected() {
    let app = TestApp::new().await;
    let (root, _) = seeded(&app).await;
    let client = app.client.as_role(root);
    let settings = app.state.resources.get_by_name("core.settings").await.unwrap();

    let res = client
        .delete(&app.url(&format!("/api/rbac/resources/{}", settings.id)))
        .await;
    assert_eq!(res.status, 409);
    assert_eq!(res.error_code(), "SYSTEM_PROTECTED");

    let res = client
        .get(&app.url(&format!("/api/rbac/resources/{}", settings.id)))
        .await;
    assert_eq!(res.status, 200);
    assert_eq!(res.data()["name"], "core.settings");
    assert_eq!(res.data()["is_active"], true);
}

#[tokio::test]
async fn test_system_role_delete_is_protected() {
    let app = TestApp::new().await;
    let (root, _) = seeded(&app).await;
    let auditor = app.state.roles.get_by_name("auditor").await.unwrap();

    let res = app
        .client
        .as_role(root)
        .delete(&app.url(&format!("/api/rbac/roles/{}", auditor.id)))
        .await;
    assert_eq!(res.status, 409);
    assert_eq!(res.error_code(), "SYSTEM_PROTECTED");
    assert!(app.state.roles.get(auditor.id).await.is_ok());
}

#[tokio::test]
async fn test_create_role_above_own_level_is_forbidden() {
    let app = TestApp::new().await;
    let (_, manager) = seeded(&app).await;
    let client = app.client.as_role(manager);

    let res = client
        .post(
            &app.url("/api/rbac/roles"),
            &json!({ "name": "director", "display_name": "Director", "level": 20 }).to_string(),
        )
        .await;
    assert_eq!(res.status, 403);
    assert_eq!(res.error_code(), "FORBIDDEN");

    let res = client
        .post(
            &app.url("/api/rbac/roles"),
            &json!({ "name": "clerk", "display_name": "Clerk", "level": 80 }).to_string(),
        )
        .await;
    assert_eq!(res.status, 201);
    assert_eq!(res.data()["updated_by"], "manager");
}

#[tokio::test]
async fn test_update_cannot_deactivate_system_resource() {
    let app = TestApp::new().await;
    let (root, _) = seeded(&app).await;
    let client = app.client.as_role(root);
    let settings = app.state.resources.get_by_name("core.settings").await.unwrap();
    let url = app.url(&format!("/api/rbac/resources/{}", settings.id));

    let res = client.patch(&app.url(&format!("/api/rbac/resources/{}/toggle-status", settings.id)), "").await;
    assert_eq!(res.status, 409);
    assert_eq!(res.error_code(), "SYSTEM_PROTECTED");

    let res = client.put(&url, &json!({ "is_active": false }).to_string()).await;
    assert_eq!(res.status, 409);
    assert_eq!(res.error_code(), "SYSTEM_PROTECTED");

    let res = client.get(&url).await;
    assert_eq!(res.data()["is_active"], true);
}

#[tokio::test]
async fn test_role_changes_require_outranking_the_role() {
    let app = TestApp::new().await;
    let (root, manager) = seeded(&app).await;
    let client = app.client.as_role(manager);

    let res = client
        .post(
            &app.url("/api/rbac/roles"),
            &json!({ "name": "clerk", "display_name": "Clerk", "level": 80 }).to_string(),
        )
        .await;
    assert_eq!(res.status, 201);
    let clerk = res.data()["id"].as_i64().unwrap();

    for target in [i64::from(root), i64::from(manager)] {
        let url = app.url(&format!("/api/rbac/roles/{target}"));
        let res = client.put(&url, &json!({ "display_name": "Renamed" }).to_string()).await;
        assert_eq!(res.status, 403, "update role {target}");
        assert_eq!(res.error_code(), "FORBIDDEN");

        let res = client.patch(&app.url(&format!("/api/rbac/roles/{target}/toggle-status")), "").await;
        assert_eq!(res.status, 403, "toggle role {target}");

        let res = client.delete(&url).await;
        assert_eq!(res.status, 403, "delete role {target}");
    }
    assert!(app.state.roles.get(manager).await.unwrap().is_active);

    let res = client
        .patch(&app.url(&format!("/api/rbac/roles/{clerk}/toggle-status")), "")
        .await;
    assert_eq!(res.status, 200);
    assert_eq!(res.data()["is_active"], false);
    assert_eq!(res.data()["updated_by"], "manager");

    let res = client.delete(&app.url(&format!("/api/rbac/roles/{clerk}"))).await;
    assert_eq!(res.status, 200);
}

// ═══ Grants ═══

#[tokio::test]
async fn test_grant_writes_require_outranking_the_role() {
    let app = TestApp::new().await;
    let (root, manager) = seeded(&app).await;
    let client = app.client.as_role(manager);
    let stats = app.state.permissions.find_by_key("rbac.stats").await.unwrap().unwrap();
    let grouped = app.state.permissions.find_by_key("rbac.grouped").await.unwrap().unwrap();
    let everything = json!({ "permissions": [{ "permission_id": stats.id, "actions": { "all": true } }] });

    let res = client.get(&app.url("/api/rbac/resources/stats")).await;
    assert_eq!(res.status, 403);

    // Own role.
    let res = client
        .put(&app.url(&format!("/api/rbac/roles/{manager}/permissions")), &everything.to_string())
        .await;
    assert_eq!(res.status, 403);
    assert_eq!(res.error_code(), "FORBIDDEN");
    let res = client
        .patch(
            &app.url(&format!("/api/rbac/roles/{manager}/permissions/{}", grouped.id)),
            &json!({ "actions": { "all": true } }).to_string(),
        )
        .await;
    assert_eq!(res.status, 403);

    let res = client.get(&app.url("/api/rbac/resources/stats")).await;
    assert_eq!(res.status, 403);

    // A more privileged role.
    let res = client
        .put(
            &app.url(&format!("/api/rbac/roles/{root}/permissions")),
            &json!({ "permissions": [] }).to_string(),
        )
        .await;
    assert_eq!(res.status, 403);

    // Nothing changed underneath.
    assert!(!app.state.grants.check_grant(manager, "rbac.stats", Action::Read).await.unwrap());
    assert!(app.state.grants.check_grant(manager, "rbac.grouped", Action::Read).await.unwrap());

    // A lower role is fine.
    let res = client
        .post(
            &app.url("/api/rbac/roles"),
            &json!({ "name": "clerk", "display_name": "Clerk", "level": 80 }).to_string(),
        )
        .await;
    let clerk = res.data()["id"].as_i64().unwrap();
    let res = client
        .put(&app.url(&format!("/api/rbac/roles/{clerk}/permissions")), &everything.to_string())
        .await;
    assert_eq!(res.status, 200);
    assert_eq!(res.data()["total_permissions"], 1);

    // Unknown role ids are rejected before any write.
    let res = app
        .client
        .as_role(root)
        .put(&app.url("/api/rbac/roles/4242/permissions"), &everything.to_string())
        .await;
    assert_eq!(res.status, 404);
}

#[tokio::test]
async fn test_set_and_check_role_permissions() {
    let app = TestApp::new().await;
    let (root, manager) = seeded(&app).await;
    let client = app.client.as_role(root).as_user("u-admin");
    let stats = app.state.permissions.find_by_key("rbac.stats").await.unwrap().unwrap();

    let res = client
        .put(
            &app.url(&format!("/api/rbac/roles/{manager}/permissions")),
            &json!({ "permissions": [{ "permission_id": stats.id, "actions": { "all": true } }] })
                .to_string(),
        )
        .await;
    assert_eq!(res.status, 200);
    assert_eq!(res.data()["total_permissions"], 1);

    let res = client
        .get(&app.url(&format!("/api/rbac/roles/{manager}/permissions")))
        .await;
    let grant = &res.data()["grants"]["rbac.stats"];
    assert_eq!(grant["actions"]["export"], true);
    assert_eq!(grant["actions"]["approve"], false);

    let res = client
        .get(&app.url(&format!(
            "/api/rbac/roles/{manager}/check-permission?module=rbac.stats&action=approve"
        )))
        .await;
    assert_eq!(res.status, 200);
    assert_eq!(res.data()["has_permission"], false);
}

// ═══ Route access ═══

#[tokio::test]
async fn test_route_access_requires_grant() {
    let app = TestApp::new().await;
    let (root, manager) = seeded(&app).await;

    // Root holds no grant on the stats resource either.
    let res = app
        .client
        .as_role(root)
        .get(&app.url("/api/rbac/resources/stats"))
        .await;
    assert_eq!(res.status, 403);

    let res = app
        .client
        .as_role(manager)
        .get(&app.url("/api/rbac/resources/stats"))
        .await;
    assert_eq!(res.status, 403);
    assert_eq!(res.error_code(), "FORBIDDEN");

    let res = app
        .client
        .as_role(999)
        .get(&app.url("/api/rbac/resources/stats"))
        .await;
    assert_eq!(res.status, 401);

    // Routes no resource declares pass through.
    let res = app.client.as_role(manager).get(&app.url("/api/rbac/resources")).await;
    assert_eq!(res.status, 200);
}

#[tokio::test]
async fn test_route_access_checks_plan_features() {
    let plans = StaticPlanFeatures::new()
        .with_company("basic", ["recruitment"])
        .with_company("pro", ["recruitment", "advanced-rbac"]);
    let app = TestApp::with_options(TestOptions {
        plan_features: Some(Arc::new(plans)),
        ..Default::default()
    })
    .await;
    let (_, manager) = seeded(&app).await;
    let url = app.url("/api/rbac/permissions/grouped");

    let res = app.client.as_role(manager).in_company("basic").get(&url).await;
    assert_eq!(res.status, 402);
    assert_eq!(res.error_code(), "FEATURE_REQUIRED");
    assert_eq!(res.error()["missing_features"], json!(["advanced-rbac"]));

    let res = app.client.as_role(manager).in_company("pro").get(&url).await;
    assert_eq!(res.status, 200);
}

// ═══ Explicit decisions ═══

#[tokio::test]
async fn test_decide_endpoint_returns_denials_as_data() {
    let app = TestApp::new().await;
    let (root, manager) = seeded(&app).await;

    let res = app
        .client
        .as_role(root)
        .post(
            &app.url("/api/rbac/access/decide"),
            &json!({ "role_id": manager, "resource": "rbac.grouped", "action": "write" }).to_string(),
        )
        .await;
    assert_eq!(res.status, 200);
    let decision = res.data();
    assert_eq!(decision["allow"], false);
    assert_eq!(decision["denial"], "FORBIDDEN");

    let res = app
        .client
        .as_role(root)
        .post(
            &app.url("/api/rbac/access/decide"),
            &json!({ "role_id": manager, "resource": "rbac.grouped", "action": "read" }).to_string(),
        )
        .await;
    assert_eq!(res.data()["allow"], true);
}
