use bastion_core::grants::GrantInput;
use bastion_core::guard::{can_assign_role, can_create_role_with_level};
use bastion_core::models::{role, Action, ActionFlags, RoleType};
use bastion_core::roles::{CloneRole, NewRole, RoleUpdate};
use bastion_core::{App, AppState, Config};

async fn state() -> AppState {
    let app = App::with_config(Config::for_tests()).await.unwrap();
    app.state().unwrap()
}

fn new_role(name: &str, level: i32, role_type: RoleType) -> NewRole {
    NewRole {
        name: name.to_string(),
        display_name: name.to_string(),
        description: None,
        role_type,
        level,
        is_default: false,
    }
}

/// Root, an admin at level 5 and a manager at level 50.
async fn hierarchy(state: &AppState) -> (role::Model, role::Model, role::Model) {
    let root = state
        .roles
        .create(new_role("super-admin", 1, RoleType::System), None)
        .await;
    // Nobody may create the first root through the guard.
    assert_eq!(root.unwrap_err().error_code(), "FORBIDDEN");

    let seeded = bastion_core::seed::SeedDocument::from_json(
        r#"{ "roles": [
            { "name": "super-admin", "display_name": "Super Admin", "type": "system", "level": 1 }
        ] }"#,
    )
    .unwrap();
    bastion_core::seed::apply(state, seeded).await.unwrap();
    let root = state.roles.get_by_name("super-admin").await.unwrap();

    let admin = state
        .roles
        .create(new_role("admin", 5, RoleType::System), Some(&root))
        .await
        .unwrap();
    let manager = state
        .roles
        .create(new_role("manager", 50, RoleType::Custom), Some(&root))
        .await
        .unwrap();
    (root, admin, manager)
}

// ═══ Guard ═══

#[tokio::test]
async fn test_guard_rules_over_levels() {
    let state = state().await;
    let (root, admin, manager) = hierarchy(&state).await;

    for level in 1..=100 {
        assert!(can_create_role_with_level(Some(&root), level));
        assert_eq!(
            can_create_role_with_level(Some(&manager), level),
            level > 10 && level >= 50,
            "manager creating level {level}"
        );
        assert_eq!(
            can_create_role_with_level(Some(&admin), level),
            level > 10,
            "admin creating level {level}"
        );
    }
    assert!(!can_create_role_with_level(None, 100));

    // A system-level admin may not hand out system-level roles.
    assert!(!can_assign_role(Some(&admin), Some(&admin)));
    assert!(can_assign_role(Some(&admin), Some(&manager)));
    assert!(can_assign_role(Some(&root), Some(&admin)));
    assert!(!can_assign_role(Some(&manager), Some(&admin)));
    assert!(!can_assign_role(Some(&manager), None));
}

#[tokio::test]
async fn test_create_above_own_level_is_forbidden() {
    let state = state().await;
    let (_, _, manager) = hierarchy(&state).await;

    let err = state
        .roles
        .create(new_role("director", 30, RoleType::Custom), Some(&manager))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "FORBIDDEN");

    let clerk = state
        .roles
        .create(new_role("Clerk", 70, RoleType::Custom), Some(&manager))
        .await
        .unwrap();
    assert_eq!(clerk.name, "clerk");
}

#[tokio::test]
async fn test_second_root_is_rejected() {
    let state = state().await;
    let (root, _, _) = hierarchy(&state).await;

    let err = state
        .roles
        .create(new_role("other-root", 1, RoleType::System), Some(&root))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "DUPLICATE");
}

#[tokio::test]
async fn test_duplicate_name_is_rejected() {
    let state = state().await;
    let (root, _, _) = hierarchy(&state).await;

    let err = state
        .roles
        .create(new_role("Manager", 60, RoleType::Custom), Some(&root))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "DUPLICATE");
}

// ═══ System protection ═══

#[tokio::test]
async fn test_system_role_delete_is_protected() {
    let state = state().await;
    let (root, admin, _) = hierarchy(&state).await;

    let err = state.roles.delete(admin.id, Some(&root)).await.unwrap_err();
    assert_eq!(err.error_code(), "SYSTEM_PROTECTED");

    let unchanged = state.roles.get(admin.id).await.unwrap();
    assert!(unchanged.is_active);
    assert!(!unchanged.is_deleted);
    assert_eq!(unchanged.name, admin.name);
    assert_eq!(unchanged.level, admin.level);
}

#[tokio::test]
async fn test_system_role_level_and_type_are_fixed() {
    let state = state().await;
    let (root, admin, _) = hierarchy(&state).await;

    let level = state
        .roles
        .update(admin.id, RoleUpdate { level: Some(6), ..Default::default() }, Some(&root))
        .await
        .unwrap_err();
    assert_eq!(level.error_code(), "SYSTEM_PROTECTED");

    let kind = state
        .roles
        .update(
            admin.id,
            RoleUpdate { role_type: Some(RoleType::Custom), ..Default::default() },
            Some(&root),
        )
        .await
        .unwrap_err();
    assert_eq!(kind.error_code(), "SYSTEM_PROTECTED");

    let err = state.roles.toggle_status(admin.id, Some(&root)).await.unwrap_err();
    assert_eq!(err.error_code(), "SYSTEM_PROTECTED");
}

#[tokio::test]
async fn test_custom_role_soft_delete() {
    let state = state().await;
    let (root, _, manager) = hierarchy(&state).await;

    state.roles.delete(manager.id, Some(&root)).await.unwrap();
    assert_eq!(state.roles.get(manager.id).await.unwrap_err().error_code(), "NOT_FOUND");

    let listed = state
        .roles
        .list(&bastion_core::roles::RoleFilter {
            is_active: Some(false),
            include_deleted: true,
            ..Default::default()
        })
        .await
        .unwrap();
    let deleted = listed.iter().find(|r| r.id == manager.id).unwrap();
    assert!(deleted.is_deleted);
    assert!(deleted.deleted_at.is_some());
}

#[tokio::test]
async fn test_changes_require_outranking_the_role() {
    let state = state().await;
    let (root, admin, manager) = hierarchy(&state).await;
    let rename = || RoleUpdate { display_name: Some("Renamed".into()), ..Default::default() };

    for target in [&root, &admin, &manager] {
        let err = state.roles.update(target.id, rename(), Some(&manager)).await.unwrap_err();
        assert_eq!(err.error_code(), "FORBIDDEN", "update {}", target.name);
        let err = state.roles.toggle_status(target.id, Some(&manager)).await.unwrap_err();
        assert_eq!(err.error_code(), "FORBIDDEN", "toggle {}", target.name);
        let err = state.roles.delete(target.id, Some(&manager)).await.unwrap_err();
        assert_eq!(err.error_code(), "FORBIDDEN", "delete {}", target.name);
    }
    let err = state.roles.delete(manager.id, None).await.unwrap_err();
    assert_eq!(err.error_code(), "FORBIDDEN");

    let renamed = state.roles.update(manager.id, rename(), Some(&admin)).await.unwrap();
    assert_eq!(renamed.display_name, "Renamed");
    assert_eq!(renamed.updated_by.as_deref(), Some("admin"));
}

// ═══ Clone and assign ═══

#[tokio::test]
async fn test_clone_copies_grants_one_level_down() {
    let state = state().await;
    let (root, _, manager) = hierarchy(&state).await;
    bastion_core::seed::apply(
        &state,
        bastion_core::seed::SeedDocument::from_json(
            r#"{ "permissions": [
                { "module": "hrm.employees", "display_name": "Employees", "category": "hrm",
                  "available_actions": ["read"] }
            ] }"#,
        )
        .unwrap(),
    )
    .await
    .unwrap();
    let perm = state.permissions.find_by_key("hrm.employees").await.unwrap().unwrap();
    state
        .grants
        .set_grants(
            manager.id,
            vec![GrantInput { permission_id: perm.id, actions: ActionFlags::with(&[Action::Read]) }],
            None,
        )
        .await
        .unwrap();

    let cloned = state
        .roles
        .clone_role(manager.id, CloneRole::default(), Some(&root))
        .await
        .unwrap();
    assert_eq!(cloned.name, "manager-copy");
    assert_eq!(cloned.level, 51);
    assert_eq!(cloned.role_type, RoleType::Custom);
    assert!(state.grants.check_grant(cloned.id, "hrm.employees", Action::Read).await.unwrap());
    assert_eq!(state.grants.junction_count(cloned.id).await.unwrap(), 1);

    let err = state
        .roles
        .clone_role(manager.id, CloneRole::default(), Some(&root))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "DUPLICATE");
}

#[tokio::test]
async fn test_assign_moves_user_count() {
    let state = state().await;
    let (root, admin, manager) = hierarchy(&state).await;
    let clerk = state
        .roles
        .create(new_role("clerk", 70, RoleType::Custom), Some(&root))
        .await
        .unwrap();

    let manager = state.roles.assign(manager.id, None, Some(&root)).await.unwrap();
    assert_eq!(manager.user_count, 1);

    let clerk = state
        .roles
        .assign(clerk.id, Some(manager.id), Some(&manager))
        .await
        .unwrap();
    assert_eq!(clerk.user_count, 1);
    assert_eq!(state.roles.get(manager.id).await.unwrap().user_count, 0);

    let err = state
        .roles
        .assign(admin.id, None, Some(&manager))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "FORBIDDEN");
}
