use utoipa::OpenApi;

use crate::catalog::permission::{NewPermission, PermissionGroup, PermissionUpdate};
use crate::catalog::resource::{
    CategoryCount, NewResource, ReorderOutcome, ResourceGroup, ResourceNode, ResourceStats,
    ResourceTreeGroup, ResourceUpdate, SortOrderUpdate,
};
use crate::controllers::access::DecideRequest;
use crate::controllers::roles::{
    AssignRoleRequest, CheckPermissionResponse, SetGrantsRequest, UpdateGrantRequest,
};
use crate::controllers::Deleted;
use crate::engine::{DataFilter, Decision, Denial};
use crate::error::{ErrorDetail, FieldError};
use crate::grants::{GrantGroup, GrantInput, GrantSource, GrantSummary, RoleGrants};
use crate::models::policy::{
    AccessConditions, ApiRoute, DataScope, FeatureFlags, HourRange, IpRestriction,
    RestrictedField, TimeRestriction,
};
use crate::models::{
    permission, resource, role, Action, ActionFlags, Category, EmbeddedGrant, PermissionStats,
    RoleType,
};
use crate::roles::{CloneRole, NewRole, RoleUpdate, RoleWithSummary};

/// OpenAPI documentation for the bastion API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Bastion API",
        version = "0.3.0",
        description = "Resource catalog, role grants and access decisions for multi-tenant RBAC."
    ),
    paths(
        crate::controllers::resources::list_resources,
        crate::controllers::resources::grouped_resources,
        crate::controllers::resources::resource_tree,
        crate::controllers::resources::resource_stats,
        crate::controllers::resources::resources_by_category,
        crate::controllers::resources::get_resource,
        crate::controllers::resources::get_resource_by_name,
        crate::controllers::resources::create_resource,
        crate::controllers::resources::update_resource,
        crate::controllers::resources::delete_resource,
        crate::controllers::resources::toggle_resource,
        crate::controllers::resources::reorder_resources,
        crate::controllers::permissions::list_permissions,
        crate::controllers::permissions::grouped_permissions,
        crate::controllers::permissions::permissions_by_category,
        crate::controllers::permissions::get_permission,
        crate::controllers::permissions::create_permission,
        crate::controllers::permissions::update_permission,
        crate::controllers::permissions::deactivate_permission,
        crate::controllers::roles::list_roles,
        crate::controllers::roles::roles_with_summary,
        crate::controllers::roles::get_role,
        crate::controllers::roles::create_role,
        crate::controllers::roles::update_role,
        crate::controllers::roles::delete_role,
        crate::controllers::roles::toggle_role,
        crate::controllers::roles::clone_role,
        crate::controllers::roles::assign_role,
        crate::controllers::roles::get_role_permissions,
        crate::controllers::roles::set_role_permissions,
        crate::controllers::roles::update_role_permission,
        crate::controllers::roles::check_role_permission,
        crate::controllers::access::decide,
    ),
    components(
        schemas(
            resource::Model,
            permission::Model,
            role::Model,
            Action,
            ActionFlags,
            Category,
            RoleType,
            EmbeddedGrant,
            PermissionStats,
            ApiRoute,
            HourRange,
            TimeRestriction,
            IpRestriction,
            AccessConditions,
            FeatureFlags,
            RestrictedField,
            DataScope,
            NewResource,
            ResourceUpdate,
            SortOrderUpdate,
            ReorderOutcome,
            ResourceGroup,
            ResourceNode,
            ResourceTreeGroup,
            CategoryCount,
            ResourceStats,
            NewPermission,
            PermissionUpdate,
            PermissionGroup,
            NewRole,
            RoleUpdate,
            CloneRole,
            RoleWithSummary,
            GrantInput,
            GrantSummary,
            GrantGroup,
            GrantSource,
            RoleGrants,
            AssignRoleRequest,
            SetGrantsRequest,
            UpdateGrantRequest,
            CheckPermissionResponse,
            DecideRequest,
            Decision,
            Denial,
            DataFilter,
            Deleted,
            ErrorDetail,
            FieldError,
        )
    ),
    tags(
        (name = "resources", description = "Resource catalog"),
        (name = "permissions", description = "Permission catalog"),
        (name = "roles", description = "Roles, cloning and assignment"),
        (name = "grants", description = "Role grants"),
        (name = "access", description = "Access decisions")
    ),
    modifiers(&IdentityHeaders)
)]
pub struct ApiDoc;

/// Document the gateway identity header as an API key scheme.
struct IdentityHeaders;

impl utoipa::Modify for IdentityHeaders {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "role_id",
                utoipa::openapi::security::SecurityScheme::ApiKey(
                    utoipa::openapi::security::ApiKey::Header(
                        utoipa::openapi::security::ApiKeyValue::new(
                            crate::extractors::identity::ROLE_ID_HEADER,
                        ),
                    ),
                ),
            );
        }
    }
}
