use std::sync::Arc;

use sea_orm::DatabaseConnection;
use serde::Serialize;
use utoipa::ToSchema;

use crate::cache::CacheService;
use crate::catalog::{PermissionCatalog, ResourceCatalog};
use crate::config::Config;
use crate::engine::AccessEngine;
use crate::error::BastionError;
use crate::extractors::Identity;
use crate::grants::GrantStore;
use crate::models::role;
use crate::roles::RoleRegistry;

pub mod access;
pub mod permissions;
pub mod resources;
pub mod roles;

pub const RESOURCE_CACHE: &str = "resources";
pub const PERMISSION_CACHE: &str = "permissions";

/// Shared application state available in all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: Arc<Config>,
    pub cache: CacheService,
    pub resources: ResourceCatalog,
    pub permissions: PermissionCatalog,
    pub roles: RoleRegistry,
    pub grants: GrantStore,
    pub engine: Arc<AccessEngine>,
}

impl AppState {
    /// Wire every service over one connection and cache.
    pub fn build(
        db: DatabaseConnection,
        config: Arc<Config>,
        cache: CacheService,
    ) -> Result<Self, BastionError> {
        let ttl = config.catalog_cache_ttl();
        let permission_cache = cache.namespace(PERMISSION_CACHE, ttl);
        let resources = ResourceCatalog::new(
            db.clone(),
            cache.namespace(RESOURCE_CACHE, ttl),
            permission_cache.clone(),
        );
        let permissions = PermissionCatalog::new(db.clone(), permission_cache);
        let roles = RoleRegistry::new(db.clone());
        let grants = GrantStore::new(db.clone(), permissions.clone());
        let engine = AccessEngine::from_config(
            &config,
            resources.clone(),
            roles.clone(),
            grants.clone(),
        )?;

        Ok(AppState {
            db,
            config,
            cache,
            resources,
            permissions,
            roles,
            grants,
            engine: Arc::new(engine),
        })
    }

    /// Replace the engine, e.g. to inject a plan service or clock.
    pub fn with_engine(mut self, engine: AccessEngine) -> Self {
        self.engine = Arc::new(engine);
        self
    }

    /// The caller's role if it exists and is usable.
    pub(crate) async fn acting_role(
        &self,
        identity: &Identity,
    ) -> Result<Option<role::Model>, BastionError> {
        match identity.role_id {
            Some(id) => self.roles.find_usable(id).await,
            None => Ok(None),
        }
    }
}

/// Body returned by delete endpoints.
#[derive(Debug, Serialize, ToSchema)]
pub struct Deleted {
    pub id: i32,
}
