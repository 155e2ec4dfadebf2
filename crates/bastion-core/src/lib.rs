//! Bastion: a multi-tenant access control service.
//!
//! A hierarchical resource catalog, role grants stored both embedded and as
//! junction rows, and a decision engine that layers plan features, time and
//! IP conditions, and data scoping on top of plain grants.

pub mod app;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod controllers;
pub mod db;
pub mod engine;
pub mod error;
pub mod extractors;
pub mod grants;
pub mod guard;
pub mod logging;
pub mod middleware;
pub mod migrations;
pub mod models;
pub mod openapi;
pub mod prelude;
pub mod response;
pub mod roles;
pub mod routing;
pub mod seed;
pub mod testing;

pub use app::App;
pub use cache::CacheService;
pub use catalog::{PermissionCatalog, ResourceCatalog};
pub use config::Config;
pub use controllers::AppState;
pub use engine::{AccessEngine, Decision, RequestContext};
pub use error::BastionError;
pub use grants::GrantStore;
pub use response::ApiResponse;
pub use roles::RoleRegistry;
pub use testing::{TestApp, TestClient, TestResponse};
