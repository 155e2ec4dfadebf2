//! Resource and permission catalogs.

pub mod permission;
pub mod resource;

pub use permission::PermissionCatalog;
pub use resource::ResourceCatalog;
