pub mod action;
pub mod category;
pub mod permission;
pub mod policy;
pub mod resource;
pub mod role;
pub mod role_permission;

pub use action::{Action, ActionFlags, ActionList};
pub use category::Category;
pub use role::{EmbeddedGrant, EmbeddedGrants, PermissionStats, RoleType};
