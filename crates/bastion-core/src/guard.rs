//! Privilege-escalation rules for creating, assigning and changing roles.
//!
//! Both predicates are pure and fail closed: a missing, inactive or deleted
//! acting role is never allowed anything.

use crate::models::role::{self, ROOT_LEVEL, SYSTEM_LEVEL_MAX};

fn usable(role: Option<&role::Model>) -> Option<&role::Model> {
    role.filter(|r| r.is_usable())
}

/// Whether `creator` may create a role at `target_level`.
///
/// The root role may create any level. System levels (`<= 10`) are reserved
/// to root. Anyone else may only create roles at their own level or below
/// (numerically `>=`).
pub fn can_create_role_with_level(creator: Option<&role::Model>, target_level: i32) -> bool {
    let Some(creator) = usable(creator) else {
        return false;
    };
    if creator.level == ROOT_LEVEL {
        return true;
    }
    if target_level <= SYSTEM_LEVEL_MAX {
        return false;
    }
    target_level >= creator.level
}

/// Whether `assigner` may assign `target` to a user.
///
/// Mirrors [`can_create_role_with_level`]; system-level targets are never
/// assignable by a non-root assigner, even one whose own level is a system
/// level.
pub fn can_assign_role(assigner: Option<&role::Model>, target: Option<&role::Model>) -> bool {
    let (Some(assigner), Some(target)) = (usable(assigner), target) else {
        return false;
    };
    if target.is_deleted {
        return false;
    }
    if assigner.level == ROOT_LEVEL {
        return true;
    }
    if target.level <= SYSTEM_LEVEL_MAX {
        return false;
    }
    target.level >= assigner.level
}

/// Whether `actor` may change `target`: its fields, status or grants.
///
/// Root may change any role, itself included. Anyone else may only change
/// roles strictly below their own level, so never their own role.
pub fn can_manage_role(actor: Option<&role::Model>, target: &role::Model) -> bool {
    let Some(actor) = usable(actor) else {
        return false;
    };
    actor.level == ROOT_LEVEL || target.level > actor.level
}
