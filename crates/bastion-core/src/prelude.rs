//! Bastion prelude.
//!
//! ```rust,ignore
//! use bastion_core::prelude::*;
//! ```

// ── Core types ─────────────────────────────────────────────────
pub use crate::ApiResponse;
pub use crate::App;
pub use crate::AppState;
pub use crate::BastionError;
pub use crate::Config;

// ── Decisions ──────────────────────────────────────────────────
pub use crate::engine::{AccessEngine, Decision, Denial, PlanFeatures, RequestContext};
pub use crate::middleware::{require_page_access, ResolvedAccess};
pub use crate::models::{Action, ActionFlags, Category, RoleType};

// ── Extractors ─────────────────────────────────────────────────
pub use crate::extractors::{Identity, Json};

pub use serde::{Deserialize, Serialize};
