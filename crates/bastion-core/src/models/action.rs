use std::fmt;
use std::str::FromStr;

use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// An action token a resource can support and a grant can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    All,
    Read,
    Create,
    Write,
    Delete,
    Import,
    Export,
    Approve,
    Assign,
}

impl Action {
    pub const ALL_TOKENS: [Action; 9] = [
        Action::All,
        Action::Read,
        Action::Create,
        Action::Write,
        Action::Delete,
        Action::Import,
        Action::Export,
        Action::Approve,
        Action::Assign,
    ];

    /// Actions implied by `all`. `approve` and `assign` are deliberately absent.
    pub const COVERED_BY_ALL: [Action; 6] = [
        Action::Read,
        Action::Create,
        Action::Write,
        Action::Delete,
        Action::Import,
        Action::Export,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::All => "all",
            Action::Read => "read",
            Action::Create => "create",
            Action::Write => "write",
            Action::Delete => "delete",
            Action::Import => "import",
            Action::Export => "export",
            Action::Approve => "approve",
            Action::Assign => "assign",
        }
    }

    pub fn is_covered_by_all(&self) -> bool {
        Self::COVERED_BY_ALL.contains(self)
    }

    /// Default action for an HTTP method when a resource has no override.
    pub fn from_method(method: &str) -> Action {
        match method.to_ascii_uppercase().as_str() {
            "GET" => Action::Read,
            "POST" => Action::Create,
            "PUT" | "PATCH" => Action::Write,
            "DELETE" => Action::Delete,
            _ => Action::Read,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL_TOKENS
            .iter()
            .copied()
            .find(|a| a.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown action '{s}'"))
    }
}

/// Ordered list of supported actions, stored as a JSON column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult, ToSchema)]
pub struct ActionList(pub Vec<Action>);

impl ActionList {
    pub fn contains(&self, action: Action) -> bool {
        self.0.contains(&action)
    }
}

impl From<Vec<Action>> for ActionList {
    fn from(actions: Vec<Action>) -> Self {
        ActionList(actions)
    }
}

/// The per-action boolean flags of a grant.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult, ToSchema,
)]
#[serde(default)]
pub struct ActionFlags {
    pub all: bool,
    pub read: bool,
    pub create: bool,
    pub write: bool,
    pub delete: bool,
    pub import: bool,
    pub export: bool,
    pub approve: bool,
    pub assign: bool,
}

impl ActionFlags {
    /// Flags with exactly the given actions set.
    pub fn with(actions: &[Action]) -> Self {
        let mut flags = ActionFlags::default();
        for action in actions {
            flags.set(*action, true);
        }
        flags
    }

    pub fn get(&self, action: Action) -> bool {
        match action {
            Action::All => self.all,
            Action::Read => self.read,
            Action::Create => self.create,
            Action::Write => self.write,
            Action::Delete => self.delete,
            Action::Import => self.import,
            Action::Export => self.export,
            Action::Approve => self.approve,
            Action::Assign => self.assign,
        }
    }

    pub fn set(&mut self, action: Action, value: bool) {
        let slot = match action {
            Action::All => &mut self.all,
            Action::Read => &mut self.read,
            Action::Create => &mut self.create,
            Action::Write => &mut self.write,
            Action::Delete => &mut self.delete,
            Action::Import => &mut self.import,
            Action::Export => &mut self.export,
            Action::Approve => &mut self.approve,
            Action::Assign => &mut self.assign,
        };
        *slot = value;
    }

    /// Whether these flags grant `action`.
    ///
    /// `all` covers read/create/write/delete/import/export only; `approve`
    /// and `assign` must be granted explicitly.
    pub fn allows(&self, action: Action) -> bool {
        self.get(action) || (self.all && action.is_covered_by_all())
    }

    /// Materialize the actions implied by `all` so stored flags read the same
    /// as evaluated flags.
    pub fn normalized(mut self) -> Self {
        if self.all {
            for action in Action::COVERED_BY_ALL {
                self.set(action, true);
            }
        }
        self
    }

    pub fn any(&self) -> bool {
        Action::ALL_TOKENS.iter().any(|a| self.get(*a))
    }

    pub fn granted(&self) -> Vec<Action> {
        Action::ALL_TOKENS
            .iter()
            .copied()
            .filter(|a| self.get(*a))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_does_not_imply_approve_or_assign() {
        let flags = ActionFlags::with(&[Action::All]);
        for action in Action::COVERED_BY_ALL {
            assert!(flags.allows(action), "all should cover {action}");
        }
        assert!(!flags.allows(Action::Approve));
        assert!(!flags.allows(Action::Assign));
    }

    #[test]
    fn test_approve_is_independent_of_all() {
        let mut flags = ActionFlags::with(&[Action::All, Action::Approve]);
        assert!(flags.allows(Action::Approve));
        flags.approve = false;
        assert!(!flags.allows(Action::Approve));
        assert!(flags.allows(Action::Export));
    }

    #[test]
    fn test_normalized_materializes_covered_actions() {
        let flags = ActionFlags::with(&[Action::All]).normalized();
        assert!(flags.read && flags.create && flags.write);
        assert!(flags.delete && flags.import && flags.export);
        assert!(!flags.approve && !flags.assign);
    }

    #[test]
    fn test_from_method_defaults() {
        assert_eq!(Action::from_method("get"), Action::Read);
        assert_eq!(Action::from_method("POST"), Action::Create);
        assert_eq!(Action::from_method("PATCH"), Action::Write);
        assert_eq!(Action::from_method("DELETE"), Action::Delete);
        assert_eq!(Action::from_method("OPTIONS"), Action::Read);
    }

    #[test]
    fn test_partial_flags_deserialize() {
        let flags: ActionFlags = serde_json::from_str(r#"{"read": true}"#).unwrap();
        assert_eq!(flags.granted(), vec![Action::Read]);
    }

    #[test]
    fn test_parse_action() {
        assert_eq!("Approve".parse::<Action>().unwrap(), Action::Approve);
        assert!("publish".parse::<Action>().is_err());
    }
}
