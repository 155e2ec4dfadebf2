use std::fmt;
use std::str::FromStr;

use sea_orm::entity::prelude::*;
use sea_orm::Iterable;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Grouping shared by resources and permissions.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    #[sea_orm(string_value = "super-admin")]
    SuperAdmin,
    #[sea_orm(string_value = "users-permissions")]
    UsersPermissions,
    #[sea_orm(string_value = "applications")]
    Applications,
    #[sea_orm(string_value = "hrm")]
    Hrm,
    #[sea_orm(string_value = "projects")]
    Projects,
    #[sea_orm(string_value = "crm")]
    Crm,
    #[sea_orm(string_value = "recruitment")]
    Recruitment,
    #[sea_orm(string_value = "finance")]
    Finance,
    #[sea_orm(string_value = "administration")]
    Administration,
    #[sea_orm(string_value = "reports")]
    Reports,
    #[sea_orm(string_value = "content")]
    Content,
    #[sea_orm(string_value = "pages")]
    Pages,
    #[sea_orm(string_value = "auth")]
    Auth,
    #[sea_orm(string_value = "ui")]
    Ui,
    #[sea_orm(string_value = "extras")]
    Extras,
    #[sea_orm(string_value = "dashboards")]
    Dashboards,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::SuperAdmin => "super-admin",
            Category::UsersPermissions => "users-permissions",
            Category::Applications => "applications",
            Category::Hrm => "hrm",
            Category::Projects => "projects",
            Category::Crm => "crm",
            Category::Recruitment => "recruitment",
            Category::Finance => "finance",
            Category::Administration => "administration",
            Category::Reports => "reports",
            Category::Content => "content",
            Category::Pages => "pages",
            Category::Auth => "auth",
            Category::Ui => "ui",
            Category::Extras => "extras",
            Category::Dashboards => "dashboards",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Category::iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| format!("unknown category '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_round_trips_through_str() {
        for category in Category::iter() {
            assert_eq!(category.as_str().parse::<Category>().unwrap(), category);
        }
        assert!("billing".parse::<Category>().is_err());
    }

    #[test]
    fn test_serde_matches_db_value() {
        let json = serde_json::to_string(&Category::SuperAdmin).unwrap();
        assert_eq!(json, "\"super-admin\"");
        assert_eq!(Category::SuperAdmin.to_value(), "super-admin".to_string());
    }
}
