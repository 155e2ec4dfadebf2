use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

use crate::models::policy::DataScope;

use super::RequestContext;

/// Row and field restrictions a handler must apply to data it returns.
///
/// `conditions` is an equality filter over record fields. A scoped key whose
/// caller id is unknown is present with a `null` value and must match no
/// rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DataFilter {
    #[schema(value_type = Object)]
    pub conditions: Map<String, Value>,
    /// Fields the caller's role may not see.
    pub hidden_fields: Vec<String>,
}

impl DataFilter {
    pub fn is_unrestricted(&self) -> bool {
        self.conditions.is_empty() && self.hidden_fields.is_empty()
    }
}

fn id_value(id: Option<&str>) -> Value {
    id.map(|s| Value::String(s.to_string())).unwrap_or(Value::Null)
}

/// Build the filter for a caller. No scope means no restriction.
pub fn build(scope: Option<&DataScope>, role_name: &str, ctx: &RequestContext) -> DataFilter {
    let Some(scope) = scope else {
        return DataFilter::default();
    };

    let mut conditions = Map::new();

    if let Some(Value::Object(custom)) = &scope.custom_filter {
        for (key, value) in custom {
            conditions.insert(key.clone(), substitute(value, ctx));
        }
    }

    // Scope keys are applied last so a custom filter cannot widen them.
    if scope.filter_by_company {
        conditions.insert("company_id".into(), id_value(ctx.company_id.as_deref()));
    }
    if scope.filter_by_user {
        conditions.insert("user_id".into(), id_value(ctx.user_id.as_deref()));
    }
    if scope.filter_by_department {
        conditions.insert(
            "department_id".into(),
            id_value(ctx.department_id.as_deref()),
        );
    }

    let hidden_fields = scope
        .restricted_fields
        .iter()
        .filter(|f| !f.allowed_roles.iter().any(|r| r == role_name))
        .map(|f| f.field.clone())
        .collect();

    DataFilter {
        conditions,
        hidden_fields,
    }
}

/// Replace `$userId`, `$companyId` and `$departmentId` string values anywhere
/// in `value`.
fn substitute(value: &Value, ctx: &RequestContext) -> Value {
    match value {
        Value::String(s) => match s.as_str() {
            "$userId" => id_value(ctx.user_id.as_deref()),
            "$companyId" => id_value(ctx.company_id.as_deref()),
            "$departmentId" => id_value(ctx.department_id.as_deref()),
            _ => value.clone(),
        },
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute(v, ctx)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}
