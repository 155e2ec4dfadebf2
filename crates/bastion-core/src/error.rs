use axum::http::StatusCode;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::response::ApiResponse;

/// Standard error type for bastion.
///
/// Catalog and store operations surface these as typed results; only the
/// HTTP layer turns them into status codes.
#[derive(Debug, Error)]
pub enum BastionError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("System protected: {0}")]
    SystemProtected(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Feature required: {message}")]
    FeatureRequired {
        message: String,
        missing: Vec<String>,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Validation errors")]
    ValidationErrors(Vec<FieldError>),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

impl BastionError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            BastionError::NotFound(_) => StatusCode::NOT_FOUND,
            BastionError::Duplicate(_) => StatusCode::CONFLICT,
            BastionError::SystemProtected(_) => StatusCode::CONFLICT,
            BastionError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            BastionError::Forbidden(_) => StatusCode::FORBIDDEN,
            BastionError::FeatureRequired { .. } => StatusCode::PAYMENT_REQUIRED,
            BastionError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            BastionError::ValidationErrors(_) => StatusCode::UNPROCESSABLE_ENTITY,
            BastionError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            BastionError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code string for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            BastionError::NotFound(_) => "NOT_FOUND",
            BastionError::Duplicate(_) => "DUPLICATE",
            BastionError::SystemProtected(_) => "SYSTEM_PROTECTED",
            BastionError::Unauthenticated(_) => "UNAUTHENTICATED",
            BastionError::Forbidden(_) => "FORBIDDEN",
            BastionError::FeatureRequired { .. } => "FEATURE_REQUIRED",
            BastionError::Validation(_) => "VALIDATION_ERROR",
            BastionError::ValidationErrors(_) => "VALIDATION_ERROR",
            BastionError::Internal(_) => "INTERNAL_ERROR",
            BastionError::Database(_) => "DATABASE_ERROR",
        }
    }

    /// Create a validation error with field-level details.
    pub fn validation_fields(errors: Vec<FieldError>) -> Self {
        BastionError::ValidationErrors(errors)
    }
}

impl From<validator::ValidationErrors> for BastionError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let fields = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| {
                    let message = e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("invalid value ({})", e.code));
                    FieldError::with_code(field.to_string(), message, e.code.to_string())
                })
            })
            .collect();
        BastionError::ValidationErrors(fields)
    }
}

/// Error detail for API responses.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldError>>,
    /// Plan features the tenant is missing (only on `FEATURE_REQUIRED`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_features: Option<Vec<String>>,
}

/// Field-level validation error.
///
/// ```json
/// {
///   "field": "level",
///   "message": "level must be between 1 and 100",
///   "code": "range"
/// }
/// ```
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FieldError {
    pub field: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl FieldError {
    /// Create a new field error.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        FieldError {
            field: field.into(),
            message: message.into(),
            code: None,
        }
    }

    /// Create a new field error with a code.
    pub fn with_code(
        field: impl Into<String>,
        message: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        FieldError {
            field: field.into(),
            message: message.into(),
            code: Some(code.into()),
        }
    }
}

impl axum::response::IntoResponse for BastionError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let fields = match &self {
            BastionError::ValidationErrors(errs) => Some(errs.clone()),
            _ => None,
        };
        let missing_features = match &self {
            BastionError::FeatureRequired { missing, .. } => Some(missing.clone()),
            _ => None,
        };
        let message = match &self {
            BastionError::ValidationErrors(errs) => errs
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect::<Vec<_>>()
                .join("; "),
            BastionError::Database(e) => {
                tracing::error!(error = %e, "database error surfaced to client");
                "Database error".to_string()
            }
            _ => self.to_string(),
        };
        let body: ApiResponse<()> = ApiResponse {
            success: false,
            data: None,
            message: None,
            error: Some(ErrorDetail {
                code: self.error_code().to_string(),
                message,
                fields,
                missing_features,
            }),
        };

        (status, axum::Json(body)).into_response()
    }
}
