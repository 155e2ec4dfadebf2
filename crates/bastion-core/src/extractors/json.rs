use axum::{
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::de::DeserializeOwned;

use crate::error::BastionError;

/// JSON body extractor whose rejections use the bastion error envelope.
///
/// ```rust,ignore
/// async fn create_role(Json(payload): Json<NewRole>) -> impl IntoResponse {
///     // payload is deserialized from the request body
/// }
/// ```
pub struct Json<T>(pub T);

impl<S, T> FromRequest<S> for Json<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = BastionError;

    async fn from_request(req: Request, _state: &S) -> Result<Self, Self::Rejection> {
        let bytes = axum::body::to_bytes(req.into_body(), usize::MAX)
            .await
            .map_err(|e| BastionError::Validation(format!("Failed to read body: {e}")))?;

        let value: T = serde_json::from_slice(&bytes)
            .map_err(|e| BastionError::Validation(format!("Invalid JSON: {e}")))?;

        Ok(Json(value))
    }
}

impl<T: serde::Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        match serde_json::to_vec(&self.0) {
            Ok(bytes) => (
                StatusCode::OK,
                [(axum::http::header::CONTENT_TYPE, "application/json")],
                bytes,
            )
                .into_response(),
            Err(e) => BastionError::Internal(format!("serialize response: {e}")).into_response(),
        }
    }
}
