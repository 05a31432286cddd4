use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    /// Request is well-formed but violates a domain rule (HTTP 422).
    /// `context` must be a JSON object; its fields are merged into the body.
    #[error("Unprocessable entity: {detail}")]
    Unprocessable {
        detail: String,
        context: Option<Value>,
    },

    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    /// Conflict carrying a structured payload the caller needs to resolve it.
    #[error("Conflict: {detail}")]
    ConflictWithDetails { detail: String, context: Value },

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Service Unavailable")]
    ServiceUnavailable,

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl AppError {
    pub fn unprocessable(detail: impl Into<String>) -> Self {
        AppError::Unprocessable {
            detail: detail.into(),
            context: None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) | AppError::Unprocessable { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) | AppError::ConflictWithDetails { .. } => StatusCode::CONFLICT,
            AppError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InternalError(_) | AppError::DatabaseError(_) | AppError::ConfigError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

fn into_object(context: Option<Value>) -> Map<String, Value> {
    match context {
        Some(Value::Object(map)) => map,
        Some(other) => {
            let mut map = Map::new();
            map.insert("context".to_string(), other);
            map
        }
        None => Map::new(),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            detail: Option<String>,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<String>,
            #[serde(flatten)]
            context: Map<String, Value>,
        }

        let status = self.status_code();

        let (error, detail, details, context) = match self {
            AppError::ValidationError(err) => (
                "Validation error".to_string(),
                Some(err.to_string()),
                None,
                None,
            ),
            AppError::Unprocessable { detail, context } => (
                "Unprocessable entity".to_string(),
                Some(detail),
                None,
                context,
            ),
            AppError::BadRequest(err) => ("Bad request".to_string(), Some(err.to_string()), None, None),
            AppError::NotFound(err) => ("Not found".to_string(), Some(err.to_string()), None, None),
            AppError::Conflict(err) => ("Conflict".to_string(), Some(err.to_string()), None, None),
            AppError::ConflictWithDetails { detail, context } => {
                ("Conflict".to_string(), Some(detail), None, Some(context))
            }
            AppError::InternalError(err) => (
                "Internal server error".to_string(),
                None,
                Some(format!("{:#?}", err)),
                None,
            ),
            AppError::ServiceUnavailable => {
                ("Service unavailable".to_string(), None, None, None)
            }
            AppError::DatabaseError(err) => (
                "Database error".to_string(),
                None,
                Some(err.to_string()),
                None,
            ),
            AppError::ConfigError(err) => (
                "Configuration error".to_string(),
                None,
                Some(err.to_string()),
                None,
            ),
        };

        if status.is_server_error() {
            tracing::error!(status = %status, error = %error, details = ?details, "Request failed");
        }

        (
            status,
            Json(ErrorResponse {
                error,
                detail,
                details,
                context: into_object(context),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn unprocessable_carries_detail() {
        let response = AppError::unprocessable("Entry lines are not balanced").into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = body_json(response).await;
        assert_eq!(body["detail"], "Entry lines are not balanced");
    }

    #[tokio::test]
    async fn conflict_context_is_flattened_into_body() {
        let response = AppError::ConflictWithDetails {
            detail: "Crop is referenced".to_string(),
            context: json!({ "conflicts": { "daily_prices": 2 } }),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = body_json(response).await;
        assert_eq!(body["conflicts"]["daily_prices"], 2);
        assert_eq!(body["error"], "Conflict");
    }

    #[tokio::test]
    async fn non_object_context_is_nested() {
        let response = AppError::Unprocessable {
            detail: "bad".to_string(),
            context: Some(json!(42)),
        }
        .into_response();

        let body = body_json(response).await;
        assert_eq!(body["context"], 42);
    }
}
