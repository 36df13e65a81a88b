pub mod dhcp;

use axum::{
    body::Bytes,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{domain_error, ProvisionError};

/// Error response - {"error": "message"}
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// API error type
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn not_found(resource: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: format!("{} not found", resource),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse::new(self.message))).into_response()
    }
}

fn status_for(err: &ProvisionError) -> StatusCode {
    match err {
        ProvisionError::Validation(_) | ProvisionError::QuerySyntax(_) | ProvisionError::Address(_) => {
            StatusCode::BAD_REQUEST
        }
        ProvisionError::NotFound { .. } | ProvisionError::NoMatch => StatusCode::NOT_FOUND,
        ProvisionError::Conflict(_) | ProvisionError::AddressExhausted | ProvisionError::NoBmcConfigured => {
            StatusCode::CONFLICT
        }
        ProvisionError::Bmc(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        // Typed domain errors pick their own status; anything else is a 500
        if let Some(domain) = domain_error(&err) {
            return Self {
                status: status_for(domain),
                message: domain.to_string(),
            };
        }
        tracing::error!("Request failed: {:#}", err);
        Self::internal(err.to_string())
    }
}

/// Decode a JSON body regardless of its content type, reporting schema
/// mismatches as 400 with the decoder's diagnostics
pub fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("invalid request body: {}", e)))
}

/// Healthcheck endpoint - returns 200 OK with status
pub async fn healthcheck() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "metal-provisioner",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
