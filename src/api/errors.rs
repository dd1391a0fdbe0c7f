//! API Error Handling
//!
//! Maps gateway errors onto the response envelope and an HTTP status, tagged
//! with the request id for log correlation.

use super::models::ApiResponse;
use crate::errors::{ErrorCategory, GatewayError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::{error::Error as _, fmt};
use tracing::{error, warn};

/// Gateway error bound to the request that produced it
#[derive(Debug)]
pub struct ApiError {
    pub error: GatewayError,
    pub request_id: String,
}

impl ApiError {
    pub fn new(request_id: &str, error: GatewayError) -> Self {
        Self {
            error,
            request_id: request_id.to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match (&self.error, self.error.category()) {
            (GatewayError::RecordNotFound(_), _) => StatusCode::NOT_FOUND,
            (_, ErrorCategory::Request | ErrorCategory::Authentication) => StatusCode::BAD_REQUEST,
            (_, ErrorCategory::Downstream | ErrorCategory::PostCommit) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn data(&self) -> Option<Value> {
        if let Some(tx_id) = self.error.committed_tx_id() {
            let cause = self
                .error
                .source()
                .map(|s| s.to_string())
                .unwrap_or_else(|| self.error.to_string());
            return Some(json!({ "committed": true, "txId": tx_id, "cause": cause }));
        }
        self.error.source().map(|s| Value::String(s.to_string()))
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.request_id, self.error)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(request_id = %self.request_id, code = self.error.code().as_u32(), error = %self.error, "Request failed");
        } else {
            warn!(request_id = %self.request_id, code = self.error.code().as_u32(), error = %self.error, "Request rejected");
        }

        let body = ApiResponse {
            code: self.error.code().as_u32(),
            message: self.error.to_string(),
            data: self.data(),
        };
        (status, Json(body)).into_response()
    }
}
