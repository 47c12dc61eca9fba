use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use signoff_core::errors::{ApplicationError, InterfaceError};
use tracing::{error, warn};
use uuid::Uuid;

use crate::forwarder::CORRELATION_HEADER;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    pub correlation_id: String,
}

#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

impl ApiError {
    pub fn from_application(error: ApplicationError, correlation_id: &str) -> Self {
        Self(error.into_interface(correlation_id))
    }

    pub fn from_rejection(rejection: JsonRejection, correlation_id: &str) -> Self {
        Self(InterfaceError::BadRequest {
            message: rejection.body_text(),
            correlation_id: correlation_id.to_string(),
        })
    }

    pub fn status(&self) -> StatusCode {
        match self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
            InterfaceError::BadGateway { .. } => StatusCode::BAD_GATEWAY,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self.0 {
            InterfaceError::BadRequest { .. } => "bad_request",
            InterfaceError::NotFound { .. } => "not_found",
            InterfaceError::Conflict { .. } => "conflict",
            InterfaceError::BadGateway { .. } => "bad_gateway",
            InterfaceError::ServiceUnavailable { .. } => "service_unavailable",
            InterfaceError::Internal { .. } => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(
                event_name = "http.request.failed",
                correlation_id = self.0.correlation_id(),
                status = status.as_u16(),
                error = self.0.message(),
                "request failed"
            );
        } else {
            warn!(
                event_name = "http.request.rejected",
                correlation_id = self.0.correlation_id(),
                status = status.as_u16(),
                error = self.0.message(),
                "request rejected"
            );
        }

        let body = ErrorBody {
            error: self.code(),
            message: self.0.message().to_string(),
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Reuses the caller's `x-correlation-id` when present.
pub fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, HeaderValue, StatusCode};
    use axum::response::IntoResponse;
    use signoff_core::domain::approval::RequestId;
    use signoff_core::errors::ApplicationError;

    use super::{correlation_id, ApiError};

    #[test]
    fn correlation_header_is_reused_or_generated() {
        let mut headers = HeaderMap::new();
        assert_eq!(correlation_id(&headers).len(), 36);

        headers.insert("x-correlation-id", HeaderValue::from_static("corr-123"));
        assert_eq!(correlation_id(&headers), "corr-123");
    }

    #[tokio::test]
    async fn error_body_carries_code_message_and_correlation_id() {
        let response =
            ApiError::from_application(ApplicationError::RequestNotFound(RequestId(5)), "corr-9")
                .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let bytes =
            axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("read body");
        let body: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(body["error"], "not_found");
        assert_eq!(body["correlationId"], "corr-9");
        assert!(body["message"].as_str().unwrap_or_default().contains('5'));
    }
}
