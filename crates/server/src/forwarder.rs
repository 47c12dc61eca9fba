use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use signoff_core::domain::approval::StepDecision;
use signoff_core::errors::{ApplicationError, DomainError};

use crate::collaborators::trim_base;
use crate::workflow::ApprovalService;

/// Carries a decision from the processing side to the request store.
#[async_trait]
pub trait DecisionForwarder: Send + Sync {
    async fn forward(
        &self,
        decision: &StepDecision,
        correlation_id: &str,
    ) -> Result<(), ApplicationError>;
}

/// Both sides share a process.
pub struct InProcessForwarder {
    service: Arc<ApprovalService>,
}

impl InProcessForwarder {
    pub fn new(service: Arc<ApprovalService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl DecisionForwarder for InProcessForwarder {
    async fn forward(
        &self,
        decision: &StepDecision,
        correlation_id: &str,
    ) -> Result<(), ApplicationError> {
        self.service.apply_step_decision(decision, correlation_id).await.map(|_| ())
    }
}

/// `POST {request_service}/approvals/internal/result`. Status codes from the
/// request side are mapped back onto the error they were produced from.
pub struct HttpForwarder {
    client: Client,
    base_url: String,
}

impl HttpForwarder {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self { client, base_url: trim_base(base_url) }
    }
}

pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[async_trait]
impl DecisionForwarder for HttpForwarder {
    async fn forward(
        &self,
        decision: &StepDecision,
        correlation_id: &str,
    ) -> Result<(), ApplicationError> {
        let url = format!("{}/approvals/internal/result", self.base_url);
        let response = self
            .client
            .post(url)
            .header(CORRELATION_HEADER, correlation_id)
            .json(decision)
            .send()
            .await
            .map_err(|error| {
                ApplicationError::Upstream(format!("request service unreachable: {error}"))
            })?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(ApplicationError::RequestNotFound(decision.request_id)),
            StatusCode::BAD_REQUEST => Err(ApplicationError::Domain(DomainError::StepMismatch {
                request_id: decision.request_id,
                step: decision.step,
                approver_id: decision.approver_id,
            })),
            StatusCode::CONFLICT => Err(ApplicationError::Domain(DomainError::StepAlreadyDecided {
                request_id: decision.request_id,
                step: decision.step,
            })),
            other => Err(ApplicationError::Upstream(format!(
                "request service returned status {}",
                other.as_u16()
            ))),
        }
    }
}


#[cfg(test)]
mod tests {
    use axum::{http::StatusCode, routing::post, Json, Router};
    use signoff_core::domain::approval::{Decision, EmployeeId, RequestId, StepDecision};
    use signoff_core::errors::{ApplicationError, DomainError};

    use super::{DecisionForwarder, HttpForwarder};
    use crate::collaborators::http_client;

    async fn spawn_request_side() -> String {
        let app = Router::new().route(
            "/approvals/internal/result",
            post(|Json(decision): Json<StepDecision>| async move {
                match decision.request_id.0 {
                    1 => StatusCode::NO_CONTENT,
                    2 => StatusCode::BAD_REQUEST,
                    3 => StatusCode::CONFLICT,
                    4 => StatusCode::NOT_FOUND,
                    _ => StatusCode::SERVICE_UNAVAILABLE,
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve request side");
        });
        format!("http://{address}")
    }

    fn decision(request: i64) -> StepDecision {
        StepDecision {
            request_id: RequestId(request),
            step: 1,
            approver_id: EmployeeId(10),
            status: Decision::Approved,
        }
    }

    #[tokio::test]
    async fn request_side_statuses_map_back_to_errors() {
        let base = spawn_request_side().await;
        let forwarder = HttpForwarder::new(http_client(5).expect("client"), &base);

        assert_eq!(forwarder.forward(&decision(1), "c").await, Ok(()));
        assert!(matches!(
            forwarder.forward(&decision(2), "c").await,
            Err(ApplicationError::Domain(DomainError::StepMismatch { .. }))
        ));
        assert!(matches!(
            forwarder.forward(&decision(3), "c").await,
            Err(ApplicationError::Domain(DomainError::StepAlreadyDecided { .. }))
        ));
        assert_eq!(
            forwarder.forward(&decision(4), "c").await,
            Err(ApplicationError::RequestNotFound(RequestId(4)))
        );

        let unavailable = forwarder.forward(&decision(5), "c").await;
        assert!(matches!(unavailable, Err(ref error) if error.is_transient()));
    }
}
