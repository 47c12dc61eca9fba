//! Processing-side REST surface: approvers list and resolve their queued work.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use signoff_core::domain::approval::{EmployeeId, RequestId, StepDecision};
use signoff_core::domain::work::{ProcessAction, WorkItem};
use signoff_core::errors::ApplicationError;
use signoff_core::queue::WorkQueue;
use tracing::{info, warn};

use crate::api_error::{correlation_id, ApiError};
use crate::forwarder::DecisionForwarder;

#[derive(Debug, Deserialize)]
pub struct ProcessBody {
    pub action: ProcessAction,
}

pub struct DecisionEndpoint {
    queue: Arc<dyn WorkQueue>,
    forwarder: Arc<dyn DecisionForwarder>,
}

impl DecisionEndpoint {
    pub fn new(queue: Arc<dyn WorkQueue>, forwarder: Arc<dyn DecisionForwarder>) -> Self {
        Self { queue, forwarder }
    }

    pub fn pending(&self, approver_id: EmployeeId) -> Vec<WorkItem> {
        self.queue.list_pending(approver_id)
    }

    /// Pops the item, then forwards. A transient forward failure puts the item
    /// back at the head of the approver's queue; any other failure drops it.
    pub async fn decide(
        &self,
        approver_id: EmployeeId,
        request_id: RequestId,
        action: ProcessAction,
        correlation_id: &str,
    ) -> Result<WorkItem, ApplicationError> {
        let mut item = self
            .queue
            .pop_item(approver_id, request_id)
            .ok_or(ApplicationError::NoPendingItem { approver_id, request_id })?;

        let decision = StepDecision {
            request_id,
            step: item.step_number,
            approver_id,
            status: action.decision(),
        };

        match self.forwarder.forward(&decision, correlation_id).await {
            Ok(()) => {
                item.status = decision.status.into();
                info!(
                    event_name = "process.item.decided",
                    correlation_id,
                    request_id = request_id.0,
                    step = item.step_number,
                    approver_id = approver_id.0,
                    decision = decision.status.as_str(),
                    "work item decided"
                );
                Ok(item)
            }
            Err(error) if error.is_transient() => {
                warn!(
                    event_name = "process.item.restored",
                    correlation_id,
                    request_id = request_id.0,
                    approver_id = approver_id.0,
                    error = %error,
                    "forward failed, work item restored"
                );
                self.queue.restore(item);
                Err(error)
            }
            Err(error) => {
                warn!(
                    event_name = "process.item.dropped",
                    correlation_id,
                    request_id = request_id.0,
                    approver_id = approver_id.0,
                    error = %error,
                    "decision refused, work item dropped"
                );
                Err(error)
            }
        }
    }
}

pub fn router(endpoint: Arc<DecisionEndpoint>) -> Router {
    Router::new()
        .route("/process/{approver_id}", get(list_pending))
        .route("/process/{approver_id}/{request_id}", post(decide))
        .with_state(endpoint)
}

async fn list_pending(
    State(endpoint): State<Arc<DecisionEndpoint>>,
    Path(approver_id): Path<i64>,
) -> Json<Vec<WorkItem>> {
    Json(endpoint.pending(EmployeeId(approver_id)))
}

async fn decide(
    State(endpoint): State<Arc<DecisionEndpoint>>,
    headers: HeaderMap,
    Path((approver_id, request_id)): Path<(i64, i64)>,
    body: Result<Json<ProcessBody>, JsonRejection>,
) -> Result<Json<WorkItem>, ApiError> {
    let correlation_id = correlation_id(&headers);
    let Json(body) =
        body.map_err(|rejection| ApiError::from_rejection(rejection, &correlation_id))?;

    endpoint
        .decide(EmployeeId(approver_id), RequestId(request_id), body.action, &correlation_id)
        .await
        .map(Json)
        .map_err(|error| ApiError::from_application(error, &correlation_id))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use signoff_core::domain::approval::{
        Decision, EmployeeId, RequestId, StepDecision, StepStatus,
    };
    use signoff_core::domain::work::{ProcessAction, WorkItem};
    use signoff_core::errors::{ApplicationError, DomainError};
    use signoff_core::queue::{InMemoryWorkQueue, WorkQueue};
    use tower::ServiceExt;

    use super::{router, DecisionEndpoint};
    use crate::forwarder::testing::ScriptedForwarder;
    use crate::forwarder::DecisionForwarder;

    fn item(request: i64, approver: i64) -> WorkItem {
        WorkItem {
            request_id: RequestId(request),
            step_number: 1,
            requester_id: EmployeeId(1),
            approver_id: EmployeeId(approver),
            title: "Travel".to_string(),
            content: "Berlin".to_string(),
            status: StepStatus::Pending,
        }
    }

    fn endpoint(forwarder: ScriptedForwarder) -> (Arc<InMemoryWorkQueue>, DecisionEndpoint) {
        endpoint_with(Arc::new(forwarder))
    }

    fn endpoint_with(
        forwarder: Arc<ScriptedForwarder>,
    ) -> (Arc<InMemoryWorkQueue>, DecisionEndpoint) {
        let queue = Arc::new(InMemoryWorkQueue::new());
        queue.enqueue(item(1, 10));
        queue.enqueue(item(2, 10));
        let endpoint = DecisionEndpoint::new(queue.clone(), forwarder);
        (queue, endpoint)
    }

    #[tokio::test]
    async fn successful_decision_returns_decided_item() {
        let forwarder = Arc::new(ScriptedForwarder::default());
        let (queue, endpoint) = endpoint_with(Arc::clone(&forwarder));

        let decided = endpoint
            .decide(EmployeeId(10), RequestId(1), ProcessAction::Reject, "c")
            .await
            .expect("decided");

        assert_eq!(decided.status, StepStatus::Rejected);
        assert_eq!(queue.list_pending(EmployeeId(10)).len(), 1);
        assert_eq!(
            forwarder.forwarded(),
            vec![StepDecision {
                request_id: RequestId(1),
                step: 1,
                approver_id: EmployeeId(10),
                status: Decision::Rejected,
            }]
        );
    }

    #[tokio::test]
    async fn second_pop_is_no_pending_item() {
        let (_queue, endpoint) = endpoint(ScriptedForwarder::default());

        let first = endpoint.decide(EmployeeId(10), RequestId(1), ProcessAction::Approve, "c");
        first.await.expect("first decision");
        let again =
            endpoint.decide(EmployeeId(10), RequestId(1), ProcessAction::Approve, "c").await;

        assert!(matches!(again, Err(ApplicationError::NoPendingItem { .. })));
    }

    #[tokio::test]
    async fn transient_forward_failure_restores_item_at_head() {
        let (queue, endpoint) = endpoint(ScriptedForwarder::failing_with(
            ApplicationError::Upstream("request service down".to_string()),
        ));

        let result =
            endpoint.decide(EmployeeId(10), RequestId(2), ProcessAction::Approve, "c").await;
        assert!(matches!(result, Err(ApplicationError::Upstream(_))));

        let order: Vec<_> =
            queue.list_pending(EmployeeId(10)).into_iter().map(|item| item.request_id.0).collect();
        assert_eq!(order, vec![2, 1]);

        let retried =
            endpoint.decide(EmployeeId(10), RequestId(2), ProcessAction::Approve, "c").await;
        assert!(retried.is_ok());
    }

    /// The request side commits and dispatches the next step, but the reply
    /// never makes it back.
    struct CommitsThenTimesOut {
        queue: Arc<InMemoryWorkQueue>,
    }

    #[async_trait]
    impl DecisionForwarder for CommitsThenTimesOut {
        async fn forward(
            &self,
            decision: &StepDecision,
            _correlation_id: &str,
        ) -> Result<(), ApplicationError> {
            let mut next_step = item(decision.request_id.0, 20);
            next_step.step_number = decision.step + 1;
            self.queue.enqueue(next_step);
            Err(ApplicationError::Upstream("request service timed out".to_string()))
        }
    }

    #[tokio::test]
    async fn failed_forward_is_not_restored_once_the_next_step_is_queued() {
        let queue = Arc::new(InMemoryWorkQueue::new());
        queue.enqueue(item(1, 10));
        queue.enqueue(item(2, 10));
        let forwarder = CommitsThenTimesOut { queue: Arc::clone(&queue) };
        let endpoint = DecisionEndpoint::new(queue.clone(), Arc::new(forwarder));

        let result =
            endpoint.decide(EmployeeId(10), RequestId(1), ProcessAction::Approve, "c").await;
        assert!(matches!(result, Err(ApplicationError::Upstream(_))));

        let first_approver: Vec<_> =
            queue.list_pending(EmployeeId(10)).into_iter().map(|item| item.request_id.0).collect();
        assert_eq!(first_approver, vec![2]);
        let next = queue.list_pending(EmployeeId(20));
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].step_number, 2);
    }

    #[tokio::test]
    async fn domain_refusal_drops_the_item() {
        let (queue, endpoint) =
            endpoint(ScriptedForwarder::failing_with(ApplicationError::Domain(
                DomainError::StepAlreadyDecided { request_id: RequestId(1), step: 1 },
            )));

        let result =
            endpoint.decide(EmployeeId(10), RequestId(1), ProcessAction::Approve, "c").await;
        assert!(matches!(result, Err(ApplicationError::Domain(_))));
        assert_eq!(queue.list_pending(EmployeeId(10)).len(), 1);
    }

    #[tokio::test]
    async fn router_lists_and_decides() {
        let (_queue, endpoint) = endpoint(ScriptedForwarder::default());
        let app = router(Arc::new(endpoint));

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/process/10").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let listed: Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(listed.as_array().map(Vec::len), Some(2));
        assert_eq!(listed[0]["requestId"], 1);
        assert_eq!(listed[0]["step"], 1);

        let decide = |request: i64, action: Value| {
            Request::builder()
                .method("POST")
                .uri(format!("/process/10/{request}"))
                .header("content-type", "application/json")
                .body(Body::from(json!({ "action": action }).to_string()))
                .expect("request")
        };

        let response = app.clone().oneshot(decide(1, json!("approve"))).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.clone().oneshot(decide(1, json!("approve"))).await.expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app.oneshot(decide(2, json!("maybe"))).await.expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
