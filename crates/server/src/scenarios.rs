//! End-to-end runs through both sides wired in one process: the request
//! service, a direct channel, the approver queue and the decision endpoint.

use std::sync::Arc;

use chrono::NaiveDate;
use signoff_core::domain::approval::{
    AggregateStatus, Decision, EmployeeId, LeaveInfo, NewApprovalRequest, RequestId,
    RequestType, StepDecision, StepDraft, StepStatus,
};
use signoff_core::domain::work::{ProcessAction, WorkMessage};
use signoff_core::errors::{ApplicationError, DomainError};
use signoff_core::queue::{InMemoryWorkQueue, MessageOutcome, WorkQueue};
use signoff_db::repositories::{InMemoryApprovalRepository, InMemoryIdSequencer};

use crate::channel::{handle_payload, DirectChannel};
use crate::collaborators::testing::RecordingCollaborators;
use crate::forwarder::InProcessForwarder;
use crate::process::DecisionEndpoint;
use crate::workflow::ApprovalService;

struct Harness {
    service: Arc<ApprovalService>,
    queue: Arc<InMemoryWorkQueue>,
    endpoint: DecisionEndpoint,
    collaborators: Arc<RecordingCollaborators>,
}

impl Harness {
    fn new() -> Self {
        let queue = Arc::new(InMemoryWorkQueue::new());
        let collaborators = Arc::new(RecordingCollaborators::with_employees([1, 10, 20]));
        let service = Arc::new(ApprovalService::new(
            Arc::new(InMemoryApprovalRepository::default()),
            Arc::new(InMemoryIdSequencer::default()),
            Arc::new(DirectChannel::new(queue.clone())),
            collaborators.clone(),
            collaborators.clone(),
            collaborators.clone(),
        ));
        let endpoint = DecisionEndpoint::new(
            queue.clone(),
            Arc::new(InProcessForwarder::new(Arc::clone(&service))),
        );
        Self { service, queue, endpoint, collaborators }
    }

    fn pending_for(&self, approver: i64) -> Vec<i64> {
        self.queue
            .list_pending(EmployeeId(approver))
            .into_iter()
            .map(|item| item.request_id.0)
            .collect()
    }

    async fn decide(
        &self,
        approver: i64,
        request: RequestId,
        action: ProcessAction,
    ) -> Result<(), ApplicationError> {
        self.endpoint.decide(EmployeeId(approver), request, action, "scenario").await.map(|_| ())
    }

    async fn status(&self, request: RequestId) -> AggregateStatus {
        self.service.get_request(request).await.expect("stored request").aggregate_status
    }
}

fn two_step(request_type: RequestType) -> NewApprovalRequest {
    let leave_info = (request_type == RequestType::Leave).then(|| LeaveInfo {
        start_date: NaiveDate::from_ymd_opt(2026, 11, 2).expect("date"),
        end_date: NaiveDate::from_ymd_opt(2026, 11, 6).expect("date"),
        days: 5,
        leave_type: "annual".to_string(),
        reason: None,
    });
    NewApprovalRequest {
        requester_id: EmployeeId(1),
        title: "Offsite".to_string(),
        content: "Team offsite budget".to_string(),
        steps: vec![
            StepDraft { step: 1, approver_id: EmployeeId(10) },
            StepDraft { step: 2, approver_id: EmployeeId(20) },
        ],
        request_type,
        leave_info,
    }
}

#[tokio::test]
async fn sequential_approval_moves_work_from_step_to_step() {
    let harness = Harness::new();
    let id = harness.service.create_request(two_step(RequestType::General), "s").await.expect("id");

    assert_eq!(harness.pending_for(10), vec![id.0]);
    assert!(harness.pending_for(20).is_empty());

    harness.decide(10, id, ProcessAction::Approve).await.expect("step 1");
    assert_eq!(harness.status(id).await, AggregateStatus::InProgress);
    assert!(harness.pending_for(10).is_empty());
    assert_eq!(harness.pending_for(20), vec![id.0]);

    harness.decide(20, id, ProcessAction::Approve).await.expect("step 2");
    assert_eq!(harness.status(id).await, AggregateStatus::Approved);
    assert!(harness.pending_for(10).is_empty());
    assert!(harness.pending_for(20).is_empty());
    assert!(harness.collaborators.leaves().is_empty());
}

#[tokio::test]
async fn rejection_at_first_step_ends_the_request() {
    let harness = Harness::new();
    let id = harness.service.create_request(two_step(RequestType::General), "s").await.expect("id");

    harness.decide(10, id, ProcessAction::Reject).await.expect("reject");

    assert_eq!(harness.status(id).await, AggregateStatus::Rejected);
    assert!(harness.pending_for(20).is_empty());

    let stored = harness.service.get_request(id).await.expect("stored");
    assert_eq!(stored.steps[1].status, StepStatus::Pending);
}

#[tokio::test]
async fn popping_an_absent_item_is_not_found() {
    let harness = Harness::new();
    let id = harness.service.create_request(two_step(RequestType::General), "s").await.expect("id");

    let wrong_approver = harness.decide(20, id, ProcessAction::Approve).await;
    assert!(matches!(wrong_approver, Err(ApplicationError::NoPendingItem { .. })));

    harness.decide(10, id, ProcessAction::Approve).await.expect("first pop");
    let second = harness.decide(10, id, ProcessAction::Approve).await;
    assert!(matches!(second, Err(ApplicationError::NoPendingItem { .. })));
}

#[tokio::test]
async fn leave_confirmation_fires_once_for_an_approved_leave() {
    let harness = Harness::new();
    let id = harness.service.create_request(two_step(RequestType::Leave), "s").await.expect("id");

    harness.decide(10, id, ProcessAction::Approve).await.expect("step 1");
    assert!(harness.collaborators.leaves().is_empty());

    harness.decide(20, id, ProcessAction::Approve).await.expect("step 2");
    let leaves = harness.collaborators.leaves();
    assert_eq!(leaves.len(), 1);
    assert_eq!(leaves[0].request_id, id);
    assert_eq!(leaves[0].days, 5);
}

#[tokio::test]
async fn rejected_leave_is_never_confirmed() {
    let harness = Harness::new();
    let id = harness.service.create_request(two_step(RequestType::Leave), "s").await.expect("id");

    harness.decide(10, id, ProcessAction::Approve).await.expect("step 1");
    harness.decide(20, id, ProcessAction::Reject).await.expect("step 2");

    assert_eq!(harness.status(id).await, AggregateStatus::Rejected);
    assert!(harness.collaborators.leaves().is_empty());
}

#[tokio::test]
async fn each_decision_notifies_requester_and_approver() {
    let harness = Harness::new();
    let id = harness.service.create_request(two_step(RequestType::General), "s").await.expect("id");

    harness.decide(10, id, ProcessAction::Approve).await.expect("step 1");
    harness.decide(20, id, ProcessAction::Approve).await.expect("step 2");

    let recipients: Vec<_> =
        harness.collaborators.notifications().iter().map(|n| n.employee_id.0).collect();
    assert_eq!(recipients, vec![1, 10, 1, 20]);
}

#[tokio::test]
async fn redelivered_message_does_not_duplicate_work() {
    let harness = Harness::new();
    let id = harness.service.create_request(two_step(RequestType::General), "s").await.expect("id");
    let request = harness.service.get_request(id).await.expect("stored");

    let payload = WorkMessage::from_request(&request).to_bytes().expect("encode");
    handle_payload(harness.queue.as_ref(), &payload);
    handle_payload(harness.queue.as_ref(), &payload);

    assert_eq!(harness.pending_for(10), vec![id.0]);
}

#[tokio::test]
async fn replayed_creation_message_cannot_requeue_a_decided_step() {
    let harness = Harness::new();
    let id = harness.service.create_request(two_step(RequestType::General), "s").await.expect("id");
    let snapshot = harness.service.get_request(id).await.expect("stored");

    harness.decide(10, id, ProcessAction::Approve).await.expect("step 1");

    let payload = WorkMessage::from_request(&snapshot).to_bytes().expect("encode");
    let outcome = handle_payload(harness.queue.as_ref(), &payload);
    assert!(matches!(outcome, MessageOutcome::Duplicate { step: 1, .. }));

    assert!(harness.pending_for(10).is_empty());
    assert_eq!(harness.pending_for(20), vec![id.0]);
}

#[tokio::test]
async fn redispatch_during_an_in_flight_decision_leaves_one_item() {
    let harness = Harness::new();
    let id = harness.service.create_request(two_step(RequestType::General), "s").await.expect("id");

    // Step 1 is popped and its decision is in flight when redispatch runs.
    let in_flight = harness.queue.pop_item(EmployeeId(10), id).expect("queued");
    harness.service.redispatch_open("s").await.expect("redispatch");
    assert_eq!(harness.pending_for(10), vec![id.0]);

    let decision = StepDecision {
        request_id: id,
        step: in_flight.step_number,
        approver_id: EmployeeId(10),
        status: Decision::Approved,
    };
    harness.service.apply_step_decision(&decision, "s").await.expect("step 1");

    assert!(harness.pending_for(10).is_empty());
    assert_eq!(harness.pending_for(20), vec![id.0]);
}

#[tokio::test]
async fn stale_item_for_a_decided_step_is_refused_and_dropped() {
    let harness = Harness::new();
    let id = harness.service.create_request(two_step(RequestType::General), "s").await.expect("id");
    let stale = harness.queue.list_pending(EmployeeId(10)).remove(0);

    harness.decide(10, id, ProcessAction::Approve).await.expect("step 1");
    // Step 2 is popped, so nothing newer is queued when the stale item comes back.
    let step_two = harness.queue.pop_item(EmployeeId(20), id).expect("step 2 queued");
    assert!(harness.queue.enqueue(stale));

    let replayed = harness.decide(10, id, ProcessAction::Approve).await;
    assert!(matches!(
        replayed,
        Err(ApplicationError::Domain(DomainError::StepAlreadyDecided { step: 1, .. }))
    ));
    assert!(harness.pending_for(10).is_empty());

    harness.queue.restore(step_two);
    assert_eq!(harness.pending_for(20), vec![id.0]);
}
