//! Request-side workflow: creation, step decisions and the follow-up work each
//! decision triggers.

use std::sync::Arc;

use chrono::Utc;
use signoff_core::domain::approval::{ApprovalRequest, NewApprovalRequest, RequestId, StepDecision};
use signoff_core::domain::work::{ApprovalNotification, LeaveConfirmation, WorkMessage};
use signoff_core::errors::{ApplicationError, DomainError};
use signoff_db::repositories::{ApprovalRepository, IdSequencer, RepositoryError};
use tracing::{error, info, warn};

use crate::channel::WorkPublisher;
use crate::collaborators::{EmployeeDirectory, LeaveConfirmer, NotificationSink};

/// Upper bound on `GET /approvals`.
pub const LIST_LIMIT: u32 = 1000;

#[derive(Clone, Debug)]
pub struct DecisionOutcome {
    pub request: ApprovalRequest,
    /// Whether the next active step was handed to the channel.
    pub dispatched: bool,
}

pub struct ApprovalService {
    repository: Arc<dyn ApprovalRepository>,
    sequencer: Arc<dyn IdSequencer>,
    publisher: Arc<dyn WorkPublisher>,
    employees: Arc<dyn EmployeeDirectory>,
    notifications: Arc<dyn NotificationSink>,
    leaves: Arc<dyn LeaveConfirmer>,
}

fn persistence(error: RepositoryError) -> ApplicationError {
    match error {
        RepositoryError::StaleWrite { request_id, step } => {
            ApplicationError::Domain(DomainError::StepAlreadyDecided { request_id, step })
        }
        RepositoryError::Decode(_) => ApplicationError::Internal(error.to_string()),
        RepositoryError::Database(_) => ApplicationError::Persistence(error.to_string()),
    }
}

impl ApprovalService {
    pub fn new(
        repository: Arc<dyn ApprovalRepository>,
        sequencer: Arc<dyn IdSequencer>,
        publisher: Arc<dyn WorkPublisher>,
        employees: Arc<dyn EmployeeDirectory>,
        notifications: Arc<dyn NotificationSink>,
        leaves: Arc<dyn LeaveConfirmer>,
    ) -> Self {
        Self { repository, sequencer, publisher, employees, notifications, leaves }
    }

    pub async fn create_request(
        &self,
        candidate: NewApprovalRequest,
        correlation_id: &str,
    ) -> Result<RequestId, ApplicationError> {
        candidate.validate()?;

        for employee_id in candidate.employee_ids() {
            match self.employees.exists(employee_id).await {
                Ok(true) => {}
                Ok(false) => return Err(ApplicationError::UnknownEmployee(employee_id)),
                Err(lookup_error) => {
                    warn!(
                        event_name = "approval.request.employee_lookup_failed",
                        correlation_id,
                        employee_id = employee_id.0,
                        error = %lookup_error,
                        "employee lookup failed"
                    );
                    return Err(ApplicationError::Upstream(lookup_error.to_string()));
                }
            }
        }

        let request_id = self.sequencer.next_request_id().await.map_err(persistence)?;
        let request = candidate.into_request(request_id, Utc::now())?;
        self.repository.insert(&request).await.map_err(persistence)?;

        info!(
            event_name = "approval.request.created",
            correlation_id,
            request_id = request_id.0,
            requester_id = request.requester_id.0,
            steps = request.steps.len(),
            request_type = request.request_type.as_str(),
            "approval request created"
        );

        self.publish(&request, correlation_id).await.map_err(|publish_error| {
            error!(
                event_name = "approval.request.publish_failed",
                correlation_id,
                request_id = request_id.0,
                error = %publish_error,
                "request stored but first step was not dispatched"
            );
            publish_error
        })?;

        Ok(request_id)
    }

    pub async fn get_request(&self, id: RequestId) -> Result<ApprovalRequest, ApplicationError> {
        self.repository
            .find_by_id(id)
            .await
            .map_err(persistence)?
            .ok_or(ApplicationError::RequestNotFound(id))
    }

    pub async fn list_requests(&self) -> Result<Vec<ApprovalRequest>, ApplicationError> {
        self.repository.list(LIST_LIMIT).await.map_err(persistence)
    }

    /// Records the decision, then dispatches the next step, confirms leave and
    /// notifies. Nothing after the commit can fail the call.
    pub async fn apply_step_decision(
        &self,
        decision: &StepDecision,
        correlation_id: &str,
    ) -> Result<DecisionOutcome, ApplicationError> {
        let mut request = self.get_request(decision.request_id).await?;

        request.apply_decision(decision.step, decision.approver_id, decision.status, Utc::now())?;
        // Everything below works from the stored request: a concurrent decision
        // on another step may have landed since `request` was read.
        let request =
            self.repository.record_decision(&request, decision.step).await.map_err(persistence)?;
        let aggregate = request.aggregate_status;

        info!(
            event_name = "approval.step.decided",
            correlation_id,
            request_id = request.request_id.0,
            step = decision.step,
            approver_id = decision.approver_id.0,
            decision = decision.status.as_str(),
            final_status = aggregate.as_str(),
            "step decision recorded"
        );

        let dispatched = if request.needs_dispatch() {
            match self.publish(&request, correlation_id).await {
                Ok(()) => true,
                Err(publish_error) => {
                    error!(
                        event_name = "approval.step.dispatch_failed",
                        correlation_id,
                        request_id = request.request_id.0,
                        error = %publish_error,
                        "decision committed but next step was not dispatched"
                    );
                    false
                }
            }
        } else {
            false
        };

        if let Some(leave) = LeaveConfirmation::from_request(&request) {
            if let Err(side_effect_error) = self.leaves.confirm_leave(&leave).await {
                warn!(
                    event_name = "approval.leave.confirm_failed",
                    correlation_id,
                    request_id = request.request_id.0,
                    employee_id = leave.employee_id.0,
                    error = %side_effect_error,
                    "leave confirmation failed"
                );
            }
        }

        let notifications = ApprovalNotification::for_recipients(
            &request,
            decision.step,
            decision.approver_id,
            decision.status,
        );
        for notification in &notifications {
            if let Err(side_effect_error) = self.notifications.notify(notification).await {
                warn!(
                    event_name = "approval.notification.failed",
                    correlation_id,
                    request_id = request.request_id.0,
                    employee_id = notification.employee_id.0,
                    error = %side_effect_error,
                    "notification failed"
                );
            }
        }

        Ok(DecisionOutcome { request, dispatched })
    }

    /// Republishes the active step of every open request. Safe to repeat: the
    /// queue drops an item it already holds.
    pub async fn redispatch_open(&self, correlation_id: &str) -> Result<usize, ApplicationError> {
        let open = self.repository.list_open().await.map_err(persistence)?;
        let mut dispatched = 0;
        for request in open.iter().filter(|request| request.active_step().is_some()) {
            self.publish(request, correlation_id).await?;
            dispatched += 1;
        }

        info!(
            event_name = "approval.redispatch.completed",
            correlation_id,
            open_requests = open.len(),
            dispatched,
            "open requests redispatched"
        );
        Ok(dispatched)
    }

    async fn publish(
        &self,
        request: &ApprovalRequest,
        correlation_id: &str,
    ) -> Result<(), ApplicationError> {
        let message = WorkMessage::from_request(request);
        self.publisher
            .publish(&message)
            .await
            .map_err(|publish_error| ApplicationError::Channel(publish_error.to_string()))?;

        info!(
            event_name = "approval.work.published",
            correlation_id,
            request_id = request.request_id.0,
            active_step = message.active_step().map(|step| step.step),
            channel = self.publisher.kind().as_str(),
            "work message published"
        );
        Ok(())
    }
}
