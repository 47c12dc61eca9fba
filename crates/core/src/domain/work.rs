use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::approval::{
    AggregateStatus, ApprovalRequest, Decision, EmployeeId, RequestId, StepStatus,
};

/// Step snapshot carried on the channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepMessage {
    pub step: u32,
    pub approver_id: EmployeeId,
    pub status: StepStatus,
}

/// Published on creation and after every decision that leaves the request
/// `in_progress`. Carries the status of every step at publish time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkMessage {
    pub request_id: RequestId,
    pub requester_id: EmployeeId,
    pub title: String,
    pub content: String,
    pub steps: Vec<StepMessage>,
}

impl WorkMessage {
    pub fn from_request(request: &ApprovalRequest) -> Self {
        Self {
            request_id: request.request_id,
            requester_id: request.requester_id,
            title: request.title.clone(),
            content: request.content.clone(),
            steps: request
                .steps
                .iter()
                .map(|step| StepMessage {
                    step: step.step_number,
                    approver_id: step.approver_id,
                    status: step.status,
                })
                .collect(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Smallest-numbered pending step. This tie-break is what makes approval
    /// strictly sequential.
    pub fn active_step(&self) -> Option<&StepMessage> {
        self.steps
            .iter()
            .filter(|step| step.status == StepStatus::Pending)
            .min_by_key(|step| step.step)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub request_id: RequestId,
    #[serde(rename = "step")]
    pub step_number: u32,
    pub requester_id: EmployeeId,
    pub approver_id: EmployeeId,
    pub title: String,
    pub content: String,
    pub status: StepStatus,
}

impl WorkItem {
    pub fn for_step(message: &WorkMessage, step: &StepMessage) -> Self {
        Self {
            request_id: message.request_id,
            step_number: step.step,
            requester_id: message.requester_id,
            approver_id: step.approver_id,
            title: message.title.clone(),
            content: message.content.clone(),
            status: StepStatus::Pending,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessAction {
    Approve,
    Reject,
}

impl ProcessAction {
    pub fn decision(&self) -> Decision {
        match self {
            Self::Approve => Decision::Approved,
            Self::Reject => Decision::Rejected,
        }
    }
}

/// Payload pushed to the notification sink for the requester and for the
/// deciding approver.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalNotification {
    pub employee_id: EmployeeId,
    #[serde(rename = "type")]
    pub kind: String,
    pub request_id: RequestId,
    pub step: u32,
    pub approver_id: EmployeeId,
    pub final_status: AggregateStatus,
    pub step_status: Decision,
    pub title: String,
}

impl ApprovalNotification {
    pub const KIND: &'static str = "approval_result";

    pub fn for_recipients(
        request: &ApprovalRequest,
        step: u32,
        approver_id: EmployeeId,
        decision: Decision,
    ) -> [Self; 2] {
        let build = |employee_id| Self {
            employee_id,
            kind: Self::KIND.to_string(),
            request_id: request.request_id,
            step,
            approver_id,
            final_status: request.aggregate_status,
            step_status: decision,
            title: request.title.clone(),
        };
        [build(request.requester_id), build(approver_id)]
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveConfirmation {
    pub employee_id: EmployeeId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days: u32,
    pub leave_type: String,
    pub reason: Option<String>,
    pub request_id: RequestId,
}

impl LeaveConfirmation {
    /// `None` unless the request is an approved leave request.
    pub fn from_request(request: &ApprovalRequest) -> Option<Self> {
        if !request.leave_confirmation_due() {
            return None;
        }
        let leave = request.leave_info.as_ref()?;
        Some(Self {
            employee_id: request.requester_id,
            start_date: leave.start_date,
            end_date: leave.end_date,
            days: leave.days,
            leave_type: leave.leave_type.clone(),
            reason: leave.reason.clone(),
            request_id: request.request_id,
        })
    }
}
