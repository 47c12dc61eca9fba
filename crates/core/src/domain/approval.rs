use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub i64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmployeeId(pub i64);

impl fmt::Display for EmployeeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Approved,
    Rejected,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Request-level outcome. Always derived from the step statuses, see
/// [`aggregate_status`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateStatus {
    Pending,
    InProgress,
    Approved,
    Rejected,
}

impl AggregateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestType {
    #[default]
    General,
    Leave,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "GENERAL",
            Self::Leave => "LEAVE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "GENERAL" => Some(Self::General),
            "LEAVE" => Some(Self::Leave),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveInfo {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days: u32,
    #[serde(default = "default_leave_type")]
    pub leave_type: String,
    #[serde(default)]
    pub reason: Option<String>,
}

fn default_leave_type() -> String {
    "annual".to_string()
}

/// A step as supplied by the requester, before the request is stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDraft {
    pub step: u32,
    pub approver_id: EmployeeId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepState {
    #[serde(rename = "step")]
    pub step_number: u32,
    pub approver_id: EmployeeId,
    pub status: StepStatus,
    #[serde(rename = "updatedAt")]
    pub decided_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub request_id: RequestId,
    pub requester_id: EmployeeId,
    pub title: String,
    pub content: String,
    pub steps: Vec<StepState>,
    #[serde(rename = "finalStatus")]
    pub aggregate_status: AggregateStatus,
    pub request_type: RequestType,
    pub leave_info: Option<LeaveInfo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The decision an approver records against their step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl From<Decision> for StepStatus {
    fn from(value: Decision) -> Self {
        match value {
            Decision::Approved => StepStatus::Approved,
            Decision::Rejected => StepStatus::Rejected,
        }
    }
}

/// Body of `POST /approvals/internal/result`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDecision {
    pub request_id: RequestId,
    pub step: u32,
    pub approver_id: EmployeeId,
    pub status: Decision,
}

/// Body of `POST /approvals`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewApprovalRequest {
    pub requester_id: EmployeeId,
    pub title: String,
    pub content: String,
    pub steps: Vec<StepDraft>,
    #[serde(default)]
    pub request_type: RequestType,
    #[serde(default)]
    pub leave_info: Option<LeaveInfo>,
}

impl NewApprovalRequest {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.requester_id.0 < 1 {
            return Err(DomainError::InvalidField("requesterId must be >= 1".to_string()));
        }
        if self.title.trim().is_empty() {
            return Err(DomainError::InvalidField("title must not be empty".to_string()));
        }
        if self.content.trim().is_empty() {
            return Err(DomainError::InvalidField("content must not be empty".to_string()));
        }
        if let Some(step) = self.steps.iter().find(|step| step.approver_id.0 < 1) {
            return Err(DomainError::InvalidField(format!(
                "approverId for step {} must be >= 1",
                step.step
            )));
        }

        validate_step_sequence(&self.steps)?;

        match (self.request_type, &self.leave_info) {
            (RequestType::Leave, None) => Err(DomainError::MissingLeaveInfo),
            (RequestType::General, Some(_)) => Err(DomainError::UnexpectedLeaveInfo),
            (RequestType::Leave, Some(leave)) if leave.end_date < leave.start_date => {
                Err(DomainError::InvalidField(
                    "leaveInfo.endDate must not precede leaveInfo.startDate".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }

    /// Requester plus every approver, each once.
    pub fn employee_ids(&self) -> BTreeSet<EmployeeId> {
        std::iter::once(self.requester_id)
            .chain(self.steps.iter().map(|step| step.approver_id))
            .collect()
    }

    pub fn into_request(
        self,
        request_id: RequestId,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest, DomainError> {
        self.validate()?;

        let mut steps: Vec<StepState> = self
            .steps
            .into_iter()
            .map(|draft| StepState {
                step_number: draft.step,
                approver_id: draft.approver_id,
                status: StepStatus::Pending,
                decided_at: None,
            })
            .collect();
        steps.sort_by_key(|step| step.step_number);

        Ok(ApprovalRequest {
            request_id,
            requester_id: self.requester_id,
            title: self.title,
            content: self.content,
            steps,
            aggregate_status: AggregateStatus::Pending,
            request_type: self.request_type,
            leave_info: self.leave_info,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Step numbers must be exactly `1..=N`, each once, in any input order.
pub fn validate_step_sequence(steps: &[StepDraft]) -> Result<(), DomainError> {
    if steps.is_empty() {
        return Err(DomainError::InvalidSteps("steps must not be empty".to_string()));
    }

    let mut numbers: Vec<u32> = steps.iter().map(|step| step.step).collect();
    numbers.sort_unstable();

    for (expected, actual) in (1u32..).zip(numbers.iter()) {
        if *actual != expected {
            return Err(DomainError::InvalidSteps(
                "steps must start at 1 and be consecutive in ascending order".to_string(),
            ));
        }
    }

    Ok(())
}

/// Order of checks matters: a single rejection decides the request no matter
/// how many steps are still pending.
pub fn aggregate_status(steps: &[StepState]) -> AggregateStatus {
    if steps.iter().any(|step| step.status == StepStatus::Rejected) {
        AggregateStatus::Rejected
    } else if steps.iter().all(|step| step.status == StepStatus::Approved) {
        AggregateStatus::Approved
    } else if steps.iter().any(|step| step.status == StepStatus::Approved) {
        AggregateStatus::InProgress
    } else {
        AggregateStatus::Pending
    }
}

impl ApprovalRequest {
    /// Lowest-numbered pending step, if the request is still open.
    pub fn active_step(&self) -> Option<&StepState> {
        if self.aggregate_status.is_terminal() {
            return None;
        }
        self.steps
            .iter()
            .filter(|step| step.status == StepStatus::Pending)
            .min_by_key(|step| step.step_number)
    }

    pub fn step(&self, step_number: u32) -> Option<&StepState> {
        self.steps.iter().find(|step| step.step_number == step_number)
    }

    /// Records a decision on the step matching both `step_number` and
    /// `approver_id`, then recomputes the aggregate. This is the only mutation
    /// path for steps; the aggregate is always refreshed alongside.
    pub fn apply_decision(
        &mut self,
        step_number: u32,
        approver_id: EmployeeId,
        decision: Decision,
        now: DateTime<Utc>,
    ) -> Result<AggregateStatus, DomainError> {
        let request_id = self.request_id;
        let terminal = self.aggregate_status.is_terminal();

        let step = self
            .steps
            .iter_mut()
            .find(|step| step.step_number == step_number && step.approver_id == approver_id)
            .ok_or(DomainError::StepMismatch { request_id, step: step_number, approver_id })?;

        if terminal || step.status != StepStatus::Pending {
            return Err(DomainError::StepAlreadyDecided { request_id, step: step_number });
        }

        step.status = decision.into();
        step.decided_at = Some(now);

        self.aggregate_status = aggregate_status(&self.steps);
        self.updated_at = now;
        Ok(self.aggregate_status)
    }

    pub fn needs_dispatch(&self) -> bool {
        self.aggregate_status == AggregateStatus::InProgress
    }

    pub fn leave_confirmation_due(&self) -> bool {
        self.request_type == RequestType::Leave
            && self.aggregate_status == AggregateStatus::Approved
            && self.leave_info.is_some()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};

    use super::{
        aggregate_status, validate_step_sequence, AggregateStatus, Decision, EmployeeId,
        LeaveInfo, NewApprovalRequest, RequestId, RequestType, StepDraft, StepState, StepStatus,
    };
    use crate::errors::DomainError;

    fn draft(step: u32, approver: i64) -> StepDraft {
        StepDraft { step, approver_id: EmployeeId(approver) }
    }

    fn state(step: u32, status: StepStatus) -> StepState {
        StepState {
            step_number: step,
            approver_id: EmployeeId(step as i64 * 10),
            status,
            decided_at: None,
        }
    }

    fn candidate(steps: Vec<StepDraft>) -> NewApprovalRequest {
        NewApprovalRequest {
            requester_id: EmployeeId(1),
            title: "Laptop purchase".to_string(),
            content: "New laptop for onboarding".to_string(),
            steps,
            request_type: RequestType::General,
            leave_info: None,
        }
    }

    fn leave_info() -> LeaveInfo {
        LeaveInfo {
            start_date: NaiveDate::from_ymd_opt(2026, 11, 2).expect("valid date"),
            end_date: NaiveDate::from_ymd_opt(2026, 11, 4).expect("valid date"),
            days: 3,
            leave_type: "annual".to_string(),
            reason: Some("family trip".to_string()),
        }
    }

    #[test]
    fn step_sequence_rejects_gaps_and_offsets() {
        assert!(matches!(
            validate_step_sequence(&[draft(1, 10), draft(3, 20)]),
            Err(DomainError::InvalidSteps(_))
        ));
        assert!(matches!(
            validate_step_sequence(&[draft(2, 10), draft(3, 20)]),
            Err(DomainError::InvalidSteps(_))
        ));
        assert!(matches!(
            validate_step_sequence(&[draft(1, 10), draft(1, 20)]),
            Err(DomainError::InvalidSteps(_))
        ));
        assert!(matches!(validate_step_sequence(&[]), Err(DomainError::InvalidSteps(_))));
    }

    #[test]
    fn step_sequence_accepts_any_permutation() {
        assert!(validate_step_sequence(&[draft(2, 20), draft(1, 10)]).is_ok());
        assert!(validate_step_sequence(&[draft(3, 30), draft(1, 10), draft(2, 20)]).is_ok());
        assert!(validate_step_sequence(&[draft(1, 10)]).is_ok());
    }

    #[test]
    fn aggregate_follows_ordered_rules() {
        use StepStatus::{Approved, Pending, Rejected};

        assert_eq!(
            aggregate_status(&[state(1, Approved), state(2, Pending)]),
            AggregateStatus::InProgress
        );
        assert_eq!(
            aggregate_status(&[state(1, Approved), state(2, Approved)]),
            AggregateStatus::Approved
        );
        assert_eq!(
            aggregate_status(&[state(1, Rejected), state(2, Pending)]),
            AggregateStatus::Rejected
        );
        assert_eq!(
            aggregate_status(&[state(1, Approved), state(2, Rejected), state(3, Pending)]),
            AggregateStatus::Rejected
        );
        assert_eq!(
            aggregate_status(&[state(1, Pending), state(2, Pending)]),
            AggregateStatus::Pending
        );
    }

    #[test]
    fn leave_request_requires_leave_info() {
        let mut leave = candidate(vec![draft(1, 10)]);
        leave.request_type = RequestType::Leave;
        assert_eq!(leave.validate(), Err(DomainError::MissingLeaveInfo));

        leave.leave_info = Some(leave_info());
        assert_eq!(leave.validate(), Ok(()));

        let mut general = candidate(vec![draft(1, 10)]);
        general.leave_info = Some(leave_info());
        assert_eq!(general.validate(), Err(DomainError::UnexpectedLeaveInfo));
    }

    #[test]
    fn into_request_sorts_steps_and_starts_pending() {
        let request = candidate(vec![draft(2, 20), draft(1, 10)])
            .into_request(RequestId(7), Utc::now())
            .expect("valid candidate");

        assert_eq!(request.request_id, RequestId(7));
        assert_eq!(request.aggregate_status, AggregateStatus::Pending);
        assert_eq!(
            request.steps.iter().map(|step| step.step_number).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert!(request.steps.iter().all(|step| step.status == StepStatus::Pending));
        assert_eq!(request.active_step().map(|step| step.approver_id), Some(EmployeeId(10)));
    }

    #[test]
    fn employee_ids_deduplicate_requester_and_approvers() {
        let mut request = candidate(vec![draft(1, 10), draft(2, 1), draft(3, 10)]);
        request.requester_id = EmployeeId(1);

        let ids: Vec<_> = request.employee_ids().into_iter().collect();
        assert_eq!(ids, vec![EmployeeId(1), EmployeeId(10)]);
    }

    #[test]
    fn apply_decision_requires_matching_step_and_approver() {
        let mut request = candidate(vec![draft(1, 10), draft(2, 20)])
            .into_request(RequestId(1), Utc::now())
            .expect("valid candidate");
        let before = request.clone();

        let result = request.apply_decision(1, EmployeeId(20), Decision::Approved, Utc::now());

        assert!(matches!(result, Err(DomainError::StepMismatch { step: 1, .. })));
        assert_eq!(request, before, "mismatch must leave the request untouched");
    }

    #[test]
    fn apply_decision_advances_then_finalizes() {
        let mut request = candidate(vec![draft(1, 10), draft(2, 20)])
            .into_request(RequestId(1), Utc::now())
            .expect("valid candidate");

        let status = request
            .apply_decision(1, EmployeeId(10), Decision::Approved, Utc::now())
            .expect("first decision");
        assert_eq!(status, AggregateStatus::InProgress);
        assert!(request.needs_dispatch());
        assert_eq!(request.active_step().map(|step| step.step_number), Some(2));
        assert!(request.steps[0].decided_at.is_some());

        let status = request
            .apply_decision(2, EmployeeId(20), Decision::Approved, Utc::now())
            .expect("second decision");
        assert_eq!(status, AggregateStatus::Approved);
        assert!(request.active_step().is_none());
    }

    #[test]
    fn terminal_requests_reject_further_decisions() {
        let mut request = candidate(vec![draft(1, 10), draft(2, 20)])
            .into_request(RequestId(3), Utc::now())
            .expect("valid candidate");

        request
            .apply_decision(1, EmployeeId(10), Decision::Rejected, Utc::now())
            .expect("rejection");
        assert_eq!(request.aggregate_status, AggregateStatus::Rejected);

        let again = request.apply_decision(2, EmployeeId(20), Decision::Approved, Utc::now());
        assert!(matches!(again, Err(DomainError::StepAlreadyDecided { step: 2, .. })));
        assert_eq!(request.steps[1].status, StepStatus::Pending);
    }

    #[test]
    fn leave_confirmation_due_only_for_approved_leave() {
        let mut leave = candidate(vec![draft(1, 10)]);
        leave.request_type = RequestType::Leave;
        leave.leave_info = Some(leave_info());
        let mut request = leave.into_request(RequestId(9), Utc::now()).expect("valid");
        assert!(!request.leave_confirmation_due());

        request.apply_decision(1, EmployeeId(10), Decision::Approved, Utc::now()).expect("ok");
        assert!(request.leave_confirmation_due());

        let mut general = candidate(vec![draft(1, 10)])
            .into_request(RequestId(10), Utc::now())
            .expect("valid");
        general.apply_decision(1, EmployeeId(10), Decision::Approved, Utc::now()).expect("ok");
        assert!(!general.leave_confirmation_due());
    }

    #[test]
    fn wire_names_match_document_shape() {
        let request = candidate(vec![draft(1, 10)])
            .into_request(RequestId(4), Utc::now())
            .expect("valid");
        let json = serde_json::to_value(&request).expect("serialize");

        assert_eq!(json["requestId"], 4);
        assert_eq!(json["finalStatus"], "pending");
        assert_eq!(json["requestType"], "GENERAL");
        assert_eq!(json["steps"][0]["step"], 1);
        assert_eq!(json["steps"][0]["approverId"], 10);
        assert!(json["steps"][0]["updatedAt"].is_null());
    }
}
