use thiserror::Error;

use crate::domain::approval::{EmployeeId, RequestId};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid steps: {0}")]
    InvalidSteps(String),
    #[error("leaveInfo is required when requestType is LEAVE")]
    MissingLeaveInfo,
    #[error("leaveInfo is only accepted when requestType is LEAVE")]
    UnexpectedLeaveInfo,
    #[error("invalid field: {0}")]
    InvalidField(String),
    #[error("request {request_id} has no step {step} assigned to approver {approver_id}")]
    StepMismatch { request_id: RequestId, step: u32, approver_id: EmployeeId },
    #[error("step {step} of request {request_id} is already decided")]
    StepAlreadyDecided { request_id: RequestId, step: u32 },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("employee {0} not found in employee service")]
    UnknownEmployee(EmployeeId),
    #[error("approval request {0} not found")]
    RequestNotFound(RequestId),
    #[error("no pending work item for approver {approver_id} and request {request_id}")]
    NoPendingItem { approver_id: EmployeeId, request_id: RequestId },
    #[error("upstream failure: {0}")]
    Upstream(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("channel failure: {0}")]
    Channel(String),
    /// Stored data that no longer decodes; retrying will not help.
    #[error("internal failure: {0}")]
    Internal(String),
}

impl ApplicationError {
    /// Failures that say nothing about the decision itself; retrying the same
    /// call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Upstream(_) | Self::Persistence(_) | Self::Channel(_))
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("bad gateway: {message}")]
    BadGateway { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested resource does not exist.",
            Self::Conflict { .. } => "The resource has already been decided.",
            Self::BadGateway { .. } => "A dependent service failed to respond correctly.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::NotFound { message, .. }
            | Self::Conflict { message, .. }
            | Self::BadGateway { message, .. }
            | Self::ServiceUnavailable { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::BadGateway { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::BadGateway { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        let message = value.to_string();
        match value {
            ApplicationError::Domain(DomainError::StepAlreadyDecided { .. }) => {
                Self::Conflict { message, correlation_id }
            }
            ApplicationError::Domain(_) | ApplicationError::UnknownEmployee(_) => {
                Self::BadRequest { message, correlation_id }
            }
            ApplicationError::RequestNotFound(_) | ApplicationError::NoPendingItem { .. } => {
                Self::NotFound { message, correlation_id }
            }
            ApplicationError::Upstream(_) => Self::BadGateway { message, correlation_id },
            ApplicationError::Persistence(_) | ApplicationError::Channel(_) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Internal(_) => Self::Internal { message, correlation_id },
        }
    }
}
