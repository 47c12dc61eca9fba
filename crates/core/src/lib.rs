pub mod config;
pub mod domain;
pub mod errors;
pub mod queue;

pub use domain::approval::{
    aggregate_status, validate_step_sequence, AggregateStatus, ApprovalRequest, Decision,
    EmployeeId, LeaveInfo, NewApprovalRequest, RequestId, RequestType, StepDecision, StepDraft,
    StepState, StepStatus,
};
pub use domain::work::{
    ApprovalNotification, LeaveConfirmation, ProcessAction, StepMessage, WorkItem, WorkMessage,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use queue::{on_message, InMemoryWorkQueue, MessageOutcome, WorkQueue};
