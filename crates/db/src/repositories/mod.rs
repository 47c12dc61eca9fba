use async_trait::async_trait;
use thiserror::Error;

use signoff_core::domain::approval::{ApprovalRequest, RequestId};

pub mod approval;
pub mod memory;
pub mod sequence;

pub use approval::SqlApprovalRepository;
pub use memory::{InMemoryApprovalRepository, InMemoryIdSequencer};
pub use sequence::{SqlIdSequencer, APPROVAL_REQUEST_SEQUENCE};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    /// The stored row no longer matches what the caller decided against:
    /// the step was decided already or the request reached a terminal status.
    #[error("stale write for request {request_id} step {step}")]
    StaleWrite { request_id: RequestId, step: u32 },
}

#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    /// Stores the request and all of its steps in one transaction.
    async fn insert(&self, request: &ApprovalRequest) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: RequestId)
        -> Result<Option<ApprovalRequest>, RepositoryError>;

    /// Ascending by request id.
    async fn list(&self, limit: u32) -> Result<Vec<ApprovalRequest>, RepositoryError>;

    /// Requests whose aggregate status is still `pending` or `in_progress`.
    async fn list_open(&self) -> Result<Vec<ApprovalRequest>, RepositoryError>;

    /// Persists the decided step and returns the request as stored afterwards,
    /// with its aggregate recomputed from every stored step rather than taken
    /// from `request`. Fails with [`RepositoryError::StaleWrite`] and writes
    /// nothing when the stored step is no longer pending or the stored request
    /// is terminal.
    async fn record_decision(
        &self,
        request: &ApprovalRequest,
        step_number: u32,
    ) -> Result<ApprovalRequest, RepositoryError>;
}

#[async_trait]
pub trait IdSequencer: Send + Sync {
    /// Strictly increasing, never reused, safe under concurrent callers.
    async fn next_request_id(&self) -> Result<RequestId, RepositoryError>;
}
