use std::collections::BTreeMap;

use tokio::sync::{Mutex, RwLock};

use signoff_core::domain::approval::{aggregate_status, ApprovalRequest, RequestId, StepStatus};

use super::{ApprovalRepository, IdSequencer, RepositoryError};

#[derive(Default)]
pub struct InMemoryApprovalRepository {
    requests: RwLock<BTreeMap<RequestId, ApprovalRequest>>,
}

#[async_trait::async_trait]
impl ApprovalRepository for InMemoryApprovalRepository {
    async fn insert(&self, request: &ApprovalRequest) -> Result<(), RepositoryError> {
        let mut requests = self.requests.write().await;
        if requests.contains_key(&request.request_id) {
            return Err(RepositoryError::Decode(format!(
                "request {} already exists",
                request.request_id
            )));
        }
        requests.insert(request.request_id, request.clone());
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: RequestId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        Ok(requests.get(&id).cloned())
    }

    async fn list(&self, limit: u32) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        Ok(requests.values().take(limit as usize).cloned().collect())
    }

    async fn list_open(&self) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        Ok(requests
            .values()
            .filter(|request| !request.aggregate_status.is_terminal())
            .cloned()
            .collect())
    }

    async fn record_decision(
        &self,
        request: &ApprovalRequest,
        step_number: u32,
    ) -> Result<ApprovalRequest, RepositoryError> {
        let stale =
            RepositoryError::StaleWrite { request_id: request.request_id, step: step_number };
        let Some(decided) = request.step(step_number) else {
            return Err(stale);
        };
        let mut requests = self.requests.write().await;
        let Some(stored) = requests.get_mut(&request.request_id) else {
            return Err(stale);
        };
        if stored.aggregate_status.is_terminal() {
            return Err(stale);
        }
        let Some(slot) = stored.steps.iter_mut().find(|step| {
            step.step_number == step_number
                && step.approver_id == decided.approver_id
                && step.status == StepStatus::Pending
        }) else {
            return Err(stale);
        };

        *slot = decided.clone();
        stored.aggregate_status = aggregate_status(&stored.steps);
        stored.updated_at = request.updated_at;
        Ok(stored.clone())
    }
}

/// Process-local counter for tests and single-process development setups.
#[derive(Default)]
pub struct InMemoryIdSequencer {
    last: Mutex<i64>,
}

#[async_trait::async_trait]
impl IdSequencer for InMemoryIdSequencer {
    async fn next_request_id(&self) -> Result<RequestId, RepositoryError> {
        let mut last = self.last.lock().await;
        *last += 1;
        Ok(RequestId(*last))
    }
}
