//! Per-approver queue of pending work.
//!
//! The queue is process-local state. It is constructed once per process and
//! handed to whoever needs it as `Arc<dyn WorkQueue>`; nothing reaches it
//! through a global. Each operation runs start to finish under one mutex guard
//! with no suspension point inside, so check-then-mutate sequences are atomic
//! with respect to each other.
//!
//! A request has at most one queued item across all approvers: a later step
//! supersedes an earlier one, never the other way round.
//!
//! Two processes consuming the same channel each hold their own, inconsistent
//! view. One consumer per deployment.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use crate::domain::approval::{EmployeeId, RequestId};
use crate::domain::work::{WorkItem, WorkMessage};

pub trait WorkQueue: Send + Sync {
    /// Appends at the tail, evicting any queued item of the same request with a
    /// lower step. Returns `false` and leaves the queue unchanged when an item
    /// for the same request at this step or a later one is already queued.
    fn enqueue(&self, item: WorkItem) -> bool;

    /// Snapshot of the approver's queue, oldest first.
    fn list_pending(&self, approver_id: EmployeeId) -> Vec<WorkItem>;

    fn pop_item(&self, approver_id: EmployeeId, request_id: RequestId) -> Option<WorkItem>;

    /// Puts a popped item back at the head of its approver's queue, unless the
    /// request has moved on to this step or a later one in the meantime.
    fn restore(&self, item: WorkItem);

    /// Number of approvers with at least one queued item.
    fn approver_count(&self) -> usize;
}

type Queues = HashMap<EmployeeId, VecDeque<WorkItem>>;

#[derive(Default)]
pub struct InMemoryWorkQueue {
    queues: Mutex<Queues>,
}

impl InMemoryWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, Queues> {
        match self.queues.lock() {
            Ok(queues) => queues,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Makes room for `item` as the only queued item of its request. Returns
/// `false` without touching anything when the request already has an item at
/// the same step or later.
fn claim_request_slot(queues: &mut Queues, item: &WorkItem) -> bool {
    let superseded = queues.values().flatten().any(|queued| {
        queued.request_id == item.request_id && queued.step_number >= item.step_number
    });
    if superseded {
        return false;
    }

    for queue in queues.values_mut() {
        queue.retain(|queued| queued.request_id != item.request_id);
    }
    queues.retain(|_, queue| !queue.is_empty());
    true
}

impl WorkQueue for InMemoryWorkQueue {
    fn enqueue(&self, item: WorkItem) -> bool {
        let mut queues = self.guard();
        if !claim_request_slot(&mut queues, &item) {
            return false;
        }
        queues.entry(item.approver_id).or_default().push_back(item);
        true
    }

    fn list_pending(&self, approver_id: EmployeeId) -> Vec<WorkItem> {
        self.guard()
            .get(&approver_id)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn pop_item(&self, approver_id: EmployeeId, request_id: RequestId) -> Option<WorkItem> {
        let mut queues = self.guard();
        let queue = queues.get_mut(&approver_id)?;
        let index = queue.iter().position(|item| item.request_id == request_id)?;
        let item = queue.remove(index);
        if queue.is_empty() {
            queues.remove(&approver_id);
        }
        item
    }

    fn restore(&self, item: WorkItem) {
        let mut queues = self.guard();
        if claim_request_slot(&mut queues, &item) {
            queues.entry(item.approver_id).or_default().push_front(item);
        }
    }

    fn approver_count(&self) -> usize {
        self.guard().len()
    }
}

/// What consuming one channel payload did to the queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageOutcome {
    Enqueued { request_id: RequestId, step: u32, approver_id: EmployeeId },
    /// The request already has an item queued at this step or a later one.
    Duplicate { request_id: RequestId, step: u32, approver_id: EmployeeId },
    /// Every step is decided; the request needs no further work.
    NoPendingStep { request_id: RequestId },
    Malformed { reason: String },
}

/// Derives the single active step from a payload and queues it for its
/// approver. Malformed payloads are reported, never propagated.
pub fn on_message(queue: &dyn WorkQueue, payload: &[u8]) -> MessageOutcome {
    let message = match WorkMessage::parse(payload) {
        Ok(message) => message,
        Err(error) => return MessageOutcome::Malformed { reason: error.to_string() },
    };

    let Some(active) = message.active_step() else {
        return MessageOutcome::NoPendingStep { request_id: message.request_id };
    };

    let item = WorkItem::for_step(&message, active);
    let (request_id, step, approver_id) = (item.request_id, item.step_number, item.approver_id);

    if queue.enqueue(item) {
        MessageOutcome::Enqueued { request_id, step, approver_id }
    } else {
        MessageOutcome::Duplicate { request_id, step, approver_id }
    }
}
