//! Transport between the request side and the approver work queue.
//!
//! Every producer here ends in [`handle_payload`], so the queue sees the same
//! bytes whether they travelled through JetStream, an in-process mpsc channel
//! or a direct call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_nats::jetstream::{self, consumer, stream};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use secrecy::ExposeSecret;
use signoff_core::config::{ChannelConfig, ChannelKind};
use signoff_core::domain::work::WorkMessage;
use signoff_core::queue::{on_message, MessageOutcome, WorkQueue};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const IN_PROCESS_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel connection failed: {0}")]
    Connect(String),
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("consume failed: {0}")]
    Consume(String),
    #[error("message encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait WorkPublisher: Send + Sync {
    /// Places the message on the channel. Returns once the transport accepted
    /// the bytes; broker acknowledgment is not awaited.
    async fn publish(&self, message: &WorkMessage) -> Result<(), ChannelError>;

    fn kind(&self) -> ChannelKind;
}

/// Whether a consumer is currently feeding the queue from the channel. The
/// consumer task flips it; `/health` reads it.
#[derive(Clone, Debug, Default)]
pub struct ConsumerLiveness {
    attached: Arc<AtomicBool>,
}

impl ConsumerLiveness {
    pub fn set_attached(&self, attached: bool) {
        self.attached.store(attached, Ordering::Release);
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    /// Marks the consumer detached when the guard drops, which covers both a
    /// task that returns and one that is aborted.
    pub fn detach_on_drop(&self) -> DetachOnDrop {
        DetachOnDrop(self.clone())
    }
}

pub struct DetachOnDrop(ConsumerLiveness);

impl Drop for DetachOnDrop {
    fn drop(&mut self) {
        self.0.set_attached(false);
    }
}

/// Feeds one payload to the queue and logs what happened to it. Never fails:
/// malformed payloads are dropped here so the transport can acknowledge them.
pub fn handle_payload(queue: &dyn WorkQueue, payload: &[u8]) -> MessageOutcome {
    let outcome = on_message(queue, payload);
    match &outcome {
        MessageOutcome::Enqueued { request_id, step, approver_id } => info!(
            event_name = "queue.item.enqueued",
            request_id = request_id.0,
            step = *step,
            approver_id = approver_id.0,
            "work item queued for approver"
        ),
        MessageOutcome::Duplicate { request_id, step, approver_id } => info!(
            event_name = "queue.item.duplicate",
            request_id = request_id.0,
            step = *step,
            approver_id = approver_id.0,
            "request already has work queued at this step or later, message dropped"
        ),
        MessageOutcome::NoPendingStep { request_id } => debug!(
            event_name = "queue.message.no_pending_step",
            request_id = request_id.0,
            "message carries no pending step"
        ),
        MessageOutcome::Malformed { reason } => warn!(
            event_name = "queue.message.malformed",
            reason = %reason,
            payload_len = payload.len(),
            "dropping malformed work message"
        ),
    }
    outcome
}

pub struct JetStreamChannel {
    context: jetstream::Context,
    stream: String,
    subject: String,
    consumer: String,
}

impl JetStreamChannel {
    /// Connects and makes sure the file-backed stream exists.
    pub async fn connect(config: &ChannelConfig) -> Result<Self, ChannelError> {
        let mut options = async_nats::ConnectOptions::new().name("signoff");
        if let Some(token) = &config.auth_token {
            options = options.token(token.expose_secret().to_string());
        }
        let client = options
            .connect(config.url.as_str())
            .await
            .map_err(|error| ChannelError::Connect(error.to_string()))?;

        let context = jetstream::new(client);
        context
            .get_or_create_stream(stream::Config {
                name: config.stream.clone(),
                subjects: vec![config.subject.clone()],
                storage: stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|error| ChannelError::Connect(error.to_string()))?;

        info!(
            event_name = "channel.jetstream.connected",
            correlation_id = "bootstrap",
            stream = %config.stream,
            subject = %config.subject,
            "jetstream stream ready"
        );

        Ok(Self {
            context,
            stream: config.stream.clone(),
            subject: config.subject.clone(),
            consumer: config.consumer.clone(),
        })
    }

    /// Single durable pull consumer with one message in flight. Each message
    /// is acknowledged after it has been handled, which keeps publish order.
    /// `liveness` is set once messages are flowing; the caller clears it when
    /// this returns.
    pub async fn consume(
        &self,
        queue: Arc<dyn WorkQueue>,
        liveness: &ConsumerLiveness,
    ) -> Result<(), ChannelError> {
        let stream = self
            .context
            .get_stream(&self.stream)
            .await
            .map_err(|error| ChannelError::Consume(error.to_string()))?;
        let pull = stream
            .get_or_create_consumer(
                &self.consumer,
                consumer::pull::Config {
                    durable_name: Some(self.consumer.clone()),
                    filter_subject: self.subject.clone(),
                    ack_policy: consumer::AckPolicy::Explicit,
                    max_ack_pending: 1,
                    ..Default::default()
                },
            )
            .await
            .map_err(|error| ChannelError::Consume(error.to_string()))?;

        let mut messages =
            pull.messages().await.map_err(|error| ChannelError::Consume(error.to_string()))?;
        liveness.set_attached(true);

        info!(
            event_name = "channel.jetstream.consuming",
            correlation_id = "bootstrap",
            consumer = %self.consumer,
            "jetstream consumer started"
        );

        while let Some(next) = messages.next().await {
            let message = match next {
                Ok(message) => message,
                Err(error) => {
                    warn!(
                        event_name = "channel.jetstream.receive_error",
                        error = %error,
                        "failed to receive message from jetstream"
                    );
                    continue;
                }
            };

            handle_payload(queue.as_ref(), &message.payload);

            if let Err(error) = message.ack().await {
                warn!(
                    event_name = "channel.jetstream.ack_error",
                    error = %error,
                    "failed to acknowledge message; broker will redeliver"
                );
            }
        }

        Err(ChannelError::Consume("jetstream message stream ended".to_string()))
    }
}

#[async_trait]
impl WorkPublisher for JetStreamChannel {
    async fn publish(&self, message: &WorkMessage) -> Result<(), ChannelError> {
        let payload = Bytes::from(message.to_bytes()?);
        // The returned ack future is dropped on purpose: publish is fire-and-forget.
        let _ack = self
            .context
            .publish(self.subject.clone(), payload)
            .await
            .map_err(|error| ChannelError::Publish(error.to_string()))?;
        Ok(())
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Nats
    }
}

/// Ordered mpsc channel drained by a single consumer task.
pub struct InProcessChannel {
    sender: mpsc::Sender<Bytes>,
}

impl InProcessChannel {
    pub fn spawn(
        queue: Arc<dyn WorkQueue>,
        liveness: ConsumerLiveness,
    ) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<Bytes>(IN_PROCESS_CAPACITY);
        liveness.set_attached(true);
        let detach = liveness.detach_on_drop();
        let handle = tokio::spawn(async move {
            let _detach = detach;
            while let Some(payload) = receiver.recv().await {
                handle_payload(queue.as_ref(), &payload);
            }
            debug!(event_name = "channel.in_process.closed", "in-process channel closed");
        });
        (Self { sender }, handle)
    }
}

#[async_trait]
impl WorkPublisher for InProcessChannel {
    async fn publish(&self, message: &WorkMessage) -> Result<(), ChannelError> {
        let payload = Bytes::from(message.to_bytes()?);
        self.sender.send(payload).await.map_err(|_| {
            error!(event_name = "channel.in_process.closed", "in-process consumer is gone");
            ChannelError::Publish("in-process consumer stopped".to_string())
        })
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::InProcess
    }
}

/// Hands the payload straight to the queue within the publishing call.
pub struct DirectChannel {
    queue: Arc<dyn WorkQueue>,
}

impl DirectChannel {
    pub fn new(queue: Arc<dyn WorkQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl WorkPublisher for DirectChannel {
    async fn publish(&self, message: &WorkMessage) -> Result<(), ChannelError> {
        let payload = message.to_bytes()?;
        handle_payload(self.queue.as_ref(), &payload);
        Ok(())
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Direct
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use signoff_core::config::ChannelKind;
    use signoff_core::domain::work::WorkMessage;

    use super::{ChannelError, WorkPublisher};

    /// Records every published message; optionally fails instead.
    #[derive(Default)]
    pub struct RecordingPublisher {
        published: Mutex<Vec<WorkMessage>>,
        failing: Mutex<bool>,
    }

    impl RecordingPublisher {
        pub fn published(&self) -> Vec<WorkMessage> {
            self.published.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }

        pub fn fail_next_publishes(&self, failing: bool) {
            *self.failing.lock().unwrap_or_else(|e| e.into_inner()) = failing;
        }
    }

    #[async_trait]
    impl WorkPublisher for RecordingPublisher {
        async fn publish(&self, message: &WorkMessage) -> Result<(), ChannelError> {
            if *self.failing.lock().unwrap_or_else(|e| e.into_inner()) {
                return Err(ChannelError::Publish("broker unavailable".to_string()));
            }
            self.published.lock().unwrap_or_else(|e| e.into_inner()).push(message.clone());
            Ok(())
        }

        fn kind(&self) -> ChannelKind {
            ChannelKind::Direct
        }
    }
}
