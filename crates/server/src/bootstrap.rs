use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use signoff_core::config::{AppConfig, ChannelKind, ConfigError, LoadOptions, ServiceRole};
use signoff_core::queue::{InMemoryWorkQueue, WorkQueue};
use signoff_db::repositories::{SqlApprovalRepository, SqlIdSequencer};
use signoff_db::{connection, migrations, DbPool};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::approvals;
use crate::channel::{
    ChannelError, ConsumerLiveness, DirectChannel, InProcessChannel, JetStreamChannel,
    WorkPublisher,
};
use crate::collaborators::{http_client, CollaboratorError, HttpCollaborators};
use crate::forwarder::{DecisionForwarder, HttpForwarder, InProcessForwarder};
use crate::health::{self, HealthState};
use crate::process::{self, DecisionEndpoint};
use crate::workflow::ApprovalService;

const CONSUMER_RETRY_INITIAL: Duration = Duration::from_millis(500);
const CONSUMER_RETRY_MAX: Duration = Duration::from_secs(30);

pub struct Application {
    pub config: AppConfig,
    pub db_pool: Option<DbPool>,
    pub router: Router,
    /// Channel consumers. Aborted on shutdown.
    pub background: Vec<JoinHandle<()>>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    let role = config.server.role;
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        role = role.as_str(),
        channel = config.channel.kind.as_str(),
        "starting application bootstrap"
    );

    let mut background = Vec::new();
    let queue: Option<Arc<dyn WorkQueue>> = role.serves_processing().then(|| {
        info!(
            event_name = "system.bootstrap.queue_local",
            correlation_id = "bootstrap",
            "work queue is process-local; run a single processing instance per channel"
        );
        Arc::new(InMemoryWorkQueue::new()) as Arc<dyn WorkQueue>
    });

    let liveness = ConsumerLiveness::default();
    let consumer = (queue.is_some() && config.channel.kind != ChannelKind::Direct)
        .then(|| liveness.clone());

    let jetstream = match config.channel.kind {
        ChannelKind::Nats => Some(Arc::new(JetStreamChannel::connect(&config.channel).await?)),
        ChannelKind::InProcess | ChannelKind::Direct => None,
    };
    if let (Some(jetstream), Some(queue)) = (&jetstream, &queue) {
        background.push(spawn_consumer(
            Arc::clone(jetstream),
            Arc::clone(queue),
            liveness.clone(),
        ));
    }

    let mut router = Router::new();
    let mut db_pool = None;
    let mut service = None;

    if role.serves_requests() {
        let pool = connection::connect_with_config(&config.database)
            .await
            .map_err(BootstrapError::DatabaseConnect)?;
        info!(
            event_name = "system.bootstrap.database_connected",
            correlation_id = "bootstrap",
            "database connection established"
        );

        migrations::run_pending(&pool).await.map_err(BootstrapError::Migration)?;
        info!(
            event_name = "system.bootstrap.migrations_applied",
            correlation_id = "bootstrap",
            "database migrations applied"
        );

        let publisher =
            publisher(&config, jetstream.clone(), queue.clone(), &liveness, &mut background)?;
        let collaborators = Arc::new(HttpCollaborators::from_config(&config.collaborators)?);
        let approvals = Arc::new(ApprovalService::new(
            Arc::new(SqlApprovalRepository::new(pool.clone())),
            Arc::new(SqlIdSequencer::new(pool.clone())),
            publisher,
            collaborators.clone(),
            collaborators.clone(),
            collaborators,
        ));

        match approvals.redispatch_open("bootstrap").await {
            Ok(count) => info!(
                event_name = "system.bootstrap.redispatched",
                correlation_id = "bootstrap",
                dispatched = count,
                "open requests handed to the channel"
            ),
            Err(redispatch_error) => warn!(
                event_name = "system.bootstrap.redispatch_failed",
                correlation_id = "bootstrap",
                error = %redispatch_error,
                "startup redispatch failed; POST /approvals/internal/redispatch to retry"
            ),
        }

        router = router.merge(approvals::router(Arc::clone(&approvals)));
        db_pool = Some(pool);
        service = Some(approvals);
    }

    if let Some(queue) = &queue {
        let forwarder: Arc<dyn DecisionForwarder> = match &service {
            Some(service) => Arc::new(InProcessForwarder::new(Arc::clone(service))),
            None => {
                let base = config.collaborators.request_service_url.as_deref().ok_or_else(|| {
                    ConfigError::Validation(
                        "collaborators.request_service_url is required for the processing role"
                            .to_string(),
                    )
                })?;
                Arc::new(HttpForwarder::new(
                    http_client(config.collaborators.timeout_secs)?,
                    base,
                ))
            }
        };
        let endpoint = DecisionEndpoint::new(Arc::clone(queue), forwarder);
        router = router.merge(process::router(Arc::new(endpoint)));
    }

    router = router.merge(health::router(HealthState {
        role,
        channel: config.channel.kind,
        db_pool: db_pool.clone(),
        queue,
        consumer,
    }));

    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        role = role.as_str(),
        "application bootstrap complete"
    );

    Ok(Application { config, db_pool, router, background })
}

fn publisher(
    config: &AppConfig,
    jetstream: Option<Arc<JetStreamChannel>>,
    queue: Option<Arc<dyn WorkQueue>>,
    liveness: &ConsumerLiveness,
    background: &mut Vec<JoinHandle<()>>,
) -> Result<Arc<dyn WorkPublisher>, BootstrapError> {
    if let Some(jetstream) = jetstream {
        return Ok(jetstream as Arc<dyn WorkPublisher>);
    }

    let queue = queue.ok_or_else(|| {
        ConfigError::Validation(format!(
            "channel.kind `{}` needs the processing side in the same process (server.role = {})",
            config.channel.kind.as_str(),
            ServiceRole::Combined.as_str()
        ))
    })?;

    match config.channel.kind {
        ChannelKind::Direct => Ok(Arc::new(DirectChannel::new(queue))),
        _ => {
            let (channel, handle) = InProcessChannel::spawn(queue, liveness.clone());
            background.push(handle);
            Ok(Arc::new(channel))
        }
    }
}

/// Keeps a JetStream consumer attached for the life of the process. A failed
/// or ended consume is retried with doubling delays; the delay resets once a
/// consume got as far as receiving messages.
fn spawn_consumer(
    jetstream: Arc<JetStreamChannel>,
    queue: Arc<dyn WorkQueue>,
    liveness: ConsumerLiveness,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let _detach = liveness.detach_on_drop();
        let mut delay = CONSUMER_RETRY_INITIAL;
        loop {
            let reason = match jetstream.consume(Arc::clone(&queue), &liveness).await {
                Ok(()) => "message stream ended".to_string(),
                Err(consume_error) => consume_error.to_string(),
            };
            if liveness.is_attached() {
                delay = CONSUMER_RETRY_INITIAL;
            }
            liveness.set_attached(false);

            error!(
                event_name = "channel.jetstream.stopped",
                correlation_id = "consumer",
                error = %reason,
                retry_in_ms = delay.as_millis() as u64,
                "jetstream consumer stopped, retrying"
            );
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(CONSUMER_RETRY_MAX);
        }
    })
}
