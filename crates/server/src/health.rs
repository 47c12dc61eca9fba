use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use signoff_core::config::{ChannelKind, ServiceRole};
use signoff_core::queue::WorkQueue;
use signoff_db::DbPool;

use crate::channel::ConsumerLiveness;

#[derive(Clone)]
pub struct HealthState {
    pub role: ServiceRole,
    pub channel: ChannelKind,
    pub db_pool: Option<DbPool>,
    pub queue: Option<Arc<dyn WorkQueue>>,
    /// Present when this process runs a channel consumer feeding `queue`.
    pub consumer: Option<ConsumerLiveness>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub role: ServiceRole,
    pub service: HealthCheck,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<HealthCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<HealthCheck>,
    pub channel: HealthCheck,
    pub checked_at: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ServiceInfo {
    pub service: &'static str,
    pub version: &'static str,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/", get(index)).route("/health", get(health)).with_state(state)
}

pub async fn index() -> Json<ServiceInfo> {
    Json(ServiceInfo { service: "signoff", version: env!("CARGO_PKG_VERSION") })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = match &state.db_pool {
        Some(pool) => Some(database_check(pool).await),
        None => None,
    };
    let queue = state.queue.as_deref().map(queue_check);
    let channel = channel_check(state.channel, state.consumer.as_ref());
    let ready = database.as_ref().map_or(true, |check| check.status == "ready")
        && channel.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        role: state.role,
        service: HealthCheck {
            status: "ready",
            detail: "signoff-server runtime initialized".to_string(),
        },
        database,
        queue,
        channel,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match signoff_db::connection::ping(pool).await {
        Ok(()) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

fn channel_check(kind: ChannelKind, consumer: Option<&ConsumerLiveness>) -> HealthCheck {
    let kind = kind.as_str();
    match consumer {
        Some(liveness) if liveness.is_attached() => {
            HealthCheck { status: "ready", detail: format!("{kind} consumer attached") }
        }
        Some(_) => HealthCheck {
            status: "degraded",
            detail: format!("{kind} consumer stopped; queued work is not being replenished"),
        },
        None => HealthCheck {
            status: "ready",
            detail: format!("{kind} channel has no consumer in this process"),
        },
    }
}

/// The queue lives in process memory; this reports its size, it cannot fail.
fn queue_check(queue: &dyn WorkQueue) -> HealthCheck {
    HealthCheck {
        status: "ready",
        detail: format!("{} approvers with queued work", queue.approver_count()),
    }
}
