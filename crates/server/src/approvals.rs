//! Request-side REST surface.
//!
//! - `POST /approvals`: create a request and dispatch step 1
//! - `GET  /approvals`: list requests, ascending by id
//! - `GET  /approvals/{id}`: one request
//! - `POST /approvals/internal/result`: apply a forwarded step decision
//! - `POST /approvals/internal/redispatch`: republish every open request

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use signoff_core::domain::approval::{ApprovalRequest, NewApprovalRequest, RequestId, StepDecision};

use crate::api_error::{correlation_id, ApiError};
use crate::workflow::ApprovalService;

#[derive(Clone)]
pub struct ApprovalsState {
    service: Arc<ApprovalService>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedResponse {
    pub request_id: RequestId,
}

#[derive(Debug, Serialize)]
pub struct RedispatchResponse {
    pub dispatched: usize,
}

pub fn router(service: Arc<ApprovalService>) -> Router {
    Router::new()
        .route("/approvals", get(list_requests).post(create_request))
        .route("/approvals/{id}", get(get_request))
        .route("/approvals/internal/result", post(apply_result))
        .route("/approvals/internal/redispatch", post(redispatch))
        .with_state(ApprovalsState { service })
}

async fn create_request(
    State(state): State<ApprovalsState>,
    headers: HeaderMap,
    body: Result<Json<NewApprovalRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedResponse>), ApiError> {
    let correlation_id = correlation_id(&headers);
    let Json(candidate) =
        body.map_err(|rejection| ApiError::from_rejection(rejection, &correlation_id))?;

    let request_id = state
        .service
        .create_request(candidate, &correlation_id)
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;

    Ok((StatusCode::CREATED, Json(CreatedResponse { request_id })))
}

async fn list_requests(
    State(state): State<ApprovalsState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ApprovalRequest>>, ApiError> {
    let correlation_id = correlation_id(&headers);
    state
        .service
        .list_requests()
        .await
        .map(Json)
        .map_err(|error| ApiError::from_application(error, &correlation_id))
}

async fn get_request(
    State(state): State<ApprovalsState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApprovalRequest>, ApiError> {
    let correlation_id = correlation_id(&headers);
    state
        .service
        .get_request(RequestId(id))
        .await
        .map(Json)
        .map_err(|error| ApiError::from_application(error, &correlation_id))
}

async fn apply_result(
    State(state): State<ApprovalsState>,
    headers: HeaderMap,
    body: Result<Json<StepDecision>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let correlation_id = correlation_id(&headers);
    let Json(decision) =
        body.map_err(|rejection| ApiError::from_rejection(rejection, &correlation_id))?;

    state
        .service
        .apply_step_decision(&decision, &correlation_id)
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;

    Ok(StatusCode::NO_CONTENT)
}

async fn redispatch(
    State(state): State<ApprovalsState>,
    headers: HeaderMap,
) -> Result<Json<RedispatchResponse>, ApiError> {
    let correlation_id = correlation_id(&headers);
    let dispatched = state
        .service
        .redispatch_open(&correlation_id)
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;

    Ok(Json(RedispatchResponse { dispatched }))
}
