//! Outbound calls to the employee and notification services.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use signoff_core::config::CollaboratorConfig;
use signoff_core::domain::approval::EmployeeId;
use signoff_core::domain::work::{ApprovalNotification, LeaveConfirmation};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("{service} unreachable: {message}")]
    Transport { service: &'static str, message: String },
    #[error("{service} returned status {status}")]
    Status { service: &'static str, status: u16 },
    #[error("http client setup failed: {0}")]
    Client(String),
}

#[async_trait]
pub trait EmployeeDirectory: Send + Sync {
    /// `Ok(false)` means the service answered 404.
    async fn exists(&self, employee_id: EmployeeId) -> Result<bool, CollaboratorError>;
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: &ApprovalNotification) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait LeaveConfirmer: Send + Sync {
    async fn confirm_leave(&self, leave: &LeaveConfirmation) -> Result<(), CollaboratorError>;
}

const EMPLOYEE_SERVICE: &str = "employee service";
const NOTIFICATION_SERVICE: &str = "notification service";

pub struct HttpCollaborators {
    client: Client,
    employee_base: String,
    notification_base: String,
}

impl HttpCollaborators {
    pub fn from_config(config: &CollaboratorConfig) -> Result<Self, CollaboratorError> {
        let client = http_client(config.timeout_secs)?;
        Ok(Self {
            client,
            employee_base: trim_base(&config.employee_service_url),
            notification_base: trim_base(&config.notification_service_url),
        })
    }
}

/// Every outbound client shares the collaborator timeout.
pub fn http_client(timeout_secs: u64) -> Result<Client, CollaboratorError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|error| CollaboratorError::Client(error.to_string()))
}

pub fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

fn transport(service: &'static str) -> impl Fn(reqwest::Error) -> CollaboratorError {
    move |error| CollaboratorError::Transport { service, message: error.to_string() }
}

#[async_trait]
impl EmployeeDirectory for HttpCollaborators {
    async fn exists(&self, employee_id: EmployeeId) -> Result<bool, CollaboratorError> {
        let url = format!("{}/employees/{}", self.employee_base, employee_id);
        let response = self.client.get(url).send().await.map_err(transport(EMPLOYEE_SERVICE))?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            other => Err(CollaboratorError::Status {
                service: EMPLOYEE_SERVICE,
                status: other.as_u16(),
            }),
        }
    }
}

#[async_trait]
impl NotificationSink for HttpCollaborators {
    async fn notify(&self, notification: &ApprovalNotification) -> Result<(), CollaboratorError> {
        let url = format!("{}/notify", self.notification_base);
        let response = self
            .client
            .post(url)
            .json(notification)
            .send()
            .await
            .map_err(transport(NOTIFICATION_SERVICE))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(CollaboratorError::Status {
                service: NOTIFICATION_SERVICE,
                status: response.status().as_u16(),
            })
        }
    }
}

#[async_trait]
impl LeaveConfirmer for HttpCollaborators {
    async fn confirm_leave(&self, leave: &LeaveConfirmation) -> Result<(), CollaboratorError> {
        let url = format!("{}/leaves/internal/approved", self.employee_base);
        let response =
            self.client.post(url).json(leave).send().await.map_err(transport(EMPLOYEE_SERVICE))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(CollaboratorError::Status {
                service: EMPLOYEE_SERVICE,
                status: response.status().as_u16(),
            })
        }
    }
}
