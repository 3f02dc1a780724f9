use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::info;
use uuid::Uuid;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::workflows::WorkflowEvent;

/// Body of every job event. `dispatch_id` is unique per emission and doubles
/// as the idempotency token for the step the job runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    pub dispatch_id: Uuid,
    pub workflow_id: Uuid,
    pub organization_id: String,
    pub trigger: WorkflowEvent,
}

impl JobPayload {
    pub fn new(workflow_id: Uuid, organization_id: &str, trigger: WorkflowEvent) -> Self {
        Self {
            dispatch_id: Uuid::new_v4(),
            workflow_id,
            organization_id: organization_id.to_string(),
            trigger,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMessage {
    pub job: String,
    pub payload: JobPayload,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Job transport is closed")]
    Closed,

    #[error("Job transport rejected {job}: {reason}")]
    Rejected { job: String, reason: String },
}

/// Send-only event bus with at-least-once delivery
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait JobTransport: Send + Sync {
    async fn send(&self, job: &str, payload: &JobPayload) -> Result<(), DispatchError>;
}

/// In-process transport feeding a tokio channel consumed by a `JobRunner`
#[derive(Debug, Clone)]
pub struct ChannelJobTransport {
    sender: mpsc::UnboundedSender<JobMessage>,
}

impl ChannelJobTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<JobMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl JobTransport for ChannelJobTransport {
    async fn send(&self, job: &str, payload: &JobPayload) -> Result<(), DispatchError> {
        self.sender
            .send(JobMessage {
                job: job.to_string(),
                payload: payload.clone(),
            })
            .map_err(|_| DispatchError::Closed)
    }
}

/// Keeps every sent message; lets tests assert on exactly what was emitted
#[derive(Debug, Default)]
pub struct RecordingJobTransport {
    sent: Mutex<Vec<JobMessage>>,
}

impl RecordingJobTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<JobMessage> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_jobs(&self) -> Vec<String> {
        self.sent.lock().await.iter().map(|m| m.job.clone()).collect()
    }
}

#[async_trait]
impl JobTransport for RecordingJobTransport {
    async fn send(&self, job: &str, payload: &JobPayload) -> Result<(), DispatchError> {
        self.sent.lock().await.push(JobMessage {
            job: job.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }
}

/// Logs jobs instead of delivering them. The CLI uses it when no worker
/// process shares its address space.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingJobTransport;

#[async_trait]
impl JobTransport for LoggingJobTransport {
    async fn send(&self, job: &str, payload: &JobPayload) -> Result<(), DispatchError> {
        info!(
            job = job,
            dispatch_id = %payload.dispatch_id,
            workflow_id = %payload.workflow_id,
            trigger = payload.trigger.as_str(),
            "Job emitted"
        );
        Ok(())
    }
}
