use thiserror::Error;
use uuid::Uuid;

use crate::automation::GraphError;
use crate::jobs::DispatchError;
use crate::store::StoreError;
use crate::workflows::{Step, WorkflowState};

/// Failures of engine calls. Refusals (illegal, blocked, conflicting or
/// duplicate requests) are outcomes, not errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Workflow {workflow_id} not found for organization {organization_id}")]
    WorkflowNotFound {
        workflow_id: Uuid,
        organization_id: String,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid idempotency token: {0:?}")]
    InvalidToken(String),

    #[error("Step {0} has no background worker")]
    NotAutomated(Step),

    #[error("Workflow {workflow_id} is in {state}, which has no job to dispatch")]
    NothingToDispatch {
        workflow_id: Uuid,
        state: WorkflowState,
    },

    #[error("Job dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl EngineError {
    /// Transient store and transport failures; the same call may be repeated
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Store(e) => e.is_retryable(),
            EngineError::Dispatch(_) => true,
            _ => false,
        }
    }
}
