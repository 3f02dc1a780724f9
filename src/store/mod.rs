// Persistence contract for workflows, approvals and step results

pub mod errors;
pub mod memory;
#[cfg(feature = "database")]
pub mod sqlite;

use async_trait::async_trait;
use uuid::Uuid;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::workflows::{
    Approval, CompletionCommit, IdempotencyRecord, Step, StepArtifact, StepAttempt, UsageRecord,
    Workflow, WorkflowState,
};

pub use errors::StoreError;
pub use memory::InMemoryWorkflowStore;
#[cfg(feature = "database")]
pub use sqlite::SqliteWorkflowStore;

/// Result of a conditional state update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapResult {
    pub applied: bool,
    /// State after the attempt; `None` when the workflow does not exist for the tenant
    pub current_state: Option<WorkflowState>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// Transaction committed; carries the workflow as written
    Applied(Workflow),
    /// The idempotency token was already recorded, nothing was written
    Duplicate,
    /// The workflow was no longer in the expected state, the transaction rolled back
    StateMoved(Option<WorkflowState>),
}

/// Storage used by the engine. Every read and write is scoped to an organization.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn insert_workflow(&self, workflow: &Workflow) -> Result<(), StoreError>;

    async fn load_workflow(
        &self,
        workflow_id: Uuid,
        organization_id: &str,
    ) -> Result<Option<Workflow>, StoreError>;

    /// Move `expected -> next` only if the persisted state still equals `expected`.
    /// Of any number of concurrent callers with the same `expected`, one applies.
    /// A given `attempt` is written to `step_metadata` in the same update.
    async fn compare_and_swap_state(
        &self,
        workflow_id: Uuid,
        organization_id: &str,
        expected: WorkflowState,
        next: WorkflowState,
        attempt: Option<StepAttempt>,
    ) -> Result<SwapResult, StoreError>;

    /// Idempotency record, state swap, metadata flag, artifact and usage in one transaction
    async fn commit_step_completion(
        &self,
        commit: &CompletionCommit,
    ) -> Result<CommitOutcome, StoreError>;

    async fn insert_approval(&self, approval: &Approval) -> Result<(), StoreError>;

    /// Approvals for a workflow, oldest first
    async fn list_approvals(
        &self,
        workflow_id: Uuid,
        organization_id: &str,
    ) -> Result<Vec<Approval>, StoreError>;

    async fn find_idempotency_record(
        &self,
        workflow_id: Uuid,
        step: Step,
        token: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError>;

    async fn list_artifacts(
        &self,
        workflow_id: Uuid,
        organization_id: &str,
        step: Option<Step>,
    ) -> Result<Vec<StepArtifact>, StoreError>;

    async fn list_usage(
        &self,
        workflow_id: Uuid,
        organization_id: &str,
    ) -> Result<Vec<UsageRecord>, StoreError>;
}
