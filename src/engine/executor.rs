use serde::Serialize;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::observability::OperationTimer;
use crate::store::{CommitOutcome, StoreError, WorkflowStore};
use crate::workflows::{CompletionCommit, StepAttempt, WorkflowState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub applied: bool,
    pub current_state: Option<WorkflowState>,
}

/// Applies a transition only if the persisted state still equals the state the
/// caller evaluated the guard against. Losers observe the winner's state.
pub struct AtomicTransitionExecutor {
    store: Arc<dyn WorkflowStore>,
}

impl AtomicTransitionExecutor {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }

    pub async fn execute(
        &self,
        workflow_id: Uuid,
        organization_id: &str,
        from_expected: WorkflowState,
        to: WorkflowState,
        attempt: Option<StepAttempt>,
    ) -> Result<ExecutionResult, StoreError> {
        let timer = OperationTimer::new("transition.execute");
        let swap = self
            .store
            .compare_and_swap_state(workflow_id, organization_id, from_expected, to, attempt)
            .await;
        timer.finish();

        let swap = swap?;
        debug!(
            workflow_id = %workflow_id,
            from = %from_expected,
            to = %to,
            applied = swap.applied,
            "Conditional transition executed"
        );
        Ok(ExecutionResult {
            applied: swap.applied,
            current_state: swap.current_state,
        })
    }

    /// Transactional variant used when a step finishes
    pub async fn execute_completion(
        &self,
        commit: &CompletionCommit,
    ) -> Result<CommitOutcome, StoreError> {
        let timer = OperationTimer::new("transition.execute_completion");
        let outcome = self.store.commit_step_completion(commit).await;
        timer.finish();
        outcome
    }
}
