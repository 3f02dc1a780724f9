use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{CommitOutcome, StoreError, SwapResult, WorkflowStore};
use crate::workflows::{
    Approval, CompletionCommit, IdempotencyRecord, Step, StepArtifact, StepAttempt, UsageRecord,
    Workflow, WorkflowState,
};

#[derive(Debug, Default)]
struct Tables {
    workflows: HashMap<Uuid, Workflow>,
    approvals: Vec<Approval>,
    idempotency: HashMap<(Uuid, Step, String), IdempotencyRecord>,
    artifacts: Vec<StepArtifact>,
    usage: Vec<UsageRecord>,
}

impl Tables {
    fn owned(&self, workflow_id: Uuid, organization_id: &str) -> Option<&Workflow> {
        self.workflows
            .get(&workflow_id)
            .filter(|w| w.organization_id == organization_id)
    }
}

/// Store kept in process memory. One mutex guards all tables, so each call
/// is atomic with respect to every other call.
#[derive(Debug, Default)]
pub struct InMemoryWorkflowStore {
    tables: Mutex<Tables>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn insert_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.workflows.contains_key(&workflow.id) {
            return Err(StoreError::AlreadyExists(workflow.id));
        }
        tables.workflows.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn load_workflow(
        &self,
        workflow_id: Uuid,
        organization_id: &str,
    ) -> Result<Option<Workflow>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.owned(workflow_id, organization_id).cloned())
    }

    async fn compare_and_swap_state(
        &self,
        workflow_id: Uuid,
        organization_id: &str,
        expected: WorkflowState,
        next: WorkflowState,
        attempt: Option<StepAttempt>,
    ) -> Result<SwapResult, StoreError> {
        let mut tables = self.tables.lock().await;
        let workflow = match tables.workflows.get_mut(&workflow_id) {
            Some(w) if w.organization_id == organization_id => w,
            _ => {
                return Ok(SwapResult {
                    applied: false,
                    current_state: None,
                })
            }
        };

        if workflow.state != expected {
            return Ok(SwapResult {
                applied: false,
                current_state: Some(workflow.state),
            });
        }

        workflow.state = next;
        if let Some(attempt) = attempt {
            workflow
                .step_metadata
                .insert(attempt.metadata_key().to_string(), attempt.metadata_value());
        }
        workflow.updated_at = Utc::now();
        Ok(SwapResult {
            applied: true,
            current_state: Some(next),
        })
    }

    async fn commit_step_completion(
        &self,
        commit: &CompletionCommit,
    ) -> Result<CommitOutcome, StoreError> {
        let mut tables = self.tables.lock().await;

        let key = (commit.workflow_id, commit.step, commit.token.clone());
        if tables.idempotency.contains_key(&key) {
            return Ok(CommitOutcome::Duplicate);
        }

        let current = tables
            .owned(commit.workflow_id, &commit.organization_id)
            .map(|w| w.state);
        if current != Some(commit.expected_state) {
            return Ok(CommitOutcome::StateMoved(current));
        }

        // All checks passed; nothing below can fail, so the writes land together
        let now = Utc::now();
        tables.idempotency.insert(
            key,
            IdempotencyRecord {
                workflow_id: commit.workflow_id,
                step: commit.step,
                token: commit.token.clone(),
                created_at: now,
            },
        );
        tables.artifacts.push(StepArtifact {
            workflow_id: commit.workflow_id,
            step: commit.step,
            idempotency_token: commit.token.clone(),
            payload: commit.artifact.clone(),
            created_at: now,
        });
        if let Some(usage) = &commit.usage {
            tables.usage.push(UsageRecord {
                workflow_id: commit.workflow_id,
                organization_id: commit.organization_id.clone(),
                step: commit.step,
                idempotency_token: commit.token.clone(),
                kind: usage.kind.clone(),
                quantity: usage.quantity,
                created_at: now,
            });
        }

        let workflow = tables
            .workflows
            .get_mut(&commit.workflow_id)
            .ok_or_else(|| StoreError::corrupt("workflow vanished during completion"))?;
        workflow.state = commit.next_state;
        workflow
            .step_metadata
            .insert(commit.step.metadata_key().to_string(), Value::Bool(true));
        if let Some(attempt) = &commit.next_attempt {
            workflow
                .step_metadata
                .insert(attempt.metadata_key().to_string(), attempt.metadata_value());
        }
        workflow.updated_at = now;

        Ok(CommitOutcome::Applied(workflow.clone()))
    }

    async fn insert_approval(&self, approval: &Approval) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.approvals.push(approval.clone());
        Ok(())
    }

    async fn list_approvals(
        &self,
        workflow_id: Uuid,
        organization_id: &str,
    ) -> Result<Vec<Approval>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .approvals
            .iter()
            .filter(|a| a.workflow_id == workflow_id && a.organization_id == organization_id)
            .cloned()
            .collect())
    }

    async fn find_idempotency_record(
        &self,
        workflow_id: Uuid,
        step: Step,
        token: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .idempotency
            .get(&(workflow_id, step, token.to_string()))
            .cloned())
    }

    async fn list_artifacts(
        &self,
        workflow_id: Uuid,
        organization_id: &str,
        step: Option<Step>,
    ) -> Result<Vec<StepArtifact>, StoreError> {
        let tables = self.tables.lock().await;
        if tables.owned(workflow_id, organization_id).is_none() {
            return Ok(Vec::new());
        }
        Ok(tables
            .artifacts
            .iter()
            .filter(|a| a.workflow_id == workflow_id)
            .filter(|a| step.map_or(true, |s| a.step == s))
            .cloned()
            .collect())
    }

    async fn list_usage(
        &self,
        workflow_id: Uuid,
        organization_id: &str,
    ) -> Result<Vec<UsageRecord>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .usage
            .iter()
            .filter(|u| u.workflow_id == workflow_id && u.organization_id == organization_id)
            .cloned()
            .collect())
    }
}
