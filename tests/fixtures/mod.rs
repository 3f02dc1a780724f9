#![allow(dead_code)]
/// Shared builders for integration tests: an engine over the in-memory store,
/// a channel transport drained by a job runner, and scripted step workers.
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{mpsc, Barrier};
use uuid::Uuid;

use intent_engine::jobs::{ChannelJobTransport, JobMessage, JobPayload, JobRunner, StepOutput, StepWorker, WorkerError};
use intent_engine::store::{CommitOutcome, InMemoryWorkflowStore, StoreError, SwapResult, WorkflowStore};
use intent_engine::workflows::{
    Approval, ApprovalDecision, CompletionCommit, IdempotencyRecord, NewApproval, Step, StepArtifact,
    StepAttempt, Usage, UsageRecord, Workflow, WorkflowState,
};
use intent_engine::{AutomationGraph, IntentEngine, MemoryAuditSink};

pub const ORG: &str = "org-acme";

/// Produces a small artifact for any automated step
pub struct EchoWorker {
    pub step: Step,
}

#[async_trait]
impl StepWorker for EchoWorker {
    fn step(&self) -> Step {
        self.step
    }

    async fn run(&self, workflow: &Workflow, _payload: &JobPayload) -> Result<StepOutput, WorkerError> {
        Ok(StepOutput::new(json!({
            "step": self.step.as_str(),
            "workflow_id": workflow.id,
            "items": ["a", "b"],
        }))
        .with_usage(Usage::new("llm_tokens", 100)))
    }
}

/// Competitor analysis that extracts seed keywords
pub struct CompetitorWorker;

#[async_trait]
impl StepWorker for CompetitorWorker {
    fn step(&self) -> Step {
        Step::Competitors
    }

    async fn run(&self, _workflow: &Workflow, _payload: &JobPayload) -> Result<StepOutput, WorkerError> {
        Ok(StepOutput::new(json!({
            "competitors": ["rival.example", "other.example"],
            "keywords": ["headless cms", "static site generator", "jamstack hosting"],
        }))
        .with_usage(Usage::new("llm_tokens", 350)))
    }
}

/// Always fails, as when keyword extraction comes back empty
pub struct FailingWorker {
    pub step: Step,
}

#[async_trait]
impl StepWorker for FailingWorker {
    fn step(&self) -> Step {
        self.step
    }

    async fn run(&self, _workflow: &Workflow, _payload: &JobPayload) -> Result<StepOutput, WorkerError> {
        Err(WorkerError::EmptyResult("no keywords extracted".to_string()))
    }
}

pub fn standard_workers() -> Vec<Arc<dyn StepWorker>> {
    let mut workers: Vec<Arc<dyn StepWorker>> = vec![Arc::new(CompetitorWorker)];
    for step in Step::ALL {
        if step.is_automated() && step != Step::Competitors {
            workers.push(Arc::new(EchoWorker { step }));
        }
    }
    workers
}

pub struct Pipeline {
    pub engine: Arc<IntentEngine>,
    pub store: Arc<dyn WorkflowStore>,
    pub audit: Arc<MemoryAuditSink>,
    pub runner: JobRunner,
    pub jobs: mpsc::UnboundedReceiver<JobMessage>,
}

impl Pipeline {
    /// Drain every queued job, including the ones they chain
    pub async fn run_jobs(&mut self) -> Vec<intent_engine::JobReport> {
        self.runner.run_until_idle(&mut self.jobs).await.unwrap()
    }

    pub async fn state(&self, workflow_id: Uuid) -> WorkflowState {
        self.engine.workflow(workflow_id, ORG).await.unwrap().state
    }

    pub async fn approve(&self, workflow_id: Uuid, entity_type: &str) -> Approval {
        self.engine
            .record_approval(approval(workflow_id, entity_type, ApprovalDecision::Approved))
            .await
            .unwrap()
    }
}

pub fn pipeline(workers: Vec<Arc<dyn StepWorker>>) -> Pipeline {
    pipeline_with_store(Arc::new(InMemoryWorkflowStore::new()), workers)
}

pub fn pipeline_with_store(store: Arc<dyn WorkflowStore>, workers: Vec<Arc<dyn StepWorker>>) -> Pipeline {
    let (transport, jobs) = ChannelJobTransport::new();
    let audit = Arc::new(MemoryAuditSink::new());
    let engine = Arc::new(
        IntentEngine::builder(store.clone(), Arc::new(transport))
            .audit(audit.clone())
            .graph(AutomationGraph::standard())
            .build()
            .unwrap(),
    );

    let mut runner = JobRunner::new(engine.clone());
    for worker in workers {
        runner = runner.with_worker(worker);
    }

    Pipeline {
        engine,
        store,
        audit,
        runner,
        jobs,
    }
}

pub fn approval(workflow_id: Uuid, entity_type: &str, decision: ApprovalDecision) -> NewApproval {
    NewApproval {
        workflow_id,
        organization_id: ORG.to_string(),
        entity_type: entity_type.to_string(),
        decision,
        approver_id: "editor-1".to_string(),
        notes: None,
    }
}

/// Insert a workflow already sitting in `state`, with the given metadata flags set
pub async fn seed_workflow(store: &dyn WorkflowStore, state: WorkflowState, flags: &[&str]) -> Workflow {
    let mut workflow = Workflow::new(ORG, state);
    for flag in flags {
        workflow = workflow.with_metadata(flag, json!(true));
    }
    store.insert_workflow(&workflow).await.unwrap();
    workflow
}

/// Every metadata flag any gate reads
pub const ALL_GATE_FLAGS: &[&str] = &["icp_generation", "competitor_analysis", "subtopic_generation"];

/// Holds conditional updates (or completion commits) until `parties` callers
/// have arrived, so concurrent requests all load the same state before any of
/// them writes
pub struct BarrierStore {
    inner: InMemoryWorkflowStore,
    swaps: Option<Barrier>,
    commits: Option<Barrier>,
}

impl BarrierStore {
    pub fn on_swaps(parties: usize) -> Self {
        Self {
            inner: InMemoryWorkflowStore::new(),
            swaps: Some(Barrier::new(parties)),
            commits: None,
        }
    }

    pub fn on_commits(parties: usize) -> Self {
        Self {
            inner: InMemoryWorkflowStore::new(),
            swaps: None,
            commits: Some(Barrier::new(parties)),
        }
    }
}

#[async_trait]
impl WorkflowStore for BarrierStore {
    async fn insert_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        self.inner.insert_workflow(workflow).await
    }

    async fn load_workflow(&self, workflow_id: Uuid, organization_id: &str) -> Result<Option<Workflow>, StoreError> {
        self.inner.load_workflow(workflow_id, organization_id).await
    }

    async fn compare_and_swap_state(
        &self,
        workflow_id: Uuid,
        organization_id: &str,
        expected: WorkflowState,
        next: WorkflowState,
        attempt: Option<StepAttempt>,
    ) -> Result<SwapResult, StoreError> {
        if let Some(barrier) = &self.swaps {
            barrier.wait().await;
        }
        self.inner
            .compare_and_swap_state(workflow_id, organization_id, expected, next, attempt)
            .await
    }

    async fn commit_step_completion(&self, commit: &CompletionCommit) -> Result<CommitOutcome, StoreError> {
        if let Some(barrier) = &self.commits {
            barrier.wait().await;
        }
        self.inner.commit_step_completion(commit).await
    }

    async fn insert_approval(&self, approval: &Approval) -> Result<(), StoreError> {
        self.inner.insert_approval(approval).await
    }

    async fn list_approvals(&self, workflow_id: Uuid, organization_id: &str) -> Result<Vec<Approval>, StoreError> {
        self.inner.list_approvals(workflow_id, organization_id).await
    }

    async fn find_idempotency_record(
        &self,
        workflow_id: Uuid,
        step: Step,
        token: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        self.inner.find_idempotency_record(workflow_id, step, token).await
    }

    async fn list_artifacts(
        &self,
        workflow_id: Uuid,
        organization_id: &str,
        step: Option<Step>,
    ) -> Result<Vec<StepArtifact>, StoreError> {
        self.inner.list_artifacts(workflow_id, organization_id, step).await
    }

    async fn list_usage(&self, workflow_id: Uuid, organization_id: &str) -> Result<Vec<UsageRecord>, StoreError> {
        self.inner.list_usage(workflow_id, organization_id).await
    }
}
