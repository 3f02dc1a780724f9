use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use super::errors::EngineError;
use super::executor::AtomicTransitionExecutor;
use crate::audit::{AuditAction, AuditEntry, AuditSink, TracingAuditSink};
use crate::automation::{AutomationGraph, GraphError};
use crate::gates::BlockingConditionResolver;
use crate::jobs::{JobPayload, JobTransport};
use crate::observability::TransitionMetrics;
use crate::store::{StoreError, WorkflowStore};
use crate::telemetry::{create_transition_span, generate_correlation_id};
use crate::workflows::{
    Approval, EventOrigin, NewApproval, Step, StepArtifact, StepAttempt, TransitionGuard,
    UsageRecord, Workflow, WorkflowEvent, WorkflowState,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub workflow_id: Uuid,
    pub organization_id: String,
    pub event: WorkflowEvent,
    pub actor_id: Option<String>,
}

impl TransitionRequest {
    pub fn new(workflow_id: Uuid, organization_id: impl Into<String>, event: WorkflowEvent) -> Self {
        Self {
            workflow_id,
            organization_id: organization_id.into(),
            event,
            actor_id: None,
        }
    }

    pub fn by(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TransitionOutcome {
    Applied {
        from: WorkflowState,
        to: WorkflowState,
        /// Job event emitted for this transition, if the graph maps one and the send succeeded
        emitted_event: Option<String>,
        dispatch_id: Option<Uuid>,
        /// Set when the graph mapped a job but the transport refused it
        dispatch_error: Option<String>,
    },
    Conflict {
        current_state: Option<WorkflowState>,
    },
    IllegalTransition {
        current_state: WorkflowState,
        event: WorkflowEvent,
    },
    GateBlocked {
        reason: String,
        blocked_by: Vec<String>,
    },
}

impl TransitionOutcome {
    pub fn success(&self) -> bool {
        matches!(self, TransitionOutcome::Applied { .. })
    }

    pub fn http_status(&self) -> u16 {
        match self {
            TransitionOutcome::Applied { .. } => 200,
            TransitionOutcome::Conflict { .. } | TransitionOutcome::IllegalTransition { .. } => 409,
            TransitionOutcome::GateBlocked { .. } => 423,
        }
    }

    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            TransitionOutcome::Applied { .. } => None,
            TransitionOutcome::Conflict { .. } => Some("CONFLICT"),
            TransitionOutcome::IllegalTransition { .. } => Some("ILLEGAL_TRANSITION"),
            TransitionOutcome::GateBlocked { .. } => Some("GATE_BLOCKED"),
        }
    }
}

/// A job re-emitted for a workflow left waiting in a running state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Redispatch {
    pub job: String,
    pub payload: JobPayload,
}

#[derive(Debug, Default)]
pub(super) struct Dispatch {
    pub job: Option<String>,
    pub dispatch_id: Option<Uuid>,
    pub error: Option<String>,
}

/// A mapped job whose dispatch id is fixed before the state change, so the
/// attempt can be recorded in the same update
#[derive(Debug)]
pub(super) struct PreparedJob {
    pub job: String,
    pub payload: JobPayload,
}

/// The attempt to record when `target` starts a step's worker
pub(super) fn attempt_for(target: WorkflowState, prepared: Option<&PreparedJob>) -> Option<StepAttempt> {
    target
        .running_step()
        .map(|step| StepAttempt::new(step, prepared.map(|p| p.payload.dispatch_id)))
}

/// The only sanctioned mutator of workflow state. Every call runs
/// gate, guard, conditional update, dispatch and audit in that order.
pub struct IntentEngine {
    pub(super) store: Arc<dyn WorkflowStore>,
    transport: Arc<dyn JobTransport>,
    pub(super) audit: Arc<dyn AuditSink>,
    graph: AutomationGraph,
    resolver: BlockingConditionResolver,
    pub(super) executor: AtomicTransitionExecutor,
    pub(super) metrics: Arc<TransitionMetrics>,
}

pub struct IntentEngineBuilder {
    store: Arc<dyn WorkflowStore>,
    transport: Arc<dyn JobTransport>,
    audit: Arc<dyn AuditSink>,
    graph: AutomationGraph,
    strict_automation: bool,
    metrics: Arc<TransitionMetrics>,
}

impl IntentEngineBuilder {
    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn graph(mut self, graph: AutomationGraph) -> Self {
        self.graph = graph;
        self
    }

    /// When set, a graph with dead ends is refused instead of logged
    pub fn strict_automation(mut self, strict: bool) -> Self {
        self.strict_automation = strict;
        self
    }

    pub fn metrics(mut self, metrics: Arc<TransitionMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn build(self) -> Result<IntentEngine, EngineError> {
        let dead_ends = self.graph.dead_ends();
        if !dead_ends.is_empty() {
            if self.strict_automation {
                return Err(GraphError::DeadEnds(dead_ends).into());
            }
            warn!(
                dead_ends = ?dead_ends.iter().map(|e| e.as_str()).collect::<Vec<_>>(),
                "Automation graph leaves running states without a job"
            );
        }

        Ok(IntentEngine {
            resolver: BlockingConditionResolver::new(self.store.clone()),
            executor: AtomicTransitionExecutor::new(self.store.clone()),
            store: self.store,
            transport: self.transport,
            audit: self.audit,
            graph: self.graph,
            metrics: self.metrics,
        })
    }
}

impl IntentEngine {
    pub fn builder(
        store: Arc<dyn WorkflowStore>,
        transport: Arc<dyn JobTransport>,
    ) -> IntentEngineBuilder {
        IntentEngineBuilder {
            store,
            transport,
            audit: Arc::new(TracingAuditSink),
            graph: AutomationGraph::standard(),
            strict_automation: true,
            metrics: Arc::new(TransitionMetrics::new()),
        }
    }

    pub fn graph(&self) -> &AutomationGraph {
        &self.graph
    }

    pub fn metrics(&self) -> &TransitionMetrics {
        &self.metrics
    }

    /// Fire a caller's `event` against a workflow. Worker reports go through
    /// `complete_step` and `fail_step` instead and are refused here.
    pub async fn transition(
        &self,
        request: TransitionRequest,
    ) -> Result<TransitionOutcome, EngineError> {
        let correlation_id = generate_correlation_id();
        let span = create_transition_span(
            "transition",
            request.workflow_id,
            Some(request.event.as_str()),
            &correlation_id,
        );

        async move {
            let TransitionRequest {
                workflow_id,
                organization_id,
                event,
                actor_id,
            } = request;
            let actor = actor_id.as_deref();

            let workflow = self
                .load_for(workflow_id, &organization_id, Some(event), actor)
                .await?;

            if event.origin() == EventOrigin::Worker {
                self.metrics.record_illegal();
                info!(
                    workflow_id = %workflow_id,
                    state = %workflow.state,
                    event = event.as_str(),
                    "Worker event refused on the caller path"
                );
                self.audit.record(
                    AuditEntry::new(AuditAction::TransitionIllegal, workflow_id, &organization_id)
                        .actor(actor)
                        .event(event)
                        .states(Some(workflow.state), None)
                        .details(json!({ "reason": "raised only by step workers" })),
                );
                return Ok(TransitionOutcome::IllegalTransition {
                    current_state: workflow.state,
                    event,
                });
            }

            if let Some(step) = event.gated_step() {
                let decision = self.resolver.resolve(workflow_id, &organization_id, step).await;
                if !decision.allowed {
                    self.metrics.record_gate_blocked();
                    let reason = decision.reason.unwrap_or_default();
                    info!(
                        workflow_id = %workflow_id,
                        event = event.as_str(),
                        blocked_by = ?decision.blocked_by,
                        "Transition blocked by gate"
                    );
                    self.audit.record(
                        AuditEntry::new(AuditAction::GateBlocked, workflow_id, &organization_id)
                            .actor(actor)
                            .event(event)
                            .states(Some(workflow.state), None)
                            .details(json!({
                                "reason": reason,
                                "blocked_by": decision.blocked_by,
                            })),
                    );
                    return Ok(TransitionOutcome::GateBlocked {
                        reason,
                        blocked_by: decision.blocked_by,
                    });
                }
            }

            self.apply_event(&workflow, event, actor, Value::Null).await
        }
        .instrument(span)
        .await
    }

    /// Guard, conditional update, dispatch and audit for an already loaded workflow
    pub(super) async fn apply_event(
        &self,
        workflow: &Workflow,
        event: WorkflowEvent,
        actor: Option<&str>,
        context: Value,
    ) -> Result<TransitionOutcome, EngineError> {
        let organization_id = workflow.organization_id.as_str();

        let Some(target) = TransitionGuard::evaluate(workflow.state, event) else {
            self.metrics.record_illegal();
            info!(
                workflow_id = %workflow.id,
                state = %workflow.state,
                event = event.as_str(),
                "Illegal transition refused"
            );
            self.audit.record(
                AuditEntry::new(AuditAction::TransitionIllegal, workflow.id, organization_id)
                    .actor(actor)
                    .event(event)
                    .states(Some(workflow.state), None)
                    .details(context),
            );
            return Ok(TransitionOutcome::IllegalTransition {
                current_state: workflow.state,
                event,
            });
        };

        let prepared = self.prepare_job(event, workflow.id, organization_id);
        let attempt = attempt_for(target, prepared.as_ref());

        let result = match self
            .executor
            .execute(workflow.id, organization_id, workflow.state, target, attempt)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                return Err(self.store_failure(workflow.id, organization_id, Some(event), actor, e))
            }
        };

        if !result.applied {
            self.metrics.record_conflict();
            info!(
                workflow_id = %workflow.id,
                expected = %workflow.state,
                current = ?result.current_state,
                event = event.as_str(),
                "Transition lost the race"
            );
            self.audit.record(
                AuditEntry::new(AuditAction::TransitionConflict, workflow.id, organization_id)
                    .actor(actor)
                    .event(event)
                    .states(Some(workflow.state), result.current_state)
                    .details(context),
            );
            return Ok(TransitionOutcome::Conflict {
                current_state: result.current_state,
            });
        }

        self.metrics.record_applied();
        let dispatch = self.dispatch(prepared, actor).await;

        info!(
            workflow_id = %workflow.id,
            from = %workflow.state,
            to = %target,
            event = event.as_str(),
            job = dispatch.job.as_deref(),
            "Transition applied"
        );
        self.audit.record(
            AuditEntry::new(AuditAction::TransitionApplied, workflow.id, organization_id)
                .actor(actor)
                .event(event)
                .states(Some(workflow.state), Some(target))
                .details(json!({
                    "job": dispatch.job,
                    "dispatch_id": dispatch.dispatch_id,
                    "dispatch_error": dispatch.error,
                    "context": context,
                })),
        );

        Ok(TransitionOutcome::Applied {
            from: workflow.state,
            to: target,
            emitted_event: dispatch.job,
            dispatch_id: dispatch.dispatch_id,
            dispatch_error: dispatch.error,
        })
    }

    pub(super) fn prepare_job(
        &self,
        trigger: WorkflowEvent,
        workflow_id: Uuid,
        organization_id: &str,
    ) -> Option<PreparedJob> {
        self.graph.job_for(trigger).map(|job| PreparedJob {
            job: job.to_string(),
            payload: JobPayload::new(workflow_id, organization_id, trigger),
        })
    }

    /// Emit a prepared job, once. Called only after the state change applied.
    pub(super) async fn dispatch(&self, prepared: Option<PreparedJob>, actor: Option<&str>) -> Dispatch {
        let Some(PreparedJob { job, payload }) = prepared else {
            return Dispatch::default();
        };
        let workflow_id = payload.workflow_id;
        let organization_id = payload.organization_id.as_str();
        let job = job.as_str();

        match self.transport.send(job, &payload).await {
            Ok(()) => {
                info!(
                    workflow_id = %workflow_id,
                    job = job,
                    dispatch_id = %payload.dispatch_id,
                    "Job dispatched"
                );
                Dispatch {
                    job: Some(job.to_string()),
                    dispatch_id: Some(payload.dispatch_id),
                    error: None,
                }
            }
            Err(e) => {
                self.metrics.record_dispatch_failure();
                error!(
                    workflow_id = %workflow_id,
                    job = job,
                    error = %e,
                    "Job dispatch failed after transition applied; redispatch required"
                );
                self.audit.record(
                    AuditEntry::new(AuditAction::DispatchFailed, workflow_id, organization_id)
                        .actor(actor)
                        .event(payload.trigger)
                        .details(json!({
                            "job": job,
                            "dispatch_id": payload.dispatch_id,
                            "error": e.to_string(),
                        })),
                );
                Dispatch {
                    job: None,
                    dispatch_id: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    pub(super) async fn load_for(
        &self,
        workflow_id: Uuid,
        organization_id: &str,
        event: Option<WorkflowEvent>,
        actor: Option<&str>,
    ) -> Result<Workflow, EngineError> {
        match self.store.load_workflow(workflow_id, organization_id).await {
            Ok(Some(workflow)) => Ok(workflow),
            Ok(None) => {
                info!(
                    workflow_id = %workflow_id,
                    organization_id = organization_id,
                    event = event.map(|e| e.as_str()),
                    "Workflow not found for organization"
                );
                let mut entry =
                    AuditEntry::new(AuditAction::WorkflowNotFound, workflow_id, organization_id)
                        .actor(actor);
                if let Some(event) = event {
                    entry = entry.event(event);
                }
                self.audit.record(entry);

                Err(EngineError::WorkflowNotFound {
                    workflow_id,
                    organization_id: organization_id.to_string(),
                })
            }
            Err(e) => Err(self.store_failure(workflow_id, organization_id, event, actor, e)),
        }
    }

    pub(super) fn store_failure(
        &self,
        workflow_id: Uuid,
        organization_id: &str,
        event: Option<WorkflowEvent>,
        actor: Option<&str>,
        err: StoreError,
    ) -> EngineError {
        self.metrics.record_store_error();
        error!(
            workflow_id = %workflow_id,
            event = event.map(|e| e.as_str()),
            retryable = err.is_retryable(),
            error = %err,
            "Store call failed"
        );

        let mut entry = AuditEntry::new(AuditAction::StoreError, workflow_id, organization_id)
            .actor(actor)
            .details(json!({
                "error": err.to_string(),
                "retryable": err.is_retryable(),
            }));
        if let Some(event) = event {
            entry = entry.event(event);
        }
        self.audit.record(entry);

        EngineError::Store(err)
    }

    pub async fn create_workflow(
        &self,
        organization_id: &str,
        actor: Option<&str>,
    ) -> Result<Workflow, EngineError> {
        let workflow = Workflow::new(organization_id, WorkflowState::INITIAL);
        if let Err(e) = self.store.insert_workflow(&workflow).await {
            return Err(self.store_failure(workflow.id, organization_id, None, actor, e));
        }

        info!(workflow_id = %workflow.id, organization_id = organization_id, "Workflow created");
        self.audit.record(
            AuditEntry::new(AuditAction::WorkflowCreated, workflow.id, organization_id)
                .actor(actor)
                .states(None, Some(workflow.state)),
        );
        Ok(workflow)
    }

    /// Append a human decision. Does not move the workflow; the approval event does.
    pub async fn record_approval(&self, approval: NewApproval) -> Result<Approval, EngineError> {
        let workflow_id = approval.workflow_id;
        let organization_id = approval.organization_id.clone();
        let approver = approval.approver_id.clone();

        self.load_for(workflow_id, &organization_id, None, Some(approver.as_str()))
            .await?;

        let approval = approval.into_approval();
        if let Err(e) = self.store.insert_approval(&approval).await {
            return Err(self.store_failure(workflow_id, &organization_id, None, Some(approver.as_str()), e));
        }

        self.audit.record(
            AuditEntry::new(AuditAction::ApprovalRecorded, workflow_id, &organization_id)
                .actor(Some(approver.as_str()))
                .details(json!({
                    "approval_id": approval.id,
                    "entity_type": approval.entity_type,
                    "decision": approval.decision.as_str(),
                })),
        );
        Ok(approval)
    }

    pub async fn workflow(
        &self,
        workflow_id: Uuid,
        organization_id: &str,
    ) -> Result<Workflow, EngineError> {
        self.load_for(workflow_id, organization_id, None, None).await
    }

    pub async fn artifacts(
        &self,
        workflow_id: Uuid,
        organization_id: &str,
        step: Option<Step>,
    ) -> Result<Vec<StepArtifact>, EngineError> {
        Ok(self
            .store
            .list_artifacts(workflow_id, organization_id, step)
            .await?)
    }

    pub async fn usage(
        &self,
        workflow_id: Uuid,
        organization_id: &str,
    ) -> Result<Vec<UsageRecord>, EngineError> {
        Ok(self.store.list_usage(workflow_id, organization_id).await?)
    }

    /// Re-emit the job for a workflow sitting in a running state, e.g. after
    /// the transport refused the original emission. The new dispatch id becomes
    /// the step's attempt, so reports from the earlier job are treated as stale.
    pub async fn redispatch(
        &self,
        workflow_id: Uuid,
        organization_id: &str,
        actor: Option<&str>,
    ) -> Result<Redispatch, EngineError> {
        let workflow = self
            .load_for(workflow_id, organization_id, None, actor)
            .await?;

        let Some((trigger, job)) = self.graph.entry_for_state(workflow.state) else {
            return Err(EngineError::NothingToDispatch {
                workflow_id,
                state: workflow.state,
            });
        };

        let payload = JobPayload::new(workflow_id, organization_id, trigger);
        let attempt = workflow
            .state
            .running_step()
            .map(|step| StepAttempt::new(step, Some(payload.dispatch_id)));

        let swap = match self
            .executor
            .execute(workflow_id, organization_id, workflow.state, workflow.state, attempt)
            .await
        {
            Ok(swap) => swap,
            Err(e) => {
                return Err(self.store_failure(workflow_id, organization_id, Some(trigger), actor, e))
            }
        };
        if !swap.applied {
            // Moved on since the load; whatever it moved to emitted its own job
            return match swap.current_state {
                Some(state) => Err(EngineError::NothingToDispatch { workflow_id, state }),
                None => Err(EngineError::WorkflowNotFound {
                    workflow_id,
                    organization_id: organization_id.to_string(),
                }),
            };
        }

        if let Err(e) = self.transport.send(job, &payload).await {
            self.metrics.record_dispatch_failure();
            self.audit.record(
                AuditEntry::new(AuditAction::DispatchFailed, workflow_id, organization_id)
                    .actor(actor)
                    .event(trigger)
                    .details(json!({ "job": job, "error": e.to_string() })),
            );
            return Err(e.into());
        }

        info!(
            workflow_id = %workflow_id,
            job = job,
            dispatch_id = %payload.dispatch_id,
            "Job redispatched"
        );
        self.audit.record(
            AuditEntry::new(AuditAction::Redispatched, workflow_id, organization_id)
                .actor(actor)
                .event(trigger)
                .states(Some(workflow.state), Some(workflow.state))
                .details(json!({ "job": job, "dispatch_id": payload.dispatch_id })),
        );

        Ok(Redispatch {
            job: job.to_string(),
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::jobs::{DispatchError, MockJobTransport, RecordingJobTransport};
    use crate::store::{InMemoryWorkflowStore, MockWorkflowStore};
    use serde_json::json;

    struct Harness {
        engine: IntentEngine,
        store: Arc<InMemoryWorkflowStore>,
        transport: Arc<RecordingJobTransport>,
        audit: Arc<MemoryAuditSink>,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryWorkflowStore::new());
        let transport = Arc::new(RecordingJobTransport::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let engine = IntentEngine::builder(store.clone(), transport.clone())
            .audit(audit.clone())
            .build()
            .unwrap();
        Harness {
            engine,
            store,
            transport,
            audit,
        }
    }

    async fn seeded(h: &Harness, workflow: Workflow) -> Workflow {
        h.store.insert_workflow(&workflow).await.unwrap();
        workflow
    }

    #[tokio::test]
    async fn test_applied_transition_emits_mapped_job() {
        let h = harness();
        let workflow = seeded(&h, Workflow::new("org-1", WorkflowState::IcpPending)).await;

        let outcome = h
            .engine
            .transition(TransitionRequest::new(workflow.id, "org-1", WorkflowEvent::IcpStart).by("user-1"))
            .await
            .unwrap();

        let TransitionOutcome::Applied { from, to, emitted_event, dispatch_id, dispatch_error } = outcome.clone() else {
            panic!("expected applied, got {outcome:?}");
        };
        assert_eq!(from, WorkflowState::IcpPending);
        assert_eq!(to, WorkflowState::IcpRunning);
        assert_eq!(emitted_event.as_deref(), Some("icp.job"));
        assert!(dispatch_id.is_some());
        assert!(dispatch_error.is_none());

        let sent = h.transport.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload.dispatch_id, dispatch_id.unwrap());
        assert_eq!(h.audit.count(AuditAction::TransitionApplied), 1);
    }

    #[tokio::test]
    async fn test_applied_start_records_the_attempt() {
        let h = harness();
        let workflow = seeded(&h, Workflow::new("org-1", WorkflowState::IcpPending)).await;

        let outcome = h
            .engine
            .transition(TransitionRequest::new(workflow.id, "org-1", WorkflowEvent::IcpStart))
            .await
            .unwrap();
        let TransitionOutcome::Applied { dispatch_id, .. } = outcome else {
            panic!("expected applied, got {outcome:?}");
        };

        let stored = h.engine.workflow(workflow.id, "org-1").await.unwrap();
        assert_eq!(stored.active_attempt(Step::Icp), dispatch_id);
    }

    #[tokio::test]
    async fn test_unmapped_transition_emits_nothing_and_clears_attempt() {
        let store = Arc::new(InMemoryWorkflowStore::new());
        let transport = Arc::new(RecordingJobTransport::new());
        let stale = Uuid::new_v4();
        let workflow = Workflow::new("org-1", WorkflowState::IcpFailed)
            .with_metadata(Step::Icp.attempt_key(), json!(stale.to_string()));
        store.insert_workflow(&workflow).await.unwrap();

        let engine = IntentEngine::builder(store.clone(), transport.clone())
            .graph(AutomationGraph::standard().without_entry(WorkflowEvent::IcpRetry))
            .strict_automation(false)
            .build()
            .unwrap();

        let outcome = engine
            .transition(TransitionRequest::new(workflow.id, "org-1", WorkflowEvent::IcpRetry))
            .await
            .unwrap();
        assert!(outcome.success());
        assert!(transport.sent().await.is_empty());

        let stored = engine.workflow(workflow.id, "org-1").await.unwrap();
        assert_eq!(stored.state, WorkflowState::IcpRunning);
        assert_eq!(stored.active_attempt(Step::Icp), None);
    }

    #[tokio::test]
    async fn test_worker_event_is_refused_on_caller_path() {
        let h = harness();
        let workflow = seeded(&h, Workflow::new("org-1", WorkflowState::IcpRunning)).await;

        for event in [WorkflowEvent::IcpSuccess, WorkflowEvent::IcpFailed] {
            let outcome = h
                .engine
                .transition(TransitionRequest::new(workflow.id, "org-1", event).by("user-1"))
                .await
                .unwrap();
            assert_eq!(
                outcome,
                TransitionOutcome::IllegalTransition {
                    current_state: WorkflowState::IcpRunning,
                    event,
                }
            );
        }

        let stored = h.engine.workflow(workflow.id, "org-1").await.unwrap();
        assert_eq!(stored, workflow);
        assert!(h.transport.sent().await.is_empty());
        assert_eq!(h.audit.count(AuditAction::TransitionIllegal), 2);
        assert_eq!(h.audit.count(AuditAction::TransitionApplied), 0);
    }

    #[tokio::test]
    async fn test_illegal_event_changes_nothing() {
        let h = harness();
        let workflow = seeded(&h, Workflow::new("org-1", WorkflowState::IcpPending)).await;

        let outcome = h
            .engine
            .transition(TransitionRequest::new(workflow.id, "org-1", WorkflowEvent::LongtailRetry))
            .await
            .unwrap();

        assert_eq!(outcome.http_status(), 409);
        assert_eq!(outcome.error_code(), Some("ILLEGAL_TRANSITION"));
        assert_eq!(
            h.engine.workflow(workflow.id, "org-1").await.unwrap().state,
            WorkflowState::IcpPending
        );
        assert_eq!(h.audit.count(AuditAction::TransitionIllegal), 1);
        assert_eq!(h.engine.metrics().get_stats().illegal, 1);
    }

    #[tokio::test]
    async fn test_gate_blocks_legal_event() {
        let h = harness();
        let workflow = seeded(&h, Workflow::new("org-1", WorkflowState::CompetitorPending)).await;

        let outcome = h
            .engine
            .transition(TransitionRequest::new(workflow.id, "org-1", WorkflowEvent::CompetitorStart))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            TransitionOutcome::GateBlocked {
                reason: "1 requirement(s) unmet for competitors".to_string(),
                blocked_by: vec!["metadata:icp_generation".to_string()],
            }
        );
        assert_eq!(outcome.http_status(), 423);
        assert!(h.transport.sent().await.is_empty());
        assert_eq!(h.audit.count(AuditAction::GateBlocked), 1);
    }

    #[tokio::test]
    async fn test_unknown_workflow_is_an_error_and_audited() {
        let h = harness();
        let err = h
            .engine
            .transition(TransitionRequest::new(Uuid::new_v4(), "org-1", WorkflowEvent::IcpStart).by("user-9"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::WorkflowNotFound { .. }));

        let entries = h.audit.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::WorkflowNotFound);
        assert_eq!(entries[0].event, Some(WorkflowEvent::IcpStart));
        assert_eq!(entries[0].actor_id.as_deref(), Some("user-9"));
    }

    #[tokio::test]
    async fn test_dispatch_failure_keeps_state_and_is_recoverable() {
        let store = Arc::new(InMemoryWorkflowStore::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let workflow = Workflow::new("org-1", WorkflowState::CompetitorPending)
            .with_metadata("icp_generation", json!(true));
        store.insert_workflow(&workflow).await.unwrap();

        let mut transport = MockJobTransport::new();
        let mut calls = 0;
        transport.expect_send().times(2).returning(move |job, _| {
            calls += 1;
            if calls == 1 {
                Err(DispatchError::Rejected {
                    job: job.to_string(),
                    reason: "broker offline".into(),
                })
            } else {
                Ok(())
            }
        });

        let engine = IntentEngine::builder(store.clone(), Arc::new(transport))
            .audit(audit.clone())
            .build()
            .unwrap();

        let outcome = engine
            .transition(TransitionRequest::new(workflow.id, "org-1", WorkflowEvent::CompetitorStart))
            .await
            .unwrap();
        let TransitionOutcome::Applied { to, emitted_event, dispatch_error, .. } = outcome.clone() else {
            panic!("expected applied, got {outcome:?}");
        };
        assert_eq!(to, WorkflowState::CompetitorRunning);
        assert!(emitted_event.is_none());
        assert!(dispatch_error.unwrap().contains("broker offline"));
        assert_eq!(audit.count(AuditAction::DispatchFailed), 1);

        let redispatch = engine.redispatch(workflow.id, "org-1", Some("ops")).await.unwrap();
        assert_eq!(redispatch.job, "competitors.job");
        assert_eq!(redispatch.payload.trigger, WorkflowEvent::CompetitorStart);
        assert_eq!(audit.count(AuditAction::Redispatched), 1);

        let stored = engine.workflow(workflow.id, "org-1").await.unwrap();
        assert_eq!(stored.state, WorkflowState::CompetitorRunning);
        assert_eq!(
            stored.active_attempt(Step::Competitors),
            Some(redispatch.payload.dispatch_id)
        );
    }

    #[tokio::test]
    async fn test_redispatch_outside_running_state() {
        let h = harness();
        let workflow = seeded(&h, Workflow::new("org-1", WorkflowState::CompetitorCompleted)).await;

        let err = h.engine.redispatch(workflow.id, "org-1", None).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::NothingToDispatch { state: WorkflowState::CompetitorCompleted, .. }
        ));
    }

    #[tokio::test]
    async fn test_store_failure_is_audited_and_retryable() {
        let mut store = MockWorkflowStore::new();
        store
            .expect_load_workflow()
            .returning(|_, _| Err(StoreError::Unavailable("pool timed out".into())));
        let audit = Arc::new(MemoryAuditSink::new());

        let engine = IntentEngine::builder(Arc::new(store), Arc::new(RecordingJobTransport::new()))
            .audit(audit.clone())
            .build()
            .unwrap();

        let err = engine
            .transition(TransitionRequest::new(Uuid::new_v4(), "org-1", WorkflowEvent::IcpStart))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(audit.count(AuditAction::StoreError), 1);
        assert_eq!(engine.metrics().get_stats().store_errors, 1);
    }

    #[tokio::test]
    async fn test_strict_builder_refuses_dead_ends() {
        let store = Arc::new(InMemoryWorkflowStore::new());
        let graph = AutomationGraph::standard().without_entry(WorkflowEvent::ClusteringSuccess);

        let strict = IntentEngine::builder(store.clone(), Arc::new(RecordingJobTransport::new()))
            .graph(graph.clone())
            .build();
        assert!(matches!(strict, Err(EngineError::Graph(GraphError::DeadEnds(_)))));

        let lenient = IntentEngine::builder(store, Arc::new(RecordingJobTransport::new()))
            .graph(graph)
            .strict_automation(false)
            .build();
        assert!(lenient.is_ok());
    }

    #[tokio::test]
    async fn test_record_approval_requires_workflow() {
        let h = harness();
        let workflow = seeded(&h, Workflow::new("org-1", WorkflowState::CompetitorCompleted)).await;
        let approval = NewApproval {
            workflow_id: workflow.id,
            organization_id: "org-1".to_string(),
            entity_type: "seed_keywords".to_string(),
            decision: crate::workflows::ApprovalDecision::Approved,
            approver_id: "user-1".to_string(),
            notes: Some("looks good".to_string()),
        };

        let recorded = h.engine.record_approval(approval.clone()).await.unwrap();
        assert_eq!(recorded.entity_type, "seed_keywords");
        assert_eq!(h.audit.count(AuditAction::ApprovalRecorded), 1);

        let mut foreign = approval;
        foreign.organization_id = "org-2".to_string();
        assert!(matches!(
            h.engine.record_approval(foreign).await,
            Err(EngineError::WorkflowNotFound { .. })
        ));
    }
}
