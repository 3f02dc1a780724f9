use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, Instrument};
use uuid::Uuid;

use super::errors::EngineError;
use super::transition::{attempt_for, IntentEngine, TransitionOutcome};
use crate::audit::{AuditAction, AuditEntry};
use crate::store::CommitOutcome;
use crate::telemetry::{create_transition_span, generate_correlation_id};
use crate::workflows::{
    CompletionCommit, Step, TransitionGuard, Usage, Workflow, WorkflowEvent, WorkflowState,
};

/// A worker's report that a step finished, with what it produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepCompletion {
    pub workflow_id: Uuid,
    pub organization_id: String,
    pub step: Step,
    /// One per logical execution; reused verbatim when the report is retried
    pub idempotency_token: String,
    pub artifact: Value,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CompletionOutcome {
    Applied {
        from: WorkflowState,
        to: WorkflowState,
        emitted_event: Option<String>,
        dispatch_id: Option<Uuid>,
        dispatch_error: Option<String>,
    },
    /// This token was already recorded; nothing was written
    Duplicate { current_state: WorkflowState },
    /// The workflow is already past the reported step
    Replayed { current_state: WorkflowState },
    IllegalTransition {
        current_state: WorkflowState,
        event: WorkflowEvent,
    },
    Conflict { current_state: Option<WorkflowState> },
}

impl CompletionOutcome {
    pub fn applied(&self) -> bool {
        matches!(self, CompletionOutcome::Applied { .. })
    }

    pub fn http_status(&self) -> u16 {
        match self {
            CompletionOutcome::Applied { .. }
            | CompletionOutcome::Duplicate { .. }
            | CompletionOutcome::Replayed { .. } => 200,
            CompletionOutcome::IllegalTransition { .. } | CompletionOutcome::Conflict { .. } => 409,
        }
    }

    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            CompletionOutcome::IllegalTransition { .. } => Some("ILLEGAL_TRANSITION"),
            CompletionOutcome::Conflict { .. } => Some("CONFLICT"),
            _ => None,
        }
    }
}

impl IntentEngine {
    /// Record a finished step and advance the workflow, at most once per token.
    ///
    /// The idempotency record, state change, metadata flag, artifact and usage
    /// commit together. A report for a step the workflow has already left is
    /// answered from the stored state without writing anything.
    pub async fn complete_step(
        &self,
        completion: StepCompletion,
    ) -> Result<CompletionOutcome, EngineError> {
        let StepCompletion {
            workflow_id,
            organization_id,
            step,
            idempotency_token,
            artifact,
            usage,
        } = completion;

        if idempotency_token.trim().is_empty() {
            return Err(EngineError::InvalidToken(idempotency_token));
        }
        let (running, event) = match (step.running_state(), step.success_event()) {
            (Some(running), Some(event)) => (running, event),
            _ => return Err(EngineError::NotAutomated(step)),
        };
        let target =
            TransitionGuard::evaluate(running, event).ok_or(EngineError::NotAutomated(step))?;

        let correlation_id = generate_correlation_id();
        let span = create_transition_span(
            "complete_step",
            workflow_id,
            Some(event.as_str()),
            &correlation_id,
        );

        async move {
            let workflow = self
                .load_for(workflow_id, &organization_id, Some(event), None)
                .await?;

            if workflow.state != running {
                return self
                    .settle_stale_completion(&workflow, step, event, &idempotency_token)
                    .await;
            }

            let prepared = self.prepare_job(event, workflow_id, &organization_id);
            let commit = CompletionCommit {
                workflow_id,
                organization_id: organization_id.clone(),
                step,
                token: idempotency_token.clone(),
                expected_state: running,
                next_state: target,
                artifact,
                usage,
                next_attempt: attempt_for(target, prepared.as_ref()),
            };

            let outcome = match self.executor.execute_completion(&commit).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    return Err(self.store_failure(workflow_id, &organization_id, Some(event), None, e))
                }
            };

            match outcome {
                CommitOutcome::Applied(written) => {
                    self.metrics.record_applied();
                    let dispatch = self.dispatch(prepared, None).await;

                    info!(
                        workflow_id = %workflow_id,
                        step = %step,
                        to = %written.state,
                        job = dispatch.job.as_deref(),
                        "Step completed"
                    );
                    self.audit.record(
                        AuditEntry::new(AuditAction::StepCompleted, workflow_id, &organization_id)
                            .event(event)
                            .states(Some(running), Some(written.state))
                            .details(json!({
                                "idempotency_token": idempotency_token,
                                "job": dispatch.job,
                                "dispatch_id": dispatch.dispatch_id,
                                "dispatch_error": dispatch.error,
                            })),
                    );

                    Ok(CompletionOutcome::Applied {
                        from: running,
                        to: written.state,
                        emitted_event: dispatch.job,
                        dispatch_id: dispatch.dispatch_id,
                        dispatch_error: dispatch.error,
                    })
                }
                CommitOutcome::Duplicate => {
                    let current = self
                        .load_for(workflow_id, &organization_id, Some(event), None)
                        .await?;
                    Ok(self.duplicate(&current, event, &idempotency_token))
                }
                CommitOutcome::StateMoved(current_state) => {
                    self.metrics.record_conflict();
                    info!(
                        workflow_id = %workflow_id,
                        step = %step,
                        current = ?current_state,
                        "Completion lost the race; rolled back"
                    );
                    self.audit.record(
                        AuditEntry::new(AuditAction::TransitionConflict, workflow_id, &organization_id)
                            .event(event)
                            .states(Some(running), current_state)
                            .details(json!({ "idempotency_token": idempotency_token })),
                    );
                    Ok(CompletionOutcome::Conflict { current_state })
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Report that a step's worker failed. `token` is the dispatch id of the
    /// job that failed; a report from an attempt other than the current one is
    /// answered `Replayed` and changes nothing. Nothing is recorded besides the
    /// state change and audit entry.
    pub async fn fail_step(
        &self,
        workflow_id: Uuid,
        organization_id: &str,
        step: Step,
        token: &str,
        error: &str,
    ) -> Result<CompletionOutcome, EngineError> {
        if token.trim().is_empty() {
            return Err(EngineError::InvalidToken(token.to_string()));
        }
        let (failed, event) = match (step.failed_state(), step.failure_event()) {
            (Some(failed), Some(event)) => (failed, event),
            _ => return Err(EngineError::NotAutomated(step)),
        };

        let correlation_id = generate_correlation_id();
        let span =
            create_transition_span("fail_step", workflow_id, Some(event.as_str()), &correlation_id);

        async move {
            let workflow = self
                .load_for(workflow_id, organization_id, Some(event), None)
                .await?;
            let settled = |state: WorkflowState| state == failed || state.has_passed(step);
            let details = json!({ "error": error, "idempotency_token": token });

            if settled(workflow.state) {
                return Ok(self.replayed(&workflow, event, details));
            }
            if !workflow.is_current_attempt(step, token) {
                info!(
                    workflow_id = %workflow_id,
                    step = %step,
                    active = ?workflow.active_attempt(step),
                    idempotency_token = token,
                    "Failure reported by a superseded attempt"
                );
                return Ok(self.replayed(&workflow, event, details));
            }

            let outcome = self.apply_event(&workflow, event, None, details).await?;

            Ok(match outcome {
                TransitionOutcome::Applied {
                    from,
                    to,
                    emitted_event,
                    dispatch_id,
                    dispatch_error,
                } => CompletionOutcome::Applied {
                    from,
                    to,
                    emitted_event,
                    dispatch_id,
                    dispatch_error,
                },
                TransitionOutcome::Conflict {
                    current_state: Some(state),
                } if settled(state) => CompletionOutcome::Replayed {
                    current_state: state,
                },
                TransitionOutcome::Conflict { current_state } => {
                    CompletionOutcome::Conflict { current_state }
                }
                TransitionOutcome::IllegalTransition {
                    current_state,
                    event,
                } => CompletionOutcome::IllegalTransition {
                    current_state,
                    event,
                },
                // Failure events are never gated
                TransitionOutcome::GateBlocked { .. } => CompletionOutcome::IllegalTransition {
                    current_state: workflow.state,
                    event,
                },
            })
        }
        .instrument(span)
        .await
    }

    /// The workflow is not in the step's running state. Answer from what is stored.
    async fn settle_stale_completion(
        &self,
        workflow: &Workflow,
        step: Step,
        event: WorkflowEvent,
        token: &str,
    ) -> Result<CompletionOutcome, EngineError> {
        let recorded = match self
            .store
            .find_idempotency_record(workflow.id, step, token)
            .await
        {
            Ok(recorded) => recorded,
            Err(e) => {
                return Err(self.store_failure(
                    workflow.id,
                    &workflow.organization_id,
                    Some(event),
                    None,
                    e,
                ))
            }
        };

        if recorded.is_some() {
            return Ok(self.duplicate(workflow, event, token));
        }

        if workflow.state.has_passed(step) {
            return Ok(self.replayed(
                workflow,
                event,
                json!({ "idempotency_token": token }),
            ));
        }

        self.metrics.record_illegal();
        info!(
            workflow_id = %workflow.id,
            step = %step,
            state = %workflow.state,
            "Completion reported for a step that is not running"
        );
        self.audit.record(
            AuditEntry::new(AuditAction::TransitionIllegal, workflow.id, &workflow.organization_id)
                .event(event)
                .states(Some(workflow.state), None)
                .details(json!({ "idempotency_token": token })),
        );
        Ok(CompletionOutcome::IllegalTransition {
            current_state: workflow.state,
            event,
        })
    }

    fn duplicate(&self, workflow: &Workflow, event: WorkflowEvent, token: &str) -> CompletionOutcome {
        self.metrics.record_duplicate();
        info!(
            workflow_id = %workflow.id,
            idempotency_token = token,
            "Duplicate completion ignored"
        );
        self.audit.record(
            AuditEntry::new(AuditAction::CompletionDuplicate, workflow.id, &workflow.organization_id)
                .event(event)
                .states(Some(workflow.state), Some(workflow.state))
                .details(json!({ "idempotency_token": token })),
        );
        CompletionOutcome::Duplicate {
            current_state: workflow.state,
        }
    }

    fn replayed(&self, workflow: &Workflow, event: WorkflowEvent, details: Value) -> CompletionOutcome {
        info!(
            workflow_id = %workflow.id,
            state = %workflow.state,
            event = event.as_str(),
            "Worker report replayed against settled step"
        );
        self.audit.record(
            AuditEntry::new(AuditAction::CompletionReplayed, workflow.id, &workflow.organization_id)
                .event(event)
                .states(Some(workflow.state), Some(workflow.state))
                .details(details),
        );
        CompletionOutcome::Replayed {
            current_state: workflow.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::jobs::RecordingJobTransport;
    use crate::store::{InMemoryWorkflowStore, WorkflowStore};
    use std::sync::Arc;

    async fn engine_with(
        workflow: &Workflow,
    ) -> (IntentEngine, Arc<InMemoryWorkflowStore>, Arc<RecordingJobTransport>, Arc<MemoryAuditSink>) {
        let store = Arc::new(InMemoryWorkflowStore::new());
        store.insert_workflow(workflow).await.unwrap();
        let transport = Arc::new(RecordingJobTransport::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let engine = IntentEngine::builder(store.clone(), transport.clone())
            .audit(audit.clone())
            .build()
            .unwrap();
        (engine, store, transport, audit)
    }

    fn completion(workflow: &Workflow, step: Step, token: &str) -> StepCompletion {
        StepCompletion {
            workflow_id: workflow.id,
            organization_id: workflow.organization_id.clone(),
            step,
            idempotency_token: token.to_string(),
            artifact: json!({ "items": [1, 2, 3] }),
            usage: Some(Usage::new("llm_tokens", 42)),
        }
    }

    fn with_attempt(workflow: Workflow, step: Step, dispatch_id: Uuid) -> Workflow {
        workflow.with_metadata(step.attempt_key(), json!(dispatch_id.to_string()))
    }

    #[tokio::test]
    async fn test_completion_advances_and_chains_next_job() {
        let workflow = Workflow::new("org-1", WorkflowState::LongtailRunning);
        let (engine, store, transport, audit) = engine_with(&workflow).await;

        let outcome = engine
            .complete_step(completion(&workflow, Step::Longtails, "tok-1"))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            CompletionOutcome::Applied {
                from: WorkflowState::LongtailRunning,
                to: WorkflowState::FilteringRunning,
                emitted_event: Some("filtering.job".to_string()),
                dispatch_id: transport.sent().await.first().map(|m| m.payload.dispatch_id),
                dispatch_error: None,
            }
        );
        let stored = store.load_workflow(workflow.id, "org-1").await.unwrap().unwrap();
        assert!(stored.has_metadata("longtail_expansion"));
        assert_eq!(audit.count(AuditAction::StepCompleted), 1);
    }

    #[tokio::test]
    async fn test_same_token_twice_is_a_duplicate() {
        let workflow = Workflow::new("org-1", WorkflowState::CompetitorRunning);
        let (engine, store, transport, _) = engine_with(&workflow).await;

        let first = engine
            .complete_step(completion(&workflow, Step::Competitors, "tok-1"))
            .await
            .unwrap();
        let second = engine
            .complete_step(completion(&workflow, Step::Competitors, "tok-1"))
            .await
            .unwrap();

        assert!(first.applied());
        assert_eq!(
            second,
            CompletionOutcome::Duplicate {
                current_state: WorkflowState::CompetitorCompleted
            }
        );
        assert_eq!(store.list_artifacts(workflow.id, "org-1", None).await.unwrap().len(), 1);
        assert_eq!(store.list_usage(workflow.id, "org-1").await.unwrap().len(), 1);
        // competitor success waits for seed approval, so no job either time
        assert!(transport.sent().await.is_empty());
        assert_eq!(engine.metrics().get_stats().duplicates, 1);
    }

    #[tokio::test]
    async fn test_new_token_after_step_passed_is_replayed() {
        let workflow = Workflow::new("org-1", WorkflowState::ValidationRunning);
        let (engine, store, _, audit) = engine_with(&workflow).await;

        let outcome = engine
            .complete_step(completion(&workflow, Step::Filtering, "late-token"))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            CompletionOutcome::Replayed {
                current_state: WorkflowState::ValidationRunning
            }
        );
        assert_eq!(outcome.http_status(), 200);
        assert!(store.list_artifacts(workflow.id, "org-1", None).await.unwrap().is_empty());
        assert_eq!(audit.count(AuditAction::CompletionReplayed), 1);
    }

    #[tokio::test]
    async fn test_completion_for_step_not_started_is_illegal() {
        let workflow = Workflow::new("org-1", WorkflowState::CompetitorPending);
        let (engine, _, _, _) = engine_with(&workflow).await;

        let outcome = engine
            .complete_step(completion(&workflow, Step::Competitors, "tok-1"))
            .await
            .unwrap();
        assert_eq!(outcome.error_code(), Some("ILLEGAL_TRANSITION"));
    }

    #[tokio::test]
    async fn test_rejects_blank_token_and_manual_step() {
        let workflow = Workflow::new("org-1", WorkflowState::CompetitorRunning);
        let (engine, _, _, _) = engine_with(&workflow).await;

        assert!(matches!(
            engine.complete_step(completion(&workflow, Step::Competitors, "  ")).await,
            Err(EngineError::InvalidToken(_))
        ));
        assert!(matches!(
            engine.complete_step(completion(&workflow, Step::SeedKeywords, "tok")).await,
            Err(EngineError::NotAutomated(Step::SeedKeywords))
        ));
    }

    #[tokio::test]
    async fn test_fail_step_then_replay() {
        let workflow = Workflow::new("org-1", WorkflowState::ClusteringRunning);
        let (engine, store, transport, _) = engine_with(&workflow).await;

        let first = engine
            .fail_step(workflow.id, "org-1", Step::Clustering, "tok-1", "model timeout")
            .await
            .unwrap();
        assert!(first.applied());

        let again = engine
            .fail_step(workflow.id, "org-1", Step::Clustering, "tok-1", "model timeout")
            .await
            .unwrap();
        assert_eq!(
            again,
            CompletionOutcome::Replayed {
                current_state: WorkflowState::ClusteringFailed
            }
        );

        assert!(store.list_artifacts(workflow.id, "org-1", None).await.unwrap().is_empty());
        assert!(transport.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_failure_from_superseded_attempt_changes_nothing() {
        let current = Uuid::new_v4();
        let workflow = with_attempt(
            Workflow::new("org-1", WorkflowState::FilteringRunning),
            Step::Filtering,
            current,
        );
        let (engine, store, _, audit) = engine_with(&workflow).await;

        let stale = engine
            .fail_step(workflow.id, "org-1", Step::Filtering, &Uuid::new_v4().to_string(), "timeout")
            .await
            .unwrap();
        assert_eq!(
            stale,
            CompletionOutcome::Replayed {
                current_state: WorkflowState::FilteringRunning
            }
        );
        assert_eq!(audit.count(AuditAction::CompletionReplayed), 1);
        let stored = store.load_workflow(workflow.id, "org-1").await.unwrap().unwrap();
        assert_eq!(stored.state, WorkflowState::FilteringRunning);

        let live = engine
            .fail_step(workflow.id, "org-1", Step::Filtering, &current.to_string(), "timeout")
            .await
            .unwrap();
        assert!(live.applied());
    }

    #[tokio::test]
    async fn test_fail_step_rejects_blank_token() {
        let workflow = Workflow::new("org-1", WorkflowState::FilteringRunning);
        let (engine, _, _, _) = engine_with(&workflow).await;

        assert!(matches!(
            engine.fail_step(workflow.id, "org-1", Step::Filtering, " ", "timeout").await,
            Err(EngineError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn test_completion_records_next_attempt() {
        let workflow = Workflow::new("org-1", WorkflowState::FilteringRunning);
        let (engine, store, transport, _) = engine_with(&workflow).await;

        let outcome = engine
            .complete_step(completion(&workflow, Step::Filtering, "tok-1"))
            .await
            .unwrap();
        let CompletionOutcome::Applied { to, dispatch_id, .. } = outcome else {
            panic!("expected applied, got {outcome:?}");
        };
        assert_eq!(to, WorkflowState::ClusteringRunning);

        let sent = transport.sent().await;
        assert_eq!(dispatch_id, Some(sent[0].payload.dispatch_id));
        let stored = store.load_workflow(workflow.id, "org-1").await.unwrap().unwrap();
        assert_eq!(stored.active_attempt(Step::Clustering), dispatch_id);
    }
}
