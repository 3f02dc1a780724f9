use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::transport::{JobMessage, JobPayload};
use crate::config::EngineConfig;
use crate::engine::{CompletionOutcome, EngineError, IntentEngine, StepCompletion};
use crate::workflows::{Step, Usage, Workflow};

/// What a worker hands back when its step succeeds
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub artifact: Value,
    pub usage: Option<Usage>,
}

impl StepOutput {
    pub fn new(artifact: Value) -> Self {
        Self {
            artifact,
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("{0}")]
    Failed(String),

    #[error("Step produced no results: {0}")]
    EmptyResult(String),
}

/// Does the work inside one pipeline step
#[async_trait]
pub trait StepWorker: Send + Sync {
    fn step(&self) -> Step;

    async fn run(&self, workflow: &Workflow, payload: &JobPayload) -> Result<StepOutput, WorkerError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobReport {
    Completed(CompletionOutcome),
    Failed(CompletionOutcome),
    /// The workflow was not in the step's running state when the job arrived,
    /// or the job belongs to a superseded attempt
    Skipped { reason: String },
    NoWorker { job: String },
}

/// Consumes job messages and drives the registered worker for each one
pub struct JobRunner {
    engine: Arc<IntentEngine>,
    workers: HashMap<String, Arc<dyn StepWorker>>,
    concurrency: usize,
}

impl JobRunner {
    pub fn new(engine: Arc<IntentEngine>) -> Self {
        Self {
            engine,
            workers: HashMap::new(),
            concurrency: 1,
        }
    }

    pub fn from_config(engine: Arc<IntentEngine>, config: &EngineConfig) -> Self {
        Self::new(engine).concurrency(config.runner_concurrency)
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Register a worker under the job name the graph maps to its step
    pub fn with_worker(mut self, worker: Arc<dyn StepWorker>) -> Self {
        let step = worker.step();
        let job = step
            .running_state()
            .and_then(|state| self.engine.graph().job_for_state(state))
            .map(str::to_string);

        match job {
            Some(job) => {
                debug!(job = %job, step = %step, "Registered step worker");
                self.workers.insert(job, worker);
            }
            None => warn!(step = %step, "No job maps to this step; worker not registered"),
        }
        self
    }

    /// Run one delivered job to its reported outcome
    pub async fn handle(&self, message: JobMessage) -> Result<JobReport, EngineError> {
        let JobMessage { job, payload } = message;

        let Some(worker) = self.workers.get(&job) else {
            warn!(job = %job, "No worker registered for job");
            return Ok(JobReport::NoWorker { job });
        };
        let step = worker.step();

        let workflow = self
            .engine
            .workflow(payload.workflow_id, &payload.organization_id)
            .await?;
        if Some(workflow.state) != step.running_state() {
            debug!(
                job = %job,
                workflow_id = %workflow.id,
                state = %workflow.state,
                "Skipping job for step that is not running"
            );
            return Ok(JobReport::Skipped {
                reason: format!("workflow is {}", workflow.state),
            });
        }
        let token = payload.dispatch_id.to_string();
        if !workflow.is_current_attempt(step, &token) {
            debug!(
                job = %job,
                workflow_id = %workflow.id,
                dispatch_id = %payload.dispatch_id,
                active = ?workflow.active_attempt(step),
                "Skipping job from a superseded attempt"
            );
            return Ok(JobReport::Skipped {
                reason: "superseded attempt".to_string(),
            });
        }

        match worker.run(&workflow, &payload).await {
            Ok(output) => {
                let outcome = self
                    .engine
                    .complete_step(StepCompletion {
                        workflow_id: workflow.id,
                        organization_id: workflow.organization_id.clone(),
                        step,
                        idempotency_token: token,
                        artifact: output.artifact,
                        usage: output.usage,
                    })
                    .await?;
                Ok(JobReport::Completed(outcome))
            }
            Err(e) => {
                warn!(job = %job, workflow_id = %workflow.id, error = %e, "Step worker failed");
                let outcome = self
                    .engine
                    .fail_step(
                        workflow.id,
                        &workflow.organization_id,
                        step,
                        &token,
                        &e.to_string(),
                    )
                    .await?;
                Ok(JobReport::Failed(outcome))
            }
        }
    }

    /// Process queued jobs one at a time, including jobs they chain, until the
    /// queue is empty
    pub async fn run_until_idle(
        &self,
        receiver: &mut mpsc::UnboundedReceiver<JobMessage>,
    ) -> Result<Vec<JobReport>, EngineError> {
        let mut reports = Vec::new();
        while let Ok(message) = receiver.try_recv() {
            reports.push(self.handle(message).await?);
        }
        Ok(reports)
    }

    /// Serve jobs until every sender is dropped
    pub async fn run(self: Arc<Self>, mut receiver: mpsc::UnboundedReceiver<JobMessage>) {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        info!(concurrency = self.concurrency, "Job runner started");

        while let Some(message) = receiver.recv().await {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let runner = self.clone();
            tasks.spawn(async move {
                let job = message.job.clone();
                match runner.handle(message).await {
                    Ok(report) => debug!(job = %job, report = ?report, "Job finished"),
                    Err(e) => error!(job = %job, error = %e, retryable = e.is_retryable(), "Job failed"),
                }
                drop(permit);
            });

            while tasks.try_join_next().is_some() {}
        }

        while tasks.join_next().await.is_some() {}
        info!("Job runner stopped");
    }
}
