// Intent Engine - workflow orchestrator for the content pipeline
// This exposes the core components for embedding, testing and the CLI

pub mod audit;
pub mod automation;
pub mod cli;
pub mod config;
pub mod engine;
pub mod gates;
pub mod jobs;
pub mod observability;
pub mod store;
pub mod telemetry;
pub mod workflows;

// Re-export key types for easy access
pub use audit::{AuditAction, AuditEntry, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use automation::{AutomationGraph, GraphError};
pub use config::IntentEngineConfig;
pub use engine::{
    CompletionOutcome, EngineError, IntentEngine, IntentEngineBuilder, StepCompletion,
    TransitionOutcome, TransitionRequest,
};
pub use gates::{BlockingConditionResolver, GateDecision};
pub use jobs::{
    ChannelJobTransport, JobMessage, JobPayload, JobReport, JobRunner, JobTransport, StepOutput,
    StepWorker, WorkerError,
};
pub use observability::{OperationTimer, TransitionMetrics, TransitionStats};
pub use store::{InMemoryWorkflowStore, StoreError, WorkflowStore};
#[cfg(feature = "database")]
pub use store::SqliteWorkflowStore;
pub use telemetry::{create_transition_span, generate_correlation_id, init_telemetry};
pub use workflows::{
    Step, TransitionGuard, Usage, Workflow, WorkflowEvent, WorkflowState,
};
