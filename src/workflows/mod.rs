// Workflow state model: closed states and events, the transition table,
// and the records persisted alongside a workflow.

pub mod guard;
pub mod state;
pub mod types;

pub use guard::TransitionGuard;
pub use state::{
    legal_events, next_state, target_of, EventOrigin, ParseError, Step, WorkflowEvent,
    WorkflowState,
};
pub use types::{
    Approval, ApprovalDecision, CompletionCommit, IdempotencyRecord, NewApproval, StepArtifact,
    StepAttempt, Usage, UsageRecord, Workflow,
};
