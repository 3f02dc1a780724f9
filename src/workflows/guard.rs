use super::state::{legal_events, next_state, WorkflowEvent, WorkflowState};

/// Pure lookup over the transition table. Holds no state.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionGuard;

impl TransitionGuard {
    pub fn can_transition(state: WorkflowState, event: WorkflowEvent) -> bool {
        next_state(state, event).is_some()
    }

    /// Target state for a legal event, or `None` when the event must be refused
    pub fn evaluate(state: WorkflowState, event: WorkflowEvent) -> Option<WorkflowState> {
        next_state(state, event)
    }

    pub fn allowed_events(state: WorkflowState) -> Vec<WorkflowEvent> {
        legal_events(state)
    }
}
