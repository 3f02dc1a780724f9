// The unified transition function and the pieces it composes

pub mod completion;
pub mod errors;
pub mod executor;
pub mod transition;

pub use completion::{CompletionOutcome, StepCompletion};
pub use errors::EngineError;
pub use executor::{AtomicTransitionExecutor, ExecutionResult};
pub use transition::{
    IntentEngine, IntentEngineBuilder, Redispatch, TransitionOutcome, TransitionRequest,
};
