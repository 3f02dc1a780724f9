// Human and data preconditions checked before gated transitions

pub mod resolver;

pub use resolver::{requirements_for, BlockingConditionResolver, GateDecision, GateRequirements};
