// Which background job starts when a transition enters automated work

pub mod graph;

pub use graph::{AutomationGraph, GraphError};
