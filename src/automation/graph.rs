use std::collections::HashMap;
use thiserror::Error;

use crate::workflows::{target_of, ParseError, WorkflowEvent, WorkflowState};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("Invalid automation entry: {0}")]
    InvalidEvent(#[from] ParseError),

    #[error("Events enter a running state without a job: {}", list_events(.0))]
    DeadEnds(Vec<WorkflowEvent>),
}

fn list_events(events: &[WorkflowEvent]) -> String {
    events
        .iter()
        .map(|e| e.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Maps a triggering event to the job event emitted once the transition applies.
///
/// Built once at startup and passed to the engine by value. An event that
/// moves a workflow into a running state must have an entry here, otherwise
/// the workflow would wait forever for a worker nobody started.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AutomationGraph {
    entries: HashMap<WorkflowEvent, String>,
}

impl AutomationGraph {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Default wiring for the nine-stage pipeline
    pub fn standard() -> Self {
        use WorkflowEvent::*;
        let wiring: [(&[WorkflowEvent], &str); 8] = [
            (&[IcpStart, IcpRetry], "icp.job"),
            (&[CompetitorStart, CompetitorRetry], "competitors.job"),
            (&[SeedsApproved, LongtailRetry], "longtails.job"),
            (&[LongtailSuccess, FilteringRetry], "filtering.job"),
            (&[FilteringSuccess, ClusteringRetry], "clustering.job"),
            (&[ClusteringSuccess, ValidationRetry], "validation.job"),
            (&[ValidationSuccess, SubtopicsRetry], "subtopics.job"),
            (&[SubtopicsApproved, ArticlesRetry], "articles.job"),
        ];

        let mut graph = Self::empty();
        for (events, job) in wiring {
            for event in events {
                graph = graph.with_entry(*event, job);
            }
        }
        graph
    }

    pub fn with_entry(mut self, event: WorkflowEvent, job: impl Into<String>) -> Self {
        self.entries.insert(event, job.into());
        self
    }

    pub fn without_entry(mut self, event: WorkflowEvent) -> Self {
        self.entries.remove(&event);
        self
    }

    /// Apply `EVENT_NAME = "job.name"` overrides. An empty job name removes the entry.
    pub fn with_overrides(mut self, overrides: &HashMap<String, String>) -> Result<Self, GraphError> {
        for (event_name, job) in overrides {
            let event: WorkflowEvent = event_name.parse()?;
            if job.trim().is_empty() {
                self.entries.remove(&event);
            } else {
                self.entries.insert(event, job.trim().to_string());
            }
        }
        Ok(self)
    }

    pub fn job_for(&self, event: WorkflowEvent) -> Option<&str> {
        self.entries.get(&event).map(String::as_str)
    }

    /// First mapped event entering `state`, with its job
    pub fn entry_for_state(&self, state: WorkflowState) -> Option<(WorkflowEvent, &str)> {
        WorkflowEvent::ALL
            .iter()
            .filter(|event| target_of(**event) == Some(state))
            .find_map(|event| self.job_for(*event).map(|job| (*event, job)))
    }

    /// Job that services a running state
    pub fn job_for_state(&self, state: WorkflowState) -> Option<&str> {
        self.entry_for_state(state).map(|(_, job)| job)
    }

    /// Events that enter a running state but have no job mapped
    pub fn dead_ends(&self) -> Vec<WorkflowEvent> {
        WorkflowEvent::ALL
            .iter()
            .copied()
            .filter(|event| target_of(*event).is_some_and(|s| s.is_running()))
            .filter(|event| !self.entries.contains_key(event))
            .collect()
    }

    pub fn validate(&self) -> Result<(), GraphError> {
        let dead_ends = self.dead_ends();
        if dead_ends.is_empty() {
            Ok(())
        } else {
            Err(GraphError::DeadEnds(dead_ends))
        }
    }

    /// Entries in event declaration order
    pub fn entries(&self) -> Vec<(WorkflowEvent, &str)> {
        WorkflowEvent::ALL
            .iter()
            .filter_map(|event| self.job_for(*event).map(|job| (*event, job)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
