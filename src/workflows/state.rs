// Pipeline state model - the closed set of states, events and legal edges
//
// The transition table below is the only place where legality is defined.
// `next_state` matches exhaustively on the state so adding a state without
// deciding its outgoing edges does not compile.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown workflow state: {0}")]
    UnknownState(String),
    #[error("unknown workflow event: {0}")]
    UnknownEvent(String),
    #[error("unknown pipeline step: {0}")]
    UnknownStep(String),
    #[error("unknown approval decision: {0}")]
    UnknownDecision(String),
}

/// The nine ordered stages of the content pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Icp,
    Competitors,
    SeedKeywords,
    Longtails,
    Filtering,
    Clustering,
    Validation,
    Subtopics,
    Articles,
}

impl Step {
    pub const ALL: [Step; 9] = [
        Step::Icp,
        Step::Competitors,
        Step::SeedKeywords,
        Step::Longtails,
        Step::Filtering,
        Step::Clustering,
        Step::Validation,
        Step::Subtopics,
        Step::Articles,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Icp => "icp",
            Step::Competitors => "competitors",
            Step::SeedKeywords => "seed_keywords",
            Step::Longtails => "longtails",
            Step::Filtering => "filtering",
            Step::Clustering => "clustering",
            Step::Validation => "validation",
            Step::Subtopics => "subtopics",
            Step::Articles => "articles",
        }
    }

    /// Key written into `step_metadata` when the step completes successfully
    pub fn metadata_key(&self) -> &'static str {
        match self {
            Step::Icp => "icp_generation",
            Step::Competitors => "competitor_analysis",
            Step::SeedKeywords => "seed_keywords",
            Step::Longtails => "longtail_expansion",
            Step::Filtering => "keyword_filtering",
            Step::Clustering => "topic_clustering",
            Step::Validation => "cluster_validation",
            Step::Subtopics => "subtopic_generation",
            Step::Articles => "article_generation",
        }
    }

    /// Key in `step_metadata` holding the dispatch id the running step answers to
    pub fn attempt_key(&self) -> &'static str {
        match self {
            Step::Icp => "icp_attempt",
            Step::Competitors => "competitors_attempt",
            Step::SeedKeywords => "seed_keywords_attempt",
            Step::Longtails => "longtails_attempt",
            Step::Filtering => "filtering_attempt",
            Step::Clustering => "clustering_attempt",
            Step::Validation => "validation_attempt",
            Step::Subtopics => "subtopics_attempt",
            Step::Articles => "articles_attempt",
        }
    }

    /// Seed keywords is the only stage without a background worker
    pub fn is_automated(&self) -> bool {
        !matches!(self, Step::SeedKeywords)
    }

    pub fn running_state(&self) -> Option<WorkflowState> {
        use WorkflowState::*;
        match self {
            Step::Icp => Some(IcpRunning),
            Step::Competitors => Some(CompetitorRunning),
            Step::SeedKeywords => None,
            Step::Longtails => Some(LongtailRunning),
            Step::Filtering => Some(FilteringRunning),
            Step::Clustering => Some(ClusteringRunning),
            Step::Validation => Some(ValidationRunning),
            Step::Subtopics => Some(SubtopicsRunning),
            Step::Articles => Some(ArticlesRunning),
        }
    }

    pub fn failed_state(&self) -> Option<WorkflowState> {
        use WorkflowState::*;
        match self {
            Step::Icp => Some(IcpFailed),
            Step::Competitors => Some(CompetitorFailed),
            Step::SeedKeywords => None,
            Step::Longtails => Some(LongtailFailed),
            Step::Filtering => Some(FilteringFailed),
            Step::Clustering => Some(ClusteringFailed),
            Step::Validation => Some(ValidationFailed),
            Step::Subtopics => Some(SubtopicsFailed),
            Step::Articles => Some(ArticlesFailed),
        }
    }

    pub fn success_event(&self) -> Option<WorkflowEvent> {
        use WorkflowEvent::*;
        match self {
            Step::Icp => Some(IcpSuccess),
            Step::Competitors => Some(CompetitorSuccess),
            Step::SeedKeywords => None,
            Step::Longtails => Some(LongtailSuccess),
            Step::Filtering => Some(FilteringSuccess),
            Step::Clustering => Some(ClusteringSuccess),
            Step::Validation => Some(ValidationSuccess),
            Step::Subtopics => Some(SubtopicsSuccess),
            Step::Articles => Some(ArticlesSuccess),
        }
    }

    pub fn failure_event(&self) -> Option<WorkflowEvent> {
        use WorkflowEvent::*;
        match self {
            Step::Icp => Some(IcpFailed),
            Step::Competitors => Some(CompetitorFailed),
            Step::SeedKeywords => None,
            Step::Longtails => Some(LongtailFailed),
            Step::Filtering => Some(FilteringFailed),
            Step::Clustering => Some(ClusteringFailed),
            Step::Validation => Some(ValidationFailed),
            Step::Subtopics => Some(SubtopicsFailed),
            Step::Articles => Some(ArticlesFailed),
        }
    }

    pub fn retry_event(&self) -> Option<WorkflowEvent> {
        use WorkflowEvent::*;
        match self {
            Step::Icp => Some(IcpRetry),
            Step::Competitors => Some(CompetitorRetry),
            Step::SeedKeywords => None,
            Step::Longtails => Some(LongtailRetry),
            Step::Filtering => Some(FilteringRetry),
            Step::Clustering => Some(ClusteringRetry),
            Step::Validation => Some(ValidationRetry),
            Step::Subtopics => Some(SubtopicsRetry),
            Step::Articles => Some(ArticlesRetry),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Step {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Step::ALL
            .iter()
            .copied()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| ParseError::UnknownStep(s.to_string()))
    }
}

/// Every state a workflow row may hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    IcpPending,
    IcpRunning,
    IcpFailed,
    CompetitorPending,
    CompetitorRunning,
    CompetitorFailed,
    CompetitorCompleted,
    LongtailRunning,
    LongtailFailed,
    FilteringRunning,
    FilteringFailed,
    ClusteringRunning,
    ClusteringFailed,
    ValidationRunning,
    ValidationFailed,
    SubtopicsRunning,
    SubtopicsFailed,
    SubtopicsCompleted,
    ArticlesRunning,
    ArticlesFailed,
    Completed,
}

impl WorkflowState {
    pub const ALL: [WorkflowState; 21] = [
        WorkflowState::IcpPending,
        WorkflowState::IcpRunning,
        WorkflowState::IcpFailed,
        WorkflowState::CompetitorPending,
        WorkflowState::CompetitorRunning,
        WorkflowState::CompetitorFailed,
        WorkflowState::CompetitorCompleted,
        WorkflowState::LongtailRunning,
        WorkflowState::LongtailFailed,
        WorkflowState::FilteringRunning,
        WorkflowState::FilteringFailed,
        WorkflowState::ClusteringRunning,
        WorkflowState::ClusteringFailed,
        WorkflowState::ValidationRunning,
        WorkflowState::ValidationFailed,
        WorkflowState::SubtopicsRunning,
        WorkflowState::SubtopicsFailed,
        WorkflowState::SubtopicsCompleted,
        WorkflowState::ArticlesRunning,
        WorkflowState::ArticlesFailed,
        WorkflowState::Completed,
    ];

    /// Initial state of a freshly created workflow
    pub const INITIAL: WorkflowState = WorkflowState::IcpPending;

    pub fn as_str(&self) -> &'static str {
        use WorkflowState::*;
        match self {
            IcpPending => "icp_pending",
            IcpRunning => "icp_running",
            IcpFailed => "icp_failed",
            CompetitorPending => "competitor_pending",
            CompetitorRunning => "competitor_running",
            CompetitorFailed => "competitor_failed",
            CompetitorCompleted => "competitor_completed",
            LongtailRunning => "longtail_running",
            LongtailFailed => "longtail_failed",
            FilteringRunning => "filtering_running",
            FilteringFailed => "filtering_failed",
            ClusteringRunning => "clustering_running",
            ClusteringFailed => "clustering_failed",
            ValidationRunning => "validation_running",
            ValidationFailed => "validation_failed",
            SubtopicsRunning => "subtopics_running",
            SubtopicsFailed => "subtopics_failed",
            SubtopicsCompleted => "subtopics_completed",
            ArticlesRunning => "articles_running",
            ArticlesFailed => "articles_failed",
            Completed => "completed",
        }
    }

    /// Position along the pipeline. A failed state shares the position of the
    /// running state it came from; legal edges never decrease it.
    pub fn position(&self) -> u8 {
        use WorkflowState::*;
        match self {
            IcpPending => 0,
            IcpRunning | IcpFailed => 1,
            CompetitorPending => 2,
            CompetitorRunning | CompetitorFailed => 3,
            CompetitorCompleted => 4,
            LongtailRunning | LongtailFailed => 5,
            FilteringRunning | FilteringFailed => 6,
            ClusteringRunning | ClusteringFailed => 7,
            ValidationRunning | ValidationFailed => 8,
            SubtopicsRunning | SubtopicsFailed => 9,
            SubtopicsCompleted => 10,
            ArticlesRunning | ArticlesFailed => 11,
            Completed => 12,
        }
    }

    /// The step whose worker is executing in this state, if any
    pub fn running_step(&self) -> Option<Step> {
        Step::ALL
            .iter()
            .copied()
            .find(|step| step.running_state() == Some(*self))
    }

    pub fn is_running(&self) -> bool {
        self.running_step().is_some()
    }

    pub fn is_failed(&self) -> bool {
        Step::ALL
            .iter()
            .any(|step| step.failed_state() == Some(*self))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Completed)
    }

    /// True when the workflow has moved beyond the given automated step
    pub fn has_passed(&self, step: Step) -> bool {
        match step.running_state() {
            Some(running) => self.position() > running.position(),
            None => false,
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkflowState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| ParseError::UnknownState(s.to_string()))
    }
}

/// Named triggers accepted by the transition function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowEvent {
    IcpStart,
    IcpSuccess,
    IcpFailed,
    IcpRetry,
    CompetitorStart,
    CompetitorSuccess,
    CompetitorFailed,
    CompetitorRetry,
    SeedsApproved,
    LongtailSuccess,
    LongtailFailed,
    LongtailRetry,
    FilteringSuccess,
    FilteringFailed,
    FilteringRetry,
    ClusteringSuccess,
    ClusteringFailed,
    ClusteringRetry,
    ValidationSuccess,
    ValidationFailed,
    ValidationRetry,
    SubtopicsSuccess,
    SubtopicsFailed,
    SubtopicsRetry,
    SubtopicsApproved,
    ArticlesSuccess,
    ArticlesFailed,
    ArticlesRetry,
}

/// Who is expected to raise an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOrigin {
    /// API request on behalf of a person
    Human,
    /// Background worker reporting on its own step
    Worker,
}

impl WorkflowEvent {
    pub const ALL: [WorkflowEvent; 28] = [
        WorkflowEvent::IcpStart,
        WorkflowEvent::IcpSuccess,
        WorkflowEvent::IcpFailed,
        WorkflowEvent::IcpRetry,
        WorkflowEvent::CompetitorStart,
        WorkflowEvent::CompetitorSuccess,
        WorkflowEvent::CompetitorFailed,
        WorkflowEvent::CompetitorRetry,
        WorkflowEvent::SeedsApproved,
        WorkflowEvent::LongtailSuccess,
        WorkflowEvent::LongtailFailed,
        WorkflowEvent::LongtailRetry,
        WorkflowEvent::FilteringSuccess,
        WorkflowEvent::FilteringFailed,
        WorkflowEvent::FilteringRetry,
        WorkflowEvent::ClusteringSuccess,
        WorkflowEvent::ClusteringFailed,
        WorkflowEvent::ClusteringRetry,
        WorkflowEvent::ValidationSuccess,
        WorkflowEvent::ValidationFailed,
        WorkflowEvent::ValidationRetry,
        WorkflowEvent::SubtopicsSuccess,
        WorkflowEvent::SubtopicsFailed,
        WorkflowEvent::SubtopicsRetry,
        WorkflowEvent::SubtopicsApproved,
        WorkflowEvent::ArticlesSuccess,
        WorkflowEvent::ArticlesFailed,
        WorkflowEvent::ArticlesRetry,
    ];

    pub fn as_str(&self) -> &'static str {
        use WorkflowEvent::*;
        match self {
            IcpStart => "ICP_START",
            IcpSuccess => "ICP_SUCCESS",
            IcpFailed => "ICP_FAILED",
            IcpRetry => "ICP_RETRY",
            CompetitorStart => "COMPETITOR_START",
            CompetitorSuccess => "COMPETITOR_SUCCESS",
            CompetitorFailed => "COMPETITOR_FAILED",
            CompetitorRetry => "COMPETITOR_RETRY",
            SeedsApproved => "SEEDS_APPROVED",
            LongtailSuccess => "LONGTAIL_SUCCESS",
            LongtailFailed => "LONGTAIL_FAILED",
            LongtailRetry => "LONGTAIL_RETRY",
            FilteringSuccess => "FILTERING_SUCCESS",
            FilteringFailed => "FILTERING_FAILED",
            FilteringRetry => "FILTERING_RETRY",
            ClusteringSuccess => "CLUSTERING_SUCCESS",
            ClusteringFailed => "CLUSTERING_FAILED",
            ClusteringRetry => "CLUSTERING_RETRY",
            ValidationSuccess => "VALIDATION_SUCCESS",
            ValidationFailed => "VALIDATION_FAILED",
            ValidationRetry => "VALIDATION_RETRY",
            SubtopicsSuccess => "SUBTOPICS_SUCCESS",
            SubtopicsFailed => "SUBTOPICS_FAILED",
            SubtopicsRetry => "SUBTOPICS_RETRY",
            SubtopicsApproved => "SUBTOPICS_APPROVED",
            ArticlesSuccess => "ARTICLES_SUCCESS",
            ArticlesFailed => "ARTICLES_FAILED",
            ArticlesRetry => "ARTICLES_RETRY",
        }
    }

    pub fn origin(&self) -> EventOrigin {
        use WorkflowEvent::*;
        match self {
            IcpSuccess | IcpFailed | CompetitorSuccess | CompetitorFailed | LongtailSuccess
            | LongtailFailed | FilteringSuccess | FilteringFailed | ClusteringSuccess
            | ClusteringFailed | ValidationSuccess | ValidationFailed | SubtopicsSuccess
            | SubtopicsFailed | ArticlesSuccess | ArticlesFailed => EventOrigin::Worker,
            IcpStart | IcpRetry | CompetitorStart | CompetitorRetry | SeedsApproved
            | LongtailRetry | FilteringRetry | ClusteringRetry | ValidationRetry
            | SubtopicsRetry | SubtopicsApproved | ArticlesRetry => EventOrigin::Human,
        }
    }

    /// Step whose preconditions must hold before this event may apply
    pub fn gated_step(&self) -> Option<Step> {
        use WorkflowEvent::*;
        match self {
            IcpStart | IcpRetry => Some(Step::Icp),
            CompetitorStart | CompetitorRetry => Some(Step::Competitors),
            SeedsApproved => Some(Step::SeedKeywords),
            SubtopicsApproved => Some(Step::Articles),
            _ => None,
        }
    }
}

impl fmt::Display for WorkflowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowEvent {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        WorkflowEvent::ALL
            .iter()
            .copied()
            .find(|event| event.as_str() == normalized)
            .ok_or_else(|| ParseError::UnknownEvent(s.to_string()))
    }
}

/// The transition table: `Some(next)` when `event` is legal from `state`
pub fn next_state(state: WorkflowState, event: WorkflowEvent) -> Option<WorkflowState> {
    use WorkflowEvent as E;
    use WorkflowState as S;

    match state {
        S::IcpPending => match event {
            E::IcpStart => Some(S::IcpRunning),
            _ => None,
        },
        S::IcpRunning => match event {
            E::IcpSuccess => Some(S::CompetitorPending),
            E::IcpFailed => Some(S::IcpFailed),
            _ => None,
        },
        S::IcpFailed => match event {
            E::IcpRetry => Some(S::IcpRunning),
            _ => None,
        },
        S::CompetitorPending => match event {
            E::CompetitorStart => Some(S::CompetitorRunning),
            _ => None,
        },
        S::CompetitorRunning => match event {
            E::CompetitorSuccess => Some(S::CompetitorCompleted),
            E::CompetitorFailed => Some(S::CompetitorFailed),
            _ => None,
        },
        S::CompetitorFailed => match event {
            E::CompetitorRetry => Some(S::CompetitorRunning),
            _ => None,
        },
        S::CompetitorCompleted => match event {
            E::SeedsApproved => Some(S::LongtailRunning),
            _ => None,
        },
        S::LongtailRunning => match event {
            E::LongtailSuccess => Some(S::FilteringRunning),
            E::LongtailFailed => Some(S::LongtailFailed),
            _ => None,
        },
        S::LongtailFailed => match event {
            E::LongtailRetry => Some(S::LongtailRunning),
            _ => None,
        },
        S::FilteringRunning => match event {
            E::FilteringSuccess => Some(S::ClusteringRunning),
            E::FilteringFailed => Some(S::FilteringFailed),
            _ => None,
        },
        S::FilteringFailed => match event {
            E::FilteringRetry => Some(S::FilteringRunning),
            _ => None,
        },
        S::ClusteringRunning => match event {
            E::ClusteringSuccess => Some(S::ValidationRunning),
            E::ClusteringFailed => Some(S::ClusteringFailed),
            _ => None,
        },
        S::ClusteringFailed => match event {
            E::ClusteringRetry => Some(S::ClusteringRunning),
            _ => None,
        },
        S::ValidationRunning => match event {
            E::ValidationSuccess => Some(S::SubtopicsRunning),
            E::ValidationFailed => Some(S::ValidationFailed),
            _ => None,
        },
        S::ValidationFailed => match event {
            E::ValidationRetry => Some(S::ValidationRunning),
            _ => None,
        },
        S::SubtopicsRunning => match event {
            E::SubtopicsSuccess => Some(S::SubtopicsCompleted),
            E::SubtopicsFailed => Some(S::SubtopicsFailed),
            _ => None,
        },
        S::SubtopicsFailed => match event {
            E::SubtopicsRetry => Some(S::SubtopicsRunning),
            _ => None,
        },
        S::SubtopicsCompleted => match event {
            E::SubtopicsApproved => Some(S::ArticlesRunning),
            _ => None,
        },
        S::ArticlesRunning => match event {
            E::ArticlesSuccess => Some(S::Completed),
            E::ArticlesFailed => Some(S::ArticlesFailed),
            _ => None,
        },
        S::ArticlesFailed => match event {
            E::ArticlesRetry => Some(S::ArticlesRunning),
            _ => None,
        },
        S::Completed => None,
    }
}

/// Events that are legal from `state`, in declaration order
pub fn legal_events(state: WorkflowState) -> Vec<WorkflowEvent> {
    WorkflowEvent::ALL
        .iter()
        .copied()
        .filter(|event| next_state(state, *event).is_some())
        .collect()
}

/// The state an event leads into, independent of the source state
pub fn target_of(event: WorkflowEvent) -> Option<WorkflowState> {
    WorkflowState::ALL
        .iter()
        .find_map(|state| next_state(*state, event))
}
