// Persisted records owned by the orchestrator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::state::{ParseError, Step, WorkflowState};

/// One organization's run through the content pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub organization_id: String,
    pub state: WorkflowState,
    pub step_metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(organization_id: impl Into<String>, state: WorkflowState) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id: organization_id.into(),
            state,
            step_metadata: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.step_metadata.insert(key.to_string(), value);
        self
    }

    /// Dispatch id of the job the step is currently waiting on
    pub fn active_attempt(&self, step: Step) -> Option<Uuid> {
        self.step_metadata
            .get(step.attempt_key())
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }

    /// Whether a worker report carrying `token` belongs to the step's current
    /// attempt. A step entered without a job has no attempt and accepts any token.
    pub fn is_current_attempt(&self, step: Step, token: &str) -> bool {
        match self.active_attempt(step) {
            Some(active) => Uuid::parse_str(token.trim()).map_or(false, |t| t == active),
            None => true,
        }
    }

    /// A metadata key counts as present only when its value is truthy
    pub fn has_metadata(&self, key: &str) -> bool {
        match self.step_metadata.get(key) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(a)) => !a.is_empty(),
            Some(Value::Object(o)) => !o.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

impl ApprovalDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalDecision::Approved => "approved",
            ApprovalDecision::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ApprovalDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalDecision {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(ApprovalDecision::Approved),
            "rejected" => Ok(ApprovalDecision::Rejected),
            other => Err(ParseError::UnknownDecision(other.to_string())),
        }
    }
}

/// A recorded human decision. Never mutated; re-approval appends a new row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub organization_id: String,
    pub entity_type: String,
    pub decision: ApprovalDecision,
    pub approver_id: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewApproval {
    pub workflow_id: Uuid,
    pub organization_id: String,
    pub entity_type: String,
    pub decision: ApprovalDecision,
    pub approver_id: String,
    pub notes: Option<String>,
}

impl NewApproval {
    pub fn into_approval(self) -> Approval {
        Approval {
            id: Uuid::new_v4(),
            workflow_id: self.workflow_id,
            organization_id: self.organization_id,
            entity_type: self.entity_type,
            decision: self.decision,
            approver_id: self.approver_id,
            notes: self.notes,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub workflow_id: Uuid,
    pub step: Step,
    pub token: String,
    pub created_at: DateTime<Utc>,
}

/// Billable usage reported by a worker alongside its artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub kind: String,
    pub quantity: i64,
}

impl Usage {
    pub fn new(kind: impl Into<String>, quantity: i64) -> Self {
        Self {
            kind: kind.into(),
            quantity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepArtifact {
    pub workflow_id: Uuid,
    pub step: Step,
    pub idempotency_token: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub workflow_id: Uuid,
    pub organization_id: String,
    pub step: Step,
    pub idempotency_token: String,
    pub kind: String,
    pub quantity: i64,
    pub created_at: DateTime<Utc>,
}

/// The job a step was entered with, written together with the state change.
/// `dispatch_id` is `None` when no job was mapped, which clears any earlier attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepAttempt {
    pub step: Step,
    pub dispatch_id: Option<Uuid>,
}

impl StepAttempt {
    pub fn new(step: Step, dispatch_id: Option<Uuid>) -> Self {
        Self { step, dispatch_id }
    }

    pub fn metadata_key(&self) -> &'static str {
        self.step.attempt_key()
    }

    pub fn metadata_value(&self) -> Value {
        self.dispatch_id
            .map_or(Value::Null, |id| Value::String(id.to_string()))
    }
}

/// Everything a completion transaction writes, committed or rolled back as one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionCommit {
    pub workflow_id: Uuid,
    pub organization_id: String,
    pub step: Step,
    pub token: String,
    pub expected_state: WorkflowState,
    pub next_state: WorkflowState,
    pub artifact: Value,
    pub usage: Option<Usage>,
    /// Set when `next_state` starts another step's job
    pub next_attempt: Option<StepAttempt>,
}
