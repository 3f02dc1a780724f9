// Audit trail of every transition attempt. Sinks are fire-and-forget: they
// must not block or fail the caller.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::{LazyLock, Mutex};
use tracing::info;
use uuid::Uuid;

use crate::workflows::{WorkflowEvent, WorkflowState};

static HOST: LazyLock<String> = LazyLock::new(|| {
    hostname::get()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    WorkflowCreated,
    WorkflowNotFound,
    ApprovalRecorded,
    TransitionApplied,
    TransitionConflict,
    TransitionIllegal,
    GateBlocked,
    StepCompleted,
    CompletionDuplicate,
    CompletionReplayed,
    DispatchFailed,
    Redispatched,
    StoreError,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::WorkflowCreated => "workflow_created",
            AuditAction::WorkflowNotFound => "workflow_not_found",
            AuditAction::ApprovalRecorded => "approval_recorded",
            AuditAction::TransitionApplied => "transition_applied",
            AuditAction::TransitionConflict => "transition_conflict",
            AuditAction::TransitionIllegal => "transition_illegal",
            AuditAction::GateBlocked => "gate_blocked",
            AuditAction::StepCompleted => "step_completed",
            AuditAction::CompletionDuplicate => "completion_duplicate",
            AuditAction::CompletionReplayed => "completion_replayed",
            AuditAction::DispatchFailed => "dispatch_failed",
            AuditAction::Redispatched => "redispatched",
            AuditAction::StoreError => "store_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub action: AuditAction,
    pub workflow_id: Uuid,
    pub organization_id: String,
    pub actor_id: Option<String>,
    pub event: Option<WorkflowEvent>,
    pub from_state: Option<WorkflowState>,
    pub to_state: Option<WorkflowState>,
    pub details: Value,
    pub host: String,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(action: AuditAction, workflow_id: Uuid, organization_id: &str) -> Self {
        Self {
            action,
            workflow_id,
            organization_id: organization_id.to_string(),
            actor_id: None,
            event: None,
            from_state: None,
            to_state: None,
            details: Value::Null,
            host: HOST.clone(),
            recorded_at: Utc::now(),
        }
    }

    pub fn actor(mut self, actor_id: Option<&str>) -> Self {
        self.actor_id = actor_id.map(str::to_string);
        self
    }

    pub fn event(mut self, event: WorkflowEvent) -> Self {
        self.event = Some(event);
        self
    }

    pub fn states(mut self, from: Option<WorkflowState>, to: Option<WorkflowState>) -> Self {
        self.from_state = from;
        self.to_state = to;
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry);
}

/// Writes audit entries as structured log lines under the `audit` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: AuditEntry) {
        info!(
            target: "audit",
            action = entry.action.as_str(),
            workflow_id = %entry.workflow_id,
            organization_id = %entry.organization_id,
            actor_id = entry.actor_id.as_deref(),
            event = entry.event.map(|e| e.as_str()),
            from_state = entry.from_state.map(|s| s.as_str()),
            to_state = entry.to_state.map(|s| s.as_str()),
            details = %entry.details,
            host = %entry.host,
            "audit"
        );
    }
}

/// Keeps entries in memory; used by tests and embedders that ship entries elsewhere
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn count(&self, action: AuditAction) -> usize {
        self.entries().iter().filter(|e| e.action == action).count()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, entry: AuditEntry) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry);
    }
}
