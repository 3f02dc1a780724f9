use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::WorkflowStore;
use crate::workflows::{ApprovalDecision, Step};

/// What must be true before a step may begin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateRequirements {
    /// Entity types whose latest approval decision must be `approved`
    pub approvals: &'static [&'static str],
    /// `step_metadata` keys that must hold a truthy value
    pub metadata: &'static [&'static str],
}

pub fn requirements_for(step: Step) -> GateRequirements {
    match step {
        Step::Competitors => GateRequirements {
            approvals: &[],
            metadata: &["icp_generation"],
        },
        Step::SeedKeywords => GateRequirements {
            approvals: &["seed_keywords"],
            metadata: &["competitor_analysis"],
        },
        Step::Articles => GateRequirements {
            approvals: &["subtopics"],
            metadata: &["subtopic_generation"],
        },
        Step::Icp
        | Step::Longtails
        | Step::Filtering
        | Step::Clustering
        | Step::Validation
        | Step::Subtopics => GateRequirements {
            approvals: &[],
            metadata: &[],
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    /// `approval:<entity_type>` and `metadata:<key>` entries that are unmet
    pub blocked_by: Vec<String>,
}

impl GateDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            blocked_by: Vec::new(),
        }
    }

    fn block(reason: impl Into<String>, blocked_by: Vec<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            blocked_by,
        }
    }
}

/// Evaluates gate requirements against stored approvals and step metadata.
/// Evaluation never errors: anything that prevents a definite answer blocks.
pub struct BlockingConditionResolver {
    store: Arc<dyn WorkflowStore>,
}

impl BlockingConditionResolver {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, workflow_id: Uuid, organization_id: &str, step: Step) -> GateDecision {
        let requirements = requirements_for(step);

        let workflow = match self.store.load_workflow(workflow_id, organization_id).await {
            Ok(Some(workflow)) => workflow,
            Ok(None) => {
                return GateDecision::block(
                    format!("workflow {workflow_id} not found"),
                    vec!["workflow".to_string()],
                )
            }
            Err(e) => {
                warn!(workflow_id = %workflow_id, step = %step, error = %e, "Gate evaluation failed, blocking");
                return GateDecision::block(
                    format!("gate evaluation failed: {e}"),
                    vec!["evaluation".to_string()],
                );
            }
        };

        let mut blocked_by = Vec::new();

        if !requirements.approvals.is_empty() {
            let approvals = match self.store.list_approvals(workflow_id, organization_id).await {
                Ok(approvals) => approvals,
                Err(e) => {
                    warn!(workflow_id = %workflow_id, step = %step, error = %e, "Approval lookup failed, blocking");
                    return GateDecision::block(
                        format!("gate evaluation failed: {e}"),
                        vec!["evaluation".to_string()],
                    );
                }
            };

            // Oldest first, so later decisions overwrite earlier ones
            let mut latest: HashMap<&str, ApprovalDecision> = HashMap::new();
            for approval in &approvals {
                latest.insert(approval.entity_type.as_str(), approval.decision);
            }

            for entity_type in requirements.approvals {
                if latest.get(entity_type) != Some(&ApprovalDecision::Approved) {
                    blocked_by.push(format!("approval:{entity_type}"));
                }
            }
        }

        for key in requirements.metadata {
            if !workflow.has_metadata(key) {
                blocked_by.push(format!("metadata:{key}"));
            }
        }

        if blocked_by.is_empty() {
            debug!(workflow_id = %workflow_id, step = %step, "Gate open");
            GateDecision::allow()
        } else {
            debug!(workflow_id = %workflow_id, step = %step, blocked_by = ?blocked_by, "Gate closed");
            GateDecision::block(
                format!("{} requirement(s) unmet for {step}", blocked_by.len()),
                blocked_by,
            )
        }
    }
}
