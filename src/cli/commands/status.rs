use anyhow::Result;
use serde::Serialize;

use super::{parse_workflow_id, Command, CommandContext};
use crate::workflows::{StepArtifact, TransitionGuard, Workflow, WorkflowEvent};

pub struct StatusCommand {
    pub org: String,
    pub workflow: String,
}

#[derive(Serialize)]
struct StatusReport {
    workflow: Workflow,
    legal_events: Vec<WorkflowEvent>,
    artifacts: Vec<StepArtifact>,
}

impl Command for StatusCommand {
    async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let workflow_id = parse_workflow_id(&self.workflow)?;
        let engine = ctx.engine().await?;

        let workflow = engine.workflow(workflow_id, &self.org).await?;
        let report = StatusReport {
            legal_events: TransitionGuard::allowed_events(workflow.state),
            artifacts: engine.artifacts(workflow_id, &self.org, None).await?,
            workflow,
        };

        ctx.emit(&report, || {
            let w = &report.workflow;
            println!("📋 WORKFLOW {}", w.id);
            println!("────────────────────────────────────────────");
            println!("   Organization: {}", w.organization_id);
            println!("   State:        {}", w.state);
            println!("   Updated:      {}", w.updated_at.to_rfc3339());
            if w.step_metadata.is_empty() {
                println!("   Metadata:     (none)");
            } else {
                println!("   Metadata:");
                for (key, value) in &w.step_metadata {
                    println!("     {key} = {value}");
                }
            }
            if report.legal_events.is_empty() {
                println!("   Next events:  (terminal)");
            } else {
                let names: Vec<_> = report.legal_events.iter().map(|e| e.as_str()).collect();
                println!("   Next events:  {}", names.join(", "));
            }
            println!("   Artifacts:    {}", report.artifacts.len());
            for artifact in &report.artifacts {
                println!(
                    "     {} ({}) at {}",
                    artifact.step,
                    artifact.idempotency_token,
                    artifact.created_at.to_rfc3339()
                );
            }
        })?;
        Ok(())
    }
}
