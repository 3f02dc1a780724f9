use anyhow::Result;

use super::{parse_workflow_id, Command, CommandContext};
use crate::workflows::{ApprovalDecision, NewApproval};

pub struct ApproveCommand {
    pub org: String,
    pub workflow: String,
    pub entity: String,
    pub approver: String,
    pub reject: bool,
    pub notes: Option<String>,
}

impl Command for ApproveCommand {
    async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let workflow_id = parse_workflow_id(&self.workflow)?;
        let engine = ctx.engine().await?;

        let decision = if self.reject {
            ApprovalDecision::Rejected
        } else {
            ApprovalDecision::Approved
        };
        let approval = engine
            .record_approval(NewApproval {
                workflow_id,
                organization_id: self.org.clone(),
                entity_type: self.entity.clone(),
                decision,
                approver_id: self.approver.clone(),
                notes: self.notes.clone(),
            })
            .await?;

        ctx.emit(&approval, || {
            println!(
                "📝 Recorded {} for {} by {}",
                approval.decision, approval.entity_type, approval.approver_id
            );
        })?;
        ctx.finish(&engine);
        Ok(())
    }
}
