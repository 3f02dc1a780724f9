use anyhow::Result;

use super::{parse_workflow_id, Command, CommandContext};

pub struct RedispatchCommand {
    pub org: String,
    pub workflow: String,
    pub actor: Option<String>,
}

impl Command for RedispatchCommand {
    async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let workflow_id = parse_workflow_id(&self.workflow)?;
        let engine = ctx.engine().await?;

        let redispatch = engine
            .redispatch(workflow_id, &self.org, self.actor.as_deref())
            .await?;

        ctx.emit(&redispatch, || {
            println!(
                "🔁 Re-emitted {} (dispatch {})",
                redispatch.job, redispatch.payload.dispatch_id
            );
        })?;
        ctx.finish(&engine);
        Ok(())
    }
}
