use anyhow::Result;

use super::{Command, CommandContext};

pub struct CreateCommand {
    pub org: String,
    pub actor: Option<String>,
}

impl Command for CreateCommand {
    async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let engine = ctx.engine().await?;
        let workflow = engine
            .create_workflow(&self.org, self.actor.as_deref())
            .await?;

        ctx.emit(&workflow, || {
            println!("✅ Created workflow {}", workflow.id);
            println!("   Organization: {}", workflow.organization_id);
            println!("   State: {}", workflow.state);
        })?;
        ctx.finish(&engine);
        Ok(())
    }
}
