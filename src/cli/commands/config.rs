use anyhow::Result;
use std::path::PathBuf;

use super::{Command, CommandContext};

pub struct ConfigCommand {
    pub write: Option<PathBuf>,
}

impl Command for ConfigCommand {
    async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        if let Some(path) = &self.write {
            ctx.config.save_to_file(path)?;
            println!("💾 Configuration written to {}", path.display());
            return Ok(());
        }

        if ctx.json {
            println!("{}", serde_json::to_string_pretty(&ctx.config)?);
        } else {
            print!("{}", toml::to_string_pretty(&ctx.config)?);
        }
        Ok(())
    }
}
