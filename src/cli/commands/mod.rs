use anyhow::{Context, Result};
use serde::Serialize;
use uuid::Uuid;

use crate::config::IntentEngineConfig;
use crate::engine::IntentEngine;

pub mod approve;
pub mod config;
pub mod create;
pub mod graph;
pub mod redispatch;
pub mod status;
pub mod transition;

pub use approve::ApproveCommand;
pub use config::ConfigCommand;
pub use create::CreateCommand;
pub use graph::GraphCommand;
pub use redispatch::RedispatchCommand;
pub use status::StatusCommand;
pub use transition::TransitionCommand;

#[allow(async_fn_in_trait)]
pub trait Command {
    async fn execute(&self, ctx: &CommandContext) -> Result<()>;
}

pub struct CommandContext {
    pub config: IntentEngineConfig,
    pub json: bool,
    #[cfg(feature = "database")]
    opened: std::sync::Mutex<Option<crate::store::SqliteWorkflowStore>>,
}

impl CommandContext {
    pub fn new(config: IntentEngineConfig, json: bool) -> Self {
        Self {
            config,
            json,
            #[cfg(feature = "database")]
            opened: std::sync::Mutex::new(None),
        }
    }

    /// Engine over the configured SQLite database. Emitted jobs are written to
    /// the log, not delivered.
    #[cfg(feature = "database")]
    pub async fn engine(&self) -> Result<IntentEngine> {
        use crate::jobs::LoggingJobTransport;
        use std::sync::Arc;

        let store = crate::store::SqliteWorkflowStore::connect(&self.config.database)
            .await
            .with_context(|| format!("Failed to open database {}", self.config.database.url))?;

        if let Ok(mut opened) = self.opened.lock() {
            *opened = Some(store.clone());
        }

        let engine = IntentEngine::builder(Arc::new(store), Arc::new(LoggingJobTransport))
            .graph(self.config.automation_graph()?)
            .strict_automation(self.config.engine.strict_automation)
            .build()?;
        Ok(engine)
    }

    #[cfg(not(feature = "database"))]
    pub async fn engine(&self) -> Result<IntentEngine> {
        anyhow::bail!("intent-engine was built without the `database` feature; rebuild with --features database")
    }

    /// Print a value as JSON when `--json` is set, otherwise run the human formatter
    pub fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce()) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            human();
        }
        Ok(())
    }

    pub fn finish(&self, engine: &IntentEngine) {
        if self.config.observability.metrics_enabled {
            engine.metrics().log_stats();
        }
    }

    /// Close the database connections `engine` opened, if any
    pub async fn close(&self) {
        #[cfg(feature = "database")]
        {
            let store = self.opened.lock().ok().and_then(|mut opened| opened.take());
            if let Some(store) = store {
                store.shutdown().await;
            }
        }
    }
}

pub fn parse_workflow_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("'{raw}' is not a workflow id"))
}
