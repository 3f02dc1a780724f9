use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::automation::AutomationGraph;

/// Main configuration structure for the intent engine
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IntentEngineConfig {
    /// Database settings
    pub database: DatabaseConfig,
    /// Observability settings
    pub observability: ObservabilityConfig,
    /// Engine behaviour
    pub engine: EngineConfig,
    /// Automation graph overrides
    #[serde(default)]
    pub automation: AutomationConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// SQLite URL, e.g. `sqlite://intent-engine.db` or `sqlite::memory:`
    pub url: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Enable automatic migrations
    pub auto_migrate: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level or filter directive
    pub log_level: String,
    /// Emit logs as JSON lines
    pub json_logs: bool,
    /// Log transition counters on shutdown
    pub metrics_enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Refuse to start when an event can enter a running state without a job
    pub strict_automation: bool,
    /// Jobs the runner executes at once
    pub runner_concurrency: usize,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AutomationConfig {
    /// Event name to job name. An empty job name removes the default entry.
    #[serde(default)]
    pub jobs: HashMap<String, String>,
}

impl Default for IntentEngineConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://intent-engine.db".to_string(),
                max_connections: 10,
                auto_migrate: true,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json_logs: true,
                metrics_enabled: true,
            },
            engine: EngineConfig {
                strict_automation: true,
                runner_concurrency: 4,
            },
            automation: AutomationConfig::default(),
        }
    }
}

impl IntentEngineConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration file (intent-engine.toml, or the given path)
    /// 3. Environment variables (prefixed with INTENT_ENGINE_, `__` between sections)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = Config::try_from(&Self::default())?;
        let mut builder = Config::builder().add_source(defaults);

        match path {
            Some(path) => {
                builder = builder.add_source(File::from(path));
            }
            None if Path::new("intent-engine.toml").exists() => {
                builder = builder.add_source(File::with_name("intent-engine"));
            }
            None => {}
        }

        builder = builder.add_source(
            Environment::with_prefix("INTENT_ENGINE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to read configuration")?;
        let engine_config: IntentEngineConfig = config
            .try_deserialize()
            .context("Invalid configuration")?;

        Ok(engine_config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }

    /// Default graph with `[automation.jobs]` applied
    pub fn automation_graph(&self) -> Result<AutomationGraph> {
        AutomationGraph::standard()
            .with_overrides(&self.automation.jobs)
            .context("Invalid [automation.jobs] entry")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::WorkflowEvent;

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intent-engine.toml");
        std::fs::write(
            &path,
            r#"
[database]
url = "sqlite::memory:"
max_connections = 1
auto_migrate = true

[engine]
strict_automation = false
runner_concurrency = 2

[automation.jobs]
ICP_START = "icp.v2.job"
"#,
        )
        .unwrap();

        let config = IntentEngineConfig::load(Some(&path)).unwrap();
        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.database.max_connections, 1);
        assert!(!config.engine.strict_automation);
        assert_eq!(config.observability.log_level, "info");

        let graph = config.automation_graph().unwrap();
        assert_eq!(graph.job_for(WorkflowEvent::IcpStart), Some("icp.v2.job"));
    }

    #[test]
    fn test_save_round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.toml");

        let mut config = IntentEngineConfig::default();
        config.engine.runner_concurrency = 7;
        config.save_to_file(&path).unwrap();

        let loaded = IntentEngineConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded.engine.runner_concurrency, 7);
        assert!(loaded.engine.strict_automation);
    }
}
