use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::IntentEngineConfig;

pub mod commands;

use commands::{
    ApproveCommand, Command, CommandContext, ConfigCommand, CreateCommand, GraphCommand,
    RedispatchCommand, StatusCommand, TransitionCommand,
};

#[derive(Parser)]
#[command(name = "intent-engine")]
#[command(about = "Operator tool for the content pipeline workflow orchestrator")]
#[command(long_about = "Inspect and drive content pipeline workflows stored in SQLite. \
                       Every state change goes through the same gate, guard and \
                       conditional update the service uses.")]
pub struct Cli {
    /// Configuration file (defaults to ./intent-engine.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a workflow for an organization
    Create {
        #[arg(long, help = "Organization (tenant) id")]
        org: String,
        #[arg(long, help = "Actor recorded in the audit trail")]
        actor: Option<String>,
    },
    /// Show a workflow's state, metadata and legal events
    Status {
        #[arg(long)]
        org: String,
        #[arg(long)]
        workflow: String,
    },
    /// Fire an event such as ICP_START or SEEDS_APPROVED
    Transition {
        #[arg(long)]
        org: String,
        #[arg(long)]
        workflow: String,
        #[arg(long, help = "Event name, e.g. COMPETITOR_START")]
        event: String,
        #[arg(long)]
        actor: Option<String>,
    },
    /// Record an approval decision for a workflow entity
    Approve {
        #[arg(long)]
        org: String,
        #[arg(long)]
        workflow: String,
        #[arg(long, help = "Entity type, e.g. seed_keywords or subtopics")]
        entity: String,
        #[arg(long)]
        approver: String,
        #[arg(long, help = "Record a rejection instead of an approval")]
        reject: bool,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Re-emit the job for a workflow waiting in a running state
    Redispatch {
        #[arg(long)]
        org: String,
        #[arg(long)]
        workflow: String,
        #[arg(long)]
        actor: Option<String>,
    },
    /// Print the automation graph and any dead ends
    Graph,
    /// Print the effective configuration, optionally writing it to a file
    Config {
        #[arg(long, help = "Write the configuration as TOML to this path")]
        write: Option<PathBuf>,
    },
}

pub async fn run(cli: Cli, config: IntentEngineConfig) -> Result<()> {
    let ctx = CommandContext::new(config, cli.json);

    let result = match cli.command {
        Commands::Create { org, actor } => CreateCommand { org, actor }.execute(&ctx).await,
        Commands::Status { org, workflow } => StatusCommand { org, workflow }.execute(&ctx).await,
        Commands::Transition {
            org,
            workflow,
            event,
            actor,
        } => {
            TransitionCommand {
                org,
                workflow,
                event,
                actor,
            }
            .execute(&ctx)
            .await
        }
        Commands::Approve {
            org,
            workflow,
            entity,
            approver,
            reject,
            notes,
        } => {
            ApproveCommand {
                org,
                workflow,
                entity,
                approver,
                reject,
                notes,
            }
            .execute(&ctx)
            .await
        }
        Commands::Redispatch {
            org,
            workflow,
            actor,
        } => {
            RedispatchCommand {
                org,
                workflow,
                actor,
            }
            .execute(&ctx)
            .await
        }
        Commands::Graph => GraphCommand.execute(&ctx).await,
        Commands::Config { write } => ConfigCommand { write }.execute(&ctx).await,
    };

    ctx.close().await;
    result
}
