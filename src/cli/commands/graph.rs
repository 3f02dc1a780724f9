use anyhow::Result;
use serde::Serialize;

use super::{Command, CommandContext};
use crate::workflows::{target_of, WorkflowEvent};

/// Prints the configured automation graph. Needs no database.
pub struct GraphCommand;

#[derive(Serialize)]
struct GraphEntry {
    event: WorkflowEvent,
    enters: Option<String>,
    job: String,
}

#[derive(Serialize)]
struct GraphReport {
    entries: Vec<GraphEntry>,
    dead_ends: Vec<WorkflowEvent>,
}

impl Command for GraphCommand {
    async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let graph = ctx.config.automation_graph()?;
        let report = GraphReport {
            entries: graph
                .entries()
                .into_iter()
                .map(|(event, job)| GraphEntry {
                    event,
                    enters: target_of(event).map(|s| s.to_string()),
                    job: job.to_string(),
                })
                .collect(),
            dead_ends: graph.dead_ends(),
        };

        ctx.emit(&report, || {
            println!("🔀 AUTOMATION GRAPH");
            println!("──────────────────");
            for entry in &report.entries {
                println!(
                    "   {:<20} -> {:<20} emits {}",
                    entry.event.as_str(),
                    entry.enters.as_deref().unwrap_or("?"),
                    entry.job
                );
            }
            println!();
            if report.dead_ends.is_empty() {
                println!("✅ No dead ends");
            } else {
                println!("⚠️  Dead ends (running state entered with no job):");
                for event in &report.dead_ends {
                    println!("   → {event}");
                }
            }
        })
    }
}
