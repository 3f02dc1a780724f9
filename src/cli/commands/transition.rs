use anyhow::{bail, Result};

use super::{parse_workflow_id, Command, CommandContext};
use crate::engine::{TransitionOutcome, TransitionRequest};
use crate::workflows::WorkflowEvent;

pub struct TransitionCommand {
    pub org: String,
    pub workflow: String,
    pub event: String,
    pub actor: Option<String>,
}

impl Command for TransitionCommand {
    async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let workflow_id = parse_workflow_id(&self.workflow)?;
        let event: WorkflowEvent = self.event.parse()?;
        let engine = ctx.engine().await?;

        let mut request = TransitionRequest::new(workflow_id, self.org.clone(), event);
        if let Some(actor) = &self.actor {
            request = request.by(actor.clone());
        }
        let outcome = engine.transition(request).await?;

        ctx.emit(&outcome, || match &outcome {
            TransitionOutcome::Applied {
                from,
                to,
                emitted_event,
                dispatch_error,
                ..
            } => {
                println!("✅ {from} -> {to}");
                if let Some(job) = emitted_event {
                    println!("   Emitted {job}");
                }
                if let Some(err) = dispatch_error {
                    println!("⚠️  Job not delivered: {err}");
                    println!("   Run 'intent-engine redispatch' once the transport is back");
                }
            }
            TransitionOutcome::Conflict { current_state } => {
                println!("❌ Another request moved the workflow first (now {current_state:?})");
            }
            TransitionOutcome::IllegalTransition {
                current_state,
                event,
            } => {
                println!("❌ {event} is not legal from {current_state}");
            }
            TransitionOutcome::GateBlocked { reason, blocked_by } => {
                println!("🔒 Blocked: {reason}");
                for requirement in blocked_by {
                    println!("   → {requirement}");
                }
            }
        })?;
        ctx.finish(&engine);

        if let Some(code) = outcome.error_code() {
            bail!("transition refused: {code} ({})", outcome.http_status());
        }
        Ok(())
    }
}
