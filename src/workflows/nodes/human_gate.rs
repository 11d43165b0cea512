//! Human gate: optional interactive pause point.
//!
//! Disabled (or in auto/mock mode) the gate auto-forwards. Enabled, it
//! renders a preview of the pending artifact and blocks on a three-way
//! choice: send onward, revise with optional feedback, or exit. The
//! decision lands in `next_node`, which only the gate's own router reads.

use std::io::{BufRead, Write};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::node::{Node, NodeContext, NodeError, NodePartial};
use crate::state::{keys, StateSnapshot};

use super::super::context::WorkflowContext;

const PREVIEW_LINES: usize = 30;

/// N2/N4: interactive checkpoint between stages.
pub struct HumanGateNode {
    ctx: Arc<WorkflowContext>,
    /// Target when the human (or auto mode) sends the artifact onward.
    send_target: String,
    /// Target when the human asks for a revision.
    revise_target: String,
    /// Label shown in the prompt, e.g. `draft` or `verdict`.
    stage: &'static str,
}

impl HumanGateNode {
    pub fn new(
        ctx: Arc<WorkflowContext>,
        send_target: impl Into<String>,
        revise_target: impl Into<String>,
        stage: &'static str,
    ) -> Self {
        Self {
            ctx,
            send_target: send_target.into(),
            revise_target: revise_target.into(),
            stage,
        }
    }

    fn record(&self, snapshot: &StateSnapshot, decision: &str, detail: &str) {
        if let Some(audit_dir) = snapshot.get_str(keys::AUDIT_DIR) {
            crate::audit::log_gate_decision(
                std::path::Path::new(audit_dir),
                &crate::audit::GateDecision::new(
                    &format!("human_gate_{}", self.stage),
                    decision,
                    snapshot.iteration_count(),
                    detail,
                ),
            );
        }
    }

    /// Blocking prompt on stdin; runs inside `spawn_blocking`.
    fn prompt_choice(stage: &str, preview: String) -> (char, Option<String>) {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();

        println!("\n---- {stage} preview ----");
        println!("{preview}");
        println!("---- end preview ----");
        print!("[S]end for review / [R]evise / e[X]it? ");
        let _ = stdout.flush();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).is_err() {
            return ('x', None);
        }
        let choice = line.trim().chars().next().unwrap_or('x').to_ascii_lowercase();
        if choice == 'r' {
            print!("Feedback (optional, single line): ");
            let _ = stdout.flush();
            let mut feedback = String::new();
            let _ = stdin.lock().read_line(&mut feedback);
            let feedback = feedback.trim().to_string();
            return ('r', (!feedback.is_empty()).then_some(feedback));
        }
        (choice, None)
    }
}

#[async_trait]
impl Node for HumanGateNode {
    async fn run(
        &self,
        snapshot: StateSnapshot,
        ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        let gate_active = self.ctx.config.human_gates_enabled
            && !self.ctx.config.auto_mode
            && !snapshot.auto_mode()
            && !self.ctx.config.mock_mode
            && !snapshot.mock_mode();

        if !gate_active {
            ctx.emit("human_gate", "gate disabled; auto-forwarding");
            self.record(&snapshot, "auto-forward", "");
            return Ok(NodePartial::new()
                .set(keys::NEXT_NODE, json!(self.send_target))
                .clear_error());
        }

        let preview: String = snapshot
            .current_draft()
            .unwrap_or("<no draft>")
            .lines()
            .take(PREVIEW_LINES)
            .collect::<Vec<_>>()
            .join("\n");

        let stage = self.stage;
        let (choice, feedback) =
            tokio::task::spawn_blocking(move || Self::prompt_choice(stage, preview))
                .await
                .unwrap_or(('x', None));

        match choice {
            's' => {
                self.record(&snapshot, "send", "");
                Ok(NodePartial::new()
                    .set(keys::NEXT_NODE, json!(self.send_target))
                    .clear_error())
            }
            'r' => {
                self.record(&snapshot, "revise", feedback.as_deref().unwrap_or(""));
                let mut partial = NodePartial::new()
                    .set(keys::NEXT_NODE, json!(self.revise_target))
                    .clear_error();
                if let Some(feedback) = feedback {
                    partial = partial.set(keys::USER_FEEDBACK, json!(feedback));
                }
                Ok(partial)
            }
            _ => {
                self.record(&snapshot, "exit", "");
                Ok(NodePartial::fail(format!(
                    "HUMAN_ABORT: operator exited at the {} gate",
                    self.stage
                )))
            }
        }
    }
}
