//! Node library shared by the concrete workflows.
//!
//! Every node reads its slice of the state and returns a partial update.
//! Error discipline throughout: unrecoverable failures set
//! `error_message` (prefixed with the workflow-level error kind) and
//! return `Ok` — routers take it from there.

mod analyze;
mod finalize;
mod generate;
mod human_gate;
mod load_input;
mod review;
mod testing_nodes;
mod validate;

pub use analyze::AnalyzeCodebaseNode;
pub use finalize::{FinalizeKind, FinalizeNode};
pub use generate::GenerateDraftNode;
pub use human_gate::HumanGateNode;
pub use load_input::{InputSource, LoadInputNode};
pub use review::{extract_blocking_issues, parse_verdict, ReviewNode};
pub use testing_nodes::{
    E2eValidationNode, ImplementCodeNode, ScaffoldTestsNode, VerifyNode, VerifyPhase,
};
pub use validate::{CompletenessGateNode, ValidateMechanicalNode, ValidateTestPlanNode};

use std::process::Stdio;
use std::time::Duration;

/// Output of a governed subprocess call.
pub(crate) struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Runs an external command with a hard timeout, capturing output.
/// A timeout or spawn failure is an `Err(String)` the caller converts to
/// a governed `error_message`.
pub(crate) async fn run_command(
    program: &str,
    args: &[String],
    cwd: &std::path::Path,
    timeout: Duration,
) -> Result<CommandOutput, String> {
    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let run = async { cmd.spawn()?.wait_with_output().await };
    match tokio::time::timeout(timeout, run).await {
        Err(_) => Err(format!(
            "{program} timed out after {}s",
            timeout.as_secs()
        )),
        Ok(Err(e)) => Err(format!("failed to run {program}: {e}")),
        Ok(Ok(output)) => Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }),
    }
}
