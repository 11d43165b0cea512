//! Subprocess CLI provider adapter.
//!
//! Spawns the logged-in provider CLI in headless mode: the user content is
//! piped through stdin, the system prompt and model travel as flags, and
//! stdout comes back as a JSON envelope with the result text, token usage,
//! and cost. Exit status, subprocess timeout, and unparseable output all
//! map to failure results.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::classifier::ProviderErrorKind;
use super::{log_llm_call, LlmCallResult, LlmProvider, ProviderConfigError};

const PROVIDER_NAME: &str = "cli-provider";

/// Executable the adapter looks for.
const CLI_EXECUTABLE: &str = "claude";

/// Friendly-alias to pinned-model-id map.
const MODEL_MAP: &[(&str, &str)] = &[
    ("opus", "claude-opus-4-6"),
    ("sonnet", "claude-sonnet-4-6"),
    ("haiku", "claude-haiku-4-5"),
];

/// Provider invoking the local CLI session.
pub struct CliProvider {
    model: String,
    model_id: String,
    cli_path: OnceLock<PathBuf>,
}

impl CliProvider {
    /// Accepts a friendly alias from the model map or a full model id as
    /// passthrough.
    pub fn new(model: &str) -> Result<Self, ProviderConfigError> {
        let lower = model.to_ascii_lowercase();
        let model_id = if let Some((_, id)) = MODEL_MAP.iter().find(|(alias, _)| *alias == lower) {
            (*id).to_string()
        } else if lower.starts_with("claude-") {
            lower.clone()
        } else {
            return Err(ProviderConfigError::UnknownModel {
                provider: PROVIDER_NAME.to_string(),
                model: model.to_string(),
            });
        };
        Ok(Self {
            model: lower,
            model_id,
            cli_path: OnceLock::new(),
        })
    }

    /// Locates the executable: PATH first, then the fixed list of known
    /// install locations per platform.
    fn find_cli(&self) -> Result<PathBuf, String> {
        if let Some(path) = self.cli_path.get() {
            return Ok(path.clone());
        }

        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Ok(path_var) = std::env::var("PATH") {
            for dir in std::env::split_paths(&path_var) {
                candidates.push(dir.join(CLI_EXECUTABLE));
                #[cfg(windows)]
                candidates.push(dir.join(format!("{CLI_EXECUTABLE}.cmd")));
            }
        }
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(".npm-global").join("bin").join(CLI_EXECUTABLE));
            candidates.push(home.join(".local").join("bin").join(CLI_EXECUTABLE));
            candidates.push(
                home.join("AppData")
                    .join("Roaming")
                    .join("npm")
                    .join(format!("{CLI_EXECUTABLE}.cmd")),
            );
        }
        candidates.push(PathBuf::from("/usr/local/bin").join(CLI_EXECUTABLE));

        for candidate in candidates {
            if candidate.is_file() {
                let _ = self.cli_path.set(candidate.clone());
                return Ok(candidate);
            }
        }
        Err(format!(
            "{CLI_EXECUTABLE} executable not found on PATH or in known install locations"
        ))
    }
}

#[async_trait]
impl LlmProvider for CliProvider {
    fn provider_name(&self) -> &str {
        PROVIDER_NAME
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn invoke(
        &self,
        system_prompt: &str,
        content: &str,
        timeout: Duration,
    ) -> LlmCallResult {
        let started = Instant::now();

        let cli_path = match self.find_cli() {
            Ok(path) => path,
            Err(message) => {
                let result = LlmCallResult::err(
                    PROVIDER_NAME,
                    &self.model,
                    message,
                    ProviderErrorKind::Unknown,
                    0,
                    0,
                );
                log_llm_call(&result);
                return result;
            }
        };

        let mut cmd = Command::new(&cli_path);
        cmd.arg("-p")
            .arg("--output-format")
            .arg("json")
            .arg("--model")
            .arg(&self.model_id);
        if !system_prompt.is_empty() {
            cmd.arg("--system-prompt").arg(system_prompt);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let spawn = async {
            let mut child = cmd.spawn()?;
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(content.as_bytes()).await?;
                drop(stdin);
            }
            child.wait_with_output().await
        };

        let output = match tokio::time::timeout(timeout, spawn).await {
            Err(_) => {
                let result = LlmCallResult::err(
                    PROVIDER_NAME,
                    &self.model,
                    format!("cli timed out after {}s", timeout.as_secs()),
                    ProviderErrorKind::Unknown,
                    started.elapsed().as_millis() as u64,
                    1,
                );
                log_llm_call(&result);
                return result;
            }
            Ok(Err(e)) => {
                let result = LlmCallResult::err(
                    PROVIDER_NAME,
                    &self.model,
                    format!("failed to run cli: {e}"),
                    ProviderErrorKind::Unknown,
                    started.elapsed().as_millis() as u64,
                    1,
                );
                log_llm_call(&result);
                return result;
            }
            Ok(Ok(output)) => output,
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            let mut result = LlmCallResult::err(
                PROVIDER_NAME,
                &self.model,
                format!("cli exited with {}: {detail}", output.status),
                super::classify(&detail),
                duration_ms,
                1,
            );
            result.raw_response = Some(stdout);
            log_llm_call(&result);
            return result;
        }

        // The envelope is JSON; fall back to raw stdout when it is not.
        let (response_text, usage) = match serde_json::from_str::<serde_json::Value>(&stdout) {
            Ok(envelope) => {
                let text = envelope
                    .get("result")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                (text, Some(envelope))
            }
            Err(_) => (stdout.trim().to_string(), None),
        };

        let mut result = LlmCallResult::ok(
            PROVIDER_NAME,
            &self.model,
            response_text,
            Some(stdout),
            duration_ms,
            1,
        );
        if let Some(envelope) = usage {
            if let Some(u) = envelope.get("usage") {
                result.input_tokens = u.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
                result.output_tokens =
                    u.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
                result.cache_read_tokens = u
                    .get("cache_read_input_tokens")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0);
                result.cache_creation_tokens = u
                    .get("cache_creation_input_tokens")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0);
            }
            result.cost_usd = envelope
                .get("total_cost_usd")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0);
        }
        log_llm_call(&result);
        result
    }
}
