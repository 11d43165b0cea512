//! LLM provider layer.
//!
//! A uniform invocation contract over the backends a governance workflow
//! can draft and review with:
//!
//! - [`CliProvider`] — spawns a local provider CLI (`cli-provider:<model>`)
//! - [`HttpDirectProvider`] — direct messages-API calls (`http-direct:<model>`)
//! - [`RotatingHttpProvider`] — quota-aware credential rotation (`rotating-http:<model>`)
//! - [`MockProvider`] — canned responses for tests (`mock:<model>`)
//! - [`FallbackProvider`] — composes a primary with a fallback
//!
//! Providers never return `Err`: every outcome, including timeouts and
//! auth failures, is an [`LlmCallResult`] so nodes can route on it and the
//! audit trail can record it. Configuration problems (unknown provider,
//! forbidden model) surface at construction time instead.

mod classifier;
mod cli;
mod credentials;
mod fallback;
mod http;
mod mock;
mod rotating;
mod rotation;
mod rotator;

pub use classifier::{classify, extract_reset_hours, ProviderErrorKind, DEFAULT_RESET_HOURS};
pub use cli::CliProvider;
pub use credentials::{load_credentials, Credential, CredentialError};
pub use fallback::FallbackProvider;
pub use http::HttpDirectProvider;
pub use mock::MockProvider;
pub use rotating::{HttpRotatingTransport, RotatingHttpProvider};
pub use rotation::{RotationState, RotationStore};
pub use rotator::{
    CredentialRotator, RotatorConfig, RotatingTransport, TransportError, TransportResponse,
};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

/// Outcome of a single provider invocation, with full observability.
///
/// Token and cost accounting fields are zero when the backend does not
/// report them. `rate_limited` is true iff a quota-exhaustion signal was
/// observed at any point during the call (including retries the caller
/// never sees individually).
#[derive(Debug, Clone, Default)]
pub struct LlmCallResult {
    pub success: bool,
    /// Model-produced text when `success`; `None` otherwise.
    pub response: Option<String>,
    /// Full provider payload for the audit trail.
    pub raw_response: Option<String>,
    pub error_message: Option<String>,
    pub error_kind: Option<ProviderErrorKind>,
    pub provider: String,
    pub model_used: String,
    /// Total elapsed milliseconds including retries.
    pub duration_ms: u64,
    /// Invocation count including retries; ≥ 1 whenever a transport was
    /// actually attempted.
    pub attempts: u32,
    pub credential_used: String,
    pub rotation_occurred: bool,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cost_usd: f64,
    pub rate_limited: bool,
}

impl LlmCallResult {
    /// Minimal success result; callers fill in accounting fields as needed.
    #[must_use]
    pub fn ok(
        provider: &str,
        model: &str,
        response: String,
        raw: Option<String>,
        duration_ms: u64,
        attempts: u32,
    ) -> Self {
        Self {
            success: true,
            response: Some(response),
            raw_response: raw,
            provider: provider.to_string(),
            model_used: model.to_string(),
            duration_ms,
            attempts,
            ..Default::default()
        }
    }

    /// Minimal failure result.
    #[must_use]
    pub fn err(
        provider: &str,
        model: &str,
        error: impl Into<String>,
        kind: ProviderErrorKind,
        duration_ms: u64,
        attempts: u32,
    ) -> Self {
        Self {
            success: false,
            error_message: Some(error.into()),
            error_kind: Some(kind),
            provider: provider.to_string(),
            model_used: model.to_string(),
            duration_ms,
            attempts,
            ..Default::default()
        }
    }
}

/// Emits the structured per-call log line.
///
/// `[LLM] provider= model= input= output= cost= duration= [RATE_LIMITED=true]`
pub fn log_llm_call(result: &LlmCallResult) {
    let mut parts = vec![
        format!("provider={}", result.provider),
        format!("model={}", result.model_used),
    ];
    if result.input_tokens > 0 || result.output_tokens > 0 {
        parts.push(format!("input={}", result.input_tokens));
        parts.push(format!("output={}", result.output_tokens));
    }
    if result.cache_read_tokens > 0 {
        parts.push(format!("cache_read={}", result.cache_read_tokens));
    }
    if result.cache_creation_tokens > 0 {
        parts.push(format!("cache_create={}", result.cache_creation_tokens));
    }
    if result.cost_usd > 0.0 {
        parts.push(format!("cost=${:.4}", result.cost_usd));
    }
    parts.push(format!("duration={:.1}s", result.duration_ms as f64 / 1000.0));
    if !result.success {
        parts.push(format!(
            "ERROR={}",
            result.error_message.as_deref().unwrap_or("unknown")
        ));
    }
    if result.rate_limited {
        parts.push("RATE_LIMITED=true".to_string());
    }
    tracing::info!(target: "steward::llm", "[LLM] {}", parts.join(" "));
}

/// Uniform invocation contract over every backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider identifier (`cli-provider`, `http-direct`, `rotating-http`,
    /// `mock`).
    fn provider_name(&self) -> &str;

    /// Model identifier this provider was configured with.
    fn model(&self) -> &str;

    /// Invoke the model. Failures are encoded in the result, never `Err`.
    async fn invoke(&self, system_prompt: &str, content: &str, timeout: Duration)
        -> LlmCallResult;
}

impl std::fmt::Debug for dyn LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmProvider")
            .field("provider_name", &self.provider_name())
            .field("model", &self.model())
            .finish()
    }
}

/// Configuration problems raised when resolving a provider spec.
#[derive(Debug, Error, Diagnostic)]
pub enum ProviderConfigError {
    #[error("invalid provider spec '{spec}': expected provider:model")]
    #[diagnostic(
        code(steward::llm::bad_spec),
        help("Use the form provider:model, e.g. 'cli-provider:opus' or 'mock:draft'.")
    )]
    MalformedSpec { spec: String },

    #[error("unknown provider '{provider}'")]
    #[diagnostic(
        code(steward::llm::unknown_provider),
        help("Supported providers: cli-provider, http-direct, rotating-http, mock.")
    )]
    UnknownProvider { provider: String },

    #[error("unknown model '{model}' for provider '{provider}'")]
    #[diagnostic(code(steward::llm::unknown_model))]
    UnknownModel { provider: String, model: String },

    #[error("model '{model}' is on the forbidden list")]
    #[diagnostic(
        code(steward::llm::forbidden_model),
        help("Governance calls must not downgrade below the configured model tier.")
    )]
    ForbiddenModel { model: String },

    #[error(transparent)]
    #[diagnostic(code(steward::llm::credentials))]
    Credentials(#[from] CredentialError),
}

/// Settings the provider factory needs beyond the spec string itself.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Repository root; the direct-HTTP adapter reads its API key from
    /// `<repo_root>/.env`.
    pub repo_root: PathBuf,
    /// Ordered credential pool for the rotating adapter.
    pub credentials_path: PathBuf,
    /// Rotation-state file for the rotating adapter.
    pub rotation_state_path: PathBuf,
    /// Rotator tunables.
    pub rotator: RotatorConfig,
}

impl ProviderSettings {
    /// Defaults rooted at the current directory with state under
    /// `~/.steward/`.
    #[must_use]
    pub fn with_repo_root(repo_root: PathBuf) -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            repo_root,
            credentials_path: home.join(".steward").join("credentials.json"),
            rotation_state_path: home.join(".steward").join("rotation_state.json"),
            rotator: RotatorConfig::default(),
        }
    }
}

/// Splits a `provider:model` spec. The provider half is case-insensitive.
pub fn parse_provider_spec(spec: &str) -> Result<(String, String), ProviderConfigError> {
    match spec.split_once(':') {
        Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
            Ok((provider.to_ascii_lowercase(), model.to_string()))
        }
        _ => Err(ProviderConfigError::MalformedSpec {
            spec: spec.to_string(),
        }),
    }
}

/// Resolves a `provider:model` spec to a concrete adapter.
///
/// `cli-provider` is automatically wrapped in a [`FallbackProvider`] with a
/// direct-HTTP fallback when an API key is present in the repo's `.env`, so
/// a dead CLI session degrades to paid API calls instead of failing the
/// workflow.
pub fn get_provider(
    spec: &str,
    settings: &ProviderSettings,
) -> Result<Arc<dyn LlmProvider>, ProviderConfigError> {
    let (provider, model) = parse_provider_spec(spec)?;
    match provider.as_str() {
        "cli-provider" => {
            let cli = CliProvider::new(&model)?;
            if http::api_key_available(&settings.repo_root) {
                let api = HttpDirectProvider::new(&model, settings.repo_root.clone())?;
                Ok(Arc::new(FallbackProvider::new(
                    Arc::new(cli),
                    Arc::new(api),
                    Duration::from_secs(180),
                )))
            } else {
                Ok(Arc::new(cli))
            }
        }
        "http-direct" => Ok(Arc::new(HttpDirectProvider::new(
            &model,
            settings.repo_root.clone(),
        )?)),
        "rotating-http" => Ok(Arc::new(RotatingHttpProvider::from_settings(
            &model, settings,
        )?)),
        "mock" => Ok(Arc::new(MockProvider::new(&model))),
        _ => Err(ProviderConfigError::UnknownProvider { provider }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_parsing_splits_on_first_colon() {
        let (p, m) = parse_provider_spec("cli-provider:opus").unwrap();
        assert_eq!(p, "cli-provider");
        assert_eq!(m, "opus");

        let (p, m) = parse_provider_spec("MOCK:draft").unwrap();
        assert_eq!(p, "mock");
        assert_eq!(m, "draft");
    }

    #[test]
    fn malformed_specs_are_rejected() {
        assert!(matches!(
            parse_provider_spec("cli-provider"),
            Err(ProviderConfigError::MalformedSpec { .. })
        ));
        assert!(matches!(
            parse_provider_spec(""),
            Err(ProviderConfigError::MalformedSpec { .. })
        ));
        assert!(matches!(
            parse_provider_spec(":opus"),
            Err(ProviderConfigError::MalformedSpec { .. })
        ));
    }

    #[test]
    fn unknown_provider_is_rejected_at_configuration_time() {
        let settings = ProviderSettings::with_repo_root(PathBuf::from("."));
        let err = get_provider("telepathy:opus", &settings).unwrap_err();
        assert!(matches!(
            err,
            ProviderConfigError::UnknownProvider { provider } if provider == "telepathy"
        ));
    }

    #[test]
    fn mock_provider_resolves() {
        let settings = ProviderSettings::with_repo_root(PathBuf::from("."));
        let provider = get_provider("mock:draft", &settings).unwrap();
        assert_eq!(provider.provider_name(), "mock");
        assert_eq!(provider.model(), "draft");
    }
}
