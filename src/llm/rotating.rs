//! Rotating-credential HTTP provider.
//!
//! Thin wrapper presenting the [`CredentialRotator`] behind the uniform
//! provider trait. The transport posts to a generate-content style API
//! with the credential's key per call; rotation, retry, and backoff all
//! live in the rotator.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::credentials::Credential;
use super::rotation::RotationStore;
use super::rotator::{
    CredentialRotator, RotatingTransport, RotatorConfig, TransportError, TransportResponse,
};
use super::{log_llm_call, LlmCallResult, LlmProvider, ProviderConfigError, ProviderSettings};

const PROVIDER_NAME: &str = "rotating-http";

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default, rename = "modelVersion")]
    model_version: String,
    #[serde(default, rename = "usageMetadata")]
    usage: UsageMetadata,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: CandidateContent,
}

#[derive(Deserialize, Default)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default)]
struct UsageMetadata {
    #[serde(default, rename = "promptTokenCount")]
    prompt_tokens: u64,
    #[serde(default, rename = "candidatesTokenCount")]
    candidate_tokens: u64,
}

/// Real HTTP transport for the rotating adapter.
pub struct HttpRotatingTransport {
    client: reqwest::Client,
}

impl HttpRotatingTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRotatingTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RotatingTransport for HttpRotatingTransport {
    async fn call(
        &self,
        credential: &Credential,
        model: &str,
        system_prompt: &str,
        content: &str,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        let url = format!("{API_BASE}/{model}:generateContent");
        let body = json!({
            "system_instruction": { "parts": [{ "text": system_prompt }] },
            "contents": [{ "role": "user", "parts": [{ "text": content }] }],
        });

        let response = self
            .client
            .post(&url)
            .query(&[("key", credential.key.as_str())])
            .json(&body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| TransportError {
                message: if e.is_timeout() {
                    format!("request timed out after {}s", timeout.as_secs())
                } else {
                    format!("request failed: {e}")
                },
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| TransportError {
            message: format!("failed to read response body: {e}"),
        })?;

        if !status.is_success() {
            return Err(TransportError {
                message: format!("{status}: {text}"),
            });
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&text).map_err(|e| TransportError {
                message: format!("unparseable payload: {e}"),
            })?;

        let response_text: String = parsed
            .candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<String>()
            })
            .unwrap_or_default();

        Ok(TransportResponse {
            text: response_text,
            raw: text,
            model_verified: parsed.model_version,
            input_tokens: parsed.usage.prompt_tokens,
            output_tokens: parsed.usage.candidate_tokens,
        })
    }
}

/// Rotating-credential provider: the rotator behind the uniform contract.
pub struct RotatingHttpProvider {
    rotator: CredentialRotator,
}

impl RotatingHttpProvider {
    /// Builds against the real HTTP transport using factory settings.
    pub fn from_settings(
        model: &str,
        settings: &ProviderSettings,
    ) -> Result<Self, ProviderConfigError> {
        Self::with_transport(
            model,
            settings,
            Arc::new(HttpRotatingTransport::new()) as Arc<dyn RotatingTransport>,
        )
    }

    /// Builds with an injected transport (tests use this).
    pub fn with_transport(
        model: &str,
        settings: &ProviderSettings,
        transport: Arc<dyn RotatingTransport>,
    ) -> Result<Self, ProviderConfigError> {
        let rotator = CredentialRotator::new(
            settings.credentials_path.clone(),
            RotationStore::new(settings.rotation_state_path.clone()),
            transport,
            model,
            settings.rotator.clone(),
        )?;
        Ok(Self { rotator })
    }
}

#[async_trait]
impl LlmProvider for RotatingHttpProvider {
    fn provider_name(&self) -> &str {
        PROVIDER_NAME
    }

    fn model(&self) -> &str {
        self.rotator.model()
    }

    async fn invoke(
        &self,
        system_prompt: &str,
        content: &str,
        timeout: Duration,
    ) -> LlmCallResult {
        let result = self.rotator.invoke(system_prompt, content, timeout).await;
        log_llm_call(&result);
        result
    }
}
