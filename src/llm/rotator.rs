//! Quota-aware credential rotator.
//!
//! Drives an ordered credential pool under the error taxonomy: capacity
//! problems back off and retry the same credential, quota exhaustion
//! records a reset time and advances to the next credential, auth failures
//! skip the credential for the rest of the run. Rotation state is
//! persisted after every mutation so it is consistent on disk even if the
//! process dies mid-call.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::classifier::{classify, extract_reset_hours, ProviderErrorKind, DEFAULT_RESET_HOURS};
use super::credentials::{load_credentials, Credential};
use super::rotation::RotationStore;
use super::{LlmCallResult, ProviderConfigError};

/// Rotator tunables.
#[derive(Debug, Clone)]
pub struct RotatorConfig {
    /// Tries per credential, inclusive of the first attempt.
    pub max_retries_per_credential: u32,
    /// Backoff base: sleep `min(base * 2^attempt, max)` seconds after a
    /// capacity failure on attempt N.
    pub backoff_base_seconds: f64,
    pub backoff_max_seconds: f64,
    /// Models governance calls must never run on.
    pub forbidden_models: Vec<String>,
    /// When set, the verified model reported by the transport must equal
    /// this value; a mismatch fails closed.
    pub required_model: Option<String>,
    /// Reset window to assume when the provider does not state one.
    pub default_reset_hours: f64,
}

impl Default for RotatorConfig {
    fn default() -> Self {
        Self {
            max_retries_per_credential: 4,
            backoff_base_seconds: 2.0,
            backoff_max_seconds: 60.0,
            forbidden_models: Vec::new(),
            required_model: None,
            default_reset_hours: DEFAULT_RESET_HOURS,
        }
    }
}

/// Successful transport response.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub text: String,
    pub raw: String,
    /// Model the provider reports having used; empty when unavailable.
    pub model_verified: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Failed transport call. The message is what gets classified.
#[derive(Debug, Clone)]
pub struct TransportError {
    pub message: String,
}

/// The wire-level call the rotator wraps. Implementations receive the
/// credential per call and must not retain it.
#[async_trait]
pub trait RotatingTransport: Send + Sync {
    async fn call(
        &self,
        credential: &Credential,
        model: &str,
        system_prompt: &str,
        content: &str,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError>;
}

/// Ordered-pool rotator over a [`RotatingTransport`].
pub struct CredentialRotator {
    credentials_path: PathBuf,
    store: RotationStore,
    transport: Arc<dyn RotatingTransport>,
    model: String,
    config: RotatorConfig,
}

impl std::fmt::Debug for CredentialRotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRotator")
            .field("credentials_path", &self.credentials_path)
            .field("store", &self.store)
            .field("model", &self.model)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CredentialRotator {
    /// Builds a rotator, rejecting models on the forbidden list up front.
    pub fn new(
        credentials_path: PathBuf,
        store: RotationStore,
        transport: Arc<dyn RotatingTransport>,
        model: &str,
        config: RotatorConfig,
    ) -> Result<Self, ProviderConfigError> {
        if config
            .forbidden_models
            .iter()
            .any(|m| m.eq_ignore_ascii_case(model))
        {
            return Err(ProviderConfigError::ForbiddenModel {
                model: model.to_string(),
            });
        }
        Ok(Self {
            credentials_path,
            store,
            transport,
            model: model.to_string(),
            config,
        })
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Walks the pool: retry/backoff per credential, rotate on quota
    /// exhaustion, skip on auth errors. A rotation cycle visits each
    /// credential at most once per call.
    pub async fn invoke(
        &self,
        system_prompt: &str,
        content: &str,
        timeout: Duration,
    ) -> LlmCallResult {
        let started = Instant::now();
        let provider = "rotating-http";

        let credentials = match load_credentials(&self.credentials_path) {
            Ok(creds) => creds,
            Err(e) => {
                return LlmCallResult::err(
                    provider,
                    &self.model,
                    e.to_string(),
                    ProviderErrorKind::Unknown,
                    started.elapsed().as_millis() as u64,
                    0,
                );
            }
        };
        let mut state = match self.store.load() {
            Ok(state) => state,
            Err(e) => {
                return LlmCallResult::err(
                    provider,
                    &self.model,
                    e.to_string(),
                    ProviderErrorKind::Unknown,
                    started.elapsed().as_millis() as u64,
                    0,
                );
            }
        };

        let available: Vec<&Credential> = credentials
            .iter()
            .filter(|c| c.enabled && !state.is_exhausted(&c.name))
            .collect();

        if available.is_empty() {
            let exhausted: Vec<String> = credentials
                .iter()
                .filter(|c| c.enabled && state.is_exhausted(&c.name))
                .map(|c| c.name.clone())
                .collect();
            let message = if exhausted.is_empty() {
                "no enabled credentials in the pool".to_string()
            } else {
                format!("all credentials quota-exhausted: {}", exhausted.join(", "))
            };
            let mut result = LlmCallResult::err(
                provider,
                &self.model,
                message,
                ProviderErrorKind::QuotaExhausted,
                started.elapsed().as_millis() as u64,
                0,
            );
            result.rate_limited = true;
            return result;
        }

        let head = available[0].name.clone();
        let mut attempts: u32 = 0;
        let mut rate_limited = false;
        let mut errors: Vec<String> = Vec::new();

        for credential in available {
            let mut attempt: u32 = 0;
            loop {
                attempt += 1;
                attempts += 1;
                let outcome = self
                    .transport
                    .call(credential, &self.model, system_prompt, content, timeout)
                    .await;

                match outcome {
                    Ok(response) => {
                        if let Some(required) = &self.config.required_model {
                            if !response.model_verified.is_empty()
                                && response.model_verified != *required
                            {
                                let message = format!(
                                    "model mismatch: requested {} but provider ran {}",
                                    required, response.model_verified
                                );
                                tracing::error!(credential = %credential.name, "{message}");
                                let mut result = LlmCallResult::err(
                                    provider,
                                    &self.model,
                                    message,
                                    ProviderErrorKind::ModelMismatch,
                                    started.elapsed().as_millis() as u64,
                                    attempts,
                                );
                                result.credential_used = credential.name.clone();
                                return result;
                            }
                        }

                        state.record_success(&credential.name);
                        if let Err(e) = self.store.save(&state) {
                            tracing::warn!(error = %e, "failed to persist rotation state after success");
                        }

                        let model_used = if response.model_verified.is_empty() {
                            self.model.clone()
                        } else {
                            response.model_verified.clone()
                        };
                        let mut result = LlmCallResult::ok(
                            provider,
                            &model_used,
                            response.text,
                            Some(response.raw),
                            started.elapsed().as_millis() as u64,
                            attempts,
                        );
                        result.credential_used = credential.name.clone();
                        result.rotation_occurred = credential.name != head;
                        result.input_tokens = response.input_tokens;
                        result.output_tokens = response.output_tokens;
                        result.rate_limited = rate_limited;
                        return result;
                    }
                    Err(e) => {
                        let kind = classify(&e.message);
                        errors.push(format!("{} [{kind}]: {}", credential.name, e.message));
                        match kind {
                            ProviderErrorKind::CapacityExhausted => {
                                if attempt < self.config.max_retries_per_credential {
                                    let backoff = (self.config.backoff_base_seconds
                                        * 2_f64.powi(attempt as i32))
                                    .min(self.config.backoff_max_seconds);
                                    tracing::debug!(
                                        credential = %credential.name,
                                        attempt,
                                        backoff_s = backoff,
                                        "capacity exhausted; backing off"
                                    );
                                    tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
                                    continue;
                                }
                                break; // retries spent, next credential
                            }
                            ProviderErrorKind::QuotaExhausted => {
                                rate_limited = true;
                                let reset_hours = extract_reset_hours(&e.message)
                                    .unwrap_or(self.config.default_reset_hours);
                                state.mark_exhausted(&credential.name, reset_hours);
                                if let Err(e) = self.store.save(&state) {
                                    tracing::warn!(error = %e,
                                        "failed to persist rotation state after exhaustion");
                                }
                                tracing::info!(
                                    credential = %credential.name,
                                    reset_hours,
                                    "credential quota-exhausted; rotating"
                                );
                                break;
                            }
                            _ => {
                                tracing::warn!(
                                    credential = %credential.name,
                                    kind = %kind,
                                    "credential failed; skipping for this run"
                                );
                                break;
                            }
                        }
                    }
                }
            }
        }

        let mut result = LlmCallResult::err(
            provider,
            &self.model,
            format!("all credentials failed: {}", errors.join("; ")),
            ProviderErrorKind::Unknown,
            started.elapsed().as_millis() as u64,
            attempts,
        );
        result.rate_limited = rate_limited;
        result
    }
}
