//! Fallback composition of two providers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{LlmCallResult, LlmProvider};

/// Tries a primary provider, falls back to a secondary on any failure.
///
/// The primary runs under `min(caller_timeout, primary_timeout)` so a hung
/// primary cannot eat the whole budget; the fallback gets the full caller
/// timeout. `provider_name` and `model` delegate to the primary — the
/// composition is transparent until a call actually fails over, at which
/// point the returned result carries the fallback's identity.
pub struct FallbackProvider {
    primary: Arc<dyn LlmProvider>,
    fallback: Arc<dyn LlmProvider>,
    primary_timeout: Duration,
}

impl FallbackProvider {
    #[must_use]
    pub fn new(
        primary: Arc<dyn LlmProvider>,
        fallback: Arc<dyn LlmProvider>,
        primary_timeout: Duration,
    ) -> Self {
        Self {
            primary,
            fallback,
            primary_timeout,
        }
    }
}

#[async_trait]
impl LlmProvider for FallbackProvider {
    fn provider_name(&self) -> &str {
        self.primary.provider_name()
    }

    fn model(&self) -> &str {
        self.primary.model()
    }

    async fn invoke(
        &self,
        system_prompt: &str,
        content: &str,
        timeout: Duration,
    ) -> LlmCallResult {
        let effective = timeout.min(self.primary_timeout);
        let result = self.primary.invoke(system_prompt, content, effective).await;
        if result.success {
            return result;
        }

        tracing::warn!(
            primary = self.primary.provider_name(),
            fallback = self.fallback.provider_name(),
            reason = result.error_message.as_deref().unwrap_or("unknown"),
            "primary provider failed; falling back"
        );
        self.fallback.invoke(system_prompt, content, timeout).await
    }
}
