//! Mock provider for deterministic tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::classifier::ProviderErrorKind;
use super::{LlmCallResult, LlmProvider};

const PROVIDER_NAME: &str = "mock";

/// A draft-shaped default response so workflows exercise real parsing.
const DEFAULT_DRAFT: &str = "# Mock Issue Title\n\n## Summary\n\nThis is a mock draft.\n\n## Requirements\n\n- Mock requirement 1\n- Mock requirement 2\n\n## Acceptance Criteria\n\n- [ ] Mock criteria met";

/// A verdict-shaped default response with the explicit checkbox markers
/// the review node parses.
const DEFAULT_REVIEW: &str = "## Final Verdict\n\n[X] **APPROVED** - Ready for implementation\n[ ] **BLOCKED** - Requires changes\n\n### Strengths\n- Well-structured\n\n### Recommendations\n- None required for approval";

/// Returns canned responses cyclically; optionally fails on the Nth call.
pub struct MockProvider {
    model: String,
    responses: Vec<String>,
    fail_on_call: Option<u32>,
    call_count: AtomicU32,
}

impl MockProvider {
    /// Model-keyed defaults: `draft` yields a draft-shaped document,
    /// `review` a verdict-shaped one, anything else a plain line.
    #[must_use]
    pub fn new(model: &str) -> Self {
        let responses = match model {
            "draft" => vec![DEFAULT_DRAFT.to_string()],
            "review" => vec![DEFAULT_REVIEW.to_string()],
            _ => vec!["Mock response".to_string()],
        };
        Self {
            model: model.to_string(),
            responses,
            fail_on_call: None,
            call_count: AtomicU32::new(0),
        }
    }

    /// Explicit response sequence; cycles when exhausted.
    #[must_use]
    pub fn with_responses(model: &str, responses: Vec<String>) -> Self {
        Self {
            model: model.to_string(),
            responses: if responses.is_empty() {
                vec!["Mock response".to_string()]
            } else {
                responses
            },
            fail_on_call: None,
            call_count: AtomicU32::new(0),
        }
    }

    /// Fails (exactly once) on the given 1-based call number.
    #[must_use]
    pub fn fail_on_call(mut self, n: u32) -> Self {
        self.fail_on_call = Some(n);
        self
    }

    /// Number of invocations so far.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn provider_name(&self) -> &str {
        PROVIDER_NAME
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn invoke(
        &self,
        _system_prompt: &str,
        _content: &str,
        _timeout: Duration,
    ) -> LlmCallResult {
        let call = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;

        if self.fail_on_call == Some(call) {
            return LlmCallResult::err(
                PROVIDER_NAME,
                &self.model,
                format!("mock failure on call {call}"),
                ProviderErrorKind::Unknown,
                0,
                1,
            );
        }

        let idx = ((call - 1) as usize) % self.responses.len();
        let response = self.responses[idx].clone();
        LlmCallResult::ok(
            PROVIDER_NAME,
            &self.model,
            response.clone(),
            Some(response),
            1,
            1,
        )
    }
}
