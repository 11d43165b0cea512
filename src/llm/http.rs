//! Direct messages-API provider adapter.
//!
//! Calls the provider's HTTP messages API with a secret loaded from the
//! repository's `.env` file — deliberately not from process environment
//! variables, which can collide with a logged-in CLI session on the same
//! machine. Token usage and cost are computed from the response; cache
//! reads are priced at 10% of the input rate and cache creation at 125%.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::classifier::ProviderErrorKind;
use super::{log_llm_call, LlmCallResult, LlmProvider, ProviderConfigError};

const PROVIDER_NAME: &str = "http-direct";

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const ENV_KEY: &str = "ANTHROPIC_API_KEY";

/// Hard upper bound on generated tokens per call.
const MAX_TOKENS: u64 = 65_536;

const MODEL_MAP: &[(&str, &str)] = &[
    ("opus", "claude-opus-4-6"),
    ("sonnet", "claude-sonnet-4-6"),
    ("haiku", "claude-haiku-4-5"),
];

/// USD per million tokens: (model id, input, output).
const PRICING: &[(&str, f64, f64)] = &[
    ("claude-opus-4-6", 5.0, 25.0),
    ("claude-sonnet-4-6", 3.0, 15.0),
    ("claude-haiku-4-5", 1.0, 5.0),
];

/// Loads the API key from `<repo_root>/.env`. Quoted values are stripped;
/// comments and blank lines are skipped. Returns `None` when the file or
/// key is absent.
fn load_api_key(repo_root: &Path) -> Option<String> {
    let env_path = repo_root.join(".env");
    let iter = dotenvy::from_path_iter(&env_path).ok()?;
    for item in iter {
        let (key, value) = item.ok()?;
        if key == ENV_KEY && !value.is_empty() {
            return Some(value);
        }
    }
    None
}

/// Whether a usable API key exists (used to decide CLI→API fallback wiring).
pub(crate) fn api_key_available(repo_root: &Path) -> bool {
    load_api_key(repo_root).is_some()
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: u64,
    system: &'a str,
    messages: Vec<ApiMessage<'a>>,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: u64,
}

/// Direct HTTP adapter for the messages API.
pub struct HttpDirectProvider {
    model: String,
    model_id: String,
    repo_root: PathBuf,
    client: reqwest::Client,
}

impl HttpDirectProvider {
    pub fn new(model: &str, repo_root: PathBuf) -> Result<Self, ProviderConfigError> {
        let lower = model.to_ascii_lowercase();
        let model_id = MODEL_MAP
            .iter()
            .find(|(alias, _)| *alias == lower)
            .map(|(_, id)| (*id).to_string())
            .unwrap_or_else(|| lower.clone());
        Ok(Self {
            model: lower,
            model_id,
            repo_root,
            client: reqwest::Client::new(),
        })
    }

    fn calculate_cost(&self, usage: &Usage) -> f64 {
        let Some((_, input_price, output_price)) =
            PRICING.iter().find(|(id, _, _)| *id == self.model_id)
        else {
            return 0.0;
        };
        let mut cost = usage.input_tokens as f64 * input_price / 1_000_000.0
            + usage.output_tokens as f64 * output_price / 1_000_000.0;
        cost += usage.cache_read_input_tokens as f64 * (input_price * 0.10) / 1_000_000.0;
        cost += usage.cache_creation_input_tokens as f64 * (input_price * 1.25) / 1_000_000.0;
        cost
    }
}

#[async_trait]
impl LlmProvider for HttpDirectProvider {
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

        let Some(api_key) = load_api_key(&self.repo_root) else {
            let result = LlmCallResult::err(
                PROVIDER_NAME,
                &self.model,
                format!("{ENV_KEY} not found in .env at the repo root"),
                ProviderErrorKind::AuthError,
                0,
                0,
            );
            log_llm_call(&result);
            return result;
        };

        let request = ApiRequest {
            model: &self.model_id,
            max_tokens: MAX_TOKENS,
            system: system_prompt,
            messages: vec![ApiMessage {
                role: "user",
                content,
            }],
        };

        let response = self
            .client
            .post(API_URL)
            .header("x-api-key", &api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .timeout(timeout)
            .send()
            .await;

        let duration_ms = started.elapsed().as_millis() as u64;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                let message = if e.is_timeout() {
                    format!("messages API timed out after {}s", timeout.as_secs())
                } else {
                    format!("messages API request failed: {e}")
                };
                let result = LlmCallResult::err(
                    PROVIDER_NAME,
                    &self.model,
                    message,
                    ProviderErrorKind::Unknown,
                    duration_ms,
                    1,
                );
                log_llm_call(&result);
                return result;
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let duration_ms = started.elapsed().as_millis() as u64;

        if !status.is_success() {
            let kind = super::classify(&format!("{status} {body}"));
            let mut result = LlmCallResult::err(
                PROVIDER_NAME,
                &self.model,
                format!("messages API returned {status}: {}", truncate(&body, 200)),
                kind,
                duration_ms,
                1,
            );
            result.raw_response = Some(body);
            result.rate_limited = status.as_u16() == 429;
            log_llm_call(&result);
            return result;
        }

        let parsed: ApiResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(e) => {
                let mut result = LlmCallResult::err(
                    PROVIDER_NAME,
                    &self.model,
                    format!("unparseable messages API payload: {e}"),
                    ProviderErrorKind::ParseError,
                    duration_ms,
                    1,
                );
                result.raw_response = Some(body);
                log_llm_call(&result);
                return result;
            }
        };

        let text: String = parsed
            .content
            .iter()
            .filter(|b| b.kind == "text" || b.kind.is_empty())
            .map(|b| b.text.as_str())
            .collect();

        let mut result = LlmCallResult::ok(
            PROVIDER_NAME,
            &self.model,
            text,
            Some(body),
            duration_ms,
            1,
        );
        if !parsed.model.is_empty() {
            result.model_used = parsed.model.clone();
        }
        result.input_tokens = parsed.usage.input_tokens;
        result.output_tokens = parsed.usage.output_tokens;
        result.cache_read_tokens = parsed.usage.cache_read_input_tokens;
        result.cache_creation_tokens = parsed.usage.cache_creation_input_tokens;
        result.cost_usd = self.calculate_cost(&parsed.usage);
        log_llm_call(&result);
        result
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn env_key_loading_strips_quotes_and_skips_comments() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join(".env")).unwrap();
        writeln!(f, "# provider secrets").unwrap();
        writeln!(f).unwrap();
        writeln!(f, "OTHER=value").unwrap();
        writeln!(f, "{ENV_KEY}=\"sk-test-quoted\"").unwrap();

        assert_eq!(load_api_key(dir.path()).as_deref(), Some("sk-test-quoted"));
        assert!(api_key_available(dir.path()));
    }

    #[test]
    fn missing_env_file_yields_no_key() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_api_key(dir.path()), None);
        assert!(!api_key_available(dir.path()));
    }

    #[test]
    fn cost_prices_cache_tiers_off_input_rate() {
        let provider = HttpDirectProvider::new("opus", PathBuf::from(".")).unwrap();
        let usage = Usage {
            input_tokens: 1_000_000,
            output_tokens: 0,
            cache_read_input_tokens: 1_000_000,
            cache_creation_input_tokens: 1_000_000,
        };
        // 5.0 input + 0.5 cache-read (10%) + 6.25 cache-create (125%)
        let cost = provider.calculate_cost(&usage);
        assert!((cost - 11.75).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_costs_zero() {
        let provider = HttpDirectProvider::new("claude-custom-1", PathBuf::from(".")).unwrap();
        let usage = Usage {
            input_tokens: 1000,
            ..Default::default()
        };
        assert_eq!(provider.calculate_cost(&usage), 0.0);
    }
}
