//! Provider-layer composition: fallback semantics and the uniform contract.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use steward::llm::{
    FallbackProvider, LlmCallResult, LlmProvider, MockProvider, ProviderErrorKind,
};

/// Simulates a backend that takes `work_duration` to answer and honors the
/// caller timeout the way a real adapter does: sleeping at most the
/// timeout and reporting a timeout failure if the work would outlast it.
struct TimedProvider {
    name: &'static str,
    work_duration: Duration,
    received_timeouts: Mutex<Vec<Duration>>,
}

impl TimedProvider {
    fn new(name: &'static str, work_duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            name,
            work_duration,
            received_timeouts: Mutex::new(Vec::new()),
        })
    }

    fn timeouts(&self) -> Vec<Duration> {
        self.received_timeouts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for TimedProvider {
    fn provider_name(&self) -> &str {
        self.name
    }

    fn model(&self) -> &str {
        "timed"
    }

    async fn invoke(
        &self,
        _system_prompt: &str,
        _content: &str,
        timeout: Duration,
    ) -> LlmCallResult {
        self.received_timeouts.lock().unwrap().push(timeout);
        let effective = self.work_duration.min(timeout);
        tokio::time::sleep(effective).await;
        if self.work_duration > timeout {
            LlmCallResult::err(
                self.name,
                "timed",
                format!("timed out after {}ms", timeout.as_millis()),
                ProviderErrorKind::Unknown,
                effective.as_millis() as u64,
                1,
            )
        } else {
            LlmCallResult::ok(
                self.name,
                "timed",
                "done".to_string(),
                None,
                effective.as_millis() as u64,
                1,
            )
        }
    }
}

#[tokio::test]
async fn fallback_on_primary_timeout_uses_full_caller_budget() {
    // Scaled-down rendition of the canonical scenario: primary capped at
    // 30 units, caller allows 300; primary needs 35, fallback answers in 5.
    let unit = Duration::from_millis(1);
    let primary = TimedProvider::new("primary", 35 * unit);
    let fallback = TimedProvider::new("fallback", 5 * unit);
    let composed = FallbackProvider::new(primary.clone(), fallback.clone(), 30 * unit);

    let started = Instant::now();
    let result = composed.invoke("sys", "content", 300 * unit).await;
    let elapsed = started.elapsed();

    assert!(result.success);
    assert_eq!(result.provider, "fallback");
    // The primary was invoked with its own cap, the fallback with the
    // caller's full budget.
    assert_eq!(primary.timeouts(), vec![30 * unit]);
    assert_eq!(fallback.timeouts(), vec![300 * unit]);
    // Total wall time ≈ primary cap + fallback work, far below the caller
    // budget.
    assert!(elapsed >= 35 * unit);
    assert!(elapsed < 300 * unit);
}

#[tokio::test]
async fn fallback_is_not_attempted_when_primary_succeeds() {
    let unit = Duration::from_millis(1);
    let primary = TimedProvider::new("primary", 2 * unit);
    let fallback = TimedProvider::new("fallback", unit);
    let composed = FallbackProvider::new(primary.clone(), fallback.clone(), 30 * unit);

    let result = composed.invoke("sys", "content", 300 * unit).await;

    assert!(result.success);
    assert_eq!(result.provider, "primary");
    assert!(fallback.timeouts().is_empty());
}

#[tokio::test]
async fn fallback_identity_delegates_to_primary() {
    let primary = TimedProvider::new("primary", Duration::from_millis(1));
    let fallback = TimedProvider::new("fallback", Duration::from_millis(1));
    let composed = FallbackProvider::new(primary, fallback, Duration::from_secs(1));
    assert_eq!(composed.provider_name(), "primary");
    assert_eq!(composed.model(), "timed");
}

#[tokio::test]
async fn caller_timeout_below_primary_cap_wins() {
    let unit = Duration::from_millis(1);
    let primary = TimedProvider::new("primary", unit);
    let fallback = TimedProvider::new("fallback", unit);
    let composed = FallbackProvider::new(primary.clone(), fallback, 100 * unit);

    let _ = composed.invoke("sys", "content", 10 * unit).await;
    assert_eq!(primary.timeouts(), vec![10 * unit]);
}

#[tokio::test]
async fn every_attempted_invocation_reports_at_least_one_attempt() {
    let mock = MockProvider::new("draft");
    let result = mock.invoke("sys", "content", Duration::from_secs(1)).await;
    assert!(result.attempts >= 1);

    let failing = MockProvider::new("draft").fail_on_call(1);
    let result = failing
        .invoke("sys", "content", Duration::from_secs(1))
        .await;
    assert!(!result.success);
    assert!(result.attempts >= 1);
}
