//! Credential rotation behavior under the provider error taxonomy.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use steward::llm::{
    classify, CredentialRotator, ProviderErrorKind, RotatingTransport, RotationStore,
    RotatorConfig, TransportError, TransportResponse,
};

struct ScriptedTransport {
    script: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
    credentials_seen: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn new(script: Vec<Result<TransportResponse, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            credentials_seen: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<String> {
        self.credentials_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl RotatingTransport for ScriptedTransport {
    async fn call(
        &self,
        credential: &steward::llm::Credential,
        _model: &str,
        _system_prompt: &str,
        _content: &str,
        _timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        self.credentials_seen
            .lock()
            .unwrap()
            .push(credential.name.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(TransportError {
                    message: "script exhausted".to_string(),
                })
            })
    }
}

fn ok_response(text: &str) -> Result<TransportResponse, TransportError> {
    Ok(TransportResponse {
        text: text.to_string(),
        raw: text.to_string(),
        model_verified: String::new(),
        input_tokens: 10,
        output_tokens: 20,
    })
}

fn quota_error() -> Result<TransportResponse, TransportError> {
    Err(TransportError {
        message: "429 RESOURCE_EXHAUSTED: quota exceeded, reset after 1h".to_string(),
    })
}

fn capacity_error() -> Result<TransportResponse, TransportError> {
    Err(TransportError {
        message: "529: model overloaded, retry shortly".to_string(),
    })
}

fn write_credentials(dir: &std::path::Path, names: &[&str]) -> PathBuf {
    let creds: Vec<serde_json::Value> = names
        .iter()
        .map(|name| {
            serde_json::json!({
                "name": name,
                "key": format!("key-{name}"),
                "enabled": true,
                "account-name": format!("{name}@example")
            })
        })
        .collect();
    let path = dir.join("credentials.json");
    std::fs::write(
        &path,
        serde_json::json!({ "credentials": creds }).to_string(),
    )
    .unwrap();
    path
}

fn fast_config() -> RotatorConfig {
    RotatorConfig {
        backoff_base_seconds: 0.01,
        backoff_max_seconds: 0.5,
        ..RotatorConfig::default()
    }
}

fn rotator(
    dir: &std::path::Path,
    names: &[&str],
    transport: Arc<ScriptedTransport>,
    config: RotatorConfig,
) -> CredentialRotator {
    let creds = write_credentials(dir, names);
    let store = RotationStore::new(dir.join("rotation_state.json"));
    CredentialRotator::new(creds, store, transport, "pro", config).unwrap()
}

#[tokio::test]
async fn rotation_on_quota_exhaustion_advances_to_third_credential() {
    let dir = tempfile::tempdir().unwrap();
    let transport = ScriptedTransport::new(vec![
        quota_error(),
        quota_error(),
        ok_response("hello from the third"),
    ]);
    let rotator = rotator(
        dir.path(),
        &["first", "second", "third"],
        transport.clone(),
        fast_config(),
    );

    let result = rotator
        .invoke("system", "content", Duration::from_secs(30))
        .await;

    assert!(result.success);
    assert_eq!(result.attempts, 3);
    assert!(result.rotation_occurred);
    assert_eq!(result.credential_used, "third");
    assert!(result.rate_limited);
    assert_eq!(transport.seen(), vec!["first", "second", "third"]);

    // Rotation state on disk: the first two are exhausted with future
    // reset times, the third is not.
    let state = RotationStore::new(dir.path().join("rotation_state.json"))
        .load()
        .unwrap();
    assert!(state.is_exhausted("first"));
    assert!(state.is_exhausted("second"));
    assert!(!state.exhausted.contains_key("third"));
    assert_eq!(state.last_success.as_deref(), Some("third"));
}

#[tokio::test]
async fn backoff_on_capacity_exhaustion_retries_same_credential() {
    let dir = tempfile::tempdir().unwrap();
    let transport = ScriptedTransport::new(vec![
        capacity_error(),
        capacity_error(),
        capacity_error(),
        ok_response("recovered"),
    ]);
    let base = 0.01_f64;
    let config = RotatorConfig {
        backoff_base_seconds: base,
        backoff_max_seconds: 1.0,
        ..RotatorConfig::default()
    };
    let rotator = rotator(dir.path(), &["solo"], transport.clone(), config);

    let started = Instant::now();
    let result = rotator
        .invoke("system", "content", Duration::from_secs(30))
        .await;
    let elapsed = started.elapsed();

    assert!(result.success);
    assert_eq!(result.attempts, 4);
    assert!(!result.rotation_occurred);
    assert_eq!(result.credential_used, "solo");
    // Backoffs: base·2 + base·4 + base·8 = 14·base.
    assert!(
        elapsed >= Duration::from_secs_f64(14.0 * base),
        "elapsed {elapsed:?}"
    );
    assert_eq!(transport.seen(), vec!["solo"; 4]);

    // No rotation state entry for a capacity-only failure.
    let state = RotationStore::new(dir.path().join("rotation_state.json"))
        .load()
        .unwrap();
    assert!(!state.exhausted.contains_key("solo"));
}

#[tokio::test]
async fn empty_pool_fails_with_quota_exhausted_and_names() {
    let dir = tempfile::tempdir().unwrap();
    let transport = ScriptedTransport::new(vec![]);
    let rotator = rotator(
        dir.path(),
        &["alpha", "beta"],
        transport.clone(),
        fast_config(),
    );

    // Pre-exhaust both credentials.
    let store = RotationStore::new(dir.path().join("rotation_state.json"));
    let mut state = store.load().unwrap();
    state.mark_exhausted("alpha", 24.0);
    state.mark_exhausted("beta", 24.0);
    store.save(&state).unwrap();

    let result = rotator
        .invoke("system", "content", Duration::from_secs(5))
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ProviderErrorKind::QuotaExhausted));
    assert_eq!(result.attempts, 0);
    let message = result.error_message.unwrap();
    assert!(message.contains("alpha"));
    assert!(message.contains("beta"));
    // No transport call was ever made.
    assert!(transport.seen().is_empty());
}

#[tokio::test]
async fn auth_errors_skip_to_next_credential_without_exhaustion() {
    let dir = tempfile::tempdir().unwrap();
    let transport = ScriptedTransport::new(vec![
        Err(TransportError {
            message: "403: permission denied".to_string(),
        }),
        ok_response("second works"),
    ]);
    let rotator = rotator(
        dir.path(),
        &["revoked", "good"],
        transport.clone(),
        fast_config(),
    );

    let result = rotator
        .invoke("system", "content", Duration::from_secs(5))
        .await;

    assert!(result.success);
    assert_eq!(result.credential_used, "good");
    assert!(result.rotation_occurred);
    assert!(!result.rate_limited);

    let state = RotationStore::new(dir.path().join("rotation_state.json"))
        .load()
        .unwrap();
    assert!(!state.exhausted.contains_key("revoked"));
}

#[tokio::test]
async fn all_credentials_failing_aggregates_errors_as_unknown() {
    let dir = tempfile::tempdir().unwrap();
    let transport = ScriptedTransport::new(vec![
        Err(TransportError {
            message: "segfault one".to_string(),
        }),
        Err(TransportError {
            message: "segfault two".to_string(),
        }),
    ]);
    let rotator = rotator(dir.path(), &["a", "b"], transport, fast_config());

    let result = rotator
        .invoke("system", "content", Duration::from_secs(5))
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ProviderErrorKind::Unknown));
    assert_eq!(result.attempts, 2);
    let message = result.error_message.unwrap();
    assert!(message.contains("segfault one"));
    assert!(message.contains("segfault two"));
}

#[tokio::test]
async fn model_mismatch_fails_closed() {
    let dir = tempfile::tempdir().unwrap();
    let transport = ScriptedTransport::new(vec![Ok(TransportResponse {
        text: "reply".to_string(),
        raw: "reply".to_string(),
        model_verified: "mini-downgrade".to_string(),
        input_tokens: 0,
        output_tokens: 0,
    })]);
    let config = RotatorConfig {
        required_model: Some("pro".to_string()),
        ..fast_config()
    };
    let rotator = rotator(dir.path(), &["solo"], transport, config);

    let result = rotator
        .invoke("system", "content", Duration::from_secs(5))
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ProviderErrorKind::ModelMismatch));
}

#[test]
fn forbidden_models_are_rejected_at_construction() {
    let dir = tempfile::tempdir().unwrap();
    let creds = write_credentials(dir.path(), &["a"]);
    let store = RotationStore::new(dir.path().join("rotation_state.json"));
    let transport = ScriptedTransport::new(vec![]);
    let config = RotatorConfig {
        forbidden_models: vec!["lite".to_string()],
        ..RotatorConfig::default()
    };
    let err = CredentialRotator::new(creds, store, transport, "lite", config).unwrap_err();
    assert!(err.to_string().contains("forbidden"));
}

#[test]
fn classification_is_deterministic_over_many_inputs() {
    let inputs = [
        "429 too many requests",
        "quota exceeded, reset after 2h 30m",
        "529 overloaded",
        "403 forbidden: API_KEY_INVALID",
        "mystery failure",
        "",
    ];
    for input in inputs {
        assert_eq!(classify(input), classify(input), "input: {input}");
    }
}
