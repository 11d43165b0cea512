//! Provider error classification.
//!
//! Maps a provider's textual error payload into the closed error-kind set
//! that drives rotation and retry decisions. Classification is an ordered
//! pattern match — quota signals take precedence over capacity, capacity
//! over auth — and is deterministic: the same input always classifies the
//! same way.

use serde::{Deserialize, Serialize};

/// Default quota-reset window when the provider does not say.
pub const DEFAULT_RESET_HOURS: f64 = 24.0;

/// Closed set of provider error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderErrorKind {
    /// Per-credential quota exhausted until its reset time; rotate.
    QuotaExhausted,
    /// Transient capacity problem; back off and retry the same credential.
    CapacityExhausted,
    /// Credential rejected; skip it for the rest of this run.
    AuthError,
    /// Provider payload could not be parsed; fail closed.
    ParseError,
    /// Verified model differs from the requested one; fail closed.
    ModelMismatch,
    /// Anything else; fail closed.
    Unknown,
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::QuotaExhausted => "QUOTA_EXHAUSTED",
            Self::CapacityExhausted => "CAPACITY_EXHAUSTED",
            Self::AuthError => "AUTH_ERROR",
            Self::ParseError => "PARSE_ERROR",
            Self::ModelMismatch => "MODEL_MISMATCH",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

const QUOTA_PATTERNS: &[&str] = &[
    "429",
    "quota",
    "resource_exhausted",
    "resource exhausted",
    "rate limit",
    "rate-limited",
    "too many requests",
];

const CAPACITY_PATTERNS: &[&str] = &[
    "529",
    "503",
    "overloaded",
    "capacity",
    "service unavailable",
    "temporarily unavailable",
];

const AUTH_PATTERNS: &[&str] = &[
    "401",
    "403",
    "api_key_invalid",
    "api key not valid",
    "invalid api key",
    "permission denied",
    "unauthenticated",
    "authentication",
    "unauthorized",
];

/// Classifies an error payload. Quota patterns are checked first, then
/// capacity, then auth; anything unmatched is [`ProviderErrorKind::Unknown`].
#[must_use]
pub fn classify(error_text: &str) -> ProviderErrorKind {
    let lower = error_text.to_ascii_lowercase();
    if QUOTA_PATTERNS.iter().any(|p| lower.contains(p)) {
        ProviderErrorKind::QuotaExhausted
    } else if CAPACITY_PATTERNS.iter().any(|p| lower.contains(p)) {
        ProviderErrorKind::CapacityExhausted
    } else if AUTH_PATTERNS.iter().any(|p| lower.contains(p)) {
        ProviderErrorKind::AuthError
    } else {
        ProviderErrorKind::Unknown
    }
}

/// Extracts a quota-reset duration in hours from payloads of the form
/// `reset after 2h 30m 15s` (any subset of components). Returns `None`
/// when the pattern is absent; callers fall back to
/// [`DEFAULT_RESET_HOURS`].
#[must_use]
pub fn extract_reset_hours(error_text: &str) -> Option<f64> {
    let lower = error_text.to_ascii_lowercase();
    let idx = lower.find("reset after")?;
    let tail = &lower[idx + "reset after".len()..];

    let mut hours = 0.0_f64;
    let mut found = false;
    let mut number = String::new();
    for ch in tail.chars() {
        if ch.is_ascii_digit() {
            number.push(ch);
        } else if !number.is_empty() {
            let value: f64 = number.parse().ok()?;
            match ch {
                'h' => {
                    hours += value;
                    found = true;
                }
                'm' => {
                    hours += value / 60.0;
                    found = true;
                }
                's' => {
                    hours += value / 3600.0;
                    found = true;
                }
                _ => {
                    // A number followed by anything else ends the pattern.
                    break;
                }
            }
            number.clear();
        } else if !ch.is_whitespace() {
            break;
        }
    }
    found.then_some(hours)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_patterns_classify_first() {
        assert_eq!(
            classify("HTTP 429: quota exceeded for this credential"),
            ProviderErrorKind::QuotaExhausted
        );
        assert_eq!(
            classify("RESOURCE_EXHAUSTED: rate limit"),
            ProviderErrorKind::QuotaExhausted
        );
        // Quota wins even when capacity words also appear.
        assert_eq!(
            classify("429 while the service was overloaded"),
            ProviderErrorKind::QuotaExhausted
        );
    }

    #[test]
    fn capacity_patterns_classify_second() {
        assert_eq!(
            classify("529: model overloaded, retry shortly"),
            ProviderErrorKind::CapacityExhausted
        );
        assert_eq!(
            classify("503 Service Unavailable"),
            ProviderErrorKind::CapacityExhausted
        );
    }

    #[test]
    fn auth_patterns_classify_third() {
        assert_eq!(
            classify("403: permission denied"),
            ProviderErrorKind::AuthError
        );
        assert_eq!(classify("API_KEY_INVALID"), ProviderErrorKind::AuthError);
    }

    #[test]
    fn unmatched_text_is_unknown() {
        assert_eq!(classify("segfault in provider"), ProviderErrorKind::Unknown);
        assert_eq!(classify(""), ProviderErrorKind::Unknown);
    }

    #[test]
    fn classification_is_deterministic() {
        let input = "429 quota exhausted, reset after 2h";
        assert_eq!(classify(input), classify(input));
    }

    #[test]
    fn reset_extraction_handles_component_subsets() {
        assert_eq!(extract_reset_hours("reset after 2h"), Some(2.0));
        assert_eq!(extract_reset_hours("reset after 30m"), Some(0.5));
        let full = extract_reset_hours("quota; reset after 1h 30m 36s").unwrap();
        assert!((full - 1.51).abs() < 1e-9);
        assert_eq!(extract_reset_hours("no reset info"), None);
    }
}
