//! Credential pool loading.
//!
//! The rotating adapter walks an ordered list of credentials loaded from a
//! JSON file (by default `~/.steward/credentials.json`). Credentials are
//! immutable after load; the rotator owns the secrets and hands them to
//! the transport per call only.

use std::path::Path;

use miette::Diagnostic;
use serde::Deserialize;
use thiserror::Error;

/// One entry in the credential pool.
///
/// The `Debug` impl does not print the secret.
#[derive(Clone, Deserialize)]
pub struct Credential {
    pub name: String,
    pub key: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "account-name", default)]
    pub account_name: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("name", &self.name)
            .field("key", &"<redacted>")
            .field("enabled", &self.enabled)
            .field("account_name", &self.account_name)
            .finish()
    }
}

#[derive(Deserialize)]
struct CredentialsFile {
    #[serde(default)]
    credentials: Vec<Credential>,
}

#[derive(Debug, Error, Diagnostic)]
pub enum CredentialError {
    #[error("credentials file not found: {path}")]
    #[diagnostic(
        code(steward::credentials::not_found),
        help("Create {path} with {{\"credentials\": [{{\"name\", \"key\", \"enabled\", \"account-name\"}}]}}.")
    )]
    NotFound { path: String },

    #[error("failed to read credentials file {path}: {source}")]
    #[diagnostic(code(steward::credentials::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid credentials JSON in {path}: {source}")]
    #[diagnostic(code(steward::credentials::parse))]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Loads the ordered credential list from `path`.
pub fn load_credentials(path: &Path) -> Result<Vec<Credential>, CredentialError> {
    if !path.exists() {
        return Err(CredentialError::NotFound {
            path: path.display().to_string(),
        });
    }
    let text = std::fs::read_to_string(path).map_err(|source| CredentialError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let file: CredentialsFile =
        serde_json::from_str(&text).map_err(|source| CredentialError::Parse {
            path: path.display().to_string(),
            source,
        })?;
    Ok(file.credentials)
}
