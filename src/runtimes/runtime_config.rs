//! Runtime configuration for compiled workflows.

use std::path::PathBuf;

use super::CheckpointerType;

/// Environment variable overriding the checkpoint database location.
pub const WORKFLOW_DB_ENV: &str = "STEWARD_WORKFLOW_DB";

/// Execution settings carried by a compiled [`App`](crate::app::App).
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Session key for checkpointing, by convention `lld-<n>`, `issue-<n>`,
    /// `testing-<n>`.
    pub thread_id: Option<String>,
    /// Persistence backend. `None` disables checkpointing entirely.
    pub checkpointer: Option<CheckpointerType>,
    /// SQLite database path for the durable backend.
    pub db_path: Option<PathBuf>,
    /// Hard bound on engine steps per run. Routers are expected to steer to
    /// `End` well before this; breaching it is a runner error.
    pub max_steps: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            thread_id: None,
            checkpointer: Some(CheckpointerType::InMemory),
            db_path: None,
            max_steps: 200,
        }
    }
}

impl RuntimeConfig {
    pub fn new(
        thread_id: Option<String>,
        checkpointer: Option<CheckpointerType>,
        db_path: Option<PathBuf>,
    ) -> Self {
        Self {
            thread_id,
            checkpointer,
            db_path,
            max_steps: 200,
        }
    }

    #[must_use]
    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Resolves the checkpoint database path: explicit config first, then
    /// the `STEWARD_WORKFLOW_DB` environment override, then
    /// `~/.steward/<db_name>`.
    #[must_use]
    pub fn resolve_db_path(&self, db_name: &str) -> PathBuf {
        if let Some(path) = &self.db_path {
            return path.clone();
        }
        if let Ok(env_path) = std::env::var(WORKFLOW_DB_ENV) {
            if !env_path.is_empty() {
                return PathBuf::from(env_path);
            }
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".steward")
            .join(db_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_db_path_wins() {
        let config = RuntimeConfig::new(
            Some("lld-7".into()),
            Some(CheckpointerType::Sqlite),
            Some(PathBuf::from("/tmp/x.db")),
        );
        assert_eq!(config.resolve_db_path("lld.db"), PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn default_enables_in_memory_checkpointing() {
        let config = RuntimeConfig::default();
        assert_eq!(config.checkpointer, Some(CheckpointerType::InMemory));
        assert_eq!(config.max_steps, 200);
    }
}
