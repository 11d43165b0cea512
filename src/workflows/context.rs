//! Shared services handed to every workflow node.

use std::sync::Arc;

use crate::audit::GovernanceAuditLog;
use crate::config::OrchestratorConfig;
use crate::llm::{get_provider, LlmProvider, MockProvider, ProviderConfigError};

/// Immutable bundle of configuration and services a node needs: the
/// resolved drafter and reviewer providers plus the governance log.
/// Nodes hold this behind an `Arc`; per-run data stays in the workflow
/// state where it belongs.
pub struct WorkflowContext {
    pub config: OrchestratorConfig,
    pub drafter: Arc<dyn LlmProvider>,
    pub reviewer: Arc<dyn LlmProvider>,
    pub audit_log: GovernanceAuditLog,
}

impl WorkflowContext {
    /// Resolves the configured provider specs. Mock mode short-circuits to
    /// fixture providers regardless of the specs.
    pub fn new(config: OrchestratorConfig) -> Result<Arc<Self>, ProviderConfigError> {
        let (drafter, reviewer): (Arc<dyn LlmProvider>, Arc<dyn LlmProvider>) =
            if config.mock_mode {
                (
                    Arc::new(MockProvider::new("draft")),
                    Arc::new(MockProvider::new("review")),
                )
            } else {
                (
                    get_provider(&config.drafter_spec, &config.provider)?,
                    get_provider(&config.reviewer_spec, &config.provider)?,
                )
            };
        let audit_log = GovernanceAuditLog::new(config.audit_log_path.clone());
        Ok(Arc::new(Self {
            config,
            drafter,
            reviewer,
            audit_log,
        }))
    }

    /// Injects explicit providers (tests drive failure paths this way).
    pub fn with_providers(
        config: OrchestratorConfig,
        drafter: Arc<dyn LlmProvider>,
        reviewer: Arc<dyn LlmProvider>,
    ) -> Arc<Self> {
        let audit_log = GovernanceAuditLog::new(config.audit_log_path.clone());
        Arc::new(Self {
            config,
            drafter,
            reviewer,
            audit_log,
        })
    }
}
