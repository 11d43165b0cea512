//! # Steward: Governance Workflow Orchestrator
//!
//! Steward drives software-engineering documents (brief → issue →
//! low-level design → implementation spec → tests) through
//! generate/review/gate pipelines backed by LLM providers, with
//! deterministic validators between stages and an append-only audit
//! trail around everything.
//!
//! ## Core Concepts
//!
//! - **Nodes**: async units of work consuming a state snapshot and
//!   returning a partial update
//! - **State**: versioned channels (conversation, governance keys,
//!   errors) merged shallowly at a barrier after every step
//! - **Graph**: declarative workflow topology with name-resolved
//!   conditional routing
//! - **Runner**: per-thread sessions with checkpoint/resume
//! - **Providers**: a uniform invocation contract over CLI, HTTP,
//!   rotating-credential, and mock backends with fallback composition
//! - **Validators**: mechanical quality gates (coverage, structure,
//!   test-plan hygiene, AST completeness)
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::path::PathBuf;
//! use steward::config::OrchestratorConfig;
//! use steward::runtimes::{CheckpointerType, RuntimeConfig};
//! use steward::workflows::{build_lld_workflow, initial_state, WorkflowContext};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = OrchestratorConfig::new(PathBuf::from("/work/repo"));
//! let ctx = WorkflowContext::new(config)?;
//!
//! let runtime = RuntimeConfig::new(
//!     Some("lld-42".into()),
//!     Some(CheckpointerType::Sqlite),
//!     None,
//! );
//! let app = build_lld_workflow(ctx, runtime)?;
//!
//! let final_state = app.invoke(initial_state(42, false, false)).await?;
//! println!("{:?}", final_state.snapshot().get_str("final_path"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`types`] — node and channel identifiers
//! - [`message`] / [`state`] / [`channels`] — the state model
//! - [`node`] / [`graphs`] / [`app`] — workflow definition and barriers
//! - [`runtimes`] — session runner, checkpointers, resume
//! - [`llm`] — provider layer, error classifier, credential rotation
//! - [`validators`] — mechanical quality gates
//! - [`audit`] — governance JSONL log and per-workflow artifact trails
//! - [`config`] — orchestrator configuration
//! - [`workflows`] — the concrete issue / LLD / testing graphs

pub mod app;
pub mod audit;
pub mod channels;
pub mod config;
pub mod graphs;
pub mod llm;
pub mod message;
pub mod node;
pub mod reducers;
pub mod runtimes;
pub mod state;
pub mod telemetry;
pub mod types;
pub mod validators;
pub mod workflows;
