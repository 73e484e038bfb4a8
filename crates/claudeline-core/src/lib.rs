//! claudeline core - operator sessions for the Claude Code agent
//!
//! This crate sits between an operator front end and a coding agent:
//! - Session controller: one run at a time, resume, cancel, reset
//! - Tool authorization gate with per-session approvals
//! - Operating modes (plan, supervised, unsupervised)
//! - Output assembly and human-readable tool descriptions
//! - A driver for the `claude` CLI stream-json protocol

pub mod agent;
pub mod config;
pub mod error;
pub mod formatting;
pub mod session;

pub use agent::{
    AgentCapability, AgentEvent, AgentRequest, AgentStream, ClaudeCli, PermissionResult,
    ToolAuthorizer,
};
pub use config::{AgentConfig, Config, ConfigManager};
pub use error::{Error, Result};
pub use formatting::{describe_tool, format_work_dir, truncate_str};

// Session exports
pub use session::{
    Answers, ExecutionResult, OutputReceiver, OutputSender, PermissionAction, PermissionDecision,
    PermissionMode, QuestionInfo, QuestionOption, SessionController, SessionOutput, SessionStatus,
    output_channel,
};
