//! Session types shared by the controller and its front ends
//!
//! These define the protocol between a front end (CLI, a network transport)
//! and the session controller: the operating mode, operator decisions, and
//! the notifications emitted while a prompt runs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::sync::mpsc;

/// Operating mode of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    /// Read-only planning
    #[serde(alias = "read_only_plan")]
    Plan,
    /// Every privileged action needs operator approval
    #[default]
    #[serde(alias = "default")]
    Supervised,
    /// No approval at all
    Unsupervised,
}

impl PermissionMode {
    /// Name of this mode in the agent's vocabulary
    pub fn as_agent_mode(&self) -> &'static str {
        match self {
            PermissionMode::Plan => "plan",
            PermissionMode::Supervised => "default",
            PermissionMode::Unsupervised => "bypassPermissions",
        }
    }

    /// Map a mode reported by the agent back to ours
    pub fn from_agent_mode(mode: &str) -> Option<Self> {
        match mode {
            "plan" => Some(PermissionMode::Plan),
            "default" | "acceptEdits" => Some(PermissionMode::Supervised),
            "bypassPermissions" => Some(PermissionMode::Unsupervised),
            _ => None,
        }
    }
}

impl std::fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionMode::Plan => write!(f, "plan"),
            PermissionMode::Supervised => write!(f, "supervised"),
            PermissionMode::Unsupervised => write!(f, "unsupervised"),
        }
    }
}

impl FromStr for PermissionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "plan" | "read_only_plan" => Ok(PermissionMode::Plan),
            "supervised" | "default" => Ok(PermissionMode::Supervised),
            "unsupervised" => Ok(PermissionMode::Unsupervised),
            _ => Err(format!(
                "Unknown permission mode: {}. Valid values: plan, supervised, unsupervised",
                s
            )),
        }
    }
}

/// What the operator decided about a pending tool request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionAction {
    Allow,
    /// Allow, and auto-allow this tool for the rest of the session
    AllowSession,
    Deny,
    /// Anything a front end sent that we do not recognise
    #[serde(other)]
    Unknown,
}

/// Operator response to a permission request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDecision {
    pub action: PermissionAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PermissionDecision {
    pub fn allow() -> Self {
        Self {
            action: PermissionAction::Allow,
            message: None,
        }
    }

    pub fn allow_session() -> Self {
        Self {
            action: PermissionAction::AllowSession,
            message: None,
        }
    }

    pub fn deny(message: Option<String>) -> Self {
        Self {
            action: PermissionAction::Deny,
            message,
        }
    }
}

/// Information about a question option
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A question the agent wants the operator to answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionInfo {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    #[serde(default)]
    pub multi_select: bool,
}

/// Answers keyed by question text
pub type Answers = HashMap<String, String>;

/// Notifications sent FROM the session while a prompt runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionOutput {
    /// Display-ready text fragment
    Chunk { text: String },
    /// A tool needs operator approval
    PermissionRequest {
        tool_name: String,
        arguments: Value,
        description: String,
    },
    /// The agent asked the operator something
    AskUser { questions: Vec<QuestionInfo> },
    /// The session's mode changed
    ModeChanged { mode: PermissionMode },
}

impl SessionOutput {
    pub fn chunk(text: impl Into<String>) -> Self {
        Self::Chunk { text: text.into() }
    }

    pub fn permission_request(
        tool_name: impl Into<String>,
        arguments: Value,
        description: impl Into<String>,
    ) -> Self {
        Self::PermissionRequest {
            tool_name: tool_name.into(),
            arguments,
            description: description.into(),
        }
    }

    pub fn ask_user(questions: Vec<QuestionInfo>) -> Self {
        Self::AskUser { questions }
    }

    pub fn mode_changed(mode: PermissionMode) -> Self {
        Self::ModeChanged { mode }
    }
}

/// Sender half for session notifications
pub type OutputSender = mpsc::UnboundedSender<SessionOutput>;

/// Receiver half for session notifications
pub type OutputReceiver = mpsc::UnboundedReceiver<SessionOutput>;

/// Create a new output channel
pub fn output_channel() -> (OutputSender, OutputReceiver) {
    mpsc::unbounded_channel()
}

/// Outcome of one `execute` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn failure(output: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            error: Some(error.into()),
        }
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub work_dir: PathBuf,
    pub mode: PermissionMode,
    pub running: bool,
    pub session_active: bool,
    pub session_id: Option<String>,
    pub history_len: usize,
}
