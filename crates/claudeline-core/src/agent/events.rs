//! Events emitted by an agent capability
//!
//! These mirror the newline-delimited JSON that Claude Code prints with
//! `--output-format stream-json`, so the CLI driver can deserialize lines
//! directly and test fakes can build them by hand.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One event from the agent's stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Session bookkeeping: init and status pushes
    System {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subtype: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        /// Mode in the agent's vocabulary (`default`, `plan`, ...)
        #[serde(
            default,
            rename = "permissionMode",
            skip_serializing_if = "Option::is_none"
        )]
        permission_mode: Option<String>,
    },
    /// Assistant turn content, in arrival order
    Assistant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        message: AssistantMessage,
    },
    /// Tool results echoed back as a user turn; only the session id is kept
    User {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// Terminal event of a run
    Result {
        subtype: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        errors: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// Anything else (stream deltas, ...)
    #[serde(other)]
    Other,
}

impl AgentEvent {
    /// Create a system event carrying a session id
    pub fn init(session_id: impl Into<String>) -> Self {
        Self::System {
            subtype: Some("init".to_string()),
            session_id: Some(session_id.into()),
            permission_mode: None,
        }
    }

    /// Create a status event reporting the agent's mode
    pub fn status(permission_mode: impl Into<String>) -> Self {
        Self::System {
            subtype: Some("status".to_string()),
            session_id: None,
            permission_mode: Some(permission_mode.into()),
        }
    }

    /// Create an assistant event from content blocks
    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self::Assistant {
            session_id: None,
            message: AssistantMessage { content },
        }
    }

    /// Create a user echo carrying a session id
    pub fn user(session_id: impl Into<String>) -> Self {
        Self::User {
            session_id: Some(session_id.into()),
        }
    }

    /// Create a successful result event
    pub fn success(result: Option<String>) -> Self {
        Self::Result {
            subtype: "success".to_string(),
            result,
            errors: Vec::new(),
            session_id: None,
        }
    }

    /// Create a failed result event
    pub fn failure(subtype: impl Into<String>, errors: Vec<String>) -> Self {
        Self::Result {
            subtype: subtype.into(),
            result: None,
            errors,
            session_id: None,
        }
    }

    /// Session id carried by this event, if any
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::System { session_id, .. }
            | Self::Assistant { session_id, .. }
            | Self::User { session_id }
            | Self::Result { session_id, .. } => session_id.as_deref(),
            Self::Other => None,
        }
    }
}

/// Assistant message body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

/// One block of assistant content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        #[serde(default)]
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    /// Thinking and other block kinds are not displayed
    #[serde(other)]
    Other,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_use(name: impl Into<String>, input: Value) -> Self {
        Self::ToolUse {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            input,
        }
    }
}
