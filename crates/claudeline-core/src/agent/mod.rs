//! Agent capability seam
//!
//! The coding agent itself is external. The session controller reaches it
//! through [`AgentCapability`], which turns one prompt into a stream of
//! [`AgentEvent`]s, and constrains it through [`ToolAuthorizer`], which the
//! capability must call before every privileged action.

mod claude_cli;
mod events;

pub use claude_cli::{ClaudeCli, DEFAULT_CANDIDATES};
pub use events::{AgentEvent, AssistantMessage, ContentBlock};

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Lazy, finite, non-restartable stream of agent events
pub type AgentStream = Pin<Box<dyn Stream<Item = Result<AgentEvent>> + Send>>;

/// Everything an agent needs to run one prompt
#[derive(Clone)]
pub struct AgentRequest {
    pub prompt: String,
    pub working_directory: PathBuf,
    /// Mode in the agent's vocabulary (`plan`, `default`, `bypassPermissions`)
    pub permission_mode: String,
    /// Conversation to continue, if any
    pub resume: Option<String>,
    /// Fired when the operator cancels the run
    pub cancel: CancellationToken,
    /// `None` tells the agent to bypass authorization entirely
    pub authorizer: Option<Arc<dyn ToolAuthorizer>>,
}

impl std::fmt::Debug for AgentRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRequest")
            .field("prompt", &self.prompt)
            .field("working_directory", &self.working_directory)
            .field("permission_mode", &self.permission_mode)
            .field("resume", &self.resume)
            .field("has_authorizer", &self.authorizer.is_some())
            .finish()
    }
}

/// Decision returned to the agent for one privileged action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "behavior", rename_all = "camelCase")]
pub enum PermissionResult {
    #[serde(rename_all = "camelCase")]
    Allow { updated_input: Value },
    Deny { message: String },
}

impl PermissionResult {
    pub fn allow(updated_input: Value) -> Self {
        Self::Allow { updated_input }
    }

    pub fn deny(message: impl Into<String>) -> Self {
        Self::Deny {
            message: message.into(),
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }
}

/// Callback the agent invokes before each privileged action
#[async_trait]
pub trait ToolAuthorizer: Send + Sync {
    /// Decide whether `tool_name` may run with `input`.
    ///
    /// Fails with [`crate::Error::Cancelled`] if `cancel` fires first.
    async fn authorize(
        &self,
        tool_name: &str,
        input: Value,
        cancel: CancellationToken,
    ) -> Result<PermissionResult>;
}

/// An external coding agent
#[async_trait]
pub trait AgentCapability: Send + Sync {
    /// Start a run for `request`.
    ///
    /// Errors returned here mean the run never started; errors inside the
    /// stream mean it failed part way.
    async fn query(&self, request: AgentRequest) -> Result<AgentStream>;
}
