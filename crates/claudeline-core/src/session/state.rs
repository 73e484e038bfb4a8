//! Mutable session fields shared between the controller and the tool gate
//!
//! The mutex is never held across an `.await`, so the synchronous operator
//! calls (`cancel`, `resolve_permission`, ...) are atomic with respect to a
//! suspended run.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::mode::ModeState;
use super::types::{OutputSender, PermissionMode, SessionOutput};
use crate::agent::PermissionResult;

pub(super) type SharedState = Arc<Mutex<SessionState>>;

/// A tool call waiting on the operator
pub(super) struct PendingPermission {
    pub tool_name: String,
    pub input: Value,
    pub responder: oneshot::Sender<PermissionResult>,
}

/// A question waiting on the operator
pub(super) struct PendingQuestion {
    pub input: Value,
    pub responder: oneshot::Sender<PermissionResult>,
}

#[derive(Default)]
pub(super) struct SessionState {
    pub modes: ModeState,
    /// Resume token assigned by the agent
    pub session_id: Option<String>,
    pub running: bool,
    /// Bumped by every accepted `execute`
    pub generation: u64,
    pub cancel: Option<CancellationToken>,
    pub pending_permission: Option<PendingPermission>,
    pub pending_question: Option<PendingQuestion>,
    /// Where notifications for the current run go
    pub output: Option<OutputSender>,
    pub history: Vec<String>,
}

impl SessionState {
    pub fn new(mode: PermissionMode) -> Self {
        Self {
            modes: ModeState::new(mode),
            ..Default::default()
        }
    }

    pub fn shared(mode: PermissionMode) -> SharedState {
        Arc::new(Mutex::new(Self::new(mode)))
    }

    /// Send a notification to the bound front end, if any
    pub fn emit(&self, output: SessionOutput) {
        let Some(tx) = &self.output else {
            debug!(?output, "No output bound, dropping notification");
            return;
        };
        if tx.send(output).is_err() {
            debug!("Output receiver dropped");
        }
    }

    /// Drop any pending request or question; their waiters see cancellation
    pub fn discard_pending(&mut self) {
        if let Some(pending) = self.pending_permission.take() {
            debug!(tool = %pending.tool_name, "Discarding pending permission request");
        }
        if self.pending_question.take().is_some() {
            debug!("Discarding pending question");
        }
    }
}
