//! Tool authorization gate
//!
//! The agent calls [`ToolGate::authorize`] before every privileged action.
//! Decisions, first match wins:
//!
//! 1. plan-mode control tools are always allowed (and may switch mode)
//! 2. `AskUserQuestion` goes to the operator as a question, never denied
//! 3. tools on the session allow-list are allowed silently
//! 4. everything else waits for the operator, or for cancellation
//!
//! At most one request is outstanding at a time: the agent is itself
//! suspended until the gate answers. Each wait is a oneshot receiver whose
//! sender lives in the session state until an operator call takes it out,
//! so a second resolution finds nothing and is a no-op.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state::{PendingPermission, PendingQuestion, SessionState, SharedState};
use super::types::{
    Answers, PermissionAction, PermissionDecision, PermissionMode, QuestionInfo, SessionOutput,
};
use crate::agent::{PermissionResult, ToolAuthorizer};
use crate::error::{Error, Result};
use crate::formatting::describe_tool;

/// Tool the agent calls to ask the operator questions
pub const ASK_USER_QUESTION_TOOL: &str = "AskUserQuestion";

const DEFAULT_DENY_MESSAGE: &str = "User denied";
const UNKNOWN_ACTION_MESSAGE: &str = "Unknown permission action";

/// Authorization callback bound to one session
pub struct ToolGate {
    state: SharedState,
}

impl ToolGate {
    pub(super) fn new(state: SharedState) -> Self {
        Self { state }
    }

    async fn ask_user(&self, input: Value, cancel: CancellationToken) -> Result<PermissionResult> {
        let questions = parse_questions(&input);
        let rx = {
            let mut state = self.state.lock();
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let (responder, rx) = oneshot::channel();
            state.pending_question = Some(PendingQuestion { input, responder });
            info!(count = questions.len(), "Asking operator");
            state.emit(SessionOutput::ask_user(questions));
            rx
        };

        self.wait(rx, &cancel, |state| {
            state.pending_question.take();
        })
        .await
    }

    async fn request_permission(
        &self,
        tool_name: &str,
        input: Value,
        cancel: CancellationToken,
    ) -> Result<PermissionResult> {
        let rx = {
            let mut state = self.state.lock();
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let (responder, rx) = oneshot::channel();
            let description = describe_tool(tool_name, &input);
            state.pending_permission = Some(PendingPermission {
                tool_name: tool_name.to_string(),
                input: input.clone(),
                responder,
            });
            info!(tool = %tool_name, %description, "Waiting for operator approval");
            state.emit(SessionOutput::permission_request(tool_name, input, description));
            rx
        };

        self.wait(rx, &cancel, |state| {
            state.pending_permission.take();
        })
        .await
    }

    /// Wait for the operator or the cancel token, whichever comes first
    async fn wait(
        &self,
        rx: oneshot::Receiver<PermissionResult>,
        cancel: &CancellationToken,
        clear: impl FnOnce(&mut SessionState),
    ) -> Result<PermissionResult> {
        tokio::select! {
            biased;
            result = rx => result.map_err(|_| {
                debug!("Pending request dropped before resolution");
                Error::Cancelled
            }),
            _ = cancel.cancelled() => {
                clear(&mut self.state.lock());
                debug!("Authorization wait cancelled");
                Err(Error::Cancelled)
            }
        }
    }
}

#[async_trait]
impl ToolAuthorizer for ToolGate {
    async fn authorize(
        &self,
        tool_name: &str,
        input: Value,
        cancel: CancellationToken,
    ) -> Result<PermissionResult> {
        {
            let mut state = self.state.lock();
            if let Some(change) = state.modes.apply_plan_signal(tool_name) {
                if let Some(mode) = change {
                    info!(tool = %tool_name, %mode, "Agent switched mode");
                    state.emit(SessionOutput::mode_changed(mode));
                }
                return Ok(PermissionResult::allow(input));
            }
        }

        if tool_name == ASK_USER_QUESTION_TOOL {
            return self.ask_user(input, cancel).await;
        }

        {
            let state = self.state.lock();
            if state.modes.is_allowed(tool_name) {
                debug!(tool = %tool_name, "Auto-approved from session allow-list");
                return Ok(PermissionResult::allow(input));
            }
            // The operator may have switched to unsupervised after this run started
            if state.modes.mode() == PermissionMode::Unsupervised {
                debug!(tool = %tool_name, "Auto-approved in unsupervised mode");
                return Ok(PermissionResult::allow(input));
            }
        }

        self.request_permission(tool_name, input, cancel).await
    }
}

impl SessionState {
    /// Resolve the pending permission request. Returns false if none was pending.
    pub(super) fn resolve_permission(&mut self, decision: PermissionDecision) -> bool {
        let Some(pending) = self.pending_permission.take() else {
            debug!("No pending permission request to resolve");
            return false;
        };

        let result = match decision.action {
            PermissionAction::Allow => PermissionResult::allow(pending.input),
            PermissionAction::AllowSession => {
                info!(tool = %pending.tool_name, "Tool allowed for the rest of the session");
                self.modes.allow_for_session(pending.tool_name.clone());
                PermissionResult::allow(pending.input)
            }
            PermissionAction::Deny => PermissionResult::deny(
                decision
                    .message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| DEFAULT_DENY_MESSAGE.to_string()),
            ),
            PermissionAction::Unknown => {
                warn!(tool = %pending.tool_name, "Unknown permission action, denying");
                PermissionResult::deny(UNKNOWN_ACTION_MESSAGE)
            }
        };

        if pending.responder.send(result).is_err() {
            debug!("Permission waiter already gone");
        }
        true
    }

    /// Resolve the pending question. Returns false if none was pending.
    pub(super) fn resolve_answer(&mut self, answers: Answers) -> bool {
        let Some(pending) = self.pending_question.take() else {
            debug!("No pending question to answer");
            return false;
        };

        let answers: Map<String, Value> = answers
            .into_iter()
            .map(|(question, answer)| (question, Value::String(answer)))
            .collect();
        let mut input = match pending.input {
            Value::Object(obj) => obj,
            _ => Map::new(),
        };
        input.insert("answers".to_string(), Value::Object(answers));

        if pending
            .responder
            .send(PermissionResult::allow(Value::Object(input)))
            .is_err()
        {
            debug!("Question waiter already gone");
        }
        true
    }
}

fn parse_questions(input: &Value) -> Vec<QuestionInfo> {
    let Some(raw) = input.get("questions") else {
        warn!("AskUserQuestion called without questions");
        return Vec::new();
    };
    serde_json::from_value(raw.clone()).unwrap_or_else(|e| {
        warn!("Malformed AskUserQuestion input: {}", e);
        Vec::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::{output_channel, OutputReceiver};
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    fn gate_with_output(mode: PermissionMode) -> (ToolGate, SharedState, OutputReceiver) {
        let state = SessionState::shared(mode);
        let (tx, rx) = output_channel();
        state.lock().output = Some(tx);
        (ToolGate::new(state.clone()), state, rx)
    }

    async fn wait_for_pending(state: &SharedState) {
        for _ in 0..100 {
            if state.lock().pending_permission.is_some() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("request never became pending");
    }

    #[tokio::test]
    async fn test_allow_list_skips_operator() {
        let (gate, state, mut rx) = gate_with_output(PermissionMode::Supervised);
        state.lock().modes.allow_for_session("Bash");

        let result = gate
            .authorize("Bash", json!({"command": "ls"}), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, PermissionResult::allow(json!({"command": "ls"})));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_deny_uses_default_message() {
        let (gate, state, mut rx) = gate_with_output(PermissionMode::Supervised);
        let waiter = tokio::spawn(async move {
            gate.authorize("Write", json!({"file_path": "a.txt"}), CancellationToken::new())
                .await
        });

        wait_for_pending(&state).await;
        match rx.recv().await.unwrap() {
            SessionOutput::PermissionRequest { tool_name, description, .. } => {
                assert_eq!(tool_name, "Write");
                assert_eq!(description, "Write file: a.txt");
            }
            other => panic!("Expected PermissionRequest, got {:?}", other),
        }

        assert!(state.lock().resolve_permission(PermissionDecision::deny(None)));
        assert!(!state.lock().resolve_permission(PermissionDecision::allow()));

        let result = waiter.await.unwrap().unwrap();
        assert_eq!(result, PermissionResult::deny("User denied"));
    }

    #[tokio::test]
    async fn test_unknown_action_denies() {
        let (gate, state, _rx) = gate_with_output(PermissionMode::Supervised);
        let waiter = tokio::spawn(async move {
            gate.authorize("Bash", json!({}), CancellationToken::new()).await
        });

        wait_for_pending(&state).await;
        let decision = PermissionDecision {
            action: PermissionAction::Unknown,
            message: Some("ignored".into()),
        };
        assert!(state.lock().resolve_permission(decision));
        assert_eq!(
            waiter.await.unwrap().unwrap(),
            PermissionResult::deny("Unknown permission action")
        );
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_clears_pending() {
        let (gate, state, _rx) = gate_with_output(PermissionMode::Supervised);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let waiter = tokio::spawn(async move { gate.authorize("Bash", json!({}), token).await });

        wait_for_pending(&state).await;
        cancel.cancel();

        let result = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(state.lock().pending_permission.is_none());
    }

    #[tokio::test]
    async fn test_already_cancelled_fails_without_notifying() {
        let (gate, state, mut rx) = gate_with_output(PermissionMode::Supervised);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = gate.authorize("Bash", json!({}), cancel).await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(state.lock().pending_permission.is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_enter_plan_mode_always_allowed() {
        let (gate, state, mut rx) = gate_with_output(PermissionMode::Supervised);
        let input = json!({});

        let result = gate
            .authorize("EnterPlanMode", input.clone(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, PermissionResult::allow(input.clone()));
        assert_eq!(state.lock().modes.mode(), PermissionMode::Plan);
        assert_eq!(rx.try_recv().unwrap(), SessionOutput::mode_changed(PermissionMode::Plan));

        // Already planning: allowed, no second notification
        gate.authorize("EnterPlanMode", input, CancellationToken::new())
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_question_answers_are_merged() {
        let (gate, state, mut rx) = gate_with_output(PermissionMode::Supervised);
        let input = json!({"questions": [{"question": "Which DB?", "options": [{"label": "Postgres"}]}]});
        let waiter = tokio::spawn(async move {
            gate.authorize(ASK_USER_QUESTION_TOOL, input, CancellationToken::new())
                .await
        });

        match rx.recv().await.unwrap() {
            SessionOutput::AskUser { questions } => assert_eq!(questions[0].question, "Which DB?"),
            other => panic!("Expected AskUser, got {:?}", other),
        }

        let answers = Answers::from([("Which DB?".to_string(), "Postgres".to_string())]);
        assert!(state.lock().resolve_answer(answers.clone()));
        assert!(!state.lock().resolve_answer(answers));

        match waiter.await.unwrap().unwrap() {
            PermissionResult::Allow { updated_input } => {
                assert_eq!(updated_input["answers"]["Which DB?"], "Postgres");
                assert_eq!(updated_input["questions"][0]["question"], "Which DB?");
            }
            other => panic!("Expected Allow, got {:?}", other),
        }
    }
}
