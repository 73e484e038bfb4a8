//! Session controller
//!
//! Owns the one conversation between the operator and the agent: at most one
//! run in flight, the resume token, the operating mode, and the pending
//! operator decisions. Front ends call the synchronous methods (`cancel`,
//! `resolve_permission`, ...) from other tasks while `execute` is suspended.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::approval::ToolGate;
use super::assembler::OutputAssembler;
use super::state::{SessionState, SharedState};
use super::types::{
    Answers, ExecutionResult, OutputSender, PermissionDecision, PermissionMode, SessionOutput,
    SessionStatus,
};
use crate::agent::{AgentCapability, AgentEvent, AgentRequest, ContentBlock, ToolAuthorizer};
use crate::error::{Error, Result};
use crate::formatting::truncate_str;

/// Result subtype the agent reports for a successful run
const SUCCESS_SUBTYPE: &str = "success";

/// One in-flight run
struct Execution {
    prompt: String,
    cancel: CancellationToken,
    output: String,
    assembler: OutputAssembler,
    streamed_text: bool,
    sink: OutputSender,
}

impl Execution {
    fn new(prompt: String, cancel: CancellationToken, sink: OutputSender) -> Self {
        Self {
            prompt,
            cancel,
            output: String::new(),
            assembler: OutputAssembler::new(),
            streamed_text: false,
            sink,
        }
    }

    fn emit(&mut self, text: String) {
        self.output.push_str(&text);
        if self.sink.send(SessionOutput::chunk(text)).is_err() {
            debug!("Output receiver dropped, chunk not delivered");
        }
    }

    fn emit_text(&mut self, text: &str) {
        for fragment in self.assembler.push_text(text) {
            self.emit(fragment);
        }
        self.streamed_text = true;
    }

    fn flush_tools(&mut self) {
        if let Some(fragment) = self.assembler.flush() {
            self.emit(fragment);
        }
    }
}

/// Restores session bookkeeping however a run ends
struct ExecutionGuard {
    state: SharedState,
    generation: u64,
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if state.generation != self.generation {
            debug!(
                generation = self.generation,
                "Session moved on to a newer run, leaving its state alone"
            );
            return;
        }
        state.running = false;
        state.cancel = None;
        state.discard_pending();
        state.output = None;
    }
}

/// Controller for one operator session
pub struct SessionController {
    agent: Arc<dyn AgentCapability>,
    work_dir: PathBuf,
    state: SharedState,
}

impl SessionController {
    /// Create a controller that runs `agent` in `work_dir`, starting supervised
    pub fn new(agent: Arc<dyn AgentCapability>, work_dir: impl Into<PathBuf>) -> Self {
        Self::with_mode(agent, work_dir, PermissionMode::Supervised)
    }

    /// Create a controller starting in `mode`
    pub fn with_mode(
        agent: Arc<dyn AgentCapability>,
        work_dir: impl Into<PathBuf>,
        mode: PermissionMode,
    ) -> Self {
        Self {
            agent,
            work_dir: work_dir.into(),
            state: SessionState::shared(mode),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Resume token assigned by the agent, if a conversation has started
    pub fn session_id(&self) -> Option<String> {
        self.state.lock().session_id.clone()
    }

    pub fn permission_mode(&self) -> PermissionMode {
        self.state.lock().modes.mode()
    }

    /// Operator mode change. Always revokes session approvals.
    ///
    /// Returns whether the mode actually changed.
    pub fn set_permission_mode(&self, mode: PermissionMode) -> bool {
        let mut state = self.state.lock();
        match state.modes.force(mode) {
            Some(mode) => {
                info!(%mode, "Operator changed mode");
                state.emit(SessionOutput::mode_changed(mode));
                true
            }
            None => false,
        }
    }

    /// Tools approved for the rest of the session, sorted
    pub fn allowed_tools(&self) -> Vec<String> {
        self.state.lock().modes.allowed_tools()
    }

    /// Every prompt accepted since the last reset
    pub fn command_history(&self) -> Vec<String> {
        self.state.lock().history.clone()
    }

    pub fn status(&self) -> SessionStatus {
        let state = self.state.lock();
        SessionStatus {
            work_dir: self.work_dir.clone(),
            mode: state.modes.mode(),
            running: state.running,
            session_active: state.session_id.is_some(),
            session_id: state.session_id.clone(),
            history_len: state.history.len(),
        }
    }

    /// Signal the running execution to stop. Returns false if idle.
    ///
    /// Does not wait: the pending `execute` call returns once the run unwinds.
    pub fn cancel(&self) -> bool {
        let state = self.state.lock();
        if !state.running {
            return false;
        }
        match &state.cancel {
            Some(token) => {
                info!("Cancelling current run");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Start a fresh conversation.
    ///
    /// This only clears bookkeeping; an in-flight run is not cancelled. Call
    /// [`cancel`](Self::cancel) first for that.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        if state.running {
            warn!("Resetting session while a run is still in flight");
        }
        state.session_id = None;
        state.running = false;
        state.cancel = None;
        state.discard_pending();
        state.output = None;
        state.modes.reset();
        state.history.clear();
        info!("Session reset");
    }

    /// Answer the pending permission request. Returns false if none was pending.
    pub fn resolve_permission(&self, decision: PermissionDecision) -> bool {
        self.state.lock().resolve_permission(decision)
    }

    /// Answer the pending question. Returns false if none was pending.
    pub fn resolve_answer(&self, answers: Answers) -> bool {
        self.state.lock().resolve_answer(answers)
    }

    /// Run `prompt` through the agent, streaming notifications to `output`.
    ///
    /// Never fails outright: busy, cancelled and agent errors all come back
    /// as an unsuccessful [`ExecutionResult`] carrying the partial output.
    pub async fn execute(&self, prompt: impl Into<String>, output: OutputSender) -> ExecutionResult {
        let prompt = prompt.into();
        let Some((request, generation)) = self.begin(&prompt, output.clone()) else {
            warn!("Rejected prompt: a command is already running");
            return ExecutionResult::failure("", Error::AlreadyRunning.to_string());
        };
        let _guard = ExecutionGuard {
            state: self.state.clone(),
            generation,
        };

        info!(
            generation,
            mode = %request.permission_mode,
            resume = ?request.resume,
            "Starting agent run"
        );
        let mut execution = Execution::new(prompt, request.cancel.clone(), output);
        let outcome = self.drive(&mut execution, request).await;

        debug!(prompt = %truncate_str(&execution.prompt, 60), "Agent run finished");
        match outcome {
            Ok(()) => {
                info!(chars = execution.output.len(), "Agent run succeeded");
                ExecutionResult::success(execution.output)
            }
            Err(e) if e.is_cancelled() || execution.cancel.is_cancelled() => {
                info!("Agent run cancelled");
                ExecutionResult::failure(execution.output, Error::Cancelled.to_string())
            }
            Err(e) => {
                warn!("Agent run failed: {}", e);
                ExecutionResult::failure(execution.output, e.to_string())
            }
        }
    }

    /// Claim the session for a new run and build the agent request
    fn begin(&self, prompt: &str, output: OutputSender) -> Option<(AgentRequest, u64)> {
        let mut state = self.state.lock();
        if state.running {
            return None;
        }
        state.running = true;
        state.generation += 1;
        let cancel = CancellationToken::new();
        state.cancel = Some(cancel.clone());
        state.output = Some(output);
        state.history.push(prompt.to_string());

        let mode = state.modes.mode();
        let authorizer: Option<Arc<dyn ToolAuthorizer>> = match mode {
            PermissionMode::Unsupervised => None,
            _ => Some(Arc::new(ToolGate::new(self.state.clone()))),
        };

        let request = AgentRequest {
            prompt: prompt.to_string(),
            working_directory: self.work_dir.clone(),
            permission_mode: mode.as_agent_mode().to_string(),
            resume: state.session_id.clone(),
            cancel,
            authorizer,
        };
        Some((request, state.generation))
    }

    async fn drive(&self, execution: &mut Execution, request: AgentRequest) -> Result<()> {
        let cancel = request.cancel.clone();
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            stream = self.agent.query(request) => stream?,
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                next = stream.next() => next,
            };
            match next {
                Some(Ok(event)) => self.handle_event(execution, event)?,
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }

        execution.flush_tools();
        Ok(())
    }

    fn handle_event(&self, execution: &mut Execution, event: AgentEvent) -> Result<()> {
        if let Some(id) = event.session_id() {
            let mut state = self.state.lock();
            if state.session_id.as_deref() != Some(id) {
                debug!(session_id = %id, "Agent assigned session id");
                state.session_id = Some(id.to_string());
            }
        }

        match event {
            AgentEvent::System {
                permission_mode: Some(reported),
                ..
            } => self.apply_reported_mode(&reported),
            AgentEvent::System { .. } | AgentEvent::User { .. } | AgentEvent::Other => {}
            AgentEvent::Assistant { message, .. } => {
                for block in message.content {
                    match block {
                        ContentBlock::ToolUse { name, .. } => {
                            debug!(tool = %name, "Agent invoked tool");
                            execution.assembler.push_tool(name);
                        }
                        ContentBlock::Text { text } if !text.is_empty() => {
                            execution.emit_text(&text);
                        }
                        ContentBlock::Text { .. } | ContentBlock::Other => {}
                    }
                }
            }
            AgentEvent::Result {
                subtype,
                result,
                errors,
                ..
            } => {
                execution.flush_tools();
                if subtype != SUCCESS_SUBTYPE {
                    let message = if errors.is_empty() {
                        format!("Agent run failed: {}", subtype)
                    } else {
                        errors.join("; ")
                    };
                    return Err(Error::Agent(message));
                }
                if !execution.streamed_text
                    && let Some(text) = result.filter(|t| !t.is_empty())
                {
                    execution.emit(text);
                }
            }
        }
        Ok(())
    }

    /// Follow a mode change the agent reported on its own
    fn apply_reported_mode(&self, reported: &str) {
        let Some(mode) = PermissionMode::from_agent_mode(reported) else {
            warn!(mode = %reported, "Agent reported an unknown mode");
            return;
        };
        let mut state = self.state.lock();
        if let Some(mode) = state.modes.transition(mode) {
            info!(%mode, "Agent reported mode change");
            state.emit(SessionOutput::mode_changed(mode));
        }
    }
}
