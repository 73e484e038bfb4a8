//! JSON-lines operator protocol over stdin/stdout
//!
//! Client -> server, one object per line:
//!
//! ```text
//! {"type": "send", "text": "..."}
//! {"type": "cancel"}
//! {"type": "reset"}
//! {"type": "set_mode", "mode": "plan"}
//! {"type": "resolve_permission", "action": "allowSession", "message": "..."}
//! {"type": "resolve_answer", "answers": {"question": "answer"}}
//! {"type": "status"}
//! ```
//!
//! Server -> client: `config` on start, every session notification as is
//! (`chunk`, `permission_request`, `ask_user`, `mode_changed`), `done` when
//! a prompt finishes, plus `status`, `session_status` and `error`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use claudeline_core::formatting::format_work_dir;
use claudeline_core::session::{
    Answers, ExecutionResult, PermissionAction, PermissionDecision, PermissionMode,
    SessionController, SessionOutput, SessionStatus, output_channel,
};

const MESSAGE_TYPES: &[&str] = &[
    "send",
    "cancel",
    "reset",
    "set_mode",
    "resolve_permission",
    "resolve_answer",
    "status",
];

/// Messages from the front end
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Send {
        #[serde(default)]
        text: String,
    },
    Cancel,
    Reset,
    SetMode {
        mode: PermissionMode,
    },
    ResolvePermission {
        action: PermissionAction,
        #[serde(default)]
        message: Option<String>,
    },
    ResolveAnswer {
        #[serde(default)]
        answers: Answers,
    },
    Status,
}

/// Messages the server originates itself
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Config {
        work_dir: String,
        work_dir_display: String,
    },
    Done(ExecutionResult),
    Status {
        message: String,
    },
    SessionStatus(SessionStatus),
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn status(message: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Anything written to stdout
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outgoing {
    Session(SessionOutput),
    Server(ServerMessage),
}

impl From<SessionOutput> for Outgoing {
    fn from(output: SessionOutput) -> Self {
        Self::Session(output)
    }
}

impl From<ServerMessage> for Outgoing {
    fn from(message: ServerMessage) -> Self {
        Self::Server(message)
    }
}

/// Parse one client line, or describe why it was rejected
pub fn parse_message(line: &str) -> Result<ClientMessage, String> {
    let value: Value = serde_json::from_str(line).map_err(|_| "Invalid JSON".to_string())?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    serde_json::from_value(value).map_err(|e| {
        if MESSAGE_TYPES.contains(&kind.as_str()) {
            format!("Invalid {} message: {}", kind, e)
        } else {
            format!("Unknown message type: {}", kind)
        }
    })
}

/// Routes client messages to one session controller
pub struct Server {
    controller: Arc<SessionController>,
    out: mpsc::UnboundedSender<Outgoing>,
}

impl Server {
    pub fn new(controller: Arc<SessionController>, out: mpsc::UnboundedSender<Outgoing>) -> Self {
        Self { controller, out }
    }

    fn send(&self, message: impl Into<Outgoing>) {
        if self.out.send(message.into()).is_err() {
            debug!("Output writer gone, dropping message");
        }
    }

    /// Announce the working directory
    pub fn greet(&self) {
        let work_dir = self.controller.work_dir();
        self.send(ServerMessage::Config {
            work_dir: work_dir.display().to_string(),
            work_dir_display: format_work_dir(work_dir),
        });
    }

    /// Handle one line as read from the transport. Bytes that are not
    /// UTF-8 are replaced, so they surface as `Invalid JSON` at worst.
    pub fn handle_bytes(&self, raw: &[u8], runs: &mut JoinSet<()>) {
        self.handle_line(&String::from_utf8_lossy(raw), runs);
    }

    /// Handle one input line. Prompt runs are spawned onto `runs`.
    pub fn handle_line(&self, line: &str, runs: &mut JoinSet<()>) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        match parse_message(line) {
            Ok(message) => self.handle_message(message, runs),
            Err(reason) => {
                debug!(%line, "Rejected client message");
                self.send(ServerMessage::error(reason));
            }
        }
    }

    pub fn handle_message(&self, message: ClientMessage, runs: &mut JoinSet<()>) {
        match message {
            ClientMessage::Send { text } => {
                let text = text.trim().to_string();
                if text.is_empty() {
                    self.send(ServerMessage::error("Empty command"));
                    return;
                }
                self.send(ServerMessage::status("Running Claude Code..."));
                runs.spawn(run_prompt(
                    self.controller.clone(),
                    text,
                    self.out.clone(),
                ));
            }
            ClientMessage::Cancel => {
                let message = if self.controller.cancel() {
                    "Command cancelled"
                } else {
                    "Nothing to cancel"
                };
                self.send(ServerMessage::status(message));
            }
            ClientMessage::Reset => {
                self.controller.reset();
                self.send(ServerMessage::status(
                    "Session reset, starting fresh conversation",
                ));
            }
            ClientMessage::SetMode { mode } => {
                let changed = self.controller.set_permission_mode(mode);
                // A running execution reports the change on its own output
                if changed && !self.controller.is_running() {
                    self.send(SessionOutput::mode_changed(mode));
                } else if !changed {
                    self.send(ServerMessage::status(format!("Already in {} mode", mode)));
                }
            }
            ClientMessage::ResolvePermission { action, message } => {
                let decision = PermissionDecision { action, message };
                if !self.controller.resolve_permission(decision) {
                    self.send(ServerMessage::error("No pending permission request"));
                }
            }
            ClientMessage::ResolveAnswer { answers } => {
                if !self.controller.resolve_answer(answers) {
                    self.send(ServerMessage::error("No pending question"));
                }
            }
            ClientMessage::Status => {
                self.send(ServerMessage::SessionStatus(self.controller.status()));
            }
        }
    }
}

/// Execute one prompt, relaying its notifications and then its result
async fn run_prompt(
    controller: Arc<SessionController>,
    text: String,
    out: mpsc::UnboundedSender<Outgoing>,
) {
    let (tx, mut rx) = output_channel();
    let relay_out = out.clone();
    let relay = tokio::spawn(async move {
        while let Some(output) = rx.recv().await {
            if relay_out.send(output.into()).is_err() {
                break;
            }
        }
    });

    let result = controller.execute(text, tx).await;
    if let Err(e) = relay.await {
        warn!("Output relay failed: {}", e);
    }
    if out.send(ServerMessage::Done(result).into()).is_err() {
        debug!("Output writer gone, dropping result");
    }
}

/// Serve the protocol on stdin/stdout until stdin closes
pub async fn serve(controller: Arc<SessionController>) -> anyhow::Result<()> {
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outgoing>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(message) = out_rx.recv().await {
            let mut line = serde_json::to_string(&message)?;
            line.push('\n');
            stdout.write_all(line.as_bytes()).await?;
            stdout.flush().await?;
        }
        Ok::<_, anyhow::Error>(())
    });

    let server = Server::new(controller.clone(), out_tx);
    server.greet();
    info!(work_dir = %controller.work_dir().display(), "Serving operator protocol on stdio");

    let mut runs = JoinSet::new();
    let mut input = BufReader::new(tokio::io::stdin());
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if input.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        server.handle_bytes(&buf, &mut runs);
        // Reap finished runs so the set does not grow without bound
        while runs.try_join_next().is_some() {}
    }

    info!("Input closed, shutting down");
    controller.cancel();
    while runs.join_next().await.is_some() {}
    drop(server);
    writer.await??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use claudeline_core::agent::{AgentCapability, AgentEvent, AgentRequest, AgentStream, ContentBlock};
    use claudeline_core::error::Result;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    /// Agent that answers every prompt with the same two events
    struct EchoAgent;

    #[async_trait]
    impl AgentCapability for EchoAgent {
        async fn query(&self, request: AgentRequest) -> Result<AgentStream> {
            let events = vec![
                Ok(AgentEvent::init("echo-session")),
                Ok(AgentEvent::assistant(vec![ContentBlock::text(request.prompt)])),
                Ok(AgentEvent::success(None)),
            ];
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    fn server() -> (Server, mpsc::UnboundedReceiver<Outgoing>) {
        let controller = Arc::new(SessionController::new(
            Arc::new(EchoAgent),
            std::env::temp_dir(),
        ));
        let (tx, rx) = mpsc::unbounded_channel();
        (Server::new(controller, tx), rx)
    }

    fn to_json(message: &Outgoing) -> Value {
        serde_json::to_value(message).unwrap()
    }

    #[test]
    fn test_parse_messages() {
        assert_eq!(
            parse_message(r#"{"type":"send","text":"hi"}"#),
            Ok(ClientMessage::Send { text: "hi".into() })
        );
        assert_eq!(
            parse_message(r#"{"type":"set_mode","mode":"read_only_plan"}"#),
            Ok(ClientMessage::SetMode {
                mode: PermissionMode::Plan
            })
        );
        assert_eq!(
            parse_message(r#"{"type":"resolve_permission","action":"deny","message":"no"}"#),
            Ok(ClientMessage::ResolvePermission {
                action: PermissionAction::Deny,
                message: Some("no".into()),
            })
        );
        assert_eq!(parse_message("not json"), Err("Invalid JSON".into()));
        assert_eq!(
            parse_message(r#"{"type":"audio"}"#),
            Err("Unknown message type: audio".into())
        );
        assert!(
            parse_message(r#"{"type":"set_mode","mode":"turbo"}"#)
                .unwrap_err()
                .starts_with("Invalid set_mode message")
        );
    }

    #[test]
    fn test_outgoing_wire_format() {
        let done = Outgoing::from(ServerMessage::Done(ExecutionResult::failure("", "Cancelled")));
        assert_eq!(
            to_json(&done),
            json!({"type": "done", "success": false, "output": "", "error": "Cancelled"})
        );

        let chunk = Outgoing::from(SessionOutput::chunk("hi"));
        assert_eq!(to_json(&chunk), json!({"type": "chunk", "text": "hi"}));
    }

    #[tokio::test]
    async fn test_greeting_and_simple_commands() {
        let (server, mut rx) = server();
        let mut runs = JoinSet::new();

        server.greet();
        let config = to_json(&rx.recv().await.unwrap());
        assert_eq!(config["type"], "config");
        assert!(config["work_dir_display"].is_string());

        server.handle_line("{oops", &mut runs);
        assert_eq!(
            rx.recv().await.unwrap(),
            Outgoing::from(ServerMessage::error("Invalid JSON"))
        );

        server.handle_line(r#"{"type":"send","text":"   "}"#, &mut runs);
        assert_eq!(
            rx.recv().await.unwrap(),
            Outgoing::from(ServerMessage::error("Empty command"))
        );

        server.handle_line(r#"{"type":"cancel"}"#, &mut runs);
        assert_eq!(
            rx.recv().await.unwrap(),
            Outgoing::from(ServerMessage::status("Nothing to cancel"))
        );

        server.handle_line(r#"{"type":"resolve_permission","action":"allow"}"#, &mut runs);
        assert_eq!(
            rx.recv().await.unwrap(),
            Outgoing::from(ServerMessage::error("No pending permission request"))
        );

        server.handle_line("", &mut runs);
        assert!(rx.try_recv().is_err());
        assert!(runs.is_empty());
    }

    #[tokio::test]
    async fn test_non_utf8_lines_do_not_stop_the_server() {
        let (server, mut rx) = server();
        let mut runs = JoinSet::new();

        server.handle_bytes(b"\xff\xfe garbage\n", &mut runs);
        assert_eq!(
            rx.recv().await.unwrap(),
            Outgoing::from(ServerMessage::error("Invalid JSON"))
        );

        server.handle_bytes(
            b"{\"type\":\"resolve_permission\",\"action\":\"deny\",\"message\":\"caf\xe9\"}\n",
            &mut runs,
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            Outgoing::from(ServerMessage::error("No pending permission request"))
        );
        assert!(runs.is_empty());
    }

    #[tokio::test]
    async fn test_set_mode_while_idle() {
        let (server, mut rx) = server();
        let mut runs = JoinSet::new();

        server.handle_line(r#"{"type":"set_mode","mode":"plan"}"#, &mut runs);
        assert_eq!(
            rx.recv().await.unwrap(),
            Outgoing::from(SessionOutput::mode_changed(PermissionMode::Plan))
        );

        server.handle_line(r#"{"type":"set_mode","mode":"plan"}"#, &mut runs);
        assert_eq!(
            rx.recv().await.unwrap(),
            Outgoing::from(ServerMessage::status("Already in plan mode"))
        );
    }

    #[tokio::test]
    async fn test_send_relays_chunks_then_done() {
        let (server, mut rx) = server();
        let mut runs = JoinSet::new();

        server.handle_line(r#"{"type":"send","text":"hello there"}"#, &mut runs);
        timeout(Duration::from_secs(5), async {
            while runs.join_next().await.is_some() {}
        })
        .await
        .unwrap();

        let mut seen = Vec::new();
        while let Ok(message) = rx.try_recv() {
            seen.push(to_json(&message));
        }
        let kinds: Vec<&str> = seen.iter().map(|m| m["type"].as_str().unwrap()).collect();
        assert_eq!(kinds, vec!["status", "chunk", "done"]);
        assert_eq!(seen[1]["text"], "hello there");
        assert_eq!(seen[2]["success"], true);

        server.handle_line(r#"{"type":"status"}"#, &mut runs);
        let status = to_json(&rx.recv().await.unwrap());
        assert_eq!(status["type"], "session_status");
        assert_eq!(status["session_id"], "echo-session");
        assert_eq!(status["history_len"], 1);
        assert_eq!(status["mode"], "supervised");
    }
}
