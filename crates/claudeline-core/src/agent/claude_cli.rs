//! Claude Code CLI driver
//!
//! Runs `claude -p` in stream-json mode: one prompt line goes in on stdin,
//! events come back one JSON object per line on stdout. When an authorizer
//! is installed the CLI routes every permission check back to us as a
//! `control_request`, answered in-line with a `control_response`.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    AgentCapability, AgentEvent, AgentRequest, AgentStream, ContentBlock, PermissionResult,
    ToolAuthorizer,
};
use crate::config::AgentConfig;
use crate::error::{Error, Result};
use crate::formatting::truncate_str;

/// Fallback install locations, tried when the command is not on `PATH`
pub const DEFAULT_CANDIDATES: &[&str] = &[
    "~/.npm-global/bin/claude",
    "~/.local/bin/claude",
    "/usr/local/bin/claude",
];

type EventSender = mpsc::UnboundedSender<Result<AgentEvent>>;

/// Agent capability backed by the `claude` executable
#[derive(Debug, Clone)]
pub struct ClaudeCli {
    command: String,
    candidates: Vec<String>,
}

impl ClaudeCli {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            candidates: DEFAULT_CANDIDATES.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            command: config.command.clone(),
            candidates: config.candidates.clone(),
        }
    }

    /// Replace the fallback install locations
    pub fn with_candidates(mut self, candidates: Vec<String>) -> Self {
        self.candidates = candidates;
        self
    }

    /// Resolve the program to run: `PATH`, then an existing path, then the
    /// fallback locations, else the configured name as is.
    pub fn resolve_program(&self) -> PathBuf {
        if let Ok(path) = which::which(&self.command) {
            return path;
        }
        let direct = expand_home(&self.command);
        if direct.is_file() {
            return direct;
        }
        for candidate in &self.candidates {
            let path = expand_home(candidate);
            if path.is_file() {
                debug!(path = %path.display(), "Using fallback Claude Code location");
                return path;
            }
        }
        PathBuf::from(&self.command)
    }

    /// Whether the resolved program exists
    pub fn is_available(&self) -> bool {
        let program = self.resolve_program();
        program.is_file() || which::which(&program).is_ok()
    }

    /// Command-line arguments for one run
    pub fn build_args(request: &AgentRequest) -> Vec<String> {
        let mut args: Vec<String> = [
            "-p",
            "--verbose",
            "--output-format",
            "stream-json",
            "--input-format",
            "stream-json",
            "--permission-mode",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push(request.permission_mode.clone());

        if let Some(session_id) = &request.resume {
            args.push("--resume".to_string());
            args.push(session_id.clone());
        }
        if request.authorizer.is_some() {
            args.push("--permission-prompt-tool".to_string());
            args.push("stdio".to_string());
        }
        args
    }

    fn spawn(&self, request: &AgentRequest) -> Result<Child> {
        if !request.working_directory.is_dir() {
            return Err(Error::Agent(format!(
                "Working directory does not exist: {}",
                request.working_directory.display()
            )));
        }

        let program = self.resolve_program();
        let args = Self::build_args(request);
        debug!(program = %program.display(), ?args, "Spawning Claude Code");

        Command::new(&program)
            .args(&args)
            .current_dir(&request.working_directory)
            .env("TERM", "dumb")
            .env("NO_COLOR", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    Error::AgentNotFound(program.display().to_string())
                }
                _ => Error::Io(e),
            })
    }
}

impl Default for ClaudeCli {
    fn default() -> Self {
        Self::new("claude")
    }
}

#[async_trait]
impl AgentCapability for ClaudeCli {
    async fn query(&self, request: AgentRequest) -> Result<AgentStream> {
        let mut child = self.spawn(&request)?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Protocol("Failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Protocol("Failed to capture stdout".into()))?;

        write_json_line(&mut stdin, &prompt_message(&request.prompt)).await?;
        info!(pid = ?child.id(), "Claude Code started");

        let (tx, rx) = mpsc::unbounded_channel();
        let run = CliRun {
            child,
            stdin: Some(stdin),
            authorizer: request.authorizer,
            cancel: request.cancel,
            tx,
        };
        tokio::spawn(run.pump(stdout));

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}

/// One line of CLI output, classified
#[derive(Debug, PartialEq)]
pub(crate) enum CliLine {
    Blank,
    /// Plain text the CLI printed outside the protocol
    Text(String),
    Event(AgentEvent),
    Control {
        request_id: String,
        request: ControlRequest,
    },
    /// Valid JSON we could not make sense of
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub(crate) enum ControlRequest {
    CanUseTool {
        tool_name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Deserialize)]
struct ControlEnvelope {
    request_id: String,
    request: ControlRequest,
}

/// One raw output line as text; invalid UTF-8 becomes U+FFFD
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

pub(crate) fn parse_line(line: &str) -> CliLine {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return CliLine::Blank;
    }
    let value: Value = match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(_) => return CliLine::Text(format!("{}\n", line)),
    };

    if value.get("type").and_then(Value::as_str) == Some("control_request") {
        return match serde_json::from_value::<ControlEnvelope>(value) {
            Ok(envelope) => CliLine::Control {
                request_id: envelope.request_id,
                request: envelope.request,
            },
            Err(e) => {
                warn!("Malformed control request: {}", e);
                CliLine::Unrecognized
            }
        };
    }

    match serde_json::from_value(value) {
        Ok(event) => CliLine::Event(event),
        Err(e) => {
            warn!(line = %truncate_str(trimmed, 200), "Unrecognized agent output: {}", e);
            CliLine::Unrecognized
        }
    }
}

fn prompt_message(prompt: &str) -> Value {
    json!({
        "type": "user",
        "message": {"role": "user", "content": prompt},
    })
}

fn control_success(request_id: &str, result: &PermissionResult) -> Result<Value> {
    Ok(json!({
        "type": "control_response",
        "response": {
            "subtype": "success",
            "request_id": request_id,
            "response": serde_json::to_value(result)?,
        },
    }))
}

fn control_error(request_id: &str, message: &str) -> Value {
    json!({
        "type": "control_response",
        "response": {
            "subtype": "error",
            "request_id": request_id,
            "error": message,
        },
    })
}

async fn write_json_line(stdin: &mut ChildStdin, value: &Value) -> Result<()> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await?;
    Ok(())
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

/// Background half of a run: owns the child and feeds the event channel
struct CliRun {
    child: Child,
    /// Dropped once the result arrives so the CLI exits
    stdin: Option<ChildStdin>,
    authorizer: Option<Arc<dyn ToolAuthorizer>>,
    cancel: CancellationToken,
    tx: EventSender,
}

impl CliRun {
    async fn pump(mut self, stdout: ChildStdout) {
        let stderr = self.child.stderr.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut bytes = Vec::new();
                if let Err(e) = pipe.read_to_end(&mut bytes).await {
                    debug!("Failed to read Claude Code stderr: {}", e);
                }
                String::from_utf8_lossy(&bytes).into_owned()
            })
        });

        match self.read_events(stdout).await {
            Ok(saw_result) => self.finish(saw_result, stderr).await,
            Err(e) => {
                if let Err(kill_err) = self.child.kill().await {
                    debug!("Failed to kill Claude Code: {}", kill_err);
                }
                if e.is_cancelled() {
                    info!("Claude Code run cancelled");
                }
                let _ = self.tx.send(Err(e));
            }
        }
    }

    /// Forward events until stdout closes. Returns whether a result was seen.
    async fn read_events(&mut self, stdout: ChildStdout) -> Result<bool> {
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        let mut saw_result = false;

        loop {
            buf.clear();
            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                read = reader.read_until(b'\n', &mut buf) => read?,
            };
            if read == 0 {
                return Ok(saw_result);
            }

            match parse_line(&decode_line(&buf)) {
                CliLine::Blank | CliLine::Unrecognized => {}
                CliLine::Text(text) => {
                    self.forward(AgentEvent::assistant(vec![ContentBlock::text(text)]))?
                }
                CliLine::Event(event) => {
                    if matches!(event, AgentEvent::Result { .. }) {
                        saw_result = true;
                        self.stdin = None;
                    }
                    self.forward(event)?;
                }
                CliLine::Control {
                    request_id,
                    request,
                } => self.answer_control(&request_id, request).await?,
            }
        }
    }

    fn forward(&self, event: AgentEvent) -> Result<()> {
        self.tx
            .send(Ok(event))
            .map_err(|_| Error::Protocol("Event receiver dropped".into()))
    }

    async fn answer_control(&mut self, request_id: &str, request: ControlRequest) -> Result<()> {
        let response = match (request, &self.authorizer) {
            (ControlRequest::CanUseTool { tool_name, input }, Some(authorizer)) => {
                debug!(tool = %tool_name, %request_id, "Permission check from Claude Code");
                let result = authorizer
                    .authorize(&tool_name, input, self.cancel.clone())
                    .await?;
                control_success(request_id, &result)?
            }
            (ControlRequest::CanUseTool { tool_name, .. }, None) => {
                warn!(tool = %tool_name, "Permission check without an authorizer");
                control_error(request_id, "No permission handler installed")
            }
            (ControlRequest::Unsupported, _) => {
                debug!(%request_id, "Unsupported control request");
                control_error(request_id, "Unsupported control request")
            }
        };

        match self.stdin.as_mut() {
            Some(stdin) => write_json_line(stdin, &response).await,
            None => {
                debug!(%request_id, "stdin already closed, dropping control response");
                Ok(())
            }
        }
    }

    async fn finish(mut self, saw_result: bool, stderr: Option<tokio::task::JoinHandle<String>>) {
        self.stdin = None;
        let status = match self.child.wait().await {
            Ok(status) => status,
            Err(e) => {
                let _ = self.tx.send(Err(e.into()));
                return;
            }
        };
        debug!(%status, saw_result, "Claude Code exited");
        if status.success() || saw_result {
            return;
        }

        let stderr = match stderr {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        let message = match stderr.trim() {
            "" => match status.code() {
                Some(code) => format!("Claude Code exited with code {}", code),
                None => "Claude Code was terminated by a signal".to_string(),
            },
            text => text.to_string(),
        };
        warn!("Claude Code failed: {}", message);
        let _ = self.tx.send(Err(Error::Agent(message)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AllowAll;

    #[async_trait]
    impl ToolAuthorizer for AllowAll {
        async fn authorize(
            &self,
            _tool_name: &str,
            input: Value,
            _cancel: CancellationToken,
        ) -> Result<PermissionResult> {
            Ok(PermissionResult::allow(input))
        }
    }

    fn request(mode: &str) -> AgentRequest {
        AgentRequest {
            prompt: "hello".into(),
            working_directory: PathBuf::from("."),
            permission_mode: mode.into(),
            resume: None,
            cancel: CancellationToken::new(),
            authorizer: None,
        }
    }

    #[test]
    fn test_build_args_minimal() {
        let args = ClaudeCli::build_args(&request("bypassPermissions"));
        assert_eq!(
            args,
            vec![
                "-p",
                "--verbose",
                "--output-format",
                "stream-json",
                "--input-format",
                "stream-json",
                "--permission-mode",
                "bypassPermissions",
            ]
        );
    }

    #[test]
    fn test_build_args_resume_and_authorizer() {
        let mut req = request("default");
        req.resume = Some("abc".into());
        req.authorizer = Some(Arc::new(AllowAll));

        let args = ClaudeCli::build_args(&req);
        let joined = args.join(" ");
        assert!(joined.contains("--resume abc"));
        assert!(joined.ends_with("--permission-prompt-tool stdio"));
    }

    #[test]
    fn test_parse_plain_text_line() {
        assert_eq!(parse_line("   "), CliLine::Blank);
        assert_eq!(
            parse_line("Loading..."),
            CliLine::Text("Loading...\n".into())
        );
    }

    #[test]
    fn test_decode_line_replaces_invalid_utf8() {
        assert_eq!(decode_line(b"caf\xe9 noise\n"), "caf\u{fffd} noise");
        assert_eq!(decode_line(b"plain\r\n"), "plain");
        assert_eq!(decode_line(b"no newline"), "no newline");
    }

    #[test]
    fn test_parse_event_line() {
        let line = r#"{"type":"system","subtype":"init","session_id":"s-1","permissionMode":"default"}"#;
        match parse_line(line) {
            CliLine::Event(event) => assert_eq!(event.session_id(), Some("s-1")),
            other => panic!("Expected event, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_control_request() {
        let line = r#"{"type":"control_request","request_id":"r1","request":{"subtype":"can_use_tool","tool_name":"Bash","input":{"command":"ls"}}}"#;
        assert_eq!(
            parse_line(line),
            CliLine::Control {
                request_id: "r1".into(),
                request: ControlRequest::CanUseTool {
                    tool_name: "Bash".into(),
                    input: json!({"command": "ls"}),
                },
            }
        );

        let line = r#"{"type":"control_request","request_id":"r2","request":{"subtype":"interrupt"}}"#;
        assert!(matches!(
            parse_line(line),
            CliLine::Control {
                request: ControlRequest::Unsupported,
                ..
            }
        ));
    }

    #[test]
    fn test_control_success_wire_format() {
        let result = PermissionResult::allow(json!({"command": "ls"}));
        let response = control_success("r1", &result).unwrap();
        assert_eq!(
            response,
            json!({
                "type": "control_response",
                "response": {
                    "subtype": "success",
                    "request_id": "r1",
                    "response": {"behavior": "allow", "updatedInput": {"command": "ls"}},
                },
            })
        );

        let denied = control_success("r2", &PermissionResult::deny("User denied")).unwrap();
        assert_eq!(denied["response"]["response"]["message"], "User denied");
        assert_eq!(control_error("r3", "nope")["response"]["subtype"], "error");
    }

    #[test]
    fn test_prompt_message() {
        assert_eq!(
            prompt_message("fix it"),
            json!({"type": "user", "message": {"role": "user", "content": "fix it"}})
        );
    }

    #[test]
    fn test_resolve_program_uses_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("claude");
        std::fs::write(&fake, "").unwrap();

        let cli = ClaudeCli::new("definitely-not-a-real-claude-binary")
            .with_candidates(vec![fake.display().to_string()]);
        assert_eq!(cli.resolve_program(), fake);

        let cli = ClaudeCli::new("definitely-not-a-real-claude-binary").with_candidates(vec![]);
        assert_eq!(
            cli.resolve_program(),
            PathBuf::from("definitely-not-a-real-claude-binary")
        );
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/usr/bin/claude"), PathBuf::from("/usr/bin/claude"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/.local/bin/claude"), home.join(".local/bin/claude"));
        }
    }
}
