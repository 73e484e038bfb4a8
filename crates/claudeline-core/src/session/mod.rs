//! Session module - one operator, one agent conversation
//!
//! Key components:
//!
//! - `SessionController`: runs prompts, tracks the resume token and mode
//! - `ToolGate`: the authorization callback handed to the agent
//! - `OutputAssembler`: collapses runs of tool calls into summary lines
//! - `SessionOutput`: notifications streamed to the front end
//!
//! # Architecture
//!
//! ```text
//! front end                SessionController                 agent
//!     │                          │                              │
//!     │ execute(prompt, tx) ───▶ │ ── AgentRequest ───────────▶ │
//!     │                          │ ◀── AgentEvent stream ────── │
//!     │ ◀── Chunk ────────────── │                              │
//!     │                          │ ◀── authorize(tool) ──────── │ (ToolGate)
//!     │ ◀── PermissionRequest ── │                              │
//!     │ resolve_permission() ──▶ │ ── Allow / Deny ───────────▶ │
//! ```
//!
//! # Example Usage
//!
//! ```ignore
//! use claudeline_core::agent::ClaudeCli;
//! use claudeline_core::session::{output_channel, PermissionDecision, SessionController, SessionOutput};
//!
//! let controller = Arc::new(SessionController::new(Arc::new(ClaudeCli::new("claude")), "."));
//! let (tx, mut rx) = output_channel();
//!
//! let runner = controller.clone();
//! let run = tokio::spawn(async move { runner.execute("Fix the failing test", tx).await });
//!
//! while let Some(output) = rx.recv().await {
//!     match output {
//!         SessionOutput::Chunk { text } => print!("{}", text),
//!         SessionOutput::PermissionRequest { description, .. } => {
//!             println!("\n{}", description);
//!             controller.resolve_permission(PermissionDecision::allow());
//!         }
//!         _ => {}
//!     }
//! }
//! let result = run.await?;
//! ```

mod approval;
mod assembler;
mod controller;
mod mode;
mod state;
mod types;

pub use approval::{ASK_USER_QUESTION_TOOL, ToolGate};
pub use assembler::{OutputAssembler, format_tool_run};
pub use controller::SessionController;
pub use mode::{ENTER_PLAN_MODE_TOOL, EXIT_PLAN_MODE_TOOL, ModeState};
pub use types::{
    Answers, ExecutionResult, OutputReceiver, OutputSender, PermissionAction, PermissionDecision,
    PermissionMode, QuestionInfo, QuestionOption, SessionOutput, SessionStatus, output_channel,
};
