//! Output stream assembly
//!
//! Consecutive tool invocations with no text between them collapse into a
//! single summary line, so the operator sees `[Tools: Read, Grep, Edit]`
//! instead of one line per call.

/// Format one run of consecutive tool names. Empty runs produce nothing.
pub fn format_tool_run(names: &[String]) -> Option<String> {
    match names {
        [] => None,
        [single] => Some(format!("\n[Using tool: {}]\n", single)),
        many => Some(format!("\n[Tools: {}]\n", many.join(", "))),
    }
}

/// Buffers tool names until text arrives or the stream ends
#[derive(Debug, Default)]
pub struct OutputAssembler {
    pending_tools: Vec<String>,
}

impl OutputAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a tool invocation; nothing is emitted yet
    pub fn push_tool(&mut self, name: impl Into<String>) {
        self.pending_tools.push(name.into());
    }

    /// Take the queued run as one fragment
    pub fn flush(&mut self) -> Option<String> {
        let fragment = format_tool_run(&self.pending_tools);
        self.pending_tools.clear();
        fragment
    }

    /// Fragments to emit for a text span: the queued run first, then the text
    pub fn push_text(&mut self, text: &str) -> Vec<String> {
        let mut fragments = Vec::with_capacity(2);
        fragments.extend(self.flush());
        fragments.push(text.to_string());
        fragments
    }
}
