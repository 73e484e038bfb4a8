//! Operating mode state machine
//!
//! Any mode may move to any other. What differs is the origin: operator
//! transitions also revoke session approvals, in-band ones (plan-mode tools,
//! status pushes from the agent) leave them alone. A transition to the
//! current mode is a no-op and produces no notification.

use std::collections::HashSet;

use super::types::PermissionMode;

/// Tool the agent calls to leave read-only planning
pub const EXIT_PLAN_MODE_TOOL: &str = "ExitPlanMode";

/// Tool the agent calls to enter read-only planning
pub const ENTER_PLAN_MODE_TOOL: &str = "EnterPlanMode";

/// Current mode plus the approvals granted under it
#[derive(Debug, Clone, Default)]
pub struct ModeState {
    mode: PermissionMode,
    /// Tools auto-approved for the rest of the session
    allow_list: HashSet<String>,
}

impl ModeState {
    pub fn new(mode: PermissionMode) -> Self {
        Self {
            mode,
            allow_list: HashSet::new(),
        }
    }

    pub fn mode(&self) -> PermissionMode {
        self.mode
    }

    /// Operator-initiated transition. Always clears the allow-list.
    ///
    /// Returns the new mode if it changed.
    pub fn force(&mut self, mode: PermissionMode) -> Option<PermissionMode> {
        self.allow_list.clear();
        self.transition(mode)
    }

    /// In-band transition. The allow-list is kept.
    ///
    /// Returns the new mode if it changed.
    pub fn transition(&mut self, mode: PermissionMode) -> Option<PermissionMode> {
        if self.mode == mode {
            return None;
        }
        self.mode = mode;
        Some(mode)
    }

    /// Apply one of the plan-mode control tools.
    ///
    /// Returns `None` for any other tool name; `Some(change)` for the two
    /// control tools, where `change` is the new mode if it changed.
    pub fn apply_plan_signal(&mut self, tool_name: &str) -> Option<Option<PermissionMode>> {
        match tool_name {
            EXIT_PLAN_MODE_TOOL => Some(if self.mode == PermissionMode::Plan {
                self.transition(PermissionMode::Supervised)
            } else {
                None
            }),
            ENTER_PLAN_MODE_TOOL => Some(self.transition(PermissionMode::Plan)),
            _ => None,
        }
    }

    pub fn is_allowed(&self, tool_name: &str) -> bool {
        self.allow_list.contains(tool_name)
    }

    pub fn allow_for_session(&mut self, tool_name: impl Into<String>) {
        self.allow_list.insert(tool_name.into());
    }

    /// Sorted copy of the allow-list
    pub fn allowed_tools(&self) -> Vec<String> {
        let mut tools: Vec<String> = self.allow_list.iter().cloned().collect();
        tools.sort();
        tools
    }

    /// Back to supervised with no approvals
    pub fn reset(&mut self) {
        self.mode = PermissionMode::Supervised;
        self.allow_list.clear();
    }
}
