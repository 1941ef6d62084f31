//! The stdin document the assistant runtime hands to every hook invocation.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    PreToolUse,
    Stop,
    SubagentStop,
    SessionStart,
    Other,
}

impl HookEvent {
    pub fn parse(name: &str) -> Self {
        match name {
            "PreToolUse" => HookEvent::PreToolUse,
            "Stop" => HookEvent::Stop,
            "SubagentStop" => HookEvent::SubagentStop,
            "SessionStart" => HookEvent::SessionStart,
            _ => HookEvent::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HookEvent::PreToolUse => "PreToolUse",
            HookEvent::Stop => "Stop",
            HookEvent::SubagentStop => "SubagentStop",
            HookEvent::SessionStart => "SessionStart",
            HookEvent::Other => "Other",
        }
    }

    pub fn is_termination(self) -> bool {
        matches!(self, HookEvent::Stop | HookEvent::SubagentStop)
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookInput {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub transcript_path: Option<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub hook_event_name: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: Option<serde_json::Value>,
    /// Set by the runtime when this stop follows one the hook already blocked.
    #[serde(default)]
    pub stop_hook_active: bool,
}

impl HookInput {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(raw)?)
    }

    pub fn event(&self) -> Option<HookEvent> {
        self.hook_event_name.as_deref().map(HookEvent::parse)
    }

    pub fn session(&self) -> &str {
        self.session_id.as_deref().unwrap_or("")
    }
}
