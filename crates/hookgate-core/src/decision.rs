use serde::Serialize;
use std::fmt;

/// Exit status telling the runtime to proceed.
pub const EXIT_ALLOW: i32 = 0;
/// Exit status telling the runtime to block; the reason goes to stderr.
pub const EXIT_DENY: i32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "reason", rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny(String),
}

impl Decision {
    pub fn deny(reason: impl Into<String>) -> Self {
        Decision::Deny(reason.into())
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Decision::Allow => None,
            Decision::Deny(r) => Some(r),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Decision::Allow => EXIT_ALLOW,
            Decision::Deny(_) => EXIT_DENY,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Allow => f.write_str("allow"),
            Decision::Deny(r) => write!(f, "deny: {r}"),
        }
    }
}

// ---------------------------------------------------------------------------
// PermissionOutput
// ---------------------------------------------------------------------------

/// Stdout document granting a tool call outright, so the runtime does not
/// prompt during an autonomous run.
#[derive(Debug, Clone, Serialize)]
pub struct PermissionOutput {
    #[serde(rename = "hookSpecificOutput")]
    pub hook_specific_output: PermissionDecision,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionDecision {
    pub hook_event_name: &'static str,
    pub permission_decision: &'static str,
    pub permission_decision_reason: String,
}

impl PermissionOutput {
    pub fn approve(workflow: &str) -> Self {
        Self {
            hook_specific_output: PermissionDecision {
                hook_event_name: "PreToolUse",
                permission_decision: "allow",
                permission_decision_reason: format!("auto-approved during workflow '{workflow}'"),
            },
        }
    }
}
