use crate::config::CommandPatterns;
use crate::paths;
use crate::state::AllowedPrompt;
use regex::Regex;
use serde_json::Value;
use std::path::Path;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// ActionKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ActionKind {
    ReadOnly,
    /// File edit or write. `path` is relative to the project root when inside it.
    Mutate { path: String },
    Command {
        command: String,
        deploy: bool,
        production: bool,
        /// Changes the working tree outside the bookkeeping paths.
        writes: bool,
    },
    /// Leaving plan mode, carrying the permissions the plan asked for.
    ExitPlanning { grants: Vec<AllowedPrompt> },
    /// Any other tool. `subject` is the tool name split into words plus its
    /// serialized input, which is what the deploy and production patterns see.
    Unknown {
        subject: String,
        deploy: bool,
        production: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub tool: String,
    pub kind: ActionKind,
}

const READ_ONLY_TOOLS: &[&str] = &[
    "Read",
    "Grep",
    "Glob",
    "LS",
    "WebFetch",
    "WebSearch",
    "TodoWrite",
    "Task",
    "BashOutput",
];

const MUTATING_TOOLS: &[&str] = &["Edit", "Write", "MultiEdit", "NotebookEdit"];

impl Action {
    pub fn classify(tool: &str, input: &Value, root: &Path, patterns: &CommandPatterns) -> Self {
        let kind = if READ_ONLY_TOOLS.contains(&tool) {
            ActionKind::ReadOnly
        } else if MUTATING_TOOLS.contains(&tool) {
            let raw = str_field(input, &["file_path", "notebook_path", "path"]).unwrap_or("");
            ActionKind::Mutate {
                path: paths::relative_to_root(root, raw),
            }
        } else if tool == "Bash" {
            let command = str_field(input, &["command"]).unwrap_or("").to_string();
            ActionKind::Command {
                deploy: patterns.is_deploy(&command),
                production: patterns.is_production(&command),
                writes: patterns.is_write(&command) || redirects_outside(&command, root, patterns),
                command,
            }
        } else if tool == "ExitPlanMode" {
            ActionKind::ExitPlanning {
                grants: plan_grants(input),
            }
        } else {
            let subject = unknown_subject(tool, input);
            ActionKind::Unknown {
                deploy: patterns.is_deploy(&subject),
                production: patterns.is_production(&subject),
                subject,
            }
        };
        Self {
            tool: tool.to_string(),
            kind,
        }
    }

    /// Changes the working tree or the outside world. Unknown tools count as mutating.
    pub fn is_mutating(&self) -> bool {
        match &self.kind {
            ActionKind::Mutate { .. } | ActionKind::Unknown { .. } => true,
            ActionKind::Command {
                deploy,
                production,
                writes,
                ..
            } => *deploy || *production || *writes,
            ActionKind::ReadOnly | ActionKind::ExitPlanning { .. } => false,
        }
    }

    pub fn is_deploy(&self) -> bool {
        matches!(
            self.kind,
            ActionKind::Command { deploy: true, .. } | ActionKind::Unknown { deploy: true, .. }
        )
    }

    pub fn is_production(&self) -> bool {
        matches!(
            self.kind,
            ActionKind::Command { production: true, .. }
                | ActionKind::Unknown { production: true, .. }
        )
    }

    /// The text a recorded grant is matched against.
    pub fn grant_subject(&self) -> Option<&str> {
        match &self.kind {
            ActionKind::Command { command, .. } => Some(command),
            ActionKind::Unknown { subject, .. } => Some(subject),
            _ => None,
        }
    }

    pub fn describe(&self) -> String {
        match &self.kind {
            ActionKind::Mutate { path } if !path.is_empty() => format!("{} {}", self.tool, path),
            ActionKind::Command { command, .. } => format!("Bash `{command}`"),
            _ => self.tool.clone(),
        }
    }
}

/// `mcp__vercel__deploy_to_production` becomes `mcp vercel deploy to production`,
/// followed by the compact JSON input, so word-boundary patterns apply.
fn unknown_subject(tool: &str, input: &Value) -> String {
    let words = tool
        .split(|c: char| c == '_' || c == '-' || c == '.' || c == ':')
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    match input {
        Value::Null => words,
        Value::Object(map) if map.is_empty() => words,
        other => format!("{words} {other}"),
    }
}

static REDIRECT_RE: OnceLock<Regex> = OnceLock::new();

fn redirect_re() -> &'static Regex {
    // `>`, `>>`, `2>`, `&>` followed by a file target; `2>&1` has no target.
    REDIRECT_RE.get_or_init(|| Regex::new(r#">>?\s*([^\s;&|<>()]+)"#).unwrap())
}

/// A shell redirection writes to a file outside the bookkeeping paths.
fn redirects_outside(command: &str, root: &Path, patterns: &CommandPatterns) -> bool {
    redirect_re().captures_iter(command).any(|caps| {
        let target = caps[1].trim_matches(|c: char| c == '"' || c == '\'');
        if target.is_empty() || target == "/dev/null" || target.starts_with("/dev/fd/") {
            return false;
        }
        !patterns.is_bookkeeping(&paths::relative_to_root(root, target))
    })
}

fn str_field<'a>(input: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| input.get(*k).and_then(Value::as_str))
}

/// Grants from an `ExitPlanMode` payload. Malformed entries are dropped.
fn plan_grants(input: &Value) -> Vec<AllowedPrompt> {
    let list = input
        .get("allowedPrompts")
        .or_else(|| input.get("allowed_prompts"))
        .and_then(Value::as_array);
    let Some(list) = list else {
        return Vec::new();
    };
    list.iter()
        .filter_map(|v| serde_json::from_value::<AllowedPrompt>(v.clone()).ok())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use serde_json::json;

    fn classify(tool: &str, input: Value) -> Action {
        let patterns = CommandPatterns::from_config(&Config::default());
        Action::classify(tool, &input, Path::new("/work/proj"), &patterns)
    }

    #[test]
    fn edits_are_mutating_with_relative_path() {
        let a = classify("Edit", json!({"file_path": "/work/proj/src/lib.rs"}));
        assert_eq!(
            a.kind,
            ActionKind::Mutate {
                path: "src/lib.rs".to_string()
            }
        );
        assert!(a.is_mutating());
    }

    #[test]
    fn reads_are_not_mutating() {
        assert!(!classify("Read", json!({"file_path": "x"})).is_mutating());
        assert!(!classify("Grep", json!({})).is_mutating());
    }

    #[test]
    fn plain_commands_are_not_mutating() {
        for cmd in ["cargo test", "cargo test 2>&1", "ls > /dev/null", "git diff HEAD"] {
            let a = classify("Bash", json!({ "command": cmd }));
            assert!(!a.is_mutating(), "expected read-only: {cmd}");
            assert!(!a.is_deploy());
        }
    }

    #[test]
    fn shell_writes_are_mutating() {
        for cmd in [
            "echo 'fn main(){}' > src/main.rs && rm -rf tests",
            "cat a >> /work/proj/notes.md",
            "echo x > .claude/../src/lib.rs",
            "sed -i 's/a/b/' src/lib.rs",
            "git checkout -- .",
        ] {
            let a = classify("Bash", json!({ "command": cmd }));
            assert!(a.is_mutating(), "expected mutating: {cmd}");
            assert!(!a.is_deploy());
        }
    }

    #[test]
    fn redirects_into_bookkeeping_are_not_mutating() {
        for cmd in [
            "echo '{}' > .claude/completion-checkpoint.json",
            "git rev-parse HEAD > \"/work/proj/.claude/version.txt\"",
        ] {
            assert!(!classify("Bash", json!({ "command": cmd })).is_mutating(), "{cmd}");
        }
    }

    #[test]
    fn deploy_and_production_commands() {
        let a = classify("Bash", json!({"command": "./deploy.sh --env production"}));
        assert!(a.is_deploy());
        assert!(a.is_production());
        assert!(a.is_mutating());
    }

    #[test]
    fn unknown_tools_are_mutating() {
        let a = classify("mcp__db__execute", json!({}));
        assert_eq!(
            a.kind,
            ActionKind::Unknown {
                subject: "mcp db execute".to_string(),
                deploy: false,
                production: false,
            }
        );
        assert!(a.is_mutating());
    }

    #[test]
    fn unknown_tool_names_and_inputs_see_the_patterns() {
        let a = classify("mcp__vercel__deploy_to_production", json!({}));
        assert!(a.is_deploy());
        assert!(a.is_production());

        let b = classify("mcp__k8s__run", json!({"command": "kubectl apply -f k8s/"}));
        assert!(b.is_deploy());
        assert!(!b.is_production());

        let c = classify("mcp__db__query", json!({"host": "db.prod.internal"}));
        assert!(c.is_production());
        assert!(!c.is_deploy());
        assert_eq!(c.grant_subject(), Some(r#"mcp db query {"host":"db.prod.internal"}"#));
    }

    #[test]
    fn exit_plan_mode_carries_grants() {
        let a = classify(
            "ExitPlanMode",
            json!({
                "plan": "...",
                "allowedPrompts": [
                    {"tool": "Bash", "prompt": "./deploy.sh --env production"},
                    {"bogus": true}
                ]
            }),
        );
        match a.kind {
            ActionKind::ExitPlanning { grants } => {
                assert_eq!(grants, vec![AllowedPrompt::new("Bash", "./deploy.sh --env production")]);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }
}
