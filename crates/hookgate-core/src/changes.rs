use crate::checkpoint::{JOB_COMPLETE, VERSION_SUFFIX};
use crate::config::Config;
use crate::paths;
use crate::workspace::Diff;
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Checklist items
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChecklistItem {
    /// `base` for items every stop gets, otherwise the id of the rule that fired.
    pub source: String,
    pub instruction: String,
}

impl ChecklistItem {
    fn base(instruction: impl Into<String>) -> Self {
        Self {
            source: "base".to_string(),
            instruction: instruction.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// ChangeRule
// ---------------------------------------------------------------------------

/// A fn-pointer rule: when `matches` holds for the diff, `instruction` joins the checklist.
pub struct ChangeRule {
    pub id: &'static str,
    pub matches: fn(&Diff) -> bool,
    pub instruction: &'static str,
}

macro_rules! re {
    ($pat:expr) => {{
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| Regex::new($pat).unwrap())
    }};
}

fn any_path(diff: &Diff, re: &Regex) -> bool {
    diff.paths.iter().any(|p| re.is_match(p))
}

/// Added or removed lines, without the `+++`/`---` file headers.
fn changed_lines(diff: &Diff) -> impl Iterator<Item = &str> {
    diff.text
        .lines()
        .filter(|l| (l.starts_with('+') && !l.starts_with("+++")) || (l.starts_with('-') && !l.starts_with("---")))
}

fn any_line(diff: &Diff, re: &Regex) -> bool {
    changed_lines(diff).any(|l| re.is_match(l))
}

fn touches_env(diff: &Diff) -> bool {
    any_path(diff, re!(r"(^|/)\.env($|\.)"))
        || any_line(
            diff,
            re!(r"process\.env|std::env::var|env::var\(|os\.environ|getenv\(|import\.meta\.env|ENV\["),
        )
}

fn touches_auth(diff: &Diff) -> bool {
    any_path(diff, re!(r"(?i)(^|/|_|-)(auth|login|oauth|jwt|session|permissions?)"))
        || any_line(
            diff,
            re!(r"(?i)(authenticat|authoriz|\bjwt\b|\boauth|bearer\s|password|csrf)"),
        )
}

fn touches_serialization(diff: &Diff) -> bool {
    any_path(diff, re!(r"(?i)\.(proto|graphql|avsc)$|(^|/)(schemas?|openapi)[^/]*$"))
        || any_line(
            diff,
            re!(r"(Serialize|Deserialize)\b|JSON\.(parse|stringify)|json\.(loads|dumps)|serde_json|@JsonProperty"),
        )
}

fn touches_migrations(diff: &Diff) -> bool {
    any_path(diff, re!(r"(?i)(^|/)migrations?/|\.sql$"))
        || any_line(diff, re!(r"(?i)\b(create|alter|drop)\s+(table|index|column)\b"))
}

fn touches_deploy_config(diff: &Diff) -> bool {
    any_path(
        diff,
        re!(r"(^|/)(\.github/workflows/|\.gitlab-ci|Dockerfile|docker-compose|k8s/|helm/|terraform/|fly\.toml|vercel\.json)"),
    )
}

fn touches_dependencies(diff: &Diff) -> bool {
    any_path(
        diff,
        re!(r"(^|/)(Cargo\.(toml|lock)|package(-lock)?\.json|pnpm-lock\.yaml|yarn\.lock|requirements[^/]*\.txt|pyproject\.toml|go\.(mod|sum)|Gemfile(\.lock)?)$"),
    )
}

pub fn default_change_rules() -> Vec<ChangeRule> {
    vec![
        ChangeRule {
            id: "env_vars",
            matches: touches_env,
            instruction: "Environment variables changed: confirm every new variable is set in each \
                          environment that runs this code and is listed in the example env file.",
        },
        ChangeRule {
            id: "auth",
            matches: touches_auth,
            instruction: "Authentication code changed: exercise login, logout and one unauthorized \
                          request end to end, and confirm no route lost its auth check.",
        },
        ChangeRule {
            id: "serialization",
            matches: touches_serialization,
            instruction: "A serialization boundary changed: round-trip a real payload across it and \
                          confirm existing consumers still parse the new shape.",
        },
        ChangeRule {
            id: "migration",
            matches: touches_migrations,
            instruction: "Database migration touched: run it forward against a copy of real data and \
                          confirm it rolls back, or record why it cannot.",
        },
        ChangeRule {
            id: "deploy_config",
            matches: touches_deploy_config,
            instruction: "Deployment configuration changed: run the pipeline or a dry run and confirm \
                          the service starts with it.",
        },
        ChangeRule {
            id: "dependencies",
            matches: touches_dependencies,
            instruction: "Dependency manifests changed: do a clean install and run the full test suite.",
        },
    ]
}

/// Every rule is checked on its own; the result does not depend on rule order.
pub fn classify_changes(rules: &[ChangeRule], diff: &Diff) -> Vec<ChecklistItem> {
    rules
        .iter()
        .filter(|r| (r.matches)(diff))
        .map(|r| ChecklistItem {
            source: r.id.to_string(),
            instruction: r.instruction.to_string(),
        })
        .collect()
}

/// Items every first stop attempt lists, before any change-specific ones.
pub fn base_checklist(config: &Config, version: &str) -> Vec<ChecklistItem> {
    let mut items = vec![ChecklistItem::base(format!(
        "Write {}/{} with self_report claims, each tagged `<claim>{VERSION_SUFFIX}: \"{version}\"`.",
        paths::CONTROL_DIR,
        paths::CHECKPOINT_FILE
    ))];
    for claim in &config.required_claims {
        items.push(ChecklistItem::base(format!(
            "Verify and report '{claim}' (required)."
        )));
    }
    for claim in &config.evidence_required {
        items.push(ChecklistItem::base(format!(
            "If you claim '{claim}', set evidence.{claim} to an artifact path or URL."
        )));
    }
    items.push(ChecklistItem::base(format!(
        "Set {JOB_COMPLETE}: true only when the job is done. List leftovers in \
         reflection.what_remains, one per line, marked [low], advisory:, high: etc."
    )));
    items
}

/// The full first-stop checklist for `diff`.
pub fn checklist(config: &Config, version: &str, diff: &Diff) -> Vec<ChecklistItem> {
    let mut items = base_checklist(config, version);
    items.extend(classify_changes(&default_change_rules(), diff));
    items
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
