use crate::error::{GateError, Result};
use crate::paths;
use chrono::Duration;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Hours after `started_at` when a workflow's state stops counting as active.
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u32,
    /// Emit an explicit permission grant for allowed tool calls while a workflow runs.
    #[serde(default = "default_true")]
    pub auto_approve: bool,
    /// Path prefixes (relative to the project root) the gate never blocks or hashes.
    #[serde(default = "default_bookkeeping_paths")]
    pub bookkeeping_paths: Vec<String>,
    /// Claims that must be true (after cascade and evidence checks) before a stop is allowed.
    #[serde(default = "default_required_claims")]
    pub required_claims: Vec<String>,
    /// Claims that are only believed with a corroborating evidence reference.
    #[serde(default = "default_evidence_required")]
    pub evidence_required: Vec<String>,
    /// Treat claims without a `<claim>_at_version` tag as stale.
    #[serde(default)]
    pub require_version_tags: bool,
    /// Remove the workflow's state, checkpoint and snapshot once a stop is allowed.
    #[serde(default = "default_true")]
    pub cleanup_on_complete: bool,
    #[serde(default = "default_deploy_patterns")]
    pub deploy_patterns: Vec<String>,
    #[serde(default = "default_production_patterns")]
    pub production_patterns: Vec<String>,
    /// Shell commands that change the working tree. Output redirection is
    /// detected separately and only counts when it lands outside the bookkeeping paths.
    #[serde(default = "default_write_patterns")]
    pub write_patterns: Vec<String>,
}

fn default_version() -> u32 {
    1
}

fn default_ttl_hours() -> u32 {
    4
}

fn default_true() -> bool {
    true
}

fn default_bookkeeping_paths() -> Vec<String> {
    vec![format!("{}/", paths::CONTROL_DIR)]
}

fn default_required_claims() -> Vec<String> {
    vec!["linters_pass".to_string()]
}

fn default_evidence_required() -> Vec<String> {
    vec!["deployed".to_string(), "tests_pass".to_string()]
}

fn default_deploy_patterns() -> Vec<String> {
    [
        r"(?i)(^|[\s;&|/])(deploy|release)(\.sh)?($|[\s;&|])",
        r"(?i)\b(cargo|npm|pnpm|yarn)\s+publish\b",
        r"(?i)\bgh\s+release\s+create\b",
        r"(?i)\bgit\s+push\b.*--tags",
        r"(?i)\bkubectl\s+(apply|rollout|set|delete)\b",
        r"(?i)\bterraform\s+apply\b",
        r"(?i)\bhelm\s+(install|upgrade)\b",
        r"(?i)\bvercel\b.*--prod\b",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_production_patterns() -> Vec<String> {
    vec![r"(?i)\bprod(uction)?\b".to_string(), r"(?i)\bprd\b".to_string()]
}

fn default_write_patterns() -> Vec<String> {
    [
        r"(?i)\bsed\s+(-[a-z]*i|--in-place)",
        r"(?i)\bperl\s+-[a-z]*i",
        r"(^|[\s;&|(])(tee|rm|rmdir|mv|cp|touch|mkdir|ln|chmod|chown|truncate|dd|patch|install)(\s|$)",
        r"(?i)\bgit\s+(add|am|apply|checkout|cherry-pick|clean|commit|merge|mv|pull|push|rebase|reset|restore|revert|rm|stash|switch|tag)\b",
        r"(?i)\b(npm|pnpm|yarn|bun)\s+(add|ci|i|install|remove|uninstall|update|upgrade)\b",
        r"(?i)\bcargo\s+(add|fix|fmt|install|remove|uninstall|update)\b",
        r"(?i)\bpip3?\s+(install|uninstall)\b",
        r"(?i)\b(apt|apt-get|brew|dnf|yum)\s+(install|remove|upgrade)\b",
        r"(?i)\bgo\s+(get|install)\b",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            ttl_hours: default_ttl_hours(),
            auto_approve: true,
            bookkeeping_paths: default_bookkeeping_paths(),
            required_claims: default_required_claims(),
            evidence_required: default_evidence_required(),
            require_version_tags: false,
            cleanup_on_complete: true,
            deploy_patterns: default_deploy_patterns(),
            production_patterns: default_production_patterns(),
            write_patterns: default_write_patterns(),
        }
    }
}

impl Config {
    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Load the project config, then the user config, then fall back to defaults.
    pub fn load(root: &Path) -> Result<Self> {
        let project = paths::config_path(root);
        if project.exists() {
            return Self::load_file(&project);
        }
        if let Ok(user) = paths::user_config_path() {
            if user.exists() {
                return Self::load_file(&user);
            }
        }
        Ok(Self::default())
    }

    /// Like [`Config::load`], but a broken config file degrades to defaults.
    pub fn load_or_default(root: &Path) -> Self {
        Self::load(root).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "config unreadable, using defaults");
            Self::default()
        })
    }

    fn load_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn ttl(&self) -> Duration {
        Duration::hours(i64::from(self.ttl_hours))
    }

    /// True when `rel_path` (relative to the project root) is under a bookkeeping prefix.
    pub fn is_bookkeeping(&self, rel_path: &str) -> bool {
        paths::under_prefixes(rel_path, &self.bookkeeping_paths)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.ttl_hours == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "ttl_hours is 0: no workflow can ever be active".to_string(),
            });
        }

        if self.bookkeeping_paths.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "no bookkeeping_paths: checkpoint writes are gated before planning"
                    .to_string(),
            });
        }

        for (field, patterns) in [
            ("deploy_patterns", &self.deploy_patterns),
            ("production_patterns", &self.production_patterns),
            ("write_patterns", &self.write_patterns),
        ] {
            for pattern in patterns {
                if let Err(e) = compile(pattern) {
                    warnings.push(ConfigWarning {
                        level: WarnLevel::Error,
                        message: format!("{field}: {e}"),
                    });
                }
            }
        }

        for claim in &self.required_claims {
            if claim == crate::checkpoint::JOB_COMPLETE {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("'{claim}' is always required; listing it is redundant"),
                });
            }
        }

        warnings
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| GateError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// CommandPatterns
// ---------------------------------------------------------------------------

/// Compiled deploy/production/write matchers. Invalid patterns are skipped with a
/// warning; `Config::validate` reports them.
#[derive(Debug, Clone)]
pub struct CommandPatterns {
    deploy: Vec<Regex>,
    production: Vec<Regex>,
    write: Vec<Regex>,
    bookkeeping: Vec<String>,
}

impl CommandPatterns {
    pub fn from_config(config: &Config) -> Self {
        Self {
            deploy: compile_all(&config.deploy_patterns),
            production: compile_all(&config.production_patterns),
            write: compile_all(&config.write_patterns),
            bookkeeping: config.bookkeeping_paths.clone(),
        }
    }

    pub fn is_write(&self, command: &str) -> bool {
        self.write.iter().any(|re| re.is_match(command))
    }

    pub fn is_bookkeeping(&self, rel_path: &str) -> bool {
        paths::under_prefixes(rel_path, &self.bookkeeping)
    }

    pub fn is_deploy(&self, command: &str) -> bool {
        self.deploy.iter().any(|re| re.is_match(command))
    }

    pub fn is_production(&self, command: &str) -> bool {
        self.production.iter().any(|re| re.is_match(command))
    }
}

fn compile_all(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match compile(p) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!(error = %e, "skipping invalid command pattern");
                None
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
