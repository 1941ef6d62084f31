use crate::error::Result;
use crate::paths;
use crate::store::{self, StateStore};
use crate::validator::StopState;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// AllowedPrompt
// ---------------------------------------------------------------------------

/// A permission granted during planning and consulted at execution time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedPrompt {
    pub tool: String,
    #[serde(alias = "prompt")]
    pub pattern: String,
}

impl AllowedPrompt {
    pub fn new(tool: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            pattern: pattern.into(),
        }
    }

    /// Same tool (case-insensitive) and either an exact command match or a
    /// `*` glob covering the whole command.
    pub fn matches(&self, tool: &str, command: &str) -> bool {
        if !self.tool.eq_ignore_ascii_case(tool) {
            return false;
        }
        let pattern = self.pattern.trim();
        let command = command.trim();
        if pattern == command {
            return true;
        }
        if !pattern.contains('*') {
            return false;
        }
        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        Regex::new(&format!("^{body}$"))
            .map(|re| re.is_match(command))
            .unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Axes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAxis {
    NotPlanned,
    Planned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Coordinator,
    Subordinate,
}

// ---------------------------------------------------------------------------
// StateRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    #[serde(default)]
    pub workflow: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub iteration: u32,
    #[serde(default)]
    pub plan_mode_completed: bool,
    /// Missing means subordinate: delegated processes never gain deploy rights by omission.
    #[serde(default)]
    pub coordinator: bool,
    #[serde(default)]
    pub allowed_prompts: Vec<AllowedPrompt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_state: Option<StopState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl StateRecord {
    pub fn new(workflow: impl Into<String>, session_id: impl Into<String>, coordinator: bool) -> Self {
        Self {
            workflow: workflow.into(),
            started_at: Utc::now(),
            session_id: session_id.into(),
            iteration: 1,
            plan_mode_completed: false,
            coordinator,
            allowed_prompts: Vec::new(),
            stop_state: None,
            updated_at: None,
        }
    }

    pub fn plan_axis(&self) -> PlanAxis {
        if self.plan_mode_completed {
            PlanAxis::Planned
        } else {
            PlanAxis::NotPlanned
        }
    }

    pub fn role(&self) -> Role {
        if self.coordinator {
            Role::Coordinator
        } else {
            Role::Subordinate
        }
    }

    pub fn expires_at(&self, ttl: Duration) -> DateTime<Utc> {
        self.started_at + ttl
    }

    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        self.expires_at(ttl) <= now
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Record a grant. Returns false if an identical grant already exists.
    pub fn grant(&mut self, prompt: AllowedPrompt) -> bool {
        if self.allowed_prompts.contains(&prompt) {
            return false;
        }
        self.allowed_prompts.push(prompt);
        self.touch();
        true
    }

    /// `NotPlanned -> Planned`, recording the plan's grants.
    pub fn complete_planning(&mut self, grants: impl IntoIterator<Item = AllowedPrompt>) {
        for g in grants {
            self.grant(g);
        }
        if !self.plan_mode_completed {
            self.plan_mode_completed = true;
            self.iteration += 1;
        }
        self.touch();
    }

    pub fn record_stop(&mut self, state: StopState) {
        self.stop_state = Some(state);
        self.iteration += 1;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    pub fn load(store: &dyn StateStore, workflow: &str) -> Option<Self> {
        let mut record: StateRecord = store::load(store, &paths::state_file_name(workflow))?;
        // The file name is authoritative; save and remove go back to the same file.
        record.workflow = workflow.to_string();
        Some(record)
    }

    pub fn save(&self, store: &dyn StateStore) -> Result<()> {
        paths::validate_workflow(&self.workflow)?;
        store::save(store, &paths::state_file_name(&self.workflow), self)
    }

    pub fn remove(store: &dyn StateStore, workflow: &str) -> Result<bool> {
        store.remove(&paths::state_file_name(workflow))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
