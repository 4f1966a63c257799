//! Configuration loading (`settings/*.yaml`) and the derived
//! `RuntimeBindings` banner (spec §3 "Runtime bindings", §6
//! `settings/agents.yaml, cli_profiles.yaml, policies.yaml, …`).
//!
//! Missing-required-actor and invalid-role-binding errors are detected
//! here and are fatal at launch (spec §7 category 1).

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// `settings/agents.yaml` — maps the two peer roles (and optionally
/// Aux/Foreman) to concrete actor ids.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentsConfig {
    pub peer_a: String,
    pub peer_b: Option<String>,
    pub aux: Option<String>,
    pub foreman: Option<String>,
}

/// A single CLI actor's profile (`settings/cli_profiles.yaml`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CliProfile {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub compact_command: Option<String>,
    #[serde(default)]
    pub nudge_suffix: Option<String>,
    #[serde(default)]
    pub inbound_suffixes: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct CliProfiles {
    #[serde(flatten)]
    pub profiles: HashMap<String, CliProfile>,
}

/// Anti-loop and scheduling knobs (`settings/policies.yaml`, spec §4.4,
/// §4.5, §4.7, §4.9).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Policies {
    #[serde(default = "default_true")]
    pub handoff_filter_enabled: bool,
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
    #[serde(default = "default_min_words")]
    pub min_words: usize,
    #[serde(default)]
    pub drop_regex: Vec<String>,
    #[serde(default)]
    pub require_keyword_any: Vec<String>,
    #[serde(default)]
    pub boost_keywords: Vec<String>,
    #[serde(default)]
    pub boost_regexes: Vec<String>,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    #[serde(default = "default_true")]
    pub cooldown_bypass_high_signal: bool,
    #[serde(default = "default_dedup_short_seconds")]
    pub dedup_short_seconds: u64,
    #[serde(default = "default_dedup_max_keep")]
    pub dedup_max_keep: usize,
    #[serde(default = "default_redundant_window_seconds")]
    pub redundant_window_seconds: u64,
    #[serde(default = "default_redundant_similarity_threshold")]
    pub redundant_similarity_threshold: f64,
    #[serde(default = "default_duplicate_window_seconds")]
    pub duplicate_window_seconds: u64,
    #[serde(default = "default_ack_timeout_seconds")]
    pub ack_timeout_seconds: u64,
    #[serde(default = "default_resend_attempts")]
    pub resend_attempts: u32,
    #[serde(default = "default_self_check_every_k")]
    pub self_check_every_k: u64,
    #[serde(default = "default_system_refresh_every_n")]
    pub system_refresh_every_n: u64,
    #[serde(default = "default_auto_compact_min_interval_seconds")]
    pub auto_compact_min_interval_seconds: u64,
    #[serde(default = "default_auto_compact_min_messages")]
    pub auto_compact_min_messages: u64,
    #[serde(default = "default_auto_compact_idle_threshold_seconds")]
    pub auto_compact_idle_threshold_seconds: u64,
    #[serde(default = "default_auto_compact_check_interval_seconds")]
    pub auto_compact_check_interval_seconds: u64,
    #[serde(default)]
    pub auto_compact_enabled: bool,
    /// Path prefixes (relative to the repo the peers operate on) that
    /// require an approved RFD before a touching patch may commit.
    #[serde(default)]
    pub protected_paths: Vec<String>,
    #[serde(default = "default_max_patch_lines")]
    pub max_patch_lines: usize,
}

fn default_true() -> bool {
    true
}
fn default_min_chars() -> usize {
    40
}
fn default_min_words() -> usize {
    8
}
fn default_cooldown_seconds() -> u64 {
    20
}
fn default_dedup_short_seconds() -> u64 {
    60
}
fn default_dedup_max_keep() -> usize {
    20
}
fn default_redundant_window_seconds() -> u64 {
    600
}
fn default_redundant_similarity_threshold() -> f64 {
    0.9
}
fn default_duplicate_window_seconds() -> u64 {
    30
}
fn default_ack_timeout_seconds() -> u64 {
    45
}
fn default_resend_attempts() -> u32 {
    2
}
fn default_self_check_every_k() -> u64 {
    12
}
fn default_system_refresh_every_n() -> u64 {
    6
}
fn default_auto_compact_min_interval_seconds() -> u64 {
    1800
}
fn default_auto_compact_min_messages() -> u64 {
    40
}
fn default_auto_compact_idle_threshold_seconds() -> u64 {
    120
}
fn default_auto_compact_check_interval_seconds() -> u64 {
    60
}
fn default_max_patch_lines() -> usize {
    400
}

impl Default for Policies {
    fn default() -> Self {
        Policies {
            handoff_filter_enabled: default_true(),
            min_chars: default_min_chars(),
            min_words: default_min_words(),
            drop_regex: Vec::new(),
            require_keyword_any: Vec::new(),
            boost_keywords: Vec::new(),
            boost_regexes: Vec::new(),
            cooldown_seconds: default_cooldown_seconds(),
            cooldown_bypass_high_signal: default_true(),
            dedup_short_seconds: default_dedup_short_seconds(),
            dedup_max_keep: default_dedup_max_keep(),
            redundant_window_seconds: default_redundant_window_seconds(),
            redundant_similarity_threshold: default_redundant_similarity_threshold(),
            duplicate_window_seconds: default_duplicate_window_seconds(),
            ack_timeout_seconds: default_ack_timeout_seconds(),
            resend_attempts: default_resend_attempts(),
            self_check_every_k: default_self_check_every_k(),
            system_refresh_every_n: default_system_refresh_every_n(),
            auto_compact_min_interval_seconds: default_auto_compact_min_interval_seconds(),
            auto_compact_min_messages: default_auto_compact_min_messages(),
            auto_compact_idle_threshold_seconds: default_auto_compact_idle_threshold_seconds(),
            auto_compact_check_interval_seconds: default_auto_compact_check_interval_seconds(),
            auto_compact_enabled: false,
            protected_paths: Vec::new(),
            max_patch_lines: default_max_patch_lines(),
        }
    }
}

/// Runtime bindings effective for one session (spec §3): the one-line
/// banner injected into every SYSTEM message.
#[derive(Debug, Clone)]
pub struct RuntimeBindings {
    pub peer_a: String,
    pub peer_b: Option<String>,
    pub aux: Option<String>,
    pub aux_invoke_template: Option<String>,
    pub foreman: Option<String>,
}

impl RuntimeBindings {
    pub fn banner(&self) -> String {
        let mut parts = vec![format!("PeerA={}", self.peer_a)];
        if let Some(b) = &self.peer_b {
            parts.push(format!("PeerB={b}"));
        }
        if let Some(aux) = &self.aux {
            parts.push(format!("Aux={aux}"));
        }
        if let Some(foreman) = &self.foreman {
            parts.push(format!("Foreman={foreman}"));
        }
        format!("[runtime: {}]", parts.join(" "))
    }
}

/// Loads `agents.yaml` and validates the required-actor invariant (spec
/// §7 category 1: missing required actor is fatal at launch).
pub fn load_agents(path: &Path) -> Result<AgentsConfig> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        CoreError::Config(format!("cannot read {}: {e}", path.display()))
    })?;
    let cfg: AgentsConfig = serde_yaml::from_str(&text)
        .map_err(|e| CoreError::Config(format!("invalid agents.yaml: {e}")))?;
    if cfg.peer_a.trim().is_empty() {
        return Err(CoreError::Config("peer_a actor binding is required".to_string()));
    }
    Ok(cfg)
}

pub fn load_cli_profiles(path: &Path) -> Result<CliProfiles> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| CoreError::Config(format!("cannot read {}: {e}", path.display())))?;
    serde_yaml::from_str(&text)
        .map_err(|e| CoreError::Config(format!("invalid cli_profiles.yaml: {e}")))
}

/// Loads `policies.yaml`, or returns the default policy set if the file
/// is absent (policies are optional; every field has a documented
/// default per the Open Question resolved in DESIGN.md).
pub fn load_policies(path: &Path) -> Result<Policies> {
    match std::fs::read_to_string(path) {
        Ok(text) => serde_yaml::from_str(&text)
            .map_err(|e| CoreError::Config(format!("invalid policies.yaml: {e}"))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Policies::default()),
        Err(e) => Err(CoreError::Config(format!("cannot read {}: {e}", path.display()))),
    }
}

/// `settings/foreman.yaml` (spec §4.10). Absent file means foreman is
/// disabled, matching `foreman.py`'s `_load_foreman_conf` defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ForemanSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_foreman_interval_seconds")]
    pub interval_seconds: u64,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_foreman_max_run_seconds")]
    pub max_run_seconds: u64,
    #[serde(default = "default_foreman_kill_grace_seconds")]
    pub kill_grace_seconds: u64,
    #[serde(default = "default_foreman_prompt_path")]
    pub prompt_path: String,
}

fn default_foreman_interval_seconds() -> u64 {
    900
}
fn default_foreman_max_run_seconds() -> u64 {
    900
}
fn default_foreman_kill_grace_seconds() -> u64 {
    5
}
fn default_foreman_prompt_path() -> String {
    "FOREMAN_TASK.md".to_string()
}

/// Loads `foreman.yaml`, or a disabled default if the file is absent —
/// foreman is opt-in (spec §4.10 "optional").
pub fn load_foreman_settings(path: &Path) -> Result<ForemanSettings> {
    match std::fs::read_to_string(path) {
        Ok(text) => serde_yaml::from_str(&text)
            .map_err(|e| CoreError::Config(format!("invalid foreman.yaml: {e}"))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ForemanSettings {
            enabled: false,
            interval_seconds: default_foreman_interval_seconds(),
            command: String::new(),
            args: Vec::new(),
            max_run_seconds: default_foreman_max_run_seconds(),
            kill_grace_seconds: default_foreman_kill_grace_seconds(),
            prompt_path: default_foreman_prompt_path(),
        }),
        Err(e) => Err(CoreError::Config(format!("cannot read {}: {e}", path.display()))),
    }
}

pub fn bindings_from_agents(agents: &AgentsConfig, aux_invoke_template: Option<String>) -> RuntimeBindings {
    RuntimeBindings {
        peer_a: agents.peer_a.clone(),
        peer_b: agents.peer_b.clone(),
        aux: agents.aux.clone(),
        aux_invoke_template,
        foreman: agents.foreman.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_agents_requires_peer_a() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("agents.yaml");
        std::fs::write(&path, "peer_a: \"\"\n").unwrap();
        assert!(load_agents(&path).is_err());
    }

    #[test]
    fn load_agents_succeeds_with_peer_a_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("agents.yaml");
        std::fs::write(&path, "peer_a: claude\n").unwrap();
        let cfg = load_agents(&path).unwrap();
        assert_eq!(cfg.peer_a, "claude");
        assert!(cfg.peer_b.is_none());
    }

    #[test]
    fn missing_policies_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let policies = load_policies(&dir.path().join("absent.yaml")).unwrap();
        assert!(policies.handoff_filter_enabled);
        assert_eq!(policies.min_chars, 40);
    }

    #[test]
    fn missing_foreman_file_yields_disabled_defaults() {
        let dir = tempdir().unwrap();
        let settings = load_foreman_settings(&dir.path().join("absent.yaml")).unwrap();
        assert!(!settings.enabled);
        assert_eq!(settings.interval_seconds, 900);
    }

    #[test]
    fn foreman_file_overrides_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("foreman.yaml");
        std::fs::write(&path, "enabled: true\ncommand: claude\nargs: [\"-p\"]\ninterval_seconds: 60\n").unwrap();
        let settings = load_foreman_settings(&path).unwrap();
        assert!(settings.enabled);
        assert_eq!(settings.interval_seconds, 60);
        assert_eq!(settings.command, "claude");
    }

    #[test]
    fn banner_lists_bound_actors() {
        let bindings = RuntimeBindings {
            peer_a: "claude".into(),
            peer_b: Some("codex".into()),
            aux: None,
            aux_invoke_template: None,
            foreman: None,
        };
        assert_eq!(bindings.banner(), "[runtime: PeerA=claude PeerB=codex]");
    }
}
