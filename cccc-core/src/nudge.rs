//! C5 — the nudge subsystem (spec §4.5): debounced/backoff prompts that
//! tell a peer "new mail is waiting". Constants and state-machine shape
//! are grounded in `examples/original_source/.cccc/orchestrator/nudge.py`
//! (`NUDGE_RESEND_SECONDS`, `NUDGE_DEBOUNCE_MS`,
//! `NUDGE_PROGRESS_TIMEOUT_S`, `NUDGE_BACKOFF_BASE_MS`,
//! `NUDGE_BACKOFF_MAX_MS`, `NUDGE_MAX_RETRIES`, `_maybe_send_nudge`).

use crate::events::{now_rfc3339, Role};
use crate::pane::PaneIo;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct NudgeConfig {
    pub resend_seconds: f64,
    pub jitter_pct: f64,
    pub debounce_ms: f64,
    pub progress_timeout_seconds: f64,
    pub backoff_base_ms: f64,
    pub backoff_max_ms: f64,
    pub max_retries: u32,
}

impl Default for NudgeConfig {
    fn default() -> Self {
        NudgeConfig {
            resend_seconds: 90.0,
            jitter_pct: 0.0,
            debounce_ms: 1500.0,
            progress_timeout_seconds: 45.0,
            backoff_base_ms: 1000.0,
            backoff_max_ms: 60000.0,
            max_retries: 1,
        }
    }
}

/// Persisted per-peer nudge state (spec §3 "Nudge state",
/// `state/nudge.<peer>.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NudgeState {
    pub inflight: bool,
    pub last_sent_ts: f64,
    pub last_progress_ts: f64,
    pub retries: u32,
    pub last_ack_seq: Option<String>,
    pub last_inbox_count: usize,
}

fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

pub struct NudgeEngine {
    home: PathBuf,
    config: NudgeConfig,
    pane: Option<Box<dyn PaneIo>>,
}

impl NudgeEngine {
    pub fn new(home: &Path, config: &NudgeConfig) -> Self {
        NudgeEngine {
            home: home.to_path_buf(),
            config: config.clone(),
            pane: None,
        }
    }

    pub fn with_pane(mut self, pane: Box<dyn PaneIo>) -> Self {
        self.pane = Some(pane);
        self
    }

    fn state_path(&self, receiver: Role) -> PathBuf {
        self.home.join("state").join(format!("nudge.{receiver}.json"))
    }

    fn load(&self, receiver: Role) -> NudgeState {
        fs::read_to_string(self.state_path(receiver))
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    fn save(&self, receiver: Role, state: &NudgeState) {
        let path = self.state_path(receiver);
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Ok(bytes) = serde_json::to_vec_pretty(state) {
            let tmp = path.with_extension("tmp");
            let _ = fs::write(&tmp, bytes).and_then(|_| fs::rename(&tmp, &path));
        }
    }

    fn inbox_count(&self, receiver: Role) -> usize {
        let dir = self.home.join("mailbox").join(receiver.to_string()).join("inbox");
        fs::read_dir(dir)
            .map(|entries| entries.flatten().filter(|e| e.path().is_file()).count())
            .unwrap_or(0)
    }

    /// Marks progress for `receiver`: clears `inflight`, resets retries,
    /// and bumps `last_progress_ts` (spec §4.5 "Progress marking";
    /// `_nudge_mark_progress` in nudge.py).
    pub fn mark_progress(&self, receiver: Role, ack_seq: Option<&str>) {
        let mut state = self.load(receiver);
        state.inflight = false;
        state.retries = 0;
        state.last_progress_ts = now_epoch();
        if let Some(seq) = ack_seq {
            state.last_ack_seq = Some(seq.to_string());
        }
        self.save(receiver, &state);
    }

    /// Implements `_maybe_send_nudge`: debounce, progress-timeout +
    /// backoff, and the retry cap with "progress by external path"
    /// override.
    pub fn maybe_send(&mut self, receiver: Role, force: bool) -> bool {
        self.maybe_send_with_text(receiver, force, None)
    }

    pub fn send_custom(&mut self, receiver: Role, text: &str) -> bool {
        self.maybe_send_with_text(receiver, true, Some(text))
    }

    fn maybe_send_with_text(&mut self, receiver: Role, force: bool, custom_text: Option<&str>) -> bool {
        let mut state = self.load(receiver);
        let now = now_epoch();
        let inbox_count_now = self.inbox_count(receiver);

        if !force && state.inflight && state.retries >= self.config.max_retries {
            if inbox_count_now > state.last_inbox_count {
                state.inflight = false;
                state.retries = 0;
            } else {
                return false;
            }
        }

        if !force && (now - state.last_progress_ts) * 1000.0 < self.config.debounce_ms.max(0.0) {
            return false;
        }

        if state.inflight && !force {
            if (now - state.last_progress_ts) >= self.config.progress_timeout_seconds.max(1.0) {
                let backoff = (self.config.backoff_base_ms * 2f64.powi(state.retries as i32))
                    .min(self.config.backoff_max_ms)
                    / 1000.0;
                let mut interval = backoff.max(self.config.resend_seconds.max(1.0));
                if self.config.jitter_pct > 0.0 {
                    let jitter = 1.0 + rand::thread_rng().gen_range(-self.config.jitter_pct..=self.config.jitter_pct);
                    interval = (interval * jitter).max(1.0);
                }
                if (now - state.last_sent_ts) < interval {
                    return false;
                }
                state.retries += 1;
            } else {
                return false;
            }
        }

        let text = custom_text
            .map(|s| s.to_string())
            .unwrap_or_else(|| self.compose_default(receiver));
        if let Some(pane) = &self.pane {
            let _ = pane.paste_when_ready(&receiver.to_string(), &text, 6.0);
        }

        state.inflight = true;
        state.last_sent_ts = now;
        state.last_inbox_count = inbox_count_now;
        self.save(receiver, &state);
        true
    }

    fn compose_default(&self, receiver: Role) -> String {
        let inbox_path = self
            .home
            .join("mailbox")
            .join(receiver.to_string())
            .join("inbox");
        format!(
            "[NUDGE] New mail waiting in {} (ts={})",
            inbox_path.display(),
            now_rfc3339()
        )
    }

    /// Detailed variant with a sequence number and a preview line from
    /// the oldest inbox file (spec §4.5 "detailed variant").
    pub fn compose_detailed(&self, receiver: Role, seq: &str, preview: &str) -> String {
        let inbox_path = self
            .home
            .join("mailbox")
            .join(receiver.to_string())
            .join("inbox");
        format!(
            "[NUDGE] seq={seq} preview=\"{preview}\" in {} (ts={})",
            inbox_path.display(),
            now_rfc3339()
        )
    }

    pub fn state_for(&self, receiver: Role) -> NudgeState {
        self.load(receiver)
    }
}

/// Extracts a short, non-empty, non-wrapper-tag preview line from raw
/// inbox-file text, truncated (spec §4.5 "one-line preview derived from
/// the oldest inbox file").
pub fn safe_headline(text: &str, max_len: usize) -> String {
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with('<') || trimmed.starts_with("[MID:") {
            continue;
        }
        let mut out: String = trimmed.chars().take(max_len).collect();
        if trimmed.chars().count() > max_len {
            out.push('…');
        }
        return out;
    }
    "[unreadable-or-binary]".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn first_nudge_always_sends() {
        let dir = tempdir().unwrap();
        let mut engine = NudgeEngine::new(dir.path(), &NudgeConfig::default());
        assert!(engine.maybe_send(Role::PeerA, false));
    }

    #[test]
    fn debounce_suppresses_rapid_resend() {
        let dir = tempdir().unwrap();
        let mut engine = NudgeEngine::new(dir.path(), &NudgeConfig::default());
        assert!(engine.maybe_send(Role::PeerA, false));
        engine.mark_progress(Role::PeerA, None);
        assert!(!engine.maybe_send(Role::PeerA, false));
    }

    #[test]
    fn force_bypasses_debounce() {
        let dir = tempdir().unwrap();
        let mut engine = NudgeEngine::new(dir.path(), &NudgeConfig::default());
        engine.maybe_send(Role::PeerA, false);
        engine.mark_progress(Role::PeerA, None);
        assert!(engine.maybe_send(Role::PeerA, true));
    }

    #[test]
    fn mark_progress_clears_inflight() {
        let dir = tempdir().unwrap();
        let engine = NudgeEngine::new(dir.path(), &NudgeConfig::default());
        engine.mark_progress(Role::PeerA, Some("000001"));
        let state = engine.state_for(Role::PeerA);
        assert!(!state.inflight);
        assert_eq!(state.last_ack_seq.as_deref(), Some("000001"));
    }

    #[test]
    fn safe_headline_skips_wrapper_lines() {
        let text = "<FROM_USER>\n[MID: abc]\nreal content here\n</FROM_USER>";
        assert_eq!(safe_headline(text, 40), "real content here");
    }

    #[test]
    fn safe_headline_truncates_long_lines() {
        let text = "a".repeat(100);
        let headline = safe_headline(&text, 10);
        assert_eq!(headline.chars().count(), 11);
    }
}
