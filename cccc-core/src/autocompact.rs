//! C9 — auto-compact supervisor (spec §4.9): a per-peer idle detector
//! that issues the peer CLI's "compact" command when five conditions are
//! all satisfied, rate-limited by `check_interval_seconds`.

use crate::events::Role;
use crate::pane::PaneIo;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[derive(Debug, Clone, Default)]
struct PeerState {
    last_compact_ts: f64,
    messages_since_compact: u64,
    last_activity_ts: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct AutoCompactConfig {
    pub enabled: bool,
    pub min_interval_seconds: f64,
    pub min_messages_since_last: u64,
    pub idle_threshold_seconds: f64,
    pub check_interval_seconds: f64,
}

impl Default for AutoCompactConfig {
    fn default() -> Self {
        AutoCompactConfig {
            enabled: false,
            min_interval_seconds: 1800.0,
            min_messages_since_last: 40,
            idle_threshold_seconds: 120.0,
            check_interval_seconds: 60.0,
        }
    }
}

/// Why `should_auto_compact` returned false — logged for diagnosis per
/// spec §4.9 ("all skip reasons are logged").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    NoCompactCommand,
    TooSoonSinceLastCompact,
    NotEnoughMessages,
    InFlight,
    QueueNonEmpty,
    NotIdleLongEnough,
}

pub struct AutoCompactSupervisor {
    config: AutoCompactConfig,
    states: HashMap<Role, PeerState>,
    last_check_ts: f64,
}

impl AutoCompactSupervisor {
    pub fn new(config: AutoCompactConfig) -> Self {
        AutoCompactSupervisor {
            config,
            states: HashMap::new(),
            last_check_ts: 0.0,
        }
    }

    /// Called by the handoff engine's "auto-compact hook" (spec §4.4
    /// step 9) on every successful handoff.
    pub fn note_activity(&mut self, peer: Role) {
        let state = self.states.entry(peer).or_default();
        state.last_activity_ts = now_epoch();
        state.messages_since_compact += 1;
    }

    /// Rate-limits the whole supervisor tick to `check_interval_seconds`.
    pub fn should_tick(&mut self) -> bool {
        let now = now_epoch();
        if now - self.last_check_ts < self.config.check_interval_seconds {
            return false;
        }
        self.last_check_ts = now;
        true
    }

    /// Evaluates the five AND-ed conditions (spec §4.9).
    pub fn should_auto_compact(
        &self,
        peer: Role,
        actor_has_compact_command: bool,
        has_inflight: bool,
        queue_len: usize,
    ) -> Result<(), SkipReason> {
        if !self.config.enabled {
            return Err(SkipReason::Disabled);
        }
        if !actor_has_compact_command {
            return Err(SkipReason::NoCompactCommand);
        }
        let state = self.states.get(&peer).cloned().unwrap_or_default();
        let now = now_epoch();
        if now - state.last_compact_ts < self.config.min_interval_seconds {
            return Err(SkipReason::TooSoonSinceLastCompact);
        }
        if state.messages_since_compact < self.config.min_messages_since_last {
            return Err(SkipReason::NotEnoughMessages);
        }
        if has_inflight {
            return Err(SkipReason::InFlight);
        }
        if queue_len > 0 {
            return Err(SkipReason::QueueNonEmpty);
        }
        if now - state.last_activity_ts < self.config.idle_threshold_seconds {
            return Err(SkipReason::NotIdleLongEnough);
        }
        Ok(())
    }

    /// Sends the actor's compact command to its pane, waits ~1s, sends
    /// an extra submit keystroke tolerant of confirmation prompts, and
    /// resets the counter.
    pub fn perform_compact(&mut self, peer: Role, pane_name: &str, compact_command: &str, pane: &dyn PaneIo) {
        let _ = pane.paste_when_ready(pane_name, compact_command, 6.0);
        std::thread::sleep(std::time::Duration::from_secs(1));
        let _ = pane.paste_when_ready(pane_name, "\n", 1.0);
        let state = self.states.entry(peer).or_default();
        state.last_compact_ts = now_epoch();
        state.messages_since_compact = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pane::NullPane;

    #[test]
    fn disabled_by_default() {
        let supervisor = AutoCompactSupervisor::new(AutoCompactConfig::default());
        assert_eq!(
            supervisor.should_auto_compact(Role::PeerA, true, false, 0),
            Err(SkipReason::Disabled)
        );
    }

    #[test]
    fn enabled_but_no_activity_yet_skips_on_message_count() {
        let mut config = AutoCompactConfig::default();
        config.enabled = true;
        config.min_interval_seconds = 0.0;
        config.idle_threshold_seconds = 0.0;
        let supervisor = AutoCompactSupervisor::new(config);
        assert_eq!(
            supervisor.should_auto_compact(Role::PeerA, true, false, 0),
            Err(SkipReason::NotEnoughMessages)
        );
    }

    #[test]
    fn inflight_blocks_compact() {
        let mut config = AutoCompactConfig::default();
        config.enabled = true;
        config.min_interval_seconds = 0.0;
        config.min_messages_since_last = 0;
        config.idle_threshold_seconds = 0.0;
        let supervisor = AutoCompactSupervisor::new(config);
        assert_eq!(
            supervisor.should_auto_compact(Role::PeerA, true, true, 0),
            Err(SkipReason::InFlight)
        );
    }

    #[test]
    fn perform_compact_resets_counter() {
        let mut config = AutoCompactConfig::default();
        config.enabled = true;
        let mut supervisor = AutoCompactSupervisor::new(config);
        supervisor.note_activity(Role::PeerA);
        supervisor.note_activity(Role::PeerA);
        supervisor.perform_compact(Role::PeerA, "peerA", "/compact", &NullPane);
        assert_eq!(supervisor.states.get(&Role::PeerA).unwrap().messages_since_compact, 0);
    }
}
