//! C4 — the handoff engine (spec §4.4): delivers a message from a
//! sender identity to a receiver peer exactly once under best-effort
//! semantics, gated by the anti-loop policy filter and a single
//! in-flight slot per receiver.

use crate::config::Policies;
use crate::events::{now_rfc3339, strip_envelope, wrap_envelope, Role};
use crate::ledger::Ledger;
use crate::mailbox::Mailbox;
use crate::nudge::NudgeEngine;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// A queued or in-flight handoff (spec §3 "Handoff record").
#[derive(Debug, Clone)]
pub struct HandoffRecord {
    pub sender: Role,
    pub receiver: Role,
    pub payload: String,
    pub mid: String,
    pub hash: String,
    pub ts: f64,
    pub attempts: u32,
    pub require_mid: bool,
}

/// Options accepted by `send_handoff` (spec §4.4).
#[derive(Debug, Clone, Default)]
pub struct HandoffOpts {
    pub require_mid: bool,
    pub custom_nudge_text: Option<String>,
    pub inbound_suffix: Option<String>,
}

/// Outcome reported back to the caller, named after the ledger `kind`
/// the engine emits for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffOutcome {
    Nudged { seq: String, mid: String },
    Paused { seq: String, mid: String },
    Queued,
    DroppedEmptyBody,
    DroppedLowSignal,
    DroppedCooldown,
    DroppedDuplicate,
    DroppedRedundant,
}

fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Persisted guard state: last-forward timestamp per `(sender,receiver)`
/// pair, for the cooldown gate (spec §4.4, `state/handoff_guard.json`).
#[derive(Debug, Default, Serialize, Deserialize)]
struct GuardState {
    #[serde(flatten)]
    last_ts: HashMap<String, f64>,
}

/// Persisted short-dedup state: recent `(hash, ts)` per receiver (spec
/// §4.4, `state/handoff_dups.json`).
#[derive(Debug, Default, Serialize, Deserialize)]
struct DupState {
    #[serde(flatten)]
    recent: HashMap<String, Vec<(String, f64)>>,
}

/// Persisted long-redundancy state: recent token fingerprints per
/// receiver (spec §4.4, `state/handoff_sim.json`).
#[derive(Debug, Default, Serialize, Deserialize)]
struct SimState {
    #[serde(flatten)]
    recent: HashMap<String, Vec<(Vec<String>, f64)>>,
}

fn load_json<T: Default + serde::de::DeserializeOwned>(path: &Path) -> T {
    fs::read_to_string(path)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

fn save_json<T: Serialize>(path: &Path, value: &T) {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if let Ok(bytes) = serde_json::to_vec_pretty(value) {
        let tmp = path.with_extension("tmp");
        if fs::write(&tmp, bytes).and_then(|_| fs::rename(&tmp, path)).is_err() {
            tracing::warn!(path = %path.display(), "failed to persist handoff state");
        }
    }
}

/// Compiled anti-loop policy, built once from `Policies` so the engine
/// doesn't recompile regexes on every handoff.
pub struct PolicyFilter {
    min_chars: usize,
    min_words: usize,
    drop_regex: Vec<Regex>,
    require_keyword_any: Vec<String>,
    boost_keywords: Vec<String>,
    boost_regexes: Vec<Regex>,
    cooldown_seconds: f64,
    cooldown_bypass_high_signal: bool,
    dedup_short_seconds: f64,
    dedup_max_keep: usize,
    redundant_window_seconds: f64,
    redundant_similarity_threshold: f64,
    enabled: bool,
}

impl PolicyFilter {
    pub fn new(policies: &Policies) -> Self {
        let compile = |patterns: &[String]| -> Vec<Regex> {
            patterns
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect()
        };
        PolicyFilter {
            min_chars: policies.min_chars,
            min_words: policies.min_words,
            drop_regex: compile(&policies.drop_regex),
            require_keyword_any: policies.require_keyword_any.clone(),
            boost_keywords: policies.boost_keywords.clone(),
            boost_regexes: compile(&policies.boost_regexes),
            cooldown_seconds: policies.cooldown_seconds as f64,
            cooldown_bypass_high_signal: policies.cooldown_bypass_high_signal,
            dedup_short_seconds: policies.dedup_short_seconds as f64,
            dedup_max_keep: policies.dedup_max_keep,
            redundant_window_seconds: policies.redundant_window_seconds as f64,
            redundant_similarity_threshold: policies.redundant_similarity_threshold,
            enabled: policies.handoff_filter_enabled,
        }
    }

    /// High-signal bypass (spec §4.4): `?`, a boost keyword/regex, or
    /// exceeding 3x the minimum length thresholds.
    pub fn is_high_signal(&self, text: &str) -> bool {
        if text.contains('?') {
            return true;
        }
        let lower = text.to_lowercase();
        if self.boost_keywords.iter().any(|k| lower.contains(&k.to_lowercase())) {
            return true;
        }
        if self.boost_regexes.iter().any(|r| r.is_match(text)) {
            return true;
        }
        let chars = text.chars().count();
        let words = text.split_whitespace().count();
        chars >= self.min_chars.saturating_mul(3) || words >= self.min_words.saturating_mul(3)
    }

    /// Low-signal drop (spec §4.4): short AND matches a drop pattern AND
    /// no required keyword present.
    pub fn is_low_signal(&self, text: &str) -> bool {
        let chars = text.chars().count();
        let words = text.split_whitespace().count();
        let short = chars < self.min_chars && words < self.min_words;
        if !short {
            return false;
        }
        let matches_drop = self.drop_regex.iter().any(|r| r.is_match(text));
        if !matches_drop {
            return false;
        }
        if self.require_keyword_any.is_empty() {
            return true;
        }
        let lower = text.to_lowercase();
        !self
            .require_keyword_any
            .iter()
            .any(|k| lower.contains(&k.to_lowercase()))
    }

    fn tokenize(&self, text: &str) -> Vec<String> {
        let mut tokens: Vec<String> = text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.chars().count() >= 2)
            .map(|t| t.to_string())
            .collect();
        tokens.sort();
        tokens.dedup();
        tokens
    }

    fn jaccard(a: &[String], b: &[String]) -> f64 {
        if a.is_empty() && b.is_empty() {
            return 1.0;
        }
        let set_a: std::collections::HashSet<&String> = a.iter().collect();
        let set_b: std::collections::HashSet<&String> = b.iter().collect();
        let intersection = set_a.intersection(&set_b).count();
        let union = set_a.union(&set_b).count();
        if union == 0 {
            0.0
        } else {
            intersection as f64 / union as f64
        }
    }
}

/// The handoff engine: owns per-receiver in-flight slots, FIFO queues,
/// and the persisted anti-loop gate state.
pub struct Engine {
    home: PathBuf,
    filter: PolicyFilter,
    ack_timeout_seconds: f64,
    resend_attempts: u32,
    duplicate_window_seconds: f64,
    self_check_every_k: u64,
    system_refresh_every_n: u64,

    inflight: HashMap<Role, HandoffRecord>,
    queued: HashMap<Role, VecDeque<(Role, String, HandoffOpts)>>,
    last_sent_hash: HashMap<Role, Vec<(String, f64)>>,
    handoffs_per_receiver: HashMap<Role, u64>,
    in_self_check: bool,
    paused: bool,
    pending_self_checks: Vec<(Role, bool)>,
}

impl Engine {
    pub fn new(home: &Path, policies: &Policies) -> Self {
        Engine {
            home: home.to_path_buf(),
            filter: PolicyFilter::new(policies),
            ack_timeout_seconds: policies.ack_timeout_seconds as f64,
            resend_attempts: policies.resend_attempts,
            duplicate_window_seconds: policies.duplicate_window_seconds as f64,
            self_check_every_k: policies.self_check_every_k,
            system_refresh_every_n: policies.system_refresh_every_n,
            inflight: HashMap::new(),
            queued: HashMap::new(),
            last_sent_hash: HashMap::new(),
            handoffs_per_receiver: HashMap::new(),
            in_self_check: false,
            paused: false,
            pending_self_checks: Vec::new(),
        }
    }

    /// Drains the self-check/system-refresh requests queued by the most
    /// recent `send_handoff` calls. The engine only decides *when* a
    /// cadence fires (spec §4.4 step 8 / §4.7); composing the actual
    /// `<FROM_SYSTEM>` text and re-entering `send_handoff` with it is the
    /// caller's job (see `selfcheck::compose_*` and `RoutingCore::tick`),
    /// which avoids recursing into `send_handoff` while its own state
    /// maps are still borrowed.
    pub fn take_pending_self_checks(&mut self) -> Vec<(Role, bool)> {
        std::mem::take(&mut self.pending_self_checks)
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    fn state_path(&self, name: &str) -> PathBuf {
        self.home.join("state").join(name)
    }

    fn guard_key(sender: Role, receiver: Role) -> String {
        format!("{sender}->{receiver}")
    }

    /// The central operation (spec §4.4). Returns the outcome and, for
    /// successful writes, the allocated sequence/mid so callers can
    /// nudge/ledger as needed.
    #[allow(clippy::too_many_arguments)]
    pub fn send_handoff(
        &mut self,
        sender: Role,
        receiver: Role,
        payload: &str,
        opts: HandoffOpts,
        mailbox: &Mailbox,
        nudge: &mut NudgeEngine,
        ledger: &Ledger,
    ) -> HandoffOutcome {
        // 1. Backpressure: one in-flight slot per receiver.
        if self.inflight.contains_key(&receiver) {
            self.queued
                .entry(receiver)
                .or_default()
                .push_back((sender, payload.to_string(), opts));
            ledger.append(
                "handoff-queued",
                sender,
                json_payload(&[("to", receiver.to_string())]),
            );
            return HandoffOutcome::Queued;
        }

        // 2. Empty-body guard.
        let stripped = strip_envelope(payload);
        if stripped.is_empty() {
            ledger.append(
                "handoff-drop",
                sender,
                json_payload(&[("to", receiver.to_string()), ("reason", "empty-body".to_string())]),
            );
            return HandoffOutcome::DroppedEmptyBody;
        }

        // 3. Filtering (anti-loop). Low-signal/cooldown/dedup/redundancy.
        if self.filter.enabled {
            if self.filter.is_low_signal(&stripped) && !self.filter.is_high_signal(&stripped) {
                ledger.append(
                    "handoff-drop",
                    sender,
                    json_payload(&[("to", receiver.to_string()), ("reason", "low-signal".to_string())]),
                );
                return HandoffOutcome::DroppedLowSignal;
            }
            if let Some(outcome) = self.check_cooldown(sender, receiver, &stripped, ledger) {
                return outcome;
            }
            if let Some(outcome) = self.check_short_dedup(receiver, &stripped, ledger) {
                return outcome;
            }
            if let Some(outcome) = self.check_redundancy(receiver, &stripped, ledger) {
                return outcome;
            }
        }

        // 4. Duplicate de-bounce (last 20 hashes within duplicate window —
        //    applies uniformly to all senders including System, per the
        //    resolved Open Question in DESIGN.md).
        let hash = sha1_hex(&stripped);
        let now = now_epoch();
        let recent = self.last_sent_hash.entry(receiver).or_default();
        recent.retain(|(_, ts)| now - ts < self.duplicate_window_seconds);
        if recent.iter().any(|(h, _)| h == &hash) {
            ledger.append(
                "handoff-duplicate-drop",
                sender,
                json_payload(&[("to", receiver.to_string())]),
            );
            return HandoffOutcome::DroppedDuplicate;
        }
        recent.push((hash.clone(), now));
        if recent.len() > 20 {
            let excess = recent.len() - 20;
            recent.drain(0..excess);
        }

        // 5. Write and nudge.
        let mid = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        let wrapped = wrap_envelope(receiver, &mid, &stripped, opts.inbound_suffix.as_deref());
        let (seq, _path) = match mailbox.write_inbox(&wrapped, &mid) {
            Ok(v) => v,
            Err(e) => {
                ledger.append(
                    "handoff",
                    sender,
                    json_payload(&[("to", receiver.to_string()), ("status", format!("failed:{e}"))]),
                );
                return HandoffOutcome::DroppedEmptyBody;
            }
        };

        let record = HandoffRecord {
            sender,
            receiver,
            payload: wrapped,
            mid: mid.clone(),
            hash,
            ts: now,
            attempts: 1,
            require_mid: opts.require_mid,
        };

        // 6. Pause semantics: write happened above regardless; skip nudge.
        if self.paused {
            self.inflight.insert(receiver, record);
            ledger.append(
                "handoff-paused",
                sender,
                json_payload(&[("to", receiver.to_string()), ("seq", seq.clone()), ("mid", mid.clone())]),
            );
            return HandoffOutcome::Paused { seq, mid };
        }

        self.inflight.insert(receiver, record);
        if let Some(custom) = &opts.custom_nudge_text {
            nudge.send_custom(receiver, custom);
        } else {
            nudge.maybe_send(receiver, false);
        }

        ledger.append(
            "handoff",
            sender,
            json_payload(&[
                ("to", receiver.to_string()),
                ("status", "nudged".to_string()),
                ("mid", mid.clone()),
                ("seq", seq.clone()),
                ("chars", stripped.chars().count().to_string()),
            ]),
        );

        // 8. Self-check cadence.
        let counter = self.handoffs_per_receiver.entry(receiver).or_insert(0);
        *counter += 1;
        if !self.in_self_check && self.self_check_every_k > 0 && *counter % self.self_check_every_k == 0 {
            self.in_self_check = true;
            let is_refresh = self.system_refresh_every_n > 0
                && (*counter / self.self_check_every_k) % self.system_refresh_every_n == 0;
            ledger.append(
                if is_refresh { "system-refresh" } else { "self-check" },
                Role::System,
                json_payload(&[("receiver", receiver.to_string())]),
            );
            self.pending_self_checks.push((receiver, is_refresh));
            self.in_self_check = false;
        }

        HandoffOutcome::Nudged { seq, mid }
    }

    fn check_cooldown(
        &mut self,
        sender: Role,
        receiver: Role,
        text: &str,
        ledger: &Ledger,
    ) -> Option<HandoffOutcome> {
        if self.filter.is_high_signal(text) && self.filter.cooldown_bypass_high_signal {
            return None;
        }
        let path = self.state_path("handoff_guard.json");
        let mut guard: GuardState = load_json(&path);
        let key = Self::guard_key(sender, receiver);
        let now = now_epoch();
        if let Some(last) = guard.last_ts.get(&key) {
            if now - last < self.filter.cooldown_seconds {
                ledger.append(
                    "handoff-drop",
                    sender,
                    json_payload(&[("to", receiver.to_string()), ("reason", "cooldown".to_string())]),
                );
                return Some(HandoffOutcome::DroppedCooldown);
            }
        }
        guard.last_ts.insert(key, now);
        save_json(&path, &guard);
        None
    }

    fn check_short_dedup(&mut self, receiver: Role, text: &str, ledger: &Ledger) -> Option<HandoffOutcome> {
        let path = self.state_path("handoff_dups.json");
        let mut state: DupState = load_json(&path);
        let key = receiver.to_string();
        let now = now_epoch();
        let hash = sha1_hex(text);
        let entry = state.recent.entry(key).or_default();
        entry.retain(|(_, ts)| now - ts < self.filter.dedup_short_seconds);
        if entry.iter().any(|(h, _)| h == &hash) {
            ledger.append(
                "handoff-drop",
                Role::System,
                json_payload(&[("to", receiver.to_string()), ("reason", "short-dedup".to_string())]),
            );
            return Some(HandoffOutcome::DroppedDuplicate);
        }
        entry.push((hash, now));
        if entry.len() > self.filter.dedup_max_keep {
            let excess = entry.len() - self.filter.dedup_max_keep;
            entry.drain(0..excess);
        }
        save_json(&path, &state);
        None
    }

    fn check_redundancy(&mut self, receiver: Role, text: &str, ledger: &Ledger) -> Option<HandoffOutcome> {
        if self.filter.is_high_signal(text) {
            return None;
        }
        let path = self.state_path("handoff_sim.json");
        let mut state: SimState = load_json(&path);
        let key = receiver.to_string();
        let now = now_epoch();
        let tokens = self.filter.tokenize(text);
        let entry = state.recent.entry(key).or_default();
        entry.retain(|(_, ts)| now - ts < self.filter.redundant_window_seconds);
        let is_redundant = entry
            .iter()
            .any(|(prev, _)| PolicyFilter::jaccard(prev, &tokens) >= self.filter.redundant_similarity_threshold);
        if is_redundant {
            ledger.append(
                "handoff-drop",
                Role::System,
                json_payload(&[("to", receiver.to_string()), ("reason", "redundant".to_string())]),
            );
            return Some(HandoffOutcome::DroppedRedundant);
        }
        entry.push((tokens, now));
        if entry.len() > 5 {
            let excess = entry.len() - 5;
            entry.drain(0..excess);
        }
        save_json(&path, &state);
        None
    }

    /// Clears the in-flight slot for `receiver` (ack / archive / timeout
    /// resolution) and pops the next queued record back into
    /// `send_handoff`, preserving per-receiver FIFO order (spec §4.4
    /// "Queue drain").
    pub fn drain_queue(
        &mut self,
        receiver: Role,
        mailbox: &Mailbox,
        nudge: &mut NudgeEngine,
        ledger: &Ledger,
    ) {
        self.inflight.remove(&receiver);
        if let Some(queue) = self.queued.get_mut(&receiver) {
            if let Some((sender, payload, opts)) = queue.pop_front() {
                self.send_handoff(sender, receiver, &payload, opts, mailbox, nudge, ledger);
            }
        }
    }

    /// Scans in-flight records for timeout resolution (spec §4.4 "Retry
    /// and timeout"). `receiver_had_activity_since` tells the engine
    /// whether any mailbox output was observed from `receiver` after the
    /// handoff's send timestamp — used to decide soft-ack vs drop.
    pub fn tick_timeouts(
        &mut self,
        ledger: &Ledger,
        receiver_had_activity_since: impl Fn(Role, f64) -> bool,
    ) -> Vec<Role> {
        let now = now_epoch();
        let mut resolved = Vec::new();
        let receivers: Vec<Role> = self.inflight.keys().copied().collect();
        for receiver in receivers {
            let Some(record) = self.inflight.get_mut(&receiver) else {
                continue;
            };
            if now - record.ts < self.ack_timeout_seconds {
                continue;
            }
            let can_retry = record.require_mid && record.attempts <= self.resend_attempts;
            if can_retry {
                record.attempts += 1;
                record.ts = now;
                ledger.append(
                    "handoff",
                    record.sender,
                    json_payload(&[
                        ("to", receiver.to_string()),
                        ("status", "resent".to_string()),
                        ("mid", record.mid.clone()),
                    ]),
                );
                continue;
            }
            let had_activity = receiver_had_activity_since(receiver, record.ts);
            let kind = if had_activity {
                "handoff-timeout-soft-ack"
            } else {
                "handoff-timeout-drop"
            };
            ledger.append(kind, record.sender, json_payload(&[("to", receiver.to_string())]));
            resolved.push(receiver);
        }
        for receiver in &resolved {
            self.inflight.remove(receiver);
        }
        resolved
    }

    pub fn has_inflight(&self, receiver: Role) -> bool {
        self.inflight.contains_key(&receiver)
    }

    pub fn queue_len(&self, receiver: Role) -> usize {
        self.queued.get(&receiver).map(|q| q.len()).unwrap_or(0)
    }
}

fn json_payload(pairs: &[(&str, String)]) -> serde_json::Map<String, serde_json::Value> {
    let mut map = serde_json::Map::new();
    for (k, v) in pairs {
        map.insert(k.to_string(), serde_json::Value::String(v.clone()));
    }
    map
}

fn sha1_hex(text: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup(dir: &Path) -> (Engine, Mailbox, NudgeEngine, Ledger) {
        let policies = Policies::default();
        let engine = Engine::new(dir, &policies);
        let mailbox = Mailbox::new(dir, "peerA");
        let nudge = NudgeEngine::new(dir, &Default::default());
        let ledger = Ledger::open(dir.join("state/ledger.jsonl")).unwrap();
        (engine, mailbox, nudge, ledger)
    }

    #[test]
    fn hello_routing_writes_one_file_and_nudges() {
        let dir = tempdir().unwrap();
        let (mut engine, mailbox, mut nudge, ledger) = setup(dir.path());
        let outcome = engine.send_handoff(
            Role::User,
            Role::PeerA,
            "hello there friend, this is a long enough message to not be filtered",
            HandoffOpts::default(),
            &mailbox,
            &mut nudge,
            &ledger,
        );
        assert!(matches!(outcome, HandoffOutcome::Nudged { .. }));
        assert!(engine.has_inflight(Role::PeerA));
    }

    #[test]
    fn second_send_while_inflight_queues() {
        let dir = tempdir().unwrap();
        let (mut engine, mailbox, mut nudge, ledger) = setup(dir.path());
        engine.send_handoff(Role::User, Role::PeerA, "first message long enough to pass filters ok", HandoffOpts::default(), &mailbox, &mut nudge, &ledger);
        let outcome = engine.send_handoff(Role::User, Role::PeerA, "second message long enough to pass filters too", HandoffOpts::default(), &mailbox, &mut nudge, &ledger);
        assert_eq!(outcome, HandoffOutcome::Queued);
        assert_eq!(engine.queue_len(Role::PeerA), 1);
    }

    #[test]
    fn empty_body_is_dropped() {
        let dir = tempdir().unwrap();
        let (mut engine, mailbox, mut nudge, ledger) = setup(dir.path());
        let outcome = engine.send_handoff(Role::User, Role::PeerA, "<FROM_USER>\n[MID: x]\n</FROM_USER>", HandoffOpts::default(), &mailbox, &mut nudge, &ledger);
        assert_eq!(outcome, HandoffOutcome::DroppedEmptyBody);
    }

    #[test]
    fn duplicate_within_window_is_dropped_for_any_sender() {
        let dir = tempdir().unwrap();
        let (mut engine, mailbox, mut nudge, ledger) = setup(dir.path());
        let text = "identical payload long enough to bypass the low signal filter";
        engine.send_handoff(Role::System, Role::PeerA, text, HandoffOpts::default(), &mailbox, &mut nudge, &ledger);
        engine.drain_queue(Role::PeerA, &mailbox, &mut nudge, &ledger);
        let outcome = engine.send_handoff(Role::System, Role::PeerA, text, HandoffOpts::default(), &mailbox, &mut nudge, &ledger);
        assert_eq!(outcome, HandoffOutcome::DroppedDuplicate);
    }

    #[test]
    fn pause_still_writes_but_skips_nudge() {
        let dir = tempdir().unwrap();
        let (mut engine, mailbox, mut nudge, ledger) = setup(dir.path());
        engine.set_paused(true);
        let outcome = engine.send_handoff(Role::User, Role::PeerA, "paused message long enough to pass the filters fully", HandoffOpts::default(), &mailbox, &mut nudge, &ledger);
        assert!(matches!(outcome, HandoffOutcome::Paused { .. }));
        let inbox_files: Vec<_> = std::fs::read_dir(mailbox.inbox_dir()).unwrap().collect();
        assert_eq!(inbox_files.len(), 1);
    }

    #[test]
    fn high_signal_bypasses_low_signal_filter_regardless_of_length() {
        let policies = Policies::default();
        let filter = PolicyFilter::new(&policies);
        assert!(filter.is_high_signal("ok?"));
    }

    #[test]
    fn self_check_cadence_fires_every_k_handoffs() {
        let dir = tempdir().unwrap();
        let mut policies = Policies::default();
        policies.self_check_every_k = 2;
        policies.system_refresh_every_n = 3;
        let mut engine = Engine::new(dir.path(), &policies);
        let mailbox = Mailbox::new(dir.path(), "peerA");
        let mut nudge = NudgeEngine::new(dir.path(), &Default::default());
        let ledger = Ledger::open(dir.path().join("state/ledger.jsonl")).unwrap();
        for i in 0..2 {
            engine.send_handoff(Role::User, Role::PeerA, &format!("message number {i} long enough to pass filters"), HandoffOpts::default(), &mailbox, &mut nudge, &ledger);
            engine.drain_queue(Role::PeerA, &mailbox, &mut nudge, &ledger);
        }
        let pending = engine.take_pending_self_checks();
        assert_eq!(pending, vec![(Role::PeerA, false)]);
    }

    #[test]
    fn filter_is_high_signal_for_long_text() {
        let policies = Policies::default();
        let filter = PolicyFilter::new(&policies);
        let long_text = "word ".repeat(30);
        assert!(filter.is_high_signal(&long_text));
    }
}
