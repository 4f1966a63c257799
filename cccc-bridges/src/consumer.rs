//! The outbox-consumer contract shared by every bridge (spec §4.11): load
//! a persisted cursor, poll for new lines, dispatch each parsed event to a
//! handler, and commit the cursor only as far as the handler actually
//! delivered. Outbound posting failures still advance the cursor — spec §5
//! "the cursor is still advanced to avoid head-of-line blocking (at-most-
//! once post)" — so `BridgeRuntime::run_outbound_tick` never returns
//! `false` from its own handler, only logs.

use cccc_core::cursor::Cursor;
use cccc_core::{CoreError, Outbox, OutboxEvent};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

/// Loads a bridge's `settings/bridge_<name>.yaml` config file. Each
/// platform adapter defines its own config struct; this just applies the
/// same "read + parse YAML, wrap errors as `CoreError::Config`" shape
/// every config loader in `cccc-core::config` already uses.
pub fn load_bridge_config<T: DeserializeOwned>(path: &Path) -> Result<T, CoreError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| CoreError::Config(format!("cannot read {}: {e}", path.display())))?;
    serde_yaml::from_str(&text).map_err(|e| CoreError::Config(format!("invalid {}: {e}", path.display())))
}

/// Resolves a platform token: an inline YAML value wins if present
/// (spec §6 "tokens are never persisted into YAML except where the
/// operator explicitly configures it"), otherwise falls back to the
/// platform's environment variable. Errors if neither is set.
pub fn resolve_token(inline: String, env_var: &str) -> Result<String, CoreError> {
    if !inline.is_empty() {
        return Ok(inline);
    }
    std::env::var(env_var)
        .map_err(|_| CoreError::Config(format!("no bot token configured: set `bot_token` or the {env_var} environment variable")))
}

/// Wraps a persisted `Cursor` JSON file (`state/<bridge>-cursor.json`).
pub struct CursorFile {
    path: PathBuf,
}

impl CursorFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CursorFile { path: path.into() }
    }

    pub fn load(&self) -> Cursor {
        Cursor::load(&self.path)
    }

    pub fn save(&self, cursor: Cursor) -> io::Result<()> {
        cursor.save(&self.path)
    }
}

/// Polls `outbox` for lines new since the cursor file's last saved
/// position, calling `handler` once per event in file order. The cursor
/// is committed past the last event whose handler returned `true`; the
/// first `false` stops advancing (spec §4.11) but later events in this
/// batch are still offered to `handler` on the *next* poll once the
/// cursor catches up. Returns the number of events the handler accepted.
pub fn poll_outbox_and_dispatch(
    outbox: &Outbox,
    cursor_file: &CursorFile,
    mut handler: impl FnMut(&OutboxEvent) -> bool,
) -> io::Result<usize> {
    let start = cursor_file.load();
    let events = outbox.poll(start)?;
    let mut committed = start;
    let mut accepted = 0;
    let mut blocked = false;
    for (event, cursor) in events {
        if blocked {
            break;
        }
        if handler(&event) {
            committed = cursor;
            accepted += 1;
        } else {
            blocked = true;
        }
    }
    if committed != start {
        cursor_file.save(committed)?;
    }
    Ok(accepted)
}

/// A chat platform's runtime-persisted subscription list (spec §4.11
/// "union of configured channels and a runtime-persisted subscription
/// list"). Stored as a JSON array at `state/<bridge>-subscriptions.json`.
pub struct Subscriptions {
    path: PathBuf,
    channels: HashSet<String>,
}

impl Subscriptions {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let channels = std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str::<Vec<String>>(&s).ok())
            .map(|v| v.into_iter().collect())
            .unwrap_or_default();
        Subscriptions { path, channels }
    }

    fn save(&self) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let list: Vec<&String> = self.channels.iter().collect();
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&list)?)?;
        std::fs::rename(&tmp, &self.path)
    }

    pub fn subscribe(&mut self, channel: &str) -> io::Result<bool> {
        let added = self.channels.insert(channel.to_string());
        if added {
            self.save()?;
        }
        Ok(added)
    }

    pub fn unsubscribe(&mut self, channel: &str) -> io::Result<bool> {
        let removed = self.channels.remove(channel);
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.channels.contains(channel)
    }

    /// The union of `configured` (static, from the bridge's settings
    /// file) and the runtime-persisted subscriptions, deduplicated.
    pub fn effective_channels(&self, configured: &[String]) -> Vec<String> {
        let mut all: HashSet<String> = self.channels.clone();
        all.extend(configured.iter().cloned());
        let mut out: Vec<String> = all.into_iter().collect();
        out.sort();
        out
    }
}

/// Posting side of a platform adapter. `post` is a single best-effort
/// send to one channel; adapters implement it over their own HTTP client.
/// A `false` return only drives logging — it never blocks cursor
/// advancement (spec §5).
pub trait PlatformAdapter {
    fn post(&self, channel: &str, text: &str) -> bool;
    fn name(&self) -> &str;
}

/// Caps an outbound summary to a platform-friendly length, matching the
/// spec's "length-capped" outbound contract without depending on a
/// specific platform's exact limit.
pub const MAX_OUTBOUND_LEN: usize = 3500;

pub fn cap_len(text: &str) -> String {
    if text.chars().count() <= MAX_OUTBOUND_LEN {
        return text.to_string();
    }
    let truncated: String = text.chars().take(MAX_OUTBOUND_LEN.saturating_sub(1)).collect();
    format!("{truncated}\u{2026}")
}

/// Drives one outbound tick for `adapter`: polls the outbox, redacts and
/// length-caps each `to_user`/`to_peer_summary` event, and posts it to
/// every channel in `configured` ∪ subscriptions. Always commits the
/// cursor past every event it saw — a failed post is logged, not retried,
/// per spec §5's at-most-once posting policy.
pub fn run_outbound_tick(
    adapter: &dyn PlatformAdapter,
    outbox: &Outbox,
    cursor_file: &CursorFile,
    subs: &Subscriptions,
    configured: &[String],
    redactor: &crate::redact::Redactor,
) -> io::Result<usize> {
    let channels = subs.effective_channels(configured);
    poll_outbox_and_dispatch(outbox, cursor_file, |event| {
        let text = match event {
            OutboxEvent::ToUser { text, .. } => text,
            OutboxEvent::ToPeerSummary { text, .. } => text,
        };
        let redacted = redactor.redact(text);
        let capped = cap_len(&redacted);
        for channel in &channels {
            if !adapter.post(channel, &capped) {
                tracing::warn!(platform = adapter.name(), channel = %channel, "outbound post failed");
            }
        }
        true
    })
}

/// The shared top-level bridge object every `src/bin/cccc-bridge-*`
/// binary assembles: the outbox it tails, its private cursor, its
/// subscription list, and the redactor applied before posting.
pub struct BridgeRuntime {
    pub home: PathBuf,
    pub outbox: Outbox,
    pub cursor_file: CursorFile,
    pub subscriptions: Subscriptions,
    pub configured_channels: Vec<String>,
    pub redactor: crate::redact::Redactor,
}

impl BridgeRuntime {
    pub fn new(home: &Path, bridge_name: &str, configured_channels: Vec<String>) -> io::Result<Self> {
        let outbox = Outbox::open(home.join("state").join("outbox.jsonl"))?;
        let cursor_file = CursorFile::new(home.join("state").join(format!("{bridge_name}-cursor.json")));
        let subscriptions = Subscriptions::load(home.join("state").join(format!("{bridge_name}-subscriptions.json")));
        Ok(BridgeRuntime {
            home: home.to_path_buf(),
            outbox,
            cursor_file,
            subscriptions,
            configured_channels,
            redactor: crate::redact::Redactor::default_rules(),
        })
    }

    pub fn run_outbound_tick(&self, adapter: &dyn PlatformAdapter) -> io::Result<usize> {
        run_outbound_tick(
            adapter,
            &self.outbox,
            &self.cursor_file,
            &self.subscriptions,
            &self.configured_channels,
            &self.redactor,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct RecordingAdapter {
        posts: std::sync::Mutex<Vec<(String, String)>>,
        fail_channel: Option<String>,
    }

    impl PlatformAdapter for RecordingAdapter {
        fn post(&self, channel: &str, text: &str) -> bool {
            if self.fail_channel.as_deref() == Some(channel) {
                return false;
            }
            self.posts.lock().unwrap().push((channel.to_string(), text.to_string()));
            true
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    #[test]
    fn resolve_token_prefers_inline_value_over_env() {
        std::env::set_var("CCCC_TEST_TOKEN_INLINE", "from-env");
        let token = resolve_token("from-yaml".to_string(), "CCCC_TEST_TOKEN_INLINE").unwrap();
        assert_eq!(token, "from-yaml");
        std::env::remove_var("CCCC_TEST_TOKEN_INLINE");
    }

    #[test]
    fn resolve_token_falls_back_to_env_when_yaml_empty() {
        std::env::set_var("CCCC_TEST_TOKEN_FALLBACK", "from-env");
        let token = resolve_token(String::new(), "CCCC_TEST_TOKEN_FALLBACK").unwrap();
        assert_eq!(token, "from-env");
        std::env::remove_var("CCCC_TEST_TOKEN_FALLBACK");
    }

    #[test]
    fn resolve_token_errors_when_neither_set() {
        std::env::remove_var("CCCC_TEST_TOKEN_MISSING");
        assert!(resolve_token(String::new(), "CCCC_TEST_TOKEN_MISSING").is_err());
    }

    #[test]
    fn dispatch_commits_cursor_past_accepted_events() {
        let dir = tempdir().unwrap();
        let outbox = Outbox::open(dir.path().join("outbox.jsonl")).unwrap();
        outbox.append_to_user("PeerA", "one").unwrap();
        outbox.append_to_user("PeerA", "two").unwrap();
        let cursor_file = CursorFile::new(dir.path().join("cursor.json"));

        let accepted = poll_outbox_and_dispatch(&outbox, &cursor_file, |_| true).unwrap();
        assert_eq!(accepted, 2);

        outbox.append_to_user("PeerA", "three").unwrap();
        let accepted = poll_outbox_and_dispatch(&outbox, &cursor_file, |_| true).unwrap();
        assert_eq!(accepted, 1);
    }

    #[test]
    fn handler_returning_false_stops_advancing_past_it() {
        let dir = tempdir().unwrap();
        let outbox = Outbox::open(dir.path().join("outbox.jsonl")).unwrap();
        outbox.append_to_user("PeerA", "one").unwrap();
        outbox.append_to_user("PeerA", "two").unwrap();
        let cursor_file = CursorFile::new(dir.path().join("cursor.json"));

        let accepted = poll_outbox_and_dispatch(&outbox, &cursor_file, |_| false).unwrap();
        assert_eq!(accepted, 0);

        // Next poll sees the same two events again, since nothing committed.
        let mut seen = 0;
        poll_outbox_and_dispatch(&outbox, &cursor_file, |_| {
            seen += 1;
            true
        })
        .unwrap();
        assert_eq!(seen, 2);
    }

    #[test]
    fn subscriptions_round_trip_and_union_with_configured() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("subs.json");
        let mut subs = Subscriptions::load(&path);
        subs.subscribe("C1").unwrap();
        let reloaded = Subscriptions::load(&path);
        assert!(reloaded.is_subscribed("C1"));
        let effective = reloaded.effective_channels(&["C2".to_string()]);
        assert_eq!(effective, vec!["C1".to_string(), "C2".to_string()]);
    }

    #[test]
    fn outbound_tick_always_commits_even_on_post_failure() {
        let dir = tempdir().unwrap();
        let outbox = Outbox::open(dir.path().join("outbox.jsonl")).unwrap();
        outbox.append_to_user("PeerA", "hello").unwrap();
        let cursor_file = CursorFile::new(dir.path().join("cursor.json"));
        let subs = Subscriptions::load(dir.path().join("subs.json"));
        let adapter = RecordingAdapter {
            posts: std::sync::Mutex::new(Vec::new()),
            fail_channel: Some("C1".to_string()),
        };
        let redactor = crate::redact::Redactor::default_rules();
        let accepted =
            run_outbound_tick(&adapter, &outbox, &cursor_file, &subs, &["C1".to_string()], &redactor).unwrap();
        assert_eq!(accepted, 1);
        assert!(adapter.posts.lock().unwrap().is_empty());
    }

    #[test]
    fn cap_len_truncates_long_text() {
        let long = "x".repeat(MAX_OUTBOUND_LEN + 10);
        let capped = cap_len(&long);
        assert_eq!(capped.chars().count(), MAX_OUTBOUND_LEN);
        assert!(capped.ends_with('\u{2026}'));
    }
}
