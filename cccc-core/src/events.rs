//! The ledger event model (spec §3 "Event") and the wire-format helpers
//! shared by every component that reads or writes envelopes and
//! sentinels: `Role`, message-envelope wrapping/unwrapping, and the
//! one-line sentinel that replaces a consumed peer-output file.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Who originated an event or a handoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Role {
    User,
    System,
    PeerA,
    PeerB,
    Foreman,
    Aux,
    Bridge,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::User => "User",
            Role::System => "System",
            Role::PeerA => "PeerA",
            Role::PeerB => "PeerB",
            Role::Foreman => "Foreman",
            Role::Aux => "Aux",
            Role::Bridge => "Bridge",
        };
        f.write_str(s)
    }
}

impl Role {
    /// The peer this role addresses as a handoff *receiver*; `None` for
    /// roles that are never a receiver (User, Bridge).
    pub fn as_peer(&self) -> Option<Role> {
        match self {
            Role::PeerA | Role::PeerB => Some(*self),
            _ => None,
        }
    }

    /// The opposite peer, used when PeerA hands off to PeerB and vice
    /// versa. Panics on non-peer roles — callers only invoke this once
    /// they've established `self` is a peer.
    pub fn other_peer(&self) -> Role {
        match self {
            Role::PeerA => Role::PeerB,
            Role::PeerB => Role::PeerA,
            other => panic!("other_peer() called on non-peer role {other}"),
        }
    }

    /// The envelope tag name, e.g. `FROM_USER`, `FROM_PeerA`.
    pub fn from_tag(&self) -> String {
        format!("FROM_{self}")
    }
}

/// A ledger record (spec §3 Event). `payload` is an open JSON value
/// rather than a fixed struct per kind: the set of kinds is large and
/// growing (`handoff`, `to_user`, `patch-commit`, `rfd`, `decision`,
/// `self-check`, `system-refresh`, `bridge-inbound`, `bridge-outbound`,
/// `nudge`, `ack`, `auto-compact`, `handoff-drop`, `handoff-queued`,
/// `handoff-timeout-drop`, `startup-inbox-resume`, …) and readers only
/// ever switch on `kind`, never need the payload's shape statically
/// checked at the ledger layer itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    pub ts: String,
    pub kind: String,
    pub source: Role,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl Event {
    pub fn new(id: u64, kind: impl Into<String>, source: Role) -> Self {
        Event {
            id,
            ts: now_rfc3339(),
            kind: kind.into(),
            source,
            payload: serde_json::Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }
}

/// Current UTC time as an RFC 3339 string. Ledger timestamps are
/// generated at append time (spec §4.1), so every append path calls
/// this rather than threading a timestamp in from event creation.
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Wrap `body` in the envelope for `role`, inserting the `[MID: …]`
/// marker on the line after the opening tag, and an optional
/// role-specific inbound suffix inside the wrapper (spec §3 Message
/// envelope).
pub fn wrap_envelope(role: Role, mid: &str, body: &str, suffix: Option<&str>) -> String {
    let tag = role.from_tag();
    let mut out = format!("<{tag}>\n[MID: {mid}]\n{body}");
    if let Some(suffix) = suffix {
        if !suffix.trim().is_empty() {
            out.push('\n');
            out.push_str(suffix.trim());
        }
    }
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&format!("</{tag}>\n"));
    out
}

/// Strip a known envelope wrapper and the `[MID: …]` marker, returning
/// the remaining body text. Used by the empty-body guard (spec §4.4.2)
/// before filtering/hashing a payload — it must judge content, not
/// wrapper chrome.
pub fn strip_envelope(text: &str) -> String {
    let mut s = text.trim();
    for tag in [
        "FROM_USER",
        "FROM_SYSTEM",
        "FROM_PeerA",
        "FROM_PeerB",
        "TO_USER",
        "TO_PEER",
    ] {
        let open = format!("<{tag}>");
        let close = format!("</{tag}>");
        if let Some(rest) = s.strip_prefix(&open) {
            s = rest.strip_suffix(&close).unwrap_or(rest).trim();
        }
    }
    let mut lines: Vec<&str> = Vec::new();
    for line in s.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("[MID:") && trimmed.ends_with(']') {
            continue;
        }
        lines.push(line);
    }
    lines.join("\n").trim().to_string()
}

/// Build the one-line sentinel that replaces a consumed peer-output file
/// (spec §3, §6 "Sentinel format"): `MAILBOX:SENT v1 ts=<iso>
/// eid=<8-hex> sha8=<8-hex> route=<free text>`.
pub fn make_sentinel(eid: &str, sha8: &str, route: &str) -> String {
    format!(
        "MAILBOX:SENT v1 ts={} eid={} sha8={} route={}\n",
        now_rfc3339(),
        eid,
        sha8,
        route
    )
}

/// True if `content` is already a sentinel line, so the scanner can
/// distinguish "already consumed" from "fresh output" without keeping
/// its own across-restart bookkeeping.
pub fn is_sentinel(content: &str) -> bool {
    content.trim_start().starts_with("MAILBOX:SENT ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_then_strip_round_trips_body() {
        let wrapped = wrap_envelope(Role::User, "ab12cd", "hello", None);
        assert_eq!(wrapped, "<FROM_USER>\n[MID: ab12cd]\nhello\n</FROM_USER>\n");
        assert_eq!(strip_envelope(&wrapped), "hello");
    }

    #[test]
    fn wrap_appends_suffix_inside_wrapper() {
        let wrapped = wrap_envelope(Role::PeerA, "x", "body", Some("note"));
        assert!(wrapped.contains("body\nnote\n</FROM_PeerA>"));
    }

    #[test]
    fn strip_envelope_drops_mid_marker_only() {
        let text = "<FROM_SYSTEM>\n[MID: zz]\nfirst\nsecond\n</FROM_SYSTEM>\n";
        assert_eq!(strip_envelope(text), "first\nsecond");
    }

    #[test]
    fn sentinel_round_trip() {
        let s = make_sentinel("deadbeef", "cafebabe", "PeerA->PeerB");
        assert!(is_sentinel(&s));
        assert!(!is_sentinel("ordinary peer output"));
    }

    #[test]
    fn other_peer_swaps() {
        assert_eq!(Role::PeerA.other_peer(), Role::PeerB);
        assert_eq!(Role::PeerB.other_peer(), Role::PeerA);
    }
}
