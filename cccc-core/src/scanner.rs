//! C6 — the mailbox scanner (spec §4.6): detects new peer output
//! (to_user/to_peer/patch), extracts diffs, and drives the ledger/outbox/
//! handoff side effects. Idempotent by construction because
//! `Mailbox::scan` leaves a sentinel behind.

use crate::events::{wrap_envelope, Role};
use crate::handoff::{Engine, HandoffOpts};
use crate::ledger::Ledger;
use crate::mailbox::Mailbox;
use crate::nudge::NudgeEngine;
use crate::outbox::Outbox;
use crate::patch::{gate_patch, normalize_patch, patch_digest, PatchVerdict};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// Result of scanning one peer for one tick, reported back to the
/// caller for logging/testing — the side effects (ledger/outbox/handoff)
/// have already happened by the time this is returned.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub to_user_emitted: bool,
    pub to_peer_forwarded: bool,
    pub to_peer_rejected_missing_insight: bool,
    pub patch_found: Option<String>,
    pub structured_events: Vec<(String, String)>,
}

fn insight_fence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```insight\s*\n.*?\n```\s*\z").unwrap())
}

fn structured_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^(Item|Progress|Evidence|Ask|Counter|Risk|Next)\(([^)]*)\):\s?(.*)$").unwrap()
    })
}

/// True if `text` ends with exactly one fenced ```insight``` block (spec
/// §4.6 "trailing insight block rule").
pub fn has_trailing_insight(text: &str) -> bool {
    insight_fence_regex().is_match(text.trim_end())
}

/// Parses `Item(label):`, `Progress(…): …`, etc. lines into
/// `event-<key>` entries. Tolerant: unrecognized keys and malformed
/// parameter lists are skipped, not errored (spec §4.6).
pub fn extract_structured_events(text: &str) -> Vec<(String, String)> {
    structured_line_regex()
        .captures_iter(text)
        .map(|caps| {
            let key = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            let tag = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
            let body = caps.get(3).map(|m| m.as_str().trim()).unwrap_or("");
            let value = if tag.is_empty() {
                body.to_string()
            } else {
                format!("[{tag}] {body}")
            };
            (format!("event-{}", key.to_lowercase()), value)
        })
        .collect()
}

fn string_payload(pairs: &[(&str, String)]) -> serde_json::Map<String, serde_json::Value> {
    let mut map = serde_json::Map::new();
    for (k, v) in pairs {
        map.insert(k.to_string(), serde_json::Value::String(v.clone()));
    }
    map
}

/// Strips the `<TO_USER>`/`<TO_PEER>` wrapper down to the inner body.
fn unwrap_to_tag(text: &str, tag: &str) -> String {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix(&open)
        .and_then(|rest| rest.strip_suffix(&close).or(Some(rest)))
        .unwrap_or(trimmed);
    body.trim().to_string()
}

#[allow(clippy::too_many_arguments)]
pub fn scan_peer(
    peer: Role,
    mailbox: &Mailbox,
    other_mailbox: &Mailbox,
    engine: &mut Engine,
    nudge: &mut NudgeEngine,
    ledger: &Ledger,
    outbox: &Outbox,
    protected_paths: &[String],
    max_patch_lines: usize,
    rfd_dir: &Path,
) -> ScanReport {
    let mut report = ScanReport::default();
    let scan = mailbox.scan();

    if let Some(to_user) = scan.to_user {
        let body = unwrap_to_tag(&to_user, "TO_USER");
        if !body.is_empty() {
            let _ = outbox.append_to_user(&peer.to_string(), &body);
            ledger.append(
                "to_user",
                peer,
                string_payload(&[("text", body.clone())]),
            );
            nudge.mark_progress(peer, None);
            report.structured_events.extend(extract_structured_events(&body));
            report.to_user_emitted = true;
        }
    }

    if let Some(to_peer) = scan.to_peer {
        let body = unwrap_to_tag(&to_peer, "TO_PEER");
        if has_trailing_insight(&to_peer) {
            let receiver = peer.other_peer();
            engine.send_handoff(
                peer,
                receiver,
                &wrap_envelope(receiver, "relay", &body, None),
                HandoffOpts::default(),
                other_mailbox,
                nudge,
                ledger,
            );
            let _ = outbox.append_to_peer_summary(&peer.to_string(), &body);
            nudge.mark_progress(peer, None);
            report.structured_events.extend(extract_structured_events(&body));
            report.to_peer_forwarded = true;
        } else {
            let tip = wrap_envelope(
                peer,
                "tip",
                "Your to_peer message is missing the required trailing ```insight``` block. Add one and resend.",
                None,
            );
            mailbox.mirror_inbox_md(&tip);
            ledger.append(
                "handoff-drop",
                Role::System,
                string_payload(&[
                    ("to", peer.to_string()),
                    ("reason", "missing-insight-block".to_string()),
                ]),
            );
            report.to_peer_rejected_missing_insight = true;
        }
    }

    if let Some(patch) = scan.patch {
        match normalize_patch(&patch) {
            Some(normalized) => match gate_patch(&normalized, protected_paths, max_patch_lines, rfd_dir) {
                PatchVerdict::Commit => {
                    ledger.append(
                        "patch-commit",
                        peer,
                        string_payload(&[
                            ("files", normalized.files.iter().map(|f| f.new_path.clone()).collect::<Vec<_>>().join(",")),
                            ("digest", patch_digest(&normalized.diff)),
                        ]),
                    );
                    report.patch_found = Some(normalized.diff);
                }
                PatchVerdict::Reject(reason) => {
                    ledger.append("patch-reject", peer, string_payload(&[("reason", reason.clone())]));
                    let tip = wrap_envelope(peer, "tip", &format!("Patch rejected: {reason}"), None);
                    mailbox.mirror_inbox_md(&tip);
                }
            },
            None => {
                ledger.append(
                    "patch-reject",
                    peer,
                    string_payload(&[("reason", "could not find a unified diff header".to_string())]),
                );
            }
        }
    }

    report
}
