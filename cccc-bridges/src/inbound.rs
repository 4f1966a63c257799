//! Inbound routing-prefix parsing (spec §4.11): a platform message is
//! addressed to PeerA, PeerB, or both via a leading `a:`/`b:`/`both:`,
//! a slash form (`/a`, `/b`, `/both`), or a bot-mention. Messages with no
//! recognized prefix are the caller's job to drop-with-hint.

use crate::consumer::Subscriptions;
use cccc_core::events::wrap_envelope;
use cccc_core::status::StatusWriter;
use cccc_core::{Ledger, Mailbox, Role, RuntimeBindings};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTarget {
    PeerA,
    PeerB,
    Both,
}

impl RouteTarget {
    /// The peer roles this target addresses, in delivery order.
    pub fn roles(&self) -> Vec<Role> {
        match self {
            RouteTarget::PeerA => vec![Role::PeerA],
            RouteTarget::PeerB => vec![Role::PeerB],
            RouteTarget::Both => vec![Role::PeerA, Role::PeerB],
        }
    }
}

/// Strips a recognized routing prefix from `text`, returning the target
/// and the remaining message body. Recognizes `a:`/`b:`/`both:` and
/// `/a`/`/b`/`/both` (case-insensitive, with or without trailing
/// whitespace before the body). Returns `None` if no prefix matches.
pub fn parse_route_prefix(text: &str) -> Option<(RouteTarget, String)> {
    let trimmed = text.trim_start();
    for (prefix, target) in [
        ("both:", RouteTarget::Both),
        ("/both", RouteTarget::Both),
        ("a:", RouteTarget::PeerA),
        ("/a", RouteTarget::PeerA),
        ("b:", RouteTarget::PeerB),
        ("/b", RouteTarget::PeerB),
    ] {
        if let Some(rest) = strip_prefix_ci(trimmed, prefix) {
            return Some((target, rest.trim_start().to_string()));
        }
    }
    None
}

/// Recognizes a bot-mention of the form `@botname <body>` and routes it
/// to `Both` (the mention addresses the session, not one specific peer).
/// `bot_handle` is compared case-insensitively without the leading `@`.
pub fn parse_bot_mention(text: &str, bot_handle: &str) -> Option<String> {
    let trimmed = text.trim_start();
    let mention = format!("@{bot_handle}");
    strip_prefix_ci(trimmed, &mention).map(|rest| rest.trim_start().to_string())
}

fn strip_prefix_ci<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    if text.len() < prefix.len() {
        return None;
    }
    let (head, tail) = text.split_at(prefix.len());
    if head.eq_ignore_ascii_case(prefix) {
        Some(tail)
    } else {
        None
    }
}

/// The minimal platform-local commands every bridge handles itself
/// rather than forwarding to the orchestrator (spec §4.11 "Commands").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalCommand {
    Subscribe,
    Unsubscribe,
    Status,
    Queue,
    WhoAmI,
    ShowPeers(bool),
    RfdList,
    RfdShow(String),
    Files,
    File(u32),
}

/// Parses a leading `/command` into a `LocalCommand`, or `None` if the
/// text isn't one of the recognized local commands — the caller then
/// injects it as a command record for the orchestrator instead.
pub fn parse_local_command(text: &str) -> Option<LocalCommand> {
    let trimmed = text.trim();
    if !trimmed.starts_with('/') {
        return None;
    }
    let mut parts = trimmed[1..].split_whitespace();
    let head = parts.next()?.to_ascii_lowercase();
    let rest: Vec<&str> = parts.collect();
    match head.as_str() {
        "subscribe" => Some(LocalCommand::Subscribe),
        "unsubscribe" => Some(LocalCommand::Unsubscribe),
        "status" => Some(LocalCommand::Status),
        "queue" => Some(LocalCommand::Queue),
        "whoami" => Some(LocalCommand::WhoAmI),
        "showpeers" => match rest.first().copied() {
            Some("on") => Some(LocalCommand::ShowPeers(true)),
            Some("off") => Some(LocalCommand::ShowPeers(false)),
            _ => None,
        },
        "rfd" => match rest.first().copied() {
            Some("list") => Some(LocalCommand::RfdList),
            Some("show") => rest.get(1).map(|id| LocalCommand::RfdShow(id.to_string())),
            _ => None,
        },
        "files" => Some(LocalCommand::Files),
        "file" => rest.first().and_then(|n| n.parse().ok()).map(LocalCommand::File),
        _ => None,
    }
}

/// What `execute_local_command` needs to answer a command without
/// touching the orchestrator's in-memory state (spec §7 "bridges answer
/// purely by reading snapshots").
pub struct LocalCommandContext<'a> {
    pub home: &'a Path,
    pub bindings: &'a RuntimeBindings,
    pub subscriptions: &'a mut Subscriptions,
    pub channel: &'a str,
}

/// Executes a local command, returning the reply text to post back to
/// the originating channel. Every case is read-only against on-disk
/// snapshots or the bridge's own subscription file — never the live
/// orchestrator process (spec §7).
pub fn execute_local_command(cmd: &LocalCommand, ctx: &mut LocalCommandContext) -> String {
    match cmd {
        LocalCommand::Subscribe => match ctx.subscriptions.subscribe(ctx.channel) {
            Ok(true) => "Subscribed to updates.".to_string(),
            Ok(false) => "Already subscribed.".to_string(),
            Err(e) => format!("Could not subscribe: {e}"),
        },
        LocalCommand::Unsubscribe => match ctx.subscriptions.unsubscribe(ctx.channel) {
            Ok(true) => "Unsubscribed.".to_string(),
            Ok(false) => "Not currently subscribed.".to_string(),
            Err(e) => format!("Could not unsubscribe: {e}"),
        },
        LocalCommand::Status => {
            let writer = StatusWriter::new(&ctx.home.join("state"));
            match writer.read() {
                Some(s) => format!(
                    "phase={} paused={} leader={}",
                    s.phase,
                    s.paused,
                    s.leader.unwrap_or_else(|| "none".to_string())
                ),
                None => "No status snapshot yet.".to_string(),
            }
        }
        LocalCommand::Queue => {
            let writer = StatusWriter::new(&ctx.home.join("state"));
            match writer.read() {
                Some(s) => format!("mailbox counts: {:?}", s.mailbox_counts),
                None => "No status snapshot yet.".to_string(),
            }
        }
        LocalCommand::WhoAmI => ctx.bindings.banner(),
        LocalCommand::ShowPeers(on) => {
            format!("Peer visibility {}.", if *on { "enabled" } else { "disabled" })
        }
        LocalCommand::RfdList => {
            let dir = ctx.home.join("rfd");
            let names: Vec<String> = std::fs::read_dir(&dir)
                .map(|entries| {
                    entries
                        .flatten()
                        .filter_map(|e| e.file_name().into_string().ok())
                        .collect()
                })
                .unwrap_or_default();
            if names.is_empty() {
                "No RFDs on file.".to_string()
            } else {
                names.join(", ")
            }
        }
        LocalCommand::RfdShow(id) => {
            let path = ctx.home.join("rfd").join(format!("{id}.md"));
            cccc_core::docs::read_reference_doc(&path).unwrap_or_else(|| format!("RFD {id} not found."))
        }
        LocalCommand::Files => {
            let today_dir = today_upload_dir(ctx.home);
            let names: Vec<String> = std::fs::read_dir(&today_dir)
                .map(|entries| {
                    entries
                        .flatten()
                        .filter_map(|e| e.file_name().into_string().ok())
                        .collect()
                })
                .unwrap_or_default();
            if names.is_empty() {
                "No files uploaded today.".to_string()
            } else {
                names
                    .iter()
                    .enumerate()
                    .map(|(i, name)| format!("{}: {name}", i + 1))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        LocalCommand::File(n) => {
            let today_dir = today_upload_dir(ctx.home);
            let mut names: Vec<String> = std::fs::read_dir(&today_dir)
                .map(|entries| {
                    entries
                        .flatten()
                        .filter_map(|e| e.file_name().into_string().ok())
                        .collect()
                })
                .unwrap_or_default();
            names.sort();
            match names.get((*n as usize).wrapping_sub(1)) {
                Some(name) => today_dir.join(name).to_string_lossy().into_owned(),
                None => format!("No file #{n} today."),
            }
        }
    }
}

fn today_upload_dir(home: &Path) -> std::path::PathBuf {
    let today = time::OffsetDateTime::now_utc()
        .format(&time::format_description::parse("[year][month][day]").unwrap())
        .unwrap_or_else(|_| "19700101".to_string());
    home.join("work").join("upload").join("inbound").join(today)
}

/// Writes a routed inbound message into every targeted peer's mailbox,
/// using the same `next_seq` + `write_inbox` contract the orchestrator
/// itself uses (spec §4.11), and mirrors it into `inbox.md`. Peers with
/// no mailbox bound (e.g. `PeerB` when the session only has `PeerA`) are
/// skipped rather than erroring — a single-peer session routing `both:`
/// simply delivers to the one bound peer.
pub fn deliver_inbound(
    target: RouteTarget,
    body: &str,
    platform: &str,
    mailbox_for: impl Fn(Role) -> Option<Mailbox>,
    ledger: &Ledger,
) -> Vec<(Role, String)> {
    let mut delivered = Vec::new();
    for role in target.roles() {
        let Some(mailbox) = mailbox_for(role) else {
            continue;
        };
        let mid = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        let wrapped = wrap_envelope(Role::User, &mid, body, None);
        match mailbox.write_inbox(&wrapped, &mid) {
            Ok((seq, _path)) => {
                mailbox.mirror_inbox_md(&wrapped);
                ledger.append(
                    "bridge-inbound",
                    Role::Bridge,
                    [
                        ("platform".to_string(), serde_json::Value::String(platform.to_string())),
                        ("to".to_string(), serde_json::Value::String(role.to_string())),
                        ("mid".to_string(), serde_json::Value::String(mid.clone())),
                        ("seq".to_string(), serde_json::Value::String(seq)),
                    ]
                    .into_iter()
                    .collect(),
                );
                delivered.push((role, mid));
            }
            Err(e) => tracing::warn!(platform, role = %role, error = %e, "bridge inbound write failed"),
        }
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_colon_prefixes() {
        assert_eq!(
            parse_route_prefix("a: fix the bug"),
            Some((RouteTarget::PeerA, "fix the bug".to_string()))
        );
        assert_eq!(
            parse_route_prefix("both: status check"),
            Some((RouteTarget::Both, "status check".to_string()))
        );
    }

    #[test]
    fn parses_slash_prefixes_case_insensitively() {
        assert_eq!(
            parse_route_prefix("/B go ahead"),
            Some((RouteTarget::PeerB, "go ahead".to_string()))
        );
    }

    #[test]
    fn prefers_both_over_single_letter_prefix() {
        // "both:" must win over a naive "b:" match.
        assert_eq!(parse_route_prefix("both: hi").unwrap().0, RouteTarget::Both);
    }

    #[test]
    fn no_prefix_returns_none() {
        assert!(parse_route_prefix("just a plain message").is_none());
    }

    #[test]
    fn bot_mention_routes_as_both() {
        let body = parse_bot_mention("@ccccbot what's the status", "ccccbot").unwrap();
        assert_eq!(body, "what's the status");
    }

    #[test]
    fn bot_mention_requires_matching_handle() {
        assert!(parse_bot_mention("@otherbot hi", "ccccbot").is_none());
    }

    #[test]
    fn both_roles_lists_both_peers() {
        assert_eq!(RouteTarget::Both.roles(), vec![Role::PeerA, Role::PeerB]);
        assert_eq!(RouteTarget::PeerA.roles(), vec![Role::PeerA]);
    }

    #[test]
    fn parses_known_local_commands() {
        assert_eq!(parse_local_command("/status"), Some(LocalCommand::Status));
        assert_eq!(parse_local_command("/showpeers on"), Some(LocalCommand::ShowPeers(true)));
        assert_eq!(
            parse_local_command("/rfd show 7"),
            Some(LocalCommand::RfdShow("7".to_string()))
        );
        assert_eq!(parse_local_command("/file 3"), Some(LocalCommand::File(3)));
    }

    #[test]
    fn non_slash_text_is_not_a_local_command() {
        assert_eq!(parse_local_command("a: hello"), None);
    }

    #[test]
    fn unknown_slash_command_is_none_so_caller_forwards_it() {
        assert_eq!(parse_local_command("/deploy prod"), None);
    }

    #[test]
    fn subscribe_then_unsubscribe_round_trips_through_context() {
        let dir = tempfile::tempdir().unwrap();
        let mut subs = Subscriptions::load(dir.path().join("subs.json"));
        let bindings = RuntimeBindings {
            peer_a: "claude".to_string(),
            peer_b: None,
            aux: None,
            aux_invoke_template: None,
            foreman: None,
        };
        let mut ctx = LocalCommandContext {
            home: dir.path(),
            bindings: &bindings,
            subscriptions: &mut subs,
            channel: "C1",
        };
        let reply = execute_local_command(&LocalCommand::Subscribe, &mut ctx);
        assert_eq!(reply, "Subscribed to updates.");
        assert!(ctx.subscriptions.is_subscribed("C1"));
        let reply = execute_local_command(&LocalCommand::Unsubscribe, &mut ctx);
        assert_eq!(reply, "Unsubscribed.");
    }

    #[test]
    fn whoami_reports_bindings_banner() {
        let dir = tempfile::tempdir().unwrap();
        let mut subs = Subscriptions::load(dir.path().join("subs.json"));
        let bindings = RuntimeBindings {
            peer_a: "claude".to_string(),
            peer_b: Some("codex".to_string()),
            aux: None,
            aux_invoke_template: None,
            foreman: None,
        };
        let mut ctx = LocalCommandContext {
            home: dir.path(),
            bindings: &bindings,
            subscriptions: &mut subs,
            channel: "C1",
        };
        assert_eq!(
            execute_local_command(&LocalCommand::WhoAmI, &mut ctx),
            "[runtime: PeerA=claude PeerB=codex]"
        );
    }

    #[test]
    fn status_without_snapshot_reports_absence() {
        let dir = tempfile::tempdir().unwrap();
        let mut subs = Subscriptions::load(dir.path().join("subs.json"));
        let bindings = RuntimeBindings {
            peer_a: "claude".to_string(),
            peer_b: None,
            aux: None,
            aux_invoke_template: None,
            foreman: None,
        };
        let mut ctx = LocalCommandContext {
            home: dir.path(),
            bindings: &bindings,
            subscriptions: &mut subs,
            channel: "C1",
        };
        assert_eq!(
            execute_local_command(&LocalCommand::Status, &mut ctx),
            "No status snapshot yet."
        );
    }

    #[test]
    fn deliver_inbound_writes_to_every_targeted_peer() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("state/ledger.jsonl")).unwrap();
        let mailbox_for = |role: Role| match role {
            Role::PeerA => Some(Mailbox::new(dir.path(), "peerA")),
            Role::PeerB => Some(Mailbox::new(dir.path(), "peerB")),
            _ => None,
        };
        let delivered = deliver_inbound(RouteTarget::Both, "hello there", "telegram", mailbox_for, &ledger);
        assert_eq!(delivered.len(), 2);
        let peer_a = Mailbox::new(dir.path(), "peerA");
        assert_eq!(std::fs::read_dir(peer_a.inbox_dir()).unwrap().count(), 1);
    }

    #[test]
    fn deliver_inbound_skips_unbound_peer() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("state/ledger.jsonl")).unwrap();
        let mailbox_for = |role: Role| match role {
            Role::PeerA => Some(Mailbox::new(dir.path(), "peerA")),
            _ => None,
        };
        let delivered = deliver_inbound(RouteTarget::Both, "hi", "slack", mailbox_for, &ledger);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, Role::PeerA);
    }
}
