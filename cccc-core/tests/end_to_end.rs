//! End-to-end scenarios exercising `RoutingCore` as a whole (spec §8),
//! distinct from the per-module unit tests embedded in each source file.

use cccc_core::config::Policies;
use cccc_core::{Role, RoutingCore, RuntimeBindings};
use std::fs;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

fn two_peer_bindings() -> RuntimeBindings {
    RuntimeBindings {
        peer_a: "claude".to_string(),
        peer_b: Some("codex".to_string()),
        aux: None,
        aux_invoke_template: None,
        foreman: None,
    }
}

/// Scenario 3: PeerA's `to_peer.md` ends with a trailing `insight` block
/// → the scanner forwards it into PeerB's inbox wrapped as `<FROM_PeerA>`,
/// and PeerA's `to_user.md` produces one outbox `to_user` event.
#[test]
fn peer_to_peer_handoff_with_insight_reaches_peer_b() {
    let dir = tempdir().unwrap();
    let mut core = RoutingCore::new(dir.path(), two_peer_bindings(), &Policies::default()).unwrap();

    let peer_a_mailbox_dir = dir.path().join("mailbox/peerA");
    fs::create_dir_all(&peer_a_mailbox_dir).unwrap();
    fs::write(peer_a_mailbox_dir.join("to_user.md"), "<TO_USER>x</TO_USER>").unwrap();
    fs::write(
        peer_a_mailbox_dir.join("to_peer.md"),
        "<TO_PEER>\nwork on the thing, here is a long enough rationale\n</TO_PEER>\n```insight\nexplore: y\n```\n",
    )
    .unwrap();

    let report = core.tick();
    let (_, scan) = report.scans.iter().find(|(role, _)| *role == Role::PeerA).unwrap();
    assert!(scan.to_user_emitted);
    assert!(scan.to_peer_forwarded);

    let peer_b_inbox = core.mailbox(Role::PeerB).unwrap().inbox_dir();
    let files: Vec<_> = fs::read_dir(&peer_b_inbox).unwrap().collect();
    assert_eq!(files.len(), 1);
    let content = fs::read_to_string(files[0].as_ref().unwrap().path()).unwrap();
    assert!(content.starts_with("<FROM_PeerA>"));

    let outbox_text = fs::read_to_string(dir.path().join("state/outbox.jsonl")).unwrap();
    assert!(outbox_text.contains("\"type\":\"to_user\""));
}

/// Scenario 3 (negative branch): a `to_peer.md` with no trailing insight
/// block never reaches PeerB; PeerA instead gets a `<FROM_SYSTEM>` teach
/// message in its own inbox.
#[test]
fn peer_to_peer_handoff_without_insight_teaches_sender_not_peer_b() {
    let dir = tempdir().unwrap();
    let mut core = RoutingCore::new(dir.path(), two_peer_bindings(), &Policies::default()).unwrap();

    let peer_a_mailbox_dir = dir.path().join("mailbox/peerA");
    fs::create_dir_all(&peer_a_mailbox_dir).unwrap();
    fs::write(peer_a_mailbox_dir.join("to_peer.md"), "<TO_PEER>work, no insight block here</TO_PEER>").unwrap();

    core.tick();

    let peer_b_inbox = core.mailbox(Role::PeerB).unwrap().inbox_dir();
    assert_eq!(fs::read_dir(&peer_b_inbox).unwrap().count(), 0);

    let peer_a_inbox = core.mailbox(Role::PeerA).unwrap().inbox_dir();
    let files: Vec<_> = fs::read_dir(&peer_a_inbox).unwrap().collect();
    assert_eq!(files.len(), 1);
    let content = fs::read_to_string(files[0].as_ref().unwrap().path()).unwrap();
    assert!(content.contains("missing the required trailing"));
}

/// Scenario 6: a `require_mid` handoff to an idle peer (no to_user/to_peer
/// activity in the window) resolves as `handoff-timeout-drop` once
/// `ack_timeout_seconds * (1+resend_attempts)` has elapsed.
#[test]
fn timeout_drop_when_peer_stays_idle() {
    let dir = tempdir().unwrap();
    let mut policies = Policies::default();
    policies.ack_timeout_seconds = 0;
    policies.resend_attempts = 0;
    let mut core = RoutingCore::new(dir.path(), two_peer_bindings(), &policies).unwrap();

    let probe_mailbox = cccc_core::Mailbox::new(dir.path(), "peerA");
    core.engine.send_handoff(
        Role::System,
        Role::PeerA,
        "idle-peer probe message, long enough to clear the low-signal filter",
        cccc_core::HandoffOpts { require_mid: true },
        &probe_mailbox,
        &mut core.nudge,
        &core.ledger,
    );
    thread::sleep(Duration::from_millis(5));
    core.tick();

    let tail = core.ledger.tail(20);
    assert!(tail.iter().any(|e| e.kind == "handoff-timeout-drop"));
    assert!(!tail.iter().any(|e| e.kind == "handoff-timeout-soft-ack"));
}

/// Scenario 6 (other branch): if the peer produces `to_user` activity
/// after the handoff was sent, the same timeout resolves as a soft-ack
/// instead of a drop.
#[test]
fn timeout_soft_acks_when_peer_shows_activity() {
    let dir = tempdir().unwrap();
    let mut policies = Policies::default();
    policies.ack_timeout_seconds = 0;
    policies.resend_attempts = 0;
    let mut core = RoutingCore::new(dir.path(), two_peer_bindings(), &policies).unwrap();

    let probe_mailbox = cccc_core::Mailbox::new(dir.path(), "peerA");
    core.engine.send_handoff(
        Role::System,
        Role::PeerA,
        "idle-peer probe message, long enough to clear the low-signal filter",
        cccc_core::HandoffOpts { require_mid: true },
        &probe_mailbox,
        &mut core.nudge,
        &core.ledger,
    );
    // peer "responds" before the tick that resolves the timeout
    core.nudge.mark_progress(Role::PeerA, None);
    thread::sleep(Duration::from_millis(5));
    core.tick();

    let tail = core.ledger.tail(20);
    assert!(tail.iter().any(|e| e.kind == "handoff-timeout-soft-ack"));
    assert!(!tail.iter().any(|e| e.kind == "handoff-timeout-drop"));
}

/// Scenario 4: two "bridge processes" allocating sequence numbers for the
/// same peer concurrently never collide or skip.
#[test]
fn concurrent_sequence_allocation_has_no_duplicates() {
    let dir = tempdir().unwrap();
    let core = RoutingCore::new(dir.path(), two_peer_bindings(), &Policies::default()).unwrap();
    let _ = core.mailbox(Role::PeerA).unwrap().next_seq().unwrap(); // seeds max_before = 1

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let home = dir.path().to_path_buf();
            thread::spawn(move || {
                let mailbox = cccc_core::Mailbox::new(&home, "peerA");
                (0..25).map(|_| mailbox.next_seq().unwrap()).collect::<Vec<_>>()
            })
        })
        .collect();

    let mut all_seqs: Vec<String> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
    all_seqs.sort();
    all_seqs.dedup();
    assert_eq!(all_seqs.len(), 100);
}
