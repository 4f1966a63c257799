//! `RoutingCore` (spec §9: "Global mutable state becomes a `RoutingCore`
//! owned value passed by reference into operations"). Wires C1–C10
//! together and drives one tick of the main loop described in spec §2:
//! drain commands, scan mailboxes, drive handoffs, tick nudges, tick
//! auto-compact/foreman.

use crate::autocompact::AutoCompactSupervisor;
use crate::commands::{classify, CommandKind, CommandQueue, CommandRecord};
use crate::config::{Policies, RuntimeBindings};
use crate::cursor::Cursor;
use crate::events::{wrap_envelope, Role};
use crate::handoff::{Engine, HandoffOpts, HandoffOutcome};
use crate::ledger::Ledger;
use crate::mailbox::Mailbox;
use crate::nudge::{NudgeConfig, NudgeEngine};
use crate::outbox::Outbox;
use crate::scanner::{scan_peer, ScanReport};
use crate::selfcheck;
use crate::status::{StatusSnapshot, StatusWriter};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Owns both peer mailboxes as named fields rather than a map keyed by
/// `Role`, so scanning peer A against peer B's inbox is two disjoint
/// struct-field borrows the compiler can see through directly (a
/// `HashMap<Role, Mailbox>` would force either cloning or an unsafe
/// workaround to hand the scanner both halves of the pair at once).
struct Mailboxes {
    peer_a: Mailbox,
    peer_b: Option<Mailbox>,
}

impl Mailboxes {
    fn get(&self, role: Role) -> Option<&Mailbox> {
        match role {
            Role::PeerA => Some(&self.peer_a),
            Role::PeerB => self.peer_b.as_ref(),
            _ => None,
        }
    }

    fn roles(&self) -> Vec<Role> {
        let mut roles = vec![Role::PeerA];
        if self.peer_b.is_some() {
            roles.push(Role::PeerB);
        }
        roles
    }
}

pub struct RoutingCore {
    home: PathBuf,
    pub bindings: RuntimeBindings,
    pub ledger: Ledger,
    pub outbox: Outbox,
    pub commands: CommandQueue,
    pub engine: Engine,
    pub nudge: NudgeEngine,
    pub autocompact: AutoCompactSupervisor,
    mailboxes: Mailboxes,
    commands_cursor: Cursor,
    verbose: bool,
    protected_paths: Vec<String>,
    max_patch_lines: usize,
}

/// Per-tick summary, useful for tests and for the `cccc` binary's log
/// line at the end of a loop iteration.
#[derive(Debug, Default)]
pub struct TickReport {
    pub commands_processed: usize,
    pub scans: Vec<(Role, ScanReport)>,
    pub timeouts_resolved: Vec<Role>,
}

impl RoutingCore {
    pub fn new(home: &Path, bindings: RuntimeBindings, policies: &Policies) -> std::io::Result<Self> {
        let state_dir = home.join("state");
        std::fs::create_dir_all(&state_dir)?;
        let ledger = Ledger::open(state_dir.join("ledger.jsonl"))?;
        let outbox = Outbox::open(state_dir.join("outbox.jsonl"))?;
        let commands = CommandQueue::new(&state_dir)?;
        let engine = Engine::new(home, policies);
        let nudge = NudgeEngine::new(home, &NudgeConfig::default());
        let autocompact = AutoCompactSupervisor::new(crate::autocompact::AutoCompactConfig {
            enabled: policies.auto_compact_enabled,
            min_interval_seconds: policies.auto_compact_min_interval_seconds as f64,
            min_messages_since_last: policies.auto_compact_min_messages,
            idle_threshold_seconds: policies.auto_compact_idle_threshold_seconds as f64,
            check_interval_seconds: policies.auto_compact_check_interval_seconds as f64,
        });

        let mailboxes = Mailboxes {
            peer_a: Mailbox::new(home, "peerA"),
            peer_b: bindings.peer_b.as_ref().map(|_| Mailbox::new(home, "peerB")),
        };

        Ok(RoutingCore {
            home: home.to_path_buf(),
            bindings,
            ledger,
            outbox,
            commands,
            engine,
            nudge,
            autocompact,
            mailboxes,
            commands_cursor: Cursor::default(),
            verbose: false,
            protected_paths: policies.protected_paths.clone(),
            max_patch_lines: policies.max_patch_lines,
        })
    }

    pub fn mailbox(&self, role: Role) -> Option<&Mailbox> {
        self.mailboxes.get(role)
    }

    /// One main-loop tick (spec §2 control flow a–e).
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        // (a) drain the command queue
        let (mut commands, next_cursor) = match self.commands.drain(self.commands_cursor) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "failed to drain command queue");
                (Vec::new(), self.commands_cursor)
            }
        };
        self.commands_cursor = next_cursor;
        CommandQueue::synthesize_missing_ids(&mut commands);
        for cmd in &commands {
            self.dispatch_command(cmd);
        }
        report.commands_processed = commands.len();

        // (b) scan each peer's mailbox for new structured outputs. Going
        // through `self.mailboxes.peer_a`/`.peer_b` as direct fields (not
        // behind a method taking `&self`) lets `self.engine`/`self.nudge`
        // stay independently borrowable below.
        if let Some(r) = self.scan_one_peer(Role::PeerA) {
            if r.to_user_emitted {
                self.autocompact.note_activity(Role::PeerA);
            }
            report.scans.push((Role::PeerA, r));
        }
        if let Some(r) = self.scan_one_peer(Role::PeerB) {
            if r.to_user_emitted {
                self.autocompact.note_activity(Role::PeerB);
            }
            report.scans.push((Role::PeerB, r));
        }

        // (c) drive the handoff engine: resolve timeouts, drain queues.
        // "Activity since" is the scanner's `last_progress_ts` (bumped by
        // `mark_progress` on any to_user/to_peer output) — the signal
        // that distinguishes a soft-ack from a hard drop (spec §4.4).
        let nudge = &self.nudge;
        let timeouts = self.engine.tick_timeouts(&self.ledger, |receiver, since| {
            nudge.state_for(receiver).last_progress_ts >= since
        });
        for receiver in &timeouts {
            self.drain_queue_for(*receiver);
        }
        report.timeouts_resolved = timeouts;

        // self-check / system-refresh cadence follow-up (spec §4.7): the
        // engine only decides *when*; composing the text and re-entering
        // `send_handoff` happens here, once per tick, after the engine's
        // own mutable borrow from step (c) has ended.
        let pending = self.engine.take_pending_self_checks();
        for (receiver, is_refresh) in pending {
            let text = if is_refresh {
                selfcheck::compose_system_refresh(receiver, "RULES", None)
            } else {
                selfcheck::compose_self_check(receiver, None)
            };
            self.send_from_system(receiver, &text);
        }

        // (d) auto-compact tick (peer CLI compaction is driven from the
        // `cccc` binary's pane-aware loop; here we only evaluate and log
        // skip reasons, since `RoutingCore` has no `PaneIo` of its own).
        if self.autocompact.should_tick() {
            for role in self.mailboxes.roles() {
                let decision = self.autocompact.should_auto_compact(
                    role,
                    false,
                    self.engine.has_inflight(role),
                    self.engine.queue_len(role),
                );
                if let Err(reason) = decision {
                    tracing::debug!(?reason, peer = %role, "auto-compact skipped");
                }
            }
        }

        report
    }

    fn scan_one_peer(&mut self, peer: Role) -> Option<ScanReport> {
        let other = peer.other_peer();
        let rfd_dir = self.home.join("rfd");
        let report = match (peer, other) {
            (Role::PeerA, Role::PeerB) => {
                let peer_b = self.mailboxes.peer_b.as_ref()?;
                scan_peer(
                    Role::PeerA,
                    &self.mailboxes.peer_a,
                    peer_b,
                    &mut self.engine,
                    &mut self.nudge,
                    &self.ledger,
                    &self.outbox,
                    &self.protected_paths,
                    self.max_patch_lines,
                    &rfd_dir,
                )
            }
            (Role::PeerB, Role::PeerA) => {
                let peer_b = self.mailboxes.peer_b.as_ref()?;
                scan_peer(
                    Role::PeerB,
                    peer_b,
                    &self.mailboxes.peer_a,
                    &mut self.engine,
                    &mut self.nudge,
                    &self.ledger,
                    &self.outbox,
                    &self.protected_paths,
                    self.max_patch_lines,
                    &rfd_dir,
                )
            }
            _ => return None,
        };
        Some(report)
    }

    fn drain_queue_for(&mut self, receiver: Role) {
        match receiver {
            Role::PeerA => {
                self.engine.drain_queue(Role::PeerA, &self.mailboxes.peer_a, &mut self.nudge, &self.ledger);
            }
            Role::PeerB => {
                if let Some(mailbox) = &self.mailboxes.peer_b {
                    self.engine.drain_queue(Role::PeerB, mailbox, &mut self.nudge, &self.ledger);
                }
            }
            _ => {}
        }
    }

    fn send_from_system(&mut self, receiver: Role, text: &str) {
        match receiver {
            Role::PeerA => {
                self.engine.send_handoff(
                    Role::System,
                    Role::PeerA,
                    text,
                    HandoffOpts::default(),
                    &self.mailboxes.peer_a,
                    &mut self.nudge,
                    &self.ledger,
                );
            }
            Role::PeerB => {
                if let Some(mailbox) = &self.mailboxes.peer_b {
                    self.engine.send_handoff(
                        Role::System,
                        Role::PeerB,
                        text,
                        HandoffOpts::default(),
                        mailbox,
                        &mut self.nudge,
                        &self.ledger,
                    );
                }
            }
            _ => {}
        }
    }

    fn dispatch_command(&mut self, cmd: &CommandRecord) {
        let text = cmd
            .args
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let ok = match classify(&cmd.kind) {
            CommandKind::SendA => self.enqueue_from_user(Role::PeerA, &text),
            CommandKind::SendB => self.enqueue_from_user(Role::PeerB, &text),
            CommandKind::SendBoth => {
                let a = self.enqueue_from_user(Role::PeerA, &text);
                let b = self.enqueue_from_user(Role::PeerB, &text);
                a && b
            }
            CommandKind::Pause => {
                self.engine.set_paused(true);
                true
            }
            CommandKind::Resume => {
                self.engine.set_paused(false);
                self.renudge_nonempty_inboxes();
                true
            }
            CommandKind::Verbose => {
                self.verbose = !self.verbose;
                true
            }
            CommandKind::SysRefresh
            | CommandKind::Restart
            | CommandKind::InboxPolicy
            | CommandKind::Launch
            | CommandKind::Quit
            | CommandKind::Foreman
            | CommandKind::Aux
            | CommandKind::Passthru
            | CommandKind::Focus
            | CommandKind::Review => true,
            CommandKind::Unknown => {
                tracing::warn!(kind = %cmd.kind, "unknown command type");
                false
            }
        };
        if let Some(id) = &cmd.id {
            let _ = self.commands.append_result(id, ok, if ok { "ok" } else { "failed" }, &cmd.source);
        }
    }

    fn enqueue_from_user(&mut self, receiver: Role, text: &str) -> bool {
        if self.mailboxes.get(receiver).is_none() {
            return false;
        }
        let wrapped = wrap_envelope(Role::User, "pending", text, None);
        let outcome = match receiver {
            Role::PeerA => self.engine.send_handoff(
                Role::User,
                Role::PeerA,
                &wrapped,
                HandoffOpts::default(),
                &self.mailboxes.peer_a,
                &mut self.nudge,
                &self.ledger,
            ),
            Role::PeerB => {
                let Some(mailbox) = &self.mailboxes.peer_b else {
                    return false;
                };
                self.engine.send_handoff(
                    Role::User,
                    Role::PeerB,
                    &wrapped,
                    HandoffOpts::default(),
                    mailbox,
                    &mut self.nudge,
                    &self.ledger,
                )
            }
            _ => return false,
        };
        !matches!(outcome, HandoffOutcome::DroppedEmptyBody | HandoffOutcome::DroppedLowSignal)
    }

    fn renudge_nonempty_inboxes(&mut self) {
        for peer in self.mailboxes.roles() {
            let has_mail = self
                .mailboxes
                .get(peer)
                .map(|m| std::fs::read_dir(m.inbox_dir()).map(|mut it| it.next().is_some()).unwrap_or(false))
                .unwrap_or(false);
            if has_mail {
                self.nudge.maybe_send(peer, true);
                self.ledger.append("nudge", Role::System, Default::default());
            }
        }
    }

    /// Relays foreman output to its indicated receivers as a `FROM_USER`
    /// handoff (spec §4.10: "foreman speaks in the user's voice"), driven
    /// by the `cccc` binary once a foreman run completes.
    pub fn relay_foreman_output(&mut self, receivers: &[Role], body: &str) {
        let wrapped = wrap_envelope(Role::User, "foreman", body, None);
        for receiver in receivers {
            match receiver {
                Role::PeerA => {
                    self.engine.send_handoff(
                        Role::Foreman,
                        Role::PeerA,
                        &wrapped,
                        HandoffOpts::default(),
                        &self.mailboxes.peer_a,
                        &mut self.nudge,
                        &self.ledger,
                    );
                }
                Role::PeerB => {
                    if let Some(mailbox) = &self.mailboxes.peer_b {
                        self.engine.send_handoff(
                            Role::Foreman,
                            Role::PeerB,
                            &wrapped,
                            HandoffOpts::default(),
                            mailbox,
                            &mut self.nudge,
                            &self.ledger,
                        );
                    }
                }
                _ => {}
            }
        }
    }

    pub fn write_status(&self) {
        let writer = StatusWriter::new(&self.home.join("state"));
        let mut mailbox_counts = HashMap::new();
        for role in self.mailboxes.roles() {
            if let Some(mailbox) = self.mailboxes.get(role) {
                let count = std::fs::read_dir(mailbox.inbox_dir()).map(|it| it.count()).unwrap_or(0);
                mailbox_counts.insert(role.to_string(), count);
            }
        }
        let _ = writer.write(StatusSnapshot {
            session: "default".to_string(),
            paused: self.engine.is_paused(),
            phase: "running".to_string(),
            leader: None,
            mailbox_counts,
            mailbox_last: HashMap::new(),
            handoff_filter_enabled: true,
            aux: self.bindings.aux.clone(),
            foreman: self.bindings.foreman.clone(),
            ts: String::new(),
        });
    }
}
