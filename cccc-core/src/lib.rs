//! Core routing engine for a two-peer, file-mediated agent orchestration
//! session: an append-only ledger, per-peer mailboxes, the handoff and
//! nudge subsystems, the command queue, and the auto-compact/foreman
//! schedulers. Bridges and the `cccc` binary depend on this crate and
//! never duplicate its file-format or state-machine logic.

pub mod autocompact;
pub mod commands;
pub mod config;
pub mod cursor;
pub mod docs;
pub mod error;
pub mod events;
pub mod foreman;
pub mod handoff;
pub mod ledger;
pub mod lock;
pub mod mailbox;
pub mod nudge;
pub mod outbox;
pub mod pane;
pub mod patch;
pub mod runtime;
pub mod scanner;
pub mod selfcheck;
pub mod status;

pub use config::{AgentsConfig, CliProfile, CliProfiles, ForemanSettings, Policies, RuntimeBindings};
pub use error::{CoreError, Result};
pub use events::{now_rfc3339, Event, Role};
pub use foreman::{Foreman, ForemanConfig, ForemanOutcome};
pub use handoff::{Engine as HandoffEngine, HandoffOpts, HandoffOutcome};
pub use ledger::Ledger;
pub use mailbox::{InboxStartupPolicy, Mailbox};
pub use nudge::{NudgeConfig, NudgeEngine};
pub use outbox::{Outbox, OutboxEvent};
pub use runtime::{RoutingCore, TickReport};
