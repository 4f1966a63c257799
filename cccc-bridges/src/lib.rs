//! C11 — chat-platform bridges (spec §4.11). A shared outbox-cursor
//! consumer contract, inbound routing-prefix parsing, attachment
//! handling, and PII redaction, behind one `PlatformAdapter`
//! implementation per chat platform.

pub mod attachments;
pub mod consumer;
pub mod discord;
pub mod inbound;
pub mod redact;
pub mod singleton;
pub mod slack;
pub mod telegram;
pub mod wecom;

pub use consumer::{BridgeRuntime, PlatformAdapter};
