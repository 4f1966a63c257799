//! Error taxonomy for the routing core (spec §7).
//!
//! Each variant corresponds to one of the error *categories* the design
//! calls out, not to a specific failure site — callers match on category
//! to decide whether to retry, soft-ack, drop, or surface a warning.

use std::path::PathBuf;

/// Library-level error type. Binaries wrap this in `anyhow::Error` at
/// their boundary; within `cccc-core` every fallible operation returns
/// `Result<T, CoreError>`.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Category 1: missing required actor, invalid role binding. Fatal at
    /// launch.
    #[error("configuration error: {0}")]
    Config(String),

    /// Category 2: cannot acquire the inbox sequence lock after retrying
    /// and falling back to the mutex-directory.
    #[error("locking error for {path}: {reason}")]
    Locking { path: PathBuf, reason: String },

    /// Category 3: cannot write an inbox file, or pane paste failed.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// Category 4: malformed YAML/JSONL/command. Always recoverable —
    /// the caller logs and skips the offending line.
    #[error("parse error: {0}")]
    Parse(String),

    /// Category 5: bridge outbound post failed.
    #[error("network error: {0}")]
    Network(String),

    /// Category 6: an awaited acknowledgement never arrived.
    #[error("timeout waiting for {0}")]
    Timeout(String),

    /// Category 7: patch touches a protected path, exceeds the line
    /// budget, or requires an unresolved RFD.
    #[error("policy rejected: {0}")]
    PolicyRejected(String),

    /// Category 8: platform rate limit.
    #[error("platform quota exceeded: {0}")]
    Quota(String),

    /// Catch-all for filesystem errors not covered by a more specific
    /// category above.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// True for categories that must never abort the caller's loop —
    /// every category in this taxonomy is actually in this set (per §7's
    /// propagation policy), but call sites use this to make the "log and
    /// continue" intent explicit at the point of use.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, CoreError::Config(_))
    }
}
