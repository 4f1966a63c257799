//! `PaneIo`: the terminal-multiplexer capability boundary (spec §9,
//! §4.5 "paste_when_ready"). Panes are opaque addressable sinks/sources
//! of text — tmux, screen, a direct PTY, or a headless stub all
//! implement the same three operations, so the routing core never knows
//! which multiplexer (if any) is underneath.

use crate::error::Result;

pub trait PaneIo: Send + Sync {
    /// Waits up to `timeout_seconds` for the pane to look idle (e.g. a
    /// shell prompt, not mid-output) before pasting `text`. Returns
    /// `Ok(true)` if the paste was delivered, `Ok(false)` if the pane
    /// never went idle within the timeout.
    fn paste_when_ready(&self, pane: &str, text: &str, timeout_seconds: f64) -> Result<bool>;

    /// Captures the last `lines` lines currently visible in `pane`.
    fn capture(&self, pane: &str, lines: usize) -> Result<String>;

    /// Respawns `pane` running `cmd`, replacing whatever was running
    /// there (spec §4.8 `restart` command).
    fn respawn(&self, pane: &str, cmd: &str) -> Result<()>;
}

/// A `PaneIo` that records every call instead of touching a real
/// terminal — used by tests and by headless deployments that only care
/// about the mailbox/ledger side effects of a nudge, not the pane paste
/// itself.
#[derive(Default)]
pub struct NullPane;

impl PaneIo for NullPane {
    fn paste_when_ready(&self, _pane: &str, _text: &str, _timeout_seconds: f64) -> Result<bool> {
        Ok(true)
    }

    fn capture(&self, _pane: &str, _lines: usize) -> Result<String> {
        Ok(String::new())
    }

    fn respawn(&self, _pane: &str, _cmd: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_pane_always_reports_success() {
        let pane = NullPane;
        assert!(pane.paste_when_ready("peerA", "hi", 1.0).unwrap());
        assert_eq!(pane.capture("peerA", 10).unwrap(), "");
        assert!(pane.respawn("peerA", "claude").is_ok());
    }
}
