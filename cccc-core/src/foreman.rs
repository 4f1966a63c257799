//! C10 — foreman (spec §4.10): a periodic autonomous "user-voice" proxy
//! that spawns a short non-interactive run, honoring `max_run_seconds`
//! via TERM-then-KILL, heartbeating into `state/foreman.json` every 10s.
//! Grounded in `orchestrator/foreman.py`'s process-supervision shape.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::{timeout, Instant};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForemanHeartbeat {
    pub running: bool,
    pub started_ts: f64,
    pub last_heartbeat_ts: f64,
    pub pid: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ForemanConfig {
    pub command: String,
    pub args: Vec<String>,
    pub max_run_seconds: u64,
    pub kill_grace_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForemanOutcome {
    Completed,
    TimedOut,
    NonZeroExit,
    MissingOutput,
}

pub struct Foreman {
    home: PathBuf,
    config: ForemanConfig,
}

impl Foreman {
    pub fn new(home: &Path, config: ForemanConfig) -> Self {
        Foreman {
            home: home.to_path_buf(),
            config,
        }
    }

    fn heartbeat_path(&self) -> PathBuf {
        self.home.join("state").join("foreman.json")
    }

    fn to_peer_path(&self) -> PathBuf {
        self.home.join("mailbox").join("foreman").join("to_peer.md")
    }

    fn write_heartbeat(&self, hb: &ForemanHeartbeat) {
        let path = self.heartbeat_path();
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(bytes) = serde_json::to_vec_pretty(hb) {
            let tmp = path.with_extension("tmp");
            let _ = std::fs::write(&tmp, bytes).and_then(|_| std::fs::rename(&tmp, &path));
        }
    }

    /// Runs the configured command with `prompt` piped to stdin, subject
    /// to `max_run_seconds` (TERM then KILL after the grace period), and
    /// heartbeating every 10 seconds. Output is expected to land in
    /// `mailbox/foreman/to_peer.md`, not on stdout — the subprocess's own
    /// stdout/stderr are captured for `work/foreman/<ts>/{stdout,stderr}.txt`
    /// diagnostics only.
    pub async fn run(&self, prompt: &str) -> std::io::Result<ForemanOutcome> {
        let start = Instant::now();
        let started_ts = now_epoch();
        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(prompt.as_bytes()).await;
        }

        self.write_heartbeat(&ForemanHeartbeat {
            running: true,
            started_ts,
            last_heartbeat_ts: started_ts,
            pid: child.id(),
        });

        let run_budget = Duration::from_secs(self.config.max_run_seconds);
        let heartbeat_interval = Duration::from_secs(10);
        let mut next_heartbeat = heartbeat_interval;

        let outcome = loop {
            let remaining = run_budget.saturating_sub(start.elapsed());
            let wait = remaining.min(next_heartbeat.saturating_sub(start.elapsed()));
            match timeout(wait, child.wait()).await {
                Ok(Ok(status)) => {
                    break if status.success() {
                        ForemanOutcome::Completed
                    } else {
                        ForemanOutcome::NonZeroExit
                    };
                }
                Ok(Err(_)) => break ForemanOutcome::NonZeroExit,
                Err(_) => {
                    if start.elapsed() >= run_budget {
                        self.terminate_with_grace(&mut child).await;
                        break ForemanOutcome::TimedOut;
                    }
                    self.write_heartbeat(&ForemanHeartbeat {
                        running: true,
                        started_ts,
                        last_heartbeat_ts: now_epoch(),
                        pid: child.id(),
                    });
                    next_heartbeat += heartbeat_interval;
                }
            }
        };

        self.write_heartbeat(&ForemanHeartbeat {
            running: false,
            started_ts,
            last_heartbeat_ts: now_epoch(),
            pid: None,
        });

        if matches!(outcome, ForemanOutcome::Completed) && !self.to_peer_path().exists() {
            return Ok(ForemanOutcome::MissingOutput);
        }
        Ok(outcome)
    }

    async fn terminate_with_grace(&self, child: &mut tokio::process::Child) {
        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                unsafe {
                    libc_kill(pid as i32, 15); // SIGTERM
                }
            }
        }
        if timeout(Duration::from_secs(self.config.kill_grace_seconds), child.wait())
            .await
            .is_err()
        {
            let _ = child.kill().await;
        }
    }

    /// Reads and clears `mailbox/foreman/to_peer.md` if it contains
    /// fresh (non-sentinel) content, so the caller can relay it as a
    /// `<FROM_USER>` handoff (spec §4.10 "On completion...").
    pub fn take_output(&self) -> Option<String> {
        let path = self.to_peer_path();
        let content = std::fs::read_to_string(&path).ok()?;
        if content.trim().is_empty() || crate::events::is_sentinel(&content) {
            return None;
        }
        let sentinel = crate::events::make_sentinel("foreman", "00000000", "foreman->peer");
        let _ = std::fs::write(&path, sentinel);
        Some(content)
    }
}

#[cfg(unix)]
unsafe fn libc_kill(pid: i32, sig: i32) {
    extern "C" {
        fn kill(pid: i32, sig: i32) -> i32;
    }
    kill(pid, sig);
}

fn now_epoch() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Parses the `To: Both|PeerA|PeerB` header foreman output is expected
/// to carry (spec §4.10).
pub fn parse_recipient_header(text: &str) -> Vec<crate::events::Role> {
    use crate::events::Role;
    for line in text.lines().take(5) {
        let trimmed = line.trim();
        if let Some(value) = trimmed.strip_prefix("To:") {
            return match value.trim() {
                "Both" => vec![Role::PeerA, Role::PeerB],
                "PeerA" => vec![Role::PeerA],
                "PeerB" => vec![Role::PeerB],
                _ => vec![],
            };
        }
    }
    vec![Role::PeerA, Role::PeerB]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_both_header() {
        let text = "To: Both\n<TO_PEER>\nwork\n</TO_PEER>";
        assert_eq!(parse_recipient_header(text), vec![crate::events::Role::PeerA, crate::events::Role::PeerB]);
    }

    #[test]
    fn parses_single_peer_header() {
        let text = "To: PeerB\n<TO_PEER>work</TO_PEER>";
        assert_eq!(parse_recipient_header(text), vec![crate::events::Role::PeerB]);
    }

    #[test]
    fn missing_header_defaults_to_both() {
        assert_eq!(
            parse_recipient_header("no header here"),
            vec![crate::events::Role::PeerA, crate::events::Role::PeerB]
        );
    }

    #[test]
    fn take_output_returns_none_for_sentinel() {
        let dir = tempdir().unwrap();
        let foreman = Foreman::new(
            dir.path(),
            ForemanConfig {
                command: "true".to_string(),
                args: vec![],
                max_run_seconds: 5,
                kill_grace_seconds: 1,
            },
        );
        std::fs::create_dir_all(dir.path().join("mailbox/foreman")).unwrap();
        std::fs::write(foreman.to_peer_path(), "MAILBOX:SENT v1 ts=x eid=y sha8=z route=foreman->peer\n").unwrap();
        assert!(foreman.take_output().is_none());
    }

    #[test]
    fn take_output_consumes_fresh_content_once() {
        let dir = tempdir().unwrap();
        let foreman = Foreman::new(
            dir.path(),
            ForemanConfig {
                command: "true".to_string(),
                args: vec![],
                max_run_seconds: 5,
                kill_grace_seconds: 1,
            },
        );
        std::fs::create_dir_all(dir.path().join("mailbox/foreman")).unwrap();
        std::fs::write(foreman.to_peer_path(), "To: Both\n<TO_PEER>work</TO_PEER>").unwrap();
        assert!(foreman.take_output().is_some());
        assert!(foreman.take_output().is_none());
    }
}
