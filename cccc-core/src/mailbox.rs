//! C2 — per-peer mailbox store (spec §4.2). Owns `inbox/`, `processed/`,
//! and the three well-known scan targets (`to_user.md`, `to_peer.md`,
//! `patch.diff`), plus `inbox.md` (bridge-mode mirror).

use crate::events::{is_sentinel, make_sentinel};
use crate::lock::SequenceAllocator;
use sha1::{Digest, Sha1};
use std::fs;
use std::path::{Path, PathBuf};

/// Default retention of archived messages per peer (spec §4.2, matching
/// `PROCESSED_RETENTION` in the original orchestrator).
pub const DEFAULT_PROCESSED_RETENTION: usize = 200;

/// What to do with files found in `inbox/` at startup (spec §4.2
/// "Startup policy for residual inboxes").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxStartupPolicy {
    Resume,
    Discard,
    Archive,
}

/// The three channels a mailbox scan can find content in (spec §4.6).
pub struct ScanResult {
    pub to_user: Option<String>,
    pub to_peer: Option<String>,
    pub patch: Option<String>,
}

pub struct Mailbox {
    root: PathBuf,
    peer: String,
    allocator: SequenceAllocator,
    processed_retention: usize,
}

impl Mailbox {
    pub fn new(home: &Path, peer: &str) -> Self {
        let root = home.join("mailbox").join(peer_folder_name(peer));
        let state_dir = home.join("state");
        Mailbox {
            root,
            peer: peer.to_string(),
            allocator: SequenceAllocator::new(&state_dir, peer),
            processed_retention: DEFAULT_PROCESSED_RETENTION,
        }
    }

    pub fn with_retention(mut self, retention: usize) -> Self {
        self.processed_retention = retention;
        self
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn inbox_dir(&self) -> PathBuf {
        self.root.join("inbox")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.root.join("processed")
    }

    fn well_known(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Allocates the next sequence number, seeded from the max seq
    /// already present in `inbox/` or `processed/` if the counter file
    /// doesn't exist yet (spec §4.2: "fall back to
    /// max(inbox ∪ processed) + 1").
    pub fn next_seq(&self) -> crate::error::Result<String> {
        let floor = self.max_existing_seq();
        self.allocator.next(floor)
    }

    fn max_existing_seq(&self) -> u64 {
        let mut max_seq = 0u64;
        for dir in [self.inbox_dir(), self.processed_dir()] {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                if let Some(name) = entry.file_name().to_str() {
                    if let Some(seq_str) = name.split('.').next() {
                        if let Ok(seq) = seq_str.parse::<u64>() {
                            max_seq = max_seq.max(seq);
                        }
                    }
                }
            }
        }
        max_seq
    }

    /// Writes `payload` into `inbox/<seq>.<mid>.txt`, creating the
    /// directory if needed. Returns the allocated sequence and the full
    /// path (spec §4.2 `write_inbox`).
    pub fn write_inbox(&self, payload: &str, mid: &str) -> crate::error::Result<(String, PathBuf)> {
        let seq = self.next_seq()?;
        let dir = self.inbox_dir();
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{seq}.{mid}.txt"));
        fs::write(&path, payload)?;
        Ok((seq, path))
    }

    /// Moves `inbox/<token>...` into `processed/`, then enforces
    /// retention by deleting the lexicographically smallest files above
    /// the cap. `token` may be the 6-digit sequence or contain `.mid.`.
    /// Returns `false` without side effects if no matching file exists
    /// (spec §4.2, "at-most-once archive" §8).
    pub fn archive(&self, token: &str) -> bool {
        let inbox = self.inbox_dir();
        let Ok(entries) = fs::read_dir(&inbox) else {
            return false;
        };
        let mut names: Vec<String> = entries
            .flatten()
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        names.sort();

        let target = names.into_iter().find(|name| {
            if token.chars().all(|c| c.is_ascii_digit()) && token.len() == 6 {
                name.starts_with(token)
            } else {
                name.contains(&format!(".{token}.")) || name.starts_with(token)
            }
        });

        let Some(target) = target else {
            return false;
        };
        let processed = self.processed_dir();
        if fs::create_dir_all(&processed).is_err() {
            return false;
        }
        if fs::rename(inbox.join(&target), processed.join(&target)).is_err() {
            return false;
        }
        self.enforce_retention();
        true
    }

    fn enforce_retention(&self) {
        let processed = self.processed_dir();
        let Ok(entries) = fs::read_dir(&processed) else {
            return;
        };
        let mut files: Vec<String> = entries
            .flatten()
            .filter(|e| e.path().is_file())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        files.sort();
        if files.len() > self.processed_retention {
            let remove_n = files.len() - self.processed_retention;
            for name in &files[..remove_n] {
                let _ = fs::remove_file(processed.join(name));
            }
        }
    }

    /// Applies the startup policy to any residual `inbox/` files (spec
    /// §4.2). `resume` is a no-op; `discard`/`archive` move every
    /// residual file into `processed/` (both result in the same
    /// filesystem effect — the distinction matters for ledger emission
    /// and is recorded by the caller).
    pub fn apply_startup_policy(&self, policy: InboxStartupPolicy) -> usize {
        if policy == InboxStartupPolicy::Resume {
            return 0;
        }
        let inbox = self.inbox_dir();
        let Ok(entries) = fs::read_dir(&inbox) else {
            return 0;
        };
        let mut moved = 0;
        for entry in entries.flatten() {
            if !entry.path().is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if let Some(seq) = name.split('.').next() {
                    if self.archive(seq) {
                        moved += 1;
                    }
                }
            }
        }
        moved
    }

    /// Reads one well-known file; if non-empty and not already a
    /// sentinel, returns its content and replaces it with a freshly
    /// constructed sentinel (spec §4.2 `scan`, idempotence per §8).
    fn scan_one(&self, filename: &str, route: &str) -> Option<String> {
        let path = self.well_known(filename);
        let content = fs::read_to_string(&path).ok()?;
        if content.trim().is_empty() || is_sentinel(&content) {
            return None;
        }
        let mut hasher = Sha1::new();
        hasher.update(content.as_bytes());
        let digest = hasher.finalize();
        let sha8 = hex8(&digest);
        let eid = hex8(uuid::Uuid::new_v4().as_bytes());
        let sentinel = make_sentinel(&eid, &sha8, route);
        if fs::write(&path, sentinel).is_err() {
            tracing::warn!(path = %path.display(), "failed to write sentinel after scan");
        }
        Some(content)
    }

    /// Scans `to_user.md`, `to_peer.md`, `patch.diff` for fresh content
    /// (spec §4.2, §4.6).
    pub fn scan(&self) -> ScanResult {
        ScanResult {
            to_user: self.scan_one("to_user.md", &format!("{}->user", self.peer)),
            to_peer: self.scan_one("to_peer.md", &format!("{}->peer", self.peer)),
            patch: self.scan_one("patch.diff", &format!("{}->patch", self.peer)),
        }
    }

    /// Mirrors the latest inbound message into `inbox.md` for
    /// bridge-mode observers (spec §3 "inbox.md mirror of latest
    /// inbound").
    pub fn mirror_inbox_md(&self, content: &str) {
        let path = self.well_known("inbox.md");
        if let Err(e) = fs::write(&path, content) {
            tracing::warn!(path = %path.display(), error = %e, "failed to mirror inbox.md");
        }
    }
}

fn hex8(bytes: &[u8]) -> String {
    bytes.iter().take(4).map(|b| format!("{b:02x}")).collect()
}

/// Peers are addressed as `PeerA`/`PeerB` in code but live in
/// lowercase-named directories on disk (`mailbox/peerA/`,
/// `mailbox/peerB/`) — this mirrors the original layout's folder
/// naming without forcing callers to know it.
pub fn peer_folder_name(peer: &str) -> String {
    peer.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_inbox_allocates_sequential_names() {
        let dir = tempdir().unwrap();
        let mb = Mailbox::new(dir.path(), "peerA");
        let (seq1, path1) = mb.write_inbox("hello", "mid1").unwrap();
        let (seq2, _) = mb.write_inbox("world", "mid2").unwrap();
        assert_eq!(seq1, "000001");
        assert_eq!(seq2, "000002");
        assert!(path1.ends_with("000001.mid1.txt"));
    }

    #[test]
    fn archive_moves_file_and_is_idempotent() {
        let dir = tempdir().unwrap();
        let mb = Mailbox::new(dir.path(), "peerA");
        let (seq, _) = mb.write_inbox("hi", "midx").unwrap();
        assert!(mb.archive(&seq));
        assert!(mb.processed_dir().join(format!("{seq}.midx.txt")).exists());
        assert!(!mb.inbox_dir().join(format!("{seq}.midx.txt")).exists());
        // second archive call on the same token is a no-op
        assert!(!mb.archive(&seq));
    }

    #[test]
    fn retention_evicts_oldest_first() {
        let dir = tempdir().unwrap();
        let mb = Mailbox::new(dir.path(), "peerA").with_retention(2);
        for i in 0..5 {
            let (seq, _) = mb.write_inbox("x", &format!("mid{i}")).unwrap();
            mb.archive(&seq);
        }
        let remaining: Vec<_> = fs::read_dir(mb.processed_dir())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().into_string().unwrap())
            .collect();
        assert_eq!(remaining.len(), 2);
    }

    #[test]
    fn scan_is_idempotent() {
        let dir = tempdir().unwrap();
        let mb = Mailbox::new(dir.path(), "peerA");
        fs::create_dir_all(mb.root.clone()).unwrap();
        fs::write(mb.well_known("to_user.md"), "<TO_USER>hi</TO_USER>").unwrap();
        let first = mb.scan();
        assert!(first.to_user.is_some());
        let second = mb.scan();
        assert!(second.to_user.is_none());
    }

    #[test]
    fn scan_ignores_empty_and_sentinel_files() {
        let dir = tempdir().unwrap();
        let mb = Mailbox::new(dir.path(), "peerA");
        fs::create_dir_all(mb.root.clone()).unwrap();
        fs::write(mb.well_known("to_peer.md"), "").unwrap();
        assert!(mb.scan().to_peer.is_none());
    }

    #[test]
    fn startup_discard_moves_residual_inbox_files() {
        let dir = tempdir().unwrap();
        let mb = Mailbox::new(dir.path(), "peerA");
        mb.write_inbox("leftover", "midz").unwrap();
        let moved = mb.apply_startup_policy(InboxStartupPolicy::Discard);
        assert_eq!(moved, 1);
        assert!(fs::read_dir(mb.inbox_dir()).unwrap().next().is_none());
    }

    #[test]
    fn startup_resume_leaves_inbox_untouched() {
        let dir = tempdir().unwrap();
        let mb = Mailbox::new(dir.path(), "peerA");
        mb.write_inbox("leftover", "midz").unwrap();
        let moved = mb.apply_startup_policy(InboxStartupPolicy::Resume);
        assert_eq!(moved, 0);
        assert_eq!(fs::read_dir(mb.inbox_dir()).unwrap().count(), 1);
    }
}
