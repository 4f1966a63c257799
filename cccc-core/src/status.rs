//! `state/status.json` (spec §3 "Status snapshot"): a periodically
//! rewritten, read-only-for-observers file. Bridges answer `/status`,
//! `/queue`, `/locks` purely by reading these JSON snapshots — they
//! never inspect live in-memory state (spec §7).

use crate::events::now_rfc3339;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub session: String,
    pub paused: bool,
    pub phase: String,
    pub leader: Option<String>,
    pub mailbox_counts: HashMap<String, usize>,
    pub mailbox_last: HashMap<String, String>,
    pub handoff_filter_enabled: bool,
    pub aux: Option<String>,
    pub foreman: Option<String>,
    pub ts: String,
}

pub struct StatusWriter {
    path: PathBuf,
}

impl StatusWriter {
    pub fn new(state_dir: &Path) -> Self {
        StatusWriter {
            path: state_dir.join("status.json"),
        }
    }

    /// Atomically (write-then-rename) rewrites the snapshot, stamping
    /// `ts` at write time (spec §5 "atomic-rename to avoid torn reads").
    pub fn write(&self, mut snapshot: StatusSnapshot) -> std::io::Result<()> {
        snapshot.ts = now_rfc3339();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&snapshot)?)?;
        std::fs::rename(&tmp, &self.path)
    }

    pub fn read(&self) -> Option<StatusSnapshot> {
        let text = std::fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&text).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let writer = StatusWriter::new(dir.path());
        let snapshot = StatusSnapshot {
            session: "s1".to_string(),
            paused: false,
            phase: "running".to_string(),
            leader: None,
            mailbox_counts: HashMap::new(),
            mailbox_last: HashMap::new(),
            handoff_filter_enabled: true,
            aux: None,
            foreman: None,
            ts: String::new(),
        };
        writer.write(snapshot).unwrap();
        let read_back = writer.read().unwrap();
        assert_eq!(read_back.session, "s1");
        assert!(!read_back.ts.is_empty());
    }

    #[test]
    fn read_returns_none_when_absent() {
        let dir = tempdir().unwrap();
        let writer = StatusWriter::new(dir.path());
        assert!(writer.read().is_none());
    }
}
