//! C1 — append-only JSONL ledger (spec §4.1). The single source of
//! truth for replay and observers: entries become visible atomically at
//! line boundaries, corrupted lines are skipped rather than aborting a
//! scan, and a failed append is logged and swallowed rather than
//! propagated into the main loop.

use crate::events::{now_rfc3339, Event, Role};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub struct Ledger {
    path: PathBuf,
    next_id: AtomicU64,
    file: Mutex<File>,
}

impl Ledger {
    /// Opens (creating if absent) the ledger at `path`, seeding the
    /// in-memory id counter from the highest id already on disk so ids
    /// stay monotonic across restarts.
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let max_id = Self::scan_max_id(&path);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Ledger {
            path,
            next_id: AtomicU64::new(max_id + 1),
            file: Mutex::new(file),
        })
    }

    fn scan_max_id(path: &Path) -> u64 {
        let Ok(file) = File::open(path) else {
            return 0;
        };
        let mut max_id = 0u64;
        for line in BufReader::new(file).lines().map_while(|l| l.ok()) {
            if let Ok(ev) = serde_json::from_str::<Event>(&line) {
                max_id = max_id.max(ev.id);
            }
        }
        max_id
    }

    /// Appends one event, stamping `ts` at append time (not at event
    /// construction, per spec §4.1) and assigning the next monotonic
    /// id. Write errors are logged and swallowed: losing a ledger entry
    /// must never block the main loop.
    pub fn append(&self, kind: impl Into<String>, source: Role, payload: serde_json::Map<String, serde_json::Value>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            id,
            ts: now_rfc3339(),
            kind: kind.into(),
            source,
            payload,
        };
        match serde_json::to_string(&event) {
            Ok(line) => {
                if let Ok(mut file) = self.file.lock() {
                    if let Err(e) = writeln!(file, "{line}") {
                        tracing::error!(path = %self.path.display(), error = %e, "ledger append failed");
                    }
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to serialize ledger event"),
        }
        id
    }

    /// Returns the last `n` well-formed entries, in file order.
    /// Malformed or partial lines are skipped silently (spec §4.1).
    pub fn tail(&self, n: usize) -> Vec<Event> {
        let Ok(file) = File::open(&self.path) else {
            return Vec::new();
        };
        let mut buf: Vec<Event> = Vec::new();
        for line in BufReader::new(file).lines().map_while(|l| l.ok()) {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(&line) {
                Ok(ev) => {
                    buf.push(ev);
                    if buf.len() > n {
                        buf.remove(0);
                    }
                }
                Err(e) => tracing::debug!(error = %e, "skipping malformed ledger line"),
            }
        }
        buf
    }
}
