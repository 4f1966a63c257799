//! C3 — append-only outbox stream (spec §4.3). A subset of ledger kinds
//! shaped for direct rendering by chat bridges; readers tail it with a
//! `Cursor` and must never observe a line rewritten.

use crate::cursor::Cursor;
use crate::events::now_rfc3339;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboxEvent {
    ToUser {
        id: String,
        peer: String,
        text: String,
        ts: String,
    },
    ToPeerSummary {
        id: String,
        from: String,
        text: String,
        ts: String,
    },
}

pub struct Outbox {
    path: PathBuf,
}

impl Outbox {
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Outbox { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append_to_user(&self, peer: &str, text: &str) -> std::io::Result<()> {
        self.append(&OutboxEvent::ToUser {
            id: uuid::Uuid::new_v4().to_string(),
            peer: peer.to_string(),
            text: text.to_string(),
            ts: now_rfc3339(),
        })
    }

    pub fn append_to_peer_summary(&self, from: &str, text: &str) -> std::io::Result<()> {
        self.append(&OutboxEvent::ToPeerSummary {
            id: uuid::Uuid::new_v4().to_string(),
            from: from.to_string(),
            text: text.to_string(),
            ts: now_rfc3339(),
        })
    }

    fn append(&self, event: &OutboxEvent) -> std::io::Result<()> {
        let line = serde_json::to_string(event)?;
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(file, "{line}")
    }

    /// Reads every new, well-formed line since `cursor`, detecting
    /// rotation (different inode, or shrunk below the recorded offset)
    /// by restarting from 0. Returns the parsed events and the cursor to
    /// persist *if* the caller's handler succeeds for all of them — spec
    /// §4.11 makes commit-on-success the handler's responsibility, so
    /// this returns one cursor per line alongside the event, letting the
    /// caller commit only as far as it actually delivered.
    pub fn poll(&self, cursor: Cursor) -> std::io::Result<Vec<(OutboxEvent, Cursor)>> {
        let rotated = cursor.is_stale_for(&self.path).unwrap_or(true);
        let start_offset = if rotated { 0 } else { cursor.offset };

        let mut file = std::fs::File::open(&self.path)?;
        file.seek(SeekFrom::Start(start_offset))?;
        let meta = file.metadata()?;
        #[cfg(unix)]
        let (dev, ino) = {
            use std::os::unix::fs::MetadataExt;
            (meta.dev(), meta.ino())
        };
        #[cfg(not(unix))]
        let (dev, ino) = (0u64, 0u64);

        let mut reader = BufReader::new(file);
        let mut offset = start_offset;
        let mut results = Vec::new();
        loop {
            let mut line = String::new();
            let read = reader.read_to_string_guarded(&mut line)?;
            if read == 0 {
                break;
            }
            offset += read as u64;
            let trimmed = line.trim_end_matches('\n');
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<OutboxEvent>(trimmed) {
                Ok(event) => results.push((event, Cursor { dev, ino, offset })),
                Err(e) => {
                    tracing::debug!(error = %e, "skipping malformed outbox line");
                }
            }
        }
        Ok(results)
    }
}

/// `BufReader::read_line` allocates a `String`; this trait gives the
/// same one-line-at-a-time read without pulling in an extra dependency
/// for "read a line, byte count included".
trait ReadLineCounted {
    fn read_to_string_guarded(&mut self, buf: &mut String) -> std::io::Result<usize>;
}

impl<R: BufRead> ReadLineCounted for R {
    fn read_to_string_guarded(&mut self, buf: &mut String) -> std::io::Result<usize> {
        self.read_line(buf)
    }
}
