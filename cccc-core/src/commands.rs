//! C8 — the command queue (spec §4.8): an append-only `commands.jsonl`
//! tailed by the orchestrator (and, via the same file, bridges and the
//! TUI), each consumer tracking its own byte offset with rotation
//! handling. Command records with no `id` still get a best-effort
//! result keyed by a synthesized id (confirmed against
//! `command_queue_runtime.py` — SUPPLEMENTED FEATURES in SPEC_FULL.md).

use crate::cursor::Cursor;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Bounds how much work one tick of the command queue does, so a burst
/// of commands never starves the other subsystems (spec §5 "max_items
/// = 50").
pub const MAX_ITEMS_PER_TICK: usize = 50;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommandRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub args: serde_json::Map<String, serde_json::Value>,
    pub source: String,
    pub ts: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResultRecord {
    pub id: String,
    pub result: CommandResult,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommandResult {
    pub ok: bool,
    pub message: String,
}

/// Either a command or a result line — `commands.jsonl` interleaves both
/// shapes, and readers must skip whichever one they're not tailing for.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum QueueLine {
    Result(ResultRecord),
    Command(CommandRecord),
}

pub struct CommandQueue {
    path: PathBuf,
    tui_replies_path: PathBuf,
}

impl CommandQueue {
    pub fn new(state_dir: &Path) -> std::io::Result<Self> {
        let path = state_dir.join("commands.jsonl");
        let tui_replies_path = state_dir.join("tui-replies.jsonl");
        fs::create_dir_all(state_dir)?;
        OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(CommandQueue { path, tui_replies_path })
    }

    pub fn append_command(&self, record: &CommandRecord) -> std::io::Result<()> {
        self.append_line(&QueueLine::Command(record.clone()))
    }

    /// Appends a result record; if `source` names the TUI, the message
    /// is mirrored into `tui-replies.jsonl` (spec §4.8).
    pub fn append_result(&self, id: &str, ok: bool, message: &str, source: &str) -> std::io::Result<()> {
        let record = ResultRecord {
            id: id.to_string(),
            result: CommandResult { ok, message: message.to_string() },
        };
        self.append_line(&QueueLine::Result(record.clone()))?;
        if source == "tui" {
            let mut file = OpenOptions::new().create(true).append(true).open(&self.tui_replies_path)?;
            writeln!(file, "{}", serde_json::to_string(&record)?)?;
        }
        Ok(())
    }

    fn append_line(&self, line: &QueueLine) -> std::io::Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(line)?)
    }

    /// Tails up to `MAX_ITEMS_PER_TICK` new, well-formed `CommandRecord`
    /// lines since `cursor`, handling file shrink (rotation) by
    /// restarting from 0. Malformed lines (including result lines, which
    /// this consumer isn't tailing for) are skipped without advancing
    /// past unread data incorrectly — each skipped line still consumes
    /// its own bytes from the offset.
    pub fn drain(&self, cursor: Cursor) -> std::io::Result<(Vec<CommandRecord>, Cursor)> {
        let meta = fs::metadata(&self.path)?;
        let shrunk = meta.len() < cursor.offset;
        let start_offset = if shrunk { 0 } else { cursor.offset };

        let mut file = fs::File::open(&self.path)?;
        file.seek(SeekFrom::Start(start_offset))?;
        #[cfg(unix)]
        let (dev, ino) = {
            use std::os::unix::fs::MetadataExt;
            (meta.dev(), meta.ino())
        };
        #[cfg(not(unix))]
        let (dev, ino) = (0u64, 0u64);

        let mut reader = BufReader::new(file);
        let mut offset = start_offset;
        let mut commands = Vec::new();
        loop {
            if commands.len() >= MAX_ITEMS_PER_TICK {
                break;
            }
            let mut line = String::new();
            let read = reader.read_line(&mut line)?;
            if read == 0 {
                break;
            }
            offset += read as u64;
            let trimmed = line.trim_end_matches('\n');
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<QueueLine>(trimmed) {
                Ok(QueueLine::Command(cmd)) => commands.push(cmd),
                Ok(QueueLine::Result(_)) => {}
                Err(e) => tracing::debug!(error = %e, "skipping malformed command queue line"),
            }
        }
        Ok((commands, Cursor { dev, ino, offset }))
    }

    /// Ensures every drained command has a usable id, synthesizing one
    /// for id-less records so they still receive a result line (spec
    /// §4.8, SUPPLEMENTED FEATURES).
    pub fn synthesize_missing_ids(commands: &mut [CommandRecord]) {
        for cmd in commands.iter_mut() {
            if cmd.id.is_none() {
                cmd.id = Some(uuid::Uuid::new_v4().to_string());
            }
        }
    }
}

/// Recognized command types (spec §4.8 table). Unknown types are logged
/// and ignored, never crash the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    SendA,
    SendB,
    SendBoth,
    Pause,
    Resume,
    SysRefresh,
    Restart,
    InboxPolicy,
    Launch,
    Quit,
    Foreman,
    Aux,
    Verbose,
    Passthru,
    Focus,
    Review,
    Unknown,
}

pub fn classify(kind: &str) -> CommandKind {
    match kind {
        "a" | "send" => CommandKind::SendA,
        "b" => CommandKind::SendB,
        "both" => CommandKind::SendBoth,
        "pause" => CommandKind::Pause,
        "resume" => CommandKind::Resume,
        "sys-refresh" => CommandKind::SysRefresh,
        "restart" => CommandKind::Restart,
        "inbox_policy" => CommandKind::InboxPolicy,
        "launch" => CommandKind::Launch,
        "quit" => CommandKind::Quit,
        "foreman" => CommandKind::Foreman,
        "aux" => CommandKind::Aux,
        "verbose" => CommandKind::Verbose,
        "passthru" => CommandKind::Passthru,
        "focus" => CommandKind::Focus,
        "review" => CommandKind::Review,
        _ => CommandKind::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(kind: &str) -> CommandRecord {
        CommandRecord {
            id: Some("id1".to_string()),
            kind: kind.to_string(),
            args: Default::default(),
            source: "tui".to_string(),
            ts: 0.0,
        }
    }

    #[test]
    fn append_then_drain_round_trips() {
        let dir = tempdir().unwrap();
        let queue = CommandQueue::new(dir.path()).unwrap();
        queue.append_command(&record("a")).unwrap();
        let (commands, _) = queue.drain(Cursor::default()).unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].kind, "a");
    }

    #[test]
    fn result_lines_are_skipped_by_command_drain() {
        let dir = tempdir().unwrap();
        let queue = CommandQueue::new(dir.path()).unwrap();
        queue.append_command(&record("pause")).unwrap();
        queue.append_result("id1", true, "paused", "tui").unwrap();
        let (commands, _) = queue.drain(Cursor::default()).unwrap();
        assert_eq!(commands.len(), 1);
    }

    #[test]
    fn tui_result_mirrors_to_replies_file() {
        let dir = tempdir().unwrap();
        let queue = CommandQueue::new(dir.path()).unwrap();
        queue.append_result("id1", true, "done", "tui").unwrap();
        let replies = fs::read_to_string(dir.path().join("tui-replies.jsonl")).unwrap();
        assert!(replies.contains("done"));
    }

    #[test]
    fn synthesize_missing_ids_fills_every_record() {
        let mut commands = vec![CommandRecord {
            id: None,
            kind: "a".to_string(),
            args: Default::default(),
            source: "bridge-telegram".to_string(),
            ts: 0.0,
        }];
        CommandQueue::synthesize_missing_ids(&mut commands);
        assert!(commands[0].id.is_some());
    }

    #[test]
    fn rotation_restarts_from_zero() {
        let dir = tempdir().unwrap();
        let queue = CommandQueue::new(dir.path()).unwrap();
        queue.append_command(&record("a")).unwrap();
        let (_, cursor) = queue.drain(Cursor::default()).unwrap();
        fs::write(dir.path().join("commands.jsonl"), "").unwrap();
        queue.append_command(&record("b")).unwrap();
        let (commands, _) = queue.drain(cursor).unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].kind, "b");
    }

    #[test]
    fn classify_maps_known_types() {
        assert_eq!(classify("both"), CommandKind::SendBoth);
        assert_eq!(classify("nonsense"), CommandKind::Unknown);
    }
}
