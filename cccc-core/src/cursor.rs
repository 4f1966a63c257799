//! `Cursor`: the `(device, inode, offset)` triple used to tail an
//! append-only file exactly-once across restarts and rotations (spec §3
//! Cursor, §4.3, §4.11). Shared by the outbox reader inside the core and
//! by every bridge in `cccc-bridges`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub dev: u64,
    pub ino: u64,
    pub offset: u64,
}

impl Cursor {
    /// True if `path`'s current identity differs from the cursor's
    /// recorded identity, or if the file has shrunk below the recorded
    /// offset — both are rotation signals per spec §3/§4.11.
    pub fn is_stale_for(&self, path: &Path) -> std::io::Result<bool> {
        let meta = fs::metadata(path)?;
        let rotated = meta.dev() != self.dev || meta.ino() != self.ino;
        let truncated = meta.len() < self.offset;
        Ok(rotated || truncated)
    }

    /// Builds a cursor identifying `path` at the given byte offset.
    pub fn for_file(path: &Path, offset: u64) -> std::io::Result<Cursor> {
        let meta = fs::metadata(path)?;
        Ok(Cursor {
            dev: meta.dev(),
            ino: meta.ino(),
            offset,
        })
    }

    /// Loads a persisted cursor JSON file, returning the zero cursor if
    /// absent or unreadable (first run, or a parse error — category 4,
    /// never fatal).
    pub fn load(path: &Path) -> Cursor {
        fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Atomically persists the cursor (write-then-rename, spec §5).
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        fs::rename(&tmp, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fresh_cursor_matches_current_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("outbox.jsonl");
        fs::write(&path, "line one\n").unwrap();
        let cursor = Cursor::for_file(&path, 9).unwrap();
        assert!(!cursor.is_stale_for(&path).unwrap());
    }

    #[test]
    fn rotation_is_detected_by_shrink() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("outbox.jsonl");
        fs::write(&path, "0123456789").unwrap();
        let cursor = Cursor::for_file(&path, 10).unwrap();
        fs::write(&path, "ab").unwrap();
        assert!(cursor.is_stale_for(&path).unwrap());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cursor.json");
        let cursor = Cursor { dev: 1, ino: 2, offset: 3 };
        cursor.save(&path).unwrap();
        assert_eq!(Cursor::load(&path), cursor);
    }

    #[test]
    fn missing_cursor_file_loads_as_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.json");
        assert_eq!(Cursor::load(&path), Cursor::default());
    }
}
