//! `SequenceAllocator`: the per-peer monotonic counter capability spec §9
//! abstracts away from a specific OS primitive. This implementation uses
//! `fd-lock`'s portable advisory file lock, with a mkdir/rmdir
//! mutex-directory fallback when the lock file itself cannot be opened
//! (spec §4.2, §7 category 2).

use crate::error::{CoreError, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

/// Acquires `state/inbox-seq-<peer>.lock`, reads and increments
/// `state/inbox-seq-<peer>.txt`, and returns the new value. Concurrent
/// callers across processes serialize on the exclusive lock.
pub struct SequenceAllocator {
    lock_path: PathBuf,
    counter_path: PathBuf,
    mutex_dir: PathBuf,
}

const MUTEX_RETRY_ATTEMPTS: u32 = 50;
const MUTEX_RETRY_DELAY: Duration = Duration::from_millis(20);

impl SequenceAllocator {
    pub fn new(state_dir: &Path, peer: &str) -> Self {
        SequenceAllocator {
            lock_path: state_dir.join(format!("inbox-seq-{peer}.lock")),
            counter_path: state_dir.join(format!("inbox-seq-{peer}.txt")),
            mutex_dir: state_dir.join(format!("inbox-seq-{peer}.mutex")),
        }
    }

    /// Returns the next sequence number as a zero-padded 6-digit string,
    /// e.g. `"000001"`. `floor` lets callers seed the allocator from the
    /// max of existing inbox/processed entries on first use (spec §4.2:
    /// "read counter file or fall back to max(inbox ∪ processed) + 1").
    pub fn next(&self, floor: u64) -> Result<String> {
        let n = match self.next_with_flock(floor) {
            Ok(n) => n,
            Err(_) => self.next_with_mutex_dir(floor)?,
        };
        Ok(format!("{n:06}"))
    }

    fn next_with_flock(&self, floor: u64) -> Result<u64> {
        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&self.lock_path)?;
        let mut lock = fd_lock::RwLock::new(file);
        let mut guard = lock
            .try_write()
            .map_err(|e| CoreError::Locking {
                path: self.lock_path.clone(),
                reason: e.to_string(),
            })?;
        let _ = guard.write_all(b"");
        self.bump_counter(floor)
    }

    fn next_with_mutex_dir(&self, floor: u64) -> Result<u64> {
        let mut attempts = 0;
        loop {
            match fs::create_dir(&self.mutex_dir) {
                Ok(()) => break,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    attempts += 1;
                    if attempts >= MUTEX_RETRY_ATTEMPTS {
                        return Err(CoreError::Locking {
                            path: self.mutex_dir.clone(),
                            reason: "mutex directory contended past retry budget".to_string(),
                        });
                    }
                    sleep(MUTEX_RETRY_DELAY);
                }
                Err(e) => return Err(e.into()),
            }
        }
        let result = self.bump_counter(floor);
        let _ = fs::remove_dir(&self.mutex_dir);
        result
    }

    fn bump_counter(&self, floor: u64) -> Result<u64> {
        let current = read_counter(&self.counter_path)?.max(floor);
        let next = current + 1;
        write_counter_atomic(&self.counter_path, next)?;
        Ok(next)
    }
}

fn read_counter(path: &Path) -> Result<u64> {
    let mut file = match OpenOptions::new().read(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let mut buf = String::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_string(&mut buf)?;
    Ok(buf.trim().parse().unwrap_or(0))
}

/// Write-then-rename so a reader never observes a torn counter value
/// (spec §5 "single-writer, atomic-rename").
fn write_counter_atomic(path: &Path, value: u64) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, value.to_string())?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn sequential_allocation_increments() {
        let dir = tempdir().unwrap();
        let alloc = SequenceAllocator::new(dir.path(), "peerA");
        assert_eq!(alloc.next(0).unwrap(), "000001");
        assert_eq!(alloc.next(0).unwrap(), "000002");
        assert_eq!(alloc.next(0).unwrap(), "000003");
    }

    #[test]
    fn floor_is_respected_on_first_call() {
        let dir = tempdir().unwrap();
        let alloc = SequenceAllocator::new(dir.path(), "peerA");
        assert_eq!(alloc.next(41).unwrap(), "000042");
    }

    #[test]
    fn concurrent_allocation_has_no_duplicates() {
        let dir = tempdir().unwrap();
        let dir_path = Arc::new(dir.path().to_path_buf());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let dir_path = Arc::clone(&dir_path);
            handles.push(std::thread::spawn(move || {
                let alloc = SequenceAllocator::new(&dir_path, "peerA");
                let mut seqs = Vec::new();
                for _ in 0..25 {
                    seqs.push(alloc.next(0).unwrap());
                }
                seqs
            }));
        }
        let mut all = Vec::new();
        for h in handles {
            all.extend(h.join().unwrap());
        }
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 200);
    }
}
