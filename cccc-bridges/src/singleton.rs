//! Singleton instance lock (spec §4.11 "each bridge acquires an
//! exclusive file lock at startup to prevent duplicate instances"),
//! matching the core's `state/<bridge>.lock` convention (spec §5
//! "Singleton locks").

use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Holds the exclusive lock for the lifetime of the process. The guard
/// is leaked deliberately: a bridge process holds this lock until it
/// exits, and there is no earlier point at which releasing it would be
/// correct, so there is nothing to reclaim before process exit.
pub struct SingletonLock {
    _guard: fd_lock::RwLockWriteGuard<'static, File>,
    path: PathBuf,
}

impl SingletonLock {
    /// Tries to acquire `state/<bridge_name>.lock` exclusively. Returns
    /// `Err` if another instance already holds it.
    pub fn acquire(home: &Path, bridge_name: &str) -> io::Result<Self> {
        let path = home.join("state").join(format!("{bridge_name}.lock"));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).write(true).open(&path)?;
        let lock: &'static mut RwLock<File> = Box::leak(Box::new(RwLock::new(file)));
        let guard = lock.try_write().map_err(|_| {
            io::Error::new(
                io::ErrorKind::WouldBlock,
                format!("another instance already holds {}", path.display()),
            )
        })?;
        Ok(SingletonLock { _guard: guard, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_acquire_fails_while_first_is_held() {
        let dir = tempdir().unwrap();
        let first = SingletonLock::acquire(dir.path(), "telegram").unwrap();
        let second = SingletonLock::acquire(dir.path(), "telegram");
        assert!(second.is_err());
        drop(first);
    }

    #[test]
    fn different_bridge_names_do_not_conflict() {
        let dir = tempdir().unwrap();
        let _a = SingletonLock::acquire(dir.path(), "telegram").unwrap();
        let _b = SingletonLock::acquire(dir.path(), "slack").unwrap();
    }
}
