//! Cooperative dotlocking of the database file.
//!
//! A lock is taken by writing `<database>.lock.<pid>.<host>` and hard
//! linking it to `<database>.lock`; the link either succeeds atomically or
//! the existing lock holder is reported. The lock is released on drop, so
//! every fatal path unwinds through it.

use std::fs;
use std::io::Write;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{MairixError, Result};

/// A held database lock; removing it is idempotent.
#[derive(Debug)]
pub struct Lock {
    lock_path: PathBuf,
}

fn hostname() -> String {
    fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "localhost".to_string())
}

impl Lock {
    /// Acquire the lock for `database_path`. With `force`, a stale lock
    /// file is cleared first.
    pub fn acquire(database_path: &Path, force: bool) -> Result<Self> {
        let mut name = database_path.as_os_str().to_os_string();
        name.push(".lock");
        let lock_path = PathBuf::from(name);

        if force {
            warn!(path = %lock_path.display(), "Force-clearing lock file");
            let _ = fs::remove_file(&lock_path);
        }

        let pid = std::process::id();
        let host = hostname();
        let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());

        let mut tname = lock_path.as_os_str().to_os_string();
        tname.push(format!(".{pid}.{host}"));
        let tname = PathBuf::from(tname);

        let write_unique = || -> std::io::Result<()> {
            let mut f = fs::File::create(&tname)?;
            writeln!(f, "{pid},{host},{user}")?;
            Ok(())
        };
        write_unique().map_err(|e| MairixError::index_io(&tname, e))?;

        let link_result = fs::hard_link(&tname, &lock_path);
        let acquired = match link_result {
            Ok(()) => true,
            Err(_) => {
                // The link call can fail even when it worked; trust the
                // link count of the unique file.
                match fs::metadata(&tname) {
                    Ok(meta) if meta.nlink() == 2 => true,
                    _ => false,
                }
            }
        };

        let _ = fs::remove_file(&tname);

        if !acquired {
            let holder = fs::read_to_string(&lock_path)
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(MairixError::LockUnavailable(format!(
                "{} appears to be locked by (pid,node,user)=({holder})",
                database_path.display()
            )));
        }
        debug!(path = %lock_path.display(), "Acquired database lock");
        Ok(Self { lock_path })
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("index.db");
        let lock_file = dir.path().join("index.db.lock");

        {
            let _lock = Lock::acquire(&db, false).unwrap();
            assert!(lock_file.exists());
        }
        assert!(!lock_file.exists());
    }

    #[test]
    fn test_second_acquire_fails() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("index.db");

        let _held = Lock::acquire(&db, false).unwrap();
        match Lock::acquire(&db, false) {
            Err(MairixError::LockUnavailable(_)) => {}
            other => panic!("expected LockUnavailable, got {other:?}"),
        }
    }

    #[test]
    fn test_force_clears_stale_lock() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("index.db");
        let lock_file = dir.path().join("index.db.lock");
        fs::write(&lock_file, "999999,ghost,nobody\n").unwrap();

        assert!(Lock::acquire(&db, false).is_err());
        let _lock = Lock::acquire(&db, true).unwrap();
        assert!(lock_file.exists());
    }
}
