//! Single-instance lock (§6 External Interfaces).
//!
//! The spec calls for one advisory exclusive lock per binary so a
//! second invocation can detect the first and exit with a clear
//! message. No crate in this workspace's dependency pack ships a
//! cross-platform `try_lock_exclusive` primitive, so this is built on
//! plain `std::fs`: create the lock file exclusively, write the
//! current process id into it, and remove it on drop. That is
//! sufficient for "one process per machine per role" and does not
//! require taking on a new dependency for it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SingletonError {
    #[error("another instance is already running (lock file {0} exists)")]
    AlreadyRunning(PathBuf),
    #[error("could not access lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Holds the single-instance lock for as long as it is alive; the
/// lock file is removed when this value is dropped.
pub struct SingletonGuard {
    path: PathBuf,
}

impl SingletonGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SingletonGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Attempt to acquire the single-instance lock at `path`. Fails with
/// [`SingletonError::AlreadyRunning`] if the file already exists,
/// under the assumption that a stale lock file from a crashed process
/// is cleaned up by the operator (or the next boot, on most
/// deployments) rather than silently stolen here.
pub fn acquire(path: impl Into<PathBuf>) -> Result<SingletonGuard, SingletonError> {
    let path = path.into();
    let mut opts = fs::OpenOptions::new();
    opts.write(true).create_new(true);

    match opts.open(&path) {
        Ok(mut file) => {
            use std::io::Write;
            let _ = write!(file, "{}", std::process::id());
            Ok(SingletonGuard { path })
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            Err(SingletonError::AlreadyRunning(path))
        }
        Err(e) => Err(SingletonError::Io { path, source: e }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_rejected_while_first_is_held() {
        let path = std::env::temp_dir().join(format!("wavry-singleton-test-{}", std::process::id()));
        let _ = fs::remove_file(&path);

        let guard = acquire(&path).expect("first acquire should succeed");
        let second = acquire(&path);
        assert!(matches!(second, Err(SingletonError::AlreadyRunning(_))));

        drop(guard);
        assert!(!path.exists());
    }

    #[test]
    fn lock_is_reacquirable_after_drop() {
        let path = std::env::temp_dir().join(format!("wavry-singleton-test2-{}", std::process::id()));
        let _ = fs::remove_file(&path);

        {
            let _guard = acquire(&path).unwrap();
        }
        let guard = acquire(&path).expect("lock should be free after drop");
        drop(guard);
    }
}
