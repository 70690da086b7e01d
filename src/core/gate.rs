//! Write gate shared by every state-changing command.
//!
//! Within a process the gate is an async mutex. When a lock file is
//! configured the holder also takes an exclusive `fs2` lock on it, so CLI
//! commands and the `serve` process's watchers drain onto one ordered path
//! even though each builds its own orchestrator.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Serializes commands in-process and, optionally, across processes
pub struct WriteGate {
    local: Mutex<()>,
    lock_path: Option<PathBuf>,
}

/// Held for the duration of one command
pub struct WriteGuard<'a> {
    _local: MutexGuard<'a, ()>,

    /// Lock is released when the file is dropped
    _file: Option<File>,
}

impl WriteGate {
    pub fn new(lock_path: Option<PathBuf>) -> Self {
        Self {
            local: Mutex::new(()),
            lock_path,
        }
    }

    pub fn lock_path(&self) -> Option<&Path> {
        self.lock_path.as_deref()
    }

    /// Wait for the gate; blocks on other processes holding the lock file
    pub async fn acquire(&self) -> std::io::Result<WriteGuard<'_>> {
        let local = self.local.lock().await;

        let file = match &self.lock_path {
            Some(path) => Some(lock_file(path.clone()).await?),
            None => None,
        };

        Ok(WriteGuard {
            _local: local,
            _file: file,
        })
    }
}

async fn lock_file(path: PathBuf) -> std::io::Result<File> {
    tokio::task::spawn_blocking(move || {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        file.lock_exclusive()?;
        debug!(path = %path.display(), "Write lock taken");
        Ok(file)
    })
    .await
    .map_err(std::io::Error::other)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_gate_without_lock_file() {
        let gate = WriteGate::new(None);
        let guard = gate.acquire().await.unwrap();
        drop(guard);
        gate.acquire().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_lock_file_excludes_second_gate() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("write.lock");

        // Two gates on one file stand in for two processes
        let first = Arc::new(WriteGate::new(Some(path.clone())));
        let second = Arc::new(WriteGate::new(Some(path)));

        let held = first.acquire().await.unwrap();

        let waiter = {
            let second = second.clone();
            tokio::spawn(async move {
                let _guard = second.acquire().await.unwrap();
            })
        };

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!waiter.is_finished(), "second gate acquired while first held");

        drop(held);
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("second gate never acquired")
            .unwrap();
    }
}
