//! Advisory lock marker for the local database
//!
//! The storage engine does not enforce this; every agent instance that
//! shares a database is expected to take the marker before touching it.

use chrono::Utc;
use schema::{AgentError, Result};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct DbLock {
    path: PathBuf,
    wait: Duration,
    stale_after: Duration,
}

/// Held lock; the marker file is removed on drop, including on error paths
#[derive(Debug)]
pub struct DbLockGuard {
    path: PathBuf,
}

impl DbLock {
    pub fn new<P: AsRef<Path>>(path: P, wait: Duration, stale_after: Duration) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            wait,
            stale_after,
        }
    }
    
    pub fn path(&self) -> &Path {
        &self.path
    }
    
    /// Create the marker, waiting for a concurrent holder up to the configured limit.
    ///
    /// A marker older than the stale threshold is assumed to belong to a run
    /// that died without cleaning up and is taken over.
    pub fn acquire(&self) -> Result<DbLockGuard> {
        let deadline = Instant::now() + self.wait;
        
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&self.path) {
                Ok(mut file) => {
                    // Content is informational only
                    let _ = writeln!(file, "{}", Utc::now().timestamp());
                    return Ok(DbLockGuard {
                        path: self.path.clone(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if self.is_stale() {
                        warn!("Taking over stale database lock {:?}", self.path);
                        match fs::remove_file(&self.path) {
                            Ok(()) => continue,
                            Err(e) if e.kind() == ErrorKind::NotFound => continue,
                            Err(e) => warn!("Cannot remove stale lock {:?}: {}", self.path, e),
                        }
                    }
                    
                    if Instant::now() >= deadline {
                        return Err(AgentError::storage(
                            "lock",
                            format!("{:?} is held by another run", self.path),
                        ));
                    }
                    
                    debug!("Database lock busy, waiting");
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(AgentError::storage("lock", e)),
            }
        }
    }
    
    fn is_stale(&self) -> bool {
        fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .map(|age| age >= self.stale_after)
            .unwrap_or(false)
    }
}

impl Drop for DbLockGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to release database lock {:?}: {}", self.path, e);
            }
        }
    }
}
