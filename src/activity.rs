//! Per-container activity tracking
//!
//! The last-seen instant for a container is a timestamped key-value entry with
//! only two operations: `touch` sets it to now, `last_seen` reads it back. The
//! production store keeps one marker file per container and uses its mtime as
//! the value, so records survive controller restarts without a database. An
//! absent marker means "no traffic observed since controller start", which the
//! sweep treats differently from "observed but long ago".

use anyhow::Context;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Timestamped key-value store keyed by container name.
///
/// Both operations are idempotent set-to-now / read calls with no
/// read-modify-write hazard, so concurrent use needs no external locking.
pub trait ActivityStore: Send + Sync {
    /// Record activity for a container as of now
    fn touch(&self, container: &str) -> anyhow::Result<()>;

    /// When the container last saw traffic, or `None` if never recorded
    fn last_seen(&self, container: &str) -> anyhow::Result<Option<SystemTime>>;
}

/// Marker-file store: one file per container under a dedicated directory,
/// whose modification time is the record
pub struct FileActivityStore {
    dir: PathBuf,
}

impl FileActivityStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create the marker directory, tolerating "already exists".
    /// Call once at startup; failure means no useful work is possible.
    pub fn ensure_dir(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("cannot create marker directory {}", self.dir.display()))
    }

    fn marker_path(&self, container: &str) -> PathBuf {
        self.dir.join(container)
    }

    /// Directory the markers live in
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ActivityStore for FileActivityStore {
    fn touch(&self, container: &str) -> anyhow::Result<()> {
        let path = self.marker_path(container);
        // O_TRUNC updates mtime even when the file is already empty
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("cannot touch marker {}", path.display()))?;
        Ok(())
    }

    fn last_seen(&self, container: &str) -> anyhow::Result<Option<SystemTime>> {
        let path = self.marker_path(container);
        match std::fs::metadata(&path) {
            Ok(meta) => {
                let modified = meta
                    .modified()
                    .with_context(|| format!("cannot read mtime of {}", path.display()))?;
                Ok(Some(modified))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("cannot stat marker {}", path.display())),
        }
    }
}

/// In-memory store for tests and for deployments that do not need markers to
/// survive a restart
#[derive(Default)]
pub struct MemoryActivityStore {
    entries: Mutex<HashMap<String, SystemTime>>,
}

impl MemoryActivityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a record with an arbitrary instant (tests backdate with this)
    pub fn set_last_seen(&self, container: &str, when: SystemTime) {
        self.entries.lock().insert(container.to_string(), when);
    }
}

impl ActivityStore for MemoryActivityStore {
    fn touch(&self, container: &str) -> anyhow::Result<()> {
        self.entries
            .lock()
            .insert(container.to_string(), SystemTime::now());
        Ok(())
    }

    fn last_seen(&self, container: &str) -> anyhow::Result<Option<SystemTime>> {
        Ok(self.entries.lock().get(container).copied())
    }
}
