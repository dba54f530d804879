//! Disposable grading workspaces
//!
//! Every execution gets its own directory. Names combine the process id and
//! a process-wide counter with tempfile's random suffix, so concurrent
//! requests never share one.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::TempDir;
use tokio::fs;
use tracing::{debug, warn};

use crate::core::GradeError;

/// Global counter for workspace naming
static WORKSPACE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A private directory removed when the workspace is closed or dropped
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create a fresh workspace under `root` (the system temp dir when `None`)
    pub fn create(root: Option<&Path>) -> Result<Self, GradeError> {
        let seq = WORKSPACE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let prefix = format!("grade-{}-{}-", std::process::id(), seq);

        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = match root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| GradeError::infrastructure("failed to create workspace", e))?;

        debug!("Created workspace {:?}", dir.path());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `contents` to `name` inside the workspace
    pub async fn write(&self, name: &str, contents: &str) -> Result<PathBuf, GradeError> {
        let path = self.dir.path().join(name);
        fs::write(&path, contents)
            .await
            .map_err(|e| GradeError::infrastructure(format!("failed to write {}", name), e))?;
        Ok(path)
    }

    /// Remove the workspace, logging instead of failing
    pub fn close(self) {
        let path = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => debug!("Removed workspace {:?}", path),
            Err(e) => warn!("Failed to remove workspace {:?}: {}", path, e),
        }
    }
}
