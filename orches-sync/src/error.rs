//! Error types for orches-sync.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use orches_core::CatalogError;
use orches_git::GitError;

use crate::executor::ExecError;
use crate::lock::LockError;

/// Per-unit step of a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Disable,
    Stop,
    Remove,
    Copy,
    Restart,
    Start,
    Enable,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            Phase::Disable => "disable",
            Phase::Stop => "stop",
            Phase::Remove => "remove",
            Phase::Copy => "copy",
            Phase::Restart => "restart",
            Phase::Start => "start",
            Phase::Enable => "enable",
        };
        f.write_str(verb)
    }
}

/// One failed operation on one unit.
#[derive(Debug)]
pub struct UnitFailure {
    pub phase: Phase,
    pub unit: String,
    pub source: ExecError,
}

impl fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to {} unit {}: {}", self.phase, self.unit, self.source)
    }
}

/// All errors that can arise from reconciliation and the command pipeline.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to list {snapshot} units: {source}")]
    Catalog {
        snapshot: &'static str,
        #[source]
        source: CatalogError,
    },

    #[error("git error: {0}")]
    Git(#[from] GitError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: ExecError,
    },

    #[error("failed to reload daemon: {0}")]
    Reload(#[source] ExecError),

    #[error("post-sync action failed: {0}")]
    PostSync(#[source] Box<SyncError>),

    /// Every unit-level failure of one pass, in step order.
    #[error("{}", render_failures(.failures))]
    Units {
        failures: Vec<UnitFailure>,
        /// The self unit was written before the failures were collected.
        restart_needed: bool,
    },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("background task failed: {0}")]
    Task(String),

    #[error("no repository found, initialize orches first")]
    NotInitialized,

    #[error("repository already exists at {path}")]
    AlreadyInitialized { path: PathBuf },
}

impl SyncError {
    /// Whether the caller must still exit so the supervisor restarts it
    /// under an already written self unit.
    pub fn restart_needed(&self) -> bool {
        matches!(
            self,
            SyncError::Units {
                restart_needed: true,
                ..
            }
        )
    }
}

fn render_failures(failures: &[UnitFailure]) -> String {
    let mut out = format!("{} unit operation(s) failed:", failures.len());
    for failure in failures {
        out.push_str("\n  ");
        out.push_str(&failure.to_string());
    }
    out
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
