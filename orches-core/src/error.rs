//! Error types for orches-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building a [`crate::Catalog`].
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Listing the snapshot directory or reading a unit file failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while resolving the process configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `dirs::home_dir()` returned `None` in per-user mode.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

/// Convenience constructor for [`CatalogError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CatalogError {
    CatalogError::Io {
        path: path.into(),
        source,
    }
}
