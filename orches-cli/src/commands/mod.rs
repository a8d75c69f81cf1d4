pub mod init;
pub mod relay;
pub mod run;
pub mod switch;
pub mod version;

use std::path::Path;

use anyhow::{Context, Result};
use orches_git::is_local_endpoint;

/// Make a local remote absolute so it stays valid for the daemon, whose
/// working directory differs from ours.
pub(crate) fn resolve_remote(remote: &str) -> Result<String> {
    if !is_local_endpoint(remote) || Path::new(remote).is_absolute() {
        return Ok(remote.to_string());
    }
    let cwd = std::env::current_dir().context("failed to read current directory")?;
    Ok(cwd.join(remote).to_string_lossy().into_owned())
}
