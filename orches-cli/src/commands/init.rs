//! `orches init`: clone a repository and deploy it.

use anyhow::{bail, Context, Result};
use clap::Args;
use orches_sync::Pipeline;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Git URL or local path of the repository to deploy.
    pub remote: String,
}

impl InitArgs {
    pub async fn run(self, pipeline: &Pipeline) -> Result<()> {
        if pipeline.config().socket_path().exists() {
            bail!("daemon is already running, cannot init");
        }

        let remote = super::resolve_remote(&self.remote)?;
        let result = pipeline
            .init(&remote)
            .await
            .with_context(|| format!("failed to initialize from {remote}"))?;
        if result.restart_needed {
            tracing::warn!("orches deploys itself from this repository, start its unit to take over");
        }
        Ok(())
    }
}
