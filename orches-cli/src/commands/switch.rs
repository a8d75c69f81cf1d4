//! `orches switch`: track a different repository.

use anyhow::Result;
use clap::Args;
use orches_daemon::Command;
use orches_sync::Pipeline;

#[derive(Args, Debug)]
pub struct SwitchArgs {
    /// Git URL or local path of the new repository.
    pub remote: String,
}

impl SwitchArgs {
    pub async fn run(self, pipeline: &Pipeline) -> Result<()> {
        let remote = super::resolve_remote(&self.remote)?;
        super::relay::run(pipeline, Command::Switch(remote)).await
    }
}
