//! `orches run`: the long-running daemon.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use orches_daemon::DEFAULT_INTERVAL;
use orches_sync::Pipeline;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Seconds between periodic syncs.
    #[arg(long, default_value_t = DEFAULT_INTERVAL.as_secs())]
    pub interval: u64,
}

impl RunArgs {
    pub async fn run(self, pipeline: Pipeline) -> Result<()> {
        let interval = Duration::from_secs(self.interval.max(1));
        let exit = orches_daemon::run(pipeline, interval)
            .await
            .context("daemon failed")?;
        tracing::info!(reason = %exit, "daemon exited");
        Ok(())
    }
}
