//! Commands that go to the daemon when one is running.

use anyhow::{anyhow, bail, Context, Result};
use orches_daemon::{send_command, Command, DaemonRequest, ERROR_PREFIX};
use orches_sync::{Pipeline, SyncResult};

/// Hand `command` to the daemon, or run it here if none is listening.
///
/// Dry runs always stay in-process; the daemon would apply them for real.
pub async fn run(pipeline: &Pipeline, command: Command) -> Result<()> {
    if !pipeline.dry_run() {
        if let Some(reply) = relay(pipeline, &command).await? {
            eprintln!("Daemon responded: {reply}");
            if reply.starts_with(ERROR_PREFIX) {
                bail!("daemon failed to run {}", name(&command));
            }
            return Ok(());
        }
    }

    match command {
        Command::Sync => report(pipeline.sync().await.context("sync failed")?),
        Command::Prune => pipeline.prune().await.context("prune failed")?,
        Command::Switch(remote) => report(
            pipeline
                .switch(&remote)
                .await
                .with_context(|| format!("failed to switch to {remote}"))?,
        ),
        Command::Status => println!("{}", pipeline.status().await?),
    }
    Ok(())
}

async fn relay(pipeline: &Pipeline, command: &Command) -> Result<Option<String>> {
    let socket = pipeline.config().socket_path();
    let request = DaemonRequest::from(command.clone());
    tokio::task::spawn_blocking(move || send_command(&socket, &request))
        .await
        .map_err(|err| anyhow!("daemon client task failed: {err}"))?
        .context("failed to send command to daemon")
}

fn report(result: SyncResult) {
    if result.restart_needed {
        tracing::warn!("the orches unit changed, restart it to run the new definition");
    }
}

fn name(command: &Command) -> &'static str {
    match command {
        Command::Sync => "sync",
        Command::Prune => "prune",
        Command::Switch(_) => "switch",
        Command::Status => "status",
    }
}
