use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::Path;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use orches_sync::{Interrupt, Pipeline, SyncError, SyncResult};

use crate::error::{io_err, DaemonError};
use crate::protocol::{self, Command, ERROR_PREFIX};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(120);

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const UNKNOWN_COMMAND: &str = "Unknown command";
const SHUTTING_DOWN: &str = "daemon is shutting down";

/// What the worker runs for each command.
#[allow(async_fn_in_trait)]
pub trait CommandHandler {
    async fn sync(&self) -> Result<SyncResult, SyncError>;
    async fn prune(&self) -> Result<(), SyncError>;
    async fn switch(&self, remote: &str) -> Result<SyncResult, SyncError>;
    async fn status(&self) -> Result<String, SyncError>;
}

impl CommandHandler for Pipeline {
    async fn sync(&self) -> Result<SyncResult, SyncError> {
        Pipeline::sync(self).await
    }

    async fn prune(&self) -> Result<(), SyncError> {
        Pipeline::prune(self).await
    }

    async fn switch(&self, remote: &str) -> Result<SyncResult, SyncError> {
        Pipeline::switch(self, remote).await
    }

    async fn status(&self) -> Result<String, SyncError> {
        Pipeline::status(self).await
    }
}

/// Why the daemon stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonExit {
    Interrupted,
    /// The self unit changed; the supervisor has to start the new definition.
    RestartNeeded,
    Pruned,
}

impl fmt::Display for DaemonExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DaemonExit::Interrupted => "interrupted",
            DaemonExit::RestartNeeded => "restart needed",
            DaemonExit::Pruned => "pruned",
        })
    }
}

struct Job {
    command: Command,
    respond_to: oneshot::Sender<String>,
}

/// Bind the daemon socket at `socket`, replacing a stale socket file.
pub fn bind(socket: &Path) -> Result<UnixListener, DaemonError> {
    if let Some(parent) = socket.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    prepare_socket_for_bind(socket)?;

    let listener = UnixListener::bind(socket).map_err(|e| io_err(socket, e))?;
    set_socket_permissions(socket)?;
    Ok(listener)
}

/// Run the daemon for `pipeline` until it has a reason to exit.
pub async fn run(pipeline: Pipeline, interval: Duration) -> Result<DaemonExit, DaemonError> {
    if !pipeline.config().repo_dir().is_dir() {
        return Err(SyncError::NotInitialized.into());
    }

    let socket = pipeline.config().socket_path();
    let listener = bind(&socket)?;
    tracing::info!(
        socket = %socket.display(),
        interval_secs = interval.as_secs(),
        "daemon listening"
    );

    let interrupt = pipeline.interrupt().clone();
    serve(listener, &socket, &pipeline, interval, interrupt).await
}

/// Drive the worker loop over an already bound `listener`.
///
/// The first periodic sync runs immediately. Connections are accepted
/// concurrently but their commands run one at a time on this task. On exit
/// the listener is closed, in-flight connections get their replies and the
/// socket file at `socket` is removed.
pub async fn serve<H: CommandHandler>(
    listener: UnixListener,
    socket: &Path,
    handler: &H,
    interval: Duration,
    mut interrupt: Interrupt,
) -> Result<DaemonExit, DaemonError> {
    let (job_tx, mut job_rx) = mpsc::channel::<Job>(1);
    let (stop_tx, stop_rx) = watch::channel(false);
    let server = tokio::spawn(socket_server_task(listener, job_tx, stop_rx));

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let exit = loop {
        tokio::select! {
            biased;
            _ = interrupt.raised() => break DaemonExit::Interrupted,
            _ = ticker.tick() => {
                tracing::info!("periodic sync");
                if let Some(exit) = periodic_sync(handler).await {
                    break exit;
                }
            }
            Some(job) = job_rx.recv() => {
                let (reply, exit) = process(handler, job.command).await;
                if job.respond_to.send(reply).is_err() {
                    tracing::warn!("client went away before the reply was sent");
                }
                if let Some(exit) = exit {
                    break exit;
                }
            }
        }
        if interrupt.is_raised() {
            break DaemonExit::Interrupted;
        }
    };

    tracing::info!(reason = %exit, "daemon stopping");
    drop(job_rx);
    stop_tx.send_replace(true);
    let joined = server.await;

    match fs::remove_file(socket) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => tracing::error!(socket = %socket.display(), error = %err, "failed to remove socket"),
    }

    joined.map_err(|err| DaemonError::Task {
        task: "socket server",
        message: err.to_string(),
    })?;
    Ok(exit)
}

async fn periodic_sync<H: CommandHandler>(handler: &H) -> Option<DaemonExit> {
    match handler.sync().await {
        Ok(result) => restart_exit(result),
        Err(err) => {
            tracing::error!(error = %err, "periodic sync failed");
            err.restart_needed().then_some(DaemonExit::RestartNeeded)
        }
    }
}

fn restart_exit(result: SyncResult) -> Option<DaemonExit> {
    result.restart_needed.then_some(DaemonExit::RestartNeeded)
}

fn error_reply(err: &SyncError) -> String {
    format!("{ERROR_PREFIX}{err}")
}

async fn process<H: CommandHandler>(handler: &H, command: Command) -> (String, Option<DaemonExit>) {
    tracing::info!(?command, "processing command");
    match command {
        Command::Sync => match handler.sync().await {
            Ok(result) => ("Synced".to_string(), restart_exit(result)),
            Err(err) => (
                error_reply(&err),
                err.restart_needed().then_some(DaemonExit::RestartNeeded),
            ),
        },
        Command::Prune => match handler.prune().await {
            Ok(()) => ("Pruned".to_string(), Some(DaemonExit::Pruned)),
            Err(err) => (error_reply(&err), None),
        },
        Command::Switch(remote) => match handler.switch(&remote).await {
            Ok(result) => (format!("Switched to {remote}"), restart_exit(result)),
            Err(err) => (
                error_reply(&err),
                err.restart_needed().then_some(DaemonExit::RestartNeeded),
            ),
        },
        Command::Status => match handler.status().await {
            Ok(status) => (status, None),
            Err(err) => (error_reply(&err), None),
        },
    }
}

async fn socket_server_task(
    listener: UnixListener,
    jobs: mpsc::Sender<Job>,
    mut stop: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let jobs = jobs.clone();
                    let stop = stop.clone();
                    connections.spawn(async move {
                        if let Err(err) = handle_socket_client(stream, jobs, stop).await {
                            tracing::error!(error = %err, "socket client error");
                        }
                    });
                }
                Err(err) => {
                    tracing::warn!(error = %err, "failed to accept connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    drop(listener);
    drop(jobs);
    while connections.join_next().await.is_some() {}
}

/// Serve one connection. A client that has not sent its request yet is
/// dropped on shutdown; one whose job was accepted still gets its reply.
async fn handle_socket_client(
    stream: UnixStream,
    jobs: mpsc::Sender<Job>,
    mut stop: watch::Receiver<bool>,
) -> Result<(), DaemonError> {
    let (mut reader, mut writer) = stream.into_split();

    let read = tokio::time::timeout(REQUEST_TIMEOUT, protocol::read_request(&mut reader));
    let request = tokio::select! {
        _ = stop.wait_for(|stopped| *stopped) => {
            tracing::debug!("dropping idle connection on shutdown");
            return Ok(());
        }
        read = read => read,
    };

    let reply = match request {
        Ok(Ok(request)) => match request.command() {
            Some(command) => submit(&jobs, command).await,
            None => {
                tracing::warn!(name = %request.name, "unknown command");
                UNKNOWN_COMMAND.to_string()
            }
        },
        Ok(Err(err)) => format!("{ERROR_PREFIX}{err}"),
        Err(_) => {
            tracing::warn!(timeout_secs = REQUEST_TIMEOUT.as_secs(), "client sent no request");
            format!("{ERROR_PREFIX}timed out waiting for request")
        }
    };

    writer
        .write_all(reply.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .shutdown()
        .await
        .map_err(|e| io_err("daemon socket shutdown", e))?;
    Ok(())
}

async fn submit(jobs: &mpsc::Sender<Job>, command: Command) -> String {
    let (tx, rx) = oneshot::channel();
    let job = Job {
        command,
        respond_to: tx,
    };
    if jobs.send(job).await.is_err() {
        return format!("{ERROR_PREFIX}{SHUTTING_DOWN}");
    }
    rx.await
        .unwrap_or_else(|_| format!("{ERROR_PREFIX}{SHUTTING_DOWN}"))
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::AlreadyRunning {
                socket: socket.to_path_buf(),
            });
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}
