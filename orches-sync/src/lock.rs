//! Cross-process exclusive lock.
//!
//! Acquisition is exclusive create of a fixed file, retried every
//! [`RETRY_INTERVAL`] until it succeeds or the [`Interrupt`] is raised.
//! The guard moves into the blocking thread that runs the protected body, so
//! the file is removed when the body returns, errors or panics. An interrupt
//! raised while the lock is held is only logged; the body is never cut short
//! and callers check [`Interrupt::is_raised`] afterwards.

use std::any::Any;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

pub const RETRY_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum LockError {
    #[error("interrupted while waiting for a lock")]
    Interrupted,

    #[error("failed to create lock file {path}: {source}")]
    Acquire {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to remove lock file {path}: {source}")]
    Release {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("locked operation panicked: {0}")]
    Panicked(String),
}

/// Sticky "stop requested" flag shared between signal handling, lock
/// acquisition and the daemon loop.
#[derive(Debug, Clone)]
pub struct Interrupt {
    rx: watch::Receiver<bool>,
}

/// Raising side of an [`Interrupt`].
#[derive(Debug)]
pub struct InterruptHandle(watch::Sender<bool>);

impl InterruptHandle {
    pub fn raise(&self) {
        self.0.send_replace(true);
    }
}

impl Interrupt {
    pub fn new() -> (InterruptHandle, Interrupt) {
        let (tx, rx) = watch::channel(false);
        (InterruptHandle(tx), Interrupt { rx })
    }

    /// An interrupt that is never raised.
    pub fn never() -> Interrupt {
        Interrupt::new().1
    }

    /// Raise on SIGINT or SIGTERM. Must be called inside a tokio runtime.
    pub fn from_signals() -> std::io::Result<Interrupt> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let (handle, interrupt) = Interrupt::new();

        tokio::spawn(async move {
            loop {
                let name = tokio::select! {
                    Some(()) = sigint.recv() => "SIGINT",
                    Some(()) = sigterm.recv() => "SIGTERM",
                    else => break,
                };
                tracing::info!(signal = name, "received interrupt signal");
                handle.raise();
            }
        });

        Ok(interrupt)
    }

    pub fn is_raised(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the interrupt is raised; pends forever if it cannot be.
    pub async fn raised(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

struct LockGuard {
    path: PathBuf,
    released: bool,
}

impl LockGuard {
    async fn acquire(path: &Path, interrupt: &Interrupt) -> Result<Self, LockError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| LockError::Acquire {
                path: path.to_path_buf(),
                source,
            })?;
        }

        let mut interrupt = interrupt.clone();
        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(0o600)
                .open(path)
            {
                Ok(_) => {
                    tracing::debug!(path = %path.display(), "acquired lock");
                    return Ok(Self {
                        path: path.to_path_buf(),
                        released: false,
                    });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    tracing::debug!(path = %path.display(), "lock is held, retrying");
                }
                Err(source) => {
                    return Err(LockError::Acquire {
                        path: path.to_path_buf(),
                        source,
                    })
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(RETRY_INTERVAL) => {}
                _ = interrupt.raised() => return Err(LockError::Interrupted),
            }
        }
    }

    fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        fs::remove_file(&self.path).map_err(|source| LockError::Release {
            path: self.path.clone(),
            source,
        })?;
        tracing::debug!(path = %self.path.display(), "released lock");
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "released lock"),
            Err(err) => {
                tracing::error!(path = %self.path.display(), error = %err, "failed to remove lock file")
            }
        }
    }
}

/// Run `body` on a blocking thread while holding the lock at `path`.
pub async fn with_lock<T, F>(path: &Path, interrupt: &Interrupt, body: F) -> Result<T, LockError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let guard = LockGuard::acquire(path, interrupt).await?;

    let mut task = tokio::task::spawn_blocking(move || {
        let output = body();
        let released = guard.release();
        (output, released)
    });

    let mut watcher = interrupt.clone();
    let mut noted = false;
    let joined = loop {
        tokio::select! {
            joined = &mut task => break joined,
            _ = watcher.raised(), if !noted => {
                noted = true;
                tracing::warn!("interrupt received while holding the lock, finishing the current operation first");
            }
        }
    };

    match joined {
        Ok((output, Ok(()))) => Ok(output),
        Ok((_, Err(err))) => {
            tracing::error!(error = %err, "operation finished but the lock could not be released");
            Err(err)
        }
        Err(err) if err.is_panic() => Err(LockError::Panicked(panic_message(err.into_panic()))),
        Err(err) => Err(LockError::Panicked(err.to_string())),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
