//! Shared command pipeline used by the CLI and the daemon worker.
//!
//! Every mutating command runs its blocking body under the process lock.
//! `status` only reads the repository and takes no lock.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use orches_core::Config;
use orches_git::Repo;
use tempfile::TempDir;

use crate::error::{io_err, SyncError};
use crate::executor::{self, ExecutorFactory};
use crate::lock::{with_lock, Interrupt};
use crate::reconcile::{sync_dirs, PostSync, SyncResult};

#[derive(Clone)]
pub struct Pipeline {
    config: Config,
    dry_run: bool,
    interrupt: Interrupt,
    executors: ExecutorFactory,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(config: Config, dry_run: bool, interrupt: Interrupt) -> Self {
        Self {
            config,
            dry_run,
            interrupt,
            executors: executor::default_factory(),
        }
    }

    /// Replace how executors are built for each command.
    pub fn with_executors(mut self, executors: ExecutorFactory) -> Self {
        self.executors = executors;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    /// Clone `remote` and deploy every unit it contains.
    pub async fn init(&self, remote: &str) -> Result<SyncResult, SyncError> {
        let remote = remote.to_string();
        self.locked(move |ctx| init_blocking(&ctx, &remote)).await
    }

    /// Fetch and deploy the upstream commit if it moved.
    pub async fn sync(&self) -> Result<SyncResult, SyncError> {
        self.locked(|ctx| sync_blocking(&ctx)).await
    }

    /// Remove every deployed unit and the local clone.
    pub async fn prune(&self) -> Result<(), SyncError> {
        self.locked(|ctx| prune_blocking(&ctx)).await
    }

    /// Replace the tracked remote with `remote`, deploying the difference.
    pub async fn switch(&self, remote: &str) -> Result<SyncResult, SyncError> {
        let remote = remote.to_string();
        self.locked(move |ctx| switch_blocking(&ctx, &remote)).await
    }

    /// Remote URL and deployed commit of the local clone.
    pub async fn status(&self) -> Result<String, SyncError> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || status_blocking(&config))
            .await
            .map_err(|err| SyncError::Task(err.to_string()))?
    }

    async fn locked<T, F>(&self, body: F) -> Result<T, SyncError>
    where
        F: FnOnce(Context) -> Result<T, SyncError> + Send + 'static,
        T: Send + 'static,
    {
        let ctx = Context {
            config: self.config.clone(),
            dry_run: self.dry_run,
            executors: self.executors.clone(),
        };
        with_lock(&self.config.lock_path(), &self.interrupt, move || body(ctx)).await?
    }
}

/// What a blocking body needs, moved onto the blocking thread.
struct Context {
    config: Config,
    dry_run: bool,
    executors: ExecutorFactory,
}

impl Context {
    fn sync_dirs(
        &self,
        old: &Path,
        new: &Path,
        post_sync: PostSync<'_>,
    ) -> Result<SyncResult, SyncError> {
        let executor = (self.executors)(&self.config, self.dry_run);
        sync_dirs(
            &self.config,
            executor.as_ref(),
            old,
            new,
            self.dry_run,
            Some(post_sync),
        )
    }
}

/// A fresh clone under the base directory, removed on drop unless promoted.
struct Staging {
    path: PathBuf,
}

impl Staging {
    fn clone_from(config: &Config, remote: &str) -> Result<Self, SyncError> {
        let path = config.staging_dir();
        if path.exists() {
            tracing::warn!(path = %path.display(), "removing leftover staging clone");
            fs::remove_dir_all(&path).map_err(|e| io_err(&path, e))?;
        }
        fs::create_dir_all(&config.base_dir).map_err(|e| io_err(&config.base_dir, e))?;

        tracing::info!(remote, "cloning");
        Repo::clone_from(remote, &path)?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn promote(&self, target: &Path, dry_run: bool) -> Result<(), SyncError> {
        if dry_run {
            tracing::info!(
                "[dry-run] would move {} to {}",
                self.path.display(),
                target.display()
            );
            return Ok(());
        }
        fs::rename(&self.path, target).map_err(|e| io_err(target, e))
    }
}

impl Drop for Staging {
    fn drop(&mut self) {
        if !self.path.exists() {
            return;
        }
        if let Err(err) = fs::remove_dir_all(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to remove staging clone");
        }
    }
}

fn scratch_dir(prefix: &str) -> Result<TempDir, SyncError> {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .map_err(|e| io_err(std::env::temp_dir(), e))
}

fn existing_repo(config: &Config) -> Result<Repo, SyncError> {
    let dir = config.repo_dir();
    if !dir.is_dir() {
        return Err(SyncError::NotInitialized);
    }
    Ok(Repo::open(dir))
}

fn init_blocking(ctx: &Context, remote: &str) -> Result<SyncResult, SyncError> {
    let repo_dir = ctx.config.repo_dir();
    if repo_dir.exists() {
        return Err(SyncError::AlreadyInitialized { path: repo_dir });
    }

    let staging = Staging::clone_from(&ctx.config, remote)?;
    let blank = scratch_dir("orches-initial-sync-")?;

    let result = ctx.sync_dirs(
        blank.path(),
        staging.path(),
        Box::new(|dry_run| staging.promote(&repo_dir, dry_run)),
    )?;

    if !ctx.dry_run {
        tracing::info!(remote, "initialized");
    }
    Ok(result)
}

fn sync_blocking(ctx: &Context) -> Result<SyncResult, SyncError> {
    let repo = existing_repo(&ctx.config)?;
    let before = repo.head()?;
    let remote = repo.remote_url("origin")?;

    tracing::info!(%remote, "fetching");
    repo.fetch()?;
    let after = repo.upstream()?;

    if before == after {
        tracing::info!("No new commits to sync");
        return Ok(SyncResult::default());
    }

    tracing::info!(from = %before, to = %after, "syncing");
    let old = repo.worktree(&before)?;
    let new = repo.worktree(&after)?;

    let result = ctx.sync_dirs(
        old.path(),
        new.path(),
        Box::new(|dry_run| {
            if dry_run {
                tracing::info!("[dry-run] would reset {} to {after}", repo.path().display());
                return Ok(());
            }
            repo.reset_hard(&after).map_err(SyncError::from)
        }),
    );

    for worktree in [old, new] {
        if let Err(err) = worktree.cleanup() {
            tracing::warn!(error = %err, "failed to remove worktree");
        }
    }

    let result = result?;
    if !ctx.dry_run {
        tracing::info!(commit = %after, "synced");
    }
    Ok(result)
}

fn prune_blocking(ctx: &Context) -> Result<(), SyncError> {
    let repo = existing_repo(&ctx.config)?;
    let blank = scratch_dir("orches-prune-")?;

    ctx.sync_dirs(
        repo.path(),
        blank.path(),
        Box::new(|dry_run| {
            let dir = repo.path();
            if dry_run {
                tracing::info!("[dry-run] would remove: {}", dir.display());
                return Ok(());
            }
            fs::remove_dir_all(dir).map_err(|e| io_err(dir, e))
        }),
    )?;

    if !ctx.dry_run {
        tracing::info!("pruned");
    }
    Ok(())
}

fn switch_blocking(ctx: &Context, remote: &str) -> Result<SyncResult, SyncError> {
    let repo = existing_repo(&ctx.config)?;
    let staging = Staging::clone_from(&ctx.config, remote)?;

    let result = ctx.sync_dirs(
        repo.path(),
        staging.path(),
        Box::new(|dry_run| {
            let dir = repo.path();
            if dry_run {
                tracing::info!("[dry-run] would remove: {}", dir.display());
                return staging.promote(dir, true);
            }
            fs::remove_dir_all(dir).map_err(|e| io_err(dir, e))?;
            staging.promote(dir, false)
        }),
    )?;

    if !ctx.dry_run {
        tracing::info!(remote, "switched");
    }
    Ok(result)
}

fn status_blocking(config: &Config) -> Result<String, SyncError> {
    let repo = existing_repo(config)?;
    let remote = repo.remote_url("origin")?;
    let head = repo.head()?;
    Ok(format!("remote: {remote}\nref: {head}"))
}
