//! Git checkout operations.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

use crate::error::{io_err, GitError};

/// A git checkout on disk.
#[derive(Debug, Clone)]
pub struct Repo {
    path: PathBuf,
}

impl Repo {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `git clone <remote> <path>`.
    pub fn clone_from(remote: &str, path: &Path) -> Result<Self, GitError> {
        run_git([
            OsStr::new("clone"),
            OsStr::new("--quiet"),
            OsStr::new(remote),
            path.as_os_str(),
        ])?;
        Ok(Self::open(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fetch the default remote without touching the working tree.
    pub fn fetch(&self) -> Result<(), GitError> {
        self.git(["fetch", "--quiet"]).map(|_| ())
    }

    /// Resolve a revision to a full commit id.
    pub fn rev_parse(&self, rev: &str) -> Result<String, GitError> {
        self.git(["rev-parse", "--verify", rev])
    }

    pub fn head(&self) -> Result<String, GitError> {
        self.rev_parse("HEAD")
    }

    /// Commit of the branch the checkout tracks on its remote.
    pub fn upstream(&self) -> Result<String, GitError> {
        self.rev_parse("@{upstream}")
    }

    pub fn reset_hard(&self, rev: &str) -> Result<(), GitError> {
        self.git(["reset", "--quiet", "--hard", rev]).map(|_| ())
    }

    pub fn remote_url(&self, remote: &str) -> Result<String, GitError> {
        self.git(["remote", "get-url", remote])
    }

    /// Check `rev` out into a fresh temporary directory.
    pub fn worktree(&self, rev: &str) -> Result<Worktree, GitError> {
        let dir = tempfile::Builder::new()
            .prefix("orches-worktree-")
            .tempdir()
            .map_err(|e| io_err(std::env::temp_dir(), e))?;

        self.git([
            OsStr::new("worktree"),
            OsStr::new("add"),
            OsStr::new("--quiet"),
            OsStr::new("--detach"),
            dir.path().as_os_str(),
            OsStr::new(rev),
        ])?;

        tracing::debug!(rev, path = %dir.path().display(), "created worktree");
        Ok(Worktree {
            repo: self.clone(),
            dir: Some(dir),
        })
    }

    fn git<I, S>(&self, args: I) -> Result<String, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut full = vec![OsStr::new("-C").to_os_string(), self.path.clone().into_os_string()];
        full.extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        run_git(full)
    }
}

/// A detached checkout of one commit, removed on [`Worktree::cleanup`] or drop.
#[derive(Debug)]
pub struct Worktree {
    repo: Repo,
    dir: Option<TempDir>,
}

impl Worktree {
    pub fn path(&self) -> &Path {
        self.dir
            .as_ref()
            .map(TempDir::path)
            .unwrap_or_else(|| Path::new(""))
    }

    /// Unregister the worktree and delete its directory.
    pub fn cleanup(mut self) -> Result<(), GitError> {
        self.remove()
    }

    fn remove(&mut self) -> Result<(), GitError> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };

        let unregistered = self.repo.git([
            OsStr::new("worktree"),
            OsStr::new("remove"),
            OsStr::new("--force"),
            dir.path().as_os_str(),
        ]);
        let path = dir.path().to_path_buf();
        let deleted = match dir.close() {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(&path, err)),
        };

        unregistered?;
        deleted
    }
}

impl Drop for Worktree {
    fn drop(&mut self) {
        if let Err(err) = self.remove() {
            tracing::warn!(error = %err, "failed to clean up worktree");
        }
    }
}

/// Whether `remote` names a path on this machine rather than a URL or an
/// scp-style `host:path` address.
pub fn is_local_endpoint(remote: &str) -> bool {
    if remote.contains("://") {
        return false;
    }
    match remote.find(':') {
        Some(colon) => remote[..colon].contains('/'),
        None => true,
    }
}

fn run_git<I, S>(args: I) -> Result<String, GitError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<_> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
    let command = format!(
        "git {}",
        args.iter()
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    );

    let output = Command::new("git")
        .args(&args)
        .output()
        .map_err(|source| GitError::Spawn {
            command: command.clone(),
            source,
        })?;

    if !output.stderr.is_empty() {
        tracing::debug!(%command, stderr = %String::from_utf8_lossy(&output.stderr).trim(), "git output");
    }

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        Err(GitError::Failed {
            command,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
