//! # orches-git
//!
//! Thin wrapper over the `git` binary: clone, fetch, rev-parse, reset and
//! detached worktrees used as immutable snapshots of one commit.

pub mod error;
pub mod repo;

pub use error::GitError;
pub use repo::{is_local_endpoint, Repo, Worktree};
