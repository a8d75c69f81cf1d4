//! # orches-sync
//!
//! Snapshot diffing and reconciliation.
//!
//! [`diff::diff`] compares two catalogs, [`reconcile::Reconciler`] turns the
//! result into ordered service-manager operations through an
//! [`executor::Executor`], and [`pipeline::Pipeline`] wires git snapshots,
//! the [`lock`] and the reconciler into the `init`, `sync`, `prune`,
//! `switch` and `status` commands shared by the CLI and the daemon.

pub mod diff;
pub mod error;
pub mod executor;
pub mod lock;
pub mod pipeline;
pub mod reconcile;

pub use diff::{diff, DiffSet};
pub use error::{Phase, SyncError, UnitFailure};
pub use executor::{
    DryRunExecutor, ExecError, Executor, ExecutorFactory, SystemExecutor, UnitAction,
};
pub use lock::{with_lock, Interrupt, InterruptHandle, LockError};
pub use pipeline::Pipeline;
pub use reconcile::{sync_dirs, PostSync, Reconciler, SyncResult};
