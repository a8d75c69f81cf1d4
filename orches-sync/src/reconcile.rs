//! Reconciliation: apply a [`DiffSet`] to the service manager.
//!
//! ## Step order
//!
//! 1. Ensure install directories exist.
//! 2. Disable enableable removed units.
//! 3. Stop removed units (minus the self unit).
//! 4. Delete removed unit files.
//! 5. Copy added and modified unit files from the new snapshot.
//! 6. `daemon-reload` once.
//! 7. Run the post-sync action (finalises git / directory state).
//! 8. Try-restart modified units (minus the self unit).
//! 9. Start added units plus the restart set.
//! 10. Enable enableable added units.
//!
//! Steps 1, 6 and 7 abort the pass on failure. Per-unit failures are
//! collected: every unit of a step is attempted, and if any of steps 2 to 5
//! failed the pass returns before the reload, so the post-sync action never
//! finalises a partial change. Failures from steps 8 to 10 are returned once
//! every step ran.

use std::path::Path;

use orches_core::{build_catalog, Config, Unit};

use crate::diff::{self, names, DiffSet};
use crate::error::{Phase, SyncError, UnitFailure};
use crate::executor::{ExecError, Executor, UnitAction};

/// Outcome of one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncResult {
    /// The self unit changed; the caller must exit so its supervisor
    /// restarts it under the new definition.
    pub restart_needed: bool,
}

/// Hook run after unit files are written and the registry reloaded, before
/// anything is (re)started. Receives the dry-run flag.
pub type PostSync<'a> = Box<dyn FnOnce(bool) -> Result<(), SyncError> + 'a>;

pub struct Reconciler<'a> {
    executor: &'a dyn Executor,
    config: &'a Config,
    dry_run: bool,
}

#[derive(Default)]
struct Failures(Vec<UnitFailure>);

impl Failures {
    fn record(&mut self, phase: Phase, unit: &Unit, result: Result<(), ExecError>) {
        if let Err(source) = result {
            tracing::error!(unit = unit.name(), %phase, error = %source, "unit operation failed");
            // file operations are reported by file name, service-manager ones by service name
            let name = match phase {
                Phase::Remove | Phase::Copy => unit.name(),
                _ => unit.service_name(),
            };
            self.0.push(UnitFailure {
                phase,
                unit: name.to_string(),
                source,
            });
        }
    }

    fn into_result(self, restart_needed: bool) -> Result<SyncResult, SyncError> {
        if self.0.is_empty() {
            Ok(SyncResult { restart_needed })
        } else {
            Err(SyncError::Units {
                failures: self.0,
                restart_needed,
            })
        }
    }
}

impl<'a> Reconciler<'a> {
    pub fn new(executor: &'a dyn Executor, config: &'a Config, dry_run: bool) -> Self {
        Self {
            executor,
            config,
            dry_run,
        }
    }

    /// Apply `diff`, copying unit files out of `new_dir`.
    pub fn apply(
        &self,
        new_dir: &Path,
        diff: &DiffSet,
        post_sync: Option<PostSync<'_>>,
    ) -> Result<SyncResult, SyncError> {
        if diff.is_empty() {
            tracing::info!("no unit changes to process");
            self.run_post_sync(post_sync)?;
            return Ok(SyncResult::default());
        }

        if !diff.added.is_empty() {
            tracing::info!("Added: {:?}", names(&diff.added));
        }
        if !diff.removed.is_empty() {
            tracing::info!("Removed: {:?}", names(&diff.removed));
        }
        if !diff.modified.is_empty() {
            tracing::info!("Modified: {:?}", names(&diff.modified));
        }

        let is_self = |unit: &&Unit| self.config.is_self_unit(unit.name());
        let mut restart_needed = false;

        let to_restart: Vec<&Unit> = diff.modified.iter().filter(|u| !is_self(u)).collect();
        if to_restart.len() != diff.modified.len() {
            tracing::info!(unit = %self.config.self_unit, "self unit was changed, restart deferred");
            restart_needed = true;
        }

        let to_stop: Vec<&Unit> = diff.removed.iter().filter(|u| !is_self(u)).collect();
        if to_stop.len() != diff.removed.len() {
            tracing::info!(unit = %self.config.self_unit, "self unit was removed, stop deferred");
            restart_needed = true;
        }

        let exec = self.executor;
        let mut failures = Failures::default();

        for dir in self.config.unit_dirs.all() {
            exec.create_dir_all(dir)
                .map_err(|source| SyncError::CreateDir {
                    path: dir.to_path_buf(),
                    source,
                })?;
        }

        for unit in diff.removed.iter().filter(|u| u.can_be_enabled()) {
            failures.record(
                Phase::Disable,
                unit,
                exec.unit_action(UnitAction::Disable, unit.service_name()),
            );
        }

        for unit in &to_stop {
            failures.record(
                Phase::Stop,
                unit,
                exec.unit_action(UnitAction::Stop, unit.service_name()),
            );
        }

        for unit in &diff.removed {
            failures.record(Phase::Remove, unit, exec.remove_file(unit.install_path()));
        }

        for unit in diff.added.iter().chain(&diff.modified) {
            let source = new_dir.join(unit.name());
            failures.record(
                Phase::Copy,
                unit,
                exec.copy_file(&source, unit.install_path()),
            );
        }

        if !failures.0.is_empty() {
            tracing::error!(
                count = failures.0.len(),
                "unit files not fully updated, skipping reload and post-sync"
            );
            return failures.into_result(restart_needed);
        }

        exec.daemon_reload().map_err(SyncError::Reload)?;

        self.run_post_sync(post_sync)?;

        for unit in &to_restart {
            failures.record(
                Phase::Restart,
                unit,
                exec.unit_action(UnitAction::TryRestart, unit.service_name()),
            );
        }

        for unit in diff.added.iter().chain(to_restart.iter().copied()) {
            failures.record(
                Phase::Start,
                unit,
                exec.unit_action(UnitAction::Start, unit.service_name()),
            );
        }

        for unit in diff.added.iter().filter(|u| u.can_be_enabled()) {
            failures.record(
                Phase::Enable,
                unit,
                exec.unit_action(UnitAction::Enable, unit.service_name()),
            );
        }

        failures.into_result(restart_needed)
    }

    fn run_post_sync(&self, post_sync: Option<PostSync<'_>>) -> Result<(), SyncError> {
        match post_sync {
            Some(hook) => hook(self.dry_run).map_err(|err| SyncError::PostSync(Box::new(err))),
            None => Ok(()),
        }
    }
}

/// Build catalogs for `old` and `new`, diff them and apply the result.
pub fn sync_dirs(
    config: &Config,
    executor: &dyn Executor,
    old: &Path,
    new: &Path,
    dry_run: bool,
    post_sync: Option<PostSync<'_>>,
) -> Result<SyncResult, SyncError> {
    let old_units = build_catalog(old, &config.unit_dirs).map_err(|source| SyncError::Catalog {
        snapshot: "old",
        source,
    })?;
    let new_units = build_catalog(new, &config.unit_dirs).map_err(|source| SyncError::Catalog {
        snapshot: "new",
        source,
    })?;

    let changes = diff::diff(&old_units, &new_units);
    Reconciler::new(executor, config, dry_run).apply(new, &changes, post_sync)
}
