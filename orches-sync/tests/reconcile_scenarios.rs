//! Reconciliation passes over real snapshot directories with a recording
//! executor.

mod common;

use std::fs;
use std::path::Path;

use orches_sync::{sync_dirs, Phase, SyncError};
use tempfile::TempDir;

use common::{test_config, write_units, Recorder};

const CADDY_8080: &str = "[Container]\nImage=docker.io/library/caddy\nPublishPort=8080:80\n";
const CADDY_9090: &str = "[Container]\nImage=docker.io/library/caddy\nPublishPort=9090:80\n";

struct Fixture {
    root: TempDir,
    recorder: Recorder,
}

impl Fixture {
    fn new() -> Self {
        Self {
            root: TempDir::new().unwrap(),
            recorder: Recorder::default(),
        }
    }

    fn snapshot(&self, name: &str, units: &[(&str, &str)]) -> std::path::PathBuf {
        let dir = self.root.path().join(name);
        write_units(&dir, units);
        dir
    }

    fn quadlet_dir(&self) -> std::path::PathBuf {
        self.root.path().join("containers/systemd")
    }

    fn run(&self, old: &Path, new: &Path, dry_run: bool) -> Result<orches_sync::SyncResult, SyncError> {
        let config = test_config(self.root.path());
        let executor = self.recorder.executor(dry_run);
        sync_dirs(&config, &executor, old, new, dry_run, None)
    }
}

#[test]
fn modified_unit_is_copied_then_restarted() {
    let fx = Fixture::new();
    let old = fx.snapshot("old", &[("caddy.container", CADDY_8080)]);
    let new = fx.snapshot("new", &[("caddy.container", CADDY_9090)]);
    write_units(&fx.quadlet_dir(), &[("caddy.container", CADDY_8080)]);

    let result = fx.run(&old, &new, false).unwrap();

    assert!(!result.restart_needed);
    assert_eq!(
        fx.recorder.calls(),
        vec![
            "copy caddy.container",
            "daemon-reload",
            "try-restart caddy.service",
            "start caddy.service",
        ]
    );
    let installed = fs::read_to_string(fx.quadlet_dir().join("caddy.container")).unwrap();
    assert!(installed.contains("9090"));
}

#[test]
fn renamed_unit_stops_old_and_starts_new() {
    let fx = Fixture::new();
    let old = fx.snapshot("old", &[("caddy.container", CADDY_8080)]);
    let new = fx.snapshot("new", &[("caddy2.container", CADDY_8080)]);
    write_units(&fx.quadlet_dir(), &[("caddy.container", CADDY_8080)]);

    let result = fx.run(&old, &new, false).unwrap();

    assert!(!result.restart_needed);
    assert_eq!(
        fx.recorder.calls(),
        vec![
            "stop caddy.service",
            "remove caddy.container",
            "copy caddy2.container",
            "daemon-reload",
            "start caddy2.service",
        ]
    );
    assert!(!fx.quadlet_dir().join("caddy.container").exists());
    assert!(fx.quadlet_dir().join("caddy2.container").exists());
}

#[test]
fn self_unit_change_is_written_but_not_restarted() {
    let fx = Fixture::new();
    let old = fx.snapshot("old", &[("orches.container", "[Container]\nImage=orches:1\n")]);
    let new = fx.snapshot("new", &[("orches.container", "[Container]\nImage=orches:2\n")]);
    write_units(&fx.quadlet_dir(), &[("orches.container", "[Container]\nImage=orches:1\n")]);

    let result = fx.run(&old, &new, false).unwrap();

    assert!(result.restart_needed);
    assert_eq!(
        fx.recorder.calls(),
        vec!["copy orches.container", "daemon-reload"]
    );
    let installed = fs::read_to_string(fx.quadlet_dir().join("orches.container")).unwrap();
    assert!(installed.contains("orches:2"));
}

#[test]
fn removed_self_unit_is_not_stopped() {
    let fx = Fixture::new();
    let old = fx.snapshot("old", &[("orches.container", "x")]);
    let new = fx.snapshot("new", &[]);
    write_units(&fx.quadlet_dir(), &[("orches.container", "x")]);

    let result = fx.run(&old, &new, false).unwrap();

    assert!(result.restart_needed);
    assert_eq!(
        fx.recorder.calls(),
        vec!["remove orches.container", "daemon-reload"]
    );
}

#[test]
fn enableable_units_are_enabled_and_disabled() {
    let fx = Fixture::new();
    let old = fx.snapshot("old", &[("backup.timer", "[Timer]\nOnCalendar=daily\n")]);
    let new = fx.snapshot(
        "new",
        &[
            ("web.service", "[Service]\nExecStart=/bin/true\n"),
            ("data.volume", "[Volume]\n"),
        ],
    );
    write_units(
        &fx.root.path().join("systemd/user"),
        &[("backup.timer", "[Timer]\nOnCalendar=daily\n")],
    );

    fx.run(&old, &new, false).unwrap();

    assert_eq!(
        fx.recorder.calls(),
        vec![
            "disable backup.timer",
            "stop backup.timer",
            "remove backup.timer",
            "copy data.volume",
            "copy web.service",
            "daemon-reload",
            "start data-volume.service",
            "start web.service",
            "enable web.service",
        ]
    );
    assert!(fx.root.path().join("systemd/user/web.service").exists());
    assert!(fx.quadlet_dir().join("data.volume").exists());
}

#[test]
fn empty_diff_only_runs_post_sync() {
    let fx = Fixture::new();
    let old = fx.snapshot("old", &[("caddy.container", CADDY_8080)]);
    let new = fx.snapshot("new", &[("caddy.container", CADDY_8080)]);
    let config = test_config(fx.root.path());
    let executor = fx.recorder.executor(false);

    let mut called_with = None;
    let result = sync_dirs(
        &config,
        &executor,
        &old,
        &new,
        false,
        Some(Box::new(|dry_run| {
            called_with = Some(dry_run);
            Ok(())
        })),
    )
    .unwrap();

    assert!(!result.restart_needed);
    assert_eq!(called_with, Some(false));
    assert!(fx.recorder.calls().is_empty());
}

#[test]
fn post_sync_runs_after_reload_and_before_start() {
    let fx = Fixture::new();
    let old = fx.snapshot("old", &[]);
    let new = fx.snapshot("new", &[("caddy.container", CADDY_8080)]);
    let config = test_config(fx.root.path());
    let executor = fx.recorder.executor(false);
    let recorder = fx.recorder.clone();

    let mut seen = Vec::new();
    sync_dirs(
        &config,
        &executor,
        &old,
        &new,
        false,
        Some(Box::new(|_| {
            seen = recorder.calls();
            Ok(())
        })),
    )
    .unwrap();

    assert_eq!(seen, vec!["copy caddy.container", "daemon-reload"]);
    assert_eq!(fx.recorder.calls().last().unwrap(), "start caddy.service");
}

#[test]
fn unit_failures_are_collected_without_aborting() {
    let fx = Fixture::new();
    let old = fx.snapshot("old", &[]);
    let new = fx.snapshot(
        "new",
        &[
            ("a.container", "[Container]\n"),
            ("b.container", "[Container]\n"),
            ("c.service", "[Service]\n"),
        ],
    );
    fx.recorder.fail_on("start a.service");
    fx.recorder.fail_on("enable c.service");

    let err = fx.run(&old, &new, false).unwrap_err();

    match &err {
        SyncError::Units {
            failures,
            restart_needed,
        } => {
            assert!(!restart_needed);
            assert_eq!(failures.len(), 2);
            assert_eq!(failures[0].phase, Phase::Start);
            assert_eq!(failures[0].unit, "a.service");
            assert_eq!(failures[1].phase, Phase::Enable);
            assert_eq!(failures[1].unit, "c.service");
        }
        other => panic!("unexpected error: {other}"),
    }
    let message = err.to_string();
    assert!(message.starts_with("2 unit operation(s) failed:"), "{message}");
    assert!(message.contains("failed to start unit a.service"), "{message}");

    let calls = fx.recorder.calls();
    assert!(calls.contains(&"start b.service".to_string()));
    assert!(calls.contains(&"start c.service".to_string()));
}

/// Run a pass with a post-sync hook and report whether the hook ran.
fn run_with_hook(
    fx: &Fixture,
    old: &Path,
    new: &Path,
) -> (Result<orches_sync::SyncResult, SyncError>, bool) {
    let config = test_config(fx.root.path());
    let executor = fx.recorder.executor(false);
    let mut hook_ran = false;
    let result = sync_dirs(
        &config,
        &executor,
        old,
        new,
        false,
        Some(Box::new(|_| {
            hook_ran = true;
            Ok(())
        })),
    );
    (result, hook_ran)
}

#[test]
fn failed_stop_and_remove_skip_post_sync() {
    let fx = Fixture::new();
    let old = fx.snapshot(
        "old",
        &[("caddy.container", CADDY_8080), ("web.service", "[Service]\n")],
    );
    let new = fx.snapshot("new", &[]);
    write_units(&fx.quadlet_dir(), &[("caddy.container", CADDY_8080)]);
    write_units(&fx.root.path().join("systemd/user"), &[("web.service", "[Service]\n")]);
    fx.recorder.fail_on("stop caddy.service");
    fx.recorder.fail_on("remove caddy.container");

    let (result, hook_ran) = run_with_hook(&fx, &old, &new);

    match result.unwrap_err() {
        SyncError::Units { failures, .. } => {
            let phases: Vec<Phase> = failures.iter().map(|f| f.phase).collect();
            assert_eq!(phases, vec![Phase::Stop, Phase::Remove]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!hook_ran);
    let calls = fx.recorder.calls();
    assert!(calls.contains(&"stop web.service".to_string()), "{calls:?}");
    assert!(calls.contains(&"remove web.service".to_string()), "{calls:?}");
    assert!(!calls.contains(&"daemon-reload".to_string()), "{calls:?}");
}

#[test]
fn failed_copy_skips_post_sync_but_keeps_restart_flag() {
    let fx = Fixture::new();
    let old = fx.snapshot("old", &[("orches.container", "[Container]\nImage=orches:1\n")]);
    let new = fx.snapshot(
        "new",
        &[
            ("caddy.container", CADDY_8080),
            ("orches.container", "[Container]\nImage=orches:2\n"),
        ],
    );
    fx.recorder.fail_on("copy caddy.container");

    let (result, hook_ran) = run_with_hook(&fx, &old, &new);

    let err = result.unwrap_err();
    assert!(err.restart_needed(), "got: {err}");
    assert!(!hook_ran);
    assert_eq!(
        fx.recorder.calls(),
        vec!["copy caddy.container", "copy orches.container"]
    );
}

#[test]
fn failed_reload_aborts_before_starting() {
    let fx = Fixture::new();
    let old = fx.snapshot("old", &[]);
    let new = fx.snapshot("new", &[("caddy.container", CADDY_8080)]);
    fx.recorder.fail_on("daemon-reload");

    let err = fx.run(&old, &new, false).unwrap_err();

    assert!(matches!(err, SyncError::Reload(_)), "got: {err}");
    assert_eq!(
        fx.recorder.calls(),
        vec!["copy caddy.container", "daemon-reload"]
    );
}

#[test]
fn dry_run_leaves_install_dirs_untouched() {
    let fx = Fixture::new();
    let old = fx.snapshot("old", &[("caddy.container", CADDY_8080)]);
    let new = fx.snapshot("new", &[("caddy2.container", CADDY_9090)]);

    let result = fx.run(&old, &new, true).unwrap();

    assert!(!result.restart_needed);
    assert!(!fx.quadlet_dir().exists());
    assert!(!fx.recorder.calls().is_empty());
}

#[test]
fn missing_snapshot_is_reported() {
    let fx = Fixture::new();
    let new = fx.snapshot("new", &[]);

    let err = fx.run(&fx.root.path().join("absent"), &new, false).unwrap_err();
    assert!(matches!(err, SyncError::Catalog { snapshot: "old", .. }), "got: {err}");
}
