#![allow(dead_code)]

use std::collections::HashSet;
use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};

use orches_core::{Config, UnitDirs};
use orches_sync::{ExecError, Executor, ExecutorFactory, UnitAction};

/// Shared call log for [`RecordingExecutor`]s.
///
/// Calls are recorded as `"<verb> <target>"`, with file operations named by
/// file name and service-manager calls by service name. Directory creation is
/// performed but not recorded.
#[derive(Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<String>>>,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl Recorder {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Make the call rendered as `call` fail.
    pub fn fail_on(&self, call: &str) {
        self.failing.lock().unwrap().insert(call.to_string());
    }

    pub fn executor(&self, dry_run: bool) -> RecordingExecutor {
        RecordingExecutor {
            recorder: self.clone(),
            dry_run,
        }
    }

    pub fn factory(&self) -> ExecutorFactory {
        let recorder = self.clone();
        Arc::new(move |_: &Config, dry_run: bool| {
            Box::new(recorder.executor(dry_run)) as Box<dyn Executor>
        })
    }

    fn record(&self, call: String) -> Result<(), ExecError> {
        let failing = self.failing.lock().unwrap().contains(&call);
        self.calls.lock().unwrap().push(call.clone());
        if failing {
            return Err(ExecError::Command {
                command: call,
                status: ExitStatus::from_raw(1 << 8),
                output: "simulated failure".to_string(),
            });
        }
        Ok(())
    }
}

/// Executor that logs every call and applies file changes for real unless
/// `dry_run` is set. Never runs `systemctl`.
pub struct RecordingExecutor {
    recorder: Recorder,
    dry_run: bool,
}

fn file_name(path: &Path) -> String {
    path.file_name().unwrap().to_string_lossy().into_owned()
}

fn io(path: &Path, source: std::io::Error) -> ExecError {
    ExecError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl Executor for RecordingExecutor {
    fn create_dir_all(&self, path: &Path) -> Result<(), ExecError> {
        if !self.dry_run {
            fs::create_dir_all(path).map_err(|e| io(path, e))?;
        }
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<(), ExecError> {
        self.recorder.record(format!("remove {}", file_name(path)))?;
        if !self.dry_run {
            fs::remove_file(path).map_err(|e| io(path, e))?;
        }
        Ok(())
    }

    fn copy_file(&self, from: &Path, to: &Path) -> Result<(), ExecError> {
        self.recorder.record(format!("copy {}", file_name(to)))?;
        if !self.dry_run {
            fs::copy(from, to).map_err(|e| io(to, e))?;
        }
        Ok(())
    }

    fn unit_action(&self, action: UnitAction, service: &str) -> Result<(), ExecError> {
        self.recorder.record(format!("{action} {service}"))
    }

    fn daemon_reload(&self) -> Result<(), ExecError> {
        self.recorder.record("daemon-reload".to_string())
    }
}

/// Config rooted entirely under `root`.
pub fn test_config(root: &Path) -> Config {
    let dirs = UnitDirs {
        container: root.join("containers/systemd"),
        service: root.join("systemd/user"),
    };
    Config::new(root.join("orches"), dirs, true)
}

pub fn write_units(dir: &Path, units: &[(&str, &str)]) {
    fs::create_dir_all(dir).unwrap();
    for (name, content) in units {
        fs::write(dir.join(name), content).unwrap();
    }
}
