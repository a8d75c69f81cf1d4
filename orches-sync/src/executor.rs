//! Side-effect capability used by the reconciler.
//!
//! [`SystemExecutor`] touches the filesystem and runs `systemctl`;
//! [`DryRunExecutor`] only logs what it would do. One of them is picked per
//! invocation with [`for_config`].

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use thiserror::Error;

use orches_core::Config;

/// Failure of a single executor call.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed ({status}): {output}")]
    Command {
        command: String,
        status: std::process::ExitStatus,
        output: String,
    },
}

/// Per-unit service-manager verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitAction {
    Enable,
    Disable,
    Stop,
    Start,
    TryRestart,
}

impl UnitAction {
    pub fn verb(self) -> &'static str {
        match self {
            UnitAction::Enable => "enable",
            UnitAction::Disable => "disable",
            UnitAction::Stop => "stop",
            UnitAction::Start => "start",
            UnitAction::TryRestart => "try-restart",
        }
    }
}

impl fmt::Display for UnitAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// Everything the reconciler is allowed to change.
pub trait Executor {
    fn create_dir_all(&self, path: &Path) -> Result<(), ExecError>;
    fn remove_file(&self, path: &Path) -> Result<(), ExecError>;
    fn copy_file(&self, from: &Path, to: &Path) -> Result<(), ExecError>;
    fn unit_action(&self, action: UnitAction, service: &str) -> Result<(), ExecError>;
    fn daemon_reload(&self) -> Result<(), ExecError>;
}

/// Builds the executor for one invocation.
pub type ExecutorFactory = Arc<dyn Fn(&Config, bool) -> Box<dyn Executor> + Send + Sync>;

/// Pick the real or logging-only executor.
pub fn for_config(config: &Config, dry_run: bool) -> Box<dyn Executor> {
    if dry_run {
        Box::new(DryRunExecutor::new(config.user_manager))
    } else {
        Box::new(SystemExecutor::new(config.user_manager))
    }
}

pub fn default_factory() -> ExecutorFactory {
    Arc::new(for_config)
}

fn systemctl_args(user: bool, verb: &str, service: Option<&str>) -> Vec<String> {
    let mut args = Vec::with_capacity(3);
    if user {
        args.push("--user".to_string());
    }
    args.push(verb.to_string());
    if let Some(service) = service {
        args.push(service.to_string());
    }
    args
}

fn render_command(args: &[String]) -> String {
    format!("systemctl {}", args.join(" "))
}

/// Applies changes for real.
#[derive(Debug, Clone)]
pub struct SystemExecutor {
    user: bool,
}

impl SystemExecutor {
    pub fn new(user: bool) -> Self {
        Self { user }
    }

    fn systemctl(&self, verb: &str, service: Option<&str>) -> Result<(), ExecError> {
        let args = systemctl_args(self.user, verb, service);
        let command = render_command(&args);
        tracing::debug!(%command, "running");

        let output = Command::new("systemctl")
            .args(&args)
            .output()
            .map_err(|source| ExecError::Spawn {
                command: command.clone(),
                source,
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let combined = combined.trim().to_string();
        if !combined.is_empty() {
            tracing::debug!(%command, output = %combined, "systemctl output");
        }

        if output.status.success() {
            Ok(())
        } else {
            Err(ExecError::Command {
                command,
                status: output.status,
                output: combined,
            })
        }
    }
}

impl Executor for SystemExecutor {
    fn create_dir_all(&self, path: &Path) -> Result<(), ExecError> {
        fs::create_dir_all(path).map_err(|source| ExecError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn remove_file(&self, path: &Path) -> Result<(), ExecError> {
        tracing::debug!(path = %path.display(), "remove");
        fs::remove_file(path).map_err(|source| ExecError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn copy_file(&self, from: &Path, to: &Path) -> Result<(), ExecError> {
        tracing::debug!(from = %from.display(), to = %to.display(), "copy");
        fs::copy(from, to).map(|_| ()).map_err(|source| ExecError::Io {
            path: to.to_path_buf(),
            source,
        })
    }

    fn unit_action(&self, action: UnitAction, service: &str) -> Result<(), ExecError> {
        self.systemctl(action.verb(), Some(service))
    }

    fn daemon_reload(&self) -> Result<(), ExecError> {
        self.systemctl("daemon-reload", None)
    }
}

/// Describes every change without making it.
#[derive(Debug, Clone)]
pub struct DryRunExecutor {
    user: bool,
}

impl DryRunExecutor {
    pub fn new(user: bool) -> Self {
        Self { user }
    }

    fn would_run(&self, verb: &str, service: Option<&str>) {
        let command = render_command(&systemctl_args(self.user, verb, service));
        tracing::info!("[dry-run] would run: {command}");
    }
}

impl Executor for DryRunExecutor {
    fn create_dir_all(&self, path: &Path) -> Result<(), ExecError> {
        if path.is_dir() {
            tracing::info!("[dry-run] directory exists: {}", path.display());
        } else {
            tracing::info!("[dry-run] would create: {}", path.display());
        }
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<(), ExecError> {
        tracing::info!("[dry-run] would remove: {}", path.display());
        Ok(())
    }

    fn copy_file(&self, from: &Path, to: &Path) -> Result<(), ExecError> {
        tracing::info!(
            "[dry-run] would copy: {} -> {}",
            from.display(),
            to.display()
        );
        Ok(())
    }

    fn unit_action(&self, action: UnitAction, service: &str) -> Result<(), ExecError> {
        self.would_run(action.verb(), Some(service));
        Ok(())
    }

    fn daemon_reload(&self) -> Result<(), ExecError> {
        self.would_run("daemon-reload", None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn user_scope_adds_flag() {
        assert_eq!(
            render_command(&systemctl_args(true, "stop", Some("caddy.service"))),
            "systemctl --user stop caddy.service"
        );
        assert_eq!(
            render_command(&systemctl_args(false, "daemon-reload", None)),
            "systemctl daemon-reload"
        );
    }

    #[test]
    fn dry_run_changes_nothing() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("caddy.container");
        fs::write(&src, "x").unwrap();
        let dir = tmp.path().join("units");
        let dst = dir.join("caddy.container");

        let exec = DryRunExecutor::new(true);
        exec.create_dir_all(&dir).unwrap();
        exec.copy_file(&src, &dst).unwrap();
        exec.remove_file(&src).unwrap();
        exec.unit_action(UnitAction::Stop, "caddy.service").unwrap();
        exec.daemon_reload().unwrap();

        assert!(!dir.exists());
        assert!(src.exists());
    }

    #[test]
    fn system_executor_copies_and_removes_files() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("web.service");
        fs::write(&src, "[Service]\n").unwrap();
        let dir = tmp.path().join("units");
        let dst = dir.join("web.service");

        let exec = SystemExecutor::new(false);
        exec.create_dir_all(&dir).unwrap();
        exec.copy_file(&src, &dst).unwrap();
        assert_eq!(fs::read_to_string(&dst).unwrap(), "[Service]\n");

        exec.remove_file(&dst).unwrap();
        assert!(!dst.exists());

        let err = exec.remove_file(&dst).unwrap_err();
        assert!(err.to_string().contains("web.service"));
    }
}
