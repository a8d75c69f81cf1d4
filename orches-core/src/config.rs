//! Process configuration.
//!
//! Everything that depends on privilege or on the execution environment is
//! detected exactly once by [`Config::detect`] and then passed around by value.
//! Tests build a [`Config`] directly with [`Config::new`] and synthetic paths.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::unit::UnitKind;

/// File name of the unit that deploys orches itself.
pub const DEFAULT_SELF_UNIT: &str = "orches.container";

/// Overrides the base directory when set.
pub const BASE_DIR_ENV: &str = "ORCHES_BASE_DIR";

pub const REPO_DIR: &str = "repo";
pub const STAGING_DIR: &str = "staging";
pub const LOCK_FILE: &str = "lock";
pub const SOCKET_FILE: &str = "socket";

const CONTAINER_MARKER: &str = "/run/.containerenv";
const SYSTEM_BASE_DIR: &str = "/var/lib/orches";
const SYSTEM_CONTAINER_DIR: &str = "/etc/containers/systemd";
const SYSTEM_SERVICE_DIR: &str = "/etc/systemd/system";

/// Where orches is running, as far as directory layout is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionContext {
    /// Root on the host.
    System,
    /// Unprivileged user on the host.
    User,
    /// Inside a container (podman sets `/run/.containerenv`).
    Container,
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionContext::System => write!(f, "system"),
            ExecutionContext::User => write!(f, "user"),
            ExecutionContext::Container => write!(f, "container"),
        }
    }
}

/// Install directories for unit files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitDirs {
    /// Quadlet directory (`.container`, `.network`, `.volume`, `.pod`).
    pub container: PathBuf,
    /// Plain systemd unit directory (`.service`, `.socket`, `.mount`, `.timer`).
    pub service: PathBuf,
}

impl UnitDirs {
    pub fn system() -> Self {
        Self {
            container: PathBuf::from(SYSTEM_CONTAINER_DIR),
            service: PathBuf::from(SYSTEM_SERVICE_DIR),
        }
    }

    pub fn user(home: &Path) -> Self {
        let config = home.join(".config");
        Self {
            container: config.join("containers").join("systemd"),
            service: config.join("systemd").join("user"),
        }
    }

    /// Install directory for a unit kind.
    pub fn for_kind(&self, kind: UnitKind) -> &Path {
        if kind.is_quadlet() {
            &self.container
        } else {
            &self.service
        }
    }

    pub fn all(&self) -> [&Path; 2] {
        [&self.container, &self.service]
    }
}

/// Immutable per-process configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub base_dir: PathBuf,
    pub context: ExecutionContext,
    /// Drive the per-user service manager (`systemctl --user`).
    pub user_manager: bool,
    pub unit_dirs: UnitDirs,
    /// File name of the unit whose restart is deferred to the supervisor.
    pub self_unit: String,
}

impl Config {
    pub fn new(base_dir: impl Into<PathBuf>, unit_dirs: UnitDirs, user_manager: bool) -> Self {
        let context = if user_manager {
            ExecutionContext::User
        } else {
            ExecutionContext::System
        };
        Self {
            base_dir: base_dir.into(),
            context,
            user_manager,
            unit_dirs,
            self_unit: DEFAULT_SELF_UNIT.to_string(),
        }
    }

    /// Probe the environment: container marker, real uid, home directory.
    pub fn detect() -> Result<Self, ConfigError> {
        let root = nix::unistd::getuid().is_root();
        let in_container = Path::new(CONTAINER_MARKER).exists();

        let context = if in_container {
            ExecutionContext::Container
        } else if root {
            ExecutionContext::System
        } else {
            ExecutionContext::User
        };

        let (base_dir, unit_dirs) = match context {
            ExecutionContext::System | ExecutionContext::Container => {
                (PathBuf::from(SYSTEM_BASE_DIR), UnitDirs::system())
            }
            ExecutionContext::User => {
                let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
                (
                    home.join(".config").join("orches"),
                    UnitDirs::user(&home),
                )
            }
        };

        let base_dir = env::var_os(BASE_DIR_ENV)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or(base_dir);

        let config = Self {
            base_dir,
            context,
            user_manager: !root,
            unit_dirs,
            self_unit: DEFAULT_SELF_UNIT.to_string(),
        };
        tracing::debug!(
            base_dir = %config.base_dir.display(),
            context = %config.context,
            user_manager = config.user_manager,
            "resolved configuration"
        );
        Ok(config)
    }

    pub fn with_self_unit(mut self, name: impl Into<String>) -> Self {
        self.self_unit = name.into();
        self
    }

    pub fn repo_dir(&self) -> PathBuf {
        self.base_dir.join(REPO_DIR)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.base_dir.join(STAGING_DIR)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.base_dir.join(LOCK_FILE)
    }

    pub fn socket_path(&self) -> PathBuf {
        self.base_dir.join(SOCKET_FILE)
    }

    /// Whether `name` is the unit that deploys orches itself.
    pub fn is_self_unit(&self, name: &str) -> bool {
        name == self.self_unit
    }
}
