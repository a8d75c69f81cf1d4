//! Unit model.
//!
//! A [`Unit`] is one declarative file from a snapshot. Its [`UnitKind`] is a
//! pure function of the file extension, and everything the reconciler needs
//! (service name, install path, enableable flag) is derived once here.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::UnitDirs;

/// Closed set of recognised unit file kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitKind {
    Container,
    Network,
    Volume,
    Pod,
    Service,
    Socket,
    Mount,
    Timer,
}

impl UnitKind {
    pub const ALL: [UnitKind; 8] = [
        UnitKind::Container,
        UnitKind::Network,
        UnitKind::Volume,
        UnitKind::Pod,
        UnitKind::Service,
        UnitKind::Socket,
        UnitKind::Mount,
        UnitKind::Timer,
    ];

    /// Classify a file name by its extension.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let ext = Path::new(name).extension()?.to_str()?;
        Self::ALL.into_iter().find(|kind| kind.extension() == ext)
    }

    pub fn extension(self) -> &'static str {
        match self {
            UnitKind::Container => "container",
            UnitKind::Network => "network",
            UnitKind::Volume => "volume",
            UnitKind::Pod => "pod",
            UnitKind::Service => "service",
            UnitKind::Socket => "socket",
            UnitKind::Mount => "mount",
            UnitKind::Timer => "timer",
        }
    }

    /// Suffix the quadlet generator appends to the file stem, `None` for
    /// plain systemd units whose file name is already the service name.
    fn generated_suffix(self) -> Option<&'static str> {
        match self {
            UnitKind::Container => Some(".service"),
            UnitKind::Network => Some("-network.service"),
            UnitKind::Volume => Some("-volume.service"),
            UnitKind::Pod => Some("-pod.service"),
            UnitKind::Service | UnitKind::Socket | UnitKind::Mount | UnitKind::Timer => None,
        }
    }

    /// Translated into a generated service by the container manager.
    pub fn is_quadlet(self) -> bool {
        self.generated_suffix().is_some()
    }

    pub fn can_be_enabled(self) -> bool {
        matches!(self, UnitKind::Service | UnitKind::Socket | UnitKind::Timer)
    }

    /// Name the service manager knows a unit file `name` of this kind by.
    pub fn service_name(self, name: &str) -> String {
        match self.generated_suffix() {
            Some(suffix) => {
                let stem = name
                    .strip_suffix(self.extension())
                    .and_then(|rest| rest.strip_suffix('.'))
                    .unwrap_or(name);
                format!("{stem}{suffix}")
            }
            None => name.to_string(),
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// One unit file read from a snapshot directory. Never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    name: String,
    content: Vec<u8>,
    kind: UnitKind,
    service_name: String,
    install_path: PathBuf,
}

impl Unit {
    /// Build a unit from its file name and raw content.
    ///
    /// Returns `None` when the extension is not a recognised [`UnitKind`].
    pub fn new(name: impl Into<String>, content: Vec<u8>, dirs: &UnitDirs) -> Option<Self> {
        let name = name.into();
        let kind = UnitKind::from_file_name(&name)?;
        let service_name = kind.service_name(&name);
        let install_path = dirs.for_kind(kind).join(&name);
        Some(Self {
            name,
            content,
            kind,
            service_name,
            install_path,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn install_path(&self) -> &Path {
        &self.install_path
    }

    pub fn can_be_enabled(&self) -> bool {
        self.kind.can_be_enabled()
    }

    /// Byte equality of the file content. Only meaningful for units sharing
    /// a name.
    pub fn same_content(&self, other: &Unit) -> bool {
        self.content == other.content
    }
}
