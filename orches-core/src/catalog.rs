//! Catalog of units found in one snapshot directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::config::UnitDirs;
use crate::error::{io_err, CatalogError};
use crate::unit::{Unit, UnitKind};

/// Units keyed by file name. Ordered so diffs come out sorted.
pub type Catalog = BTreeMap<String, Unit>;

/// List `dir` non-recursively and read every recognised unit file.
///
/// Subdirectories and files with unknown extensions are skipped; a read
/// failure on a recognised file fails the whole build.
pub fn build_catalog(dir: &Path, dirs: &UnitDirs) -> Result<Catalog, CatalogError> {
    let mut catalog = Catalog::new();

    for entry in fs::read_dir(dir).map_err(|e| io_err(dir, e))? {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();

        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            tracing::warn!(path = %path.display(), "skipping non UTF-8 file name");
            continue;
        };

        if UnitKind::from_file_name(&name).is_none() {
            tracing::info!(unit = %name, "skipping unknown unit type");
            continue;
        }

        let metadata = fs::metadata(&path).map_err(|e| io_err(&path, e))?;
        if metadata.is_dir() {
            continue;
        }

        let content = fs::read(&path).map_err(|e| io_err(&path, e))?;
        if let Some(unit) = Unit::new(name.clone(), content, dirs) {
            catalog.insert(name, unit);
        }
    }

    Ok(catalog)
}
