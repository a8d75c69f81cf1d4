//! Catalog diffing.

use orches_core::{Catalog, Unit};

/// Units that differ between two catalogs. Unchanged units are omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSet {
    /// In the new catalog only.
    pub added: Vec<Unit>,
    /// In the old catalog only.
    pub removed: Vec<Unit>,
    /// In both, with different content. Holds the new version.
    pub modified: Vec<Unit>,
}

impl DiffSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// Compare two catalogs by file name. Lists are sorted by name.
pub fn diff(old: &Catalog, new: &Catalog) -> DiffSet {
    let mut set = DiffSet::default();

    for (name, unit) in old {
        if !new.contains_key(name) {
            set.removed.push(unit.clone());
        }
    }

    for (name, unit) in new {
        match old.get(name) {
            None => set.added.push(unit.clone()),
            Some(previous) if !previous.same_content(unit) => set.modified.push(unit.clone()),
            Some(_) => {}
        }
    }

    set
}

/// Display helper for log lines.
pub(crate) fn names(units: &[Unit]) -> Vec<&str> {
    units.iter().map(Unit::name).collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    use orches_core::UnitDirs;

    use super::*;

    fn dirs() -> UnitDirs {
        UnitDirs {
            container: PathBuf::from("/q"),
            service: PathBuf::from("/s"),
        }
    }

    fn catalog(entries: &[(&str, &str)]) -> Catalog {
        entries
            .iter()
            .map(|(name, content)| {
                let unit = Unit::new(*name, content.as_bytes().to_vec(), &dirs()).unwrap();
                (name.to_string(), unit)
            })
            .collect()
    }

    #[test]
    fn identical_catalogs_have_empty_diff() {
        let a = catalog(&[("caddy.container", "8080"), ("web.service", "x")]);
        assert!(diff(&a, &a).is_empty());
        assert!(diff(&Catalog::new(), &Catalog::new()).is_empty());
    }

    #[test]
    fn modified_content_is_detected() {
        let old = catalog(&[("caddy.container", "PublishPort=8080")]);
        let new = catalog(&[("caddy.container", "PublishPort=9090")]);

        let set = diff(&old, &new);
        assert!(set.added.is_empty());
        assert!(set.removed.is_empty());
        assert_eq!(names(&set.modified), vec!["caddy.container"]);
        assert_eq!(set.modified[0].content(), b"PublishPort=9090");
    }

    #[test]
    fn rename_is_remove_plus_add() {
        let old = catalog(&[("caddy.container", "x")]);
        let new = catalog(&[("caddy2.container", "x")]);

        let set = diff(&old, &new);
        assert_eq!(names(&set.added), vec!["caddy2.container"]);
        assert_eq!(names(&set.removed), vec!["caddy.container"]);
        assert!(set.modified.is_empty());
    }

    #[test]
    fn sets_partition_changed_names() {
        let old = catalog(&[
            ("a.container", "1"),
            ("b.network", "1"),
            ("c.service", "1"),
            ("d.timer", "1"),
        ]);
        let new = catalog(&[
            ("b.network", "2"),
            ("c.service", "1"),
            ("d.timer", "2"),
            ("e.socket", "1"),
        ]);
        let set = diff(&old, &new);

        for unit in &set.added {
            assert!(new.contains_key(unit.name()) && !old.contains_key(unit.name()));
        }
        for unit in &set.removed {
            assert!(old.contains_key(unit.name()) && !new.contains_key(unit.name()));
        }
        for unit in &set.modified {
            assert!(!old[unit.name()].same_content(&new[unit.name()]));
        }

        let changed: Vec<&str> = names(&set.added)
            .into_iter()
            .chain(names(&set.removed))
            .chain(names(&set.modified))
            .collect();
        let unique: BTreeSet<&str> = changed.iter().copied().collect();
        assert_eq!(unique.len(), changed.len(), "sets must be disjoint");
        assert_eq!(
            unique,
            BTreeSet::from(["a.container", "b.network", "d.timer", "e.socket"])
        );
    }
}
