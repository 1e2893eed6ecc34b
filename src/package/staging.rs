// SPDX-License-Identifier: AGPL-3.0-or-later
//! Copying an app tree into a staging directory, honoring exclude globs

use glob::Pattern;
use std::cell::Cell;
use std::ffi::OsStr;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::Result;

/// Files and directories never shipped in an app package
pub const DEFAULT_EXCLUDES: &[&str] = &[
    ".c9",
    ".coverage",
    ".git",
    ".gitignore",
    ".gitmodules",
    ".idea",
    ".python-version",
    ".vscode",
    "__pycache__",
    "*.pyc",
    "log",
    "local-*",
    "tcex.json",
    "tcex.d",
    "target",
    "tests",
];

/// Exclude globs matched against entry base names
#[derive(Debug, Clone, Default)]
pub struct ExcludeSet {
    patterns: Vec<Pattern>,
}

impl ExcludeSet {
    /// Compile a list of glob patterns
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut compiled = Vec::new();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() {
                continue;
            }
            compiled.push(Pattern::new(pattern)?);
        }

        Ok(Self { patterns: compiled })
    }

    /// Whether an entry with this base name is excluded
    pub fn is_excluded(&self, file_name: &OsStr) -> bool {
        let name = file_name.to_string_lossy();
        self.patterns.iter().any(|pattern| pattern.matches(&name))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Counters from a tree copy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub files_copied: u64,
    pub directories_created: u64,
    pub entries_excluded: u64,
}

/// Copy `source` into `destination`, skipping excluded entries
///
/// Excluded directories are not descended into. Symlinks to files are copied
/// as regular files; anything else that is not a file or directory is skipped.
pub fn copy_tree(source: &Path, destination: &Path, excludes: &ExcludeSet) -> Result<CopyStats> {
    let mut stats = CopyStats::default();
    let excluded = Cell::new(0u64);

    std::fs::create_dir_all(destination)?;

    let walker = WalkDir::new(source)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if excludes.is_excluded(entry.file_name()) {
                debug!(path = %entry.path().display(), "Excluded from package");
                excluded.set(excluded.get() + 1);
                false
            } else {
                true
            }
        });

    for entry in walker {
        let entry = entry?;
        let relative = match entry.path().strip_prefix(source) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        let target = destination.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
            stats.directories_created += 1;
        } else if entry.file_type().is_file() || entry.path().is_file() {
            std::fs::copy(entry.path(), &target)?;
            stats.files_copied += 1;
        } else {
            warn!(path = %entry.path().display(), "Skipping unsupported entry");
        }
    }

    stats.entries_excluded = excluded.get();
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_exclude_set_matches_base_names() {
        let excludes = ExcludeSet::new(["*.pyc", "local-*", ".git", ""]).unwrap();
        assert_eq!(excludes.len(), 3);
        assert!(excludes.is_excluded(OsStr::new("module.pyc")));
        assert!(excludes.is_excluded(OsStr::new("local-settings.json")));
        assert!(excludes.is_excluded(OsStr::new(".git")));
        assert!(!excludes.is_excluded(OsStr::new("app.py")));
        assert!(!excludes.is_excluded(OsStr::new(".gitignore")));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(ExcludeSet::new(["[unclosed"]).is_err());
    }

    #[test]
    fn test_copy_tree_skips_excluded_entries() {
        let source = tempdir().unwrap();
        let destination = tempdir().unwrap();

        fs::write(source.path().join("app.py"), "print('hi')").unwrap();
        fs::write(source.path().join("app.pyc"), "bytes").unwrap();
        fs::create_dir_all(source.path().join("lib/nested")).unwrap();
        fs::write(source.path().join("lib/nested/util.py"), "").unwrap();
        fs::create_dir_all(source.path().join("lib/__pycache__")).unwrap();
        fs::write(source.path().join("lib/__pycache__/util.pyc"), "").unwrap();
        fs::create_dir_all(source.path().join(".git/objects")).unwrap();
        fs::write(source.path().join(".git/objects/abc"), "").unwrap();

        let excludes = ExcludeSet::new(DEFAULT_EXCLUDES).unwrap();
        let target = destination.path().join("staged");
        let stats = copy_tree(source.path(), &target, &excludes).unwrap();

        assert!(target.join("app.py").exists());
        assert!(target.join("lib/nested/util.py").exists());
        assert!(!target.join("app.pyc").exists());
        assert!(!target.join(".git").exists());
        assert!(!target.join("lib/__pycache__").exists());

        assert_eq!(stats.files_copied, 2);
        assert_eq!(stats.directories_created, 2);
        // Pruned directories count once, their contents are never visited
        assert_eq!(stats.entries_excluded, 3);
    }
}
