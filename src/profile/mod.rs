// SPDX-License-Identifier: AGPL-3.0-or-later
//! Test profiles
//!
//! A profile file is a JSON array of named profile records. Profile files
//! live in the directories listed under `profile_include_dirs`.

mod args;
mod generator;
mod upgrade;
mod validation;

pub use args::{app_args, default_args, expand_valid_values, staging_data, JOB_ID};
pub use generator::{CreateRequest, CreatedProfile, ProfileGenerator, UpdateSummary};
pub use upgrade::upgrade_profile;
pub use validation::{rules_from_context, KeyValueStore, Operator, RedisStore, ValidationRule};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Result, TcexError};

/// A raw profile record as stored on disk
pub type ProfileEntry = Map<String, Value>;

/// A profile record in its current shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub profile_name: String,

    #[serde(default)]
    pub description: String,

    /// Manifest the profile was generated from
    #[serde(default = "default_install_json")]
    pub install_json: String,

    #[serde(default)]
    pub args: ProfileArgs,

    /// Clear the playbook context before each run
    #[serde(default = "default_true")]
    pub autoclear: bool,

    /// Staging data files loaded into the key/value store
    #[serde(default)]
    pub data_files: Vec<String>,

    /// Exit codes considered a pass
    #[serde(default = "default_exit_codes")]
    pub exit_codes: Vec<i64>,

    #[serde(default)]
    pub groups: Vec<String>,

    #[serde(default)]
    pub quiet: bool,

    #[serde(default)]
    pub validations: Vec<ValidationRule>,
}

/// App arguments split into app parameters and platform defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileArgs {
    #[serde(default)]
    pub app: Map<String, Value>,

    #[serde(default)]
    pub default: Map<String, Value>,
}

impl Profile {
    /// Raw form written to profile files
    pub fn to_entry(&self) -> Result<ProfileEntry> {
        match serde_json::to_value(self)? {
            Value::Object(entry) => Ok(entry),
            _ => Ok(ProfileEntry::new()),
        }
    }
}

/// Name of a raw profile record
pub fn entry_name(entry: &ProfileEntry) -> Option<&str> {
    entry.get("profile_name").and_then(Value::as_str)
}

/// Look up an argument in a raw record of either the current or the legacy shape
pub fn entry_arg<'a>(entry: &'a ProfileEntry, key: &str) -> Option<&'a Value> {
    let args = entry.get("args")?.as_object()?;

    ["default", "app"]
        .iter()
        .filter_map(|section| args.get(*section).and_then(Value::as_object))
        .find_map(|section| section.get(key))
        .or_else(|| args.get(key))
}

/// One profile file and its records
#[derive(Debug, Clone)]
pub struct ProfileFile {
    pub path: PathBuf,
    pub entries: Vec<ProfileEntry>,
}

impl ProfileFile {
    /// An empty file that does not exist on disk yet
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            entries: Vec::new(),
        }
    }

    /// Load a profile file; it must hold a JSON array of objects
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        let invalid = |message: String| TcexError::InvalidProfileFile {
            path: path.display().to_string(),
            message,
        };

        let value: Value = serde_json::from_str(&contents).map_err(|e| invalid(e.to_string()))?;
        let Value::Array(items) = value else {
            return Err(invalid("expected a JSON array of profiles".to_string()));
        };

        let entries = items
            .into_iter()
            .enumerate()
            .map(|(index, item)| match item {
                Value::Object(entry) => Ok(entry),
                _ => Err(invalid(format!("item {} is not an object", index))),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    /// Load the file if it exists, else start an empty one
    pub fn load_or_new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::new(path))
        }
    }

    /// Write the records as pretty JSON with sorted keys
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(&self.path, contents + "\n")?;
        debug!(path = %self.path.display(), profiles = self.entries.len(), "Saved profile file");
        Ok(())
    }

    /// Index of the record with this name
    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry_name(entry) == Some(name))
    }
}

/// All profile files found in a set of directories
#[derive(Debug, Clone, Default)]
pub struct ProfileStore {
    files: Vec<ProfileFile>,
}

impl ProfileStore {
    /// Load every `*.json` file directly inside each directory
    ///
    /// Directories that do not exist are skipped.
    pub fn load<P: AsRef<Path>>(dirs: &[P]) -> Result<Self> {
        let mut files = Vec::new();

        for dir in dirs {
            let dir = dir.as_ref();
            if !dir.is_dir() {
                debug!(dir = %dir.display(), "Profile directory does not exist");
                continue;
            }

            let mut paths = Vec::new();
            for entry in std::fs::read_dir(dir)? {
                let path = entry?.path();
                if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                    paths.push(path);
                }
            }
            paths.sort();

            for path in paths {
                files.push(ProfileFile::load(&path)?);
            }
        }

        Ok(Self { files })
    }

    pub fn files(&self) -> &[ProfileFile] {
        &self.files
    }

    pub fn files_mut(&mut self) -> &mut [ProfileFile] {
        &mut self.files
    }

    /// Find a record and the file that owns it
    pub fn find(&self, name: &str) -> Option<(&ProfileFile, &ProfileEntry)> {
        self.files.iter().find_map(|file| {
            file.position(name)
                .map(|index| (file, &file.entries[index]))
        })
    }

    /// Index of the owning file and record for a name
    pub fn locate(&self, name: &str) -> Option<(usize, usize)> {
        self.files
            .iter()
            .enumerate()
            .find_map(|(file_index, file)| file.position(name).map(|index| (file_index, index)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.locate(name).is_some()
    }

    /// Sorted names of every record
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .files
            .iter()
            .flat_map(|file| file.entries.iter())
            .filter_map(|entry| entry_name(entry).map(str::to_string))
            .collect();
        names.sort();
        names
    }

    /// Names that appear more than once across all files
    pub fn duplicates(&self) -> Vec<String> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for entry in self.files.iter().flat_map(|file| file.entries.iter()) {
            if let Some(name) = entry_name(entry) {
                *counts.entry(name).or_default() += 1;
            }
        }

        counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(name, _)| name.to_string())
            .collect()
    }
}

// Default value functions

fn default_install_json() -> String {
    crate::manifest::MANIFEST_FILE_NAME.to_string()
}

fn default_true() -> bool {
    true
}

fn default_exit_codes() -> Vec<i64> {
    vec![0]
}
