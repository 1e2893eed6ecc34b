// SPDX-License-Identifier: AGPL-3.0-or-later
//! App manifest (install.json) discovery and parsing
//!
//! An app directory holds either a single `install.json` or several
//! prefixed manifests (`<prefix>.install.json`), one per packaged app.

mod schema;

pub use schema::SchemaValidator;

use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::error::{Result, TcexError};

/// File name of an unprefixed manifest
pub const MANIFEST_FILE_NAME: &str = "install.json";

const MANIFEST_SUFFIX: &str = ".install.json";

/// A manifest file found in an app directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestFile {
    /// Path to the manifest
    pub path: PathBuf,
    prefix: Option<String>,
}

impl ManifestFile {
    /// Recognize a manifest by file name
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        let path = path.as_ref();
        let file_name = path.file_name()?.to_str()?;
        let prefix = manifest_prefix(file_name)?;

        Some(Self {
            path: path.to_path_buf(),
            prefix,
        })
    }

    /// Prefix of a `<prefix>.install.json` manifest, `None` for `install.json`
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Read the raw manifest document
    pub fn load_value(&self) -> Result<Value> {
        let contents = std::fs::read_to_string(&self.path)?;
        serde_json::from_str(&contents).map_err(|e| TcexError::InvalidManifest {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })
    }
}

/// Classify a file name: `Some(None)` for `install.json`,
/// `Some(Some(prefix))` for `<prefix>.install.json`, `None` otherwise
pub fn manifest_prefix(file_name: &str) -> Option<Option<String>> {
    if file_name == MANIFEST_FILE_NAME {
        return Some(None);
    }

    match file_name.strip_suffix(MANIFEST_SUFFIX) {
        Some(prefix) if !prefix.is_empty() => Some(Some(prefix.to_string())),
        _ => None,
    }
}

/// Find every manifest in an app directory (not recursive)
///
/// The unprefixed `install.json` sorts first, prefixed manifests follow by name.
pub fn discover_manifests<P: AsRef<Path>>(app_dir: P) -> Result<Vec<ManifestFile>> {
    let app_dir = app_dir.as_ref();
    let mut manifests = Vec::new();

    if app_dir.is_dir() {
        for entry in std::fs::read_dir(app_dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.is_file() {
                if let Some(manifest) = ManifestFile::from_path(&path) {
                    manifests.push(manifest);
                }
            }
        }
    }

    if manifests.is_empty() {
        return Err(TcexError::ManifestNotFound {
            path: app_dir.display().to_string(),
        });
    }

    manifests.sort_by(|a, b| {
        (a.prefix.is_some(), &a.prefix).cmp(&(b.prefix.is_some(), &b.prefix))
    });
    Ok(manifests)
}

/// The parts of install.json the tools read
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallJson {
    /// App version, e.g. `1.2.0`
    #[serde(default)]
    pub program_version: Option<String>,

    /// Runtime level (Playbook, Organization, ...)
    #[serde(default)]
    pub runtime_level: Option<String>,

    #[serde(default)]
    pub display_name: Option<String>,

    /// Platform feature flags
    #[serde(default)]
    pub features: Vec<String>,

    /// Declared input parameters
    #[serde(default)]
    pub params: Vec<Param>,

    /// Playbook section (output variables)
    #[serde(default)]
    pub playbook: Option<PlaybookSection>,
}

/// A declared app parameter
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Param {
    pub name: String,

    #[serde(rename = "type")]
    pub param_type: String,

    #[serde(default)]
    pub default: Option<Value>,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub valid_values: Vec<String>,

    #[serde(default)]
    pub playbook_data_type: Vec<String>,

    #[serde(default)]
    pub encrypt: bool,

    #[serde(default)]
    pub hidden: bool,
}

/// Playbook section of the manifest
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybookSection {
    #[serde(default)]
    pub output_variables: Vec<OutputVariable>,
}

/// An output variable written by a playbook app
#[derive(Debug, Clone, Deserialize)]
pub struct OutputVariable {
    pub name: String,

    #[serde(rename = "type")]
    pub variable_type: String,
}

impl InstallJson {
    /// Parse a manifest from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(TcexError::ManifestNotFound {
                path: path.display().to_string(),
            });
        }

        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|e| TcexError::InvalidManifest {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Parse a manifest from an already loaded document
    pub fn from_value(value: &Value, path: &Path) -> Result<Self> {
        Self::deserialize(value).map_err(|e| TcexError::InvalidManifest {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Major and minor parts of `programVersion` (defaults `1` and `0`)
    pub fn major_minor_version(&self) -> (String, String) {
        let mut parts = self
            .program_version
            .as_deref()
            .unwrap_or_default()
            .split('.')
            .map(str::trim);

        let major = parts
            .next()
            .filter(|part| !part.is_empty())
            .unwrap_or("1")
            .to_string();
        let minor = parts
            .next()
            .filter(|part| !part.is_empty())
            .unwrap_or("0")
            .to_string();

        (major, minor)
    }

    /// Whether the app runs as a playbook app
    pub fn is_playbook(&self) -> bool {
        self.runtime_level
            .as_deref()
            .is_some_and(|level| level.eq_ignore_ascii_case("playbook"))
    }

    /// Output variables in `#App:<job>:<name>!<type>` form, in declaration order
    pub fn output_variables(&self, job_id: &str) -> Vec<String> {
        self.playbook
            .iter()
            .flat_map(|playbook| &playbook.output_variables)
            .map(|variable| format_variable(job_id, &variable.name, &variable.variable_type))
            .collect()
    }

    /// Whether a parameter with this name is declared
    pub fn has_param(&self, name: &str) -> bool {
        self.params.iter().any(|param| param.name == name)
    }
}

/// Format a playbook variable reference
pub fn format_variable(job_id: &str, name: &str, variable_type: &str) -> String {
    format!("#App:{}:{}!{}", job_id, name, variable_type)
}

/// Add a feature flag to a raw manifest document, returning whether it was added
pub fn inject_feature(manifest: &mut Value, feature: &str) -> bool {
    let Some(object) = manifest.as_object_mut() else {
        return false;
    };

    let features = object
        .entry("features")
        .or_insert_with(|| Value::Array(Vec::new()));

    if !features.is_array() {
        *features = Value::Array(Vec::new());
    }

    match features.as_array_mut() {
        Some(list) if !list.iter().any(|f| f.as_str() == Some(feature)) => {
            list.push(Value::String(feature.to_string()));
            true
        }
        _ => false,
    }
}
