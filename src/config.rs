// SPDX-License-Identifier: AGPL-3.0-or-later
//! Build configuration (tcex.json)

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use crate::error::{Result, TcexError};

/// Default name of the build configuration file
pub const CONFIG_FILE_NAME: &str = "tcex.json";

/// Top level build configuration for an app directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Packaging settings
    #[serde(default)]
    pub package: PackageConfig,

    /// Directories scanned for profile files, relative to the app directory
    #[serde(default = "default_profile_include_dirs")]
    pub profile_include_dirs: Vec<PathBuf>,

    /// Any other keys are kept so the file can be shown as-is
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Packaging section of tcex.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageConfig {
    /// App name used for archive names (defaults to the directory name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,

    /// Bundle all archives into one
    #[serde(default)]
    pub bundle: bool,

    /// Name of the bundle archive (defaults to the app name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_name: Option<String>,

    /// Additional exclude globs
    #[serde(default)]
    pub excludes: Vec<String>,

    /// Output directory for archives
    #[serde(default = "default_outdir")]
    pub outdir: PathBuf,
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            app_name: None,
            bundle: false,
            bundle_name: None,
            excludes: Vec::new(),
            outdir: default_outdir(),
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            package: PackageConfig::default(),
            profile_include_dirs: default_profile_include_dirs(),
            extra: Map::new(),
        }
    }
}

impl BuildConfig {
    /// Load configuration from a tcex.json file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// The parsed configuration or an error
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(TcexError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let contents = std::fs::read_to_string(path)?;
        let config: BuildConfig = serde_json::from_str(&contents)?;

        config.validate()?;
        Ok(config)
    }

    /// Load the configuration, falling back to defaults when the file is missing
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::debug!(path = %path.display(), "No build config, using defaults");
            Ok(Self::default())
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.package.outdir.as_os_str().is_empty() {
            return Err(TcexError::InvalidConfig {
                message: "package.outdir cannot be empty".to_string(),
            });
        }

        if matches!(self.package.app_name.as_deref(), Some(name) if name.trim().is_empty()) {
            return Err(TcexError::InvalidConfig {
                message: "package.app_name cannot be empty".to_string(),
            });
        }

        if matches!(self.package.bundle_name.as_deref(), Some(name) if name.trim().is_empty()) {
            return Err(TcexError::InvalidConfig {
                message: "package.bundle_name cannot be empty".to_string(),
            });
        }

        Ok(())
    }

    /// App name from config, else the base name of the app directory
    pub fn resolved_app_name(&self, app_dir: &Path) -> String {
        if let Some(name) = &self.package.app_name {
            return name.clone();
        }

        app_dir
            .canonicalize()
            .ok()
            .as_deref()
            .unwrap_or(app_dir)
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "app".to_string())
    }

    /// Bundle name from config, else the resolved app name
    pub fn resolved_bundle_name(&self, app_dir: &Path) -> String {
        self.package
            .bundle_name
            .clone()
            .unwrap_or_else(|| self.resolved_app_name(app_dir))
    }
}

// Default value functions

fn default_outdir() -> PathBuf {
    PathBuf::from("target")
}

fn default_profile_include_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("tcex.d/profiles")]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = BuildConfig::default();
        assert_eq!(config.package.outdir, PathBuf::from("target"));
        assert!(!config.package.bundle);
        assert_eq!(
            config.profile_include_dirs,
            vec![PathBuf::from("tcex.d/profiles")]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_empty_outdir() {
        let mut config = BuildConfig::default();
        config.package.outdir = PathBuf::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_blank_app_name() {
        let mut config = BuildConfig::default();
        config.package.app_name = Some("  ".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_json_config() {
        let json_content = r#"{
            "package": {
                "app_name": "TCPB_-_Example",
                "bundle": true,
                "excludes": ["secrets.json", "*.bak"],
                "outdir": "dist"
            },
            "profile_include_dirs": ["tcex.d/profiles", "extra/profiles"],
            "template": "playbook_utility"
        }"#;

        let config: BuildConfig = serde_json::from_str(json_content).unwrap();
        assert_eq!(config.package.app_name.as_deref(), Some("TCPB_-_Example"));
        assert!(config.package.bundle);
        assert_eq!(config.package.excludes.len(), 2);
        assert_eq!(config.package.outdir, PathBuf::from("dist"));
        assert_eq!(config.profile_include_dirs.len(), 2);
        assert_eq!(config.extra["template"], "playbook_utility");
    }

    #[test]
    fn test_resolved_names_fall_back_to_directory() {
        let temp_dir = tempdir().unwrap();
        let app_dir = temp_dir.path().join("my_app");
        std::fs::create_dir(&app_dir).unwrap();

        let config = BuildConfig::default();
        assert_eq!(config.resolved_app_name(&app_dir), "my_app");
        assert_eq!(config.resolved_bundle_name(&app_dir), "my_app");

        let mut config = BuildConfig::default();
        config.package.bundle_name = Some("bundle".to_string());
        assert_eq!(config.resolved_bundle_name(&app_dir), "bundle");
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let temp_dir = tempdir().unwrap();
        let config = BuildConfig::load_or_default(temp_dir.path().join("tcex.json")).unwrap();
        assert!(config.package.app_name.is_none());

        assert!(matches!(
            BuildConfig::from_file(temp_dir.path().join("tcex.json")),
            Err(TcexError::ConfigNotFound { .. })
        ));
    }
}
