// SPDX-License-Identifier: AGPL-3.0-or-later
//! App packaging
//!
//! Builds one versioned zip archive per manifest found in the app directory,
//! and optionally a bundle archive holding all of them.

mod archive;
mod staging;

pub use archive::{bundle_archives, sha256_file, zip_directory, ArchiveInfo};
pub use staging::{copy_tree, CopyStats, ExcludeSet, DEFAULT_EXCLUDES};

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

use crate::config::BuildConfig;
use crate::error::{Result, TcexError};
use crate::manifest::{
    self, discover_manifests, InstallJson, ManifestFile, SchemaValidator, MANIFEST_FILE_NAME,
};

/// Feature flag every packaged manifest must carry
pub const FEATURE_FLAG: &str = "secureParams";

/// Settings for a packaging run
#[derive(Debug, Clone)]
pub struct PackageOptions {
    /// App source directory
    pub app_dir: PathBuf,

    /// Name used for the unprefixed manifest's archive
    pub app_name: String,

    /// Directory receiving archives
    pub outdir: PathBuf,

    /// Write a bundle archive
    pub bundle: bool,

    /// Name of the bundle archive, without extension
    pub bundle_name: String,

    /// Exclude globs in addition to the built-in ones
    pub excludes: Vec<String>,

    /// Schema overriding the bundled install.json schema
    pub schema_path: Option<PathBuf>,

    /// Validate and plan without writing anything
    pub dry_run: bool,
}

impl PackageOptions {
    /// Options for an app directory as configured by tcex.json
    pub fn from_config(app_dir: &Path, config: &BuildConfig) -> Self {
        Self {
            app_dir: app_dir.to_path_buf(),
            app_name: config.resolved_app_name(app_dir),
            outdir: app_dir.join(&config.package.outdir),
            bundle: config.package.bundle,
            bundle_name: config.resolved_bundle_name(app_dir),
            excludes: config.package.excludes.clone(),
            schema_path: None,
            dry_run: false,
        }
    }

    /// Built-in, configured and outdir excludes combined
    pub fn effective_excludes(&self) -> Vec<String> {
        let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|e| e.to_string()).collect();

        for exclude in &self.excludes {
            if !excludes.contains(exclude) {
                excludes.push(exclude.clone());
            }
        }

        if let Some(name) = self.outdir.file_name() {
            let name = name.to_string_lossy().to_string();
            if !excludes.contains(&name) {
                excludes.push(name);
            }
        }

        excludes
    }
}

/// Outcome for one manifest
#[derive(Debug, Clone, Serialize)]
pub struct PackagedManifest {
    /// Manifest the archive was built from
    pub manifest: PathBuf,
    /// Versioned package name, e.g. `MyApp_v1.0`
    pub name: String,
    /// Archive written (None in dry-run mode)
    pub archive: Option<ArchiveInfo>,
    /// Whether the feature flag had to be added
    pub feature_injected: bool,
}

/// Result of a packaging run
#[derive(Debug, Clone, Serialize)]
pub struct PackageReport {
    pub app_name: String,
    pub outdir: PathBuf,
    pub dry_run: bool,
    pub packages: Vec<PackagedManifest>,
    /// Bundle file name when bundling is enabled, e.g. `MyApp.zip`
    pub planned_bundle: Option<String>,
    pub bundle: Option<ArchiveInfo>,
}

/// A manifest that passed validation and is ready to be packaged
struct PreparedManifest {
    file: ManifestFile,
    document: Value,
    name: String,
    feature_injected: bool,
}

/// Packages an app directory
pub struct Packager {
    options: PackageOptions,
}

impl Packager {
    pub fn new(options: PackageOptions) -> Self {
        Self { options }
    }

    /// Validate every manifest, then build archives and the optional bundle
    #[instrument(skip(self), fields(app = %self.options.app_name))]
    pub fn run(&self) -> Result<PackageReport> {
        let validator = match &self.options.schema_path {
            Some(path) => SchemaValidator::from_file(path)?,
            None => SchemaValidator::builtin()?,
        };

        let manifests = discover_manifests(&self.options.app_dir)?;
        info!(count = manifests.len(), "Found manifests");

        // Nothing is written unless every manifest is valid
        let prepared = manifests
            .into_iter()
            .map(|file| self.prepare(file, &validator))
            .collect::<Result<Vec<_>>>()?;
        check_unique_names(&prepared)?;

        let excludes = ExcludeSet::new(self.options.effective_excludes())?;

        let planned_bundle = (self.options.bundle && !prepared.is_empty())
            .then(|| format!("{}.zip", self.options.bundle_name));

        let mut report = PackageReport {
            app_name: self.options.app_name.clone(),
            outdir: self.options.outdir.clone(),
            dry_run: self.options.dry_run,
            packages: Vec::new(),
            planned_bundle,
            bundle: None,
        };

        if self.options.dry_run {
            for manifest in prepared {
                info!(package = %manifest.name, "[DRY RUN] Would build package");
                report.packages.push(PackagedManifest {
                    manifest: manifest.file.path,
                    name: manifest.name,
                    archive: None,
                    feature_injected: manifest.feature_injected,
                });
            }
            if let Some(bundle) = &report.planned_bundle {
                info!(bundle = %bundle, "[DRY RUN] Would build bundle");
            }
            return Ok(report);
        }

        let staging = tempfile::Builder::new().prefix("tcex-package-").tempdir()?;
        debug!(staging = %staging.path().display(), "Created staging directory");

        for manifest in prepared {
            let archive = self.build(&manifest, staging.path(), &excludes)?;
            report.packages.push(PackagedManifest {
                manifest: manifest.file.path,
                name: manifest.name,
                archive: Some(archive),
                feature_injected: manifest.feature_injected,
            });
        }

        let archives: Vec<ArchiveInfo> = report
            .packages
            .iter()
            .filter_map(|package| package.archive.clone())
            .collect();

        if let Some(bundle) = &report.planned_bundle {
            if !archives.is_empty() {
                let bundle_path = self.options.outdir.join(bundle);
                report.bundle = Some(bundle_archives(&archives, &bundle_path)?);
            }
        }

        Ok(report)
    }

    /// Load, validate and name a manifest
    fn prepare(&self, file: ManifestFile, validator: &SchemaValidator) -> Result<PreparedManifest> {
        let mut document = file.load_value()?;
        validator.validate(&file.path, &document)?;

        let install_json = InstallJson::from_value(&document, &file.path)?;
        let feature_injected = manifest::inject_feature(&mut document, FEATURE_FLAG);

        let base_name = file
            .prefix()
            .map(str::to_string)
            .unwrap_or_else(|| self.options.app_name.clone());
        let (major, minor) = install_json.major_minor_version();
        let name = format!("{}_v{}.{}", base_name, major, minor);

        debug!(
            manifest = %file.path.display(),
            package = %name,
            feature_injected = feature_injected,
            "Manifest validated"
        );

        Ok(PreparedManifest {
            file,
            document,
            name,
            feature_injected,
        })
    }

    /// Stage the app tree for one manifest and zip it
    fn build(
        &self,
        manifest: &PreparedManifest,
        staging: &Path,
        excludes: &ExcludeSet,
    ) -> Result<ArchiveInfo> {
        let build_dir = staging.join(&manifest.name);
        if build_dir.exists() {
            std::fs::remove_dir_all(&build_dir)?;
        }

        let stats = copy_tree(&self.options.app_dir, &build_dir, excludes)?;
        debug!(
            package = %manifest.name,
            files = stats.files_copied,
            excluded = stats.entries_excluded,
            "Staged app tree"
        );

        for entry in std::fs::read_dir(&build_dir)? {
            let path = entry?.path();
            if path.is_file() && ManifestFile::from_path(&path).is_some() {
                std::fs::remove_file(&path)?;
            }
        }

        let contents = serde_json::to_string_pretty(&manifest.document)?;
        std::fs::write(build_dir.join(MANIFEST_FILE_NAME), contents + "\n")?;

        let archive_path = self.options.outdir.join(format!("{}.zip", manifest.name));
        zip_directory(&build_dir, &manifest.name, &archive_path)
    }
}

/// Fail when two manifests would write the same archive
fn check_unique_names(prepared: &[PreparedManifest]) -> Result<()> {
    let mut seen: HashMap<&str, &Path> = HashMap::new();
    for manifest in prepared {
        if let Some(first) = seen.insert(&manifest.name, &manifest.file.path) {
            return Err(TcexError::DuplicatePackage {
                name: format!("{}.zip", manifest.name),
                first: first.display().to_string(),
                second: manifest.file.path.display().to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs::{self, File};
    use std::io::Read;
    use tempfile::{tempdir, TempDir};
    use zip::ZipArchive;

    fn manifest(version: &str) -> Value {
        json!({
            "programLanguage": "PYTHON",
            "programMain": "run",
            "programVersion": version,
            "runtimeLevel": "Organization",
            "params": []
        })
    }

    fn create_app(name: &str) -> (TempDir, PathBuf) {
        let temp_dir = tempdir().unwrap();
        let app_dir = temp_dir.path().join(name);
        fs::create_dir_all(app_dir.join("tests")).unwrap();
        fs::write(app_dir.join("run.py"), "print('run')").unwrap();
        fs::write(app_dir.join("tests/test_run.py"), "").unwrap();
        fs::write(app_dir.join("cache.pyc"), "").unwrap();
        (temp_dir, app_dir)
    }

    fn write_manifest(path: &Path, value: &Value) {
        fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    }

    fn archive_names(path: &Path) -> Vec<String> {
        let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
        (0..archive.len())
            .map(|index| archive.by_index(index).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn test_effective_excludes_include_outdir() {
        let (_temp_dir, app_dir) = create_app("app");
        let mut config = BuildConfig::default();
        config.package.outdir = PathBuf::from("dist");
        config.package.excludes = vec!["secrets.json".to_string(), ".git".to_string()];

        let options = PackageOptions::from_config(&app_dir, &config);
        let excludes = options.effective_excludes();

        assert!(excludes.contains(&"dist".to_string()));
        assert!(excludes.contains(&"secrets.json".to_string()));
        assert_eq!(excludes.iter().filter(|e| *e == ".git").count(), 1);
    }

    #[test]
    fn test_package_single_manifest() {
        let (_temp_dir, app_dir) = create_app("MyApp");
        write_manifest(&app_dir.join("install.json"), &manifest("2.1.0"));

        let options = PackageOptions::from_config(&app_dir, &BuildConfig::default());
        let report = Packager::new(options).run().unwrap();

        assert_eq!(report.packages.len(), 1);
        assert_eq!(report.packages[0].name, "MyApp_v2.1");
        assert!(report.packages[0].feature_injected);
        assert!(report.bundle.is_none());

        let archive_path = app_dir.join("target/MyApp_v2.1.zip");
        assert!(archive_path.exists());

        let names = archive_names(&archive_path);
        assert!(names.contains(&"MyApp_v2.1/run.py".to_string()));
        assert!(names.contains(&"MyApp_v2.1/install.json".to_string()));
        assert!(!names.iter().any(|name| name.contains("tests")));
        assert!(!names.iter().any(|name| name.ends_with(".pyc")));

        let mut archive = ZipArchive::new(File::open(&archive_path).unwrap()).unwrap();
        let mut contents = String::new();
        archive
            .by_name("MyApp_v2.1/install.json")
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        let packaged: Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(packaged["features"], json!(["secureParams"]));

        // The source manifest is left untouched
        let source: Value =
            serde_json::from_str(&fs::read_to_string(app_dir.join("install.json")).unwrap())
                .unwrap();
        assert!(source.get("features").is_none());
    }

    #[test]
    fn test_package_prefixed_manifests_with_bundle() {
        let (_temp_dir, app_dir) = create_app("Suite");
        write_manifest(&app_dir.join("alpha.install.json"), &manifest("1.0.0"));
        write_manifest(&app_dir.join("beta.install.json"), &manifest("3.2.0"));

        let mut config = BuildConfig::default();
        config.package.bundle = true;
        config.package.bundle_name = Some("Suite_Bundle".to_string());

        let options = PackageOptions::from_config(&app_dir, &config);
        let report = Packager::new(options).run().unwrap();

        let names: Vec<_> = report.packages.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["alpha_v1.0", "beta_v3.2"]);

        let alpha = archive_names(&app_dir.join("target/alpha_v1.0.zip"));
        assert!(alpha.contains(&"alpha_v1.0/install.json".to_string()));
        assert!(!alpha.iter().any(|name| name.ends_with("alpha.install.json")));
        assert!(!alpha.iter().any(|name| name.ends_with("beta.install.json")));

        let bundle = report.bundle.unwrap();
        assert_eq!(bundle.name, "Suite_Bundle.zip");
        assert_eq!(
            archive_names(&bundle.path),
            vec!["alpha_v1.0.zip", "beta_v3.2.zip"]
        );
    }

    #[test]
    fn test_invalid_manifest_writes_nothing() {
        let (_temp_dir, app_dir) = create_app("Broken");
        write_manifest(&app_dir.join("alpha.install.json"), &manifest("1.0.0"));
        write_manifest(&app_dir.join("beta.install.json"), &json!({"programVersion": "1.0"}));

        let options = PackageOptions::from_config(&app_dir, &BuildConfig::default());
        let result = Packager::new(options).run();

        assert!(matches!(result, Err(TcexError::SchemaViolation { .. })));
        assert!(!app_dir.join("target").exists());
    }

    #[test]
    fn test_dry_run_plans_without_writing() {
        let (_temp_dir, app_dir) = create_app("Planned");
        write_manifest(&app_dir.join("install.json"), &manifest("1.4.2"));

        let mut options = PackageOptions::from_config(&app_dir, &BuildConfig::default());
        options.dry_run = true;
        options.bundle = true;
        let report = Packager::new(options).run().unwrap();

        assert!(report.dry_run);
        assert_eq!(report.packages[0].name, "Planned_v1.4");
        assert!(report.packages[0].archive.is_none());
        assert_eq!(report.planned_bundle.as_deref(), Some("Planned.zip"));
        assert!(report.bundle.is_none());
        assert!(!app_dir.join("target").exists());
    }

    #[test]
    fn test_dry_run_rejects_invalid_exclude() {
        let (_temp_dir, app_dir) = create_app("Planned");
        write_manifest(&app_dir.join("install.json"), &manifest("1.0.0"));

        let mut options = PackageOptions::from_config(&app_dir, &BuildConfig::default());
        options.dry_run = true;
        options.excludes.push("[unclosed".to_string());

        assert!(matches!(
            Packager::new(options).run(),
            Err(TcexError::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_outdir_outside_app_is_excluded_by_name() {
        let (temp_dir, app_dir) = create_app("app");
        write_manifest(&app_dir.join("install.json"), &manifest("1.0.0"));
        fs::create_dir_all(app_dir.join("dist")).unwrap();
        fs::write(app_dir.join("dist/stale.zip"), "old").unwrap();

        let mut options = PackageOptions::from_config(&app_dir, &BuildConfig::default());
        options.outdir = temp_dir.path().join("elsewhere/dist");
        assert!(options.effective_excludes().contains(&"dist".to_string()));

        Packager::new(options).run().unwrap();

        let names = archive_names(&temp_dir.path().join("elsewhere/dist/app_v1.0.zip"));
        assert!(names.contains(&"app_v1.0/run.py".to_string()));
        assert!(!names.iter().any(|name| name.contains("dist/")));
    }

    #[test]
    fn test_colliding_package_names_write_nothing() {
        let (_temp_dir, app_dir) = create_app("alpha");
        write_manifest(&app_dir.join("install.json"), &manifest("1.0.0"));
        write_manifest(&app_dir.join("alpha.install.json"), &manifest("1.0.5"));

        let mut options = PackageOptions::from_config(&app_dir, &BuildConfig::default());
        options.bundle = true;
        let result = Packager::new(options).run();

        match result {
            Err(TcexError::DuplicatePackage { name, .. }) => assert_eq!(name, "alpha_v1.0.zip"),
            other => panic!("Expected DuplicatePackage, got {:?}", other.map(|r| r.packages.len())),
        }
        assert!(!app_dir.join("target").exists());
    }

    #[test]
    fn test_repackaging_excludes_previous_output() {
        let (_temp_dir, app_dir) = create_app("Again");
        write_manifest(&app_dir.join("install.json"), &manifest("1.0.0"));

        let options = PackageOptions::from_config(&app_dir, &BuildConfig::default());
        Packager::new(options.clone()).run().unwrap();
        Packager::new(options).run().unwrap();

        let names = archive_names(&app_dir.join("target/Again_v1.0.zip"));
        assert!(!names.iter().any(|name| name.contains("target")));
    }
}
