// SPDX-License-Identifier: AGPL-3.0-or-later
//! Profile operations: create, delete, update, replace validations, list

use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::{
    app_args, default_args, entry_arg, entry_name, rules_from_context, staging_data,
    upgrade_profile, KeyValueStore, Profile, ProfileArgs, ProfileFile, ProfileStore,
    RedisStore, ValidationRule, JOB_ID,
};
use crate::config::BuildConfig;
use crate::error::{Result, TcexError};
use crate::manifest::InstallJson;

/// Directory receiving staging data files, relative to the app directory
pub const DATA_DIR: &str = "tcex.d/data";

const DEFAULT_REDIS_HOST: &str = "localhost";
const DEFAULT_REDIS_PORT: u16 = 6379;

/// Parameters for a new profile
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub name: String,
    /// File name inside the first profile directory (defaults to `<name>.json`)
    pub outfile: Option<String>,
    /// Manifest path relative to the app directory
    pub install_json: String,
    pub redis_host: String,
    pub redis_port: u16,
}

impl CreateRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outfile: None,
            install_json: crate::manifest::MANIFEST_FILE_NAME.to_string(),
            redis_host: DEFAULT_REDIS_HOST.to_string(),
            redis_port: DEFAULT_REDIS_PORT,
        }
    }

    fn outfile(&self) -> String {
        self.outfile
            .clone()
            .unwrap_or_else(|| format!("{}.json", self.name))
    }
}

/// Result of a create operation
#[derive(Debug, Clone)]
pub struct CreatedProfile {
    pub profile: Profile,
    pub profile_file: PathBuf,
    pub data_file: Option<PathBuf>,
}

/// Result of an update operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    pub profiles_checked: usize,
    pub profiles_upgraded: usize,
    pub files_rewritten: usize,
}

/// Manages the profiles of one app directory
pub struct ProfileGenerator {
    app_dir: PathBuf,
    profile_dirs: Vec<PathBuf>,
}

impl ProfileGenerator {
    pub fn new(app_dir: &Path, config: &BuildConfig) -> Self {
        let mut profile_dirs: Vec<PathBuf> = config
            .profile_include_dirs
            .iter()
            .map(|dir| app_dir.join(dir))
            .collect();

        if profile_dirs.is_empty() {
            profile_dirs.push(app_dir.join("tcex.d/profiles"));
        }

        Self {
            app_dir: app_dir.to_path_buf(),
            profile_dirs,
        }
    }

    pub fn profile_dirs(&self) -> &[PathBuf] {
        &self.profile_dirs
    }

    fn load_store(&self) -> Result<ProfileStore> {
        let store = ProfileStore::load(&self.profile_dirs)?;
        for name in store.duplicates() {
            warn!(profile = %name, "Profile name defined more than once");
        }
        Ok(store)
    }

    /// Create a profile from a manifest and append it to its profile file
    pub fn create(&self, request: &CreateRequest) -> Result<CreatedProfile> {
        let store = self.load_store()?;
        if store.contains(&request.name) {
            return Err(TcexError::ProfileExists {
                name: request.name.clone(),
            });
        }

        let install_json = InstallJson::from_file(self.app_dir.join(&request.install_json))?;
        let outfile = request.outfile();

        let validations = install_json
            .output_variables(JOB_ID)
            .into_iter()
            .map(ValidationRule::placeholder)
            .collect();

        let mut profile = Profile {
            profile_name: request.name.clone(),
            description: String::new(),
            install_json: request.install_json.clone(),
            args: ProfileArgs {
                app: app_args(&install_json),
                default: default_args(&install_json, &request.redis_host, request.redis_port),
            },
            autoclear: true,
            data_files: Vec::new(),
            exit_codes: vec![0],
            groups: vec!["qa-build".to_string()],
            quiet: false,
            validations,
        };

        let data_file = if install_json.is_playbook() {
            let relative = format!("{}/{}", DATA_DIR, outfile);
            let path = self.app_dir.join(&relative);
            write_staging_data(&path, staging_data(&install_json))?;
            profile.data_files.push(relative);
            Some(path)
        } else {
            None
        };

        let profile_path = self.profile_dirs[0].join(&outfile);
        let mut file = ProfileFile::load_or_new(&profile_path)?;
        file.entries.push(profile.to_entry()?);
        file.save()?;

        info!(
            profile = %profile.profile_name,
            file = %profile_path.display(),
            "Profile created"
        );

        Ok(CreatedProfile {
            profile,
            profile_file: profile_path,
            data_file,
        })
    }

    /// Remove a profile; a profile file left empty is deleted
    pub fn delete(&self, name: &str) -> Result<PathBuf> {
        let mut store = self.load_store()?;
        let (file_index, entry_index) =
            store
                .locate(name)
                .ok_or_else(|| TcexError::ProfileNotFound {
                    name: name.to_string(),
                })?;

        let file = &mut store.files_mut()[file_index];
        file.entries.remove(entry_index);

        if file.entries.is_empty() {
            std::fs::remove_file(&file.path)?;
            info!(profile = %name, file = %file.path.display(), "Profile deleted, file removed");
        } else {
            file.save()?;
            info!(profile = %name, file = %file.path.display(), "Profile deleted");
        }

        Ok(file.path.clone())
    }

    /// Upgrade every legacy profile in place
    pub fn update(&self) -> Result<UpdateSummary> {
        let mut store = self.load_store()?;
        let mut summary = UpdateSummary::default();
        let mut manifest_params: HashMap<String, HashSet<String>> = HashMap::new();

        for file in store.files_mut() {
            let mut file_changed = false;

            for entry in &mut file.entries {
                summary.profiles_checked += 1;

                let manifest = entry
                    .get("install_json")
                    .and_then(Value::as_str)
                    .unwrap_or(crate::manifest::MANIFEST_FILE_NAME)
                    .to_string();

                if !manifest_params.contains_key(&manifest) {
                    let params = self.param_names(&manifest);
                    manifest_params.insert(manifest.clone(), params);
                }

                if upgrade_profile(entry, &manifest_params[&manifest]) {
                    info!(
                        profile = entry_name(entry).unwrap_or("<unnamed>"),
                        "Profile upgraded"
                    );
                    summary.profiles_upgraded += 1;
                    file_changed = true;
                }
            }

            if file_changed {
                file.save()?;
                summary.files_rewritten += 1;
            }
        }

        Ok(summary)
    }

    fn param_names(&self, manifest: &str) -> HashSet<String> {
        match InstallJson::from_file(self.app_dir.join(manifest)) {
            Ok(install_json) => install_json
                .params
                .into_iter()
                .map(|param| param.name)
                .collect(),
            Err(error) => {
                warn!(manifest = %manifest, %error, "Cannot read manifest, args default to platform args");
                HashSet::new()
            }
        }
    }

    /// Redis URL recorded in a profile's playbook args
    pub fn redis_url_for(&self, name: &str) -> Result<String> {
        let store = self.load_store()?;
        let (_, entry) = store.find(name).ok_or_else(|| TcexError::ProfileNotFound {
            name: name.to_string(),
        })?;

        let host = entry_arg(entry, "tc_playbook_db_path")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_REDIS_HOST);
        let port = entry_arg(entry, "tc_playbook_db_port")
            .and_then(|port| match port {
                Value::Number(number) => number.as_u64().and_then(|n| u16::try_from(n).ok()),
                Value::String(text) => text.parse().ok(),
                _ => None,
            })
            .unwrap_or(DEFAULT_REDIS_PORT);

        Ok(RedisStore::url(host, port))
    }

    /// Replace a profile's validations with rules built from stored outputs
    pub async fn replace_validation(
        &self,
        name: &str,
        store: &dyn KeyValueStore,
    ) -> Result<Vec<ValidationRule>> {
        let mut profiles = self.load_store()?;
        let (file_index, entry_index) =
            profiles
                .locate(name)
                .ok_or_else(|| TcexError::ProfileNotFound {
                    name: name.to_string(),
                })?;

        let file = &mut profiles.files_mut()[file_index];
        let entry = &mut file.entries[entry_index];

        let not_playbook = || TcexError::NotPlaybook {
            name: name.to_string(),
        };
        let context = entry_arg(entry, "tc_playbook_db_context")
            .and_then(Value::as_str)
            .ok_or_else(not_playbook)?
            .to_string();
        let variables: Vec<String> = entry_arg(entry, "tc_playbook_out_variables")
            .and_then(Value::as_str)
            .ok_or_else(not_playbook)?
            .split(',')
            .map(str::trim)
            .filter(|variable| !variable.is_empty())
            .map(str::to_string)
            .collect();

        let values = store.fetch_context(&context).await?;
        let rules = rules_from_context(&variables, &values);

        entry.insert("validations".to_string(), serde_json::to_value(&rules)?);
        file.save()?;

        info!(
            profile = %name,
            context = %context,
            rules = rules.len(),
            "Validations replaced"
        );
        Ok(rules)
    }

    /// Every profile name with the file that holds it
    pub fn list(&self) -> Result<Vec<(String, PathBuf)>> {
        let store = self.load_store()?;
        let mut profiles: Vec<(String, PathBuf)> = store
            .files()
            .iter()
            .flat_map(|file| {
                file.entries
                    .iter()
                    .filter_map(|entry| entry_name(entry))
                    .map(|name| (name.to_string(), file.path.clone()))
            })
            .collect();
        profiles.sort();
        Ok(profiles)
    }
}

/// Write staging entries, keeping existing entries and adding new keys only
fn write_staging_data(path: &Path, entries: Vec<Value>) -> Result<()> {
    let mut existing: Vec<Value> = if path.exists() {
        let contents = std::fs::read_to_string(path)?;
        match serde_json::from_str(&contents)? {
            Value::Array(items) => items,
            _ => {
                return Err(TcexError::InvalidProfileFile {
                    path: path.display().to_string(),
                    message: "staging data must be a JSON array".to_string(),
                })
            }
        }
    } else {
        Vec::new()
    };

    let known: HashSet<String> = existing
        .iter()
        .filter_map(|item| item.get("key").and_then(Value::as_str))
        .map(str::to_string)
        .collect();

    for entry in entries {
        let is_new = entry
            .get("key")
            .and_then(Value::as_str)
            .is_some_and(|key| !known.contains(key));
        if is_new {
            existing.push(entry);
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let contents = serde_json::to_string_pretty(&json!(existing))?;
    std::fs::write(path, contents + "\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    struct MemoryStore {
        values: HashMap<String, String>,
    }

    #[async_trait]
    impl KeyValueStore for MemoryStore {
        async fn fetch_context(&self, _context: &str) -> Result<HashMap<String, String>> {
            Ok(self.values.clone())
        }
    }

    fn playbook_app() -> (TempDir, ProfileGenerator) {
        let temp_dir = tempdir().unwrap();
        fs::write(
            temp_dir.path().join("install.json"),
            json!({
                "programVersion": "1.0.0",
                "runtimeLevel": "Playbook",
                "params": [
                    {"name": "indicator", "type": "String", "playbookDataType": ["String"]},
                    {"name": "strict", "type": "Boolean"}
                ],
                "playbook": {"outputVariables": [
                    {"name": "result", "type": "String"},
                    {"name": "items", "type": "StringArray"}
                ]}
            })
            .to_string(),
        )
        .unwrap();

        let generator = ProfileGenerator::new(temp_dir.path(), &BuildConfig::default());
        (temp_dir, generator)
    }

    #[test]
    fn test_create_profile() {
        let (temp_dir, generator) = playbook_app();

        let created = generator.create(&CreateRequest::new("smoke")).unwrap();
        assert!(created.profile_file.ends_with("tcex.d/profiles/smoke.json"));
        assert_eq!(created.profile.validations.len(), 2);
        assert_eq!(created.profile.groups, vec!["qa-build"]);
        assert_eq!(created.profile.data_files, vec!["tcex.d/data/smoke.json"]);
        assert_eq!(created.profile.args.app["strict"], json!(false));

        let data: Value = serde_json::from_str(
            &fs::read_to_string(temp_dir.path().join("tcex.d/data/smoke.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(data[0]["key"], json!("#App:9876:indicator!String"));

        let file = ProfileFile::load(&created.profile_file).unwrap();
        assert_eq!(file.entries.len(), 1);
        let reloaded: Profile = serde_json::from_value(Value::Object(file.entries[0].clone())).unwrap();
        assert_eq!(reloaded, created.profile);
    }

    #[test]
    fn test_create_appends_and_rejects_duplicates() {
        let (_temp_dir, generator) = playbook_app();

        let mut first = CreateRequest::new("one");
        first.outfile = Some("suite.json".to_string());
        let mut second = CreateRequest::new("two");
        second.outfile = Some("suite.json".to_string());

        generator.create(&first).unwrap();
        let created = generator.create(&second).unwrap();
        assert_eq!(ProfileFile::load(&created.profile_file).unwrap().entries.len(), 2);

        assert!(matches!(
            generator.create(&CreateRequest::new("one")),
            Err(TcexError::ProfileExists { .. })
        ));
    }

    #[test]
    fn test_create_merges_staging_data_by_key() {
        let (temp_dir, generator) = playbook_app();
        let data_path = temp_dir.path().join("tcex.d/data/seeded.json");
        fs::create_dir_all(data_path.parent().unwrap()).unwrap();
        fs::write(
            &data_path,
            json!([
                {"key": "#App:9876:indicator!String", "data": "8.8.8.8"},
                {"key": "#App:1:other!String", "data": "kept"}
            ])
            .to_string(),
        )
        .unwrap();

        let mut request = CreateRequest::new("seeded");
        request.outfile = Some("seeded.json".to_string());
        let created = generator.create(&request).unwrap();
        assert_eq!(created.data_file.as_deref(), Some(data_path.as_path()));

        let data: Vec<Value> =
            serde_json::from_str(&fs::read_to_string(&data_path).unwrap()).unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0]["data"], json!("8.8.8.8"));
        assert_eq!(data[1]["data"], json!("kept"));

        // A new key from the manifest is appended after the existing entries
        fs::write(
            temp_dir.path().join("beta.install.json"),
            json!({
                "programVersion": "1.0.0",
                "runtimeLevel": "Playbook",
                "params": [
                    {"name": "indicator", "type": "String", "playbookDataType": ["String"]},
                    {"name": "tags", "type": "String", "playbookDataType": ["StringArray"]}
                ]
            })
            .to_string(),
        )
        .unwrap();
        let mut request = CreateRequest::new("seeded-beta");
        request.outfile = Some("seeded.json".to_string());
        request.install_json = "beta.install.json".to_string();
        generator.create(&request).unwrap();

        let data: Vec<Value> =
            serde_json::from_str(&fs::read_to_string(&data_path).unwrap()).unwrap();
        let keys: Vec<&str> = data.iter().filter_map(|item| item["key"].as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "#App:9876:indicator!String",
                "#App:1:other!String",
                "#App:9876:tags!StringArray"
            ]
        );
        assert_eq!(data[0]["data"], json!("8.8.8.8"));
        assert_eq!(data[2]["data"], json!([]));
    }

    #[test]
    fn test_create_rejects_non_array_staging_data() {
        let (temp_dir, generator) = playbook_app();
        let data_path = temp_dir.path().join("tcex.d/data/broken.json");
        fs::create_dir_all(data_path.parent().unwrap()).unwrap();
        fs::write(&data_path, r#"{"key": "value"}"#).unwrap();

        assert!(matches!(
            generator.create(&CreateRequest::new("broken")),
            Err(TcexError::InvalidProfileFile { .. })
        ));
        assert_eq!(fs::read_to_string(&data_path).unwrap(), r#"{"key": "value"}"#);
        assert!(!temp_dir.path().join("tcex.d/profiles/broken.json").exists());
    }

    #[test]
    fn test_delete_profile() {
        let (_temp_dir, generator) = playbook_app();

        let mut first = CreateRequest::new("keep");
        first.outfile = Some("suite.json".to_string());
        let mut second = CreateRequest::new("drop");
        second.outfile = Some("suite.json".to_string());
        generator.create(&first).unwrap();
        let created = generator.create(&second).unwrap();

        generator.delete("drop").unwrap();
        let file = ProfileFile::load(&created.profile_file).unwrap();
        assert_eq!(file.entries.len(), 1);

        generator.delete("keep").unwrap();
        assert!(!created.profile_file.exists());

        assert!(matches!(
            generator.delete("keep"),
            Err(TcexError::ProfileNotFound { .. })
        ));
    }

    #[test]
    fn test_update_upgrades_legacy_profiles() {
        let (temp_dir, generator) = playbook_app();
        let profiles = temp_dir.path().join("tcex.d/profiles");
        fs::create_dir_all(&profiles).unwrap();
        fs::write(
            profiles.join("legacy.json"),
            json!([{
                "profile_name": "legacy",
                "args": {"indicator": "8.8.8.8", "tc_log_level": "info"},
                "exit_code": 0
            }])
            .to_string(),
        )
        .unwrap();

        let summary = generator.update().unwrap();
        assert_eq!(summary.profiles_upgraded, 1);
        assert_eq!(summary.files_rewritten, 1);

        let file = ProfileFile::load(profiles.join("legacy.json")).unwrap();
        let profile: Profile = serde_json::from_value(Value::Object(file.entries[0].clone())).unwrap();
        assert_eq!(profile.args.app["indicator"], json!("8.8.8.8"));
        assert_eq!(profile.args.default["tc_log_level"], json!("info"));

        let summary = generator.update().unwrap();
        assert_eq!(summary.profiles_upgraded, 0);
        assert_eq!(summary.files_rewritten, 0);
    }

    #[tokio::test]
    async fn test_replace_validation() {
        let (_temp_dir, generator) = playbook_app();
        let created = generator.create(&CreateRequest::new("outputs")).unwrap();

        let mut values = HashMap::new();
        values.insert("#App:9876:result!String".to_string(), r#""ok""#.to_string());
        values.insert("#App:9876:items!StringArray".to_string(), r#"["a"]"#.to_string());
        let store = MemoryStore { values };

        let rules = generator.replace_validation("outputs", &store).await.unwrap();
        assert_eq!(rules.len(), 2);

        let file = ProfileFile::load(&created.profile_file).unwrap();
        assert_eq!(file.entries[0]["validations"][0]["data"], json!("ok"));
        assert_eq!(file.entries[0]["validations"][1]["operator"], json!("dd"));
    }

    #[tokio::test]
    async fn test_replace_validation_requires_playbook() {
        let temp_dir = tempdir().unwrap();
        fs::write(
            temp_dir.path().join("install.json"),
            json!({"programVersion": "1.0.0", "runtimeLevel": "Organization"}).to_string(),
        )
        .unwrap();
        let generator = ProfileGenerator::new(temp_dir.path(), &BuildConfig::default());
        generator.create(&CreateRequest::new("job")).unwrap();

        let store = MemoryStore {
            values: HashMap::new(),
        };
        assert!(matches!(
            generator.replace_validation("job", &store).await,
            Err(TcexError::NotPlaybook { .. })
        ));
    }

    #[test]
    fn test_redis_url_and_list() {
        let (_temp_dir, generator) = playbook_app();
        let mut request = CreateRequest::new("remote");
        request.redis_host = "cache.internal".to_string();
        request.redis_port = 6390;
        generator.create(&request).unwrap();

        assert_eq!(
            generator.redis_url_for("remote").unwrap(),
            "redis://cache.internal:6390"
        );

        let profiles = generator.list().unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].0, "remote");
    }
}
