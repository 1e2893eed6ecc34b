// SPDX-License-Identifier: AGPL-3.0-or-later
//! JSON schema validation of install.json documents

use serde_json::Value;
use std::path::Path;
use tracing::debug;

use crate::error::{Result, TcexError};

const INSTALL_JSON_SCHEMA: &str = include_str!("../../schema/install-json-schema.json");

/// Compiled schema used to check manifests before packaging
pub struct SchemaValidator {
    validator: jsonschema::Validator,
}

impl SchemaValidator {
    /// Schema bundled with the binary
    pub fn builtin() -> Result<Self> {
        let schema: Value = serde_json::from_str(INSTALL_JSON_SCHEMA)?;
        Self::compile(&schema)
    }

    /// Schema read from a user supplied file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!(schema = %path.display(), "Loading manifest schema");

        let contents = std::fs::read_to_string(path)?;
        let schema: Value = serde_json::from_str(&contents)?;
        Self::compile(&schema)
    }

    fn compile(schema: &Value) -> Result<Self> {
        let validator =
            jsonschema::validator_for(schema).map_err(|e| TcexError::InvalidSchema {
                message: e.to_string(),
            })?;
        Ok(Self { validator })
    }

    /// Check a manifest, collecting every violation
    pub fn validate(&self, path: &Path, manifest: &Value) -> Result<()> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(manifest)
            .map(|error| {
                let location = error.instance_path.to_string();
                if location.is_empty() {
                    error.to_string()
                } else {
                    format!("{}: {}", location, error)
                }
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(TcexError::SchemaViolation {
                path: path.display().to_string(),
                errors,
            })
        }
    }
}
