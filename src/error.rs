// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for tcex-tools

use thiserror::Error;

/// Result type alias for tcex-tools operations
pub type Result<T> = std::result::Result<T, TcexError>;

/// Errors that can occur while packaging apps or managing profiles
#[derive(Error, Debug)]
pub enum TcexError {
    /// Build configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Invalid build configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// No install.json found in the app directory
    #[error("No install.json manifest found in {path}")]
    ManifestNotFound { path: String },

    /// Manifest could not be interpreted
    #[error("Invalid manifest '{path}': {message}")]
    InvalidManifest { path: String, message: String },

    /// Manifest failed schema validation
    #[error("Manifest '{path}' failed schema validation: {}", errors.join("; "))]
    SchemaViolation { path: String, errors: Vec<String> },

    /// Schema document could not be compiled
    #[error("Invalid schema: {message}")]
    InvalidSchema { message: String },

    /// Two manifests resolve to the same archive name
    #[error("Manifests '{first}' and '{second}' both package as {name}")]
    DuplicatePackage {
        name: String,
        first: String,
        second: String,
    },

    /// Exclude pattern is not a valid glob
    #[error("Invalid exclude pattern: {0}")]
    InvalidPattern(#[from] glob::PatternError),

    /// Profile file is not a JSON array of objects
    #[error("Invalid profile file '{path}': {message}")]
    InvalidProfileFile { path: String, message: String },

    /// Profile not found in any profile directory
    #[error("Profile not found: {name}")]
    ProfileNotFound { name: String },

    /// Profile name already taken
    #[error("Profile already exists: {name}")]
    ProfileExists { name: String },

    /// Profile does not belong to a playbook app
    #[error("Profile '{name}' is not a playbook profile")]
    NotPlaybook { name: String },

    /// IO error wrapper
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Zip archive error
    #[error("Archive error: {0}")]
    ZipError(#[from] zip::result::ZipError),

    /// Error during directory traversal
    #[error("Walk error: {0}")]
    WalkError(#[from] walkdir::Error),

    /// Redis client error
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),
}
