// SPDX-License-Identifier: AGPL-3.0-or-later
//! tcex-tools: packaging and test-profile tooling for TcEx integration apps
//!
//! # Features
//!
//! * **Packaging:** Validates each `install.json` against the manifest schema and
//!   writes versioned zip archives, optionally bundled into one
//! * **Profiles:** Creates, upgrades and deletes JSON test profiles derived from
//!   the manifest's declared parameters
//! * **Validation rules:** Builds output checks from playbook values stored in Redis

pub mod config;
pub mod error;
pub mod manifest;
pub mod package;
pub mod profile;

pub use config::BuildConfig;
pub use error::{Result, TcexError};
