// SPDX-License-Identifier: AGPL-3.0-or-later
//! Zip archive creation and bundling

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::Result;

/// A written archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveInfo {
    /// File name of the archive
    pub name: String,
    /// Full path to the archive
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// Hex encoded SHA-256 digest of the archive
    pub sha256: String,
}

impl ArchiveInfo {
    /// Describe an archive already on disk
    pub fn from_path(path: &Path) -> Result<Self> {
        let size = std::fs::metadata(path)?.len();
        let sha256 = sha256_file(path)?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();

        Ok(Self {
            name,
            path: path.to_path_buf(),
            size,
            sha256,
        })
    }
}

/// Zip `source_dir` into `archive_path` with every entry under `root_name/`
///
/// Entries are deflated and written in sorted walk order with `/` separators.
pub fn zip_directory(source_dir: &Path, root_name: &str, archive_path: &Path) -> Result<ArchiveInfo> {
    debug!(
        source = %source_dir.display(),
        archive = %archive_path.display(),
        "Creating archive"
    );

    if let Some(parent) = archive_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = File::create(archive_path)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut entries = 0usize;
    for entry in WalkDir::new(source_dir).sort_by_file_name() {
        let entry = entry?;
        let relative = match entry.path().strip_prefix(source_dir) {
            Ok(relative) => relative,
            Err(_) => continue,
        };

        let mut name = root_name.to_string();
        for component in relative.components() {
            name.push('/');
            name.push_str(&component.as_os_str().to_string_lossy());
        }

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{}/", name), options)?;
        } else {
            zip.start_file(name, options)?;
            let mut reader = BufReader::new(File::open(entry.path())?);
            std::io::copy(&mut reader, &mut zip)?;
        }
        entries += 1;
    }

    zip.finish()?;

    let info = ArchiveInfo::from_path(archive_path)?;
    info!(
        archive = %info.name,
        entries = entries,
        size = info.size,
        "Archive written"
    );
    Ok(info)
}

/// Store several archives, by base name, in a single bundle archive
pub fn bundle_archives(archives: &[ArchiveInfo], bundle_path: &Path) -> Result<ArchiveInfo> {
    if let Some(parent) = bundle_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = File::create(bundle_path)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    for archive in archives {
        zip.start_file(archive.name.as_str(), options)?;
        let mut reader = BufReader::new(File::open(&archive.path)?);
        std::io::copy(&mut reader, &mut zip)?;
    }

    zip.finish()?;

    let info = ArchiveInfo::from_path(bundle_path)?;
    info!(
        bundle = %info.name,
        archives = archives.len(),
        "Bundle written"
    );
    Ok(info)
}

/// SHA-256 of a file as lowercase hex
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    std::io::copy(&mut reader, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}
