//! Unpacking of archived targets.
//!
//! Releases are published either as a bare executable or as a `.tar.gz` /
//! `.tgz` / `.zip` archive holding it. Only the executable is taken out of an
//! archive; every other entry is ignored, and entries are matched by file name
//! alone so no archive path is ever joined onto the library.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use zip::ZipArchive;

use crate::core::{IoResultExt, ManagedBinary, Result, UpdateError};

/// Container format of an archived target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// Gzip-compressed tarball
    TarGz,
    /// Zip archive
    Zip,
}

impl ArchiveFormat {
    /// Format implied by a target filename, or `None` for a bare executable.
    pub fn from_target(target_filename: &str) -> Option<Self> {
        let name = target_filename.to_ascii_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".zip") {
            Some(Self::Zip)
        } else {
            None
        }
    }
}

/// Read the executable of `binary` out of the archive at `archive`.
///
/// Runs on the blocking pool. The entry may be named after the platform
/// executable (`agent.exe`) or the bare binary name (`agent`), at any depth.
///
/// # Errors
///
/// [`UpdateError::InvalidTarget`] if the archive is malformed or holds no
/// such regular file; [`UpdateError::Io`] if it cannot be opened.
pub(crate) async fn extract_executable(
    format: ArchiveFormat,
    archive: PathBuf,
    binary: ManagedBinary,
    target_filename: &str,
) -> Result<Vec<u8>> {
    let path = archive.clone();
    let target = target_filename.to_string();
    let extracted = tokio::task::spawn_blocking(move || -> Result<Option<Vec<u8>>> {
        let executable = binary.executable_name();
        let names = [executable.as_str(), binary.name()];
        let file = File::open(&archive).io_context("opening archive", &archive)?;
        let read = match format {
            ArchiveFormat::TarGz => read_tar_gz(file, &names),
            ArchiveFormat::Zip => read_zip(file, &names),
        };
        read.map_err(|reason| UpdateError::InvalidTarget {
            target,
            reason,
        })
    })
    .await
    .map_err(|e| UpdateError::io("unpacking", &path, std::io::Error::other(e)))??;

    extracted.ok_or_else(|| UpdateError::InvalidTarget {
        target: target_filename.to_string(),
        reason: format!("archive does not contain '{}'", binary.executable_name()),
    })
}

fn read_tar_gz(file: File, names: &[&str]) -> std::result::Result<Option<Vec<u8>>, String> {
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    let entries = archive.entries().map_err(|e| format!("unreadable tarball: {e}"))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| format!("unreadable tarball entry: {e}"))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let matches = entry
            .path()
            .map(|path| has_file_name(&path, names))
            .map_err(|e| format!("bad tarball entry path: {e}"))?;
        if matches {
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes).map_err(|e| format!("truncated tarball entry: {e}"))?;
            return Ok(Some(bytes));
        }
    }
    Ok(None)
}

fn read_zip(file: File, names: &[&str]) -> std::result::Result<Option<Vec<u8>>, String> {
    let mut archive = ZipArchive::new(file).map_err(|e| format!("unreadable zip: {e}"))?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(|e| format!("unreadable zip entry: {e}"))?;
        if !entry.is_file() {
            continue;
        }
        let matches = entry.enclosed_name().is_some_and(|path| has_file_name(&path, names));
        if matches {
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes).map_err(|e| format!("truncated zip entry: {e}"))?;
            return Ok(Some(bytes));
        }
    }
    Ok(None)
}

fn has_file_name(path: &Path, names: &[&str]) -> bool {
    path.file_name().and_then(|name| name.to_str()).is_some_and(|name| names.contains(&name))
}
