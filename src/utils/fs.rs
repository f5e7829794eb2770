//! Crash-safe file primitives.
//!
//! Everything the library mutates on disk goes through one of two patterns:
//! write a complete file next to its destination and rename it over the
//! destination, or build a complete directory under a staging area and rename
//! it into place. Readers therefore see either the old or the new state.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::core::{IoResultExt, Result};

/// Atomically replace `path` with `content`.
///
/// The content is written to a uniquely named temporary file in the same
/// directory, synced to disk, and then renamed over `path`. Concurrent
/// writers never clobber each other's temporary file and a reader of `path`
/// observes either the previous content or the new content in full.
///
/// # Errors
///
/// Returns [`UpdateError::Io`](crate::core::UpdateError::Io) if the parent
/// directory cannot be created or any step of the write fails. On failure the
/// temporary file is removed and `path` is untouched.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).io_context("creating directory", parent)?;

    let mut temp = NamedTempFile::new_in(parent).io_context("creating temp file in", parent)?;
    temp.write_all(content).io_context("writing temp file for", path)?;
    temp.as_file().sync_all().io_context("syncing temp file for", path)?;
    temp.persist(path).map_err(|e| e.error).io_context("renaming temp file onto", path)?;

    sync_dir(parent)
}

/// Flush directory metadata so a preceding rename survives power loss.
///
/// A no-op on platforms without directory handles.
pub fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        std::fs::File::open(dir)
            .and_then(|handle| handle.sync_all())
            .io_context("syncing directory", dir)?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

/// Mark an artifact as executable (0755 on unix).
pub async fn set_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            .await
            .io_context("setting executable permission on", path)?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
