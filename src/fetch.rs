//! The byte-fetch capability injected into the librarian.
//!
//! Transport and signature checking belong to the metadata client; the
//! librarian only needs "give me the raw bytes of this target filename".

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::core::FetchError;

/// Fetches raw artifact bytes by target filename.
pub trait ArtifactFetcher: Send + Sync {
    /// Return the complete bytes of `target_filename`, or a transport error.
    fn fetch(
        &self,
        target_filename: &str,
    ) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send;
}

impl<T: ArtifactFetcher> ArtifactFetcher for Arc<T> {
    fn fetch(
        &self,
        target_filename: &str,
    ) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send {
        (**self).fetch(target_filename)
    }
}

/// Serves targets from a local directory mirror.
///
/// Used by the operator CLI to side-load an artifact and by hosts that sync
/// release artifacts out of band. Only the last path component of a target
/// filename is used, so repository paths like `agent/linux/agent-1.0.0.tar.gz`
/// resolve to `<dir>/agent-1.0.0.tar.gz`.
#[derive(Debug, Clone)]
pub struct MirrorFetcher {
    dir: PathBuf,
}

impl MirrorFetcher {
    /// Serve targets from `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
        }
    }
}

impl ArtifactFetcher for MirrorFetcher {
    async fn fetch(&self, target_filename: &str) -> Result<Vec<u8>, FetchError> {
        let file_name = target_filename.rsplit('/').next().unwrap_or(target_filename);
        let path = self.dir.join(file_name);
        debug!("Reading target {} from mirror {}", target_filename, path.display());

        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FetchError::NotFound(target_filename.to_string()),
            _ => FetchError::Transport(format!("{}: {e}", path.display())),
        })
    }
}
