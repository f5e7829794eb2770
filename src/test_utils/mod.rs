//! Test helpers shared by unit tests and the integration suite.
//!
//! Enabled for `cfg(test)` and behind the `test-utils` feature.

use std::io::{Cursor, Write};
use std::sync::Once;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::core::{FetchError, ManagedBinary};
use crate::fetch::ArtifactFetcher;
use crate::target::{HashAlgorithm, TargetDescriptor};
use crate::verification::ChecksumVerifier;

static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests, once per process.
///
/// Uses `level` when given, otherwise `RUST_LOG` if set; with neither, tests
/// run silently.
///
/// ```bash
/// RUST_LOG=agent_autoupdate=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}

/// A verified-looking descriptor for `bytes` under `target_filename`.
pub fn descriptor_for(binary: ManagedBinary, target_filename: &str, bytes: &[u8]) -> TargetDescriptor {
    TargetDescriptor::new(
        binary,
        target_filename,
        ChecksumVerifier::digest_bytes(HashAlgorithm::Sha256, bytes),
        bytes.len() as u64,
    )
}

/// A gzip-compressed tarball of regular files.
pub fn tar_gz_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, contents) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(contents.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, path, *contents).unwrap();
    }
    let tarball = builder.into_inner().unwrap();

    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(&tarball).unwrap();
    encoder.finish().unwrap()
}

/// A zip archive of regular files.
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (path, contents) in entries {
        writer.start_file(*path, zip::write::SimpleFileOptions::default()).unwrap();
        writer.write_all(contents).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// In-memory [`ArtifactFetcher`] that counts calls.
///
/// Targets that were never [`served`](StubFetcher::serve) fail with
/// [`FetchError::NotFound`].
#[derive(Debug, Default)]
pub struct StubFetcher {
    artifacts: DashMap<String, Vec<u8>>,
    calls: AtomicUsize,
    delay: Duration,
    failure: Option<FetchError>,
}

impl StubFetcher {
    /// An empty stub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every fetch, to widen race windows.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail every fetch with `failure`.
    pub fn failing_with(mut self, failure: FetchError) -> Self {
        self.failure = Some(failure);
        self
    }

    /// Serve `bytes` for `target_filename`.
    pub fn serve(&self, target_filename: &str, bytes: Vec<u8>) {
        self.artifacts.insert(target_filename.to_string(), bytes);
    }

    /// Number of fetches performed so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ArtifactFetcher for StubFetcher {
    async fn fetch(&self, target_filename: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        self.artifacts
            .get(target_filename)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| FetchError::NotFound(target_filename.to_string()))
    }
}
