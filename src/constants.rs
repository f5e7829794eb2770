//! Global constants used throughout the autoupdate library.
//!
//! On-disk names, retention defaults and timeouts live here so that the
//! store, the librarian and the selector agree on a single layout.

use std::time::Duration;

/// Default number of recent versions kept by tidy, besides the running,
/// pinned and activated versions.
pub const DEFAULT_VERSIONS_TO_KEEP: usize = 2;

/// Default deadline for fetching a single target (5 minutes).
///
/// Agent artifacts are tens of megabytes and hosts are frequently on slow or
/// metered links, so this is generous. Callers can pass a tighter deadline.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(300);

/// Default interval between scheduled update checks (1 hour).
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(3600);

/// Shortest accepted interval between scheduled update checks.
pub const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Capacity of the trigger channel feeding the updater loop.
pub const TRIGGER_CHANNEL_CAPACITY: usize = 16;

/// Directory holding per-binary install lock files, relative to the library root.
pub const LOCKS_DIR: &str = ".locks";

/// Directory holding in-progress installs and removals, relative to a binary's library.
pub const STAGING_DIR: &str = ".staging";

/// Prefix of staged install directories.
pub const STAGED_INSTALL_PREFIX: &str = "install-";

/// Prefix of directories queued for deletion.
pub const STAGED_REMOVAL_PREFIX: &str = "remove-";

/// Name an archived target is staged under while its executable is unpacked.
pub const STAGED_ARCHIVE_FILE: &str = "download";

/// Marker written next to every committed artifact.
pub const INSTALL_MARKER_FILE: &str = "installed.json";

/// Current Pointer file, one per binary library.
pub const CURRENT_POINTER_FILE: &str = "current";

/// Environment variable overriding the configured library root.
pub const ROOT_DIR_ENV: &str = "AUTOUPDATE_ROOT";
