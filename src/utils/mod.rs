//! Filesystem helpers shared by the store and the selector.

pub mod fs;

pub use fs::{atomic_write, set_executable, sync_dir};
