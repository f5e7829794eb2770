//! Core types shared by every layer of the autoupdate library.
//!
//! - [`ManagedBinary`] identifies the executables kept up to date.
//! - [`UpdateError`] and [`FetchError`] form the error taxonomy returned by the
//!   version store, the librarian and the selector.

pub mod binary;
pub mod error;

pub use binary::ManagedBinary;
pub use error::{FetchError, IoResultExt, Result, UpdateError};
