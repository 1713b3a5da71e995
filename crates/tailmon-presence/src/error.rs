//! Error types for presence management.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for presence operations.
pub type Result<T> = std::result::Result<T, PresenceError>;

/// Errors that can occur while bringing a presence session up.
#[derive(Debug, Error)]
pub enum PresenceError {
    /// The per-identity state directory could not be created.
    ///
    /// Without it the overlay cannot persist its keys, so callers treat
    /// this as fatal to the identity's startup.
    #[error("unable to create state dir: {path}")]
    StateDir {
        /// The directory that could not be created.
        path: PathBuf,
        /// The underlying filesystem error.
        #[source]
        source: std::io::Error,
    },

    /// An overlay provider operation failed.
    #[error(transparent)]
    Overlay(#[from] tailmon_overlay::OverlayError),
}
