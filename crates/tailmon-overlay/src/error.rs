//! Error types for overlay operations.

use thiserror::Error;

/// Result type alias for overlay operations.
pub type Result<T> = std::result::Result<T, OverlayError>;

/// Errors that can occur while driving the overlay provider.
#[derive(Debug, Error)]
pub enum OverlayError {
    /// The tailscale CLI or daemon binary is not installed or not in PATH.
    #[error("{program} not installed: {message}")]
    NotInstalled {
        /// The missing program.
        program: &'static str,
        /// Additional context about the error.
        message: String,
    },

    /// The per-identity daemon could not be spawned or has exited.
    #[error("overlay daemon error: {message}")]
    Daemon {
        /// Description of the daemon failure.
        message: String,
    },

    /// A CLI command against the local API failed.
    #[error("command failed: {command}: {stderr}")]
    CommandFailed {
        /// The command that was executed.
        command: String,
        /// Standard error output.
        stderr: String,
    },

    /// The local API returned a status document we could not parse.
    #[error("unable to parse status: {message}")]
    StatusParse {
        /// Description of the parse error.
        message: String,
    },

    /// Binding the overlay listener failed.
    #[error("unable to listen on {addr}")]
    Bind {
        /// The address that could not be bound.
        addr: std::net::SocketAddr,
        /// The underlying bind error.
        #[source]
        source: std::io::Error,
    },
}
