//! Run-level error types for the updater.
//!
//! Only conditions that abort a whole run live here. Everything scoped to a
//! single module is folded into that module's
//! [`SyncOutcome`](crate::outcome::SyncOutcome) instead, so one broken mod
//! never stops the batch.

use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors that end an update run.
#[derive(Debug, Error)]
pub enum UpdaterError {
    /// The mods folder contains no `.dll` files.
    #[error("no mods found to update in {path}")]
    NoModules {
        /// The folder that was scanned.
        path: Utf8PathBuf,
    },

    /// The mods folder could not be listed.
    #[error("error accessing mods folder {path}: {source}")]
    ModsFolderUnreadable {
        /// The folder that was scanned.
        path: Utf8PathBuf,
        /// The underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// Configuration could not be resolved.
    #[error("invalid configuration: {reason}")]
    Config {
        /// Description of the problem.
        reason: String,
    },

    /// The upstream kept answering with rate-limit responses.
    #[error("access to {url} is still rate limited after {attempts} attempts")]
    RateLimited {
        /// The request that was being retried.
        url: String,
        /// Number of attempts made, including the first.
        attempts: u32,
    },

    /// The upstream rejected the supplied token.
    #[error("invalid token provided (HTTP 401 from {url})")]
    Unauthorized {
        /// The request that was rejected.
        url: String,
    },

    /// The run was cancelled or exceeded its deadline.
    #[error("update run cancelled")]
    Cancelled,

    /// An I/O operation outside any single module failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using [`UpdaterError`].
pub type Result<T> = std::result::Result<T, UpdaterError>;
