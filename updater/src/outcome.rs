//! Per-module results of an update run.

use std::fmt;

/// The cause recorded for a module that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleError {
    /// Human-readable description of the failure.
    pub message: String,
    /// The URL being accessed when the failure happened, if any.
    pub url: Option<String>,
}

impl ModuleError {
    /// A failure that did not involve a request.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            url: None,
        }
    }

    /// A failure while accessing `url`.
    #[must_use]
    pub fn at(message: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            url: Some(url.into()),
        }
    }
}

impl fmt::Display for ModuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.url {
            Some(url) => write!(f, "{} ({url})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// What happened to one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The upstream artefact differed. In dry-run mode the file is untouched.
    Updated {
        /// Where the new content came from.
        source_url: String,
    },
    /// The local file already matches the upstream artefact.
    UpToDate,
    /// The module has no usable link or its release has no matching asset.
    NoLinkFound,
    /// The link names a repository without resolvable releases.
    InvalidLink,
    /// The file name carries the ignore marker.
    Ignored,
    /// Something went wrong for this module only.
    Error(ModuleError),
}

impl SyncOutcome {
    /// Whether this outcome carries an error.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// A finished module and its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleReport {
    /// File name of the module.
    pub file_name: String,
    /// The outcome reached.
    pub outcome: SyncOutcome,
}

impl ModuleReport {
    /// Pair `file_name` with `outcome`.
    #[must_use]
    pub fn new(file_name: impl Into<String>, outcome: SyncOutcome) -> Self {
        Self {
            file_name: file_name.into(),
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_url_when_known() {
        let with_url = ModuleError::at("HTTP 500", "https://github.com/acme/foo");
        assert_eq!(with_url.to_string(), "HTTP 500 (https://github.com/acme/foo)");
        assert_eq!(ModuleError::new("disk full").to_string(), "disk full");
    }

    #[test]
    fn only_error_outcomes_are_errors() {
        assert!(SyncOutcome::Error(ModuleError::new("boom")).is_error());
        assert!(!SyncOutcome::UpToDate.is_error());
        assert!(!SyncOutcome::InvalidLink.is_error());
    }
}
