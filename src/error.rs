//! Error types for identity loading and binding.
//!
//! Only construction-time problems are surfaced as errors. Failures during
//! live operation (a rejected value, a failed save, a failed reload) are
//! logged where they happen and never returned.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for identity and binder operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors raised while constructing identities or bindings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The backing file is syntactically malformed.
    #[error("invalid config file {}: {reason}", display_path(.path))]
    InvalidConfigFile {
        path: Option<PathBuf>,
        reason: String,
    },

    /// The backing file parsed but does not describe a usable identity
    /// (no name, or no resolvable target).
    #[error("invalid identity file: {0}")]
    InvalidIdentityFile(String),

    /// A binding directive could not be resolved to a domain.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub fn invalid_file(path: Option<&Path>, reason: impl Into<String>) -> Self {
        Self::InvalidConfigFile {
            path: path.map(Path::to_path_buf),
            reason: reason.into(),
        }
    }

    pub fn invalid_identity(reason: impl Into<String>) -> Self {
        Self::InvalidIdentityFile(reason.into())
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }

    /// True for errors that mean "the file is fine but incomplete", which a
    /// caller may offer to repair rather than just skip.
    pub fn is_incomplete_identity(&self) -> bool {
        matches!(self, ConfigError::InvalidIdentityFile(_))
    }
}

fn display_path(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => p.display().to_string(),
        None => "<stream>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_file_message_includes_path() {
        let err = ConfigError::invalid_file(Some(Path::new("/tmp/foo.yaml")), "bad indent");
        assert_eq!(
            err.to_string(),
            "invalid config file /tmp/foo.yaml: bad indent"
        );
    }

    #[test]
    fn test_invalid_file_without_path() {
        let err = ConfigError::invalid_file(None, "oops");
        assert_eq!(err.to_string(), "invalid config file <stream>: oops");
    }

    #[test]
    fn test_incomplete_identity_is_distinguishable() {
        assert!(ConfigError::invalid_identity("no name specified").is_incomplete_identity());
        assert!(!ConfigError::invalid_file(None, "x").is_incomplete_identity());
        assert!(!ConfigError::configuration("no domain").is_incomplete_identity());
    }
}
