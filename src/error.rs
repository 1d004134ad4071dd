//! Custom error types for e4s-cl.
//!
//! Every failure the user can observe maps to one of these variants, and
//! every variant maps to a process exit code through [`Error::exit_code`].

use std::path::PathBuf;
use thiserror::Error;

/// Process exit code indicating successful operation.
pub const EXIT_SUCCESS: i32 = 0;

/// Process exit code indicating a non-optimal condition on exit.
pub const EXIT_WARNING: i32 = 100;

/// Process exit code indicating unrecoverable failure.
///
/// The OS truncates this to an unsigned byte (156 on POSIX).
pub const EXIT_FAILURE: i32 = -100;

/// Process exit code for command-line usage errors.
pub const EXIT_USAGE: i32 = 2;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Usage(String),

    #[error("Backend {0} not found. Is the module loaded ?")]
    BackendNotAvailable(String),

    #[error("Backend {name} not supported at this time. Available backends are: {available}")]
    BackendUnsupported { name: String, available: String },

    #[error("Container analysis failed ! ({0})")]
    AnalysisFailure(i32),

    #[error("Translation setup failed: {0}")]
    TranslationSetup(String),

    #[error("No profile selected")]
    NoProfileSelected,

    #[error("Profile not found: '{0}'")]
    ProfileNotFound(String),

    #[error("A profile named '{0}' already exists")]
    UniqueAttribute(String),

    #[error("Invalid profile record: {0}")]
    Model(String),

    #[error("Cannot write to '{0}': storage is read-only")]
    StorageReadOnly(PathBuf),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Launcher {0} is not supported")]
    LauncherUnsupported(String),

    #[error("Subprocess exited with code {0}")]
    SubprocessNonzero(i32),

    #[error("Interrupted")]
    Interrupted,

    #[error("Internal error: {0}. Please raise an issue on Github with the debug output")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Usage(_) => EXIT_USAGE,
            Error::Interrupted => EXIT_WARNING,
            Error::SubprocessNonzero(code) => *code,
            _ => EXIT_FAILURE,
        }
    }

    /// True if this error should be logged at critical level (backend and
    /// probe failures), as opposed to plain error level.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Error::BackendNotAvailable(_)
                | Error::BackendUnsupported { .. }
                | Error::AnalysisFailure(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::Usage("bad flag".into()).exit_code(), EXIT_USAGE);
        assert_eq!(Error::Interrupted.exit_code(), EXIT_WARNING);
        assert_eq!(Error::SubprocessNonzero(3).exit_code(), 3);
        assert_eq!(
            Error::BackendNotAvailable("podman".into()).exit_code(),
            EXIT_FAILURE
        );
        assert_eq!(Error::NoProfileSelected.exit_code(), EXIT_FAILURE);
    }

    #[test]
    fn test_critical_kinds() {
        assert!(Error::AnalysisFailure(1).is_critical());
        assert!(Error::BackendNotAvailable("shifter".into()).is_critical());
        assert!(!Error::NoProfileSelected.is_critical());
    }
}
