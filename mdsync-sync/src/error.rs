//! Error types for mdsync-sync.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use mdsync_core::CoreError;

/// Failure reported by a [`MetadataClient`](crate::client::MetadataClient) call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The remote call did not answer in time.
    #[error("remote call timed out: {0}")]
    Timeout(String),

    /// The remote service refused the request.
    #[error("remote rejected request: {message}")]
    Rejected { message: String },

    /// Connection-level failure.
    #[error("transport error: {0}")]
    Transport(String),
}

/// All errors that can arise from sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error from project state handling.
    #[error("project state error: {0}")]
    Core(#[source] CoreError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Building the deploy archive failed.
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// A remote call failed.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The component's remote type could not be determined.
    #[error("unable to resolve metadata type for {path}")]
    UnresolvedType { path: PathBuf },

    /// A conflict check needed server history the local store does not have.
    #[error("no local server history for {path}; refresh it or force the operation")]
    MissingIndex { path: PathBuf },

    /// A polling loop ran past the configured timeout.
    #[error("{operation} did not finish within {elapsed:?}")]
    ProtocolTimeout {
        operation: &'static str,
        elapsed: Duration,
    },

    /// One or more container members could not be created.
    #[error("failed to create container members for: {}", failed.join(", "))]
    PartialMemberFailure { failed: Vec<String> },
}

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UnresolvedType { path } => SyncError::UnresolvedType { path },
            other => SyncError::Core(other),
        }
    }
}

impl SyncError {
    /// Message of the innermost cause in the error chain.
    pub fn root_cause_message(&self) -> String {
        let mut current: &dyn std::error::Error = self;
        while let Some(next) = current.source() {
            current = next;
        }
        current.to_string()
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_type_is_lifted_out_of_core() {
        let err: SyncError = CoreError::UnresolvedType {
            path: PathBuf::from("src/misc/notes.txt"),
        }
        .into();
        assert!(matches!(err, SyncError::UnresolvedType { .. }));
    }

    #[test]
    fn root_cause_is_innermost_message() {
        let err = io_err(
            "/tmp/x",
            std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        );
        assert_eq!(err.root_cause_message(), "disk full");
        let remote = SyncError::from(RemoteError::Rejected {
            message: "INVALID_SESSION_ID".into(),
        });
        assert_eq!(
            remote.root_cause_message(),
            "remote rejected request: INVALID_SESSION_ID"
        );
    }
}
