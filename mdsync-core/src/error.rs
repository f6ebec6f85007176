//! Error types for mdsync-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from project state operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error (local store, index, describe cache).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization error (settings save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Settings YAML parse error on load: includes file path.
    #[error("failed to parse settings at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Manifest XML could not be parsed.
    #[error("failed to parse manifest at {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: roxmltree::Error,
    },

    /// A regex passed to `remove_key_by_regex` did not compile.
    #[error("invalid key pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// `save()` was called on a manifest that was never loaded from disk.
    #[error("manifest has no backing file")]
    UnboundManifest,

    /// The directory is not an mdsync project (no `src/` under the root).
    #[error("project not found at {path}")]
    ProjectNotFound { path: PathBuf },

    /// The path lies outside the project root.
    #[error("{path} is not inside the project root")]
    OutsideProject { path: PathBuf },

    /// The component's remote type could not be determined.
    #[error("unable to resolve metadata type for {path}")]
    UnresolvedType { path: PathBuf },
}

/// Convenience constructor for [`CoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CoreError {
    CoreError::Io {
        path: path.into(),
        source,
    }
}
