//! Project settings and the immutable sync configuration snapshot.
//!
//! # Storage layout
//!
//! ```text
//! <project root>/
//!   config/
//!     .settings       (YAML: ProjectSettings)
//! ```
//!
//! Settings are read once when a project is opened and turned into a
//! [`SyncConfig`]; protocols receive the snapshot, never the settings file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, CoreError};
use crate::writer;

pub const DEFAULT_API_VERSION: &str = "60.0";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

// ---------------------------------------------------------------------------
// Deploy options
// ---------------------------------------------------------------------------

/// Flags sent with a deploy request. Field names match the remote flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeployOptions {
    pub rollback_on_error: bool,
    pub perform_retrieve: bool,
    pub run_tests: Vec<String>,
    pub check_only: bool,
    pub purge_on_delete: bool,
    pub ignore_warnings: bool,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            rollback_on_error: true,
            perform_retrieve: true,
            run_tests: Vec::new(),
            check_only: false,
            purge_on_delete: false,
            ignore_warnings: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Settings file
// ---------------------------------------------------------------------------

/// Contents of `config/.settings`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSettings {
    pub project_name: String,
    pub api_version: String,
    pub check_conflicts: bool,
    /// Base polling interval; the per-protocol intervals derive from it.
    pub poll_interval_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_poll_interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deploy_poll_interval_ms: Option<u64>,
    pub timeout_secs: u64,
    pub deploy_defaults: DeployOptions,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            project_name: String::new(),
            api_version: DEFAULT_API_VERSION.to_string(),
            check_conflicts: true,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            container_poll_interval_ms: None,
            deploy_poll_interval_ms: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            deploy_defaults: DeployOptions::default(),
        }
    }
}

impl ProjectSettings {
    /// Freeze these settings into a snapshot for one operation.
    pub fn snapshot(&self) -> SyncConfig {
        let base = self.poll_interval_ms.max(1);
        SyncConfig {
            api_version: self.api_version.clone(),
            check_conflicts: self.check_conflicts,
            container_poll_interval: Duration::from_millis(
                self.container_poll_interval_ms.unwrap_or(base),
            ),
            deploy_poll_interval: Duration::from_millis(
                self.deploy_poll_interval_ms.unwrap_or(base * 2),
            ),
            timeout: Duration::from_secs(self.timeout_secs),
            deploy_defaults: self.deploy_defaults.clone(),
        }
    }
}

/// `<root>/config/.settings`: pure, no I/O.
pub fn settings_path_at(root: &Path) -> PathBuf {
    root.join("config").join(".settings")
}

/// Load settings, returning defaults when the file does not exist.
///
/// Returns `CoreError::Parse` (with path) if the YAML is malformed.
pub fn load_at(root: &Path) -> Result<ProjectSettings, CoreError> {
    let path = settings_path_at(root);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(ProjectSettings::default()),
        Err(err) => return Err(io_err(&path, err)),
    };
    serde_yaml::from_str(&contents).map_err(|e| CoreError::Parse { path, source: e })
}

/// Save settings atomically.
pub fn save_at(root: &Path, settings: &ProjectSettings) -> Result<(), CoreError> {
    let yaml = serde_yaml::to_string(settings)?;
    writer::atomic_write(&settings_path_at(root), &yaml)
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Immutable configuration threaded into every protocol invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub api_version: String,
    pub check_conflicts: bool,
    pub container_poll_interval: Duration,
    pub deploy_poll_interval: Duration,
    pub timeout: Duration,
    pub deploy_defaults: DeployOptions,
}

impl Default for SyncConfig {
    fn default() -> Self {
        ProjectSettings::default().snapshot()
    }
}
