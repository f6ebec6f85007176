//! Project status: how each file compares to its last sync with the server.
//!
//! Classification precedence per store entry:
//! 1. `Missing` (tracked, but gone from disk)
//! 2. `Unknown` (tracked without a recorded checksum)
//! 3. `Dirty` (body changed since the last sync)
//! 4. `Clean`
//!
//! Files under `src/` with no store entry, and not inside a tracked bundle
//! directory, are reported as `Untracked`.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use mdsync_core::{Project, SyncState};

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Clean,
    Dirty,
    Unknown,
    Missing,
    Untracked,
}

impl From<SyncState> for FileStatus {
    fn from(state: SyncState) -> Self {
        match state {
            SyncState::Clean => FileStatus::Clean,
            SyncState::Dirty => FileStatus::Dirty,
            SyncState::Unknown => FileStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEntry {
    pub key: String,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ProjectStatus {
    pub entries: Vec<StatusEntry>,
}

impl ProjectStatus {
    pub fn count(&self, status: FileStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    /// No file needs attention.
    pub fn is_clean(&self) -> bool {
        self.entries.iter().all(|e| e.status == FileStatus::Clean)
    }

    /// `2 clean, 1 dirty, 1 untracked`
    pub fn summary(&self) -> String {
        let parts: Vec<String> = [
            (FileStatus::Clean, "clean"),
            (FileStatus::Dirty, "dirty"),
            (FileStatus::Unknown, "unknown"),
            (FileStatus::Missing, "missing"),
            (FileStatus::Untracked, "untracked"),
        ]
        .iter()
        .map(|(status, label)| (self.count(*status), label))
        .filter(|(n, _)| *n > 0)
        .map(|(n, label)| format!("{n} {label}"))
        .collect();
        if parts.is_empty() {
            return "no tracked files".to_string();
        }
        parts.join(", ")
    }
}

/// Classify every tracked and untracked file in `project`.
pub fn check(project: &Project) -> Result<ProjectStatus, SyncError> {
    let root = project.root();
    let mut entries = Vec::new();
    let mut tracked_dirs = Vec::new();
    for (key, entry) in project.store.entries() {
        let path = root.join(key);
        let status = if !path.exists() {
            FileStatus::Missing
        } else if path.is_dir() {
            tracked_dirs.push(format!("{key}/"));
            FileStatus::Unknown
        } else if entry.checksum.is_none() {
            FileStatus::Unknown
        } else {
            project.store.compute_sync_state(key).into()
        };
        entries.push(StatusEntry {
            key: key.clone(),
            status,
            last_modified_date: entry.last_modified_date,
        });
    }

    let tracked: BTreeSet<&str> = project.store.entries().map(|(k, _)| k.as_str()).collect();
    for key in project.source_files()? {
        if tracked.contains(key.as_str()) || tracked_dirs.iter().any(|d| key.starts_with(d.as_str())) {
            continue;
        }
        entries.push(StatusEntry {
            key,
            status: FileStatus::Untracked,
            last_modified_date: None,
        });
    }
    entries.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(ProjectStatus { entries })
}
