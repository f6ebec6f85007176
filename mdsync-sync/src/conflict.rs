//! Conflict detection before a write to the server.
//!
//! A component conflicts when the server copy was modified after the
//! `lastModifiedDate` the local store recorded for it. Only tooling source
//! files and bundle content are checked; every other type, and `-meta.xml`
//! companions, deploy without a check.
//! Server copies of conflicting files are saved under
//! `<root>/.mdsync/conflicts/` with a unified diff against the local body.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use similar::TextDiff;

use mdsync_core::{writer, Component, LocalStore, SyncConfig, TypeName};

use crate::client::{MetadataClient, ServerCopy};
use crate::error::SyncError;

pub const CONFLICT_DIR: &str = ".mdsync/conflicts";

/// One component whose server copy is newer than the local one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub path: PathBuf,
    pub full_name: String,
    #[serde(rename = "type")]
    pub type_name: TypeName,
    pub local_last_modified_date: DateTime<Utc>,
    pub remote_last_modified_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_last_modified_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_copy: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

/// Conflicts keyed by component basename.
pub type ConflictSet = BTreeMap<String, Conflict>;

/// Outcome of a conflict check.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictCheck {
    pub has_conflict: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflicts: Option<ConflictSet>,
}

impl ConflictCheck {
    pub fn clear() -> Self {
        Self::default()
    }

    fn from_set(set: ConflictSet) -> Self {
        if set.is_empty() {
            return Self::clear();
        }
        Self {
            has_conflict: true,
            conflicts: Some(set),
        }
    }
}

pub struct ConflictDetector {
    enabled: bool,
    conflict_dir: PathBuf,
}

impl ConflictDetector {
    pub fn new(config: &SyncConfig, root: &Path) -> Self {
        Self {
            enabled: config.check_conflicts,
            conflict_dir: root.join(CONFLICT_DIR),
        }
    }

    /// Compare every candidate against its server copy.
    ///
    /// Returns a clear check without any remote call when checking is
    /// disabled or `force` is set. A candidate with no recorded
    /// `lastModifiedDate` fails the whole check with `MissingIndex`.
    pub async fn check<C>(
        &self,
        client: &C,
        store: &LocalStore,
        components: &[Component],
        force: bool,
    ) -> Result<ConflictCheck, SyncError>
    where
        C: MetadataClient + ?Sized,
    {
        if force || !self.enabled {
            return Ok(ConflictCheck::clear());
        }

        let mut candidates = Vec::new();
        for component in components {
            let ty = component
                .metadata_type()
                .ok_or_else(|| SyncError::UnresolvedType {
                    path: component.path().to_path_buf(),
                })?;
            if component.is_meta_file() || !(ty.is_tooling() || ty.is_bundle()) {
                continue;
            }
            let local = local_last_modified(component, store).ok_or_else(|| {
                SyncError::MissingIndex {
                    path: component.path().to_path_buf(),
                }
            })?;
            candidates.push((component, ty.xml_name.clone(), local));
        }
        if candidates.is_empty() {
            return Ok(ConflictCheck::clear());
        }

        let fetches = candidates.iter().map(|(component, ty, _)| {
            let full_name = component.full_name();
            async move {
                client
                    .fetch_server_copy(ty, &full_name, component.file_name())
                    .await
            }
        });
        let copies = join_all(fetches)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;

        // Nothing is written until every fetch has succeeded.
        let mut set = ConflictSet::new();
        for ((component, ty, local), copy) in candidates.into_iter().zip(copies) {
            if copy.last_modified_date <= local {
                continue;
            }
            tracing::info!(
                "{} changed on server at {} (local copy from {local})",
                component.key(),
                copy.last_modified_date
            );
            let conflict = self.record(component, ty, local, copy)?;
            set.insert(component.file_name().to_string(), conflict);
        }
        Ok(ConflictCheck::from_set(set))
    }

    fn record(
        &self,
        component: &Component,
        type_name: TypeName,
        local: DateTime<Utc>,
        copy: ServerCopy,
    ) -> Result<Conflict, SyncError> {
        let mut server_copy = None;
        let mut diff = None;
        if let Some(body) = &copy.body {
            let path = self.conflict_dir.join(server_copy_name(component.file_name()));
            writer::atomic_write(&path, body)?;
            let local_body = component.body().unwrap_or_default();
            diff = Some(unified_diff(component.file_name(), &local_body, body));
            server_copy = Some(path);
        }
        Ok(Conflict {
            path: component.path().to_path_buf(),
            full_name: component.full_name(),
            type_name,
            local_last_modified_date: local,
            remote_last_modified_date: copy.last_modified_date,
            remote_last_modified_by: copy.last_modified_by_name,
            server_copy,
            diff,
        })
    }
}

/// Recorded modification date; bundle items fall back to their bundle's entry.
fn local_last_modified(component: &Component, store: &LocalStore) -> Option<DateTime<Utc>> {
    if let Some(date) = component
        .local_properties(store)
        .and_then(|e| e.last_modified_date)
    {
        return Some(date);
    }
    if !component.is_bundle_item() {
        return None;
    }
    let (dir, _) = component.key().rsplit_once('/')?;
    store.get(dir).and_then(|e| e.last_modified_date)
}

/// `Foo.cls` → `Foo [SERVER COPY].cls`
fn server_copy_name(file_name: &str) -> String {
    let (source, meta) = match file_name.strip_suffix("-meta.xml") {
        Some(source) => (source, "-meta.xml"),
        None => (file_name, ""),
    };
    match source.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem} [SERVER COPY].{ext}{meta}"),
        _ => format!("{source} [SERVER COPY]{meta}"),
    }
}

fn unified_diff(file_name: &str, local: &str, server: &str) -> String {
    TextDiff::from_lines(local, server)
        .unified_diff()
        .header(&format!("local/{file_name}"), &format!("server/{file_name}"))
        .context_radius(3)
        .to_string()
}
