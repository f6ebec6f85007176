//! Local state store: last-known server properties for every tracked file.
//!
//! Persists a `LocalStoreFile` JSON document at `<root>/config/.local_store`,
//! keyed by path relative to the project root (`src/classes/Foo.cls`).
//! Writes use the same atomic `.tmp` + rename pattern as every other project
//! file. A corrupt or truncated store is loaded as empty so a crash during a
//! previous write never blocks the project.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Component as PathComponent, Path, PathBuf};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::catalog::TypeCatalog;
use crate::error::{io_err, CoreError};
use crate::types::{FileProperties, LocalEntry, ServerRecords, SyncState, ToolingRecord};
use crate::writer;

/// On-disk payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LocalStoreFile {
    pub updated_at: DateTime<Utc>,
    pub entries: BTreeMap<String, LocalEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LocalStoreCompat {
    Structured(LocalStoreFile),
    Legacy(BTreeMap<String, LocalEntry>),
}

/// `<root>/config/.local_store`
pub fn store_path_at(root: &Path) -> PathBuf {
    root.join("config").join(".local_store")
}

/// Normalise `path` to a store key: relative to `root`, `/`-separated.
pub fn relative_key(root: &Path, path: &Path) -> Result<String, CoreError> {
    let rel = if path.is_absolute() {
        path.strip_prefix(root)
            .map_err(|_| CoreError::OutsideProject {
                path: path.to_path_buf(),
            })?
    } else {
        path
    };
    let mut parts = Vec::new();
    for part in rel.components() {
        match part {
            PathComponent::Normal(p) => parts.push(p.to_string_lossy().into_owned()),
            PathComponent::CurDir => {}
            PathComponent::ParentDir => {
                if parts.pop().is_none() {
                    return Err(CoreError::OutsideProject {
                        path: path.to_path_buf(),
                    });
                }
            }
            PathComponent::RootDir | PathComponent::Prefix(_) => {}
        }
    }
    Ok(parts.join("/"))
}

/// Durable mapping of relative path → [`LocalEntry`].
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    entries: BTreeMap<String, LocalEntry>,
}

impl LocalStore {
    /// An empty store rooted at `root`; nothing is written until a mutation.
    pub fn empty(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            entries: BTreeMap::new(),
        }
    }

    /// Load the store for the project at `root`.
    ///
    /// Returns an empty store if the file is missing, corrupt, or truncated.
    pub fn load_at(root: &Path) -> Result<Self, CoreError> {
        let path = store_path_at(root);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::empty(root)),
            Err(err) => return Err(io_err(&path, err)),
        };
        let entries = match serde_json::from_str::<LocalStoreCompat>(&contents) {
            Ok(LocalStoreCompat::Structured(file)) => file.entries,
            Ok(LocalStoreCompat::Legacy(entries)) => entries,
            Err(err) => {
                tracing::warn!(
                    "local store at {} is unreadable ({err}); starting empty",
                    path.display()
                );
                BTreeMap::new()
            }
        };
        Ok(Self {
            root: root.to_path_buf(),
            entries,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn get(&self, key: &str) -> Option<&LocalEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &LocalEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace entries.
    ///
    /// Persists immediately unless `defer_save` is set, in which case the
    /// caller must call [`LocalStore::save`] once the batch is complete.
    pub fn set<I>(&mut self, entries: I, defer_save: bool) -> Result<(), CoreError>
    where
        I: IntoIterator<Item = (String, LocalEntry)>,
    {
        let mut changed = false;
        for (key, entry) in entries {
            if self.entries.get(&key) != Some(&entry) {
                self.entries.insert(key, entry);
                changed = true;
            }
        }
        if changed && !defer_save {
            self.save()?;
        }
        Ok(())
    }

    /// Merge server properties into the store and persist.
    ///
    /// Tooling rows are keyed through the catalog (`<dir>/<Name>.<suffix>`);
    /// metadata file properties carry their own `fileName`. Every merged entry
    /// is marked clean with the checksum of its current body. Returns the
    /// number of entries written; an empty batch touches nothing on disk.
    pub fn update(&mut self, records: &ServerRecords, catalog: &TypeCatalog) -> Result<usize, CoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        let merged = match records {
            ServerRecords::Tooling(rows) => rows
                .iter()
                .filter_map(|row| self.merge_tooling(row, catalog))
                .collect::<Vec<_>>(),
            ServerRecords::Metadata(rows) => rows
                .iter()
                .map(|row| self.merge_file_properties(row))
                .collect::<Vec<_>>(),
        };
        let count = merged.len();
        self.set(merged, false)?;
        Ok(count)
    }

    fn merge_tooling(&self, row: &ToolingRecord, catalog: &TypeCatalog) -> Option<(String, LocalEntry)> {
        let Some(ty) = catalog.find(row.attributes.type_name.as_str()) else {
            tracing::warn!(
                "skipping {} {}: type not in catalog",
                row.attributes.type_name,
                row.name
            );
            return None;
        };
        let file_name = match &ty.suffix {
            Some(suffix) => format!("{}.{suffix}", row.name),
            None => row.name.clone(),
        };
        let key = format!("src/{}/{file_name}", ty.directory_name);
        let mut entry = self
            .entries
            .get(&key)
            .cloned()
            .unwrap_or_else(|| LocalEntry::unknown(row.name.clone(), ty.xml_name.clone()));
        entry.remote_id = Some(row.id.clone());
        entry.full_name = row.name.clone();
        entry.type_name = ty.xml_name.clone();
        entry.last_modified_date = Some(row.last_modified_date);
        entry.last_modified_by_id = row.last_modified_by_id.clone();
        entry.created_date = row.created_date.or(entry.created_date);
        entry.created_by_id = row.created_by_id.clone().or(entry.created_by_id);
        self.mark_clean(&key, &mut entry);
        Some((key, entry))
    }

    fn merge_file_properties(&self, row: &FileProperties) -> (String, LocalEntry) {
        let key = format!("src/{}", row.file_name.trim_start_matches("unpackaged/"));
        let mut entry = self
            .entries
            .get(&key)
            .cloned()
            .unwrap_or_else(|| LocalEntry::unknown(row.full_name.clone(), row.type_name.clone()));
        entry.remote_id = Some(row.id.clone());
        entry.full_name = row.full_name.clone();
        entry.type_name = row.type_name.clone();
        entry.last_modified_date = Some(row.last_modified_date);
        entry.last_modified_by_id = row.last_modified_by_id.clone();
        entry.created_date = row.created_date.or(entry.created_date);
        entry.created_by_id = row.created_by_id.clone().or(entry.created_by_id);
        self.mark_clean(&key, &mut entry);
        (key, entry)
    }

    fn mark_clean(&self, key: &str, entry: &mut LocalEntry) {
        let path = self.root.join(key);
        entry.checksum = if path.is_file() {
            writer::checksum_file(&path).ok()
        } else {
            None
        };
        entry.sync_state = SyncState::Clean;
    }

    /// Drop every entry whose remote id is in `ids`. Returns the number removed.
    pub fn remove_by_id(&mut self, ids: &[&str]) -> Result<usize, CoreError> {
        let before = self.entries.len();
        self.entries
            .retain(|_, e| !e.remote_id.as_deref().is_some_and(|id| ids.contains(&id)));
        let removed = before - self.entries.len();
        if removed > 0 {
            self.save()?;
        }
        Ok(removed)
    }

    /// Drop every entry whose key matches `pattern`. Returns the number removed.
    pub fn remove_key_by_regex(&mut self, pattern: &str) -> Result<usize, CoreError> {
        let re = Regex::new(pattern)?;
        let before = self.entries.len();
        self.entries.retain(|key, _| !re.is_match(key));
        let removed = before - self.entries.len();
        if removed > 0 {
            self.save()?;
        }
        Ok(removed)
    }

    /// Compare the body on disk against the recorded checksum.
    pub fn compute_sync_state(&self, key: &str) -> SyncState {
        let Some(checksum) = self.entries.get(key).and_then(|e| e.checksum.as_deref()) else {
            return SyncState::Unknown;
        };
        match writer::checksum_file(&self.root.join(key)) {
            Ok(current) if current == checksum => SyncState::Clean,
            Ok(_) => SyncState::Dirty,
            Err(_) => SyncState::Unknown,
        }
    }

    /// Recompute and persist the sync state of every entry.
    ///
    /// Returns the keys whose state changed.
    pub fn refresh_sync_states(&mut self) -> Result<Vec<String>, CoreError> {
        let updates: Vec<(String, SyncState)> = self
            .entries
            .iter()
            .filter(|(_, e)| e.checksum.is_some())
            .map(|(k, _)| (k.clone(), self.compute_sync_state(k)))
            .filter(|(k, state)| self.entries.get(k).map(|e| e.sync_state) != Some(*state))
            .collect();
        for (key, state) in &updates {
            if let Some(entry) = self.entries.get_mut(key) {
                entry.sync_state = *state;
            }
        }
        if !updates.is_empty() {
            self.save()?;
        }
        Ok(updates.into_iter().map(|(k, _)| k).collect())
    }

    /// Persist the store atomically.
    pub fn save(&self) -> Result<(), CoreError> {
        let file = LocalStoreFile {
            updated_at: Utc::now(),
            entries: self.entries.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        let path = store_path_at(&self.root);
        writer::atomic_write(&path, &json)?;
        tracing::info!("saved local store ({} entries)", self.entries.len());
        Ok(())
    }
}
