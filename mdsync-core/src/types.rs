//! Domain types shared by the local state store, manifest, and index.
//!
//! Server-side records come in two shapes: tooling query rows (PascalCase,
//! `Id`/`LastModifiedDate`) and metadata file properties (camelCase,
//! `fileName`/`fullName`). [`ServerRecords`] keeps them apart as a tagged
//! union so nothing downstream probes for field presence.

use std::borrow::Borrow;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Remote metadata type name, e.g. `ApexClass`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeName(pub String);

impl TypeName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for TypeName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TypeName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl Borrow<str> for TypeName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Sync state of a tracked file relative to its last known server copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Clean,
    Dirty,
    #[default]
    Unknown,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Clean => write!(f, "clean"),
            SyncState::Dirty => write!(f, "dirty"),
            SyncState::Unknown => write!(f, "unknown"),
        }
    }
}

// ---------------------------------------------------------------------------
// Local store entry
// ---------------------------------------------------------------------------

/// Last-known server properties for one project file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    pub full_name: String,
    #[serde(rename = "type")]
    pub type_name: TypeName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_by_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by_id: Option<String>,
    #[serde(default)]
    pub sync_state: SyncState,
    /// SHA-256 of the body as of the last successful sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl LocalEntry {
    /// An entry with no server history, synthesized on first resolution.
    pub fn unknown(full_name: impl Into<String>, type_name: TypeName) -> Self {
        Self {
            remote_id: None,
            full_name: full_name.into(),
            type_name,
            last_modified_date: None,
            last_modified_by_id: None,
            created_date: None,
            created_by_id: None,
            sync_state: SyncState::Unknown,
            checksum: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Server-side records
// ---------------------------------------------------------------------------

/// `attributes` block on a tooling query row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordAttributes {
    #[serde(rename = "type")]
    pub type_name: TypeName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A tooling/REST query row (`SELECT Id, Name, LastModifiedDate ... FROM ApexClass`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ToolingRecord {
    pub attributes: RecordAttributes,
    pub id: String,
    pub name: String,
    pub last_modified_date: DateTime<Utc>,
    #[serde(default)]
    pub last_modified_by_id: Option<String>,
    #[serde(default)]
    pub created_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by_id: Option<String>,
    #[serde(default)]
    pub namespace_prefix: Option<String>,
}

/// Metadata API file properties, as returned by `list` and `retrieve`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileProperties {
    pub id: String,
    pub full_name: String,
    /// Path relative to the package root, e.g. `classes/Foo.cls`.
    pub file_name: String,
    #[serde(rename = "type")]
    pub type_name: TypeName,
    pub last_modified_date: DateTime<Utc>,
    #[serde(default)]
    pub last_modified_by_id: Option<String>,
    #[serde(default)]
    pub last_modified_by_name: Option<String>,
    #[serde(default)]
    pub created_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by_id: Option<String>,
    #[serde(default)]
    pub namespace_prefix: Option<String>,
}

/// A batch of server properties in one of the two remote shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerRecords {
    Tooling(Vec<ToolingRecord>),
    Metadata(Vec<FileProperties>),
}

impl ServerRecords {
    /// Decode untyped JSON rows, choosing the shape from the first element.
    ///
    /// Rows carrying `Id`/`LastModifiedDate` are tooling rows; anything else
    /// must be metadata file properties. An empty slice decodes as an empty
    /// metadata batch.
    pub fn from_values(values: Vec<Value>) -> Result<Self, serde_json::Error> {
        let tooling = values
            .first()
            .map(|first| first.get("Id").is_some() || first.get("LastModifiedDate").is_some())
            .unwrap_or(false);
        if tooling {
            let rows = values
                .into_iter()
                .map(serde_json::from_value)
                .collect::<Result<Vec<ToolingRecord>, _>>()?;
            Ok(ServerRecords::Tooling(rows))
        } else {
            let rows = values
                .into_iter()
                .map(serde_json::from_value)
                .collect::<Result<Vec<FileProperties>, _>>()?;
            Ok(ServerRecords::Metadata(rows))
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ServerRecords::Tooling(rows) => rows.is_empty(),
            ServerRecords::Metadata(rows) => rows.is_empty(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn type_name_display() {
        assert_eq!(TypeName::from("ApexClass").to_string(), "ApexClass");
    }

    #[test]
    fn sync_state_serializes_lowercase() {
        let json = serde_json::to_string(&SyncState::Dirty).unwrap();
        assert_eq!(json, "\"dirty\"");
    }

    #[test]
    fn from_values_detects_tooling_rows() {
        let rows = vec![json!({
            "attributes": {"type": "ApexClass"},
            "Id": "01p000000000001",
            "Name": "Foo",
            "LastModifiedDate": "2024-03-01T10:00:00Z",
            "LastModifiedById": "005000000000001"
        })];
        match ServerRecords::from_values(rows).unwrap() {
            ServerRecords::Tooling(rows) => {
                assert_eq!(rows[0].name, "Foo");
                assert_eq!(rows[0].attributes.type_name.as_str(), "ApexClass");
            }
            other => panic!("expected tooling rows, got {other:?}"),
        }
    }

    #[test]
    fn from_values_detects_file_properties() {
        let rows = vec![json!({
            "id": "00O000000000001",
            "fullName": "Sales/Pipeline",
            "fileName": "reports/Sales/Pipeline.report",
            "type": "Report",
            "lastModifiedDate": "2024-03-01T10:00:00Z"
        })];
        match ServerRecords::from_values(rows).unwrap() {
            ServerRecords::Metadata(rows) => assert_eq!(rows[0].full_name, "Sales/Pipeline"),
            other => panic!("expected file properties, got {other:?}"),
        }
    }

    #[test]
    fn from_values_empty_is_empty() {
        assert!(ServerRecords::from_values(vec![]).unwrap().is_empty());
    }

    #[test]
    fn local_entry_uses_camel_case_keys() {
        let entry = LocalEntry::unknown("Foo", TypeName::from("ApexClass"));
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["fullName"], "Foo");
        assert_eq!(value["type"], "ApexClass");
        assert_eq!(value["syncState"], "unknown");
    }
}
