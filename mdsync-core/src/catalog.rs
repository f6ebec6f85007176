//! Metadata type catalog: the cached `describe()` result.
//!
//! The catalog is persisted at `<root>/config/.describe` and drives
//! extension-based type resolution for components that have no local store
//! entry yet.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, CoreError};
use crate::types::TypeName;
use crate::writer;

/// Types compiled through the single-file container protocol.
pub const TOOLING_TYPES: &[&str] = &["ApexClass", "ApexTrigger", "ApexPage", "ApexComponent"];

/// Bundle container directories under `src/` and the bundle type they hold.
pub const BUNDLE_CONTAINERS: &[(&str, &str)] = &[
    ("aura", "AuraDefinitionBundle"),
    ("lwc", "LightningComponentBundle"),
];

/// One entry of the describe result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataType {
    pub xml_name: TypeName,
    pub directory_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
    #[serde(default)]
    pub in_folder: bool,
    #[serde(default)]
    pub meta_file: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_xml_names: Vec<String>,
}

impl MetadataType {
    /// Single source file with a tooling-side representation.
    pub fn is_tooling(&self) -> bool {
        TOOLING_TYPES.contains(&self.xml_name.as_str())
    }

    /// Bundle container type (`AuraDefinitionBundle`, `LightningComponentBundle`).
    pub fn is_bundle(&self) -> bool {
        BUNDLE_CONTAINERS
            .iter()
            .any(|(_, ty)| *ty == self.xml_name.as_str())
    }

    /// Composite type with child types (e.g. `CustomObject` → `CustomField`).
    pub fn is_composite(&self) -> bool {
        !self.child_xml_names.is_empty()
    }

    /// The type used to list folders of an in-folder type.
    pub fn folder_type_name(&self) -> Option<TypeName> {
        if !self.in_folder {
            return None;
        }
        Some(match self.xml_name.as_str() {
            "EmailTemplate" => TypeName::from("EmailFolder"),
            other => TypeName::from(format!("{other}Folder")),
        })
    }
}

/// The full describe result.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeCatalog {
    #[serde(rename = "metadataObjects", default)]
    pub types: Vec<MetadataType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_namespace: Option<String>,
}

impl TypeCatalog {
    pub fn new(types: Vec<MetadataType>) -> Self {
        Self {
            types,
            organization_namespace: None,
        }
    }

    /// A catalog of the commonly used types, used before the first describe.
    pub fn standard() -> Self {
        fn ty(
            xml: &str,
            dir: &str,
            suffix: Option<&str>,
            in_folder: bool,
            meta_file: bool,
            children: &[&str],
        ) -> MetadataType {
            MetadataType {
                xml_name: TypeName::from(xml),
                directory_name: dir.to_string(),
                suffix: suffix.map(str::to_string),
                in_folder,
                meta_file,
                child_xml_names: children.iter().map(|c| c.to_string()).collect(),
            }
        }

        Self::new(vec![
            ty("ApexClass", "classes", Some("cls"), false, true, &[]),
            ty("ApexTrigger", "triggers", Some("trigger"), false, true, &[]),
            ty("ApexPage", "pages", Some("page"), false, true, &[]),
            ty("ApexComponent", "components", Some("component"), false, true, &[]),
            ty("StaticResource", "staticresources", Some("resource"), false, true, &[]),
            ty(
                "CustomObject",
                "objects",
                Some("object"),
                false,
                false,
                &["CustomField", "ValidationRule", "RecordType", "ListView"],
            ),
            ty("Layout", "layouts", Some("layout"), false, false, &[]),
            ty("Workflow", "workflows", Some("workflow"), false, false, &["WorkflowRule"]),
            ty("Report", "reports", Some("report"), true, false, &[]),
            ty("Dashboard", "dashboards", Some("dashboard"), true, false, &[]),
            ty("Document", "documents", None, true, true, &[]),
            ty("EmailTemplate", "email", Some("email"), true, true, &[]),
            ty("AuraDefinitionBundle", "aura", None, false, false, &[]),
            ty("LightningComponentBundle", "lwc", None, false, false, &[]),
        ])
    }

    /// Look up a type by its xml name.
    pub fn find(&self, name: &str) -> Option<&MetadataType> {
        self.types.iter().find(|t| t.xml_name.as_str() == name)
    }

    /// Look up the type stored under `directory` (first segment below `src/`).
    pub fn by_directory(&self, directory: &str) -> Option<&MetadataType> {
        self.types.iter().find(|t| t.directory_name == directory)
    }

    /// Match a file extension, preferring the type whose directory also matches.
    pub fn by_suffix(&self, suffix: &str, directory: Option<&str>) -> Option<&MetadataType> {
        let mut candidates = self
            .types
            .iter()
            .filter(|t| t.suffix.as_deref() == Some(suffix));
        let first = candidates.next()?;
        if let Some(dir) = directory {
            if first.directory_name == dir {
                return Some(first);
            }
            if let Some(t) = candidates.find(|t| t.directory_name == dir) {
                return Some(t);
            }
        }
        Some(first)
    }
}

/// `<root>/config/.describe`
pub fn catalog_path_at(root: &Path) -> PathBuf {
    root.join("config").join(".describe")
}

/// Load the cached describe result.
///
/// Falls back to [`TypeCatalog::standard`] if no describe has been cached yet.
pub fn load_at(root: &Path) -> Result<TypeCatalog, CoreError> {
    let path = catalog_path_at(root);
    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(serde_json::from_str(&contents)?),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            tracing::debug!("no describe cache at {}, using standard catalog", path.display());
            Ok(TypeCatalog::standard())
        }
        Err(err) => Err(io_err(&path, err)),
    }
}

/// Persist the describe result atomically.
pub fn save_at(root: &Path, catalog: &TypeCatalog) -> Result<(), CoreError> {
    let json = serde_json::to_string_pretty(catalog)?;
    writer::atomic_write(&catalog_path_at(root), &json)
}
