//! Component model: one project path and its resolved remote type.
//!
//! Resolution order:
//! 1. the type recorded in the local store entry for this path,
//! 2. the file extension matched against the type catalog,
//! 3. bundle fallback: a directory (or file) under a bundle container
//!    directory (`src/aura/<Bundle>`, `src/lwc/<bundle>`).
//!
//! Bundle membership is derived purely from path depth below the container
//! directory, never from a flag.

use std::path::{Path, PathBuf};

use crate::catalog::{MetadataType, TypeCatalog, BUNDLE_CONTAINERS};
use crate::error::{io_err, CoreError};
use crate::local_store::{relative_key, LocalStore};
use crate::server_index::{IndexNode, ServerIndex};
use crate::types::{LocalEntry, TypeName};

const META_SUFFIX: &str = "-meta.xml";

/// A project file (or bundle directory) targeted by an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    root: PathBuf,
    path: PathBuf,
    key: String,
    metadata_type: Option<MetadataType>,
}

impl Component {
    /// Wrap `path` (absolute, or relative to `root`).
    pub fn new(root: &Path, path: &Path) -> Result<Self, CoreError> {
        let key = relative_key(root, path)?;
        Ok(Self {
            root: root.to_path_buf(),
            path: root.join(&key),
            key,
            metadata_type: None,
        })
    }

    /// Absolute path on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Project root this component belongs to.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local store key (path relative to the project root).
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Basename including extension.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }

    /// Basename without the `-meta.xml` companion suffix.
    fn source_file_name(&self) -> &str {
        let name = self.file_name();
        name.strip_suffix(META_SUFFIX).unwrap_or(name)
    }

    /// Basename without extension.
    pub fn name(&self) -> &str {
        let name = self.source_file_name();
        match name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => name,
        }
    }

    /// Extension of the source file (`cls` for both `Foo.cls` and `Foo.cls-meta.xml`).
    pub fn extension(&self) -> Option<&str> {
        self.source_file_name()
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.is_empty())
    }

    pub fn is_meta_file(&self) -> bool {
        self.file_name().ends_with(META_SUFFIX)
    }

    /// Segments below `src/`.
    fn src_segments(&self) -> Vec<&str> {
        let mut parts = self.key.split('/');
        match parts.next() {
            Some("src") => parts.collect(),
            _ => Vec::new(),
        }
    }

    /// First directory below `src/` (`classes`, `aura`, `reports`, ...).
    pub fn directory(&self) -> Option<&str> {
        let segments = self.src_segments();
        (segments.len() > 1).then(|| segments[0])
    }

    fn bundle_container(&self) -> Option<&'static str> {
        let segments = self.src_segments();
        let first = *segments.first()?;
        BUNDLE_CONTAINERS
            .iter()
            .find(|(dir, _)| *dir == first)
            .map(|(_, ty)| *ty)
    }

    /// `src/<container>/<Bundle>`: the bundle directory itself.
    pub fn is_bundle(&self) -> bool {
        self.bundle_container().is_some() && self.src_segments().len() == 2
    }

    /// `src/<container>/<Bundle>/<file>`: a file inside a bundle.
    pub fn is_bundle_item(&self) -> bool {
        self.bundle_container().is_some() && self.src_segments().len() >= 3
    }

    /// Name of the enclosing bundle, for bundles and bundle items.
    pub fn bundle_name(&self) -> Option<&str> {
        if self.bundle_container().is_none() {
            return None;
        }
        self.src_segments().get(1).copied()
    }

    /// Remote full name: the bundle name for bundle content, `Folder/Name` for
    /// in-folder types, otherwise the basename without extension.
    pub fn full_name(&self) -> String {
        if let Some(bundle) = self.bundle_name() {
            return bundle.to_string();
        }
        let in_folder = self.metadata_type.as_ref().is_some_and(|t| t.in_folder);
        let segments = self.src_segments();
        if in_folder && segments.len() >= 3 {
            let keep_ext = self
                .metadata_type
                .as_ref()
                .is_some_and(|t| t.suffix.is_none());
            let leaf = if keep_ext {
                self.source_file_name()
            } else {
                self.name()
            };
            let folders = &segments[1..segments.len() - 1];
            return format!("{}/{leaf}", folders.join("/"));
        }
        self.name().to_string()
    }

    /// Resolve (once) and return this component's remote type.
    ///
    /// The first resolution of a path with no store entry synthesizes an
    /// `unknown` entry, deferred; the caller saves the store after the batch.
    pub fn resolve_type(
        &mut self,
        store: &mut LocalStore,
        catalog: &TypeCatalog,
    ) -> Result<&MetadataType, CoreError> {
        if self.metadata_type.is_none() {
            let resolved = self.lookup_type(store, catalog).ok_or_else(|| {
                CoreError::UnresolvedType {
                    path: self.path.clone(),
                }
            })?;
            tracing::debug!("{} resolved as {}", self.key, resolved.xml_name);
            self.metadata_type = Some(resolved);
            if !store.contains(&self.key) {
                let entry = LocalEntry::unknown(self.full_name(), self.type_name_or_empty());
                store.set([(self.key.clone(), entry)], true)?;
            }
        }
        self.metadata_type
            .as_ref()
            .ok_or_else(|| CoreError::UnresolvedType {
                path: self.path.clone(),
            })
    }

    fn lookup_type(&self, store: &LocalStore, catalog: &TypeCatalog) -> Option<MetadataType> {
        if let Some(ty) = store
            .get(&self.key)
            .and_then(|entry| catalog.find(entry.type_name.as_str()))
        {
            return Some(ty.clone());
        }
        if self.bundle_container().is_none() {
            let by_ext = self
                .extension()
                .and_then(|ext| catalog.by_suffix(ext, self.directory()));
            let by_dir = || {
                self.directory()
                    .and_then(|dir| catalog.by_directory(dir))
                    .filter(|t| t.suffix.is_none())
            };
            if let Some(ty) = by_ext.or_else(by_dir) {
                return Some(ty.clone());
            }
        }
        let bundle_type = self.bundle_container()?;
        if !(self.is_bundle() || self.is_bundle_item()) {
            return None;
        }
        Some(catalog.find(bundle_type).cloned().unwrap_or_else(|| MetadataType {
            xml_name: TypeName::from(bundle_type),
            directory_name: self.src_segments()[0].to_string(),
            suffix: None,
            in_folder: false,
            meta_file: false,
            child_xml_names: Vec::new(),
        }))
    }

    fn type_name_or_empty(&self) -> TypeName {
        self.metadata_type
            .as_ref()
            .map(|t| t.xml_name.clone())
            .unwrap_or_else(|| TypeName::from(""))
    }

    /// The resolved type, if [`Component::resolve_type`] has succeeded.
    pub fn metadata_type(&self) -> Option<&MetadataType> {
        self.metadata_type.as_ref()
    }

    pub fn type_name(&self) -> Option<&TypeName> {
        self.metadata_type.as_ref().map(|t| &t.xml_name)
    }

    /// `(type, fullName)` for manifest subscription; `None` until resolved.
    pub fn manifest_entry(&self) -> Option<(TypeName, String)> {
        self.type_name().map(|ty| (ty.clone(), self.full_name()))
    }

    /// The local store entry for this path.
    pub fn local_properties<'s>(&self, store: &'s LocalStore) -> Option<&'s LocalEntry> {
        store.get(&self.key)
    }

    /// The cached server index node for this component.
    pub fn server_properties<'i>(&self, index: &'i ServerIndex) -> Option<&'i IndexNode> {
        let ty = self.type_name()?;
        let full_name = self.full_name();
        index
            .iter()
            .find(|n| &n.type_name == ty && n.full_name.as_deref() == Some(full_name.as_str()))
    }

    /// Companion `-meta.xml` path, when the type requires one.
    pub fn meta_path(&self) -> Option<PathBuf> {
        let ty = self.metadata_type.as_ref()?;
        if !ty.meta_file || self.is_meta_file() {
            return None;
        }
        Some(PathBuf::from(format!("{}{META_SUFFIX}", self.path.display())))
    }

    /// Current body on disk.
    pub fn body(&self) -> Result<String, CoreError> {
        std::fs::read_to_string(&self.path).map_err(|e| io_err(&self.path, e))
    }
}
