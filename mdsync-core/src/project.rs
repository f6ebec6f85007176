//! A local project: one root directory and the state files beneath it.
//!
//! # Storage layout
//!
//! ```text
//! <root>/
//!   src/
//!     package.xml          (manifest)
//!     classes/ aura/ ...   (metadata source)
//!   config/
//!     .settings            (YAML settings)
//!     .local_store         (local state store)
//!     .org_metadata        (server index cache)
//!     .describe            (type catalog cache)
//! ```
//!
//! The project owns exactly one local store, server index, manifest, and
//! catalog. Operations borrow them through the public fields.

use std::path::{Path, PathBuf};

use crate::catalog::{self, TypeCatalog};
use crate::component::Component;
use crate::config::{self, ProjectSettings, SyncConfig};
use crate::error::{io_err, CoreError};
use crate::local_store::LocalStore;
use crate::manifest::{Manifest, PACKAGE_FILE};
use crate::server_index::ServerIndex;

#[derive(Debug, Clone)]
pub struct Project {
    root: PathBuf,
    pub settings: ProjectSettings,
    pub store: LocalStore,
    pub index: ServerIndex,
    pub manifest: Manifest,
    pub catalog: TypeCatalog,
}

impl Project {
    /// Open an existing project. Returns `CoreError::ProjectNotFound` if
    /// `<root>/src` does not exist.
    pub fn open(root: &Path) -> Result<Self, CoreError> {
        if !root.join("src").is_dir() {
            return Err(CoreError::ProjectNotFound {
                path: root.to_path_buf(),
            });
        }
        let settings = config::load_at(root)?;
        let manifest = Manifest::load_at(root, &settings.api_version)?;
        Ok(Self {
            root: root.to_path_buf(),
            store: LocalStore::load_at(root)?,
            index: ServerIndex::load_at(root)?,
            catalog: catalog::load_at(root)?,
            manifest,
            settings,
        })
    }

    /// Create the project skeleton at `root`.
    ///
    /// Idempotent: if the project already exists, opens and returns it unchanged.
    pub fn init(root: &Path, settings: ProjectSettings) -> Result<Self, CoreError> {
        let src = root.join("src");
        if src.is_dir() {
            return Self::open(root);
        }
        std::fs::create_dir_all(&src).map_err(|e| io_err(&src, e))?;
        config::save_at(root, &settings)?;
        let manifest = Manifest::load_at(root, &settings.api_version)?;
        manifest.save()?;
        tracing::info!("initialised project at {}", root.display());
        Self::open(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn src_dir(&self) -> PathBuf {
        self.root.join("src")
    }

    /// Immutable configuration for one operation.
    pub fn snapshot(&self) -> SyncConfig {
        self.settings.snapshot()
    }

    /// Wrap a path without resolving it.
    pub fn component(&self, path: &Path) -> Result<Component, CoreError> {
        Component::new(&self.root, path)
    }

    /// Wrap and resolve every path; newly synthesized store entries are
    /// saved once after the whole batch resolves.
    pub fn resolve<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<Vec<Component>, CoreError> {
        let before = self.store.len();
        let mut components = Vec::with_capacity(paths.len());
        for path in paths {
            let mut component = Component::new(&self.root, path.as_ref())?;
            component.resolve_type(&mut self.store, &self.catalog)?;
            components.push(component);
        }
        if self.store.len() != before {
            self.store.save()?;
        }
        Ok(components)
    }

    /// Replace the cached describe result.
    pub fn set_catalog(&mut self, catalog: TypeCatalog) -> Result<(), CoreError> {
        catalog::save_at(&self.root, &catalog)?;
        self.catalog = catalog;
        Ok(())
    }

    /// Every metadata file under `src/` (excluding the manifest), as store keys.
    ///
    /// Bundle directories are reported as files below them; results are sorted.
    pub fn source_files(&self) -> Result<Vec<String>, CoreError> {
        let mut out = Vec::new();
        collect_files(&self.src_dir(), &mut out)?;
        let mut keys = Vec::with_capacity(out.len());
        for path in out {
            let is_manifest = path.file_name().is_some_and(|n| n == PACKAGE_FILE)
                && path.parent() == Some(self.src_dir().as_path());
            if is_manifest {
                continue;
            }
            keys.push(crate::local_store::relative_key(&self.root, &path)?);
        }
        keys.sort();
        Ok(keys)
    }
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), CoreError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn open_without_src_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = Project::open(tmp.path()).unwrap_err();
        assert!(matches!(err, CoreError::ProjectNotFound { .. }));
    }

    #[test]
    fn init_creates_skeleton_and_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let settings = ProjectSettings {
            project_name: "acme".into(),
            ..ProjectSettings::default()
        };
        let project = Project::init(tmp.path(), settings.clone()).unwrap();
        assert!(tmp.path().join("src/package.xml").exists());
        assert_eq!(project.settings, settings);

        let again = Project::init(tmp.path(), ProjectSettings::default()).unwrap();
        assert_eq!(again.settings.project_name, "acme");
    }

    #[test]
    fn resolve_saves_synthesized_entries_once() {
        let tmp = TempDir::new().unwrap();
        let mut project = Project::init(tmp.path(), ProjectSettings::default()).unwrap();
        fs::create_dir_all(tmp.path().join("src/classes")).unwrap();
        fs::write(tmp.path().join("src/classes/Foo.cls"), "public class Foo {}").unwrap();

        let components = project.resolve(&["src/classes/Foo.cls"]).unwrap();
        assert_eq!(components[0].full_name(), "Foo");

        let reopened = Project::open(tmp.path()).unwrap();
        assert!(reopened.store.get("src/classes/Foo.cls").is_some());
    }

    #[test]
    fn source_files_skip_manifest() {
        let tmp = TempDir::new().unwrap();
        let project = Project::init(tmp.path(), ProjectSettings::default()).unwrap();
        fs::create_dir_all(tmp.path().join("src/aura/Widget")).unwrap();
        fs::write(tmp.path().join("src/aura/Widget/Widget.cmp"), "<aura:component/>").unwrap();
        assert_eq!(project.source_files().unwrap(), vec!["src/aura/Widget/Widget.cmp"]);
    }
}
