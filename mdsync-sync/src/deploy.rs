//! Bulk deploy: stage components with a generated manifest, zip, submit,
//! and poll until the server reports the deploy done.
//!
//! Staging layout inside a temporary directory:
//!
//! ```text
//! unpackaged/
//!   package.xml
//!   destructiveChanges.xml      (delete only)
//!   classes/Foo.cls
//!   classes/Foo.cls-meta.xml
//!   aura/Widget/...             (whole bundle directory)
//! ```
//!
//! The temporary directory is removed when the [`StagedPackage`] drops.

use std::collections::BTreeSet;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use tokio::time::{sleep, Instant};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use mdsync_core::local_store::relative_key;
use mdsync_core::manifest::{DESTRUCTIVE_FILE, PACKAGE_FILE};
use mdsync_core::{Component, DeployOptions, Manifest, SyncConfig, TypeName};

use crate::client::{DeployResult, MetadataClient};
use crate::error::{io_err, SyncError};

const PACKAGE_ROOT: &str = "unpackaged";
const META_SUFFIX: &str = "-meta.xml";

/// A staged deploy package on disk.
pub struct StagedPackage {
    dir: TempDir,
    files: Vec<String>,
}

impl StagedPackage {
    fn new() -> Result<Self, SyncError> {
        let dir = tempfile::Builder::new()
            .prefix("mdsync-deploy-")
            .tempdir()
            .map_err(|e| io_err(std::env::temp_dir(), e))?;
        Ok(Self {
            dir,
            files: Vec::new(),
        })
    }

    /// `<tmp>/unpackaged`
    pub fn package_root(&self) -> PathBuf {
        self.dir.path().join(PACKAGE_ROOT)
    }

    /// Archive entry names, in the order they are zipped.
    pub fn files(&self) -> &[String] {
        &self.files
    }

    fn write(&mut self, name: &str, contents: &str) -> Result<(), SyncError> {
        let path = self.package_root().join(name);
        write_file(&path, contents.as_bytes())?;
        self.files.push(format!("{PACKAGE_ROOT}/{name}"));
        Ok(())
    }

    fn copy(&mut self, source: &Path, relative: &str) -> Result<(), SyncError> {
        let dest = self.package_root().join(relative);
        let bytes = std::fs::read(source).map_err(|e| io_err(source, e))?;
        write_file(&dest, &bytes)?;
        self.files.push(format!("{PACKAGE_ROOT}/{relative}"));
        Ok(())
    }

    /// Zip the staged tree.
    pub fn archive(&self) -> Result<Vec<u8>, SyncError> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut names = self.files.clone();
        names.sort();
        names.dedup();
        for name in &names {
            let path = self.dir.path().join(name);
            let bytes = std::fs::read(&path).map_err(|e| io_err(&path, e))?;
            zip.start_file(name.as_str(), options)?;
            zip.write_all(&bytes).map_err(|e| io_err(&path, e))?;
        }
        let cursor = zip.finish()?;
        Ok(cursor.into_inner())
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), SyncError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    std::fs::write(path, bytes).map_err(|e| io_err(path, e))
}

/// Stage `components` and a manifest covering exactly them.
pub fn stage(components: &[Component], api_version: &str) -> Result<StagedPackage, SyncError> {
    stage_without(components, api_version, &BTreeSet::new())
}

/// Like [`stage`], but files whose store key is in `excluded` are left out.
pub fn stage_without(
    components: &[Component],
    api_version: &str,
    excluded: &BTreeSet<String>,
) -> Result<StagedPackage, SyncError> {
    let mut package = StagedPackage::new()?;
    let mut manifest = Manifest::new(api_version);
    manifest.subscribe(components.iter().filter_map(Component::manifest_entry));
    manifest.subscribe(components.iter().filter_map(folder_entry));
    package.write(PACKAGE_FILE, &manifest.to_xml())?;

    let mut seen = BTreeSet::new();
    for component in components {
        for key in source_keys(component) {
            if !seen.insert(key.clone()) {
                continue;
            }
            let source = component.root().join(&key);
            let relative = key.strip_prefix("src/").unwrap_or(&key).to_string();
            if source.is_dir() {
                for file in walk(&source)? {
                    let file_key = relative_key(component.root(), &file)?;
                    if excluded.contains(&file_key) {
                        continue;
                    }
                    let rel = file_key.strip_prefix("src/").unwrap_or(&file_key);
                    package.copy(&file, rel)?;
                }
            } else if !excluded.contains(&key) {
                package.copy(&source, &relative)?;
            }
        }
    }
    tracing::debug!("staged {} files at {}", package.files.len(), package.package_root().display());
    Ok(package)
}

/// Stage a delete: an empty `package.xml` plus `destructiveChanges.xml`.
pub fn stage_destructive(components: &[Component], api_version: &str) -> Result<StagedPackage, SyncError> {
    let mut package = StagedPackage::new()?;
    package.write(PACKAGE_FILE, &Manifest::new(api_version).to_xml())?;
    let mut destructive = Manifest::new(api_version);
    destructive.subscribe(components.iter().filter_map(Component::manifest_entry));
    package.write(DESTRUCTIVE_FILE, &destructive.to_xml())?;
    Ok(package)
}

/// The enclosing folder of an in-folder component, when its `-meta.xml`
/// travels with the package. Folders are members of the type they hold.
fn folder_entry(component: &Component) -> Option<(TypeName, String)> {
    let ty = component.metadata_type().filter(|t| t.in_folder)?;
    let full_name = component.full_name();
    let (folder, _) = full_name.rsplit_once('/')?;
    let (dir, _) = component.key().rsplit_once('/')?;
    if !component.root().join(format!("{dir}{META_SUFFIX}")).is_file() {
        return None;
    }
    Some((ty.xml_name.clone(), folder.to_string()))
}

/// Store keys to copy for one component: bundles travel whole, sources
/// travel with their `-meta.xml` companion, in-folder files with their
/// folder's metadata.
fn source_keys(component: &Component) -> Vec<String> {
    let key = component.key();
    if component.is_bundle() {
        return vec![key.to_string()];
    }
    if component.is_bundle_item() {
        let segments: Vec<&str> = key.splitn(4, '/').collect();
        return vec![segments[..3].join("/")];
    }
    let mut keys = Vec::new();
    if let Some(source) = key.strip_suffix(META_SUFFIX) {
        keys.push(source.to_string());
        keys.push(key.to_string());
    } else {
        keys.push(key.to_string());
        let meta = format!("{key}{META_SUFFIX}");
        if component.root().join(&meta).is_file() {
            keys.push(meta);
        }
    }
    let in_folder = component.metadata_type().is_some_and(|t| t.in_folder);
    if in_folder {
        if let Some((folder, _)) = key.rsplit_once('/') {
            let folder_meta = format!("{folder}{META_SUFFIX}");
            if component.root().join(&folder_meta).is_file() {
                keys.push(folder_meta);
            }
        }
    }
    keys.retain(|k| component.root().join(k).exists());
    keys
}

fn walk(dir: &Path) -> Result<Vec<PathBuf>, SyncError> {
    let mut out = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            out.extend(walk(&path)?);
        } else {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

/// Submits archives and polls them to completion.
pub struct BulkDeploy<'a, C: ?Sized> {
    client: &'a C,
    api_version: String,
    poll_interval: Duration,
    timeout: Duration,
}

impl<'a, C> BulkDeploy<'a, C>
where
    C: MetadataClient + ?Sized,
{
    pub fn new(client: &'a C, config: &SyncConfig) -> Self {
        Self {
            client,
            api_version: config.api_version.clone(),
            poll_interval: config.deploy_poll_interval,
            timeout: config.timeout,
        }
    }

    /// Deploy `components` as they are on disk.
    pub async fn deploy(&self, components: &[Component], options: &DeployOptions) -> Result<DeployResult, SyncError> {
        let archive = stage(components, &self.api_version)?.archive()?;
        self.submit(archive, options).await
    }

    /// Deploy `components`, leaving out the files keyed in `excluded`.
    pub async fn deploy_without(
        &self,
        components: &[Component],
        excluded: &BTreeSet<String>,
        options: &DeployOptions,
    ) -> Result<DeployResult, SyncError> {
        let archive = stage_without(components, &self.api_version, excluded)?.archive()?;
        self.submit(archive, options).await
    }

    /// Delete `components` from the server.
    pub async fn destroy(&self, components: &[Component], options: &DeployOptions) -> Result<DeployResult, SyncError> {
        let archive = stage_destructive(components, &self.api_version)?.archive()?;
        self.submit(archive, options).await
    }

    /// Submit a ready archive and wait for the result.
    pub async fn submit(&self, archive: Vec<u8>, options: &DeployOptions) -> Result<DeployResult, SyncError> {
        let size = archive.len();
        let deploy_id = self.client.deploy(archive, options).await?;
        tracing::info!("submitted deploy {deploy_id} ({size} bytes)");
        let started = Instant::now();
        loop {
            sleep(self.poll_interval).await;
            let elapsed = started.elapsed();
            if elapsed >= self.timeout {
                return Err(SyncError::ProtocolTimeout {
                    operation: "deploy",
                    elapsed,
                });
            }
            let result = self.client.check_deploy_status(&deploy_id).await?;
            if result.done {
                tracing::info!(
                    "deploy {deploy_id} done: {:?}, {} deployed, {} errors",
                    result.status,
                    result.number_components_deployed,
                    result.number_component_errors
                );
                return Ok(result);
            }
            tracing::debug!("deploy {deploy_id} {:?} after {elapsed:?}", result.status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdsync_core::{LocalStore, TypeCatalog};
    use std::fs;
    use std::io::Read;

    fn project() -> (TempDir, Vec<Component>) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        for (path, body) in [
            ("src/classes/Foo.cls", "public class Foo {}"),
            ("src/classes/Foo.cls-meta.xml", "<ApexClass/>"),
            ("src/aura/Widget/Widget.cmp", "<aura:component/>"),
            ("src/aura/Widget/WidgetController.js", "({})"),
            ("src/reports/Sales-meta.xml", "<ReportFolder/>"),
            ("src/reports/Sales/Pipeline.report", "<Report/>"),
        ] {
            fs::create_dir_all(root.join(path).parent().unwrap()).unwrap();
            fs::write(root.join(path), body).unwrap();
        }
        let mut store = LocalStore::empty(root);
        let catalog = TypeCatalog::standard();
        let components = [
            "src/classes/Foo.cls",
            "src/aura/Widget/Widget.cmp",
            "src/aura/Widget/WidgetController.js",
            "src/reports/Sales/Pipeline.report",
        ]
        .iter()
        .map(|k| {
            let mut c = Component::new(root, Path::new(k)).unwrap();
            c.resolve_type(&mut store, &catalog).unwrap();
            c
        })
        .collect();
        (tmp, components)
    }

    #[test]
    fn stage_copies_companions_and_whole_bundles() {
        let (_tmp, components) = project();
        let staged = stage(&components, "60.0").unwrap();
        let mut files = staged.files().to_vec();
        files.sort();
        assert_eq!(
            files,
            vec![
                "unpackaged/aura/Widget/Widget.cmp",
                "unpackaged/aura/Widget/WidgetController.js",
                "unpackaged/classes/Foo.cls",
                "unpackaged/classes/Foo.cls-meta.xml",
                "unpackaged/package.xml",
                "unpackaged/reports/Sales-meta.xml",
                "unpackaged/reports/Sales/Pipeline.report",
            ]
        );
        let manifest = fs::read_to_string(staged.package_root().join("package.xml")).unwrap();
        assert!(manifest.contains("<members>Widget</members>"));
        assert_eq!(manifest.matches("<members>Widget</members>").count(), 1);
        assert!(manifest.contains("<members>Sales/Pipeline</members>"));
    }

    #[test]
    fn staged_manifest_lists_the_report_folder() {
        let (_tmp, components) = project();
        let staged = stage(&components[3..], "60.0").unwrap();
        let xml = fs::read_to_string(staged.package_root().join(PACKAGE_FILE)).unwrap();
        let manifest = Manifest::parse(&xml, "60.0").unwrap();
        assert_eq!(manifest.members("Report").unwrap(), ["Sales/Pipeline", "Sales"]);
        assert!(staged.files().iter().any(|f| f == "unpackaged/reports/Sales-meta.xml"));
    }

    #[test]
    fn folder_without_metadata_is_not_listed() {
        let (tmp, components) = project();
        fs::remove_file(tmp.path().join("src/reports/Sales-meta.xml")).unwrap();
        let staged = stage(&components[3..], "60.0").unwrap();
        let xml = fs::read_to_string(staged.package_root().join(PACKAGE_FILE)).unwrap();
        let manifest = Manifest::parse(&xml, "60.0").unwrap();
        assert_eq!(manifest.members("Report").unwrap(), ["Sales/Pipeline"]);
    }

    #[test]
    fn archive_contains_every_staged_file() {
        let (_tmp, components) = project();
        let staged = stage(&components[..1], "60.0").unwrap();
        let bytes = staged.archive().unwrap();
        let mut zip = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(zip.len(), 3);
        let mut body = String::new();
        zip.by_name("unpackaged/classes/Foo.cls")
            .unwrap()
            .read_to_string(&mut body)
            .unwrap();
        assert_eq!(body, "public class Foo {}");
    }

    #[test]
    fn destructive_stage_lists_members_without_sources() {
        let (_tmp, components) = project();
        let staged = stage_destructive(&components[..1], "60.0").unwrap();
        assert_eq!(
            staged.files(),
            ["unpackaged/package.xml", "unpackaged/destructiveChanges.xml"]
        );
        let destructive =
            fs::read_to_string(staged.package_root().join(DESTRUCTIVE_FILE)).unwrap();
        assert!(destructive.contains("<members>Foo</members>"));
        let package = fs::read_to_string(staged.package_root().join(PACKAGE_FILE)).unwrap();
        assert!(!package.contains("<types>"));
    }

    #[test]
    fn excluded_bundle_files_are_left_out() {
        let (_tmp, components) = project();
        let excluded = BTreeSet::from(["src/aura/Widget/WidgetController.js".to_string()]);
        let staged = stage_without(&components[1..2], "60.0", &excluded).unwrap();
        assert!(staged.files().iter().any(|f| f == "unpackaged/aura/Widget/Widget.cmp"));
        assert!(!staged.files().iter().any(|f| f.ends_with("WidgetController.js")));
    }

    #[test]
    fn staging_dir_is_removed_on_drop() {
        let (_tmp, components) = project();
        let staged = stage(&components, "60.0").unwrap();
        let root = staged.package_root();
        assert!(root.exists());
        drop(staged);
        assert!(!root.exists());
    }
}
