//! Manifest (`package.xml`): the `{type → members}` map that bounds every
//! retrieve, deploy, and refresh.
//!
//! Types keep the order they were first seen in, and members keep insertion
//! order, so serialising the same manifest twice produces identical bytes.
//! A `*` member subscribes to every member of the type; it is resolved by a
//! fresh `list` call at use-time and coexists with explicit members.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::error::{io_err, CoreError};
use crate::types::TypeName;
use crate::writer;

pub const WILDCARD: &str = "*";
pub const PACKAGE_FILE: &str = "package.xml";
pub const DESTRUCTIVE_FILE: &str = "destructiveChanges.xml";
const METADATA_NS: &str = "http://soap.sforce.com/2006/04/metadata";

/// `<root>/src/package.xml`
pub fn manifest_path_at(root: &Path) -> PathBuf {
    root.join("src").join(PACKAGE_FILE)
}

/// In-memory manifest, optionally bound to a file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    api_version: String,
    types: IndexMap<TypeName, Vec<String>>,
    path: Option<PathBuf>,
}

impl Manifest {
    /// An empty, unbound manifest.
    pub fn new(api_version: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            types: IndexMap::new(),
            path: None,
        }
    }

    /// Build an unbound manifest from an explicit type map.
    pub fn from_map(api_version: impl Into<String>, types: IndexMap<TypeName, Vec<String>>) -> Self {
        let mut manifest = Self::new(api_version);
        for (ty, members) in types {
            manifest.subscribe(members.into_iter().map(|m| (ty.clone(), m)));
        }
        manifest
    }

    /// Load the project manifest at `<root>/src/package.xml`.
    ///
    /// A missing file yields an empty manifest bound to that path.
    pub fn load_at(root: &Path, api_version: &str) -> Result<Self, CoreError> {
        Self::load(&manifest_path_at(root), api_version)
    }

    /// Load a manifest from `path`, binding it to that path.
    pub fn load(path: &Path, default_api_version: &str) -> Result<Self, CoreError> {
        let xml = match std::fs::read_to_string(path) {
            Ok(xml) => xml,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                let mut manifest = Self::new(default_api_version);
                manifest.path = Some(path.to_path_buf());
                return Ok(manifest);
            }
            Err(err) => return Err(io_err(path, err)),
        };
        let mut manifest = Self::parse(&xml, default_api_version).map_err(|source| {
            CoreError::Manifest {
                path: path.to_path_buf(),
                source,
            }
        })?;
        manifest.path = Some(path.to_path_buf());
        Ok(manifest)
    }

    /// Parse `package.xml` contents.
    pub fn parse(xml: &str, default_api_version: &str) -> Result<Self, roxmltree::Error> {
        let doc = roxmltree::Document::parse(xml)?;
        let mut manifest = Self::new(default_api_version);
        for node in doc.root_element().children().filter(|n| n.is_element()) {
            match node.tag_name().name() {
                "types" => {
                    let mut name = None;
                    let mut members = Vec::new();
                    for child in node.children().filter(|n| n.is_element()) {
                        let text = child.text().unwrap_or_default().trim().to_string();
                        match child.tag_name().name() {
                            "name" => name = Some(text),
                            "members" => members.push(text),
                            other => tracing::warn!("ignoring <{other}> inside <types>"),
                        }
                    }
                    match name {
                        Some(name) if !name.is_empty() => {
                            let ty = TypeName::from(name);
                            manifest.subscribe(members.into_iter().map(|m| (ty.clone(), m)));
                        }
                        _ => tracing::warn!("ignoring <types> block without <name>"),
                    }
                }
                "version" => {
                    if let Some(v) = node.text() {
                        manifest.api_version = v.trim().to_string();
                    }
                }
                other => tracing::warn!("ignoring <{other}> in manifest"),
            }
        }
        Ok(manifest)
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn types(&self) -> impl Iterator<Item = (&TypeName, &[String])> {
        self.types.iter().map(|(k, v)| (k, v.as_slice()))
    }

    pub fn members(&self, ty: &str) -> Option<&[String]> {
        self.types.get(ty).map(Vec::as_slice)
    }

    pub fn is_wildcard(&self, ty: &str) -> bool {
        self.types
            .get(ty)
            .is_some_and(|m| m.iter().any(|m| m == WILDCARD))
    }

    /// Does the subscription cover `member` of `ty`, explicitly or by wildcard?
    pub fn covers(&self, ty: &str, member: &str) -> bool {
        self.types
            .get(ty)
            .is_some_and(|m| m.iter().any(|m| m == WILDCARD || m == member))
    }

    /// Clone of the type map, in manifest order.
    pub fn to_map(&self) -> IndexMap<TypeName, Vec<String>> {
        self.types.clone()
    }

    /// Add members under their types. Returns whether anything changed.
    ///
    /// Explicit members are kept even when the type is wildcarded.
    pub fn subscribe<I>(&mut self, members: I) -> bool
    where
        I: IntoIterator<Item = (TypeName, String)>,
    {
        let mut changed = false;
        for (ty, member) in members {
            let list = self.types.entry(ty).or_default();
            if !list.contains(&member) {
                list.push(member);
                changed = true;
            }
        }
        changed
    }

    /// Remove members; a type left with no members is dropped entirely.
    pub fn unsubscribe<I>(&mut self, members: I) -> bool
    where
        I: IntoIterator<Item = (TypeName, String)>,
    {
        let mut changed = false;
        for (ty, member) in members {
            let Some(list) = self.types.get_mut(&ty) else {
                continue;
            };
            let before = list.len();
            list.retain(|m| m != &member);
            changed |= list.len() != before;
            if list.is_empty() {
                self.types.shift_remove(&ty);
            }
        }
        changed
    }

    /// Deterministic `package.xml` rendering.
    pub fn to_xml(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        out.push_str(&format!("<Package xmlns=\"{METADATA_NS}\">\n"));
        for (ty, members) in &self.types {
            out.push_str("    <types>\n");
            for member in members {
                out.push_str(&format!("        <members>{}</members>\n", escape(member)));
            }
            out.push_str(&format!("        <name>{}</name>\n", escape(ty.as_str())));
            out.push_str("    </types>\n");
        }
        out.push_str(&format!("    <version>{}</version>\n", escape(&self.api_version)));
        out.push_str("</Package>\n");
        out
    }

    /// Write the manifest to `path` atomically.
    pub fn write_to_disk(&self, path: &Path) -> Result<(), CoreError> {
        writer::atomic_write(path, &self.to_xml())
    }

    /// Persist to the bound path.
    pub fn save(&self) -> Result<(), CoreError> {
        let path = self.path.as_deref().ok_or(CoreError::UnboundManifest)?;
        self.write_to_disk(path)?;
        tracing::info!("saved manifest ({} types) to {}", self.types.len(), path.display());
        Ok(())
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn m(ty: &str, member: &str) -> (TypeName, String) {
        (TypeName::from(ty), member.to_string())
    }

    #[test]
    fn subscribe_then_unsubscribe_leaves_empty_manifest() {
        let mut manifest = Manifest::new("60.0");
        manifest.subscribe([m("ApexClass", "Foo"), m("Report", "Sales/Pipeline")]);
        manifest.unsubscribe([m("ApexClass", "Foo"), m("Report", "Sales/Pipeline")]);
        assert!(manifest.is_empty());
        assert!(!manifest.to_xml().contains("<types>"));
    }

    #[test]
    fn explicit_members_survive_wildcard() {
        let mut manifest = Manifest::new("60.0");
        manifest.subscribe([m("ApexClass", "Foo")]);
        manifest.subscribe([m("ApexClass", WILDCARD)]);
        assert!(manifest.is_wildcard("ApexClass"));
        assert_eq!(manifest.members("ApexClass").unwrap(), ["Foo", "*"]);
        assert!(manifest.covers("ApexClass", "Anything"));

        manifest.unsubscribe([m("ApexClass", "Foo")]);
        assert_eq!(manifest.members("ApexClass").unwrap(), ["*"]);
    }

    #[test]
    fn types_serialise_in_first_seen_order() {
        let mut manifest = Manifest::new("60.0");
        manifest.subscribe([m("Report", "A/B"), m("ApexClass", "Foo"), m("Report", "A/C")]);
        let xml = manifest.to_xml();
        let report = xml.find("<name>Report</name>").unwrap();
        let apex = xml.find("<name>ApexClass</name>").unwrap();
        assert!(report < apex);
        assert_eq!(manifest.to_xml(), xml);
    }

    #[test]
    fn parse_roundtrip() {
        let mut manifest = Manifest::new("59.0");
        manifest.subscribe([m("ApexClass", "*"), m("CustomObject", "Account"), m("Report", "R&D/Q1")]);
        let parsed = Manifest::parse(&manifest.to_xml(), "60.0").unwrap();
        assert_eq!(parsed.api_version(), "59.0");
        assert_eq!(parsed.to_map(), manifest.to_map());
    }

    #[test]
    fn load_missing_is_empty_and_bound() {
        let tmp = TempDir::new().unwrap();
        let manifest = Manifest::load_at(tmp.path(), "60.0").unwrap();
        assert!(manifest.is_empty());
        assert_eq!(manifest.path(), Some(manifest_path_at(tmp.path()).as_path()));
    }

    #[test]
    fn save_unbound_fails() {
        let manifest = Manifest::new("60.0");
        assert!(matches!(manifest.save(), Err(CoreError::UnboundManifest)));
    }

    #[test]
    fn load_malformed_reports_path() {
        let tmp = TempDir::new().unwrap();
        let path = manifest_path_at(tmp.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "<Package><types>").unwrap();
        let err = Manifest::load_at(tmp.path(), "60.0").unwrap_err();
        assert!(matches!(err, CoreError::Manifest { .. }), "got: {err}");
    }
}
