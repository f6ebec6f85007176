//! Server state index: an advisory cache of what the remote org exposes.
//!
//! The tree has up to four levels per subscribed type:
//!
//! ```text
//! 1  type                      ApexClass          Report           CustomObject
//! 2  member | folder           ApexClass/Foo      Report/Sales     CustomObject/Account
//! 3  item | child type                            Report/Sales/... CustomObject/Account/CustomField
//! 4  child member                                                  .../CustomField/Account.Name
//! ```
//!
//! Node ids are the `/`-joined path of labels from the type down, so every
//! `{type, fullName}` reachable through the subscription has one unique id.
//! The index is persisted at `<root>/config/.org_metadata` and is never
//! authoritative: a missing or unreadable cache is treated as empty.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{io_err, CoreError};
use crate::manifest::WILDCARD;
use crate::types::TypeName;
use crate::writer;

/// One node of the index tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexNode {
    pub id: String,
    pub text: String,
    #[serde(rename = "type")]
    pub type_name: TypeName,
    pub level: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    #[serde(default)]
    pub is_folder: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<IndexNode>,
}

impl IndexNode {
    /// Level-1 node for a subscribed type.
    pub fn type_node(ty: &TypeName) -> Self {
        Self {
            id: ty.to_string(),
            text: ty.to_string(),
            type_name: ty.clone(),
            level: 1,
            full_name: None,
            remote_id: None,
            is_folder: false,
            children: Vec::new(),
        }
    }

    /// Child node under `self`; `text` becomes the last id segment.
    pub fn child(
        &self,
        text: &str,
        type_name: &TypeName,
        full_name: Option<&str>,
        remote_id: Option<&str>,
    ) -> Self {
        Self {
            id: format!("{}/{text}", self.id),
            text: text.to_string(),
            type_name: type_name.clone(),
            level: self.level + 1,
            full_name: full_name.map(str::to_string),
            remote_id: remote_id.map(str::to_string),
            is_folder: false,
            children: Vec::new(),
        }
    }

    fn walk<'a>(&'a self, out: &mut Vec<&'a IndexNode>) {
        out.push(self);
        for child in &self.children {
            child.walk(out);
        }
    }
}

/// `<root>/config/.org_metadata`
pub fn index_path_at(root: &Path) -> PathBuf {
    root.join("config").join(".org_metadata")
}

/// The whole tree, one level-1 node per subscribed type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerIndex {
    nodes: Vec<IndexNode>,
}

impl ServerIndex {
    pub fn new(nodes: Vec<IndexNode>) -> Self {
        Self { nodes }
    }

    /// Load the cached tree; missing or unreadable caches load as empty.
    pub fn load_at(root: &Path) -> Result<Self, CoreError> {
        let path = index_path_at(root);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(io_err(&path, err)),
        };
        match serde_json::from_str(&contents) {
            Ok(nodes) => Ok(Self { nodes }),
            Err(err) => {
                tracing::warn!("server index at {} is unreadable ({err}); ignoring", path.display());
                Ok(Self::default())
            }
        }
    }

    pub fn save_at(&self, root: &Path) -> Result<(), CoreError> {
        let json = serde_json::to_string_pretty(&self.nodes)?;
        writer::atomic_write(&index_path_at(root), &json)?;
        tracing::info!("saved server index ({} types)", self.nodes.len());
        Ok(())
    }

    pub fn nodes(&self) -> &[IndexNode] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every node, depth-first.
    pub fn iter(&self) -> impl Iterator<Item = &IndexNode> {
        let mut out = Vec::new();
        for node in &self.nodes {
            node.walk(&mut out);
        }
        out.into_iter()
    }

    /// Find a node by its tree-path id.
    pub fn node(&self, id: &str) -> Option<&IndexNode> {
        self.iter().find(|n| n.id == id)
    }

    /// Does the org expose `full_name` of `ty`, as far as the cache knows?
    pub fn contains(&self, ty: &str, full_name: &str) -> bool {
        self.iter()
            .any(|n| n.type_name.as_str() == ty && n.full_name.as_deref() == Some(full_name))
    }

    /// Turn a multi-selection of node ids into a manifest type map.
    ///
    /// Selecting a type node subscribes the wildcard; selecting a folder or a
    /// child-type node selects everything beneath it. Unknown ids are skipped.
    pub fn select<'a, I>(&self, ids: I) -> IndexMap<TypeName, Vec<String>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut out: IndexMap<TypeName, Vec<String>> = IndexMap::new();
        let mut push = |ty: &TypeName, member: &str| {
            let list = out.entry(ty.clone()).or_default();
            if !list.iter().any(|m| m == member) {
                list.push(member.to_string());
            }
        };
        for id in ids {
            let Some(node) = self.node(id) else {
                tracing::debug!("selection id {id} not in index");
                continue;
            };
            if node.level == 1 {
                push(&node.type_name, WILDCARD);
                continue;
            }
            let mut stack = vec![node];
            while let Some(n) = stack.pop() {
                if let Some(full_name) = &n.full_name {
                    push(&n.type_name, full_name);
                }
                if n.is_folder || n.full_name.is_none() {
                    stack.extend(n.children.iter().rev());
                }
            }
        }
        out
    }
}
