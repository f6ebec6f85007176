//! Type dispatcher: split an operation's components into protocol buckets.
//!
//! - `single`: tooling source files, compiled through a metadata container
//! - `bundled`: everything else, deployed as a zip
//! - `bundle_items`: bundle directories and files inside them, deployed as a
//!   separate zip so one broken bundle does not hold up unrelated metadata
//!
//! Routing is decided by the resolved type alone; the protocols never look
//! at paths to guess where a component belongs.

use mdsync_core::Component;

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Single,
    Bundled,
    BundleItem,
}

/// Which bucket `component` belongs in. It must already be resolved.
pub fn kind_of(component: &Component) -> Result<ComponentKind, SyncError> {
    let ty = component
        .metadata_type()
        .ok_or_else(|| SyncError::UnresolvedType {
            path: component.path().to_path_buf(),
        })?;
    let kind = if ty.is_bundle() || component.is_bundle() || component.is_bundle_item() {
        ComponentKind::BundleItem
    } else if ty.is_tooling() && !component.is_meta_file() {
        ComponentKind::Single
    } else {
        ComponentKind::Bundled
    };
    Ok(kind)
}

#[derive(Debug, Clone, Default)]
pub struct Buckets {
    pub single: Vec<Component>,
    pub bundled: Vec<Component>,
    pub bundle_items: Vec<Component>,
}

impl Buckets {
    pub fn is_empty(&self) -> bool {
        self.single.is_empty() && self.bundled.is_empty() && self.bundle_items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.single.len() + self.bundled.len() + self.bundle_items.len()
    }
}

/// Partition `components` into buckets; every component lands in exactly one.
pub fn classify(components: Vec<Component>) -> Result<Buckets, SyncError> {
    let mut buckets = Buckets::default();
    for component in components {
        match kind_of(&component)? {
            ComponentKind::Single => buckets.single.push(component),
            ComponentKind::Bundled => buckets.bundled.push(component),
            ComponentKind::BundleItem => buckets.bundle_items.push(component),
        }
    }
    tracing::debug!(
        "dispatch: {} single, {} bundled, {} bundle items",
        buckets.single.len(),
        buckets.bundled.len(),
        buckets.bundle_items.len()
    );
    Ok(buckets)
}
