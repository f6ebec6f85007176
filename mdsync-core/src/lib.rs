//! mdsync core library: project state for metadata synchronization.
//!
//! Public API surface:
//! - [`types`]: newtypes, local entries, server record shapes
//! - [`error`]: [`CoreError`]
//! - [`config`]: project settings and the [`SyncConfig`] snapshot
//! - [`catalog`]: the cached describe result
//! - [`local_store`]: durable path → server properties map
//! - [`manifest`]: `package.xml` subscription
//! - [`server_index`]: advisory tree of org contents
//! - [`component`]: path → remote type resolution
//! - [`project`]: owner of all of the above

pub mod catalog;
pub mod component;
pub mod config;
pub mod error;
pub mod local_store;
pub mod manifest;
pub mod project;
pub mod server_index;
pub mod types;
pub mod writer;

pub use catalog::{MetadataType, TypeCatalog};
pub use component::Component;
pub use config::{DeployOptions, ProjectSettings, SyncConfig};
pub use error::CoreError;
pub use local_store::LocalStore;
pub use manifest::Manifest;
pub use project::Project;
pub use server_index::{IndexNode, ServerIndex};
pub use types::{
    FileProperties, LocalEntry, RecordAttributes, ServerRecords, SyncState, ToolingRecord,
    TypeName,
};
