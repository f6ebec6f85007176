//! The remote metadata service seam.
//!
//! Every network interaction in the pipeline goes through [`MetadataClient`].
//! Implementations own transport, authentication, and wire encoding; the
//! pipeline only sees the typed results below. Calls may be issued
//! concurrently, so implementations must be `Send + Sync`.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use mdsync_core::{DeployOptions, FileProperties, ToolingRecord, TypeCatalog, TypeName};

use crate::error::RemoteError;

pub type RemoteResult<T> = Result<T, RemoteError>;

// ---------------------------------------------------------------------------
// Deploy results
// ---------------------------------------------------------------------------

/// Lifecycle of a bulk deploy request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DeployStatus {
    #[default]
    Pending,
    InProgress,
    Succeeded,
    SucceededPartial,
    Failed,
    Canceling,
    Canceled,
}

/// One component line in a deploy (or compile) result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct DeployMessage {
    pub full_name: String,
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_type: Option<TypeName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub success: bool,
    pub changed: bool,
    pub created: bool,
    pub deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_number: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct DeployDetails {
    pub component_successes: Vec<DeployMessage>,
    pub component_failures: Vec<DeployMessage>,
}

/// Canonical deploy result shape, also used as the aggregate envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct DeployResult {
    pub id: String,
    pub done: bool,
    pub status: DeployStatus,
    pub success: bool,
    pub number_components_deployed: u32,
    pub number_component_errors: u32,
    pub number_components_total: u32,
    pub details: DeployDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

// ---------------------------------------------------------------------------
// Container (single-file) results
// ---------------------------------------------------------------------------

/// State of a container async compile request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AsyncState {
    Queued,
    Completed,
    Failed,
    Error,
    Aborted,
    Invalidated,
}

impl AsyncState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, AsyncState::Queued)
    }
}

impl fmt::Display for AsyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AsyncState::Queued => "Queued",
            AsyncState::Completed => "Completed",
            AsyncState::Failed => "Failed",
            AsyncState::Error => "Error",
            AsyncState::Aborted => "Aborted",
            AsyncState::Invalidated => "Invalidated",
        };
        f.write_str(s)
    }
}

/// Status of a container async request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AsyncRequestStatus {
    pub id: String,
    pub state: AsyncState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    #[serde(default)]
    pub deploy_details: DeployDetails,
}

/// A container member: one source body bound to its remote entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MemberRequest {
    /// Member sobject, e.g. `ApexClassMember`.
    #[serde(skip)]
    pub member_type: String,
    #[serde(rename = "MetadataContainerId")]
    pub container_id: String,
    pub content_entity_id: String,
    pub body: String,
}

impl MemberRequest {
    pub fn member_type_for(type_name: &TypeName) -> String {
        format!("{type_name}Member")
    }
}

/// Per-member outcome of a container compile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolingMemberResult {
    #[serde(rename = "State")]
    pub state: AsyncState,
    pub file_name: String,
    pub full_name: String,
    #[serde(rename = "type")]
    pub type_name: TypeName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_number: Option<u32>,
}

// ---------------------------------------------------------------------------
// Retrieve and conflict inputs
// ---------------------------------------------------------------------------

/// Result of an unpackaged retrieve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrieveResult {
    pub file_properties: Vec<FileProperties>,
    pub messages: Vec<String>,
}

/// The server's current copy of one file, fetched for conflict detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCopy {
    pub last_modified_date: DateTime<Utc>,
    pub last_modified_by_name: Option<String>,
    /// File body; `None` when the server cannot provide one.
    pub body: Option<String>,
}

// ---------------------------------------------------------------------------
// Client trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait MetadataClient: Send + Sync {
    /// Every metadata type the org supports.
    async fn describe(&self) -> RemoteResult<TypeCatalog>;

    /// File properties of every member of `type_name`.
    async fn list(&self, type_name: &TypeName) -> RemoteResult<Vec<FileProperties>>;

    /// File properties of the members of `type_name` inside `folder`.
    async fn list_folder(&self, type_name: &TypeName, folder: &str) -> RemoteResult<Vec<FileProperties>>;

    /// Retrieve the members in `types`; with `write_to_disk` the files are
    /// unpacked under `destination`.
    async fn retrieve_unpackaged(
        &self,
        types: &IndexMap<TypeName, Vec<String>>,
        write_to_disk: bool,
        destination: &Path,
    ) -> RemoteResult<RetrieveResult>;

    /// Submit a zip archive; returns the deploy id.
    async fn deploy(&self, archive: Vec<u8>, options: &DeployOptions) -> RemoteResult<String>;

    async fn check_deploy_status(&self, deploy_id: &str) -> RemoteResult<DeployResult>;

    /// Create a metadata container; returns its id.
    async fn create_container(&self, name: &str) -> RemoteResult<String>;

    /// Create a container member; returns its id.
    async fn create_member(&self, member: &MemberRequest) -> RemoteResult<String>;

    /// Submit a compile request for the container; returns the request id.
    async fn create_async_request(&self, container_id: &str, check_only: bool) -> RemoteResult<String>;

    async fn get_async_request_status(&self, request_id: &str) -> RemoteResult<AsyncRequestStatus>;

    async fn delete_container(&self, container_id: &str) -> RemoteResult<()>;

    /// Tooling rows for `names` of `type_name`.
    async fn query_records(&self, type_name: &TypeName, names: &[String]) -> RemoteResult<Vec<ToolingRecord>>;

    /// The server's current copy of `file_name` belonging to `full_name`.
    async fn fetch_server_copy(
        &self,
        type_name: &TypeName,
        full_name: &str,
        file_name: &str,
    ) -> RemoteResult<ServerCopy>;
}
