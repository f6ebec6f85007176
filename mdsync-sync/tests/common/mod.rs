#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use indexmap::IndexMap;
use tempfile::TempDir;

use mdsync_core::{
    DeployOptions, FileProperties, Manifest, Project, ProjectSettings, RecordAttributes,
    ServerRecords, SyncConfig, ToolingRecord, TypeCatalog, TypeName,
};
use mdsync_sync::client::{
    AsyncRequestStatus, AsyncState, DeployDetails, DeployMessage, DeployResult, DeployStatus,
    MemberRequest, MetadataClient, RemoteResult, RetrieveResult, ServerCopy,
};
use mdsync_sync::RemoteError;

pub fn ts(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + chrono::Duration::minutes(minutes)
}

fn rejected<E: ToString>(err: E) -> RemoteError {
    RemoteError::Rejected {
        message: err.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Fake server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ServerEntry {
    pub id: String,
    pub type_name: String,
    pub full_name: String,
    pub file_name: String,
    pub body: Option<String>,
    pub last_modified: DateTime<Utc>,
}

impl ServerEntry {
    fn props(&self) -> FileProperties {
        FileProperties {
            id: self.id.clone(),
            full_name: self.full_name.clone(),
            file_name: self.file_name.clone(),
            type_name: TypeName::from(self.type_name.as_str()),
            last_modified_date: self.last_modified,
            last_modified_by_id: Some("005OTHER".into()),
            last_modified_by_name: Some("Other User".into()),
            created_date: None,
            created_by_id: None,
            namespace_prefix: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeployRecord {
    pub files: Vec<String>,
    pub package: IndexMap<TypeName, Vec<String>>,
    pub destructive: Option<IndexMap<TypeName, Vec<String>>>,
    pub options: DeployOptions,
}

#[derive(Debug)]
pub struct FakeState {
    pub catalog: TypeCatalog,
    pub entries: BTreeMap<(String, String), ServerEntry>,
    pub calls: Vec<&'static str>,
    clock: i64,
    next_id: u32,
    pub fail_container_create: bool,
    pub fail_member_ids: BTreeSet<String>,
    pub fail_delete_container: bool,
    pub stay_queued: bool,
    pub compile_failures: Vec<DeployMessage>,
    pub deploy_failures: BTreeSet<String>,
    pub fail_list_types: BTreeSet<String>,
    pub fail_fetch: BTreeSet<String>,
    pub containers: BTreeMap<String, Vec<MemberRequest>>,
    requests: BTreeMap<String, (String, bool)>,
    applied: BTreeSet<String>,
    results: BTreeMap<String, DeployResult>,
    pub deploys: Vec<DeployRecord>,
}

impl FakeState {
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += 1;
        ts(1_000 + self.clock)
    }

    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{:04}", self.next_id)
    }

    fn file_name_for(&self, ty: &str, full_name: &str) -> String {
        match self.catalog.find(ty) {
            Some(t) => match &t.suffix {
                Some(suffix) => format!("{}/{full_name}.{suffix}", t.directory_name),
                None => format!("{}/{full_name}", t.directory_name),
            },
            None => full_name.to_string(),
        }
    }
}

pub struct FakeClient {
    state: Mutex<FakeState>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                catalog: TypeCatalog::standard(),
                entries: BTreeMap::new(),
                calls: Vec::new(),
                clock: 0,
                next_id: 0,
                fail_container_create: false,
                fail_member_ids: BTreeSet::new(),
                fail_delete_container: false,
                stay_queued: false,
                compile_failures: Vec::new(),
                deploy_failures: BTreeSet::new(),
                fail_list_types: BTreeSet::new(),
                fail_fetch: BTreeSet::new(),
                containers: BTreeMap::new(),
                requests: BTreeMap::new(),
                applied: BTreeSet::new(),
                results: BTreeMap::new(),
                deploys: Vec::new(),
            }),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Number of calls made to `method`.
    pub fn count(&self, method: &str) -> usize {
        self.state().calls.iter().filter(|c| **c == method).count()
    }

    pub fn total_calls(&self) -> usize {
        self.state().calls.len()
    }

    /// Put an entity on the server; returns its id.
    pub fn put(&self, ty: &str, full_name: &str, file_name: &str, body: Option<&str>, modified: DateTime<Utc>) -> String {
        let mut st = self.state();
        let id = st.id("ID");
        st.entries.insert(
            (ty.to_string(), full_name.to_string()),
            ServerEntry {
                id: id.clone(),
                type_name: ty.to_string(),
                full_name: full_name.to_string(),
                file_name: file_name.to_string(),
                body: body.map(str::to_string),
                last_modified: modified,
            },
        );
        id
    }

    /// Someone else edits the entity on the server.
    pub fn touch(&self, ty: &str, full_name: &str, body: &str, modified: DateTime<Utc>) {
        let mut st = self.state();
        let entry = st
            .entries
            .get_mut(&(ty.to_string(), full_name.to_string()))
            .expect("entry exists");
        entry.body = Some(body.to_string());
        entry.last_modified = modified;
    }

    pub fn entry(&self, ty: &str, full_name: &str) -> Option<ServerEntry> {
        self.state()
            .entries
            .get(&(ty.to_string(), full_name.to_string()))
            .cloned()
    }
}

#[async_trait]
impl MetadataClient for FakeClient {
    async fn describe(&self) -> RemoteResult<TypeCatalog> {
        let mut st = self.state();
        st.calls.push("describe");
        Ok(st.catalog.clone())
    }

    async fn list(&self, type_name: &TypeName) -> RemoteResult<Vec<FileProperties>> {
        let mut st = self.state();
        st.calls.push("list");
        if st.fail_list_types.contains(type_name.as_str()) {
            return Err(RemoteError::Transport(format!("list {type_name} reset")));
        }
        Ok(st
            .entries
            .values()
            .filter(|e| e.type_name == type_name.as_str())
            .map(ServerEntry::props)
            .collect())
    }

    async fn list_folder(&self, type_name: &TypeName, folder: &str) -> RemoteResult<Vec<FileProperties>> {
        let mut st = self.state();
        st.calls.push("list_folder");
        let prefix = format!("{folder}/");
        Ok(st
            .entries
            .values()
            .filter(|e| e.type_name == type_name.as_str() && e.full_name.starts_with(&prefix))
            .map(ServerEntry::props)
            .collect())
    }

    async fn retrieve_unpackaged(
        &self,
        types: &IndexMap<TypeName, Vec<String>>,
        write_to_disk: bool,
        destination: &Path,
    ) -> RemoteResult<RetrieveResult> {
        let mut st = self.state();
        st.calls.push("retrieve_unpackaged");
        let mut result = RetrieveResult::default();
        for (ty, members) in types {
            for entry in st.entries.values().filter(|e| e.type_name == ty.as_str()) {
                if !members.iter().any(|m| m == "*" || m == &entry.full_name) {
                    continue;
                }
                if let (true, Some(body)) = (write_to_disk, &entry.body) {
                    let path = destination.join(&entry.file_name);
                    fs::create_dir_all(path.parent().unwrap()).map_err(rejected)?;
                    fs::write(&path, body).map_err(rejected)?;
                }
                result.file_properties.push(entry.props());
            }
        }
        Ok(result)
    }

    async fn deploy(&self, archive: Vec<u8>, options: &DeployOptions) -> RemoteResult<String> {
        let mut zip = zip::ZipArchive::new(Cursor::new(archive)).map_err(rejected)?;
        let mut files = BTreeMap::new();
        let mut package = IndexMap::new();
        let mut destructive = None;
        for i in 0..zip.len() {
            let mut file = zip.by_index(i).map_err(rejected)?;
            let name = file.name().to_string();
            let mut body = String::new();
            file.read_to_string(&mut body).map_err(rejected)?;
            if name == "unpackaged/package.xml" {
                package = Manifest::parse(&body, "60.0").map_err(rejected)?.to_map();
            } else if name == "unpackaged/destructiveChanges.xml" {
                destructive = Some(Manifest::parse(&body, "60.0").map_err(rejected)?.to_map());
            } else {
                files.insert(name.trim_start_matches("unpackaged/").to_string(), body);
            }
        }

        let mut st = self.state();
        st.calls.push("deploy");
        let id = st.id("0Af");
        let deleting = destructive.is_some();
        let targets = destructive.clone().unwrap_or_else(|| package.clone());

        let mut successes = Vec::new();
        let mut failures = Vec::new();
        for (ty, members) in &targets {
            for member in members {
                let file_name = st.file_name_for(ty.as_str(), member);
                let failed = st.deploy_failures.contains(member);
                let message = DeployMessage {
                    full_name: member.clone(),
                    file_name: file_name.clone(),
                    component_type: Some(ty.clone()),
                    success: !failed,
                    changed: !failed,
                    deleted: deleting && !failed,
                    problem: failed.then(|| format!("{member}: invalid definition")),
                    problem_type: failed.then(|| "Error".to_string()),
                    ..DeployMessage::default()
                };
                if failed {
                    failures.push(message);
                } else {
                    successes.push(message);
                }
            }
        }
        let success = failures.is_empty();
        if success || !options.rollback_on_error {
            for message in &successes {
                let ty = message.component_type.clone().unwrap_or_else(|| TypeName::from(""));
                let key = (ty.to_string(), message.full_name.clone());
                if deleting {
                    st.entries.remove(&key);
                    continue;
                }
                let modified = st.tick();
                let existing_id = st.entries.get(&key).map(|e| e.id.clone());
                let entry_id = match existing_id {
                    Some(id) => id,
                    None => st.id("ID"),
                };
                let body = files.get(&message.file_name).cloned();
                st.entries.insert(
                    key,
                    ServerEntry {
                        id: entry_id,
                        type_name: ty.to_string(),
                        full_name: message.full_name.clone(),
                        file_name: message.file_name.clone(),
                        body,
                        last_modified: modified,
                    },
                );
            }
        }
        let result = DeployResult {
            id: id.clone(),
            done: true,
            status: if success {
                DeployStatus::Succeeded
            } else {
                DeployStatus::Failed
            },
            success,
            number_components_deployed: if success || !options.rollback_on_error {
                successes.len() as u32
            } else {
                0
            },
            number_component_errors: failures.len() as u32,
            number_components_total: (successes.len() + failures.len()) as u32,
            details: DeployDetails {
                component_successes: successes,
                component_failures: failures,
            },
            error_message: None,
        };
        st.results.insert(id.clone(), result);
        st.deploys.push(DeployRecord {
            files: files.keys().cloned().collect(),
            package,
            destructive,
            options: options.clone(),
        });
        Ok(id)
    }

    async fn check_deploy_status(&self, deploy_id: &str) -> RemoteResult<DeployResult> {
        let mut st = self.state();
        st.calls.push("check_deploy_status");
        st.results
            .get(deploy_id)
            .cloned()
            .ok_or_else(|| rejected(format!("no deploy {deploy_id}")))
    }

    async fn create_container(&self, _name: &str) -> RemoteResult<String> {
        let mut st = self.state();
        st.calls.push("create_container");
        if st.fail_container_create {
            return Err(RemoteError::Transport("connection reset".into()));
        }
        let id = st.id("1dc");
        st.containers.insert(id.clone(), Vec::new());
        Ok(id)
    }

    async fn create_member(&self, member: &MemberRequest) -> RemoteResult<String> {
        let mut st = self.state();
        st.calls.push("create_member");
        if st.fail_member_ids.contains(&member.content_entity_id) {
            return Err(rejected(format!("entity {} is locked", member.content_entity_id)));
        }
        let id = st.id("400");
        st.containers
            .get_mut(&member.container_id)
            .ok_or_else(|| rejected("no such container"))?
            .push(member.clone());
        Ok(id)
    }

    async fn create_async_request(&self, container_id: &str, check_only: bool) -> RemoteResult<String> {
        let mut st = self.state();
        st.calls.push("create_async_request");
        let id = st.id("1dr");
        st.requests.insert(id.clone(), (container_id.to_string(), check_only));
        Ok(id)
    }

    async fn get_async_request_status(&self, request_id: &str) -> RemoteResult<AsyncRequestStatus> {
        let mut st = self.state();
        st.calls.push("get_async_request_status");
        if st.stay_queued {
            return Ok(AsyncRequestStatus {
                id: request_id.to_string(),
                state: AsyncState::Queued,
                error_msg: None,
                deploy_details: DeployDetails::default(),
            });
        }
        if !st.compile_failures.is_empty() {
            return Ok(AsyncRequestStatus {
                id: request_id.to_string(),
                state: AsyncState::Failed,
                error_msg: Some("compile failed".into()),
                deploy_details: DeployDetails {
                    component_successes: Vec::new(),
                    component_failures: st.compile_failures.clone(),
                },
            });
        }
        let (container_id, check_only) = st
            .requests
            .get(request_id)
            .cloned()
            .ok_or_else(|| rejected("no such request"))?;
        if !check_only && st.applied.insert(request_id.to_string()) {
            let members = st.containers.get(&container_id).cloned().unwrap_or_default();
            for member in members {
                let modified = st.tick();
                if let Some(entry) = st
                    .entries
                    .values_mut()
                    .find(|e| e.id == member.content_entity_id)
                {
                    entry.body = Some(member.body.clone());
                    entry.last_modified = modified;
                }
            }
        }
        Ok(AsyncRequestStatus {
            id: request_id.to_string(),
            state: AsyncState::Completed,
            error_msg: None,
            deploy_details: DeployDetails::default(),
        })
    }

    async fn delete_container(&self, container_id: &str) -> RemoteResult<()> {
        let mut st = self.state();
        st.calls.push("delete_container");
        if st.fail_delete_container {
            return Err(RemoteError::Timeout(format!("delete {container_id}")));
        }
        st.containers.remove(container_id);
        Ok(())
    }

    async fn query_records(&self, type_name: &TypeName, names: &[String]) -> RemoteResult<Vec<ToolingRecord>> {
        let mut st = self.state();
        st.calls.push("query_records");
        Ok(st
            .entries
            .values()
            .filter(|e| e.type_name == type_name.as_str() && names.contains(&e.full_name))
            .map(|e| ToolingRecord {
                attributes: RecordAttributes {
                    type_name: type_name.clone(),
                    url: None,
                },
                id: e.id.clone(),
                name: e.full_name.clone(),
                last_modified_date: e.last_modified,
                last_modified_by_id: Some("005OTHER".into()),
                created_date: None,
                created_by_id: None,
                namespace_prefix: None,
            })
            .collect())
    }

    async fn fetch_server_copy(
        &self,
        type_name: &TypeName,
        full_name: &str,
        _file_name: &str,
    ) -> RemoteResult<ServerCopy> {
        let mut st = self.state();
        st.calls.push("fetch_server_copy");
        if st.fail_fetch.contains(full_name) {
            return Err(RemoteError::Timeout(format!("fetch {full_name}")));
        }
        let entry = st
            .entries
            .get(&(type_name.to_string(), full_name.to_string()))
            .ok_or_else(|| rejected(format!("{type_name} {full_name} not found")))?;
        Ok(ServerCopy {
            last_modified_date: entry.last_modified,
            last_modified_by_name: Some("Other User".into()),
            body: entry.body.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Project fixture
// ---------------------------------------------------------------------------

pub struct Fixture {
    pub tmp: TempDir,
    pub project: Project,
    pub client: FakeClient,
}

impl Fixture {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let settings = ProjectSettings {
            project_name: "acme".into(),
            ..ProjectSettings::default()
        };
        let project = Project::init(tmp.path(), settings).unwrap();
        Self {
            tmp,
            project,
            client: FakeClient::new(),
        }
    }

    pub fn root(&self) -> &Path {
        self.tmp.path()
    }

    /// Short poll intervals so paused-clock tests advance quickly.
    pub fn config(&self) -> SyncConfig {
        SyncConfig {
            container_poll_interval: Duration::from_millis(50),
            deploy_poll_interval: Duration::from_millis(50),
            timeout: Duration::from_secs(5),
            ..self.project.snapshot()
        }
    }

    pub fn write(&self, key: &str, body: &str) {
        let path = self.root().join(key);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    pub fn read(&self, key: &str) -> String {
        fs::read_to_string(self.root().join(key)).unwrap()
    }

    /// A file that exists locally and on the server, last synced at `synced`.
    pub fn track(&mut self, ty: &str, full_name: &str, key: &str, body: &str, synced: DateTime<Utc>) -> String {
        self.write(key, body);
        let file_name = key.trim_start_matches("src/");
        let id = self.client.put(ty, full_name, file_name, Some(body), synced);
        let entry = self.client.entry(ty, full_name).unwrap();
        let catalog = self.project.catalog.clone();
        self.project
            .store
            .update(&ServerRecords::Metadata(vec![entry.props()]), &catalog)
            .unwrap();
        id
    }

    /// A bundle directory tracked as one server entity.
    pub fn track_bundle(&mut self, ty: &str, name: &str, dir_key: &str, files: &[(&str, &str)], synced: DateTime<Utc>) {
        for (file, body) in files {
            self.write(&format!("{dir_key}/{file}"), body);
        }
        let file_name = dir_key.trim_start_matches("src/");
        self.client.put(ty, name, file_name, None, synced);
        let entry = self.client.entry(ty, name).unwrap();
        let catalog = self.project.catalog.clone();
        self.project
            .store
            .update(&ServerRecords::Metadata(vec![entry.props()]), &catalog)
            .unwrap();
    }
}
