//! Operation entry points: compile, create, delete, refresh.
//!
//! Every operation follows the same order:
//! 1. resolve every path (an unresolvable path aborts before any remote call),
//! 2. run the network phase (conflict checks, protocols, follow-up queries),
//! 3. apply local store and manifest writes for what succeeded.
//!
//! Nothing is written to the local store until the whole batch's network
//! phase has finished.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use futures::future::join_all;
use indexmap::IndexMap;

use mdsync_core::{
    Component, DeployOptions, FileProperties, Project, ServerRecords, SyncConfig, ToolingRecord,
    TypeName,
};

use crate::aggregate::{self, ProtocolResult, UnifiedResult};
use crate::client::{DeployResult, MetadataClient};
use crate::conflict::ConflictDetector;
use crate::container::{ContainerCompile, MemberInput};
use crate::deploy::BulkDeploy;
use crate::dispatch::{self, Buckets};
use crate::error::{io_err, SyncError};
use crate::index;
use crate::status::{self, ProjectStatus};

/// Server records collected during the network phase.
#[derive(Debug, Default)]
struct PendingWrites {
    tooling: Vec<ToolingRecord>,
    metadata: Vec<FileProperties>,
}

/// Outcome of a refresh from the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub requested: usize,
    pub updated: usize,
    pub messages: Vec<String>,
}

/// One project bound to one remote client for a run of operations.
pub struct Session<'a, C: ?Sized> {
    project: &'a mut Project,
    client: &'a C,
    config: SyncConfig,
}

impl<'a, C> Session<'a, C>
where
    C: MetadataClient + ?Sized,
{
    /// Bind using the project's current settings.
    pub fn new(project: &'a mut Project, client: &'a C) -> Self {
        let config = project.snapshot();
        Self::with_config(project, client, config)
    }

    pub fn with_config(project: &'a mut Project, client: &'a C, config: SyncConfig) -> Self {
        Self {
            project,
            client,
            config,
        }
    }

    pub fn project(&self) -> &Project {
        self.project
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // compile
    // -----------------------------------------------------------------------

    /// Save local changes to the server.
    ///
    /// Tooling source files compile through a metadata container; other
    /// metadata and bundles deploy as two separate zips. Each bucket is
    /// conflict-checked on its own unless `force` is set.
    ///
    /// If a bucket fails, the server state already committed by earlier
    /// buckets is still recorded locally before the error is returned.
    pub async fn compile<P: AsRef<Path>>(&mut self, paths: &[P], force: bool) -> Result<UnifiedResult, SyncError> {
        let components = self.project.resolve(paths)?;
        let buckets = dispatch::classify(components)?;
        tracing::info!("compile: {} components", buckets.len());

        let mut results = Vec::new();
        let mut pending = PendingWrites::default();
        let outcome = self
            .compile_buckets(&buckets, force, &mut results, &mut pending)
            .await;
        self.apply(pending)?;
        outcome?;
        Ok(aggregate::flatten(results))
    }

    async fn compile_buckets(
        &self,
        buckets: &Buckets,
        force: bool,
        results: &mut Vec<ProtocolResult>,
        pending: &mut PendingWrites,
    ) -> Result<(), SyncError> {
        let detector = ConflictDetector::new(&self.config, self.project.root());
        let options = self.config.deploy_defaults.clone();

        if !buckets.single.is_empty() {
            let check = detector
                .check(self.client, &self.project.store, &buckets.single, force)
                .await?;
            match check.conflicts {
                Some(conflicts) => results.push(ProtocolResult::Conflict(conflicts)),
                None => {
                    let members = buckets
                        .single
                        .iter()
                        .map(|c| MemberInput::from_component(c, &self.project.store))
                        .collect::<Result<Vec<_>, _>>()?;
                    let mut compile =
                        ContainerCompile::new(self.client, &self.config).check_only(options.check_only);
                    let outcome = compile.run(&members).await?;
                    if outcome.succeeded() && !options.check_only {
                        pending.tooling = self.query_compiled(&members).await?;
                    }
                    results.push(ProtocolResult::Tooling(outcome));
                }
            }
        }

        for bucket in [&buckets.bundled, &buckets.bundle_items] {
            if bucket.is_empty() {
                continue;
            }
            let check = detector
                .check(self.client, &self.project.store, bucket, force)
                .await?;
            if let Some(conflicts) = check.conflicts {
                results.push(ProtocolResult::Conflict(conflicts));
                continue;
            }
            let result = BulkDeploy::new(self.client, &self.config)
                .deploy(bucket, &options)
                .await?;
            pending.metadata.extend(self.list_deployed(&result, &options).await?);
            results.push(ProtocolResult::Deploy(result));
        }
        Ok(())
    }

    /// Tooling rows for every compiled member, grouped into one query per type.
    async fn query_compiled(&self, members: &[MemberInput]) -> Result<Vec<ToolingRecord>, SyncError> {
        let mut by_type: IndexMap<TypeName, Vec<String>> = IndexMap::new();
        for member in members {
            let names = by_type.entry(member.type_name.clone()).or_default();
            if !names.contains(&member.full_name) {
                names.push(member.full_name.clone());
            }
        }
        let client = self.client;
        let rows = join_all(by_type.iter().map(|(ty, names)| client.query_records(ty, names))).await;
        let mut out = Vec::new();
        for batch in rows {
            out.extend(batch?);
        }
        Ok(out)
    }

    /// Current file properties of the components a deploy actually saved.
    ///
    /// A check-only deploy, or a failed deploy that rolled back, saved nothing.
    async fn list_deployed(
        &self,
        result: &DeployResult,
        options: &DeployOptions,
    ) -> Result<Vec<FileProperties>, SyncError> {
        if options.check_only || (!result.success && options.rollback_on_error) {
            return Ok(Vec::new());
        }
        let failed: BTreeSet<&str> = result
            .details
            .component_failures
            .iter()
            .map(|f| f.full_name.as_str())
            .collect();
        let mut saved: BTreeMap<TypeName, BTreeSet<String>> = BTreeMap::new();
        for success in &result.details.component_successes {
            let Some(ty) = &success.component_type else {
                continue;
            };
            if failed.contains(success.full_name.as_str()) {
                continue;
            }
            saved
                .entry(ty.clone())
                .or_default()
                .insert(success.full_name.clone());
        }
        if saved.is_empty() {
            return Ok(Vec::new());
        }

        let client = self.client;
        let listed = join_all(saved.keys().map(|ty| client.list(ty))).await;
        let mut out = Vec::new();
        for ((_, names), rows) in saved.iter().zip(listed) {
            out.extend(rows?.into_iter().filter(|row| names.contains(&row.full_name)));
        }
        Ok(out)
    }

    fn apply(&mut self, pending: PendingWrites) -> Result<(), SyncError> {
        let tooling = ServerRecords::Tooling(pending.tooling);
        let metadata = ServerRecords::Metadata(pending.metadata);
        let mut written = self.project.store.update(&tooling, &self.project.catalog)?;
        written += self.project.store.update(&metadata, &self.project.catalog)?;
        if written > 0 {
            tracing::info!("recorded server state for {written} files");
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // create
    // -----------------------------------------------------------------------

    /// Create new components on the server and subscribe them in the manifest.
    pub async fn create<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<UnifiedResult, SyncError> {
        let components = self.project.resolve(paths)?;
        if components.is_empty() {
            return Ok(aggregate::flatten(Vec::new()));
        }
        tracing::info!("create: {} components", components.len());
        let options = self.config.deploy_defaults.clone();
        let result = BulkDeploy::new(self.client, &self.config)
            .deploy(&components, &options)
            .await?;
        let listed = self.list_deployed(&result, &options).await?;

        let created = listed
            .iter()
            .map(|row| (row.type_name.clone(), row.full_name.clone()));
        if self.project.manifest.subscribe(created) {
            self.project.manifest.save()?;
        }
        self.apply(PendingWrites {
            tooling: Vec::new(),
            metadata: listed,
        })?;
        Ok(aggregate::flatten(vec![ProtocolResult::Deploy(result)]))
    }

    // -----------------------------------------------------------------------
    // delete
    // -----------------------------------------------------------------------

    /// Delete components from the server, then locally.
    ///
    /// Files inside a bundle are removed by redeploying the bundle without
    /// them; everything else goes through a destructive deploy.
    pub async fn delete<P: AsRef<Path>>(&mut self, paths: &[P], force: bool) -> Result<UnifiedResult, SyncError> {
        let components = self.project.resolve(paths)?;
        if components.is_empty() {
            return Ok(aggregate::flatten(Vec::new()));
        }
        tracing::info!("delete: {} components", components.len());

        let detector = ConflictDetector::new(&self.config, self.project.root());
        let check = detector
            .check(self.client, &self.project.store, &components, force)
            .await?;
        if let Some(conflicts) = check.conflicts {
            return Ok(aggregate::flatten(vec![ProtocolResult::Conflict(conflicts)]));
        }

        let (items, whole): (Vec<Component>, Vec<Component>) =
            components.into_iter().partition(Component::is_bundle_item);
        let bundles = self.enclosing_bundles(&items)?;

        let mut results = Vec::new();
        let mut removed = Vec::new();
        let mut bundle_rows = Vec::new();
        let outcome = self
            .delete_remote(whole, items, &bundles, &mut results, &mut removed, &mut bundle_rows)
            .await;
        self.remove_local(&removed)?;
        self.apply(PendingWrites {
            tooling: Vec::new(),
            metadata: bundle_rows,
        })?;
        outcome?;
        Ok(aggregate::flatten(results))
    }

    /// Remote half of a delete. Components land in `removed` only once the
    /// server has dropped them.
    async fn delete_remote(
        &self,
        whole: Vec<Component>,
        items: Vec<Component>,
        bundles: &[Component],
        results: &mut Vec<ProtocolResult>,
        removed: &mut Vec<Component>,
        bundle_rows: &mut Vec<FileProperties>,
    ) -> Result<(), SyncError> {
        let options = self.config.deploy_defaults.clone();
        let deploy = BulkDeploy::new(self.client, &self.config);

        if !whole.is_empty() {
            let result = deploy.destroy(&whole, &options).await?;
            if result.success && !options.check_only {
                removed.extend(whole);
            }
            results.push(ProtocolResult::Deploy(result));
        }
        if !items.is_empty() {
            let excluded: BTreeSet<String> = items.iter().map(|c| c.key().to_string()).collect();
            let result = deploy.deploy_without(bundles, &excluded, &options).await?;
            if result.success && !options.check_only {
                removed.extend(items);
            }
            bundle_rows.extend(self.list_deployed(&result, &options).await?);
            results.push(ProtocolResult::Deploy(result));
        }
        Ok(())
    }

    /// Resolved bundle directories enclosing `items`, one per bundle.
    fn enclosing_bundles(&mut self, items: &[Component]) -> Result<Vec<Component>, SyncError> {
        let mut keys = BTreeSet::new();
        for item in items {
            let segments: Vec<&str> = item.key().splitn(4, '/').collect();
            keys.insert(segments[..3].join("/"));
        }
        let keys: Vec<String> = keys.into_iter().collect();
        Ok(self.project.resolve(&keys)?)
    }

    fn remove_local(&mut self, removed: &[Component]) -> Result<(), SyncError> {
        if removed.is_empty() {
            return Ok(());
        }
        for component in removed {
            let path = component.path();
            let result = if path.is_dir() {
                std::fs::remove_dir_all(path)
            } else {
                std::fs::remove_file(path)
            };
            match result {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(io_err(path, err)),
            }
            if let Some(meta) = component.meta_path() {
                if meta.is_file() {
                    std::fs::remove_file(&meta).map_err(|e| io_err(&meta, e))?;
                }
            }
        }

        let keys: Vec<String> = removed.iter().map(|c| regex::escape(c.key())).collect();
        let pattern = format!(r"^(?:{})(?:-meta\.xml|/.*)?$", keys.join("|"));
        let dropped = self.project.store.remove_key_by_regex(&pattern)?;

        let entries = removed
            .iter()
            .filter(|c| !c.is_bundle_item())
            .filter_map(Component::manifest_entry);
        if self.project.manifest.unsubscribe(entries) {
            self.project.manifest.save()?;
        }
        tracing::info!("removed {} files locally ({dropped} store entries)", removed.len());
        Ok(())
    }

    // -----------------------------------------------------------------------
    // refresh
    // -----------------------------------------------------------------------

    /// Overwrite local files with the server's copies.
    ///
    /// With no paths, the whole manifest is retrieved with wildcards expanded.
    pub async fn refresh<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<RefreshReport, SyncError> {
        let types = if paths.is_empty() {
            index::resolve_wildcards(self.client, &self.project.catalog, &self.project.manifest).await?
        } else {
            let components = self.project.resolve(paths)?;
            let mut types: IndexMap<TypeName, Vec<String>> = IndexMap::new();
            for (ty, member) in components.iter().filter_map(Component::manifest_entry) {
                let members = types.entry(ty).or_default();
                if !members.contains(&member) {
                    members.push(member);
                }
            }
            types
        };
        let requested = types.values().map(Vec::len).sum();
        if requested == 0 {
            return Ok(RefreshReport::default());
        }
        tracing::info!("refresh: retrieving {requested} members");

        let src = self.project.src_dir();
        let retrieved = self.client.retrieve_unpackaged(&types, true, &src).await?;
        let rows: Vec<FileProperties> = retrieved
            .file_properties
            .into_iter()
            .filter(|row| row.file_name.trim_start_matches("unpackaged/") != "package.xml")
            .collect();
        let updated = self
            .project
            .store
            .update(&ServerRecords::Metadata(rows), &self.project.catalog)?;
        Ok(RefreshReport {
            requested,
            updated,
            messages: retrieved.messages,
        })
    }

    /// Rebuild and persist the server index; returns the number of nodes.
    pub async fn refresh_index(&mut self) -> Result<usize, SyncError> {
        let built =
            index::build_server_index(self.client, &self.project.catalog, &self.project.manifest).await?;
        built.save_at(self.project.root())?;
        let count = built.iter().count();
        self.project.index = built;
        Ok(count)
    }

    /// Refresh the cached describe result; returns the number of types.
    pub async fn refresh_describe(&mut self) -> Result<usize, SyncError> {
        index::refresh_describe(self.client, self.project).await
    }

    // -----------------------------------------------------------------------
    // status
    // -----------------------------------------------------------------------

    /// Recompute sync states, persist them, and report every file.
    pub fn status(&mut self) -> Result<ProjectStatus, SyncError> {
        let changed = self.project.store.refresh_sync_states()?;
        if !changed.is_empty() {
            tracing::debug!("{} sync states changed", changed.len());
        }
        status::check(self.project)
    }
}
