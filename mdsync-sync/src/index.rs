//! Building the server index and expanding wildcard subscriptions.
//!
//! Both run a first round of concurrent `list` calls, one per subscribed
//! type, and a second round for in-folder types (folder contents) and
//! composite types (child types). The index is advisory, so a type whose
//! listing fails is logged and left empty rather than failing the build.

use std::collections::BTreeMap;

use futures::future::join_all;
use indexmap::IndexMap;

use mdsync_core::manifest::WILDCARD;
use mdsync_core::{FileProperties, IndexNode, Manifest, MetadataType, Project, ServerIndex, TypeCatalog, TypeName};

use crate::client::MetadataClient;
use crate::error::SyncError;

/// Replace the project's type catalog with a fresh describe.
pub async fn refresh_describe<C>(client: &C, project: &mut Project) -> Result<usize, SyncError>
where
    C: MetadataClient + ?Sized,
{
    let catalog = client.describe().await?;
    let count = catalog.types.len();
    project.set_catalog(catalog)?;
    tracing::info!("describe refreshed: {count} types");
    Ok(count)
}

/// Build the index tree for everything `manifest` subscribes to.
pub async fn build_server_index<C>(
    client: &C,
    catalog: &TypeCatalog,
    manifest: &Manifest,
) -> Result<ServerIndex, SyncError>
where
    C: MetadataClient + ?Sized,
{
    let subscribed: Vec<(TypeName, Option<&MetadataType>)> = manifest
        .types()
        .map(|(ty, _)| (ty.clone(), catalog.find(ty.as_str())))
        .collect();

    let first = join_all(subscribed.iter().map(|(ty, meta)| {
        let list_type = meta
            .and_then(|m| m.folder_type_name())
            .unwrap_or_else(|| ty.clone());
        async move { client.list(&list_type).await }
    }))
    .await;

    let mut nodes = Vec::with_capacity(subscribed.len());
    for ((ty, meta), listed) in subscribed.iter().zip(first) {
        let listed = match listed {
            Ok(listed) => listed,
            Err(err) => {
                tracing::warn!("listing {ty} failed: {err}");
                Vec::new()
            }
        };
        let node = match meta {
            Some(meta) if meta.in_folder => folder_node(client, manifest, ty, listed).await,
            Some(meta) if meta.is_composite() => {
                composite_node(client, manifest, meta, listed).await
            }
            _ => flat_node(manifest, ty, listed),
        };
        nodes.push(node);
    }
    tracing::info!("built server index for {} types", nodes.len());
    Ok(ServerIndex::new(nodes))
}

fn sorted(mut rows: Vec<FileProperties>) -> Vec<FileProperties> {
    rows.sort_by(|a, b| a.full_name.cmp(&b.full_name));
    rows.dedup_by(|a, b| a.full_name == b.full_name);
    rows
}

fn flat_node(manifest: &Manifest, ty: &TypeName, listed: Vec<FileProperties>) -> IndexNode {
    let mut node = IndexNode::type_node(ty);
    for row in sorted(listed) {
        if manifest.covers(ty.as_str(), &row.full_name) {
            let child = node.child(&row.full_name, ty, Some(&row.full_name), Some(&row.id));
            node.children.push(child);
        }
    }
    node
}

async fn folder_node<C>(client: &C, manifest: &Manifest, ty: &TypeName, folders: Vec<FileProperties>) -> IndexNode
where
    C: MetadataClient + ?Sized,
{
    let members = manifest.members(ty.as_str()).unwrap_or_default();
    let wildcard = manifest.is_wildcard(ty.as_str());
    let wanted: Vec<FileProperties> = sorted(folders)
        .into_iter()
        .filter(|f| {
            let prefix = format!("{}/", f.full_name);
            wildcard || members.iter().any(|m| m == &f.full_name || m.starts_with(&prefix))
        })
        .collect();

    let contents = join_all(
        wanted
            .iter()
            .map(|folder| client.list_folder(ty, &folder.full_name)),
    )
    .await;

    let mut node = IndexNode::type_node(ty);
    for (folder, items) in wanted.iter().zip(contents) {
        let whole_folder = wildcard || members.iter().any(|m| m == &folder.full_name);
        let mut folder_node = node.child(&folder.full_name, ty, Some(&folder.full_name), Some(&folder.id));
        folder_node.is_folder = true;
        let items = match items {
            Ok(items) => items,
            Err(err) => {
                tracing::warn!("listing {ty} folder {} failed: {err}", folder.full_name);
                Vec::new()
            }
        };
        for item in sorted(items) {
            if !(whole_folder || manifest.covers(ty.as_str(), &item.full_name)) {
                continue;
            }
            let text = item.full_name.rsplit('/').next().unwrap_or(&item.full_name);
            let child = folder_node.child(text, ty, Some(&item.full_name), Some(&item.id));
            folder_node.children.push(child);
        }
        node.children.push(folder_node);
    }
    node
}

async fn composite_node<C>(client: &C, manifest: &Manifest, meta: &MetadataType, listed: Vec<FileProperties>) -> IndexNode
where
    C: MetadataClient + ?Sized,
{
    let ty = &meta.xml_name;
    let child_types: Vec<TypeName> = meta.child_xml_names.iter().map(|c| TypeName::from(c.as_str())).collect();
    let children = join_all(child_types.iter().map(|c| client.list(c))).await;

    // child type → parent full name → child rows
    let mut grouped: Vec<(TypeName, BTreeMap<String, Vec<FileProperties>>)> = Vec::new();
    for (child_ty, rows) in child_types.into_iter().zip(children) {
        let rows = match rows {
            Ok(rows) => rows,
            Err(err) => {
                tracing::warn!("listing {child_ty} failed: {err}");
                continue;
            }
        };
        let mut by_parent: BTreeMap<String, Vec<FileProperties>> = BTreeMap::new();
        for row in rows {
            if let Some((parent, _)) = row.full_name.split_once('.') {
                by_parent.entry(parent.to_string()).or_default().push(row);
            }
        }
        grouped.push((child_ty, by_parent));
    }

    let mut node = IndexNode::type_node(ty);
    for row in sorted(listed) {
        if !manifest.covers(ty.as_str(), &row.full_name) {
            continue;
        }
        let mut member = node.child(&row.full_name, ty, Some(&row.full_name), Some(&row.id));
        for (child_ty, by_parent) in &grouped {
            let Some(rows) = by_parent.get(&row.full_name) else {
                continue;
            };
            let mut type_node = member.child(child_ty.as_str(), child_ty, None, None);
            for child in sorted(rows.clone()) {
                let leaf = type_node.child(&child.full_name, child_ty, Some(&child.full_name), Some(&child.id));
                type_node.children.push(leaf);
            }
            member.children.push(type_node);
        }
        node.children.push(member);
    }
    node
}

/// Expand `*` subscriptions into explicit member lists.
///
/// Explicit members are preserved; in-folder types expand folder by folder.
pub async fn resolve_wildcards<C>(
    client: &C,
    catalog: &TypeCatalog,
    manifest: &Manifest,
) -> Result<IndexMap<TypeName, Vec<String>>, SyncError>
where
    C: MetadataClient + ?Sized,
{
    let mut out = IndexMap::new();
    for (ty, members) in manifest.types() {
        let mut expanded: Vec<String> = members.iter().filter(|m| *m != WILDCARD).cloned().collect();
        if manifest.is_wildcard(ty.as_str()) {
            let listed = match catalog.find(ty.as_str()).and_then(MetadataType::folder_type_name) {
                Some(folder_type) => {
                    let folders = client.list(&folder_type).await?;
                    let contents =
                        join_all(folders.iter().map(|f| client.list_folder(ty, &f.full_name))).await;
                    let mut rows = folders;
                    for items in contents {
                        rows.extend(items?);
                    }
                    rows
                }
                None => client.list(ty).await?,
            };
            for row in sorted(listed) {
                if !expanded.contains(&row.full_name) {
                    expanded.push(row.full_name);
                }
            }
        }
        out.insert(ty.clone(), expanded);
    }
    Ok(out)
}
