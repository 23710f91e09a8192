//! Stat resolution: one provider `stat` plus bounded recursive listing.
//!
//! Directory descent is bounded by a prefix trie seeded with the
//! requested resource and every `resolve_to` target: a directory is
//! expanded iff some seeded resource lives at or beneath it, or the
//! single-child heuristic applies. Per-child errors are logged and
//! coalesced out; a failed directory listing yields empty children
//! rather than failing the resolve.

use std::collections::HashMap;

use futures::future::BoxFuture;
use futures::FutureExt;
use polyfs_types::{
    FileError, FileResult, FileStat, FileType, Metadata, ProviderError, ResolveOptions, Resource,
};

use crate::provider::FileSystemProvider;

/// Prefix trie over `scheme://authority` roots and path segments,
/// answering "is any seeded resource at or beneath this prefix?" in
/// O(|prefix|).
pub(crate) struct PathTrie {
    root: TrieNode,
    case_sensitive: bool,
}

#[derive(Default)]
struct TrieNode {
    children: HashMap<String, TrieNode>,
}

impl PathTrie {
    pub(crate) fn new(case_sensitive: bool) -> Self {
        Self {
            root: TrieNode::default(),
            case_sensitive,
        }
    }

    fn segment_key(segment: &str, case_sensitive: bool) -> String {
        if case_sensitive {
            segment.to_string()
        } else {
            segment.to_lowercase()
        }
    }

    fn origin_key(resource: &Resource) -> String {
        format!("{}://{}", resource.scheme(), resource.authority()).to_lowercase()
    }

    pub(crate) fn insert(&mut self, resource: &Resource) {
        let case_sensitive = self.case_sensitive;
        let mut node = self
            .root
            .children
            .entry(Self::origin_key(resource))
            .or_default();
        for segment in resource.segments() {
            let key = Self::segment_key(segment, case_sensitive);
            node = node.children.entry(key).or_default();
        }
    }

    pub(crate) fn has_at_or_beneath(&self, resource: &Resource) -> bool {
        let Some(mut node) = self.root.children.get(&Self::origin_key(resource)) else {
            return false;
        };
        for segment in resource.segments() {
            match node
                .children
                .get(&Self::segment_key(segment, self.case_sensitive))
            {
                Some(child) => node = child,
                None => return false,
            }
        }
        true
    }
}

/// Resolve `resource` into a `FileStat` tree per `options`.
pub(crate) async fn resolve_stat(
    provider: &dyn FileSystemProvider,
    resource: &Resource,
    options: &ResolveOptions,
) -> FileResult<FileStat> {
    let meta = provider.stat(resource).await.map_err(|err| match err {
        ProviderError::NotFound(_) => FileError::not_found(resource),
        other => FileError::from_provider(other, resource),
    })?;

    let case_sensitive = provider.capabilities().is_case_sensitive();
    let mut trie = PathTrie::new(case_sensitive);
    trie.insert(resource);
    for target in &options.resolve_to {
        trie.insert(target);
    }

    Ok(to_file_stat(
        provider,
        resource.clone(),
        StatInfo::Full(meta),
        0,
        &trie,
        options,
    )
    .await)
}

enum StatInfo {
    Full(Metadata),
    TypeOnly(FileType),
}

fn to_file_stat<'a>(
    provider: &'a dyn FileSystemProvider,
    resource: Resource,
    info: StatInfo,
    siblings: usize,
    trie: &'a PathTrie,
    options: &'a ResolveOptions,
) -> BoxFuture<'a, FileStat> {
    async move {
        let mut stat = match info {
            StatInfo::Full(meta) => FileStat::with_metadata(resource, meta),
            StatInfo::TypeOnly(file_type) => FileStat::without_metadata(resource, file_type),
        };

        if !stat.is_directory() {
            return stat;
        }

        let expand = trie.has_at_or_beneath(&stat.resource)
            || (options.resolve_single_child_descendants && siblings == 1);
        if !expand {
            return stat;
        }

        let entries = match provider.read_dir(&stat.resource).await {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!("failed to list '{}': {err}", stat.resource);
                stat.children = Some(Vec::new());
                return stat;
            }
        };

        let sibling_count = entries.len();
        let mut children = Vec::with_capacity(sibling_count);
        for entry in entries {
            let child_resource = stat.resource.join(&entry.name);
            let info = if options.resolve_metadata {
                match provider.stat(&child_resource).await {
                    Ok(meta) => StatInfo::Full(meta),
                    Err(err) => {
                        tracing::warn!("failed to stat '{child_resource}': {err}");
                        continue;
                    }
                }
            } else {
                StatInfo::TypeOnly(entry.file_type)
            };

            children.push(
                to_file_stat(provider, child_resource, info, sibling_count, trie, options).await,
            );
        }

        stat.children = Some(children);
        stat
    }
    .boxed()
}
