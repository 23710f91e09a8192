//! In-memory filesystem provider.
//!
//! The reference provider: all data is ephemeral, and the capability
//! mask is configurable so a single implementation can present any
//! combination of unbuffered, positional, and streaming I/O. Used for
//! `mem://` scratch space and throughout the test suite.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use polyfs_types::{
    Capabilities, DeleteOptions, DirEntry, FileChange, FileChangeKind, FileType, Metadata,
    OverwriteOptions, ProviderError, ProviderOpenOptions, ProviderResult, ProviderWriteOptions,
    ReadOptions, Resource, WatchOptions,
};
use tokio::sync::RwLock;

use super::{Disposable, FileSystemProvider, ProviderEvents};
use crate::pipe::{byte_pipe_default, PipeReader};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Configuration for [`MemProvider`].
#[derive(Debug, Clone)]
pub struct MemConfig {
    /// The capability mask the provider advertises.
    pub capabilities: Capabilities,
    /// Cap on bytes accepted per positional `write` call, to exercise
    /// short-write handling in consumers.
    pub write_chunk_limit: Option<usize>,
}

impl Default for MemConfig {
    fn default() -> Self {
        Self {
            capabilities: Capabilities::FILE_READ_WRITE
                | Capabilities::FILE_OPEN_READ_WRITE_CLOSE
                | Capabilities::FILE_READ_STREAM
                | Capabilities::FILE_FOLDER_COPY
                | Capabilities::PATH_CASE_SENSITIVE
                | Capabilities::TRASH,
            write_chunk_limit: None,
        }
    }
}

#[derive(Debug, Clone)]
enum MemNodeKind {
    File { data: Vec<u8> },
    Directory,
}

#[derive(Debug, Clone)]
struct MemNode {
    /// Display name with original casing.
    name: String,
    kind: MemNodeKind,
    mtime: u64,
    ctime: u64,
}

impl MemNode {
    fn file(name: String, data: Vec<u8>) -> Self {
        let now = now_millis();
        Self {
            name,
            kind: MemNodeKind::File { data },
            mtime: now,
            ctime: now,
        }
    }

    fn directory(name: String) -> Self {
        let now = now_millis();
        Self {
            name,
            kind: MemNodeKind::Directory,
            mtime: now,
            ctime: now,
        }
    }

    fn is_directory(&self) -> bool {
        matches!(self.kind, MemNodeKind::Directory)
    }

    fn metadata(&self) -> Metadata {
        let (file_type, size) = match &self.kind {
            MemNodeKind::File { data } => (FileType::FILE, data.len() as u64),
            MemNodeKind::Directory => (FileType::DIRECTORY, 0),
        };
        Metadata {
            file_type,
            mtime: self.mtime,
            ctime: self.ctime,
            size,
        }
    }
}

struct OpenHandle {
    key: String,
    writable: bool,
}

/// In-memory provider. Thread-safe; all data is lost on drop.
pub struct MemProvider {
    config: MemConfig,
    capabilities: Mutex<Capabilities>,
    entries: RwLock<HashMap<String, MemNode>>,
    handles: Mutex<HashMap<u64, OpenHandle>>,
    next_handle: AtomicU64,
    watches: Arc<Mutex<HashMap<u64, String>>>,
    next_watch: AtomicU64,
    watch_calls: AtomicUsize,
    write_file_calls: AtomicUsize,
    open_calls: AtomicUsize,
    rename_calls: AtomicUsize,
    open_writers: AtomicUsize,
    max_open_writers: AtomicUsize,
    trashed: Mutex<Vec<String>>,
    events: ProviderEvents,
}

impl MemProvider {
    pub fn new() -> Self {
        Self::with_config(MemConfig::default())
    }

    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self::with_config(MemConfig {
            capabilities,
            ..Default::default()
        })
    }

    pub fn with_config(config: MemConfig) -> Self {
        let mut entries = HashMap::new();
        // Root directory always exists.
        entries.insert(String::new(), MemNode::directory(String::new()));
        Self {
            capabilities: Mutex::new(config.capabilities),
            config,
            entries: RwLock::new(entries),
            handles: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            watches: Arc::new(Mutex::new(HashMap::new())),
            next_watch: AtomicU64::new(1),
            watch_calls: AtomicUsize::new(0),
            write_file_calls: AtomicUsize::new(0),
            open_calls: AtomicUsize::new(0),
            rename_calls: AtomicUsize::new(0),
            open_writers: AtomicUsize::new(0),
            max_open_writers: AtomicUsize::new(0),
            trashed: Mutex::new(Vec::new()),
            events: ProviderEvents::new(),
        }
    }

    /// Replace the advertised capability set and fire the change event.
    pub fn set_capabilities(&self, capabilities: Capabilities) {
        *self.capabilities.lock().unwrap() = capabilities;
        self.events.emit_capabilities(capabilities);
    }

    /// How many times `watch` has been invoked (watch multiplexing is
    /// observable through this).
    pub fn watch_invocations(&self) -> usize {
        self.watch_calls.load(Ordering::SeqCst)
    }

    /// Number of currently live watch subscriptions.
    pub fn active_watches(&self) -> usize {
        self.watches.lock().unwrap().len()
    }

    /// Resources deleted via trash, in deletion order.
    pub fn trashed(&self) -> Vec<String> {
        self.trashed.lock().unwrap().clone()
    }

    /// How many unbuffered `write_file` calls this provider served.
    pub fn write_file_invocations(&self) -> usize {
        self.write_file_calls.load(Ordering::SeqCst)
    }

    /// How many positional `open` calls this provider served.
    pub fn open_invocations(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    /// How many `rename` calls this provider served.
    pub fn rename_invocations(&self) -> usize {
        self.rename_calls.load(Ordering::SeqCst)
    }

    /// The most writable handles ever open at once.
    pub fn max_concurrent_writers(&self) -> usize {
        self.max_open_writers.load(Ordering::SeqCst)
    }

    /// Overwrite a file's mtime, for callers staging stat preconditions.
    pub async fn touch(&self, resource: &Resource, mtime: u64) -> ProviderResult<()> {
        let key = self.key_of(resource);
        let mut entries = self.entries.write().await;
        match entries.get_mut(&key) {
            Some(node) => {
                node.mtime = mtime;
                Ok(())
            }
            None => Err(ProviderError::NotFound(resource.to_string())),
        }
    }

    fn case_sensitive(&self) -> bool {
        self.config.capabilities.is_case_sensitive()
    }

    /// Normalize a resource path into a storage key: no leading or
    /// trailing slash, `.`/`..` resolved, lowercased when the provider
    /// is case-insensitive. The root is the empty string.
    fn key_of(&self, resource: &Resource) -> String {
        let mut segments: Vec<&str> = Vec::new();
        for segment in resource.segments() {
            match segment {
                "." => {}
                ".." => {
                    segments.pop();
                }
                other => segments.push(other),
            }
        }
        let key = segments.join("/");
        if self.case_sensitive() {
            key
        } else {
            key.to_lowercase()
        }
    }

    fn parent_key(key: &str) -> Option<String> {
        if key.is_empty() {
            return None;
        }
        Some(match key.rsplit_once('/') {
            Some((parent, _)) => parent.to_string(),
            None => String::new(),
        })
    }

    fn leaf_name(resource: &Resource) -> String {
        resource.name().to_string()
    }

    async fn require_parent_dir(&self, key: &str, resource: &Resource) -> ProviderResult<()> {
        if let Some(parent) = Self::parent_key(key) {
            let entries = self.entries.read().await;
            match entries.get(&parent) {
                Some(node) if node.is_directory() => Ok(()),
                Some(_) => Err(ProviderError::NotDirectory(resource.to_string())),
                None => Err(ProviderError::NotFound(format!(
                    "parent of {resource} does not exist"
                ))),
            }
        } else {
            Ok(())
        }
    }

    fn emit_change(&self, resource: &Resource, kind: FileChangeKind) {
        self.events.emit_changes(vec![FileChange {
            resource: resource.clone(),
            kind,
        }]);
    }

    fn subtree_keys(entries: &HashMap<String, MemNode>, key: &str) -> Vec<String> {
        let prefix = format!("{key}/");
        entries
            .keys()
            .filter(|k| *k == key || k.starts_with(&prefix))
            .cloned()
            .collect()
    }
}

impl Default for MemProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystemProvider for MemProvider {
    fn capabilities(&self) -> Capabilities {
        *self.capabilities.lock().unwrap()
    }

    fn events(&self) -> &ProviderEvents {
        &self.events
    }

    async fn stat(&self, resource: &Resource) -> ProviderResult<Metadata> {
        let key = self.key_of(resource);
        let entries = self.entries.read().await;
        entries
            .get(&key)
            .map(MemNode::metadata)
            .ok_or_else(|| ProviderError::NotFound(resource.to_string()))
    }

    async fn read_dir(&self, resource: &Resource) -> ProviderResult<Vec<DirEntry>> {
        let key = self.key_of(resource);
        let entries = self.entries.read().await;

        match entries.get(&key) {
            Some(node) if node.is_directory() => {}
            Some(_) => return Err(ProviderError::NotDirectory(resource.to_string())),
            None => return Err(ProviderError::NotFound(resource.to_string())),
        }

        let mut listing: Vec<DirEntry> = entries
            .iter()
            .filter(|(k, _)| Self::parent_key(k).as_deref() == Some(key.as_str()))
            .map(|(_, node)| DirEntry {
                name: node.name.clone(),
                file_type: node.metadata().file_type,
            })
            .collect();

        listing.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listing)
    }

    async fn mkdir(&self, resource: &Resource) -> ProviderResult<()> {
        let key = self.key_of(resource);
        self.require_parent_dir(&key, resource).await?;

        let mut entries = self.entries.write().await;
        if entries.contains_key(&key) {
            return Err(ProviderError::AlreadyExists(resource.to_string()));
        }
        entries.insert(key, MemNode::directory(Self::leaf_name(resource)));
        drop(entries);

        self.emit_change(resource, FileChangeKind::Created);
        Ok(())
    }

    async fn delete(&self, resource: &Resource, options: DeleteOptions) -> ProviderResult<()> {
        let key = self.key_of(resource);
        let mut entries = self.entries.write().await;

        let node = entries
            .get(&key)
            .ok_or_else(|| ProviderError::NotFound(resource.to_string()))?;

        if node.is_directory() {
            let prefix = format!("{key}/");
            let has_children = entries.keys().any(|k| k.starts_with(&prefix));
            if has_children && !options.recursive {
                return Err(ProviderError::NotEmpty(resource.to_string()));
            }
            for k in Self::subtree_keys(&entries, &key) {
                entries.remove(&k);
            }
        } else {
            entries.remove(&key);
        }
        drop(entries);

        if options.use_trash {
            self.trashed.lock().unwrap().push(resource.to_string());
        }
        self.emit_change(resource, FileChangeKind::Deleted);
        Ok(())
    }

    async fn rename(
        &self,
        source: &Resource,
        target: &Resource,
        options: OverwriteOptions,
    ) -> ProviderResult<()> {
        self.rename_calls.fetch_add(1, Ordering::SeqCst);
        let from_key = self.key_of(source);
        let to_key = self.key_of(target);
        self.require_parent_dir(&to_key, target).await?;

        let mut entries = self.entries.write().await;

        let mut node = entries
            .remove(&from_key)
            .ok_or_else(|| ProviderError::NotFound(source.to_string()))?;

        if entries.contains_key(&to_key) {
            if !options.overwrite {
                entries.insert(from_key, node);
                return Err(ProviderError::AlreadyExists(target.to_string()));
            }
            for k in Self::subtree_keys(&entries, &to_key) {
                entries.remove(&k);
            }
        }

        if node.is_directory() {
            let children: Vec<String> = {
                let prefix = format!("{from_key}/");
                entries
                    .keys()
                    .filter(|k| k.starts_with(&prefix))
                    .cloned()
                    .collect()
            };
            for old_key in children {
                let child = entries.remove(&old_key).unwrap();
                let suffix = &old_key[from_key.len()..];
                entries.insert(format!("{to_key}{suffix}"), child);
            }
        }

        node.name = Self::leaf_name(target);
        node.mtime = now_millis();
        entries.insert(to_key, node);
        drop(entries);

        self.emit_change(source, FileChangeKind::Deleted);
        self.emit_change(target, FileChangeKind::Created);
        Ok(())
    }

    async fn copy(
        &self,
        source: &Resource,
        target: &Resource,
        options: OverwriteOptions,
    ) -> ProviderResult<()> {
        let from_key = self.key_of(source);
        let to_key = self.key_of(target);
        self.require_parent_dir(&to_key, target).await?;

        let mut entries = self.entries.write().await;

        if !entries.contains_key(&from_key) {
            return Err(ProviderError::NotFound(source.to_string()));
        }
        if entries.contains_key(&to_key) {
            if !options.overwrite {
                return Err(ProviderError::AlreadyExists(target.to_string()));
            }
            for k in Self::subtree_keys(&entries, &to_key) {
                entries.remove(&k);
            }
        }

        let now = now_millis();
        for old_key in Self::subtree_keys(&entries, &from_key) {
            let mut clone = entries.get(&old_key).unwrap().clone();
            let suffix = &old_key[from_key.len()..];
            let new_key = format!("{to_key}{suffix}");
            if suffix.is_empty() {
                clone.name = Self::leaf_name(target);
            }
            clone.mtime = now;
            clone.ctime = now;
            entries.insert(new_key, clone);
        }
        drop(entries);

        self.emit_change(target, FileChangeKind::Created);
        Ok(())
    }

    async fn read_file(&self, resource: &Resource) -> ProviderResult<Vec<u8>> {
        let key = self.key_of(resource);
        let entries = self.entries.read().await;
        match entries.get(&key) {
            Some(MemNode {
                kind: MemNodeKind::File { data },
                ..
            }) => Ok(data.clone()),
            Some(_) => Err(ProviderError::IsDirectory(resource.to_string())),
            None => Err(ProviderError::NotFound(resource.to_string())),
        }
    }

    async fn write_file(
        &self,
        resource: &Resource,
        content: &[u8],
        options: ProviderWriteOptions,
    ) -> ProviderResult<()> {
        self.write_file_calls.fetch_add(1, Ordering::SeqCst);
        let key = self.key_of(resource);
        self.require_parent_dir(&key, resource).await?;

        let mut entries = self.entries.write().await;
        let existed = match entries.get(&key) {
            Some(node) if node.is_directory() => {
                return Err(ProviderError::IsDirectory(resource.to_string()));
            }
            Some(_) if !options.overwrite => {
                return Err(ProviderError::AlreadyExists(resource.to_string()));
            }
            Some(_) => true,
            None if !options.create => {
                return Err(ProviderError::NotFound(resource.to_string()));
            }
            None => false,
        };

        entries.insert(
            key,
            MemNode::file(Self::leaf_name(resource), content.to_vec()),
        );
        drop(entries);

        self.emit_change(
            resource,
            if existed {
                FileChangeKind::Changed
            } else {
                FileChangeKind::Created
            },
        );
        Ok(())
    }

    async fn open(
        &self,
        resource: &Resource,
        options: ProviderOpenOptions,
    ) -> ProviderResult<u64> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        let key = self.key_of(resource);

        if options.create {
            self.require_parent_dir(&key, resource).await?;
            let mut entries = self.entries.write().await;
            match entries.get_mut(&key) {
                Some(node) if node.is_directory() => {
                    return Err(ProviderError::IsDirectory(resource.to_string()));
                }
                Some(node) => {
                    // Truncate on open-for-write.
                    node.kind = MemNodeKind::File { data: Vec::new() };
                    node.mtime = now_millis();
                }
                None => {
                    entries.insert(key.clone(), MemNode::file(Self::leaf_name(resource), Vec::new()));
                }
            }
        } else {
            let entries = self.entries.read().await;
            match entries.get(&key) {
                Some(node) if node.is_directory() => {
                    return Err(ProviderError::IsDirectory(resource.to_string()));
                }
                Some(_) => {}
                None => return Err(ProviderError::NotFound(resource.to_string())),
            }
        }

        if options.create {
            let writers = self.open_writers.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_open_writers.fetch_max(writers, Ordering::SeqCst);
        }

        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.handles.lock().unwrap().insert(
            handle,
            OpenHandle {
                key,
                writable: options.create,
            },
        );
        Ok(handle)
    }

    async fn close(&self, handle: u64) -> ProviderResult<()> {
        let open = self
            .handles
            .lock()
            .unwrap()
            .remove(&handle)
            .ok_or(ProviderError::BadHandle(handle))?;
        if open.writable {
            self.open_writers.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn read(&self, handle: u64, position: u64, length: usize) -> ProviderResult<Vec<u8>> {
        let key = {
            let handles = self.handles.lock().unwrap();
            handles
                .get(&handle)
                .ok_or(ProviderError::BadHandle(handle))?
                .key
                .clone()
        };

        let entries = self.entries.read().await;
        match entries.get(&key) {
            Some(MemNode {
                kind: MemNodeKind::File { data },
                ..
            }) => {
                let start = (position as usize).min(data.len());
                let end = start.saturating_add(length).min(data.len());
                Ok(data[start..end].to_vec())
            }
            _ => Err(ProviderError::NotFound(key)),
        }
    }

    async fn write(&self, handle: u64, position: u64, data: &[u8]) -> ProviderResult<usize> {
        let key = {
            let handles = self.handles.lock().unwrap();
            let open = handles
                .get(&handle)
                .ok_or(ProviderError::BadHandle(handle))?;
            if !open.writable {
                return Err(ProviderError::PermissionDenied(format!(
                    "handle {handle} is read-only"
                )));
            }
            open.key.clone()
        };

        let accepted = match self.config.write_chunk_limit {
            Some(limit) => data.len().min(limit),
            None => data.len(),
        };

        let mut entries = self.entries.write().await;
        match entries.get_mut(&key) {
            Some(MemNode {
                kind: MemNodeKind::File { data: content },
                mtime,
                ..
            }) => {
                let position = position as usize;
                let end = position + accepted;
                if content.len() < end {
                    content.resize(end, 0);
                }
                content[position..end].copy_from_slice(&data[..accepted]);
                *mtime = now_millis();
                Ok(accepted)
            }
            _ => Err(ProviderError::NotFound(key)),
        }
    }

    async fn read_stream(
        &self,
        resource: &Resource,
        options: &ReadOptions,
    ) -> ProviderResult<PipeReader> {
        let bytes = self.read_file(resource).await?;

        let len = bytes.len() as u64;
        let start = options.position.unwrap_or(0).min(len) as usize;
        let end = match options.length {
            Some(length) => (start as u64).saturating_add(length).min(len) as usize,
            None => bytes.len(),
        };
        let window = bytes[start..end].to_vec();

        let (writer, reader) = byte_pipe_default();
        tokio::spawn(async move {
            let _ = writer.write_all_bytes(&window).await;
        });
        Ok(reader)
    }

    async fn watch(
        &self,
        resource: &Resource,
        _options: &WatchOptions,
    ) -> ProviderResult<Disposable> {
        self.watch_calls.fetch_add(1, Ordering::SeqCst);
        let id = self.next_watch.fetch_add(1, Ordering::Relaxed);
        let key = self.key_of(resource);
        self.watches.lock().unwrap().insert(id, key);

        let watches = self.watches.clone();
        Ok(Disposable::new(move || {
            watches.lock().unwrap().remove(&id);
        }))
    }
}
