//! The provider capability contract.
//!
//! A [`FileSystemProvider`] implements whichever method families its
//! capability bits advertise; the unadvertised families keep their
//! default "unsupported" bodies. The service never calls a family whose
//! bit is clear, and it re-reads [`FileSystemProvider::capabilities`] at
//! every operation because the set may change at runtime.

mod disk;
mod mem;

pub use disk::{DiskConfig, DiskProvider};
pub use mem::{MemConfig, MemProvider};

use async_trait::async_trait;
use polyfs_types::{
    Capabilities, DeleteOptions, DirEntry, FileChange, Metadata, OverwriteOptions,
    ProviderError, ProviderOpenOptions, ProviderResult, ProviderWriteOptions, ReadOptions,
    Resource, WatchOptions,
};
use tokio::sync::broadcast;

use crate::pipe::PipeReader;

/// A guard for a resource acquired from a provider. Dropping it (or
/// calling [`Disposable::dispose`]) releases the resource exactly once.
pub struct Disposable(Option<Box<dyn FnOnce() + Send>>);

impl Disposable {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(release)))
    }

    /// A disposable that releases nothing.
    pub fn noop() -> Self {
        Self(None)
    }

    pub fn dispose(mut self) {
        if let Some(release) = self.0.take() {
            release();
        }
    }
}

impl Drop for Disposable {
    fn drop(&mut self) {
        if let Some(release) = self.0.take() {
            release();
        }
    }
}

impl std::fmt::Debug for Disposable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disposable").finish()
    }
}

/// Multicast event sources owned by a provider.
///
/// The registry subscribes to these on registration and re-emits through
/// the service bus; subscriptions are torn down on unregister.
pub struct ProviderEvents {
    changes: broadcast::Sender<Vec<FileChange>>,
    capabilities: broadcast::Sender<Capabilities>,
    errors: broadcast::Sender<String>,
}

impl ProviderEvents {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        let (capabilities, _) = broadcast::channel(16);
        let (errors, _) = broadcast::channel(64);
        Self {
            changes,
            capabilities,
            errors,
        }
    }

    pub fn emit_changes(&self, changes: Vec<FileChange>) {
        let _ = self.changes.send(changes);
    }

    pub fn emit_capabilities(&self, capabilities: Capabilities) {
        let _ = self.capabilities.send(capabilities);
    }

    pub fn emit_error(&self, message: impl Into<String>) {
        let _ = self.errors.send(message.into());
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<Vec<FileChange>> {
        self.changes.subscribe()
    }

    pub fn subscribe_capabilities(&self) -> broadcast::Receiver<Capabilities> {
        self.capabilities.subscribe()
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<String> {
        self.errors.subscribe()
    }
}

impl Default for ProviderEvents {
    fn default() -> Self {
        Self::new()
    }
}

/// A filesystem provider for one scheme.
///
/// Required methods cover the families every provider has (`stat`,
/// `readdir`, `mkdir`, `delete`, `rename`, `watch`). Optional families
/// default to [`ProviderError::Unsupported`] and are gated by
/// capability bits:
///
/// - `FILE_READ_WRITE` → [`read_file`](Self::read_file) /
///   [`write_file`](Self::write_file)
/// - `FILE_OPEN_READ_WRITE_CLOSE` → [`open`](Self::open) /
///   [`read`](Self::read) / [`write`](Self::write) /
///   [`close`](Self::close)
/// - `FILE_READ_STREAM` → [`read_stream`](Self::read_stream)
/// - `FILE_FOLDER_COPY` → [`copy`](Self::copy)
///
/// `open` with `create: true` opens for writing, creating the file if
/// missing and truncating it otherwise; `create: false` opens read-only.
/// Positional `read` returns an empty buffer at end of file; positional
/// `write` may accept fewer bytes than offered.
#[async_trait]
pub trait FileSystemProvider: Send + Sync + 'static {
    fn capabilities(&self) -> Capabilities;

    fn events(&self) -> &ProviderEvents;

    async fn stat(&self, resource: &Resource) -> ProviderResult<Metadata>;

    async fn read_dir(&self, resource: &Resource) -> ProviderResult<Vec<DirEntry>>;

    async fn mkdir(&self, resource: &Resource) -> ProviderResult<()>;

    async fn delete(&self, resource: &Resource, options: DeleteOptions) -> ProviderResult<()>;

    async fn rename(
        &self,
        source: &Resource,
        target: &Resource,
        options: OverwriteOptions,
    ) -> ProviderResult<()>;

    async fn copy(
        &self,
        _source: &Resource,
        _target: &Resource,
        _options: OverwriteOptions,
    ) -> ProviderResult<()> {
        Err(ProviderError::Unsupported("copy"))
    }

    async fn read_file(&self, _resource: &Resource) -> ProviderResult<Vec<u8>> {
        Err(ProviderError::Unsupported("read_file"))
    }

    async fn write_file(
        &self,
        _resource: &Resource,
        _content: &[u8],
        _options: ProviderWriteOptions,
    ) -> ProviderResult<()> {
        Err(ProviderError::Unsupported("write_file"))
    }

    async fn open(
        &self,
        _resource: &Resource,
        _options: ProviderOpenOptions,
    ) -> ProviderResult<u64> {
        Err(ProviderError::Unsupported("open"))
    }

    async fn close(&self, _handle: u64) -> ProviderResult<()> {
        Err(ProviderError::Unsupported("close"))
    }

    async fn read(&self, _handle: u64, _position: u64, _length: usize) -> ProviderResult<Vec<u8>> {
        Err(ProviderError::Unsupported("read"))
    }

    async fn write(&self, _handle: u64, _position: u64, _data: &[u8]) -> ProviderResult<usize> {
        Err(ProviderError::Unsupported("write"))
    }

    async fn read_stream(
        &self,
        _resource: &Resource,
        _options: &ReadOptions,
    ) -> ProviderResult<PipeReader> {
        Err(ProviderError::Unsupported("read_stream"))
    }

    async fn watch(
        &self,
        resource: &Resource,
        options: &WatchOptions,
    ) -> ProviderResult<Disposable>;
}
