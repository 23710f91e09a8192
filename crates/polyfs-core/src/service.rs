//! The `FileService` façade.
//!
//! One service instance owns the provider registry, the per-resource
//! write queues, the watcher table, and the event bus, and coordinates
//! the pipelines in the sibling modules. Operations are
//! resource-addressed; the registered provider for the resource's
//! scheme does the actual I/O.

use std::sync::Arc;

use polyfs_types::{
    Capabilities, CapabilityChangeEvent, FileChange, FileError, FileErrorKind, FileOperation,
    FileResult, FileStat, OperationEvent, ReadOptions, RegistrationEvent, ResolveOptions,
    Resource, WatchOptions, WriteOptions,
};
use tokio::sync::broadcast;

use crate::events::EventBus;
use crate::provider::FileSystemProvider;
use crate::queue::WriteQueues;
use crate::read::{self, FileContent, FileStreamContent};
use crate::registry::{ActivationParticipant, ProviderRegistry, RegistrationHandle};
use crate::resolver;
use crate::watch::{WatchHandle, WatcherTable};
use crate::write::{self, WriteSource};

/// One entry's outcome in [`FileService::resolve_all`].
#[derive(Debug)]
pub struct ResolveResult {
    pub stat: Option<FileStat>,
    pub success: bool,
}

/// The virtual filesystem service: a uniform, scheme-addressed façade
/// over pluggable filesystem providers.
pub struct FileService {
    pub(crate) registry: Arc<ProviderRegistry>,
    pub(crate) queues: Arc<WriteQueues>,
    pub(crate) watchers: Arc<WatcherTable>,
    pub(crate) events: Arc<EventBus>,
}

impl FileService {
    pub fn new() -> Self {
        let events = Arc::new(EventBus::new());
        Self {
            registry: Arc::new(ProviderRegistry::new(events.clone())),
            queues: Arc::new(WriteQueues::new()),
            watchers: Arc::new(WatcherTable::new()),
            events,
        }
    }

    // ═══════════════════════════════════════════════════════════════
    // Providers
    // ═══════════════════════════════════════════════════════════════

    /// Bind a provider to a scheme. Fails if the scheme is taken.
    pub fn register_provider(
        &self,
        scheme: &str,
        provider: Arc<dyn FileSystemProvider>,
    ) -> FileResult<RegistrationHandle> {
        self.registry.register(scheme, provider)
    }

    /// Register a party that joins provider activation (typically to
    /// lazily register a provider the first time its scheme is used).
    pub fn register_activation_participant(&self, participant: Arc<dyn ActivationParticipant>) {
        self.registry.register_activation_participant(participant);
    }

    /// Fire will-activate for the scheme and await all participants.
    pub async fn activate_provider(&self, scheme: &str) {
        self.registry.activate(scheme).await;
    }

    /// Whether a provider is registered for the resource's scheme,
    /// after running activation.
    pub async fn can_handle_resource(&self, resource: &Resource) -> bool {
        self.registry.activate(resource.scheme()).await;
        self.registry.can_handle_resource(resource)
    }

    pub fn has_provider(&self, resource: &Resource) -> bool {
        self.registry.has_provider(resource.scheme())
    }

    pub fn has_capability(&self, resource: &Resource, capability: Capabilities) -> bool {
        self.registry.has_capability(resource, capability)
    }

    /// Registered schemes and their current capability sets.
    pub fn list_capabilities(&self) -> Vec<(String, Capabilities)> {
        self.registry.list_capabilities()
    }

    // ═══════════════════════════════════════════════════════════════
    // Events
    // ═══════════════════════════════════════════════════════════════

    pub fn on_did_change_registrations(&self) -> broadcast::Receiver<RegistrationEvent> {
        self.events.subscribe_registrations()
    }

    pub fn on_did_change_capabilities(&self) -> broadcast::Receiver<CapabilityChangeEvent> {
        self.events.subscribe_capability_changes()
    }

    /// Post-operation events: fired after the provider call completes,
    /// before the operation returns to the caller.
    pub fn on_after_operation(&self) -> broadcast::Receiver<OperationEvent> {
        self.events.subscribe_operations()
    }

    pub fn on_file_changes(&self) -> broadcast::Receiver<Vec<FileChange>> {
        self.events.subscribe_changes()
    }

    pub fn on_error(&self) -> broadcast::Receiver<FileError> {
        self.events.subscribe_errors()
    }

    // ═══════════════════════════════════════════════════════════════
    // Resolution
    // ═══════════════════════════════════════════════════════════════

    /// Resolve a resource into a `FileStat` tree.
    pub async fn resolve(
        &self,
        resource: &Resource,
        options: &ResolveOptions,
    ) -> FileResult<FileStat> {
        let result = self.do_resolve(resource, options).await;
        self.report(result)
    }

    async fn do_resolve(
        &self,
        resource: &Resource,
        options: &ResolveOptions,
    ) -> FileResult<FileStat> {
        let provider = self.registry.with_provider(resource).await?;
        resolver::resolve_stat(provider.as_ref(), resource, options).await
    }

    /// Resolve many entries independently; per-entry failures are
    /// logged and reported, never propagated.
    pub async fn resolve_all(
        &self,
        entries: &[(Resource, ResolveOptions)],
    ) -> Vec<ResolveResult> {
        let mut results = Vec::with_capacity(entries.len());
        for (resource, options) in entries {
            match self.do_resolve(resource, options).await {
                Ok(stat) => results.push(ResolveResult {
                    stat: Some(stat),
                    success: true,
                }),
                Err(err) => {
                    tracing::warn!("failed to resolve '{resource}': {err}");
                    results.push(ResolveResult {
                        stat: None,
                        success: false,
                    });
                }
            }
        }
        results
    }

    /// Whether the resource exists. Any error reads as `false`.
    pub async fn exists(&self, resource: &Resource) -> bool {
        self.do_resolve(resource, &ResolveOptions::default())
            .await
            .is_ok()
    }

    // ═══════════════════════════════════════════════════════════════
    // Reading
    // ═══════════════════════════════════════════════════════════════

    pub async fn read_file(
        &self,
        resource: &Resource,
        options: &ReadOptions,
    ) -> FileResult<FileContent> {
        let result = async {
            let provider = self.registry.with_provider(resource).await?;
            read::read_file(&provider, resource, options).await
        }
        .await;
        self.report(result)
    }

    pub async fn read_file_stream(
        &self,
        resource: &Resource,
        options: &ReadOptions,
    ) -> FileResult<FileStreamContent> {
        let result = async {
            let provider = self.registry.with_provider(resource).await?;
            read::read_file_stream(&provider, resource, options).await
        }
        .await;
        self.report(result)
    }

    // ═══════════════════════════════════════════════════════════════
    // Writing
    // ═══════════════════════════════════════════════════════════════

    /// Write `source` to `resource`, creating the file and any missing
    /// parent folders. Returns the fresh stat.
    pub async fn write_file(
        &self,
        resource: &Resource,
        source: WriteSource,
        options: &WriteOptions,
    ) -> FileResult<FileStat> {
        let result = self.do_write_file(resource, source, options).await;
        let stat = self.report(result)?;
        self.emit_operation(resource, FileOperation::Write, Some(stat.clone()));
        Ok(stat)
    }

    /// Create a new file. Fails when the target exists unless
    /// `options.overwrite` is set.
    pub async fn create_file(
        &self,
        resource: &Resource,
        source: WriteSource,
        options: &WriteOptions,
    ) -> FileResult<FileStat> {
        let result = async {
            self.validate_create_file(resource, options).await?;
            self.do_write_file(resource, source, options).await
        }
        .await;
        let stat = self.report(result)?;
        self.emit_operation(resource, FileOperation::Create, Some(stat.clone()));
        Ok(stat)
    }

    pub(crate) async fn validate_create_file(
        &self,
        resource: &Resource,
        options: &WriteOptions,
    ) -> FileResult<()> {
        if !options.overwrite && self.exists(resource).await {
            return Err(FileError::new(
                FileErrorKind::FileModifiedSince,
                format!(
                    "unable to create file '{}' that already exists when overwrite has not been set",
                    resource.to_user_string()
                ),
            )
            .with_write_options(options.clone()));
        }
        Ok(())
    }

    async fn do_write_file(
        &self,
        resource: &Resource,
        source: WriteSource,
        options: &WriteOptions,
    ) -> FileResult<FileStat> {
        let provider = self.registry.with_provider(resource).await?;
        write::write_file(&provider, &self.queues, resource, source, options).await?;
        self.resolve_with_metadata(resource).await
    }

    /// Create a folder, including missing ancestors.
    pub async fn create_folder(&self, resource: &Resource) -> FileResult<FileStat> {
        let result = async {
            let provider = self.registry.with_provider(resource).await?;
            write::mkdirp(provider.as_ref(), resource).await?;
            self.resolve_with_metadata(resource).await
        }
        .await;
        let stat = self.report(result)?;
        self.emit_operation(resource, FileOperation::Create, Some(stat.clone()));
        Ok(stat)
    }

    // ═══════════════════════════════════════════════════════════════
    // Watching
    // ═══════════════════════════════════════════════════════════════

    /// Subscribe to change events for a resource. Subscriptions with
    /// the same key share one underlying provider watch.
    pub async fn watch(
        &self,
        resource: &Resource,
        options: WatchOptions,
    ) -> FileResult<WatchHandle> {
        let result = async {
            let provider = self.registry.with_provider(resource).await?;
            Ok(self.watchers.watch(provider, resource, options))
        }
        .await;
        self.report(result)
    }

    /// Tear down all watches and provider registrations.
    pub fn dispose(&self) {
        self.watchers.dispose_all();
        self.registry.dispose();
    }

    // ═══════════════════════════════════════════════════════════════
    // Internals shared with the transfer module
    // ═══════════════════════════════════════════════════════════════

    pub(crate) async fn resolve_with_metadata(&self, resource: &Resource) -> FileResult<FileStat> {
        self.do_resolve(
            resource,
            &ResolveOptions {
                resolve_metadata: true,
                ..Default::default()
            },
        )
        .await
    }

    pub(crate) fn emit_operation(
        &self,
        resource: &Resource,
        operation: FileOperation,
        stat: Option<FileStat>,
    ) {
        self.events.emit_operation(OperationEvent {
            resource: resource.clone(),
            operation,
            stat,
        });
    }

    /// Fire `on_error` for failures on their way out to the caller.
    pub(crate) fn report<T>(&self, result: FileResult<T>) -> FileResult<T> {
        if let Err(err) = &result {
            self.events.emit_error(err.clone());
        }
        result
    }
}

impl Default for FileService {
    fn default() -> Self {
        Self::new()
    }
}
