//! polyfs-core: a scheme-addressed virtual filesystem service.
//!
//! One [`FileService`] fronts any number of filesystem providers, each
//! registered for a URI scheme. The service adapts between a provider's
//! declared capability set and the requested operation:
//!
//! ```text
//! caller ──▶ FileService
//!               ├── registry: scheme → provider (+ activation)
//!               ├── capability probe per call
//!               ├── pipelines: resolve / read / write / move-copy / delete
//!               │     ├── write queue: FIFO per canonical resource key
//!               │     └── byte pipes across provider capability pairs
//!               ├── watcher multiplexer (refcounted per key)
//!               └── event bus: registrations, capabilities,
//!                   post-operation, file changes, errors
//! ```
//!
//! Two reference providers ship in-tree: [`MemProvider`] (ephemeral,
//! capability-mask configurable) and [`DiskProvider`] (rooted on the
//! local filesystem).

pub mod events;
pub mod pipe;
pub mod provider;
pub mod queue;
pub mod registry;
mod read;
mod resolver;
pub mod service;
mod transfer;
pub mod watch;
mod write;

// Re-export the shared type crate under a stable name.
pub use polyfs_types as types;

pub use events::EventBus;
pub use pipe::{byte_pipe, byte_pipe_default, PipeReader, PipeWriter, PIPE_BUFFER_SIZE};
pub use provider::{
    DiskConfig, DiskProvider, Disposable, FileSystemProvider, MemConfig, MemProvider,
    ProviderEvents,
};
pub use queue::{WriteGuard, WriteQueues};
pub use read::{FileContent, FileStreamContent};
pub use registry::{ActivationParticipant, ProviderRegistry, RegistrationHandle};
pub use service::{FileService, ResolveResult};
pub use watch::{WatchHandle, WatcherTable};
pub use write::{Readable, WriteSource};

// Flat re-exports of the commonly used types.
pub use polyfs_types::{
    etag, Capabilities, CapabilityChangeEvent, DeleteOptions, DirEntry, ErrorOptions, FileChange,
    FileChangeKind, FileError, FileErrorKind, FileOperation, FileResult, FileStat, FileType,
    Metadata, OperationEvent, ProviderError, ProviderOpenOptions, ProviderResult,
    ProviderWriteOptions, ReadOptions, RegistrationEvent, ResolveOptions, Resource, SizeLimits,
    WatchOptions, WriteOptions, ETAG_DISABLED,
};
