//! Option structs for service and provider operations.

use crate::resource::Resource;

/// Limits applied when reading a file into memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeLimits {
    /// Maximum on-disk size in bytes.
    pub size: Option<u64>,
    /// Maximum size in bytes that may be buffered in memory.
    pub memory: Option<u64>,
}

/// Options for `read_file` / `read_file_stream`.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Byte offset to start reading at.
    pub position: Option<u64>,
    /// Maximum number of bytes to read.
    pub length: Option<u64>,
    /// If set (and not [`crate::ETAG_DISABLED`]), fail with
    /// `FileNotModifiedSince` when the current etag matches.
    pub etag: Option<String>,
    pub limits: SizeLimits,
    /// Prefer the unbuffered path even when the provider streams.
    pub prefer_unbuffered: bool,
}

/// Options for `write_file` / `create_file`.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// For `create_file`: replace an existing resource instead of failing.
    pub overwrite: bool,
    /// For `create_file`: the call intends to create the resource.
    pub create: bool,
    /// Dirty-write guard: the mtime the caller last observed.
    pub mtime: Option<u64>,
    /// Dirty-write guard: the etag the caller last observed.
    pub etag: Option<String>,
}

/// Options for `resolve`.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Extra resources whose ancestor chain must be expanded.
    pub resolve_to: Vec<Resource>,
    /// Expand directories that are their parent's only child.
    pub resolve_single_child_descendants: bool,
    /// Carry full metadata on every descendant (one `stat` per child).
    pub resolve_metadata: bool,
}

/// Options for `del`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    pub recursive: bool,
    pub use_trash: bool,
}

/// Options for `watch`. Excludes are opaque to the service; they only
/// contribute to the multiplexer key and are interpreted by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchOptions {
    pub recursive: bool,
    pub excludes: Vec<String>,
}

/// Options a provider receives on `write_file`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderWriteOptions {
    pub create: bool,
    pub overwrite: bool,
}

/// Options a provider receives on `open`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderOpenOptions {
    pub create: bool,
}

/// Options a provider receives on `rename` and `copy`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverwriteOptions {
    pub overwrite: bool,
}
