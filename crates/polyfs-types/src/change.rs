//! Event payload types: file changes, operations, registrations.

use crate::capabilities::Capabilities;
use crate::resource::Resource;
use crate::stat::FileStat;

/// What happened to a watched resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeKind {
    Created,
    Changed,
    Deleted,
}

/// A single change notification. Providers deliver these in batches.
#[derive(Debug, Clone)]
pub struct FileChange {
    pub resource: Resource,
    pub kind: FileChangeKind,
}

/// The operation a post-operation event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOperation {
    Create,
    Write,
    Delete,
    Move,
    Copy,
}

/// Fired after a mutating service operation completes.
#[derive(Debug, Clone)]
pub struct OperationEvent {
    /// The resource the operation was addressed to (the source for
    /// move/copy).
    pub resource: Resource,
    pub operation: FileOperation,
    /// The resulting stat, when the operation produces one (create,
    /// write, move, copy).
    pub stat: Option<FileStat>,
}

/// Fired when a provider is registered or unregistered.
#[derive(Debug, Clone)]
pub struct RegistrationEvent {
    pub scheme: String,
    pub added: bool,
}

/// Fired when a registered provider's capability set changes.
#[derive(Debug, Clone)]
pub struct CapabilityChangeEvent {
    pub scheme: String,
    pub capabilities: Capabilities,
}
