//! Error surfaces: normalized provider codes and the service taxonomy.
//!
//! Providers report [`ProviderError`], an errno-like code set that can be
//! produced mechanically from `std::io::Error`. Each service pipeline
//! maps provider errors into the [`FileError`] taxonomy at its boundary,
//! attaching the human-readable resource form.

use crate::options::{ReadOptions, WriteOptions};
use crate::resource::Resource;
use thiserror::Error;

/// Normalized error codes surfaced by provider implementations.
///
/// Clone-able by design: raw io errors are stringified on conversion so
/// provider errors can travel through event channels.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("is a directory: {0}")]
    IsDirectory(String),
    #[error("not a directory: {0}")]
    NotDirectory(String),
    #[error("directory not empty: {0}")]
    NotEmpty(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("read-only filesystem")]
    ReadOnly,
    #[error("invalid handle: {0}")]
    BadHandle(u64),
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ProviderError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => ProviderError::NotFound(err.to_string()),
            ErrorKind::AlreadyExists => ProviderError::AlreadyExists(err.to_string()),
            ErrorKind::PermissionDenied => ProviderError::PermissionDenied(err.to_string()),
            ErrorKind::IsADirectory => ProviderError::IsDirectory(err.to_string()),
            ErrorKind::NotADirectory => ProviderError::NotDirectory(err.to_string()),
            ErrorKind::DirectoryNotEmpty => ProviderError::NotEmpty(err.to_string()),
            ErrorKind::ReadOnlyFilesystem => ProviderError::ReadOnly,
            _ => ProviderError::Io(err.to_string()),
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// The service-level error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileErrorKind {
    FileNotFound,
    FileIsDirectory,
    FileNotDirectory,
    FileModifiedSince,
    FileMoveConflict,
    FileTooLarge,
    FileExceedsMemoryLimit,
    FilePermissionDenied,
    FileNotModifiedSince,
    FileInvalidPath,
    NoProvider,
    Unknown,
}

/// Options echoed back on errors raised by read or write validation, so
/// callers can inspect the preconditions that failed.
#[derive(Debug, Clone)]
pub enum ErrorOptions {
    Read(ReadOptions),
    Write(WriteOptions),
}

/// A tagged service error: kind, message, optional options echo.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct FileError {
    kind: FileErrorKind,
    message: String,
    options: Option<ErrorOptions>,
}

impl FileError {
    pub fn new(kind: FileErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            options: None,
        }
    }

    pub fn kind(&self) -> FileErrorKind {
        self.kind
    }

    pub fn options(&self) -> Option<&ErrorOptions> {
        self.options.as_ref()
    }

    pub fn with_read_options(mut self, options: ReadOptions) -> Self {
        self.options = Some(ErrorOptions::Read(options));
        self
    }

    pub fn with_write_options(mut self, options: WriteOptions) -> Self {
        self.options = Some(ErrorOptions::Write(options));
        self
    }

    /// Map a provider error into the taxonomy, attaching the
    /// human-readable resource form and the stringified provider error.
    pub fn from_provider(err: ProviderError, resource: &Resource) -> Self {
        let kind = match &err {
            ProviderError::NotFound(_) => FileErrorKind::FileNotFound,
            ProviderError::IsDirectory(_) => FileErrorKind::FileIsDirectory,
            ProviderError::NotDirectory(_) => FileErrorKind::FileNotDirectory,
            ProviderError::PermissionDenied(_) | ProviderError::ReadOnly => {
                FileErrorKind::FilePermissionDenied
            }
            _ => FileErrorKind::Unknown,
        };
        Self::new(kind, format!("'{}': {}", resource.to_user_string(), err))
    }

    pub fn not_found(resource: &Resource) -> Self {
        Self::new(
            FileErrorKind::FileNotFound,
            format!(
                "unable to resolve nonexistent file '{}'",
                resource.to_user_string()
            ),
        )
    }

    pub fn no_provider(resource: &Resource) -> Self {
        Self::new(
            FileErrorKind::NoProvider,
            format!(
                "no file system provider found for resource '{}'",
                resource.to_user_string()
            ),
        )
    }

    pub fn invalid_path(resource: &Resource) -> Self {
        Self::new(
            FileErrorKind::FileInvalidPath,
            format!(
                "unable to handle resource '{}' without an absolute path",
                resource.to_user_string()
            ),
        )
    }
}

pub type FileResult<T> = Result<T, FileError>;
