//! The read pipeline.
//!
//! Selects unbuffered, streamed, or positional-buffered reading from the
//! provider's capability set, enforces etag/limit preconditions, and
//! wraps everything in a unified error surface. Each operation owns a
//! cancellation token, cancelled on any validation or pipe error so
//! in-flight reads short-circuit.

use polyfs_types::{
    etag, Capabilities, FileError, FileErrorKind, FileResult, FileStat, ProviderError,
    ReadOptions, Resource, ETAG_DISABLED,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::pipe::{byte_pipe_default, PipeReader};
use crate::provider::FileSystemProvider;

/// Chunk size for positional read loops.
pub(crate) const READ_CHUNK_SIZE: usize = 64 * 1024;

/// A fully buffered file read: the stat plus the bytes.
#[derive(Debug)]
pub struct FileContent {
    pub stat: FileStat,
    pub value: Vec<u8>,
}

/// A streaming file read: the stat plus the reader end of a byte pipe.
#[derive(Debug)]
pub struct FileStreamContent {
    pub stat: FileStat,
    pub value: PipeReader,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ReadPath {
    Unbuffered,
    Streamed,
    Positional,
}

/// First capability match wins: a provider that can only do unbuffered
/// reads gets them, `prefer_unbuffered` forces them, then streaming,
/// then positional.
fn pick_read_path(capabilities: Capabilities, options: &ReadOptions) -> FileResult<ReadPath> {
    let unbuffered = capabilities.supports_unbuffered();
    let streamed = capabilities.supports_read_stream();
    let positional = capabilities.supports_open_read_write_close();

    if unbuffered && (options.prefer_unbuffered || (!streamed && !positional)) {
        Ok(ReadPath::Unbuffered)
    } else if streamed {
        Ok(ReadPath::Streamed)
    } else if positional {
        Ok(ReadPath::Positional)
    } else if unbuffered {
        Ok(ReadPath::Unbuffered)
    } else {
        Err(FileError::new(
            FileErrorKind::Unknown,
            "provider advertises no read capability",
        ))
    }
}

fn etag_specified(options: &ReadOptions) -> bool {
    matches!(&options.etag, Some(tag) if tag != ETAG_DISABLED)
}

/// Stat the resource and check the read preconditions.
async fn validate_read(
    provider: &dyn FileSystemProvider,
    resource: &Resource,
    options: &ReadOptions,
) -> FileResult<FileStat> {
    let meta = provider.stat(resource).await.map_err(|err| match err {
        ProviderError::NotFound(_) => FileError::not_found(resource),
        other => FileError::from_provider(other, resource),
    })?;

    if meta.is_directory() {
        return Err(FileError::new(
            FileErrorKind::FileIsDirectory,
            format!(
                "unable to read file '{}' that is actually a directory",
                resource.to_user_string()
            ),
        ));
    }

    if let Some(tag) = &options.etag
        && tag != ETAG_DISABLED
        && *tag == etag(meta.mtime, meta.size)
    {
        return Err(FileError::new(
            FileErrorKind::FileNotModifiedSince,
            format!("file '{}' not modified since", resource.to_user_string()),
        )
        .with_read_options(options.clone()));
    }

    if let Some(limit) = options.limits.memory
        && meta.size > limit
    {
        return Err(FileError::new(
            FileErrorKind::FileExceedsMemoryLimit,
            format!(
                "file '{}' exceeds the memory limit ({} > {limit} bytes)",
                resource.to_user_string(),
                meta.size
            ),
        )
        .with_read_options(options.clone()));
    }

    if let Some(limit) = options.limits.size
        && meta.size > limit
    {
        return Err(FileError::new(
            FileErrorKind::FileTooLarge,
            format!(
                "file '{}' is too large ({} > {limit} bytes)",
                resource.to_user_string(),
                meta.size
            ),
        )
        .with_read_options(options.clone()));
    }

    Ok(FileStat::with_metadata(resource.clone(), meta))
}

/// Honor `position`/`length` on an already buffered payload.
fn slice_buffer(bytes: Vec<u8>, options: &ReadOptions) -> Vec<u8> {
    let len = bytes.len() as u64;
    let start = options.position.unwrap_or(0).min(len);
    let end = match options.length {
        Some(length) => start.saturating_add(length).min(len),
        None => len,
    };
    bytes[start as usize..end as usize].to_vec()
}

/// Positional read loop: open, read 64 KiB chunks until EOF or
/// `length` is satisfied, close on every exit path.
pub(crate) async fn read_buffered_bytes(
    provider: &dyn FileSystemProvider,
    resource: &Resource,
    options: &ReadOptions,
    token: &CancellationToken,
) -> FileResult<Vec<u8>> {
    let handle = provider
        .open(resource, Default::default())
        .await
        .map_err(|err| FileError::from_provider(err, resource))?;

    let result = read_loop(provider, resource, handle, options, token).await;
    let closed = provider.close(handle).await;

    let bytes = result?;
    closed.map_err(|err| FileError::from_provider(err, resource))?;
    Ok(bytes)
}

async fn read_loop(
    provider: &dyn FileSystemProvider,
    resource: &Resource,
    handle: u64,
    options: &ReadOptions,
    token: &CancellationToken,
) -> FileResult<Vec<u8>> {
    let mut position = options.position.unwrap_or(0);
    let mut remaining = options.length;
    let mut buffer = Vec::new();

    loop {
        if token.is_cancelled() {
            return Err(FileError::new(
                FileErrorKind::Unknown,
                format!("read of '{}' was cancelled", resource.to_user_string()),
            ));
        }

        let chunk_len = match remaining {
            Some(0) => break,
            Some(n) => READ_CHUNK_SIZE.min(n as usize),
            None => READ_CHUNK_SIZE,
        };

        let chunk = provider
            .read(handle, position, chunk_len)
            .await
            .map_err(|err| FileError::from_provider(err, resource))?;
        if chunk.is_empty() {
            break;
        }

        position += chunk.len() as u64;
        if let Some(n) = remaining {
            remaining = Some(n - chunk.len() as u64);
        }
        buffer.extend_from_slice(&chunk);
    }

    Ok(buffer)
}

async fn read_bytes(
    provider: &dyn FileSystemProvider,
    resource: &Resource,
    options: &ReadOptions,
    token: &CancellationToken,
) -> FileResult<Vec<u8>> {
    match pick_read_path(provider.capabilities(), options)? {
        ReadPath::Unbuffered => {
            let bytes = provider
                .read_file(resource)
                .await
                .map_err(|err| FileError::from_provider(err, resource))?;
            Ok(slice_buffer(bytes, options))
        }
        ReadPath::Streamed => {
            let mut reader = provider
                .read_stream(resource, options)
                .await
                .map_err(|err| FileError::from_provider(err, resource))?;
            reader.read_to_end().await.map_err(|err| {
                FileError::new(
                    FileErrorKind::Unknown,
                    format!(
                        "unable to read stream for '{}': {err}",
                        resource.to_user_string()
                    ),
                )
            })
        }
        ReadPath::Positional => read_buffered_bytes(provider, resource, options, token).await,
    }
}

/// Read a file fully into memory.
pub(crate) async fn read_file(
    provider: &Arc<dyn FileSystemProvider>,
    resource: &Resource,
    options: &ReadOptions,
) -> FileResult<FileContent> {
    let token = CancellationToken::new();

    let result = if etag_specified(options) {
        // The etag precondition must settle before any bytes move.
        match validate_read(provider.as_ref(), resource, options).await {
            Ok(stat) => read_bytes(provider.as_ref(), resource, options, &token)
                .await
                .map(|value| FileContent { stat, value }),
            Err(err) => Err(err),
        }
    } else {
        let (stat, value) = tokio::join!(
            validate_read(provider.as_ref(), resource, options),
            read_bytes(provider.as_ref(), resource, options, &token),
        );
        match (stat, value) {
            (Ok(stat), Ok(value)) => Ok(FileContent { stat, value }),
            (Err(err), _) => Err(err),
            (_, Err(err)) => Err(err),
        }
    };

    if result.is_err() {
        token.cancel();
    }
    result
}

/// Read a file as a byte stream fed by a background driver.
pub(crate) async fn read_file_stream(
    provider: &Arc<dyn FileSystemProvider>,
    resource: &Resource,
    options: &ReadOptions,
) -> FileResult<FileStreamContent> {
    let token = CancellationToken::new();

    let result = if etag_specified(options) {
        match validate_read(provider.as_ref(), resource, options).await {
            Ok(stat) => open_stream(provider, resource, options, &token)
                .await
                .map(|value| FileStreamContent { stat, value }),
            Err(err) => Err(err),
        }
    } else {
        let (stat, value) = tokio::join!(
            validate_read(provider.as_ref(), resource, options),
            open_stream(provider, resource, options, &token),
        );
        match (stat, value) {
            (Ok(stat), Ok(value)) => Ok(FileStreamContent { stat, value }),
            (Err(err), _) => Err(err),
            (_, Err(err)) => Err(err),
        }
    };

    if result.is_err() {
        token.cancel();
    }
    result
}

/// Open/read/close driver feeding a pipe chunk by chunk, so a slow
/// consumer exerts backpressure on the provider reads.
async fn drive_positional_stream(
    provider: &dyn FileSystemProvider,
    resource: &Resource,
    options: &ReadOptions,
    token: &CancellationToken,
    writer: &crate::pipe::PipeWriter,
) -> FileResult<()> {
    let handle = provider
        .open(resource, Default::default())
        .await
        .map_err(|err| FileError::from_provider(err, resource))?;

    let result = async {
        let mut position = options.position.unwrap_or(0);
        let mut remaining = options.length;
        loop {
            if token.is_cancelled() {
                return Err(FileError::new(
                    FileErrorKind::Unknown,
                    format!("read of '{}' was cancelled", resource.to_user_string()),
                ));
            }

            let chunk_len = match remaining {
                Some(0) => break,
                Some(n) => READ_CHUNK_SIZE.min(n as usize),
                None => READ_CHUNK_SIZE,
            };

            let chunk = provider
                .read(handle, position, chunk_len)
                .await
                .map_err(|err| FileError::from_provider(err, resource))?;
            if chunk.is_empty() {
                break;
            }

            position += chunk.len() as u64;
            if let Some(n) = remaining {
                remaining = Some(n - chunk.len() as u64);
            }
            if writer.write_all_bytes(&chunk).await.is_err() {
                // Reader went away; stop quietly.
                break;
            }
        }
        Ok(())
    }
    .await;

    let closed = provider.close(handle).await;
    result?;
    closed.map_err(|err| FileError::from_provider(err, resource))
}

async fn open_stream(
    provider: &Arc<dyn FileSystemProvider>,
    resource: &Resource,
    options: &ReadOptions,
    token: &CancellationToken,
) -> FileResult<PipeReader> {
    match pick_read_path(provider.capabilities(), options)? {
        ReadPath::Streamed => provider
            .read_stream(resource, options)
            .await
            .map_err(|err| FileError::from_provider(err, resource)),
        ReadPath::Unbuffered => {
            let bytes = provider
                .read_file(resource)
                .await
                .map_err(|err| FileError::from_provider(err, resource))?;
            let bytes = slice_buffer(bytes, options);
            let (writer, reader) = byte_pipe_default();
            tokio::spawn(async move {
                let _ = writer.write_all_bytes(&bytes).await;
            });
            Ok(reader)
        }
        ReadPath::Positional => {
            let (writer, reader) = byte_pipe_default();
            let provider = provider.clone();
            let resource = resource.clone();
            let options = options.clone();
            let token = token.clone();
            tokio::spawn(async move {
                if let Err(err) =
                    drive_positional_stream(provider.as_ref(), &resource, &options, &token, &writer)
                        .await
                {
                    writer.abort(err.to_string());
                }
            });
            Ok(reader)
        }
    }
}
