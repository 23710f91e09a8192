//! The write pipeline.
//!
//! Validates the target (readonly, directory, dirty-write guard),
//! auto-creates missing parent folders, then picks unbuffered or
//! positional-buffered writing. Small readable inputs are coalesced
//! into a single unbuffered write. Every write for a canonical key
//! serializes through the write-queue table.

use std::sync::Arc;

use polyfs_types::{
    etag, FileError, FileErrorKind, FileResult, Metadata, ProviderError, ProviderOpenOptions,
    ProviderWriteOptions, Resource, WriteOptions, ETAG_DISABLED,
};

use crate::pipe::PipeReader;
use crate::provider::FileSystemProvider;
use crate::queue::WriteQueues;
use crate::read::READ_CHUNK_SIZE;

/// How many chunks to eagerly pull from a readable input before falling
/// back to the buffered write path.
const COALESCE_CHUNKS: usize = 3;

/// A pull-style readable input: `read()` yields the next chunk, `None`
/// is the end.
pub trait Readable: Send {
    fn read(&mut self) -> Option<Vec<u8>>;
}

impl<I> Readable for I
where
    I: Iterator<Item = Vec<u8>> + Send,
{
    fn read(&mut self) -> Option<Vec<u8>> {
        self.next()
    }
}

/// The payload of a write: raw bytes, a pull-readable, or the reading
/// end of a byte pipe. All write paths accept all three.
pub enum WriteSource {
    Bytes(Vec<u8>),
    Readable(Box<dyn Readable>),
    Stream(PipeReader),
}

impl WriteSource {
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        Self::Bytes(data.into())
    }

    pub fn readable(readable: impl Readable + 'static) -> Self {
        Self::Readable(Box::new(readable))
    }

    pub fn stream(reader: PipeReader) -> Self {
        Self::Stream(reader)
    }
}

impl std::fmt::Debug for WriteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Self::Readable(_) => f.debug_tuple("Readable").finish(),
            Self::Stream(_) => f.debug_tuple("Stream").finish(),
        }
    }
}

/// Result of eagerly pulling up to [`COALESCE_CHUNKS`] chunks.
enum Coalesced {
    /// The input ended within the window; one unbuffered write suffices.
    Complete(Vec<u8>),
    /// More data remains: the consumed prefix plus the rest.
    Partial(Vec<Vec<u8>>, WriteSource),
}

async fn coalesce(source: WriteSource) -> FileResult<Coalesced> {
    match source {
        WriteSource::Bytes(bytes) => Ok(Coalesced::Complete(bytes)),
        WriteSource::Readable(mut readable) => {
            let mut chunks = Vec::new();
            for _ in 0..COALESCE_CHUNKS {
                match readable.read() {
                    Some(chunk) => chunks.push(chunk),
                    None => return Ok(Coalesced::Complete(chunks.concat())),
                }
            }
            Ok(Coalesced::Partial(chunks, WriteSource::Readable(readable)))
        }
        WriteSource::Stream(mut reader) => {
            let mut chunks = Vec::new();
            for _ in 0..COALESCE_CHUNKS {
                let chunk = reader
                    .read_chunk(READ_CHUNK_SIZE)
                    .await
                    .map_err(stream_error)?;
                if chunk.is_empty() {
                    return Ok(Coalesced::Complete(chunks.concat()));
                }
                chunks.push(chunk);
            }
            Ok(Coalesced::Partial(chunks, WriteSource::Stream(reader)))
        }
    }
}

fn stream_error(err: std::io::Error) -> FileError {
    FileError::new(
        FileErrorKind::Unknown,
        format!("write input stream failed: {err}"),
    )
}

/// Drain a source fully into memory (providers without positional
/// writes take one unbuffered write regardless of input size).
async fn drain(source: WriteSource) -> FileResult<Vec<u8>> {
    match source {
        WriteSource::Bytes(bytes) => Ok(bytes),
        WriteSource::Readable(mut readable) => {
            let mut out = Vec::new();
            while let Some(chunk) = readable.read() {
                out.extend_from_slice(&chunk);
            }
            Ok(out)
        }
        WriteSource::Stream(mut reader) => reader.read_to_end().await.map_err(stream_error),
    }
}

/// Write `source` to `resource`, serialized on the resource's canonical
/// key. The caller re-resolves for the fresh stat.
pub(crate) async fn write_file(
    provider: &Arc<dyn FileSystemProvider>,
    queues: &Arc<WriteQueues>,
    resource: &Resource,
    source: WriteSource,
    options: &WriteOptions,
) -> FileResult<()> {
    let capabilities = provider.capabilities();
    if capabilities.is_readonly() {
        return Err(FileError::new(
            FileErrorKind::FilePermissionDenied,
            format!(
                "unable to modify read-only file '{}'",
                resource.to_user_string()
            ),
        )
        .with_write_options(options.clone()));
    }

    let key = resource.canonical_key(capabilities.is_case_sensitive());
    let _guard = queues.enqueue(key).await;

    let existing = validate_write(provider.as_ref(), resource, options).await?;

    if existing.is_none()
        && let Some(parent) = resource.parent()
    {
        mkdirp(provider.as_ref(), &parent).await?;
    }

    let unbuffered = capabilities.supports_unbuffered();
    let positional = capabilities.supports_open_read_write_close();

    match (unbuffered, positional) {
        (true, false) => {
            let bytes = drain(source).await?;
            write_unbuffered(provider.as_ref(), resource, &bytes).await
        }
        (false, true) => write_buffered(provider.as_ref(), resource, Vec::new(), Some(source)).await,
        (true, true) => match coalesce(source).await? {
            Coalesced::Complete(bytes) => {
                write_unbuffered(provider.as_ref(), resource, &bytes).await
            }
            Coalesced::Partial(prefix, rest) => {
                write_buffered(provider.as_ref(), resource, prefix, Some(rest)).await
            }
        },
        (false, false) => Err(FileError::new(
            FileErrorKind::Unknown,
            "provider advertises no write capability",
        )),
    }
}

/// Check the write target: directories are rejected, and the caller's
/// `(mtime, etag)` snapshot guards against overwriting foreign changes.
/// Returns the current metadata, or `None` when the file does not exist
/// yet.
async fn validate_write(
    provider: &dyn FileSystemProvider,
    resource: &Resource,
    options: &WriteOptions,
) -> FileResult<Option<Metadata>> {
    let meta = match provider.stat(resource).await {
        Ok(meta) => meta,
        Err(ProviderError::NotFound(_)) => return Ok(None),
        Err(err) => return Err(FileError::from_provider(err, resource)),
    };

    if meta.is_directory() {
        return Err(FileError::new(
            FileErrorKind::FileIsDirectory,
            format!(
                "unable to write file '{}' that is actually a directory",
                resource.to_user_string()
            ),
        ));
    }

    // Dirty-write guard: rejects only when the mtime advanced and the
    // etag recomputed under (options.mtime, current size) disagrees
    // with the caller's snapshot.
    if let (Some(mtime), Some(tag)) = (options.mtime, &options.etag)
        && tag != ETAG_DISABLED
        && meta.mtime > mtime
        && etag(mtime, meta.size) != *tag
    {
        return Err(FileError::new(
            FileErrorKind::FileModifiedSince,
            format!(
                "file '{}' has changed in the meantime",
                resource.to_user_string()
            ),
        )
        .with_write_options(options.clone()));
    }

    Ok(Some(meta))
}

async fn write_unbuffered(
    provider: &dyn FileSystemProvider,
    resource: &Resource,
    bytes: &[u8],
) -> FileResult<()> {
    provider
        .write_file(
            resource,
            bytes,
            ProviderWriteOptions {
                create: true,
                overwrite: true,
            },
        )
        .await
        .map_err(|err| FileError::from_provider(err, resource))
}

/// Positional write: open with create, stream every chunk through
/// [`write_chunk`], close on every exit path.
async fn write_buffered(
    provider: &dyn FileSystemProvider,
    resource: &Resource,
    prefix: Vec<Vec<u8>>,
    rest: Option<WriteSource>,
) -> FileResult<()> {
    let handle = provider
        .open(resource, ProviderOpenOptions { create: true })
        .await
        .map_err(|err| FileError::from_provider(err, resource))?;

    let result = async {
        let mut position = 0u64;
        for chunk in prefix {
            position = write_chunk(provider, resource, handle, position, &chunk).await?;
        }

        match rest {
            None => {}
            Some(WriteSource::Bytes(bytes)) => {
                write_chunk(provider, resource, handle, position, &bytes).await?;
            }
            Some(WriteSource::Readable(mut readable)) => {
                while let Some(chunk) = readable.read() {
                    position = write_chunk(provider, resource, handle, position, &chunk).await?;
                }
            }
            Some(WriteSource::Stream(mut reader)) => loop {
                // One chunk per turn: consume, write, then pull again so
                // the positional write applies backpressure to the pipe.
                let chunk = reader
                    .read_chunk(READ_CHUNK_SIZE)
                    .await
                    .map_err(stream_error)?;
                if chunk.is_empty() {
                    break;
                }
                position = write_chunk(provider, resource, handle, position, &chunk).await?;
            },
        }
        Ok(())
    }
    .await;

    let closed = provider.close(handle).await;
    result?;
    closed.map_err(|err| FileError::from_provider(err, resource))
}

/// Write one chunk, re-entering on short writes until it is fully
/// consumed. Returns the advanced file position.
pub(crate) async fn write_chunk(
    provider: &dyn FileSystemProvider,
    resource: &Resource,
    handle: u64,
    mut position: u64,
    chunk: &[u8],
) -> FileResult<u64> {
    let mut offset = 0;
    while offset < chunk.len() {
        let written = provider
            .write(handle, position, &chunk[offset..])
            .await
            .map_err(|err| FileError::from_provider(err, resource))?;
        if written == 0 {
            return Err(FileError::new(
                FileErrorKind::Unknown,
                format!(
                    "write to '{}' made no progress",
                    resource.to_user_string()
                ),
            ));
        }
        offset += written;
        position += written as u64;
    }
    Ok(position)
}

/// Create `directory` and any missing ancestors.
///
/// Climbs upward while `stat` reports not-found, stops at the first
/// existing directory, fails on an existing non-directory, and then
/// creates the collected levels top-down.
pub(crate) async fn mkdirp(
    provider: &dyn FileSystemProvider,
    directory: &Resource,
) -> FileResult<()> {
    let mut to_create: Vec<Resource> = Vec::new();
    let mut current = directory.clone();

    loop {
        match provider.stat(&current).await {
            Ok(meta) if meta.is_directory() => break,
            Ok(_) => {
                return Err(FileError::new(
                    FileErrorKind::FileNotDirectory,
                    format!(
                        "unable to create folder '{}' that already exists but is not a directory",
                        current.to_user_string()
                    ),
                ));
            }
            Err(ProviderError::NotFound(_)) => {
                to_create.push(current.clone());
                match current.parent() {
                    Some(parent) => current = parent,
                    None => break,
                }
            }
            Err(err) => return Err(FileError::from_provider(err, &current)),
        }
    }

    for dir in to_create.into_iter().rev() {
        match provider.mkdir(&dir).await {
            Ok(()) => {}
            // Lost a race with a concurrent mkdirp; the level exists.
            Err(ProviderError::AlreadyExists(_)) => {}
            Err(err) => return Err(FileError::from_provider(err, &dir)),
        }
    }
    Ok(())
}
