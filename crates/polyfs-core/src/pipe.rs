//! Bounded byte pipe with backpressure for streaming pipelines.
//!
//! The writer blocks when the buffer is full, matching OS pipe semantics
//! with a 64 KiB default buffer.
//!
//! ```text
//!   PipeWriter ──▶ [VecDeque<u8> ring buffer] ──▶ PipeReader
//!                  ├── writer waits when full (backpressure)
//!                  ├── reader waits when empty
//!                  ├── drop writer → EOF (reader sees empty chunk)
//!                  ├── drop reader → broken pipe (writer errors)
//!                  └── abort(msg) → reader errors once drained
//! ```

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

/// Default pipe buffer capacity.
pub const PIPE_BUFFER_SIZE: usize = 64 * 1024;

struct PipeInner {
    buffer: VecDeque<u8>,
    capacity: usize,
    /// Writer has been dropped or shut down (EOF once drained).
    writer_closed: bool,
    /// Reader has been dropped (broken pipe).
    reader_closed: bool,
    /// Writer aborted with an error; surfaced to the reader after the
    /// buffered bytes are drained.
    failed: Option<String>,
}

struct PipeShared {
    inner: Mutex<PipeInner>,
    /// Notified when data arrives, space frees up, or an end closes.
    notify: Notify,
}

/// Writing end of a byte pipe.
pub struct PipeWriter {
    shared: Arc<PipeShared>,
}

/// Reading end of a byte pipe.
pub struct PipeReader {
    shared: Arc<PipeShared>,
}

/// Create a bounded byte pipe with the given capacity.
pub fn byte_pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let shared = Arc::new(PipeShared {
        inner: Mutex::new(PipeInner {
            buffer: VecDeque::with_capacity(capacity.min(8192)),
            capacity,
            writer_closed: false,
            reader_closed: false,
            failed: None,
        }),
        notify: Notify::new(),
    });

    (
        PipeWriter {
            shared: shared.clone(),
        },
        PipeReader { shared },
    )
}

/// Create a byte pipe with the default 64 KiB capacity.
pub fn byte_pipe_default() -> (PipeWriter, PipeReader) {
    byte_pipe(PIPE_BUFFER_SIZE)
}

impl PipeWriter {
    /// Write data into the pipe, waiting while the buffer is full.
    ///
    /// Returns the number of bytes accepted, or an error once the reader
    /// has been dropped.
    pub async fn write_bytes(&self, data: &[u8]) -> io::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }

        loop {
            let notified = self.shared.notify.notified();
            {
                let mut inner = self.shared.inner.lock().unwrap();

                if inner.reader_closed {
                    return Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "pipe reader closed",
                    ));
                }

                let available = inner.capacity.saturating_sub(inner.buffer.len());
                if available > 0 {
                    let to_write = data.len().min(available);
                    inner.buffer.extend(&data[..to_write]);
                    self.shared.notify.notify_waiters();
                    return Ok(to_write);
                }
            }

            // Buffer is full, wait for the reader to consume.
            notified.await;
        }
    }

    /// Write all of `data`, looping over partial writes.
    pub async fn write_all_bytes(&self, data: &[u8]) -> io::Result<()> {
        let mut written = 0;
        while written < data.len() {
            written += self.write_bytes(&data[written..]).await?;
        }
        Ok(())
    }

    /// Terminate the pipe with an error. Bytes already buffered remain
    /// readable; after draining them the reader observes the error.
    pub fn abort(self, message: impl Into<String>) {
        let mut inner = self.shared.inner.lock().unwrap();
        inner.failed = Some(message.into());
        inner.writer_closed = true;
        self.shared.notify.notify_waiters();
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock().unwrap();
        inner.writer_closed = true;
        self.shared.notify.notify_waiters();
    }
}

impl PipeReader {
    /// Read up to `max` bytes. An empty chunk means EOF.
    pub async fn read_chunk(&mut self, max: usize) -> io::Result<Vec<u8>> {
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut inner = self.shared.inner.lock().unwrap();

                if !inner.buffer.is_empty() {
                    let to_read = max.min(inner.buffer.len());
                    let chunk: Vec<u8> = inner.buffer.drain(..to_read).collect();
                    self.shared.notify.notify_waiters();
                    return Ok(chunk);
                }

                if let Some(message) = &inner.failed {
                    return Err(io::Error::other(message.clone()));
                }

                if inner.writer_closed {
                    return Ok(Vec::new());
                }
            }

            // Empty but the writer is still live, wait for data.
            notified.await;
        }
    }

    /// Drain the pipe to EOF, collecting everything.
    pub async fn read_to_end(&mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let chunk = self.read_chunk(PIPE_BUFFER_SIZE).await?;
            if chunk.is_empty() {
                return Ok(out);
            }
            out.extend_from_slice(&chunk);
        }
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock().unwrap();
        inner.reader_closed = true;
        self.shared.notify.notify_waiters();
    }
}

impl std::fmt::Debug for PipeWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeWriter").finish()
    }
}

impl std::fmt::Debug for PipeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeReader").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_basic_write_read() {
        let (writer, mut reader) = byte_pipe(1024);

        writer.write_all_bytes(b"hello").await.unwrap();
        drop(writer);

        assert_eq!(reader.read_to_end().await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_eof_on_writer_drop() {
        let (writer, mut reader) = byte_pipe(1024);
        writer.write_all_bytes(b"data").await.unwrap();
        drop(writer);

        assert_eq!(reader.read_chunk(1024).await.unwrap(), b"data");
        assert!(reader.read_chunk(1024).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_backpressure() {
        let (writer, mut reader) = byte_pipe(16);

        let write_task = tokio::spawn(async move {
            let data: Vec<u8> = (0..10_000).map(|i| (i % 256) as u8).collect();
            writer.write_all_bytes(&data).await.unwrap();
        });

        let output = reader.read_to_end().await.unwrap();
        write_task.await.unwrap();

        let expected: Vec<u8> = (0..10_000).map(|i| (i % 256) as u8).collect();
        assert_eq!(output, expected);
    }

    #[tokio::test]
    async fn test_broken_pipe_on_reader_drop() {
        let (writer, reader) = byte_pipe(1024);
        drop(reader);

        let err = writer.write_bytes(b"data").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_abort_surfaces_after_drain() {
        let (writer, mut reader) = byte_pipe(1024);
        writer.write_all_bytes(b"partial").await.unwrap();
        writer.abort("backend failed");

        assert_eq!(reader.read_chunk(1024).await.unwrap(), b"partial");
        let err = reader.read_chunk(1024).await.unwrap_err();
        assert!(err.to_string().contains("backend failed"));
    }

    #[tokio::test]
    async fn test_empty_pipe() {
        let (writer, mut reader) = byte_pipe(1024);
        drop(writer);
        assert!(reader.read_to_end().await.unwrap().is_empty());
    }
}
