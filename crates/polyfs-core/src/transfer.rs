//! Move, copy, and delete.
//!
//! Move and copy share one engine: validation of the source/target
//! relationship, native rename/copy when one provider can do it, and
//! otherwise a recursive tree walk moving bytes through whichever of
//! the four capability permutations the provider pair offers. A move
//! across providers degrades to copy + delete and reports the mode it
//! actually executed.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use polyfs_types::{
    DeleteOptions, FileError, FileErrorKind, FileOperation, FileResult, FileStat,
    OverwriteOptions, ProviderError, ProviderOpenOptions, ProviderWriteOptions, ReadOptions,
    Resource, WriteOptions,
};
use tokio_util::sync::CancellationToken;

use crate::provider::FileSystemProvider;
use crate::read::{self, READ_CHUNK_SIZE};
use crate::service::FileService;
use crate::write::{self, write_chunk};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TransferMode {
    Move,
    Copy,
}

struct MoveCopyValidation {
    exists: bool,
    same_resource_different_case: bool,
}

fn same_provider(a: &Arc<dyn FileSystemProvider>, b: &Arc<dyn FileSystemProvider>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl FileService {
    // ═══════════════════════════════════════════════════════════════
    // Public surface
    // ═══════════════════════════════════════════════════════════════

    /// Move `source` to `target`. Same-provider moves use the native
    /// rename; cross-provider moves copy then delete, and the fired
    /// event reports `Copy` in that case.
    pub async fn rename(
        &self,
        source: &Resource,
        target: &Resource,
        overwrite: bool,
    ) -> FileResult<FileStat> {
        let result = self
            .run_transfer(source, target, TransferMode::Move, overwrite)
            .await;
        let (operation, stat) = self.report(result)?;
        self.emit_operation(source, operation, Some(stat.clone()));
        Ok(stat)
    }

    /// Copy `source` to `target`, recursing over folders when the
    /// target provider has no native copy.
    pub async fn copy(
        &self,
        source: &Resource,
        target: &Resource,
        overwrite: bool,
    ) -> FileResult<FileStat> {
        let result = self
            .run_transfer(source, target, TransferMode::Copy, overwrite)
            .await;
        let (operation, stat) = self.report(result)?;
        self.emit_operation(source, operation, Some(stat.clone()));
        Ok(stat)
    }

    /// Delete a resource, optionally to the provider's trash.
    pub async fn del(&self, resource: &Resource, options: DeleteOptions) -> FileResult<()> {
        let result = async {
            let provider = self.validate_delete(resource, options).await?;
            provider
                .delete(resource, options)
                .await
                .map_err(|err| FileError::from_provider(err, resource))
        }
        .await;
        self.report(result)?;
        self.emit_operation(resource, FileOperation::Delete, None);
        Ok(())
    }

    // Preflight validators: run the same checks as the mutating
    // operation and hand back the error instead of performing it.

    pub async fn can_create_file(
        &self,
        resource: &Resource,
        options: &WriteOptions,
    ) -> FileResult<()> {
        self.validate_create_file(resource, options).await
    }

    pub async fn can_move(
        &self,
        source: &Resource,
        target: &Resource,
        overwrite: bool,
    ) -> FileResult<()> {
        self.can_move_copy(source, target, TransferMode::Move, overwrite)
            .await
    }

    pub async fn can_copy(
        &self,
        source: &Resource,
        target: &Resource,
        overwrite: bool,
    ) -> FileResult<()> {
        self.can_move_copy(source, target, TransferMode::Copy, overwrite)
            .await
    }

    pub async fn can_delete(&self, resource: &Resource, options: DeleteOptions) -> FileResult<()> {
        self.validate_delete(resource, options).await.map(|_| ())
    }

    // ═══════════════════════════════════════════════════════════════
    // Engine
    // ═══════════════════════════════════════════════════════════════

    async fn run_transfer(
        &self,
        source: &Resource,
        target: &Resource,
        mode: TransferMode,
        overwrite: bool,
    ) -> FileResult<(FileOperation, FileStat)> {
        let source_provider = self.registry.with_provider(source).await?;
        let target_provider = self.registry.with_provider(target).await?;

        if target_provider.capabilities().is_readonly() {
            return Err(FileError::new(
                FileErrorKind::FilePermissionDenied,
                format!(
                    "unable to modify read-only resource '{}'",
                    target.to_user_string()
                ),
            ));
        }
        if mode == TransferMode::Move && source_provider.capabilities().is_readonly() {
            return Err(FileError::new(
                FileErrorKind::FilePermissionDenied,
                format!(
                    "unable to modify read-only resource '{}'",
                    source.to_user_string()
                ),
            ));
        }

        let executed = self
            .do_move_copy(
                source_provider,
                source,
                target_provider,
                target,
                mode,
                overwrite,
            )
            .await?;

        let stat = self.resolve_with_metadata(target).await?;
        let operation = match executed {
            TransferMode::Move => FileOperation::Move,
            TransferMode::Copy => FileOperation::Copy,
        };
        Ok((operation, stat))
    }

    fn do_move_copy<'a>(
        &'a self,
        source_provider: Arc<dyn FileSystemProvider>,
        source: &'a Resource,
        target_provider: Arc<dyn FileSystemProvider>,
        target: &'a Resource,
        mode: TransferMode,
        overwrite: bool,
    ) -> BoxFuture<'a, FileResult<TransferMode>> {
        async move {
            if source.as_str() == target.as_str() {
                return Ok(mode);
            }

            let validation = self
                .validate_move_copy(
                    &source_provider,
                    source,
                    &target_provider,
                    target,
                    mode,
                    overwrite,
                )
                .await?;

            if validation.exists && !validation.same_resource_different_case && overwrite {
                self.del(
                    target,
                    DeleteOptions {
                        recursive: true,
                        use_trash: false,
                    },
                )
                .await?;
            }

            if let Some(parent) = target.parent() {
                write::mkdirp(target_provider.as_ref(), &parent).await?;
            }

            match mode {
                TransferMode::Copy => {
                    self.do_copy(&source_provider, source, &target_provider, target, overwrite)
                        .await?;
                    Ok(TransferMode::Copy)
                }
                TransferMode::Move => {
                    if same_provider(&source_provider, &target_provider) {
                        source_provider
                            .rename(source, target, OverwriteOptions { overwrite })
                            .await
                            .map_err(|err| FileError::from_provider(err, source))?;
                        Ok(TransferMode::Move)
                    } else {
                        self.do_move_copy(
                            source_provider,
                            source,
                            target_provider,
                            target,
                            TransferMode::Copy,
                            overwrite,
                        )
                        .await?;
                        self.del(
                            source,
                            DeleteOptions {
                                recursive: true,
                                use_trash: false,
                            },
                        )
                        .await?;
                        Ok(TransferMode::Copy)
                    }
                }
            }
        }
        .boxed()
    }

    async fn can_move_copy(
        &self,
        source: &Resource,
        target: &Resource,
        mode: TransferMode,
        overwrite: bool,
    ) -> FileResult<()> {
        let source_provider = self.registry.with_provider(source).await?;
        let target_provider = self.registry.with_provider(target).await?;
        if source.as_str() == target.as_str() {
            return Ok(());
        }
        self.validate_move_copy(
            &source_provider,
            source,
            &target_provider,
            target,
            mode,
            overwrite,
        )
        .await
        .map(|_| ())
    }

    async fn validate_move_copy(
        &self,
        source_provider: &Arc<dyn FileSystemProvider>,
        source: &Resource,
        target_provider: &Arc<dyn FileSystemProvider>,
        target: &Resource,
        mode: TransferMode,
        overwrite: bool,
    ) -> FileResult<MoveCopyValidation> {
        let mut same_resource_different_case = false;
        let same = same_provider(source_provider, target_provider);
        let case_sensitive = source_provider.capabilities().is_case_sensitive();

        if same {
            if !case_sensitive {
                same_resource_different_case = source.is_equal(target, false);
            }

            if same_resource_different_case && mode == TransferMode::Copy {
                return Err(FileError::new(
                    FileErrorKind::Unknown,
                    format!(
                        "unable to copy '{}' onto itself with a different path case",
                        source.to_user_string()
                    ),
                ));
            }

            if !same_resource_different_case
                && source.is_equal_or_parent_of(target, case_sensitive)
            {
                return Err(FileError::new(
                    FileErrorKind::Unknown,
                    format!(
                        "unable to move/copy '{}' into '{}' because the source is a parent of the target",
                        source.to_user_string(),
                        target.to_user_string()
                    ),
                ));
            }
        }

        let exists = self.exists(target).await;
        if exists && !same_resource_different_case {
            if !overwrite {
                return Err(FileError::new(
                    FileErrorKind::FileMoveConflict,
                    format!(
                        "unable to move/copy '{}' because target '{}' already exists at destination",
                        source.to_user_string(),
                        target.to_user_string()
                    ),
                ));
            }

            if same && target.is_equal_or_parent_of(source, case_sensitive) {
                return Err(FileError::new(
                    FileErrorKind::Unknown,
                    format!(
                        "unable to move/copy '{}' because overwriting '{}' would delete the source",
                        source.to_user_string(),
                        target.to_user_string()
                    ),
                ));
            }
        }

        Ok(MoveCopyValidation {
            exists,
            same_resource_different_case,
        })
    }

    async fn do_copy(
        &self,
        source_provider: &Arc<dyn FileSystemProvider>,
        source: &Resource,
        target_provider: &Arc<dyn FileSystemProvider>,
        target: &Resource,
        overwrite: bool,
    ) -> FileResult<()> {
        if same_provider(source_provider, target_provider)
            && source_provider.capabilities().supports_folder_copy()
        {
            return source_provider
                .copy(source, target, OverwriteOptions { overwrite })
                .await
                .map_err(|err| FileError::from_provider(err, source));
        }

        let meta = source_provider
            .stat(source)
            .await
            .map_err(|err| match err {
                ProviderError::NotFound(_) => FileError::not_found(source),
                other => FileError::from_provider(other, source),
            })?;

        if meta.is_directory() {
            self.copy_folder(source_provider, source, target_provider, target)
                .await
        } else {
            self.copy_file_bytes(source_provider, source, target_provider, target)
                .await
        }
    }

    fn copy_folder<'a>(
        &'a self,
        source_provider: &'a Arc<dyn FileSystemProvider>,
        source: &'a Resource,
        target_provider: &'a Arc<dyn FileSystemProvider>,
        target: &'a Resource,
    ) -> BoxFuture<'a, FileResult<()>> {
        async move {
            target_provider
                .mkdir(target)
                .await
                .map_err(|err| FileError::from_provider(err, target))?;

            let entries = source_provider
                .read_dir(source)
                .await
                .map_err(|err| FileError::from_provider(err, source))?;

            for entry in entries {
                let child_source = source.join(&entry.name);
                let child_target = target.join(&entry.name);
                if entry.file_type.is_directory() {
                    self.copy_folder(source_provider, &child_source, target_provider, &child_target)
                        .await?;
                } else {
                    self.copy_file_bytes(
                        source_provider,
                        &child_source,
                        target_provider,
                        &child_target,
                    )
                    .await?;
                }
            }
            Ok(())
        }
        .boxed()
    }

    /// Move one file's bytes across providers through whichever of the
    /// four capability permutations applies. Target writes take the
    /// target's write-queue slot; every opened handle is closed on
    /// every exit path.
    async fn copy_file_bytes(
        &self,
        source_provider: &Arc<dyn FileSystemProvider>,
        source: &Resource,
        target_provider: &Arc<dyn FileSystemProvider>,
        target: &Resource,
    ) -> FileResult<()> {
        let source_caps = source_provider.capabilities();
        let target_caps = target_provider.capabilities();

        let key = target.canonical_key(target_caps.is_case_sensitive());
        let _guard = self.queues.enqueue(key).await;

        let source_positional = source_caps.supports_open_read_write_close();
        let target_positional = target_caps.supports_open_read_write_close();
        let source_unbuffered = source_caps.supports_unbuffered();
        let target_unbuffered = target_caps.supports_unbuffered();

        if source_positional && target_positional {
            pipe_buffered(
                source_provider.as_ref(),
                source,
                target_provider.as_ref(),
                target,
            )
            .await
        } else if source_positional && target_unbuffered {
            let token = CancellationToken::new();
            let bytes = read::read_buffered_bytes(
                source_provider.as_ref(),
                source,
                &ReadOptions::default(),
                &token,
            )
            .await?;
            write_whole(target_provider.as_ref(), target, &bytes).await
        } else if source_unbuffered && target_positional {
            let bytes = source_provider
                .read_file(source)
                .await
                .map_err(|err| FileError::from_provider(err, source))?;
            write_handle_loop(target_provider.as_ref(), target, &bytes).await
        } else if source_unbuffered && target_unbuffered {
            let bytes = source_provider
                .read_file(source)
                .await
                .map_err(|err| FileError::from_provider(err, source))?;
            write_whole(target_provider.as_ref(), target, &bytes).await
        } else {
            Err(FileError::new(
                FileErrorKind::Unknown,
                format!(
                    "unable to copy '{}': providers expose no compatible read/write capability",
                    source.to_user_string()
                ),
            ))
        }
    }

    async fn validate_delete(
        &self,
        resource: &Resource,
        options: DeleteOptions,
    ) -> FileResult<Arc<dyn FileSystemProvider>> {
        let provider = self.registry.with_provider(resource).await?;
        let capabilities = provider.capabilities();

        if capabilities.is_readonly() {
            return Err(FileError::new(
                FileErrorKind::FilePermissionDenied,
                format!(
                    "unable to delete read-only resource '{}'",
                    resource.to_user_string()
                ),
            ));
        }

        if options.use_trash && !capabilities.supports_trash() {
            return Err(FileError::new(
                FileErrorKind::Unknown,
                format!(
                    "unable to delete '{}' via trash because the provider does not support it",
                    resource.to_user_string()
                ),
            ));
        }

        let meta = provider.stat(resource).await.map_err(|err| match err {
            ProviderError::NotFound(_) => FileError::not_found(resource),
            other => FileError::from_provider(other, resource),
        })?;

        if !options.recursive && meta.is_directory() {
            let entries = provider
                .read_dir(resource)
                .await
                .map_err(|err| FileError::from_provider(err, resource))?;
            if !entries.is_empty() {
                return Err(FileError::new(
                    FileErrorKind::Unknown,
                    format!(
                        "unable to delete non-empty folder '{}' unless recursive",
                        resource.to_user_string()
                    ),
                ));
            }
        }

        Ok(provider)
    }
}

/// positional → positional: chunked read loop into a chunked write
/// loop.
async fn pipe_buffered(
    source_provider: &dyn FileSystemProvider,
    source: &Resource,
    target_provider: &dyn FileSystemProvider,
    target: &Resource,
) -> FileResult<()> {
    let source_handle = source_provider
        .open(source, ProviderOpenOptions { create: false })
        .await
        .map_err(|err| FileError::from_provider(err, source))?;

    let result = async {
        let target_handle = target_provider
            .open(target, ProviderOpenOptions { create: true })
            .await
            .map_err(|err| FileError::from_provider(err, target))?;

        let piped = async {
            let mut position = 0u64;
            let mut target_position = 0u64;
            loop {
                let chunk = source_provider
                    .read(source_handle, position, READ_CHUNK_SIZE)
                    .await
                    .map_err(|err| FileError::from_provider(err, source))?;
                if chunk.is_empty() {
                    return Ok(());
                }
                position += chunk.len() as u64;
                target_position = write_chunk(
                    target_provider,
                    target,
                    target_handle,
                    target_position,
                    &chunk,
                )
                .await?;
            }
        }
        .await;

        let closed = target_provider.close(target_handle).await;
        piped?;
        closed.map_err(|err| FileError::from_provider(err, target))
    }
    .await;

    let closed = source_provider.close(source_handle).await;
    result?;
    closed.map_err(|err| FileError::from_provider(err, source))
}

/// * → unbuffered: one whole-file provider write.
async fn write_whole(
    target_provider: &dyn FileSystemProvider,
    target: &Resource,
    bytes: &[u8],
) -> FileResult<()> {
    target_provider
        .write_file(
            target,
            bytes,
            ProviderWriteOptions {
                create: true,
                overwrite: true,
            },
        )
        .await
        .map_err(|err| FileError::from_provider(err, target))
}

/// unbuffered → positional: open once and drive the write loop.
async fn write_handle_loop(
    target_provider: &dyn FileSystemProvider,
    target: &Resource,
    bytes: &[u8],
) -> FileResult<()> {
    let handle = target_provider
        .open(target, ProviderOpenOptions { create: true })
        .await
        .map_err(|err| FileError::from_provider(err, target))?;

    let mut written = async {
        let mut position = 0u64;
        for chunk in bytes.chunks(READ_CHUNK_SIZE) {
            position = write_chunk(target_provider, target, handle, position, chunk).await?;
        }
        Ok(position)
    }
    .await;

    let closed = target_provider.close(handle).await;
    if let Err(err) = closed {
        written = written.and(Err(FileError::from_provider(err, target)));
    }
    written.map(|_| ())
}
