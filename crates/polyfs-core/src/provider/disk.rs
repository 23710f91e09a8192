//! Local-disk filesystem provider.
//!
//! Serves a directory subtree of the real filesystem. Resource paths
//! are resolved under `root` and may not escape it. Positional I/O maps
//! onto seek-based `tokio::fs::File` access; deletes can route through
//! the OS trash.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use polyfs_types::{
    Capabilities, DeleteOptions, DirEntry, FileType, Metadata, OverwriteOptions, ProviderError,
    ProviderOpenOptions, ProviderResult, ProviderWriteOptions, Resource, WatchOptions,
};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use super::{Disposable, FileSystemProvider, ProviderEvents};

/// Configuration for [`DiskProvider`].
#[derive(Debug, Clone)]
pub struct DiskConfig {
    /// Directory all resource paths resolve under.
    pub root: PathBuf,
    pub readonly: bool,
    /// Whether paths on this filesystem are case sensitive.
    pub case_sensitive: bool,
    /// Advertise OS-trash deletes.
    pub trash: bool,
}

impl DiskConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            readonly: false,
            case_sensitive: true,
            trash: false,
        }
    }
}

/// Local filesystem provider rooted at a directory.
pub struct DiskProvider {
    config: DiskConfig,
    handles: Mutex<HashMap<u64, fs::File>>,
    next_handle: AtomicU64,
    events: ProviderEvents,
}

impl DiskProvider {
    pub fn new(config: DiskConfig) -> Self {
        Self {
            config,
            handles: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            events: ProviderEvents::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// Resolve a resource path beneath the root. Escaping segments are
    /// rejected rather than resolved.
    fn resolve(&self, resource: &Resource) -> ProviderResult<PathBuf> {
        let relative = Path::new(resource.path().trim_start_matches('/'));
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => {
                    return Err(ProviderError::PermissionDenied(format!(
                        "path escapes provider root: {resource}"
                    )));
                }
            }
        }
        Ok(self.config.root.join(relative))
    }

    fn millis(time: std::io::Result<std::time::SystemTime>) -> u64 {
        time.ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    fn copy_tree<'a>(source: &'a Path, target: &'a Path) -> BoxFuture<'a, std::io::Result<()>> {
        async move {
            fs::create_dir(target).await?;
            let mut dir = fs::read_dir(source).await?;
            while let Some(entry) = dir.next_entry().await? {
                let child_target = target.join(entry.file_name());
                if entry.file_type().await?.is_dir() {
                    Self::copy_tree(&entry.path(), &child_target).await?;
                } else {
                    fs::copy(entry.path(), &child_target).await?;
                }
            }
            Ok(())
        }
        .boxed()
    }
}

#[async_trait]
impl FileSystemProvider for DiskProvider {
    fn capabilities(&self) -> Capabilities {
        let mut capabilities = Capabilities::FILE_READ_WRITE
            | Capabilities::FILE_OPEN_READ_WRITE_CLOSE
            | Capabilities::FILE_FOLDER_COPY;
        if self.config.case_sensitive {
            capabilities |= Capabilities::PATH_CASE_SENSITIVE;
        }
        if self.config.readonly {
            capabilities |= Capabilities::READONLY;
        }
        if self.config.trash {
            capabilities |= Capabilities::TRASH;
        }
        capabilities
    }

    fn events(&self) -> &ProviderEvents {
        &self.events
    }

    async fn stat(&self, resource: &Resource) -> ProviderResult<Metadata> {
        let path = self.resolve(resource)?;
        let symlink_meta = fs::symlink_metadata(&path).await?;

        let mut file_type = FileType::empty();
        if symlink_meta.file_type().is_symlink() {
            file_type |= FileType::SYMLINK;
            // Dangling symlinks keep only the symlink bit.
            if let Ok(meta) = fs::metadata(&path).await {
                if meta.is_dir() {
                    file_type |= FileType::DIRECTORY;
                } else {
                    file_type |= FileType::FILE;
                }
                return Ok(Metadata {
                    file_type,
                    mtime: Self::millis(meta.modified()),
                    ctime: Self::millis(meta.created()),
                    size: meta.len(),
                });
            }
        } else if symlink_meta.is_dir() {
            file_type |= FileType::DIRECTORY;
        } else {
            file_type |= FileType::FILE;
        }

        Ok(Metadata {
            file_type,
            mtime: Self::millis(symlink_meta.modified()),
            ctime: Self::millis(symlink_meta.created()),
            size: symlink_meta.len(),
        })
    }

    async fn read_dir(&self, resource: &Resource) -> ProviderResult<Vec<DirEntry>> {
        let path = self.resolve(resource)?;
        let mut dir = fs::read_dir(&path).await?;
        let mut entries = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            let meta = fs::symlink_metadata(entry.path()).await?;
            let file_type = if meta.file_type().is_symlink() {
                match fs::metadata(entry.path()).await {
                    Ok(target) if target.is_dir() => FileType::DIRECTORY | FileType::SYMLINK,
                    Ok(_) => FileType::FILE | FileType::SYMLINK,
                    Err(_) => FileType::SYMLINK,
                }
            } else if meta.is_dir() {
                FileType::DIRECTORY
            } else {
                FileType::FILE
            };

            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                file_type,
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn mkdir(&self, resource: &Resource) -> ProviderResult<()> {
        let path = self.resolve(resource)?;
        fs::create_dir(&path).await?;
        Ok(())
    }

    async fn delete(&self, resource: &Resource, options: DeleteOptions) -> ProviderResult<()> {
        let path = self.resolve(resource)?;
        let meta = fs::symlink_metadata(&path).await?;

        if options.use_trash {
            let to_trash = path.clone();
            let result = tokio::task::spawn_blocking(move || trash::delete(&to_trash)).await;
            match result {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(err)) => {
                    tracing::warn!(
                        "trash::delete failed for {}: {err}, falling back to permanent delete",
                        path.display()
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        "trash::delete task failed for {}: {err}, falling back to permanent delete",
                        path.display()
                    );
                }
            }
        }

        if meta.is_dir() {
            if options.recursive {
                fs::remove_dir_all(&path).await?;
            } else {
                fs::remove_dir(&path).await?;
            }
        } else {
            fs::remove_file(&path).await?;
        }
        Ok(())
    }

    async fn rename(
        &self,
        source: &Resource,
        target: &Resource,
        options: OverwriteOptions,
    ) -> ProviderResult<()> {
        let from = self.resolve(source)?;
        let to = self.resolve(target)?;

        if !options.overwrite && fs::symlink_metadata(&to).await.is_ok() {
            return Err(ProviderError::AlreadyExists(target.to_string()));
        }

        fs::rename(&from, &to).await?;
        Ok(())
    }

    async fn copy(
        &self,
        source: &Resource,
        target: &Resource,
        options: OverwriteOptions,
    ) -> ProviderResult<()> {
        let from = self.resolve(source)?;
        let to = self.resolve(target)?;

        if fs::symlink_metadata(&to).await.is_ok() {
            if !options.overwrite {
                return Err(ProviderError::AlreadyExists(target.to_string()));
            }
            if fs::symlink_metadata(&to).await?.is_dir() {
                fs::remove_dir_all(&to).await?;
            } else {
                fs::remove_file(&to).await?;
            }
        }

        if fs::metadata(&from).await?.is_dir() {
            Self::copy_tree(&from, &to).await?;
        } else {
            fs::copy(&from, &to).await?;
        }
        Ok(())
    }

    async fn read_file(&self, resource: &Resource) -> ProviderResult<Vec<u8>> {
        let path = self.resolve(resource)?;
        Ok(fs::read(&path).await?)
    }

    async fn write_file(
        &self,
        resource: &Resource,
        content: &[u8],
        options: ProviderWriteOptions,
    ) -> ProviderResult<()> {
        let path = self.resolve(resource)?;

        let exists = fs::symlink_metadata(&path).await.is_ok();
        if exists && !options.overwrite {
            return Err(ProviderError::AlreadyExists(resource.to_string()));
        }
        if !exists && !options.create {
            return Err(ProviderError::NotFound(resource.to_string()));
        }

        fs::write(&path, content).await?;
        Ok(())
    }

    async fn open(
        &self,
        resource: &Resource,
        options: ProviderOpenOptions,
    ) -> ProviderResult<u64> {
        let path = self.resolve(resource)?;

        let file = if options.create {
            fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)
                .await?
        } else {
            fs::OpenOptions::new().read(true).open(&path).await?
        };

        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.handles.lock().await.insert(handle, file);
        Ok(handle)
    }

    async fn close(&self, handle: u64) -> ProviderResult<()> {
        let file = self.handles.lock().await.remove(&handle);
        match file {
            Some(mut file) => {
                file.flush().await?;
                Ok(())
            }
            None => Err(ProviderError::BadHandle(handle)),
        }
    }

    async fn read(&self, handle: u64, position: u64, length: usize) -> ProviderResult<Vec<u8>> {
        let mut handles = self.handles.lock().await;
        let file = handles
            .get_mut(&handle)
            .ok_or(ProviderError::BadHandle(handle))?;

        file.seek(SeekFrom::Start(position)).await?;
        let mut buffer = vec![0u8; length];
        let mut filled = 0;
        while filled < length {
            let n = file.read(&mut buffer[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buffer.truncate(filled);
        Ok(buffer)
    }

    async fn write(&self, handle: u64, position: u64, data: &[u8]) -> ProviderResult<usize> {
        let mut handles = self.handles.lock().await;
        let file = handles
            .get_mut(&handle)
            .ok_or(ProviderError::BadHandle(handle))?;

        file.seek(SeekFrom::Start(position)).await?;
        let written = file.write(data).await?;
        Ok(written)
    }

    async fn watch(
        &self,
        resource: &Resource,
        _options: &WatchOptions,
    ) -> ProviderResult<Disposable> {
        // OS-level watching is an external subsystem; this provider
        // hands out inert subscriptions.
        tracing::debug!("disk provider watch requested for '{resource}'");
        Ok(Disposable::noop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> (tempfile::TempDir, DiskProvider) {
        let dir = tempfile::tempdir().unwrap();
        let provider = DiskProvider::new(DiskConfig::new(dir.path()));
        (dir, provider)
    }

    fn res(s: &str) -> Resource {
        Resource::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let (_dir, provider) = provider();
        provider
            .write_file(
                &res("file:///a.txt"),
                b"hello",
                ProviderWriteOptions {
                    create: true,
                    overwrite: true,
                },
            )
            .await
            .unwrap();

        assert_eq!(
            provider.read_file(&res("file:///a.txt")).await.unwrap(),
            b"hello"
        );
    }

    #[tokio::test]
    async fn test_escape_is_rejected() {
        let (_dir, provider) = provider();
        let err = provider
            .read_file(&res("file:///../outside.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_stat_and_read_dir() {
        let (_dir, provider) = provider();
        provider.mkdir(&res("file:///sub")).await.unwrap();
        provider
            .write_file(
                &res("file:///sub/x.txt"),
                b"abc",
                ProviderWriteOptions {
                    create: true,
                    overwrite: true,
                },
            )
            .await
            .unwrap();

        let meta = provider.stat(&res("file:///sub/x.txt")).await.unwrap();
        assert!(meta.is_file());
        assert_eq!(meta.size, 3);

        let entries = provider.read_dir(&res("file:///sub")).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "x.txt");
    }

    #[tokio::test]
    async fn test_positional_read_write() {
        let (_dir, provider) = provider();
        let resource = res("file:///pos.bin");

        let handle = provider
            .open(&resource, ProviderOpenOptions { create: true })
            .await
            .unwrap();
        provider.write(handle, 0, b"0123456789").await.unwrap();
        provider.close(handle).await.unwrap();

        let handle = provider
            .open(&resource, ProviderOpenOptions { create: false })
            .await
            .unwrap();
        assert_eq!(provider.read(handle, 3, 4).await.unwrap(), b"3456");
        assert!(provider.read(handle, 20, 4).await.unwrap().is_empty());
        provider.close(handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_recursive_delete() {
        let (_dir, provider) = provider();
        provider.mkdir(&res("file:///tree")).await.unwrap();
        provider
            .write_file(
                &res("file:///tree/leaf"),
                b"x",
                ProviderWriteOptions {
                    create: true,
                    overwrite: true,
                },
            )
            .await
            .unwrap();

        let err = provider
            .delete(
                &res("file:///tree"),
                DeleteOptions {
                    recursive: false,
                    use_trash: false,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotEmpty(_)));

        provider
            .delete(
                &res("file:///tree"),
                DeleteOptions {
                    recursive: true,
                    use_trash: false,
                },
            )
            .await
            .unwrap();
        assert!(provider.stat(&res("file:///tree")).await.is_err());
    }

    #[tokio::test]
    async fn test_native_folder_copy() {
        let (_dir, provider) = provider();
        provider.mkdir(&res("file:///src")).await.unwrap();
        provider.mkdir(&res("file:///src/sub")).await.unwrap();
        provider
            .write_file(
                &res("file:///src/sub/deep.txt"),
                b"deep",
                ProviderWriteOptions {
                    create: true,
                    overwrite: true,
                },
            )
            .await
            .unwrap();

        provider
            .copy(
                &res("file:///src"),
                &res("file:///dst"),
                OverwriteOptions { overwrite: false },
            )
            .await
            .unwrap();

        assert_eq!(
            provider
                .read_file(&res("file:///dst/sub/deep.txt"))
                .await
                .unwrap(),
            b"deep"
        );
    }
}
