//! File stats, type bits, and etag derivation.

use crate::resource::Resource;
use bitflags::bitflags;

bitflags! {
    /// File type bits. These are independent: a symlink to a file
    /// carries `FILE | SYMLINK`.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct FileType: u32 {
        const FILE = 1 << 0;
        const DIRECTORY = 1 << 1;
        const SYMLINK = 1 << 2;
    }
}

impl FileType {
    pub fn is_file(self) -> bool {
        self.contains(FileType::FILE)
    }

    pub fn is_directory(self) -> bool {
        self.contains(FileType::DIRECTORY)
    }

    pub fn is_symlink(self) -> bool {
        self.contains(FileType::SYMLINK)
    }
}

/// Sentinel etag that opts out of precondition checks.
pub const ETAG_DISABLED: &str = "";

/// Derive an etag from `(mtime, size)`.
///
/// Deterministic and injective: equal inputs yield equal tags, distinct
/// inputs yield distinct tags. Content is never hashed at this layer.
pub fn etag(mtime: u64, size: u64) -> String {
    format!("{mtime:x}-{size:x}")
}

/// Raw metadata as reported by a provider `stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub file_type: FileType,
    /// Modification time, milliseconds since the Unix epoch.
    pub mtime: u64,
    /// Creation time, milliseconds since the Unix epoch.
    pub ctime: u64,
    /// Size in bytes (0 for directories).
    pub size: u64,
}

impl Metadata {
    pub fn is_file(&self) -> bool {
        self.file_type.is_file()
    }

    pub fn is_directory(&self) -> bool {
        self.file_type.is_directory()
    }

    /// The etag for this snapshot.
    pub fn etag(&self) -> String {
        etag(self.mtime, self.size)
    }
}

/// A directory listing entry as reported by a provider `readdir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub file_type: FileType,
}

/// A resolved file stat, possibly carrying a recursively resolved
/// subtree in `children`.
///
/// Metadata fields are `None` on children resolved without
/// `resolve_metadata` (only the type bits are known from the listing).
#[derive(Debug, Clone)]
pub struct FileStat {
    pub resource: Resource,
    /// The resource's basename.
    pub name: String,
    pub file_type: FileType,
    pub mtime: Option<u64>,
    pub ctime: Option<u64>,
    pub size: Option<u64>,
    pub etag: Option<String>,
    /// `Some` for directories that were expanded, `None` otherwise.
    pub children: Option<Vec<FileStat>>,
}

impl FileStat {
    /// Build a stat with full metadata from a provider snapshot.
    pub fn with_metadata(resource: Resource, meta: Metadata) -> Self {
        let name = resource.name().to_string();
        Self {
            resource,
            name,
            file_type: meta.file_type,
            mtime: Some(meta.mtime),
            ctime: Some(meta.ctime),
            size: Some(meta.size),
            etag: Some(meta.etag()),
            children: None,
        }
    }

    /// Build a stat knowing only the type bits (listing-level child).
    pub fn without_metadata(resource: Resource, file_type: FileType) -> Self {
        let name = resource.name().to_string();
        Self {
            resource,
            name,
            file_type,
            mtime: None,
            ctime: None,
            size: None,
            etag: None,
            children: None,
        }
    }

    pub fn is_file(&self) -> bool {
        self.file_type.is_file()
    }

    pub fn is_directory(&self) -> bool {
        self.file_type.is_directory()
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type.is_symlink()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_etag_deterministic() {
        assert_eq!(etag(1000, 5), etag(1000, 5));
        assert_ne!(etag(1000, 5), etag(2000, 5));
        assert_ne!(etag(1000, 5), etag(1000, 6));
    }

    #[test]
    fn test_etag_empty_file_well_defined() {
        assert_eq!(etag(0, 0), etag(0, 0));
        assert!(!etag(0, 0).is_empty());
    }

    #[test]
    fn test_file_type_bits_independent() {
        let t = FileType::FILE | FileType::SYMLINK;
        assert!(t.is_file());
        assert!(t.is_symlink());
        assert!(!t.is_directory());
    }

    #[test]
    fn test_stat_with_metadata() {
        let resource = Resource::parse("mem:///a/b.txt").unwrap();
        let meta = Metadata {
            file_type: FileType::FILE,
            mtime: 42,
            ctime: 40,
            size: 7,
        };
        let stat = FileStat::with_metadata(resource, meta);
        assert_eq!(stat.name, "b.txt");
        assert_eq!(stat.size, Some(7));
        assert_eq!(stat.etag.as_deref(), Some(etag(42, 7).as_str()));
        assert!(stat.children.is_none());
    }
}
