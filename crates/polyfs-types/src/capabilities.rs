//! Provider capability bits and the probe predicates over them.
//!
//! Capabilities may change at runtime (providers fire a capability-change
//! event), so callers re-read them at every operation instead of caching
//! the probe result.

use bitflags::bitflags;

bitflags! {
    /// What a filesystem provider can do.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        /// Unbuffered whole-file read and write.
        const FILE_READ_WRITE = 1 << 1;
        /// Positional open/read/write/close with a numeric handle.
        const FILE_OPEN_READ_WRITE_CLOSE = 1 << 2;
        /// Intra-provider copy of files and folders.
        const FILE_FOLDER_COPY = 1 << 3;
        /// Provider-native streaming read.
        const FILE_READ_STREAM = 1 << 4;
        /// Paths are case sensitive.
        const PATH_CASE_SENSITIVE = 1 << 10;
        /// The provider rejects all mutation.
        const READONLY = 1 << 11;
        /// Deletes can go to the OS trash.
        const TRASH = 1 << 12;
    }
}

impl Capabilities {
    pub fn supports_unbuffered(self) -> bool {
        self.contains(Capabilities::FILE_READ_WRITE)
    }

    pub fn supports_open_read_write_close(self) -> bool {
        self.contains(Capabilities::FILE_OPEN_READ_WRITE_CLOSE)
    }

    pub fn supports_read_stream(self) -> bool {
        self.contains(Capabilities::FILE_READ_STREAM)
    }

    pub fn supports_folder_copy(self) -> bool {
        self.contains(Capabilities::FILE_FOLDER_COPY)
    }

    pub fn supports_trash(self) -> bool {
        self.contains(Capabilities::TRASH)
    }

    pub fn is_case_sensitive(self) -> bool {
        self.contains(Capabilities::PATH_CASE_SENSITIVE)
    }

    pub fn is_readonly(self) -> bool {
        self.contains(Capabilities::READONLY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_predicates() {
        let caps = Capabilities::FILE_READ_WRITE | Capabilities::PATH_CASE_SENSITIVE;
        assert!(caps.supports_unbuffered());
        assert!(caps.is_case_sensitive());
        assert!(!caps.supports_open_read_write_close());
        assert!(!caps.is_readonly());
    }

    #[test]
    fn test_empty_set() {
        let caps = Capabilities::empty();
        assert!(!caps.supports_unbuffered());
        assert!(!caps.supports_read_stream());
    }
}
