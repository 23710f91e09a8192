//! Pure data types for polyfs: resources, capabilities, stats, options, errors.
//!
//! This crate is a leaf dependency with no async runtime and no I/O. It
//! exists so that providers and consumers can work with polyfs's type
//! system without pulling polyfs-core's transitive deps.

pub mod capabilities;
pub mod change;
pub mod error;
pub mod options;
pub mod resource;
pub mod stat;

// Flat re-exports for convenience
pub use capabilities::*;
pub use change::*;
pub use error::*;
pub use options::*;
pub use resource::*;
pub use stat::*;
