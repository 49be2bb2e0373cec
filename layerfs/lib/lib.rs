//! `layerfs` is a library for merging container image layers into a single read-only file system.
//!
//! The crate exposes a small set of read-only capabilities ([`FileSystem`] and
//! [`SymlinkFileSystem`]), several layer views that implement them, and [`OverlayFileSystem`],
//! which merges an ordered stack of layers while applying whiteouts, opaque whiteouts and
//! cross-layer symlink resolution.

#![warn(missing_docs)]
#![allow(clippy::module_inception)]

mod error;
mod filesystem;
mod fingerprint;
mod implementations;
mod metadata;
pub mod path;
mod segment;
mod walk;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use error::*;
pub use filesystem::*;
pub use fingerprint::*;
pub use implementations::*;
pub use metadata::*;
pub use segment::*;
pub use walk::*;
