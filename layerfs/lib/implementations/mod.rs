//! Concrete file system views: the layer views a merge consumes, and the merge itself.

mod index;
mod memoryfs;
mod nativefs;
mod overlayfs;
mod tarfs;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use memoryfs::*;
pub use nativefs::*;
pub use overlayfs::*;
pub use tarfs::*;
