use std::io::Read;

use getset::{CopyGetters, Getters};
use typed_path::{Utf8UnixPath, Utf8UnixPathBuf};

use crate::{FsResult, Metadata, ModeType, PathSegment};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// A read-only file system view.
///
/// This is the capability a layer must provide to take part in a merge, and also what a merged
/// file system offers to its consumers. Paths are Unix paths and are interpreted relative to the
/// root of the view; a leading `/` is allowed and ignored.
///
/// Implementations must be safe to query from several threads at once.
pub trait FileSystem: Send + Sync {
    /// Checks if a file or directory exists at the specified path.
    ///
    /// ## Arguments
    ///
    /// * `path` - The path to check for existence
    ///
    /// ## Returns
    ///
    /// * `Ok(true)` if the path exists
    /// * `Ok(false)` if the path does not exist
    /// * `Err` if the check operation fails
    fn exists(&self, path: &Utf8UnixPath) -> FsResult<bool> {
        match self.stat(path) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Opens the file at `path` for reading, following symlinks.
    ///
    /// ## Errors
    ///
    /// Returns an error if:
    /// - The path does not exist
    /// - A symlink on the way cannot be resolved
    fn open(&self, path: &Utf8UnixPath) -> FsResult<Box<dyn Read + Send + '_>>;

    /// Lists the entries of the directory at `path`, following symlinks, sorted by name.
    ///
    /// ## Errors
    ///
    /// Returns an error if:
    /// - The path does not exist
    /// - The path is not a directory
    fn read_directory(&self, path: &Utf8UnixPath) -> FsResult<Vec<DirEntry>>;

    /// Gets the metadata of the entry at `path`, following symlinks.
    fn stat(&self, path: &Utf8UnixPath) -> FsResult<Metadata>;

    /// Returns the symlink capability of this view, if it has one.
    fn as_symlink_fs(&self) -> Option<&dyn SymlinkFileSystem> {
        None
    }
}

/// The optional capability of reading symlinks without following them.
pub trait SymlinkFileSystem {
    /// Reads the target of the symlink at `path`. The final component is not followed.
    ///
    /// ## Errors
    ///
    /// Returns an error if:
    /// - The path does not exist
    /// - The path is not a symlink
    fn read_link(&self, path: &Utf8UnixPath) -> FsResult<Utf8UnixPathBuf>;

    /// Gets the metadata of the entry at `path` without following a final symlink.
    fn stat_link(&self, path: &Utf8UnixPath) -> FsResult<Metadata>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct DirEntry {
    /// The name of the entry in its directory
    #[getset(get = "pub with_prefix")]
    name: PathSegment,

    /// The type of the entry
    #[getset(get_copy = "pub with_prefix")]
    kind: ModeType,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DirEntry {
    /// Creates a new directory entry.
    pub fn new(name: PathSegment, kind: ModeType) -> Self {
        Self { name, kind }
    }

    /// Returns `true` if the entry is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind == ModeType::Directory
    }

    /// Returns `true` if the entry is a symlink.
    pub fn is_symlink(&self) -> bool {
        self.kind == ModeType::Symlink
    }
}
