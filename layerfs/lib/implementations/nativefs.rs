use std::{
    fs::{self, File},
    io::{self, Read},
    path::{Path, PathBuf},
};

use tracing::warn;
use typed_path::{Utf8UnixPath, Utf8UnixPathBuf};

use crate::{
    path::{self, Lookup},
    DirEntry, FileSystem, FsError, FsResult, Metadata, ModeType, PathSegment, SymlinkFileSystem,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A read-only file system view of a directory on the host.
///
/// All paths are resolved relative to the root directory. Symlinks are resolved by the view
/// itself rather than by the host, so an absolute symlink target such as `/etc/passwd` points at
/// `<root>/etc/passwd` and no path can escape the root.
#[derive(Debug, Clone)]
pub struct NativeFileSystem {
    /// The root directory for this filesystem instance
    root_path: PathBuf,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl NativeFileSystem {
    /// Creates a new native filesystem with the given root path.
    ///
    /// ## Arguments
    ///
    /// * `root_path` - The root path for this filesystem instance
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
        }
    }

    /// Returns the host directory this view is rooted at.
    pub fn get_root_path(&self) -> &Path {
        &self.root_path
    }

    /// Converts a key to a native filesystem path.
    fn to_native_path(&self, key: &str) -> PathBuf {
        if key.is_empty() {
            self.root_path.clone()
        } else {
            self.root_path.join(key)
        }
    }

    /// Gets host metadata for a key, returning `None` if it doesn't exist.
    fn symlink_metadata_option(&self, key: &str) -> FsResult<Option<fs::Metadata>> {
        match fs::symlink_metadata(self.to_native_path(key)) {
            Ok(m) => Ok(Some(m)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FsError::Io(e)),
        }
    }

    fn read_link_key(&self, key: &str) -> FsResult<Utf8UnixPathBuf> {
        let target = fs::read_link(self.to_native_path(key))?;
        let target = target.to_str().ok_or_else(|| {
            FsError::InvalidPathComponent(target.to_string_lossy().into_owned())
        })?;
        Ok(Utf8UnixPathBuf::from(target))
    }

    fn resolve(&self, path: &Utf8UnixPath, follow_last: bool) -> FsResult<Utf8UnixPathBuf> {
        path::resolve_within(path, follow_last, |key| {
            let Some(metadata) = self.symlink_metadata_option(key)? else {
                return Ok(None);
            };

            let file_type = metadata.file_type();
            let lookup = if file_type.is_dir() {
                Lookup::Directory
            } else if file_type.is_symlink() {
                Lookup::Symlink(self.read_link_key(key)?)
            } else {
                Lookup::Other
            };

            Ok(Some(lookup))
        })
    }

    fn metadata_for(&self, key: &str, path: &Utf8UnixPath) -> FsResult<Metadata> {
        let native = self
            .symlink_metadata_option(key)?
            .ok_or_else(|| FsError::NotFound(path.to_owned()))?;
        Ok(convert_metadata(&native))
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl FileSystem for NativeFileSystem {
    fn open(&self, path: &Utf8UnixPath) -> FsResult<Box<dyn Read + Send + '_>> {
        let key = self.resolve(path, true)?;
        let native_path = self.to_native_path(key.as_str());
        if !fs::symlink_metadata(&native_path)?.is_file() {
            return Err(FsError::NotAFile(path.to_owned()));
        }

        Ok(Box::new(File::open(native_path)?))
    }

    fn read_directory(&self, path: &Utf8UnixPath) -> FsResult<Vec<DirEntry>> {
        let key = self.resolve(path, true)?;
        let native_path = self.to_native_path(key.as_str());
        if !fs::symlink_metadata(&native_path)?.is_dir() {
            return Err(FsError::NotADirectory(path.to_owned()));
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(native_path)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!(name = ?entry.file_name(), "skipping entry with a non UTF-8 name");
                continue;
            };

            let kind = mode_type_of(&entry.file_type()?);
            entries.push(DirEntry::new(PathSegment::try_from(name)?, kind));
        }

        entries.sort_by(|a, b| a.get_name().cmp(b.get_name()));
        Ok(entries)
    }

    fn stat(&self, path: &Utf8UnixPath) -> FsResult<Metadata> {
        let key = self.resolve(path, true)?;
        self.metadata_for(key.as_str(), path)
    }

    fn as_symlink_fs(&self) -> Option<&dyn SymlinkFileSystem> {
        Some(self)
    }
}

impl SymlinkFileSystem for NativeFileSystem {
    fn read_link(&self, path: &Utf8UnixPath) -> FsResult<Utf8UnixPathBuf> {
        let key = self.resolve(path, false)?;
        let metadata = self
            .symlink_metadata_option(key.as_str())?
            .ok_or_else(|| FsError::NotFound(path.to_owned()))?;
        if !metadata.file_type().is_symlink() {
            return Err(FsError::NotASymlink(path.to_owned()));
        }

        self.read_link_key(key.as_str())
    }

    fn stat_link(&self, path: &Utf8UnixPath) -> FsResult<Metadata> {
        let key = self.resolve(path, false)?;
        self.metadata_for(key.as_str(), path)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

#[cfg(unix)]
fn mode_type_of(file_type: &fs::FileType) -> ModeType {
    use std::os::unix::fs::FileTypeExt;

    if file_type.is_dir() {
        ModeType::Directory
    } else if file_type.is_symlink() {
        ModeType::Symlink
    } else if file_type.is_fifo() {
        ModeType::Fifo
    } else if file_type.is_char_device() {
        ModeType::CharDevice
    } else if file_type.is_block_device() {
        ModeType::BlockDevice
    } else if file_type.is_socket() {
        ModeType::Socket
    } else {
        ModeType::File
    }
}

#[cfg(not(unix))]
fn mode_type_of(file_type: &fs::FileType) -> ModeType {
    if file_type.is_dir() {
        ModeType::Directory
    } else if file_type.is_symlink() {
        ModeType::Symlink
    } else {
        ModeType::File
    }
}

#[cfg(unix)]
fn convert_metadata(native: &fs::Metadata) -> Metadata {
    use std::os::unix::fs::MetadataExt;

    let mut metadata = Metadata::new(mode_type_of(&native.file_type()));
    metadata.set_permissions(native.mode());
    metadata.set_size(native.len());
    metadata.set_uid(native.uid() as u64);
    metadata.set_gid(native.gid() as u64);
    metadata.set_modified_secs(native.mtime());
    metadata
}

#[cfg(not(unix))]
fn convert_metadata(native: &fs::Metadata) -> Metadata {
    use chrono::{DateTime, Utc};

    let mut metadata = Metadata::new(mode_type_of(&native.file_type()));
    metadata.set_size(native.len());
    if let Ok(modified) = native.modified() {
        metadata.set_modified_at(DateTime::<Utc>::from(modified));
    }
    metadata
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
