use std::io::Read;

use typed_path::{Utf8UnixPath, Utf8UnixPathBuf};

use crate::{
    path, DirEntry, FileSystem, FsError, FsResult, Metadata, ModeType, SymlinkFileSystem,
};

use super::index::{EntryIndex, IndexEntry};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An in-memory layer.
///
/// Entries are added with the `create_*` methods, which create missing parent directories on the
/// way. Adding an entry at a path that already exists replaces it, the same way a later tar
/// member replaces an earlier one.
///
/// ```
/// use layerfs::{FileSystem, MemoryFileSystem};
/// use std::io::Read;
/// use typed_path::Utf8UnixPath;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut layer = MemoryFileSystem::new();
/// layer.create_file("etc/hostname", "box\n")?;
/// layer.create_symlink("hostname", "/etc/hostname")?;
///
/// let mut content = String::new();
/// layer.open(Utf8UnixPath::new("hostname"))?.read_to_string(&mut content)?;
/// assert_eq!(content, "box\n");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryFileSystem {
    index: EntryIndex<Vec<u8>>,
    symlink_capability: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MemoryFileSystem {
    /// Creates a new memory file system holding only an empty root directory.
    pub fn new() -> Self {
        Self {
            index: EntryIndex::new(),
            symlink_capability: true,
        }
    }

    /// Hides the symlink capability, so the file system behaves like a layer that cannot read
    /// symlink targets. Symlinks are still listed.
    pub fn without_symlink_capability(mut self) -> Self {
        self.symlink_capability = false;
        self
    }

    /// Creates a directory and any missing parents.
    pub fn create_directory(&mut self, path: impl AsRef<str>) -> FsResult<()> {
        let key = Self::key(path.as_ref());
        self.index.insert(key, IndexEntry::directory());
        Ok(())
    }

    /// Creates a regular file with the given content.
    pub fn create_file(
        &mut self,
        path: impl AsRef<str>,
        content: impl Into<Vec<u8>>,
    ) -> FsResult<()> {
        let key = Self::non_root_key(path.as_ref())?;
        let content = content.into();
        let mut metadata = Metadata::new(ModeType::File);
        metadata.set_size(content.len() as u64);

        self.index.insert(
            key,
            IndexEntry {
                metadata,
                link: None,
                data: content,
            },
        );
        Ok(())
    }

    /// Creates a symbolic link pointing to `target`. The target is stored verbatim.
    pub fn create_symlink(
        &mut self,
        path: impl AsRef<str>,
        target: impl AsRef<str>,
    ) -> FsResult<()> {
        let key = Self::non_root_key(path.as_ref())?;
        let target = Utf8UnixPathBuf::from(target.as_ref());
        let mut metadata = Metadata::new(ModeType::Symlink);
        metadata.set_size(target.as_str().len() as u64);

        self.index.insert(
            key,
            IndexEntry {
                metadata,
                link: Some(target),
                data: Vec::new(),
            },
        );
        Ok(())
    }

    /// Creates an entry with explicit metadata, such as a device node or a fifo.
    pub fn create_entry(&mut self, path: impl AsRef<str>, metadata: Metadata) -> FsResult<()> {
        let key = Self::non_root_key(path.as_ref())?;
        self.index.insert(
            key,
            IndexEntry {
                metadata,
                link: None,
                data: Vec::new(),
            },
        );
        Ok(())
    }

    fn key(path: &str) -> String {
        path::sanitize(Utf8UnixPath::new(path)).to_string()
    }

    fn non_root_key(path: &str) -> FsResult<String> {
        let key = Self::key(path);
        if key.is_empty() {
            return Err(FsError::InvalidPathComponent(path.to_string()));
        }
        Ok(key)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for MemoryFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for MemoryFileSystem {
    fn open(&self, path: &Utf8UnixPath) -> FsResult<Box<dyn Read + Send + '_>> {
        let (_, entry) = self.index.resolve(path, true)?;
        if !entry.metadata.is_file() {
            return Err(FsError::NotAFile(path.to_owned()));
        }
        Ok(Box::new(entry.data.as_slice()))
    }

    fn read_directory(&self, path: &Utf8UnixPath) -> FsResult<Vec<DirEntry>> {
        self.index.read_directory(path)
    }

    fn stat(&self, path: &Utf8UnixPath) -> FsResult<Metadata> {
        self.index.stat(path)
    }

    fn as_symlink_fs(&self) -> Option<&dyn SymlinkFileSystem> {
        if self.symlink_capability {
            Some(self)
        } else {
            None
        }
    }
}

impl SymlinkFileSystem for MemoryFileSystem {
    fn read_link(&self, path: &Utf8UnixPath) -> FsResult<Utf8UnixPathBuf> {
        self.index.read_link(path)
    }

    fn stat_link(&self, path: &Utf8UnixPath) -> FsResult<Metadata> {
        self.index.stat_link(path)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memoryfs_create_file_creates_parents() -> anyhow::Result<()> {
        let mut fs = MemoryFileSystem::new();
        fs.create_file("a/b/c.txt", "hi")?;

        assert!(fs.stat(Utf8UnixPath::new("a"))?.is_dir());
        assert!(fs.stat(Utf8UnixPath::new("/a/b"))?.is_dir());
        assert_eq!(fs.stat(Utf8UnixPath::new("a/b/c.txt"))?.get_size(), 2);

        let names: Vec<_> = fs
            .read_directory(Utf8UnixPath::new("a/b"))?
            .into_iter()
            .map(|e| e.get_name().to_string())
            .collect();
        assert_eq!(names, vec!["c.txt"]);

        Ok(())
    }

    #[test]
    fn test_memoryfs_read_directory_sorted() -> anyhow::Result<()> {
        let mut fs = MemoryFileSystem::new();
        for name in ["zeta", "alpha", "mid/inner", "beta"] {
            fs.create_file(name, "")?;
        }

        let names: Vec<_> = fs
            .read_directory(Utf8UnixPath::new(""))?
            .into_iter()
            .map(|e| e.get_name().to_string())
            .collect();
        assert_eq!(names, vec!["alpha", "beta", "mid", "zeta"]);

        Ok(())
    }

    #[test]
    fn test_memoryfs_symlinks() -> anyhow::Result<()> {
        let mut fs = MemoryFileSystem::new();
        fs.create_file("data/file", "content")?;
        fs.create_symlink("link", "data")?;

        let mut content = String::new();
        fs.open(Utf8UnixPath::new("link/file"))?
            .read_to_string(&mut content)?;
        assert_eq!(content, "content");

        assert_eq!(fs.read_link(Utf8UnixPath::new("link"))?.as_str(), "data");
        assert!(fs.stat_link(Utf8UnixPath::new("link"))?.is_symlink());
        assert!(fs.stat(Utf8UnixPath::new("link"))?.is_dir());
        assert!(matches!(
            fs.read_link(Utf8UnixPath::new("data")),
            Err(FsError::NotASymlink(_))
        ));

        Ok(())
    }

    #[test]
    fn test_memoryfs_replace_directory_with_file() -> anyhow::Result<()> {
        let mut fs = MemoryFileSystem::new();
        fs.create_file("dir/child", "x")?;
        fs.create_file("dir", "now a file")?;

        assert!(fs.stat(Utf8UnixPath::new("dir"))?.is_file());
        assert!(!fs.exists(Utf8UnixPath::new("dir/child"))?);

        Ok(())
    }

    #[test]
    fn test_memoryfs_without_symlink_capability() -> anyhow::Result<()> {
        let mut fs = MemoryFileSystem::new();
        fs.create_symlink("link", "target")?;
        let fs = fs.without_symlink_capability();

        assert!(fs.as_symlink_fs().is_none());
        assert!(fs.read_directory(Utf8UnixPath::new(""))?[0].is_symlink());

        Ok(())
    }

    #[test]
    fn test_memoryfs_open_directory_fails() {
        let fs = MemoryFileSystem::new();
        assert!(matches!(
            fs.open(Utf8UnixPath::new("/")),
            Err(FsError::NotAFile(_))
        ));
    }
}
