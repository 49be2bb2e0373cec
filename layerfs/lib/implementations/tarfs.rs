use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom},
};

use tar::{Archive, EntryType};
use tracing::{debug, warn};
use typed_path::{Utf8UnixComponent, Utf8UnixPath, Utf8UnixPathBuf};

use crate::{
    path, DirEntry, FileSystem, FsError, FsResult, Metadata, ModeType, SymlinkFileSystem,
};

use super::index::{EntryIndex, IndexEntry};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A read-only, random-access view over an uncompressed tar archive.
///
/// The archive headers are indexed once when the view is opened; file contents are read on
/// demand with positional reads against the single shared file handle, so any number of readers
/// can be open at the same time.
///
/// Archive quirks handled while indexing:
/// - `./` prefixes are stripped and the `./` entry itself describes the root
/// - members whose path contains `..` are skipped
/// - missing parent directories are synthesized
/// - a later member for the same path replaces an earlier one
/// - hard links become regular files sharing the data of their target
#[derive(Debug)]
pub struct TarFileSystem {
    file: File,
    index: EntryIndex<DataRange>,
}

/// Where the content of a regular file lives in the archive.
#[derive(Debug, Clone, Copy, Default)]
struct DataRange {
    offset: u64,
    size: u64,
}

/// A reader over one member's data.
struct TarFileReader<'a> {
    file: &'a File,
    offset: u64,
    remaining: u64,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl TarFileSystem {
    /// Indexes an already opened tar archive. The file is read from its start regardless of its
    /// current position.
    pub fn from_file(mut file: File) -> FsResult<Self> {
        file.seek(SeekFrom::Start(0))?;

        let mut index: EntryIndex<DataRange> = EntryIndex::new();
        let mut archive = Archive::new(&file);

        for entry in archive.entries()? {
            let entry = entry?;
            let raw_path = String::from_utf8_lossy(&entry.path_bytes()).into_owned();

            if Utf8UnixPath::new(&raw_path)
                .components()
                .any(|c| matches!(c, Utf8UnixComponent::ParentDir))
            {
                warn!(path = %raw_path, "skipping tar member that escapes the archive root");
                continue;
            }

            let key = path::sanitize(Utf8UnixPath::new(&raw_path)).to_string();
            let header = entry.header();
            let entry_type = header.entry_type();

            let kind = match entry_type {
                EntryType::Regular | EntryType::Continuous => ModeType::File,
                EntryType::Directory => ModeType::Directory,
                EntryType::Symlink => ModeType::Symlink,
                EntryType::Link => ModeType::File,
                EntryType::Fifo => ModeType::Fifo,
                EntryType::Char => ModeType::CharDevice,
                EntryType::Block => ModeType::BlockDevice,
                other => {
                    debug!(path = %raw_path, ?other, "skipping unsupported tar member");
                    continue;
                }
            };

            let mut metadata = Metadata::new(kind);
            metadata.set_permissions(header.mode().unwrap_or(0o644));
            metadata.set_uid(header.uid().unwrap_or(0));
            metadata.set_gid(header.gid().unwrap_or(0));
            metadata.set_modified_secs(header.mtime().unwrap_or(0) as i64);

            let link = entry
                .link_name_bytes()
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());

            match entry_type {
                EntryType::Link => {
                    let Some(target) = link else {
                        warn!(path = %raw_path, "skipping hard link without a target");
                        continue;
                    };

                    // Bound to the target member seen so far, not to a later replacement.
                    let target = path::sanitize(Utf8UnixPath::new(&target)).to_string();
                    let data = match index.get(&target) {
                        Some(existing) if existing.metadata.is_file() => existing.data,
                        Some(_) => {
                            warn!(path = %raw_path, %target, "skipping hard link to a non-file");
                            continue;
                        }
                        None => {
                            warn!(path = %raw_path, %target, "skipping dangling hard link");
                            continue;
                        }
                    };

                    metadata.set_size(data.size);
                    index.insert(
                        key,
                        IndexEntry {
                            metadata,
                            link: None,
                            data,
                        },
                    );
                }
                EntryType::Symlink => {
                    let Some(target) = link else {
                        warn!(path = %raw_path, "skipping symlink without a target");
                        continue;
                    };
                    metadata.set_size(target.len() as u64);
                    index.insert(
                        key,
                        IndexEntry {
                            metadata,
                            link: Some(Utf8UnixPathBuf::from(target)),
                            data: DataRange::default(),
                        },
                    );
                }
                _ => {
                    let data = if kind == ModeType::File {
                        DataRange {
                            offset: entry.raw_file_position(),
                            size: entry.size(),
                        }
                    } else {
                        DataRange::default()
                    };
                    metadata.set_size(data.size);
                    index.insert(
                        key,
                        IndexEntry {
                            metadata,
                            link: None,
                            data,
                        },
                    );
                }
            }
        }

        drop(archive);
        Ok(Self { file, index })
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl FileSystem for TarFileSystem {
    fn open(&self, path: &Utf8UnixPath) -> FsResult<Box<dyn Read + Send + '_>> {
        let (_, entry) = self.index.resolve(path, true)?;
        if !entry.metadata.is_file() {
            return Err(FsError::NotAFile(path.to_owned()));
        }

        Ok(Box::new(TarFileReader {
            file: &self.file,
            offset: entry.data.offset,
            remaining: entry.data.size,
        }))
    }

    fn read_directory(&self, path: &Utf8UnixPath) -> FsResult<Vec<DirEntry>> {
        self.index.read_directory(path)
    }

    fn stat(&self, path: &Utf8UnixPath) -> FsResult<Metadata> {
        self.index.stat(path)
    }

    fn as_symlink_fs(&self) -> Option<&dyn SymlinkFileSystem> {
        Some(self)
    }
}

impl SymlinkFileSystem for TarFileSystem {
    fn read_link(&self, path: &Utf8UnixPath) -> FsResult<Utf8UnixPathBuf> {
        self.index.read_link(path)
    }

    fn stat_link(&self, path: &Utf8UnixPath) -> FsResult<Metadata> {
        self.index.stat_link(path)
    }
}

impl Read for TarFileReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }

        let len = buf.len().min(self.remaining.min(usize::MAX as u64) as usize);
        let n = read_at(self.file, &mut buf[..len], self.offset)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "tar member data is truncated",
            ));
        }

        self.offset += n as u64;
        self.remaining -= n as u64;
        Ok(n)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, offset)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
