use std::io::{self, Write};

use layerfs::{walk_dir, FileSystem, FsError, Metadata, ModeType, WalkAction};
use tar::{Builder, EntryType, Header};
use tracing::{debug, trace};
use typed_path::{Utf8UnixPath, Utf8UnixPathBuf};

use crate::ImageResult;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Serializes a file system into a tar stream and returns the writer.
///
/// The tree is written parents first, in name order, starting with the root as `./`. Metadata is
/// read without following symlinks. Regular files are streamed from [`FileSystem::open`],
/// symlinks keep their targets verbatim, and FIFOs and devices are written as headers only.
/// Sockets cannot be archived and are skipped.
///
/// ## Errors
///
/// Returns an error if:
/// - The file system cannot read symlinks
/// - Reading an entry or writing to `writer` fails
pub fn write_tar<W: Write>(fs: &dyn FileSystem, writer: W) -> ImageResult<W> {
    let links = fs
        .as_symlink_fs()
        .ok_or_else(|| FsError::SymlinkUnsupported(Utf8UnixPathBuf::from("/")))?;

    let mut builder = Builder::new(writer);
    let root = links.stat_link(Utf8UnixPath::new(""))?;
    let mut header = new_header(&root, EntryType::Directory, 0);
    builder.append_data(&mut header, "./", io::empty())?;

    let mut count = 0usize;
    walk_dir(fs, Utf8UnixPath::new(""), &mut |path, entry| {
        let metadata = links.stat_link(path)?;

        match entry.get_kind() {
            ModeType::Directory => {
                let mut header = new_header(&metadata, EntryType::Directory, 0);
                builder.append_data(&mut header, format!("{path}/"), io::empty())?;
            }
            ModeType::File => {
                let mut header = new_header(&metadata, EntryType::Regular, metadata.get_size());
                builder.append_data(&mut header, path.as_str(), fs.open(path)?)?;
            }
            ModeType::Symlink => {
                let target = links.read_link(path)?;
                let mut header = new_header(&metadata, EntryType::Symlink, 0);
                builder.append_link(&mut header, path.as_str(), target.as_str())?;
            }
            ModeType::Fifo => {
                let mut header = new_header(&metadata, EntryType::Fifo, 0);
                builder.append_data(&mut header, path.as_str(), io::empty())?;
            }
            ModeType::CharDevice => {
                let mut header = new_header(&metadata, EntryType::Char, 0);
                builder.append_data(&mut header, path.as_str(), io::empty())?;
            }
            ModeType::BlockDevice => {
                let mut header = new_header(&metadata, EntryType::Block, 0);
                builder.append_data(&mut header, path.as_str(), io::empty())?;
            }
            ModeType::Socket => {
                debug!(%path, "skipping socket");
                return Ok(WalkAction::Continue);
            }
        }

        trace!(%path, kind = %entry.get_kind(), "archived entry");
        count += 1;
        Ok(WalkAction::Continue)
    })?;

    debug!(entries = count + 1, "wrote tar archive");
    Ok(builder.into_inner()?)
}

fn new_header(metadata: &Metadata, entry_type: EntryType, size: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_size(size);
    header.set_mode(metadata.get_mode().get_permissions());
    header.set_uid(metadata.get_uid());
    header.set_gid(metadata.get_gid());
    header.set_mtime(metadata.get_modified_at().timestamp().max(0) as u64);
    header
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::{io::Read, sync::Arc};

    use layerfs::{fingerprint, ErrorKind, MemoryFileSystem, OverlayFileSystem, TarFileSystem};
    use tar::Archive;

    use super::*;

    #[test]
    fn test_write_tar_lists_merged_tree() -> anyhow::Result<()> {
        let merged = helper::merged()?;
        let archive = write_tar(&merged, Vec::new())?;

        let mut entries = Vec::new();
        for entry in Archive::new(archive.as_slice()).entries()? {
            let mut entry = entry?;
            let path = entry.path()?.to_string_lossy().into_owned();
            let kind = entry.header().entry_type();
            let link = entry
                .link_name()?
                .map(|l| l.to_string_lossy().into_owned());
            let mut data = String::new();
            entry.read_to_string(&mut data)?;
            entries.push((path, kind, link, data));
        }

        let paths: Vec<_> = entries.iter().map(|(p, ..)| p.as_str()).collect();
        assert_eq!(
            paths,
            vec!["./", "etc/", "etc/hosts", "foo/", "foo/a", "foo/b", "foo/baz"]
        );

        let baz = entries
            .iter()
            .find(|(p, ..)| p == "foo/baz")
            .ok_or_else(|| anyhow::anyhow!("foo/baz missing"))?;
        assert_eq!(baz.1, EntryType::Symlink);
        assert_eq!(baz.2.as_deref(), Some("/foo"));

        let a = entries
            .iter()
            .find(|(p, ..)| p == "foo/a")
            .ok_or_else(|| anyhow::anyhow!("foo/a missing"))?;
        assert_eq!(a.3, "hello world\n");

        Ok(())
    }

    #[test]
    fn test_write_tar_preserves_fingerprint() -> anyhow::Result<()> {
        let merged = helper::merged()?;
        let file = write_tar(&merged, tempfile::tempfile()?)?;
        let reopened = TarFileSystem::from_file(file)?;

        assert_eq!(fingerprint(&reopened)?, fingerprint(&merged)?);

        Ok(())
    }

    #[test]
    fn test_write_tar_requires_symlink_capability() -> anyhow::Result<()> {
        let mut fs = MemoryFileSystem::new().without_symlink_capability();
        fs.create_file("a", "x")?;

        let err = match write_tar(&fs, Vec::new()) {
            Err(e) => e,
            Ok(_) => anyhow::bail!("expected the export to be rejected"),
        };
        assert_eq!(err.kind(), ErrorKind::InvalidLink);

        Ok(())
    }

    mod helper {
        use super::*;

        /// Two layers: `foo/{a,b,c}` and `etc/hosts`, then a layer that removes `foo/c` and adds
        /// `foo/baz -> /foo`.
        pub(super) fn merged() -> anyhow::Result<OverlayFileSystem> {
            let mut base = MemoryFileSystem::new();
            base.create_file("foo/a", "hello world\n")?;
            base.create_file("foo/b", "")?;
            base.create_file("foo/c", "gone")?;
            base.create_file("etc/hosts", "127.0.0.1 localhost\n")?;

            let mut upper = MemoryFileSystem::new();
            upper.create_file("foo/.wh.c", "")?;
            upper.create_symlink("foo/baz", "/foo")?;

            let layers: Vec<Arc<dyn FileSystem>> = vec![Arc::new(base), Arc::new(upper)];
            Ok(OverlayFileSystem::new(layers)?)
        }
    }
}
