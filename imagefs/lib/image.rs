use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
};

use getset::Getters;
use layerfs::{FileSystem, NativeFileSystem, TarFileSystem};
use tempfile::{NamedTempFile, TempPath};
use tracing::debug;

use crate::{decompress::decompress, ImageResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The opened root of an image: either a directory on the host or a tarball unpacked into a
/// scratch file.
#[derive(Getters)]
#[getset(get = "pub with_prefix")]
pub struct ImageRoot {
    /// The view over the image root
    filesystem: Arc<dyn FileSystem>,

    /// The decompressed tarball backing the view, if the root was a file
    scratch_file: Option<TempPath>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ImageRoot {
    /// Opens the image at `path`.
    ///
    /// A directory is used in place. A file is treated as a tarball, possibly compressed, and is
    /// decompressed into a scratch file under `scratch_dir` before being indexed.
    ///
    /// ## Errors
    ///
    /// Returns an error if:
    /// - `path` does not exist
    /// - The tarball is compressed with an unsupported format
    /// - The tarball cannot be read or indexed
    pub fn open(path: impl AsRef<Path>, scratch_dir: impl AsRef<Path>) -> ImageResult<Self> {
        let path = path.as_ref();
        if path.is_dir() {
            debug!(path = %path.display(), "opening image directory");
            return Ok(Self {
                filesystem: Arc::new(NativeFileSystem::new(path)),
                scratch_file: None,
            });
        }

        let source = File::open(path)?;
        let (mut file, scratch_file) = NamedTempFile::new_in(scratch_dir)?.into_parts();
        let (compression, size) = decompress(source, &mut file)?;
        debug!(
            path = %path.display(),
            %compression,
            size,
            "unpacked image tarball"
        );

        Ok(Self {
            filesystem: Arc::new(TarFileSystem::from_file(file)?),
            scratch_file: Some(scratch_file),
        })
    }

    /// Splits the root into its view and its scratch file.
    pub fn into_parts(self) -> (Arc<dyn FileSystem>, Option<TempPath>) {
        (self.filesystem, self.scratch_file)
    }

    /// Returns the path of the scratch file, if any.
    pub fn scratch_path(&self) -> Option<PathBuf> {
        self.scratch_file.as_ref().map(|p| p.to_path_buf())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::io::Read;

    use flate2::{write::GzEncoder, Compression as GzLevel};
    use typed_path::Utf8UnixPath;

    use super::*;

    #[test]
    fn test_image_root_directory() -> anyhow::Result<()> {
        let image = tempfile::tempdir()?;
        let scratch = tempfile::tempdir()?;
        std::fs::write(image.path().join("manifest.json"), "[]")?;

        let root = ImageRoot::open(image.path(), scratch.path())?;
        assert!(root.get_scratch_file().is_none());
        assert!(root
            .get_filesystem()
            .exists(Utf8UnixPath::new("manifest.json"))?);

        Ok(())
    }

    #[test]
    fn test_image_root_gzip_tarball() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let scratch = tempfile::tempdir()?;
        let tarball = dir.path().join("image.tar.gz");
        helper::write_tarball(&tarball, &[("oci-layout", b"{}"), ("index.json", b"{\"x\":1}")])?;

        let root = ImageRoot::open(&tarball, scratch.path())?;
        let scratch_path = root.scratch_path().ok_or_else(|| anyhow::anyhow!("no scratch"))?;
        assert!(scratch_path.starts_with(scratch.path()));

        let mut content = String::new();
        root.get_filesystem()
            .open(Utf8UnixPath::new("index.json"))?
            .read_to_string(&mut content)?;
        assert_eq!(content, "{\"x\":1}");

        drop(root);
        assert!(!scratch_path.exists());

        Ok(())
    }

    #[test]
    fn test_image_root_missing() -> anyhow::Result<()> {
        let scratch = tempfile::tempdir()?;
        let err = match ImageRoot::open(scratch.path().join("missing.tar"), scratch.path()) {
            Err(e) => e,
            Ok(_) => anyhow::bail!("expected a missing image to fail"),
        };
        assert_eq!(err.kind(), layerfs::ErrorKind::NotFound);

        Ok(())
    }

    mod helper {
        use super::*;

        pub(super) fn write_tarball(path: &Path, files: &[(&str, &[u8])]) -> anyhow::Result<()> {
            let encoder = GzEncoder::new(File::create(path)?, GzLevel::default());
            let mut builder = tar::Builder::new(encoder);
            for (name, data) in files {
                let mut header = tar::Header::new_gnu();
                header.set_size(data.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder.append_data(&mut header, name, *data)?;
            }
            builder.into_inner()?.finish()?;
            Ok(())
        }
    }
}
