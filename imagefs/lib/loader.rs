use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use futures::future::join_all;
use getset::Getters;
use layerfs::{FileSystem, OverlayFileSystem, TarFileSystem};
use tempfile::{NamedTempFile, TempDir, TempPath};
use tracing::{debug, info, warn};

use crate::{
    decompress::decompress,
    image::ImageRoot,
    oci::{ImageFormat, LayerBlob},
    ImageError, ImageResult, LoadOptions,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const SCRATCH_DIR_PREFIX: &str = "imagefs-";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A loaded image: the merged file system of the selected manifest together with every resource
/// backing it.
///
/// The layer views and the scratch files they read from stay alive until [`LoadedImage::close`]
/// is called or the image is dropped.
#[derive(Getters)]
pub struct LoadedImage {
    /// The format of the image root
    #[getset(get = "pub with_prefix")]
    format: Option<ImageFormat>,

    /// The digests of the merged layers, base first
    #[getset(get = "pub with_prefix")]
    layer_digests: Vec<String>,

    filesystem: Option<OverlayFileSystem>,
    root: Option<Arc<dyn FileSystem>>,
    scratch_files: Vec<TempPath>,
    scratch_dir: Option<TempDir>,
}

/// A decoded layer and the scratch file it reads from.
type OpenedLayer = (Arc<dyn FileSystem>, TempPath);

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LoadedImage {
    /// Returns the merged file system.
    ///
    /// ## Errors
    ///
    /// Returns [`ImageError::ImageClosed`] once the image has been closed.
    pub fn filesystem(&self) -> ImageResult<&OverlayFileSystem> {
        self.filesystem.as_ref().ok_or(ImageError::ImageClosed)
    }

    /// Returns `true` once the image has been closed.
    pub fn is_closed(&self) -> bool {
        self.scratch_dir.is_none()
    }

    /// Returns the directory holding the scratch files, until the image is closed.
    pub fn scratch_dir(&self) -> Option<&Path> {
        self.scratch_dir.as_ref().map(TempDir::path)
    }

    /// Releases the merged file system, the layer views and every scratch file.
    ///
    /// Every resource is released even if one of them fails; the first failure is returned.
    /// Calling `close` again is a no-op.
    pub fn close(&mut self) -> ImageResult<()> {
        if self.is_closed() {
            return Ok(());
        }

        self.filesystem = None;
        self.root = None;

        let mut first_error: Option<ImageError> = None;
        for scratch_file in self.scratch_files.drain(..) {
            if let Err(e) = scratch_file.close() {
                warn!(error = %e, "failed to remove scratch file");
                first_error.get_or_insert(e.into());
            }
        }

        if let Some(scratch_dir) = self.scratch_dir.take() {
            if let Err(e) = scratch_dir.close() {
                warn!(error = %e, "failed to remove scratch directory");
                first_error.get_or_insert(e.into());
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Loads the image at `path` and merges the layers of the manifest selected by `options`.
///
/// The image may be a directory or a tarball (optionally gzip compressed) in either the Docker
/// or the OCI layout. Layers are decompressed into scratch files concurrently on the blocking
/// pool, then merged base first.
///
/// ## Errors
///
/// Returns an error if:
/// - The image root cannot be opened or its format is not recognized
/// - No manifest matches the reference, or the platform filter rejects the image
/// - A layer blob is missing, compressed with an unsupported format, or not a valid tar archive
///
/// Everything opened before the failure is released before returning.
///
/// ## Examples
///
/// ```no_run
/// use imagefs::{load, LoadOptions};
/// use layerfs::FileSystem;
/// use typed_path::Utf8UnixPath;
///
/// # async fn run() -> imagefs::ImageResult<()> {
/// let options = LoadOptions::builder().reference("alpine:3.20").build();
/// let mut image = load("alpine.tar", options).await?;
///
/// let entries = image.filesystem()?.read_directory(Utf8UnixPath::new("/etc"))?;
/// println!("{} entries in /etc", entries.len());
///
/// image.close()?;
/// # Ok(())
/// # }
/// ```
pub async fn load(path: impl AsRef<Path>, options: LoadOptions) -> ImageResult<LoadedImage> {
    let path = path.as_ref().to_path_buf();

    let mut builder = tempfile::Builder::new();
    builder.prefix(SCRATCH_DIR_PREFIX);
    let scratch_dir = match options.get_scratch_dir() {
        Some(dir) => builder.tempdir_in(dir)?,
        None => builder.tempdir()?,
    };

    let mut image = LoadedImage {
        format: None,
        layer_digests: Vec::new(),
        filesystem: None,
        root: None,
        scratch_files: Vec::new(),
        scratch_dir: Some(scratch_dir),
    };

    match load_into(&mut image, path, options).await {
        Ok(()) => Ok(image),
        Err(e) => {
            if let Err(close_error) = image.close() {
                warn!(error = %close_error, "failed to release a partially loaded image");
            }
            Err(e)
        }
    }
}

async fn load_into(
    image: &mut LoadedImage,
    path: PathBuf,
    options: LoadOptions,
) -> ImageResult<()> {
    let scratch_path = image
        .scratch_dir()
        .map(Path::to_path_buf)
        .ok_or(ImageError::ImageClosed)?;

    let root = {
        let path = path.clone();
        let scratch_path = scratch_path.clone();
        tokio::task::spawn_blocking(move || ImageRoot::open(&path, &scratch_path)).await??
    };
    let (root, root_scratch) = root.into_parts();
    image.root = Some(root.clone());
    image.scratch_files.extend(root_scratch);

    let (format, blobs) = {
        let root = root.clone();
        let path = path.clone();
        tokio::task::spawn_blocking(move || {
            let format = ImageFormat::detect(root.as_ref(), &path)?;
            let blobs = format.resolver().resolve(root.as_ref(), &options)?;
            Ok::<_, ImageError>((format, blobs))
        })
        .await??
    };
    image.format = Some(format);
    info!(
        image = %path.display(),
        %format,
        layers = blobs.len(),
        "resolved image manifest"
    );

    let futures = blobs.into_iter().enumerate().map(|(index, blob)| {
        let root = root.clone();
        let scratch_path = scratch_path.clone();
        async move {
            let digest = blob.get_digest().clone();
            let result = tokio::task::spawn_blocking(move || {
                load_layer(root.as_ref(), &blob, &scratch_path)
            })
            .await
            .map_err(ImageError::from)
            .and_then(|r| r);
            (index, digest, result)
        }
    });

    let mut results = join_all(futures).await;
    results.sort_by_key(|(index, _, _)| *index);

    let mut layers = Vec::with_capacity(results.len());
    let mut first_error = None;
    for (_, digest, result) in results {
        match result {
            Ok((layer, scratch_file)) => {
                image.scratch_files.push(scratch_file);
                image.layer_digests.push(digest);
                layers.push(layer);
            }
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }

    let filesystem = tokio::task::spawn_blocking(move || OverlayFileSystem::new(layers)).await??;
    debug!(layers = filesystem.layer_count(), "merged image layers");
    image.filesystem = Some(filesystem);

    Ok(())
}

/// Decompresses one layer into a scratch file and indexes it.
///
/// The candidate blob paths are tried in order; a candidate that does not exist is skipped.
fn load_layer(
    root: &dyn FileSystem,
    blob: &LayerBlob,
    scratch_dir: &Path,
) -> ImageResult<OpenedLayer> {
    for candidate in blob.get_candidates() {
        let source = match root.open(candidate) {
            Ok(source) => source,
            Err(e) if e.is_not_found() => {
                debug!(digest = %blob.get_digest(), %candidate, "layer blob candidate not found");
                continue;
            }
            Err(e) => {
                return Err(ImageError::from(e).in_layer(blob.get_digest(), candidate.as_str()))
            }
        };

        let open = || -> ImageResult<OpenedLayer> {
            let (mut file, scratch_file) = NamedTempFile::new_in(scratch_dir)?.into_parts();
            let (compression, size) = decompress(source, &mut file)?;
            debug!(
                digest = %blob.get_digest(),
                %candidate,
                %compression,
                size,
                "unpacked layer"
            );

            let layer: Arc<dyn FileSystem> = Arc::new(TarFileSystem::from_file(file)?);
            Ok((layer, scratch_file))
        };

        return open().map_err(|e| e.in_layer(blob.get_digest(), candidate.as_str()));
    }

    Err(ImageError::LayerNotFound {
        digest: blob.get_digest().clone(),
        tried: blob
            .get_candidates()
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", "),
    })
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Drop for LoadedImage {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to release image resources");
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
