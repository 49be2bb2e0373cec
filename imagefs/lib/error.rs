use std::{
    error::Error,
    fmt::{self, Display},
    io,
    path::PathBuf,
};

use layerfs::{ErrorKind, FsError};
use thiserror::Error;

use crate::decompress::Compression;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of an image operation.
pub type ImageResult<T> = Result<T, ImageError>;

/// An error that occurred while loading or reading an image.
#[derive(pretty_error_debug::Debug, Error)]
pub enum ImageError {
    /// An error from a file system view.
    #[error("file system error: {0}")]
    Fs(#[from] FsError),

    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A manifest, index or config could not be decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An error that occurred when a join handle returned an error.
    #[error("join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    /// The image root holds neither a Docker nor an OCI image.
    #[error("not a Docker or OCI image: {0}")]
    UnknownImageFormat(PathBuf),

    /// The image does not list any manifest.
    #[error("no manifests found")]
    NoManifests,

    /// No reference was given and the image holds more than one manifest.
    #[error("{0} manifests found, a reference must be specified")]
    AmbiguousManifest(usize),

    /// No manifest matches the requested reference.
    #[error("no manifest found for reference: {0}")]
    ManifestNotFound(String),

    /// The selected image was built for a different platform.
    #[error("image platform {found} does not match {expected}")]
    PlatformMismatch {
        /// The requested platform
        expected: String,

        /// The platform declared by the image config
        found: String,
    },

    /// A platform string is not in the `os/arch[/variant]` form.
    #[error("invalid platform: {0}")]
    InvalidPlatform(String),

    /// The OCI layout version is not supported.
    #[error("unsupported image layout version: {0}")]
    UnsupportedLayoutVersion(String),

    /// The layer or image is compressed with an unsupported format.
    #[error("unsupported compression: {0}")]
    UnsupportedCompression(Compression),

    /// The image was closed and its file system is no longer available.
    #[error("image is closed")]
    ImageClosed,

    /// No blob exists for a layer under any of its candidate paths.
    #[error("layer {digest} not found, tried: {tried}")]
    LayerNotFound {
        /// The digest of the layer
        digest: String,

        /// The blob paths that were tried, comma separated
        tried: String,
    },

    /// A failure while loading one layer.
    #[error("layer {digest} at {path}: {source}")]
    Layer {
        /// The digest of the layer
        digest: String,

        /// The blob path being processed
        path: String,

        /// The underlying error
        #[source]
        source: Box<ImageError>,
    },

    /// An error that can represent any error.
    #[error(transparent)]
    Custom(#[from] AnyError),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ImageError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> ImageError {
        ImageError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Wraps the error with the layer it occurred in.
    pub fn in_layer(self, digest: impl Into<String>, path: impl Into<String>) -> ImageError {
        ImageError::Layer {
            digest: digest.into(),
            path: path.into(),
            source: Box::new(self),
        }
    }

    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ImageError::Fs(e) => e.kind(),
            ImageError::Io(e) if e.kind() == io::ErrorKind::NotFound => ErrorKind::NotFound,
            ImageError::NoManifests
            | ImageError::AmbiguousManifest(_)
            | ImageError::ManifestNotFound(_)
            | ImageError::PlatformMismatch { .. }
            | ImageError::LayerNotFound { .. } => ErrorKind::NotFound,
            ImageError::UnknownImageFormat(_)
            | ImageError::InvalidPlatform(_)
            | ImageError::UnsupportedLayoutVersion(_)
            | ImageError::UnsupportedCompression(_) => ErrorKind::Unsupported,
            ImageError::Layer { source, .. } => source.kind(),
            ImageError::Io(_)
            | ImageError::Json(_)
            | ImageError::JoinError(_)
            | ImageError::ImageClosed
            | ImageError::Custom(_) => ErrorKind::Io,
        }
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `ImageResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> ImageResult<T> {
    Result::Ok(value)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_error_kinds() {
        assert_eq!(ImageError::NoManifests.kind(), ErrorKind::NotFound);
        assert_eq!(
            ImageError::UnsupportedLayoutVersion("2.0.0".into()).kind(),
            ErrorKind::Unsupported
        );
        assert_eq!(
            ImageError::UnsupportedCompression(Compression::Zstd).kind(),
            ErrorKind::Unsupported
        );
        assert_eq!(
            ImageError::Fs(FsError::TooManySymlinks("a".into())).kind(),
            ErrorKind::SymlinkLoop
        );
    }

    #[test]
    fn test_image_error_layer_context() {
        let error = ImageError::LayerNotFound {
            digest: "sha256:abc".into(),
            tried: "abc.tar, abc.tar.gz".into(),
        }
        .in_layer("sha256:abc", "abc.tar");

        assert_eq!(error.kind(), ErrorKind::NotFound);
        let message = error.to_string();
        assert!(message.contains("sha256:abc"));
        assert!(message.contains("abc.tar"));
    }
}
