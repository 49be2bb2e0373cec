use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use thiserror::Error;
use typed_path::Utf8UnixPathBuf;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a file system operation.
pub type FsResult<T> = Result<T, FsError>;

/// An error that occurred during a file system operation.
#[derive(pretty_error_debug::Debug, Error)]
pub enum FsError {
    /// The path does not exist
    #[error("path does not exist: {0}")]
    NotFound(Utf8UnixPathBuf),

    /// The path is not a directory
    #[error("path is not a directory: {0}")]
    NotADirectory(Utf8UnixPathBuf),

    /// The path is not a regular file
    #[error("path is not a file: {0}")]
    NotAFile(Utf8UnixPathBuf),

    /// The path is not a symlink
    #[error("path is not a symlink: {0}")]
    NotASymlink(Utf8UnixPathBuf),

    /// The layer that owns a symlink cannot read symlink targets
    #[error("layer cannot read symlink targets: {0}")]
    SymlinkUnsupported(Utf8UnixPathBuf),

    /// Symlink resolution exceeded the hop limit
    #[error("too many levels of symbolic links: {0}")]
    TooManySymlinks(Utf8UnixPathBuf),

    /// Empty path segment
    #[error("empty path segment")]
    EmptyPathSegment,

    /// Invalid path component (e.g. ".", "..", "/")
    #[error("invalid path component: {0}")]
    InvalidPathComponent(String),

    /// The file name cannot be represented in a fingerprint summary
    #[error("file name contains a newline: {0:?}")]
    InvalidFileName(String),

    /// Overlay filesystem requires at least one layer
    #[error("overlay filesystem requires at least one layer")]
    OverlayFileSystemRequiresAtLeastOneLayer,

    /// A failure while reading one layer of an overlay
    #[error("layer {index} at {path:?}: {source}")]
    Layer {
        /// The index of the layer in the stack, base first
        index: usize,

        /// The path inside the layer being processed
        path: Utf8UnixPathBuf,

        /// The underlying error
        #[source]
        source: Box<FsError>,
    },

    /// IO error during filesystem operation
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Custom error.
    #[error(transparent)]
    Custom(#[from] AnyError),
}

/// The broad category of an error, as seen by callers that only need to branch on the kind of
/// failure rather than its details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A path, manifest, reference or blob does not resolve.
    NotFound,

    /// A symlink could not be read, or a non-symlink was read as one.
    InvalidLink,

    /// Symlink resolution did not terminate within the hop limit.
    SymlinkLoop,

    /// Valid input whose semantics are not implemented.
    Unsupported,

    /// A failure reported by the underlying storage or decoder.
    Io,
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FsError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> FsError {
        FsError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FsError::NotFound(_) => ErrorKind::NotFound,
            FsError::NotADirectory(_) => ErrorKind::NotFound,
            FsError::NotASymlink(_) | FsError::SymlinkUnsupported(_) => ErrorKind::InvalidLink,
            FsError::TooManySymlinks(_) => ErrorKind::SymlinkLoop,
            FsError::NotAFile(_)
            | FsError::EmptyPathSegment
            | FsError::InvalidPathComponent(_)
            | FsError::InvalidFileName(_)
            | FsError::OverlayFileSystemRequiresAtLeastOneLayer => ErrorKind::Unsupported,
            FsError::Layer { source, .. } => source.kind(),
            FsError::Io(e) if e.kind() == io::ErrorKind::NotFound => ErrorKind::NotFound,
            FsError::Io(_) | FsError::Custom(_) => ErrorKind::Io,
        }
    }

    /// Returns `true` if the error means the path does not exist.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
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

/// Creates an `Ok` `FsResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> FsResult<T> {
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

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::InvalidLink => "invalid link",
            ErrorKind::SymlinkLoop => "symlink loop",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Io => "io failure",
        };
        write!(f, "{name}")
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            FsError::NotFound("a".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            FsError::NotASymlink("a".into()).kind(),
            ErrorKind::InvalidLink
        );
        assert_eq!(
            FsError::SymlinkUnsupported("a".into()).kind(),
            ErrorKind::InvalidLink
        );
        assert_eq!(
            FsError::TooManySymlinks("a".into()).kind(),
            ErrorKind::SymlinkLoop
        );
        assert_eq!(
            FsError::Io(io::Error::new(io::ErrorKind::NotFound, "gone")).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            FsError::Io(io::Error::other("boom")).kind(),
            ErrorKind::Io
        );
    }

    #[test]
    fn test_error_kind_sees_through_layer_context() {
        let error = FsError::Layer {
            index: 2,
            path: "etc/passwd".into(),
            source: Box::new(FsError::NotASymlink("etc/passwd".into())),
        };

        assert_eq!(error.kind(), ErrorKind::InvalidLink);
        assert!(error.to_string().contains("layer 2"));
    }
}
