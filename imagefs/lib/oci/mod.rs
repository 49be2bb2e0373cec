//! Manifest resolution for the two image formats.
//!
//! A resolver reads an image root and produces the ordered list of layer blobs, base layer
//! first, for the selected manifest:
//! - [`DockerResolver`] handles the legacy `docker save` layout (`manifest.json`)
//! - [`OciResolver`] handles the OCI image layout (`oci-layout`, `index.json`, `blobs/`)

mod docker;
mod layout;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use docker::*;
pub use layout::*;

use std::{
    fmt::{self, Display},
    path::Path,
};

use getset::Getters;
use layerfs::FileSystem;
use serde::de::DeserializeOwned;
use typed_path::{Utf8UnixPath, Utf8UnixPathBuf};

use crate::{DefaultManifest, ImageError, ImageResult, LoadOptions};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The file that marks a Docker image root.
pub const DOCKER_MANIFEST_FILENAME: &str = "manifest.json";

/// The file that marks an OCI image layout.
pub const OCI_LAYOUT_FILENAME: &str = "oci-layout";

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Selects a manifest in an image root and lists its layers.
pub trait ManifestResolver {
    /// The manifest policy used when no reference is given and none is configured.
    fn default_manifest(&self) -> DefaultManifest;

    /// Resolves the layers of the manifest selected by `options`, base layer first.
    ///
    /// ## Errors
    ///
    /// Returns an error if:
    /// - No manifest matches the reference, or the default policy cannot pick one
    /// - The selected image does not match the platform filter
    /// - A manifest, index or config is missing or malformed
    fn resolve(&self, root: &dyn FileSystem, options: &LoadOptions) -> ImageResult<Vec<LayerBlob>>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The on-disk format of an image root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// The legacy Docker archive layout
    Docker,

    /// The OCI image layout
    Oci,
}

/// A layer of a resolved manifest.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct LayerBlob {
    /// The digest identifying the layer, e.g. `sha256:...`
    digest: String,

    /// The blob paths that may hold the layer, in the order they are tried
    candidates: Vec<Utf8UnixPathBuf>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ImageFormat {
    /// Detects the format of an image root. A Docker manifest takes precedence over an OCI layout
    /// marker.
    pub fn detect(root: &dyn FileSystem, root_path: &Path) -> ImageResult<Self> {
        if root.exists(Utf8UnixPath::new(DOCKER_MANIFEST_FILENAME))? {
            Ok(ImageFormat::Docker)
        } else if root.exists(Utf8UnixPath::new(OCI_LAYOUT_FILENAME))? {
            Ok(ImageFormat::Oci)
        } else {
            Err(ImageError::UnknownImageFormat(root_path.to_path_buf()))
        }
    }

    /// Returns the resolver for this format.
    pub fn resolver(&self) -> &'static dyn ManifestResolver {
        match self {
            ImageFormat::Docker => &DockerResolver,
            ImageFormat::Oci => &OciResolver,
        }
    }
}

impl LayerBlob {
    /// Creates a layer blob.
    pub fn new(digest: impl Into<String>, candidates: Vec<Utf8UnixPathBuf>) -> Self {
        Self {
            digest: digest.into(),
            candidates,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Decodes a JSON document stored at `path` in the image root.
pub(crate) fn read_json<T: DeserializeOwned>(root: &dyn FileSystem, path: &str) -> ImageResult<T> {
    let reader = root.open(Utf8UnixPath::new(path))?;
    Ok(serde_json::from_reader(reader)?)
}

/// Picks a manifest out of `count` candidates when no reference is given.
pub(crate) fn select_default(count: usize, policy: DefaultManifest) -> ImageResult<usize> {
    match (count, policy) {
        (0, _) => Err(ImageError::NoManifests),
        (1, _) | (_, DefaultManifest::First) => Ok(0),
        (n, DefaultManifest::RequireUnique) => Err(ImageError::AmbiguousManifest(n)),
    }
}

/// Fails unless an image built for `os`/`architecture` satisfies the platform filter.
pub(crate) fn check_platform(
    options: &LoadOptions,
    os: &str,
    architecture: &str,
) -> ImageResult<()> {
    match options.get_platform() {
        Some(platform) if !platform.matches(os, architecture) => Err(ImageError::PlatformMismatch {
            expected: platform.to_string(),
            found: format!("{os}/{architecture}"),
        }),
        _ => Ok(()),
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageFormat::Docker => write!(f, "docker"),
            ImageFormat::Oci => write!(f, "oci"),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
