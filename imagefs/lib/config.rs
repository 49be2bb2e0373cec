use std::{
    fmt::{self, Display},
    path::PathBuf,
    str::FromStr,
};

use getset::{Getters, Setters};
use typed_builder::TypedBuilder;

use crate::ImageError;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Options controlling which image is loaded and where scratch files go.
///
/// ```
/// use imagefs::{DefaultManifest, LoadOptions, Platform};
///
/// let options = LoadOptions::builder()
///     .reference("docker.io/library/alpine:3.20")
///     .platform("linux/arm64".parse::<Platform>().unwrap())
///     .default_manifest(DefaultManifest::First)
///     .build();
///
/// assert_eq!(options.get_reference().as_deref(), Some("docker.io/library/alpine:3.20"));
/// ```
#[derive(Debug, Clone, Default, TypedBuilder, Getters, Setters)]
#[getset(get = "pub with_prefix", set = "pub with_prefix")]
pub struct LoadOptions {
    /// The tag (Docker) or `org.opencontainers.image.ref.name` annotation (OCI) of the image to
    /// load. When absent, the default manifest policy applies.
    #[builder(default, setter(strip_option, into))]
    reference: Option<String>,

    /// Only accept an image built for this platform.
    #[builder(default, setter(strip_option))]
    platform: Option<Platform>,

    /// Overrides the format's default manifest policy.
    #[builder(default, setter(strip_option))]
    default_manifest: Option<DefaultManifest>,

    /// The directory in which the scratch directory is created. Defaults to the system temporary
    /// directory.
    #[builder(default, setter(strip_option, into))]
    scratch_dir: Option<PathBuf>,
}

/// How a manifest is chosen when no reference is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultManifest {
    /// The image must hold exactly one manifest.
    RequireUnique,

    /// Use the first manifest listed.
    First,
}

/// A target platform in the `os/arch[/variant]` form.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct Platform {
    /// The operating system, e.g. `linux`
    os: String,

    /// The CPU architecture, e.g. `amd64`
    architecture: String,

    /// The CPU variant, e.g. `v8`. Not used when matching.
    variant: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Platform {
    /// Creates a platform from its parts.
    pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            architecture: architecture.into(),
            variant: None,
        }
    }

    /// Returns `true` if an image built for `os`/`architecture` runs on this platform. Only the
    /// operating system and architecture are compared, exactly.
    pub fn matches(&self, os: &str, architecture: &str) -> bool {
        self.os == os && self.architecture == architecture
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl FromStr for Platform {
    type Err = ImageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(ImageError::InvalidPlatform(s.to_string()));
        }

        match parts.as_slice() {
            [os, architecture] => Ok(Platform::new(*os, *architecture)),
            [os, architecture, variant] => Ok(Platform {
                os: os.to_string(),
                architecture: architecture.to_string(),
                variant: Some(variant.to_string()),
            }),
            _ => Err(ImageError::InvalidPlatform(s.to_string())),
        }
    }
}

impl Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{variant}")?;
        }
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
