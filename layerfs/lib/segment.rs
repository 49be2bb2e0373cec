use std::{
    borrow::Borrow,
    fmt::{self, Display},
    str::FromStr,
};

use typed_path::{Utf8UnixComponent, Utf8UnixPath};

use crate::FsError;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The prefix that marks a whiteout entry in a layer.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// The entry that marks its directory as opaque.
pub const OPAQUE_MARKER: &str = ".wh..wh..opq";

/// The prefix shared by AUFS bookkeeping entries such as `.wh..wh.plnk` and `.wh..wh.aufs`.
const AUFS_META_PREFIX: &str = ".wh..wh.";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Represents a single segment of a path.
///
/// A segment is never empty, never contains `/`, and is never `.` or `..`.
///
/// ## Examples
///
/// ```
/// use std::str::FromStr;
/// use layerfs::PathSegment;
///
/// let segment = PathSegment::from_str(".wh.passwd").unwrap();
///
/// assert!(segment.is_whiteout());
/// assert_eq!(segment.whiteout_target().unwrap().as_str(), "passwd");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathSegment(String);

/// How the merge treats an entry, judged by its name alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentRole {
    /// An ordinary entry.
    Regular,

    /// The opaque marker of the enclosing directory.
    Opaque,

    /// A whiteout for the named sibling.
    Whiteout(PathSegment),

    /// An AUFS bookkeeping entry, ignored by the merge.
    AufsMeta,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PathSegment {
    /// Returns the string representation of the segment.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the bytes representation of the segment.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Returns the length of the segment in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the segment is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns `true` if this is the opaque marker.
    pub fn is_opaque_marker(&self) -> bool {
        self.0 == OPAQUE_MARKER
    }

    /// Returns `true` if this names a whiteout for a sibling entry.
    pub fn is_whiteout(&self) -> bool {
        matches!(self.role(), SegmentRole::Whiteout(_))
    }

    /// Returns the name hidden by this whiteout, if it is one.
    pub fn whiteout_target(&self) -> Option<PathSegment> {
        match self.role() {
            SegmentRole::Whiteout(target) => Some(target),
            _ => None,
        }
    }

    /// Classifies the segment for the merge.
    pub fn role(&self) -> SegmentRole {
        if self.is_opaque_marker() {
            return SegmentRole::Opaque;
        }

        if self.0.starts_with(AUFS_META_PREFIX) {
            return SegmentRole::AufsMeta;
        }

        match self.0.strip_prefix(WHITEOUT_PREFIX) {
            Some(target) => match PathSegment::try_from(target) {
                Ok(target) => SegmentRole::Whiteout(target),
                // `.wh.`, `.wh..` and `.wh...` hide nothing
                Err(_) => SegmentRole::AufsMeta,
            },
            None => SegmentRole::Regular,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl FromStr for PathSegment {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PathSegment::try_from(s)
    }
}

impl Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&str> for PathSegment {
    type Error = FsError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err(FsError::EmptyPathSegment);
        }

        if value.contains('/') || value.contains('\0') {
            return Err(FsError::InvalidPathComponent(value.to_string()));
        }

        match value {
            "." | ".." => Err(FsError::InvalidPathComponent(value.to_string())),
            _ => Ok(PathSegment(value.to_string())),
        }
    }
}

impl TryFrom<String> for PathSegment {
    type Error = FsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        PathSegment::try_from(value.as_str())
    }
}

impl<'a> TryFrom<&Utf8UnixComponent<'a>> for PathSegment {
    type Error = FsError;

    fn try_from(component: &Utf8UnixComponent<'a>) -> Result<Self, Self::Error> {
        match component {
            Utf8UnixComponent::Normal(component) => PathSegment::try_from(*component),
            _ => Err(FsError::InvalidPathComponent(component.to_string())),
        }
    }
}

impl Borrow<str> for PathSegment {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for PathSegment {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl AsRef<Utf8UnixPath> for PathSegment {
    #[inline]
    fn as_ref(&self) -> &Utf8UnixPath {
        Utf8UnixPath::new(&self.0)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_try_from_str() {
        assert!(PathSegment::try_from("example").is_ok());
        assert!("file name".parse::<PathSegment>().is_ok());
        assert!(PathSegment::try_from(".hidden").is_ok());

        assert!(PathSegment::from_str("").is_err());
        assert!(PathSegment::from_str(".").is_err());
        assert!(PathSegment::from_str("..").is_err());
        assert!(PathSegment::from_str("/").is_err());
        assert!(PathSegment::from_str("a/b").is_err());
        assert!(PathSegment::from_str("name/").is_err());
    }

    #[test]
    fn test_segment_display_and_len() {
        let segment = PathSegment::from_str("example").unwrap();
        assert_eq!(segment.to_string(), "example");
        assert_eq!(segment.len(), 7);
        assert_eq!(segment.as_bytes(), b"example");
    }

    #[test]
    fn test_segment_roles() {
        let role = |s: &str| PathSegment::from_str(s).unwrap().role();

        assert_eq!(role("passwd"), SegmentRole::Regular);
        assert_eq!(role(".whatever"), SegmentRole::Regular);
        assert_eq!(role(".wh..wh..opq"), SegmentRole::Opaque);
        assert_eq!(role(".wh..wh.plnk"), SegmentRole::AufsMeta);
        assert_eq!(role(".wh..wh.aufs"), SegmentRole::AufsMeta);
        assert_eq!(role(".wh."), SegmentRole::AufsMeta);
        assert_eq!(role(".wh.."), SegmentRole::AufsMeta);
        assert_eq!(
            role(".wh.c"),
            SegmentRole::Whiteout(PathSegment::from_str("c").unwrap())
        );
        assert_eq!(
            role(".wh..bashrc"),
            SegmentRole::Whiteout(PathSegment::from_str(".bashrc").unwrap())
        );
    }

    #[test]
    fn test_segment_whiteout_helpers() {
        let opq = PathSegment::from_str(OPAQUE_MARKER).unwrap();
        assert!(opq.is_opaque_marker());
        assert!(!opq.is_whiteout());

        let wh = PathSegment::from_str(".wh.foo").unwrap();
        assert!(wh.is_whiteout());
        assert_eq!(wh.whiteout_target().unwrap().as_str(), "foo");

        let plain = PathSegment::from_str("foo").unwrap();
        assert!(plain.whiteout_target().is_none());
    }
}
