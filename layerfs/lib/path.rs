//! `layerfs::path` contains lexical path helpers and the symlink-aware resolver shared by the
//! single-layer file systems.
//!
//! All paths handled here are Unix paths, independent of the host platform. A "key" is the
//! canonical form of a path inside a file system: relative, cleaned, with the root spelled `""`.

use std::collections::VecDeque;

use typed_path::{Utf8UnixComponent, Utf8UnixPath, Utf8UnixPathBuf};

use crate::{FsError, FsResult, PathSegment};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The maximum number of symlinks expanded while resolving a single path.
pub const MAX_SYMLINK_HOPS: usize = 40;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// What a resolver lookup found at a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// A directory.
    Directory,

    /// A symlink with the given target.
    Symlink(Utf8UnixPathBuf),

    /// A regular file or special file.
    Other,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Lexically cleans a path.
///
/// Rules:
/// - Repeated separators, trailing separators and `.` components are removed
/// - `name/..` pairs are collapsed
/// - Leading `..` components are kept for relative paths and dropped for absolute ones
/// - An empty relative result is `.`
///
/// ## Examples
///
/// ```
/// use layerfs::path::clean;
/// use typed_path::Utf8UnixPath;
///
/// assert_eq!(clean(Utf8UnixPath::new("a/./b/../c/")).as_str(), "a/c");
/// assert_eq!(clean(Utf8UnixPath::new("../../a")).as_str(), "../../a");
/// assert_eq!(clean(Utf8UnixPath::new("/../a")).as_str(), "/a");
/// ```
pub fn clean(path: &Utf8UnixPath) -> Utf8UnixPathBuf {
    let absolute = path.is_absolute();
    let mut parts: Vec<&str> = Vec::new();

    for component in path.components() {
        match component {
            Utf8UnixComponent::RootDir | Utf8UnixComponent::CurDir => {}
            Utf8UnixComponent::ParentDir => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push(".."),
            },
            Utf8UnixComponent::Normal(name) => parts.push(name),
        }
    }

    let joined = parts.join("/");
    if absolute {
        Utf8UnixPathBuf::from(format!("/{joined}"))
    } else if joined.is_empty() {
        Utf8UnixPathBuf::from(".")
    } else {
        Utf8UnixPathBuf::from(joined)
    }
}

/// Turns any path into a key: the path is treated as rooted, cleaned, and returned without the
/// leading separator. The root itself is the empty key.
///
/// ## Examples
///
/// ```
/// use layerfs::path::sanitize;
/// use typed_path::Utf8UnixPath;
///
/// assert_eq!(sanitize(Utf8UnixPath::new("/foo//bar/")).as_str(), "foo/bar");
/// assert_eq!(sanitize(Utf8UnixPath::new("../../etc")).as_str(), "etc");
/// assert_eq!(sanitize(Utf8UnixPath::new(".")).as_str(), "");
/// ```
pub fn sanitize(path: &Utf8UnixPath) -> Utf8UnixPathBuf {
    let rooted = Utf8UnixPath::new("/").join(path);
    let cleaned = clean(&rooted);
    Utf8UnixPathBuf::from(cleaned.as_str().trim_start_matches('/'))
}

/// Splits a path into its sanitized segments.
pub fn segments(path: &Utf8UnixPath) -> FsResult<Vec<PathSegment>> {
    sanitize(path)
        .components()
        .map(|ref c| PathSegment::try_from(c))
        .collect()
}

/// Splits a path into its sanitized parent and final segment. The root has no final segment.
pub fn split_last(path: &Utf8UnixPath) -> FsResult<(Utf8UnixPathBuf, Option<PathSegment>)> {
    let key = sanitize(path);
    let name = match key.file_name() {
        Some(name) => Some(PathSegment::try_from(name)?),
        None => None,
    };
    let parent = key
        .parent()
        .map(|p| p.to_owned())
        .unwrap_or_else(|| Utf8UnixPathBuf::from(""));
    Ok((parent, name))
}

/// Resolves `path` to a key inside a single file system, following symlinks found along the way.
///
/// `lookup` is asked about each intermediate key. Symlink targets are cleaned lexically; absolute
/// targets restart at the root, relative ones continue from the directory holding the symlink,
/// and `..` never climbs above the root. The final component is only followed when
/// `follow_last` is set.
///
/// ## Errors
///
/// - [`FsError::NotFound`] if a component does not exist
/// - [`FsError::NotADirectory`] if a non-final component is neither a directory nor a symlink
/// - [`FsError::TooManySymlinks`] if more than [`MAX_SYMLINK_HOPS`] symlinks are expanded
pub fn resolve_within<F>(
    path: &Utf8UnixPath,
    follow_last: bool,
    mut lookup: F,
) -> FsResult<Utf8UnixPathBuf>
where
    F: FnMut(&str) -> FsResult<Option<Lookup>>,
{
    let mut pending: VecDeque<String> = sanitize(path)
        .components()
        .map(|c| c.to_string())
        .collect();
    let mut resolved: Vec<String> = Vec::new();
    let mut hops = 0;

    while let Some(name) = pending.pop_front() {
        if name == ".." {
            resolved.pop();
            continue;
        }

        resolved.push(name);
        let key = resolved.join("/");
        let is_last = pending.is_empty();

        match lookup(&key)? {
            None => return Err(FsError::NotFound(path.to_owned())),
            Some(Lookup::Symlink(target)) if !is_last || follow_last => {
                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    return Err(FsError::TooManySymlinks(path.to_owned()));
                }

                resolved.pop();
                let target = clean(&target);
                if target.is_absolute() {
                    resolved.clear();
                }

                let steps: Vec<String> = target
                    .components()
                    .filter_map(|c| match c {
                        Utf8UnixComponent::ParentDir => Some("..".to_string()),
                        Utf8UnixComponent::Normal(name) => Some(name.to_string()),
                        _ => None,
                    })
                    .collect();

                for step in steps.into_iter().rev() {
                    pending.push_front(step);
                }
            }
            Some(Lookup::Other) if !is_last => {
                return Err(FsError::NotADirectory(Utf8UnixPathBuf::from(key)));
            }
            Some(_) => {}
        }
    }

    Ok(Utf8UnixPathBuf::from(resolved.join("/")))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_clean() {
        let c = |p: &str| clean(Utf8UnixPath::new(p)).to_string();

        assert_eq!(c(""), ".");
        assert_eq!(c("."), ".");
        assert_eq!(c("/"), "/");
        assert_eq!(c("a//b/"), "a/b");
        assert_eq!(c("a/../.."), "..");
        assert_eq!(c("../a/../b"), "../b");
        assert_eq!(c("/a/b/../../.."), "/");
        assert_eq!(c("./a/./b"), "a/b");
    }

    #[test]
    fn test_sanitize() {
        let s = |p: &str| sanitize(Utf8UnixPath::new(p)).to_string();

        assert_eq!(s(""), "");
        assert_eq!(s("/"), "");
        assert_eq!(s("foo/bar"), "foo/bar");
        assert_eq!(s("/foo/../bar"), "bar");
        assert_eq!(s("../../foo"), "foo");
        assert_eq!(s("./foo/."), "foo");
    }

    #[test]
    fn test_split_last() {
        let (parent, name) = split_last(Utf8UnixPath::new("/a/b/c")).unwrap();
        assert_eq!(parent.as_str(), "a/b");
        assert_eq!(name.unwrap().as_str(), "c");

        let (parent, name) = split_last(Utf8UnixPath::new("c")).unwrap();
        assert_eq!(parent.as_str(), "");
        assert_eq!(name.unwrap().as_str(), "c");

        let (parent, name) = split_last(Utf8UnixPath::new("/")).unwrap();
        assert_eq!(parent.as_str(), "");
        assert!(name.is_none());
    }

    #[test]
    fn test_segments() {
        let segments = segments(Utf8UnixPath::new("/usr/./lib/../bin")).unwrap();
        let names: Vec<_> = segments.iter().map(|s| s.as_str()).collect();
        assert_eq!(names, vec!["usr", "bin"]);
    }

    #[test]
    fn test_resolve_within_follows_links() -> anyhow::Result<()> {
        let tree = helper::tree(&[
            ("usr", None),
            ("usr/lib", None),
            ("usr/lib/libc.so", Some(None)),
            ("lib", Some(Some("usr/lib"))),
            ("usr/lib64", Some(Some("./lib"))),
            ("usr/up", Some(Some("../../../lib"))),
            ("abs", Some(Some("/usr/lib/libc.so"))),
        ]);

        let r = |p: &str, follow: bool| {
            resolve_within(Utf8UnixPath::new(p), follow, helper::lookup(&tree))
                .map(|k| k.to_string())
        };

        assert_eq!(r("lib/libc.so", true)?, "usr/lib/libc.so");
        assert_eq!(r("usr/lib64/libc.so", true)?, "usr/lib/libc.so");
        assert_eq!(r("usr/up/libc.so", true)?, "usr/lib/libc.so");
        assert_eq!(r("abs", true)?, "usr/lib/libc.so");
        assert_eq!(r("abs", false)?, "abs");
        assert_eq!(r("/", true)?, "");

        Ok(())
    }

    #[test]
    fn test_resolve_within_errors() {
        let tree = helper::tree(&[
            ("file", Some(None)),
            ("loop", Some(Some("loop"))),
            ("ping", Some(Some("pong"))),
            ("pong", Some(Some("/ping"))),
        ]);

        let r = |p: &str| resolve_within(Utf8UnixPath::new(p), true, helper::lookup(&tree));

        assert!(matches!(r("missing"), Err(FsError::NotFound(_))));
        assert!(matches!(r("file/x"), Err(FsError::NotADirectory(_))));
        assert!(matches!(r("loop"), Err(FsError::TooManySymlinks(_))));
        assert!(matches!(r("ping/x"), Err(FsError::TooManySymlinks(_))));
    }

    mod helper {
        use super::*;

        /// `None` is a directory, `Some(None)` a file and `Some(Some(target))` a symlink.
        pub(super) fn tree(
            entries: &[(&str, Option<Option<&str>>)],
        ) -> HashMap<String, Lookup> {
            entries
                .iter()
                .map(|(key, kind)| {
                    let lookup = match kind {
                        None => Lookup::Directory,
                        Some(None) => Lookup::Other,
                        Some(Some(target)) => Lookup::Symlink(Utf8UnixPathBuf::from(*target)),
                    };
                    (key.to_string(), lookup)
                })
                .collect()
        }

        pub(super) fn lookup(
            tree: &HashMap<String, Lookup>,
        ) -> impl FnMut(&str) -> FsResult<Option<Lookup>> + '_ {
            move |key| Result::Ok(tree.get(key).cloned())
        }
    }
}
