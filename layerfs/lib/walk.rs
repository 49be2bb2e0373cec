use typed_path::{Utf8UnixPath, Utf8UnixPathBuf};

use crate::{DirEntry, FileSystem, FsResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// What a walk should do after visiting an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkAction {
    /// Keep walking, descending into the entry if it is a directory.
    Continue,

    /// Do not descend into the entry. Has no effect on non-directories.
    SkipDir,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Walks the tree below `root` depth first, calling `visitor` with the path and entry of every
/// descendant.
///
/// Entries are visited in name order, parents before their children. Symlinks are reported but
/// never followed, so a walk over a tree with symlink cycles terminates. The paths passed to the
/// visitor are joined onto `root` as given. Pending directories are kept on the heap, so deep
/// trees do not grow the call stack.
///
/// ## Examples
///
/// ```
/// use layerfs::{walk_dir, MemoryFileSystem, WalkAction};
/// use typed_path::Utf8UnixPath;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut fs = MemoryFileSystem::new();
/// fs.create_file("a/b", "")?;
/// fs.create_symlink("c", "a")?;
///
/// let mut seen = Vec::new();
/// walk_dir(&fs, Utf8UnixPath::new(""), &mut |path, _| {
///     seen.push(path.to_string());
///     Ok(WalkAction::Continue)
/// })?;
/// assert_eq!(seen, vec!["a", "a/b", "c"]);
/// # Ok(())
/// # }
/// ```
pub fn walk_dir(
    fs: &dyn FileSystem,
    root: &Utf8UnixPath,
    visitor: &mut dyn FnMut(&Utf8UnixPath, &DirEntry) -> FsResult<WalkAction>,
) -> FsResult<()> {
    let mut stack = vec![(root.to_owned(), fs.read_directory(root)?.into_iter())];

    while let Some((dir, entries)) = stack.last_mut() {
        let Some(entry) = entries.next() else {
            stack.pop();
            continue;
        };

        let path: Utf8UnixPathBuf = dir.join(entry.get_name().as_str());
        let action = visitor(&path, &entry)?;

        if entry.is_dir() && action == WalkAction::Continue {
            let children = fs.read_directory(&path)?.into_iter();
            stack.push((path, children));
        }
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
