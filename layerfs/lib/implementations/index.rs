use std::{collections::BTreeMap, ops::Bound};

use tracing::warn;
use typed_path::{Utf8UnixPath, Utf8UnixPathBuf};

use crate::{
    path::{self, Lookup},
    DirEntry, FsError, FsResult, Metadata, ModeType, PathSegment,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A flat, path-keyed index of the entries of a single layer.
///
/// Keys are sanitized paths with the root spelled `""`. Every ancestor of an entry is present as
/// a directory, so the index always describes a proper tree.
#[derive(Debug, Clone)]
pub(crate) struct EntryIndex<D> {
    entries: BTreeMap<String, IndexEntry<D>>,
}

/// One entry of an [`EntryIndex`], carrying implementation-specific content `D`.
#[derive(Debug, Clone)]
pub(crate) struct IndexEntry<D> {
    pub(crate) metadata: Metadata,
    pub(crate) link: Option<Utf8UnixPathBuf>,
    pub(crate) data: D,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<D: Default> EntryIndex<D> {
    /// Creates an index holding only the root directory.
    pub(crate) fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(String::new(), IndexEntry::directory());
        Self { entries }
    }

    /// Inserts an entry, creating missing ancestors. A later insert for the same key replaces the
    /// earlier one; replacing a directory with anything else drops the directory's descendants.
    pub(crate) fn insert(&mut self, key: String, entry: IndexEntry<D>) {
        let is_dir = entry.metadata.is_dir();
        if key.is_empty() && !is_dir {
            warn!("ignoring non-directory entry for the root");
            return;
        }

        self.ensure_ancestors(&key);

        if let Some(previous) = self.entries.insert(key.clone(), entry) {
            if previous.metadata.is_dir() && !is_dir {
                let prefix = format!("{key}/");
                self.entries.retain(|k, _| !k.starts_with(&prefix));
            }
        }
    }

    fn ensure_ancestors(&mut self, key: &str) {
        let mut end = 0;
        while let Some(offset) = key[end..].find('/') {
            end += offset;
            let ancestor = &key[..end];
            let needs_dir = self
                .entries
                .get(ancestor)
                .map(|e| !e.metadata.is_dir())
                .unwrap_or(true);

            if needs_dir {
                self.entries
                    .insert(ancestor.to_string(), IndexEntry::directory());
            }

            end += 1;
        }
    }
}

impl<D> EntryIndex<D> {
    /// Gets the entry at an exact key.
    pub(crate) fn get(&self, key: &str) -> Option<&IndexEntry<D>> {
        self.entries.get(key)
    }

    /// Resolves `path` to its key and entry, following symlinks inside the index.
    pub(crate) fn resolve(
        &self,
        path: &Utf8UnixPath,
        follow_last: bool,
    ) -> FsResult<(Utf8UnixPathBuf, &IndexEntry<D>)> {
        let key = path::resolve_within(path, follow_last, |key| Ok(self.lookup(key)))?;
        let entry = self
            .entries
            .get(key.as_str())
            .ok_or_else(|| FsError::NotFound(path.to_owned()))?;
        Ok((key, entry))
    }

    fn lookup(&self, key: &str) -> Option<Lookup> {
        self.entries.get(key).map(|e| match (e.metadata.get_type(), &e.link) {
            (Some(ModeType::Directory), _) => Lookup::Directory,
            (Some(ModeType::Symlink), Some(target)) => Lookup::Symlink(target.clone()),
            _ => Lookup::Other,
        })
    }

    /// Gets the metadata at `path`, following symlinks.
    pub(crate) fn stat(&self, path: &Utf8UnixPath) -> FsResult<Metadata> {
        self.resolve(path, true).map(|(_, e)| e.metadata.clone())
    }

    /// Gets the metadata at `path` without following a final symlink.
    pub(crate) fn stat_link(&self, path: &Utf8UnixPath) -> FsResult<Metadata> {
        self.resolve(path, false).map(|(_, e)| e.metadata.clone())
    }

    /// Reads the target of the symlink at `path`.
    pub(crate) fn read_link(&self, path: &Utf8UnixPath) -> FsResult<Utf8UnixPathBuf> {
        let (_, entry) = self.resolve(path, false)?;
        match (&entry.link, entry.metadata.is_symlink()) {
            (Some(target), true) => Ok(target.clone()),
            _ => Err(FsError::NotASymlink(path.to_owned())),
        }
    }

    /// Lists the directory at `path` in name order.
    pub(crate) fn read_directory(&self, path: &Utf8UnixPath) -> FsResult<Vec<DirEntry>> {
        let (key, entry) = self.resolve(path, true)?;
        if !entry.metadata.is_dir() {
            return Err(FsError::NotADirectory(path.to_owned()));
        }

        let prefix = if key.as_str().is_empty() {
            String::new()
        } else {
            format!("{key}/")
        };

        self.entries
            .range::<str, _>((Bound::Excluded(prefix.as_str()), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, _)| !k[prefix.len()..].contains('/'))
            .map(|(k, e)| {
                let name = PathSegment::try_from(&k[prefix.len()..])?;
                let kind = e.metadata.get_type().unwrap_or(ModeType::File);
                Ok(DirEntry::new(name, kind))
            })
            .collect()
    }
}

impl<D: Default> IndexEntry<D> {
    /// A directory entry with default metadata and no content.
    pub(crate) fn directory() -> Self {
        Self {
            metadata: Metadata::new(ModeType::Directory),
            link: None,
            data: D::default(),
        }
    }
}
