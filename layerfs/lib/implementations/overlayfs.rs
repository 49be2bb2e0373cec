use std::{
    collections::{HashMap, VecDeque},
    io::Read,
    sync::Arc,
};

use tracing::{debug, trace};
use typed_path::{Utf8UnixComponent, Utf8UnixPath, Utf8UnixPathBuf};

use crate::{
    path::{self, MAX_SYMLINK_HOPS},
    DirEntry, FileSystem, FsError, FsResult, Metadata, ModeType, PathSegment, SegmentRole,
    SymlinkFileSystem,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The index of the root node in the arena.
const ROOT: NodeId = 0;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The index of a node in the merge arena.
type NodeId = usize;

/// A read-only file system that merges an ordered stack of layers into a single tree,
/// following the OCI image layer conventions.
///
/// ## OCI Compatibility
///
/// Each layer is a diff over the merged state of the layers beneath it:
///
/// - Entries in a higher layer replace entries at the same path in lower layers
/// - Directories redeclared by a higher layer keep the content merged so far
/// - Whiteout files (`.wh.<name>`) delete `<name>` and everything below it
/// - Opaque markers (`.wh..wh..opq`) discard everything merged so far in their directory
///
/// ## Layer Ordering
///
/// Layers are provided in order from lowest to highest:
/// ```
/// use std::{io::Read, sync::Arc};
/// use layerfs::{FileSystem, MemoryFileSystem, OverlayFileSystem};
/// use typed_path::Utf8UnixPath;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut base = MemoryFileSystem::new();
/// base.create_file("etc/motd", "hello\n")?;
/// base.create_file("etc/issue", "base\n")?;
///
/// let mut upper = MemoryFileSystem::new();
/// upper.create_file("etc/.wh.issue", "")?;
/// upper.create_symlink("motd", "/etc/motd")?;
///
/// let overlay = OverlayFileSystem::new(vec![Arc::new(base) as _, Arc::new(upper) as _])?;
///
/// let mut content = String::new();
/// overlay.open(Utf8UnixPath::new("motd"))?.read_to_string(&mut content)?;
/// assert_eq!(content, "hello\n");
/// assert!(!overlay.exists(Utf8UnixPath::new("etc/issue"))?);
/// # Ok(())
/// # }
/// ```
///
/// The merged tree is built once, when the overlay is created, and never changes afterwards.
/// Content and metadata are not copied: every node remembers which layer won its path, and
/// queries are forwarded to that layer. Symlinks are resolved against the merged tree, so a
/// link defined in one layer can point at content supplied by another.
pub struct OverlayFileSystem {
    /// The layers, ordered from bottom to top
    layers: Vec<Arc<dyn FileSystem>>,

    /// The merged tree; node 0 is the root
    nodes: Vec<Node>,
}

/// One path of the merged tree.
#[derive(Debug, Clone)]
struct Node {
    /// The type of the entry in its owning layer
    kind: ModeType,

    /// The index of the layer that supplies this node's content
    layer: usize,

    /// The path of the entry inside its owning layer
    layer_path: Utf8UnixPathBuf,

    /// The directory holding this node; the root is its own parent
    parent: NodeId,

    /// The nodes below this one
    children: HashMap<PathSegment, NodeId>,
}

/// A pending step of a path walk.
enum Step {
    Child(String),
    Parent,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl OverlayFileSystem {
    /// Creates a new overlay filesystem from a sequence of layers, merging them immediately.
    ///
    /// ## Layer Ordering
    ///
    /// Layers must be provided in order from lowest (first) to highest (last). The root
    /// directory takes its metadata from the highest layer.
    ///
    /// ## Errors
    ///
    /// Returns an error if:
    /// - No layers are provided
    /// - A layer fails to list a directory for any reason other than it being missing
    pub fn new(layers: Vec<Arc<dyn FileSystem>>) -> FsResult<Self> {
        if layers.is_empty() {
            return Err(FsError::OverlayFileSystemRequiresAtLeastOneLayer);
        }

        let top = layers.len() - 1;
        let mut overlay = Self {
            layers,
            nodes: vec![Node::new(
                ModeType::Directory,
                top,
                Utf8UnixPathBuf::from(""),
                ROOT,
            )],
        };

        for index in 0..overlay.layers.len() {
            let layer = Arc::clone(&overlay.layers[index]);
            overlay.merge_layer(index, layer.as_ref())?;
            debug!(index, nodes = overlay.nodes.len(), "merged layer");
        }

        Ok(overlay)
    }

    /// Returns the number of merged layers.
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Returns the index of the layer that supplies the content at `path`, after following
    /// symlinks.
    pub fn owning_layer(&self, path: &Utf8UnixPath) -> FsResult<usize> {
        let id = self.resolve(path, true)?;
        Ok(self.nodes[id].layer)
    }

    /// Applies every directory of one layer to the merged tree, parents before their children.
    ///
    /// Within a directory, the opaque marker is applied first, then whiteouts, then ordinary
    /// entries, so the outcome does not depend on how names sort against the marker prefixes.
    /// Pending directories are kept on an explicit stack, so nesting depth is bounded by memory
    /// rather than by the thread's stack.
    fn merge_layer(&mut self, index: usize, layer: &dyn FileSystem) -> FsResult<()> {
        let mut pending = vec![(ROOT, Utf8UnixPathBuf::from(""))];

        while let Some((dir, dir_path)) = pending.pop() {
            let entries = match layer.read_directory(&dir_path) {
                Ok(entries) => entries,
                Err(e) if e.is_not_found() => {
                    debug!(index, path = %dir_path, "skipping directory missing from layer");
                    continue;
                }
                Err(e) => {
                    return Err(FsError::Layer {
                        index,
                        path: dir_path,
                        source: Box::new(e),
                    })
                }
            };

            let roles: Vec<SegmentRole> = entries.iter().map(|e| e.get_name().role()).collect();

            if roles.contains(&SegmentRole::Opaque) {
                trace!(index, path = %dir_path, "opaque directory");
                self.nodes[dir].children.clear();
            }

            for role in &roles {
                if let SegmentRole::Whiteout(target) = role {
                    trace!(index, path = %dir_path, name = %target, "whiteout");
                    self.nodes[dir].children.remove(target.as_str());
                }
            }

            for (entry, role) in entries.into_iter().zip(roles) {
                if role != SegmentRole::Regular {
                    continue;
                }

                let entry_path = dir_path.join(entry.get_name().as_str());
                let kind = entry.get_kind();
                let child = self.upsert(dir, entry.get_name(), kind, index, entry_path.clone());

                if kind == ModeType::Directory {
                    pending.push((child, entry_path));
                }
            }
        }

        Ok(())
    }

    /// Creates or updates the child `name` of `dir`. An existing node keeps its identity and, if
    /// it stays a directory, its children.
    fn upsert(
        &mut self,
        dir: NodeId,
        name: &PathSegment,
        kind: ModeType,
        layer: usize,
        layer_path: Utf8UnixPathBuf,
    ) -> NodeId {
        if let Some(&id) = self.nodes[dir].children.get(name) {
            let node = &mut self.nodes[id];
            node.kind = kind;
            node.layer = layer;
            node.layer_path = layer_path;
            if kind != ModeType::Directory {
                node.children.clear();
            }
            return id;
        }

        let id = self.nodes.len();
        self.nodes.push(Node::new(kind, layer, layer_path, dir));
        self.nodes[dir].children.insert(name.clone(), id);
        id
    }

    /// Resolves `path` against the merged tree.
    ///
    /// The path is cleaned lexically first. Symlinks met on the way are expanded: absolute
    /// targets restart at the root, relative targets continue from the symlink's parent, and
    /// `..` in a target climbs through parent links. A final symlink is only followed when
    /// `follow_last` is set.
    fn resolve(&self, path: &Utf8UnixPath, follow_last: bool) -> FsResult<NodeId> {
        let mut pending: VecDeque<Step> = path::segments(path)?
            .into_iter()
            .map(|s| Step::Child(s.as_str().to_string()))
            .collect();
        let mut current = ROOT;
        let mut hops = 0;

        while let Some(step) = pending.pop_front() {
            let name = match step {
                Step::Parent => {
                    current = self.nodes[current].parent;
                    continue;
                }
                Step::Child(name) => name,
            };

            let child = self.nodes[current]
                .children
                .get(name.as_str())
                .copied()
                .ok_or_else(|| FsError::NotFound(path.to_owned()))?;

            let is_last = pending.is_empty();
            if self.nodes[child].kind != ModeType::Symlink || (is_last && !follow_last) {
                current = child;
                continue;
            }

            hops += 1;
            if hops > MAX_SYMLINK_HOPS {
                return Err(FsError::TooManySymlinks(path.to_owned()));
            }

            let target = path::clean(&self.read_link_node(child)?);
            current = if target.is_absolute() {
                ROOT
            } else {
                self.nodes[child].parent
            };

            let steps: Vec<Step> = target
                .components()
                .filter_map(|c| match c {
                    Utf8UnixComponent::ParentDir => Some(Step::Parent),
                    Utf8UnixComponent::Normal(name) => Some(Step::Child(name.to_string())),
                    _ => None,
                })
                .collect();

            for step in steps.into_iter().rev() {
                pending.push_front(step);
            }
        }

        Ok(current)
    }

    /// Finds the node for the final component of `path` without following it. Every earlier
    /// component is resolved normally.
    fn resolve_no_follow(&self, path: &Utf8UnixPath) -> FsResult<NodeId> {
        let (parent, name) = path::split_last(path)?;
        let Some(name) = name else {
            return Ok(ROOT);
        };

        let parent = self.resolve(&parent, true)?;
        self.nodes[parent]
            .children
            .get(&name)
            .copied()
            .ok_or_else(|| FsError::NotFound(path.to_owned()))
    }

    /// Reads the target of a symlink node from its owning layer.
    fn read_link_node(&self, id: NodeId) -> FsResult<Utf8UnixPathBuf> {
        let node = &self.nodes[id];
        self.layers[node.layer]
            .as_symlink_fs()
            .ok_or_else(|| FsError::SymlinkUnsupported(node.layer_path.clone()))?
            .read_link(&node.layer_path)
    }

    fn layer_of(&self, id: NodeId) -> (&dyn FileSystem, &Utf8UnixPath) {
        let node = &self.nodes[id];
        (self.layers[node.layer].as_ref(), &node.layer_path)
    }
}

impl Node {
    fn new(kind: ModeType, layer: usize, layer_path: Utf8UnixPathBuf, parent: NodeId) -> Self {
        Self {
            kind,
            layer,
            layer_path,
            parent,
            children: HashMap::new(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl FileSystem for OverlayFileSystem {
    fn exists(&self, path: &Utf8UnixPath) -> FsResult<bool> {
        match self.resolve(path, true) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn open(&self, path: &Utf8UnixPath) -> FsResult<Box<dyn Read + Send + '_>> {
        let id = self.resolve(path, true)?;
        let (layer, layer_path) = self.layer_of(id);
        layer.open(layer_path)
    }

    fn read_directory(&self, path: &Utf8UnixPath) -> FsResult<Vec<DirEntry>> {
        let id = self.resolve(path, true)?;
        let node = &self.nodes[id];
        if node.kind != ModeType::Directory {
            return Err(FsError::NotADirectory(path.to_owned()));
        }

        let mut entries: Vec<DirEntry> = node
            .children
            .iter()
            .map(|(name, &child)| DirEntry::new(name.clone(), self.nodes[child].kind))
            .collect();
        entries.sort_by(|a, b| a.get_name().cmp(b.get_name()));
        Ok(entries)
    }

    fn stat(&self, path: &Utf8UnixPath) -> FsResult<Metadata> {
        let id = self.resolve(path, true)?;
        let (layer, layer_path) = self.layer_of(id);
        layer.stat(layer_path)
    }

    fn as_symlink_fs(&self) -> Option<&dyn SymlinkFileSystem> {
        Some(self)
    }
}

impl SymlinkFileSystem for OverlayFileSystem {
    fn read_link(&self, path: &Utf8UnixPath) -> FsResult<Utf8UnixPathBuf> {
        let id = self.resolve_no_follow(path)?;
        if self.nodes[id].kind != ModeType::Symlink {
            return Err(FsError::NotASymlink(path.to_owned()));
        }

        self.read_link_node(id)
    }

    fn stat_link(&self, path: &Utf8UnixPath) -> FsResult<Metadata> {
        let id = self.resolve_no_follow(path)?;
        let (layer, layer_path) = self.layer_of(id);
        if self.nodes[id].kind != ModeType::Symlink {
            return layer.stat(layer_path);
        }

        layer
            .as_symlink_fs()
            .ok_or_else(|| FsError::SymlinkUnsupported(layer_path.to_owned()))?
            .stat_link(layer_path)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
