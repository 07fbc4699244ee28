// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Filesystem adapter: directory and file nodes over the backing store
//!
//! Nodes are cheap `(context, path)` pairs rebuilt on every traversal step.
//! Identity lives in the [`NodeTable`], content lives in the store; nothing
//! else is cached here.
//!
//! Every store failure crossing this boundary is logged with its detail and
//! reported as [`FsError::NotFound`].

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::debug;

use crate::attr::{Attributes, NodeKind};
use crate::config::FsConfig;
use crate::error::{FsError, FsResult};
use crate::nodes::{NodeId, NodeTable};
use crate::path;
use crate::store::{Backstore, DirEntry, MemBackstore, Stream};

/// Collapse a store error into the single missing-entry signal.
fn missing<'a>(operation: &'static str, path: &'a str) -> impl FnOnce(FsError) -> FsError + 'a {
    move |err| {
        debug!(operation, path, error = %err, "store operation failed");
        FsError::NotFound
    }
}

/// Process-wide state shared by every node: the store, the identity table
/// and the configuration.
pub struct FsContext {
    store: Arc<dyn Backstore>,
    nodes: NodeTable,
    config: FsConfig,
}

impl FsContext {
    /// Build a context over `store`, making sure the root directory exists.
    pub fn new(store: Arc<dyn Backstore>, config: FsConfig) -> FsResult<Arc<Self>> {
        store.mkdir_all(path::ROOT, config.modes.dir_mode)?;
        Ok(Arc::new(Self {
            store,
            nodes: NodeTable::new(),
            config,
        }))
    }

    pub fn in_memory(config: FsConfig) -> FsResult<Arc<Self>> {
        Self::new(Arc::new(MemBackstore::new()), config)
    }

    pub fn store(&self) -> &dyn Backstore {
        self.store.as_ref()
    }

    pub fn nodes(&self) -> &NodeTable {
        &self.nodes
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    pub fn root(self: &Arc<Self>) -> DirNode {
        DirNode {
            ctx: Arc::clone(self),
            path: path::ROOT.to_string(),
        }
    }

    /// Stat `path` and project it into kernel attributes.
    pub fn attributes(&self, path: &str) -> FsResult<Attributes> {
        let meta = self.store.stat(path).map_err(missing("attributes", path))?;
        Ok(Attributes::project(&meta, &self.config.modes, SystemTime::now()))
    }

    /// Bind `path` to an identifier if, and only if, it still exists.
    ///
    /// The existence check and the binding are one step with respect to
    /// removals, so a path reaped in between is never handed out.
    pub fn assign_existing(&self, path: &str) -> FsResult<(NodeId, Attributes)> {
        self.nodes
            .assign_with(path, || self.store.stat(path))
            .map(|(id, meta)| (id, Attributes::project(&meta, &self.config.modes, SystemTime::now())))
            .map_err(missing("assign", path))
    }

    /// Descriptor for whatever currently lives at `path`.
    pub fn node_at(self: &Arc<Self>, path: &str) -> FsResult<Node> {
        let meta = self.store.stat(path).map_err(missing("stat", path))?;
        let ctx = Arc::clone(self);
        let path = path.to_string();
        Ok(if meta.is_dir {
            Node::Dir(DirNode { ctx, path })
        } else {
            Node::File(FileNode { ctx, path })
        })
    }
}

impl fmt::Debug for FsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsContext")
            .field("nodes", &self.nodes.len())
            .field("config", &self.config)
            .finish()
    }
}

/// A directory or a file.
#[derive(Clone, Debug)]
pub enum Node {
    Dir(DirNode),
    File(FileNode),
}

impl Node {
    pub fn path(&self) -> &str {
        match self {
            Node::Dir(dir) => dir.path(),
            Node::File(file) => file.path(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Dir(_) => NodeKind::Directory,
            Node::File(_) => NodeKind::File,
        }
    }

    pub fn attributes(&self) -> FsResult<Attributes> {
        match self {
            Node::Dir(dir) => dir.attributes(),
            Node::File(file) => file.attributes(),
        }
    }

    pub fn into_dir(self) -> Option<DirNode> {
        match self {
            Node::Dir(dir) => Some(dir),
            Node::File(_) => None,
        }
    }

    pub fn into_file(self) -> Option<FileNode> {
        match self {
            Node::File(file) => Some(file),
            Node::Dir(_) => None,
        }
    }
}

/// Result of creating a file: the identifier handed to the kernel, the
/// node and a handle already open for writing.
#[derive(Debug)]
pub struct Created {
    pub id: NodeId,
    pub node: FileNode,
    pub handle: OpenHandle,
}

#[derive(Clone)]
pub struct DirNode {
    ctx: Arc<FsContext>,
    path: String,
}

impl fmt::Debug for DirNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DirNode").field(&self.path).finish()
    }
}

impl DirNode {
    pub fn path(&self) -> &str {
        &self.path
    }

    fn child(&self, operation: &'static str, name: &str) -> FsResult<String> {
        path::join(&self.path, name).map_err(missing(operation, &self.path))
    }

    pub fn attributes(&self) -> FsResult<Attributes> {
        self.ctx.attributes(&self.path)
    }

    pub fn list(&self) -> FsResult<Vec<DirEntry>> {
        debug!(operation = "dir.list", path = %self.path);
        self.ctx.store.read_dir(&self.path).map_err(missing("dir.list", &self.path))
    }

    /// Resolve `name` to a descriptor. No identifier is assigned here.
    pub fn lookup(&self, name: &str) -> FsResult<Node> {
        let child = self.child("dir.lookup", name)?;
        debug!(operation = "dir.lookup", path = %child);
        self.ctx.node_at(&child)
    }

    /// Create an empty file (truncating any existing one) and open it for writing.
    pub fn create(&self, name: &str) -> FsResult<Created> {
        let child = self.child("dir.create", name)?;
        debug!(operation = "dir.create", path = %child);
        let (id, stream) = self
            .ctx
            .nodes
            .assign_with(&child, || self.ctx.store.create(&child))
            .map_err(missing("dir.create", &child))?;
        Ok(Created {
            id,
            node: FileNode {
                ctx: Arc::clone(&self.ctx),
                path: child.clone(),
            },
            handle: OpenHandle::new(child, stream),
        })
    }

    pub fn mkdir(&self, name: &str) -> FsResult<(NodeId, DirNode)> {
        let child = self.child("dir.mkdir", name)?;
        debug!(operation = "dir.mkdir", path = %child);
        let (id, ()) = self
            .ctx
            .nodes
            .assign_with(&child, || self.ctx.store.mkdir_all(&child, self.ctx.config.modes.dir_mode))
            .map_err(missing("dir.mkdir", &child))?;
        Ok((
            id,
            DirNode {
                ctx: Arc::clone(&self.ctx),
                path: child,
            },
        ))
    }

    /// Remove a file or an empty directory and release its identifier.
    pub fn remove(&self, name: &str) -> FsResult<()> {
        let child = self.child("dir.remove", name)?;
        debug!(operation = "dir.remove", path = %child);
        self.ctx
            .nodes
            .invalidate_with(&child, || self.ctx.store.remove(&child).map(|()| true))
            .map_err(missing("dir.remove", &child))?;
        Ok(())
    }

    /// Move `name` to `new_name` inside `target` (which may be `self`).
    ///
    /// Identifiers follow the moved entry so references the kernel already
    /// holds stay valid.
    pub fn rename(&self, name: &str, target: &DirNode, new_name: &str) -> FsResult<()> {
        let from = self.child("dir.rename", name)?;
        let to = target.child("dir.rename", new_name)?;
        debug!(operation = "dir.rename", from = %from, to = %to);
        self.ctx
            .nodes
            .rename_with(&from, &to, || self.ctx.store.rename(&from, &to))
            .map_err(missing("dir.rename", &from))
    }
}

#[derive(Clone)]
pub struct FileNode {
    ctx: Arc<FsContext>,
    path: String,
}

impl fmt::Debug for FileNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FileNode").field(&self.path).finish()
    }
}

impl FileNode {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn attributes(&self) -> FsResult<Attributes> {
        self.ctx.attributes(&self.path)
    }

    /// Open a sequential stream. Callers must advertise the handle as
    /// non-seekable: the stream has no notion of an offset.
    pub fn open(&self) -> FsResult<OpenHandle> {
        debug!(operation = "file.open", path = %self.path);
        let stream = self.ctx.store.open(&self.path).map_err(missing("file.open", &self.path))?;
        Ok(OpenHandle::new(self.path.clone(), stream))
    }

    pub fn truncate(&self, len: u64) -> FsResult<()> {
        debug!(operation = "file.truncate", path = %self.path, len);
        self.ctx.store.truncate(&self.path, len).map_err(missing("file.truncate", &self.path))
    }
}

/// One live stream between an open and its release.
pub struct OpenHandle {
    path: String,
    stream: Box<dyn Stream>,
}

impl fmt::Debug for OpenHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenHandle").field("path", &self.path).finish()
    }
}

impl OpenHandle {
    pub fn new(path: String, stream: Box<dyn Stream>) -> Self {
        Self { path, stream }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Read up to `size` bytes from the current position.
    ///
    /// Keeps reading until `size` bytes are gathered or the stream ends, so a
    /// short result only ever means end-of-stream. Reaching the end is not an
    /// error; any other failure is returned untouched.
    pub fn read(&mut self, size: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; size];
        let mut filled = 0;
        while filled < size {
            match self.stream.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }

    /// Forward `data` to the stream and report how many bytes it accepted.
    pub fn write(&mut self, data: &[u8]) -> FsResult<usize> {
        self.stream.write(data).map_err(|err| missing("handle.write", &self.path)(err.into()))
    }

    pub fn release(mut self) -> FsResult<()> {
        debug!(operation = "handle.release", path = %self.path);
        self.stream.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::failing_store::{eio_error, FailingBackstore, FailureBehavior};

    fn ctx() -> Arc<FsContext> {
        FsContext::in_memory(FsConfig::default()).expect("context")
    }

    fn write_file(dir: &DirNode, name: &str, content: &[u8]) -> NodeId {
        let created = dir.create(name).expect("create");
        let mut handle = created.handle;
        assert_eq!(handle.write(content).expect("write"), content.len());
        handle.release().expect("release");
        created.id
    }

    #[test]
    fn lookup_distinguishes_kinds_without_assigning() {
        let ctx = ctx();
        let root = ctx.root();
        root.mkdir("d").unwrap();
        write_file(&root, "f", b"x");
        let before = ctx.nodes().len();

        assert!(matches!(root.lookup("d").unwrap(), Node::Dir(_)));
        let file = root.lookup("f").unwrap();
        assert_eq!(file.kind(), NodeKind::File);
        assert_eq!(file.path(), "/f");
        assert!(matches!(root.lookup("nope"), Err(FsError::NotFound)));
        assert_eq!(ctx.nodes().len(), before);
    }

    #[test]
    fn create_and_mkdir_assign_increasing_identifiers() {
        let ctx = ctx();
        let root = ctx.root();
        let (dir_id, dir) = root.mkdir("a").unwrap();
        let file_id = write_file(&dir, "b.txt", b"");
        let other_id = write_file(&root, "c", b"");

        assert!(NodeId::ROOT < dir_id && dir_id < file_id && file_id < other_id);
        assert_eq!(ctx.nodes().resolve(file_id).as_deref(), Some("/a/b.txt"));
    }

    #[test]
    fn attributes_do_not_disturb_identifiers() {
        let ctx = ctx();
        let root = ctx.root();
        let id = write_file(&root, "f", b"abc");
        for _ in 0..3 {
            root.mkdir("noise").unwrap();
            let attr = root.lookup("f").unwrap().attributes().unwrap();
            assert_eq!(attr.size, 3);
        }
        assert_eq!(ctx.nodes().lookup("/f"), Some(id));
    }

    #[test]
    fn short_reads_are_not_errors() {
        let ctx = ctx();
        let root = ctx.root();
        write_file(&root, "f", b"hi");

        let file = root.lookup("f").unwrap().into_file().unwrap();
        let mut handle = file.open().unwrap();
        assert_eq!(handle.read(10).unwrap(), b"hi");
        assert!(handle.read(10).unwrap().is_empty());
        handle.release().unwrap();
    }

    #[test]
    fn reads_are_sequential() {
        let ctx = ctx();
        let root = ctx.root();
        write_file(&root, "f", b"0123456789");

        let mut handle = root.lookup("f").unwrap().into_file().unwrap().open().unwrap();
        assert_eq!(handle.read(4).unwrap(), b"0123");
        assert_eq!(handle.read(4).unwrap(), b"4567");
        assert_eq!(handle.read(4).unwrap(), b"89");
    }

    #[test]
    fn remove_releases_identifier_and_recreate_gets_new_one() {
        let ctx = ctx();
        let root = ctx.root();
        let old = write_file(&root, "tmp", b"");
        root.remove("tmp").unwrap();
        assert_eq!(ctx.nodes().resolve(old), None);
        assert!(matches!(ctx.attributes("/tmp"), Err(FsError::NotFound)));

        let new = write_file(&root, "tmp", b"");
        assert!(new > old);
    }

    #[test]
    fn rename_preserves_content() {
        let ctx = ctx();
        let root = ctx.root();
        let (_, dir) = root.mkdir("dir").unwrap();
        let id = write_file(&root, "a", b"content");

        root.rename("a", &dir, "b").unwrap();

        assert!(matches!(ctx.attributes("/a"), Err(FsError::NotFound)));
        let mut handle = dir.lookup("b").unwrap().into_file().unwrap().open().unwrap();
        assert_eq!(handle.read(64).unwrap(), b"content");
        assert_eq!(ctx.nodes().lookup("/dir/b"), Some(id));
    }

    #[test]
    fn failures_collapse_to_missing_entry() {
        let ctx = ctx();
        let root = ctx.root();
        let (_, d) = root.mkdir("d").unwrap();

        assert!(matches!(root.create("../x"), Err(FsError::NotFound)));
        assert!(matches!(d.create(""), Err(FsError::NotFound)));
        write_file(&root, "file", b"");
        // mkdir below a file, remove of a missing entry, rename of a missing entry
        let file_as_dir = DirNode {
            ctx: Arc::clone(&ctx),
            path: "/file".to_string(),
        };
        assert!(matches!(file_as_dir.mkdir("x"), Err(FsError::NotFound)));
        assert!(matches!(root.remove("ghost"), Err(FsError::NotFound)));
        assert!(matches!(root.rename("ghost", &root, "other"), Err(FsError::NotFound)));
        assert!(matches!(file_as_dir.list(), Err(FsError::NotFound)));
    }

    #[test]
    fn io_failures_in_the_store_surface_as_missing_entry() {
        let failing = Arc::new(FailingBackstore::new(Arc::new(MemBackstore::new())));
        let store: Arc<dyn Backstore> = failing.clone();
        let ctx = FsContext::new(store, FsConfig::default()).unwrap();
        let root = ctx.root();
        write_file(&root, "f", b"data");

        failing.set_behavior(FailureBehavior::AlwaysFail {
            op: "open",
            error_fn: Arc::new(eio_error),
        });
        let file = root.lookup("f").unwrap().into_file().unwrap();
        assert!(matches!(file.open(), Err(FsError::NotFound)));

        failing.set_behavior(FailureBehavior::AlwaysFail {
            op: "create",
            error_fn: Arc::new(eio_error),
        });
        let before = ctx.nodes().len();
        assert!(matches!(root.create("g"), Err(FsError::NotFound)));
        assert_eq!(ctx.nodes().len(), before, "failed create must not assign");
    }

    #[test]
    fn list_reports_names_and_kinds() {
        let ctx = ctx();
        let root = ctx.root();
        let (_, a) = root.mkdir("a").unwrap();
        write_file(&a, "b.txt", b"hi");

        let entries = a.list().unwrap();
        assert_eq!(
            entries,
            vec![DirEntry {
                name: "b.txt".to_string(),
                is_dir: false
            }]
        );
    }

    #[test]
    fn truncate_changes_reported_size() {
        let ctx = ctx();
        let root = ctx.root();
        write_file(&root, "f", b"hello");
        let file = root.lookup("f").unwrap().into_file().unwrap();
        file.truncate(0).unwrap();
        assert_eq!(file.attributes().unwrap().size, 0);
    }
}
