// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Kernel-facing operations, independent of the FUSE transport
//!
//! Every operation takes kernel identifiers (`ino`, `fh`) and returns either
//! a value or an errno. Failures collapse to `ENOENT`, with one exception:
//! a failing read keeps the errno of the underlying I/O error.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::Arc;

use ephemfs_core::{
    path, Attributes, DirNode, FsContext, FsError, FsStats, Node, NodeId, NodeKind, OpenHandle,
};
use libc::{c_int, ENOENT};
use tracing::debug;

/// Start of the inode range readdir reports for entries the kernel has not
/// looked up yet. Listing must not grow the identity table, so such entries
/// get `UNASSIGNED_INO_BASE + position` instead of a real identifier.
pub const UNASSIGNED_INO_BASE: u64 = 1 << 63;

pub type OpResult<T> = Result<T, c_int>;

fn enoent(operation: &'static str) -> impl FnOnce(FsError) -> c_int {
    move |err| {
        debug!(operation, error = %err, "replying ENOENT");
        ENOENT
    }
}

/// One entry of a directory listing as the kernel sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListedEntry {
    pub ino: u64,
    pub kind: NodeKind,
    pub name: String,
}

pub struct HostFs {
    ctx: Arc<FsContext>,
    handles: HashMap<u64, OpenHandle>,
    next_fh: u64,
}

impl HostFs {
    pub fn new(ctx: Arc<FsContext>) -> Self {
        Self {
            ctx,
            handles: HashMap::new(),
            next_fh: 1,
        }
    }

    pub fn context(&self) -> &Arc<FsContext> {
        &self.ctx
    }

    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    fn path_of(&self, ino: u64) -> OpResult<String> {
        self.ctx.nodes().resolve(NodeId(ino)).ok_or_else(|| {
            debug!(ino, "unknown inode");
            ENOENT
        })
    }

    fn node(&self, ino: u64) -> OpResult<Node> {
        let path = self.path_of(ino)?;
        self.ctx.node_at(&path).map_err(enoent("resolve"))
    }

    fn dir(&self, ino: u64) -> OpResult<DirNode> {
        self.node(ino)?.into_dir().ok_or(ENOENT)
    }

    fn name(name: &OsStr) -> OpResult<&str> {
        name.to_str().ok_or_else(|| {
            debug!(name = ?name, "non UTF-8 name");
            ENOENT
        })
    }

    fn insert_handle(&mut self, handle: OpenHandle) -> u64 {
        let fh = self.next_fh;
        self.next_fh += 1;
        self.handles.insert(fh, handle);
        fh
    }

    /// Resolve `name` under `parent` and hand its identifier to the kernel.
    pub fn lookup(&mut self, parent: u64, name: &OsStr) -> OpResult<(NodeId, Attributes)> {
        let dir = self.dir(parent)?;
        let node = dir.lookup(Self::name(name)?).map_err(enoent("lookup"))?;
        self.ctx.assign_existing(node.path()).map_err(enoent("lookup"))
    }

    pub fn getattr(&self, ino: u64) -> OpResult<Attributes> {
        let path = self.path_of(ino)?;
        self.ctx.attributes(&path).map_err(enoent("getattr"))
    }

    /// Apply a size change; every other attribute is fixed.
    pub fn setattr(&mut self, ino: u64, size: Option<u64>) -> OpResult<Attributes> {
        if let Some(size) = size {
            let file = self.node(ino)?.into_file().ok_or(ENOENT)?;
            file.truncate(size).map_err(enoent("setattr"))?;
        }
        self.getattr(ino)
    }

    /// Full listing including `.` and `..`.
    pub fn readdir(&self, ino: u64) -> OpResult<Vec<ListedEntry>> {
        let dir = self.dir(ino)?;
        let entries = dir.list().map_err(enoent("readdir"))?;
        let nodes = self.ctx.nodes();
        let parent_ino = path::parent(dir.path())
            .and_then(|parent| nodes.lookup(parent))
            .map_or(ino, NodeId::as_u64);

        let mut listed = Vec::with_capacity(entries.len() + 2);
        listed.push(ListedEntry {
            ino,
            kind: NodeKind::Directory,
            name: ".".to_string(),
        });
        listed.push(ListedEntry {
            ino: parent_ino,
            kind: NodeKind::Directory,
            name: "..".to_string(),
        });
        for (position, entry) in entries.into_iter().enumerate() {
            let child_ino = path::join(dir.path(), &entry.name)
                .ok()
                .and_then(|child| nodes.lookup(&child))
                .map_or(UNASSIGNED_INO_BASE + position as u64, NodeId::as_u64);
            listed.push(ListedEntry {
                ino: child_ino,
                kind: if entry.is_dir {
                    NodeKind::Directory
                } else {
                    NodeKind::File
                },
                name: entry.name,
            });
        }
        Ok(listed)
    }

    pub fn open(&mut self, ino: u64) -> OpResult<u64> {
        let file = self.node(ino)?.into_file().ok_or(ENOENT)?;
        let handle = file.open().map_err(enoent("open"))?;
        let fh = self.insert_handle(handle);
        debug!(ino, fh, "opened");
        Ok(fh)
    }

    /// Next `size` bytes of the stream. Short only at end-of-stream.
    pub fn read(&mut self, fh: u64, size: u32) -> OpResult<Vec<u8>> {
        let handle = self.handles.get_mut(&fh).ok_or(ENOENT)?;
        handle.read(size as usize).map_err(|err| {
            debug!(fh, error = %err, "read failed");
            FsError::Io(err).errno()
        })
    }

    pub fn write(&mut self, fh: u64, data: &[u8]) -> OpResult<u32> {
        let handle = self.handles.get_mut(&fh).ok_or(ENOENT)?;
        let written = handle.write(data).map_err(enoent("write"))?;
        Ok(written as u32)
    }

    pub fn release(&mut self, fh: u64) -> OpResult<()> {
        let handle = self.handles.remove(&fh).ok_or(ENOENT)?;
        handle.release().map_err(enoent("release"))
    }

    /// Create (or truncate) a file and return an already open handle.
    pub fn create(&mut self, parent: u64, name: &OsStr) -> OpResult<(NodeId, Attributes, u64)> {
        let dir = self.dir(parent)?;
        let created = dir.create(Self::name(name)?).map_err(enoent("create"))?;
        let attr = created.node.attributes().map_err(enoent("create"))?;
        let fh = self.insert_handle(created.handle);
        Ok((created.id, attr, fh))
    }

    pub fn mkdir(&mut self, parent: u64, name: &OsStr) -> OpResult<(NodeId, Attributes)> {
        let dir = self.dir(parent)?;
        let (id, child) = dir.mkdir(Self::name(name)?).map_err(enoent("mkdir"))?;
        let attr = child.attributes().map_err(enoent("mkdir"))?;
        Ok((id, attr))
    }

    /// Serves both unlink and rmdir.
    pub fn remove(&mut self, parent: u64, name: &OsStr) -> OpResult<()> {
        let dir = self.dir(parent)?;
        dir.remove(Self::name(name)?).map_err(enoent("remove"))
    }

    pub fn rename(
        &mut self,
        parent: u64,
        name: &OsStr,
        new_parent: u64,
        new_name: &OsStr,
    ) -> OpResult<()> {
        let from = self.dir(parent)?;
        let to = self.dir(new_parent)?;
        from.rename(Self::name(name)?, &to, Self::name(new_name)?)
            .map_err(enoent("rename"))
    }

    pub fn statfs(&self) -> FsStats {
        FsStats::virtual_capacity()
    }

    /// Close every handle the kernel never released.
    pub fn release_all(&mut self) {
        for (fh, handle) in self.handles.drain() {
            if let Err(err) = handle.release() {
                debug!(fh, error = %err, "release on teardown failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ephemfs_core::{FsConfig, Stream};

    fn host() -> HostFs {
        HostFs::new(FsContext::in_memory(FsConfig::default()).expect("context"))
    }

    fn os(name: &str) -> &OsStr {
        OsStr::new(name)
    }

    const ROOT: u64 = NodeId::ROOT.0;

    #[test]
    fn create_write_then_read_through_a_new_handle() {
        let mut fs = host();
        let (dir, _) = fs.mkdir(ROOT, os("a")).unwrap();
        let (file, attr, fh) = fs.create(dir.as_u64(), os("b.txt")).unwrap();
        assert_eq!(attr.kind, NodeKind::File);
        assert_eq!(fs.write(fh, b"hi").unwrap(), 2);
        fs.release(fh).unwrap();

        let fh = fs.open(file.as_u64()).unwrap();
        assert_eq!(fs.read(fh, 10).unwrap(), b"hi");
        assert!(fs.read(fh, 10).unwrap().is_empty());
        fs.release(fh).unwrap();
        assert_eq!(fs.open_handles(), 0);
        assert_eq!(fs.getattr(file.as_u64()).unwrap().size, 2);
    }

    #[test]
    fn lookup_assigns_a_stable_identifier() {
        let mut fs = host();
        let (_, _, fh) = fs.create(ROOT, os("f")).unwrap();
        fs.release(fh).unwrap();

        let (first, _) = fs.lookup(ROOT, os("f")).unwrap();
        let (second, _) = fs.lookup(ROOT, os("f")).unwrap();
        assert_eq!(first, second);
        assert_eq!(fs.lookup(ROOT, os("missing")), Err(ENOENT));
    }

    #[test]
    fn readdir_lists_dot_entries_without_assigning() {
        let mut fs = host();
        let (dir, _) = fs.mkdir(ROOT, os("d")).unwrap();
        let (known, _, fh) = fs.create(dir.as_u64(), os("known")).unwrap();
        fs.release(fh).unwrap();
        fs.context().store().mkdir_all("/d/unseen", 0o755).unwrap();
        fs.context().store().create("/d/zz").unwrap().close().unwrap();
        let before = fs.context().nodes().len();

        let listed = fs.readdir(dir.as_u64()).unwrap();
        let names: Vec<_> = listed.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, [".", "..", "known", "unseen", "zz"]);
        assert_eq!(listed[0].ino, dir.as_u64());
        assert_eq!(listed[1].ino, ROOT);
        assert_eq!(listed[2].ino, known.as_u64());
        assert_eq!(listed[3].kind, NodeKind::Directory);
        assert_eq!(listed[4].kind, NodeKind::File);
        assert_eq!(fs.context().nodes().len(), before);
    }

    #[test]
    fn unlooked_entries_get_distinct_placeholder_inodes() {
        let fs = host();
        for name in ["/a", "/b", "/c"] {
            fs.context().store().create(name).unwrap().close().unwrap();
        }

        let listed = fs.readdir(ROOT).unwrap();
        let placeholders: Vec<u64> = listed[2..].iter().map(|e| e.ino).collect();
        assert!(placeholders.iter().all(|&ino| ino >= UNASSIGNED_INO_BASE), "{placeholders:?}");
        let unique: std::collections::HashSet<_> = placeholders.iter().collect();
        assert_eq!(unique.len(), placeholders.len());
    }

    #[test]
    fn oversized_truncate_is_refused_not_fatal() {
        let mut fs = host();
        let (file, _, fh) = fs.create(ROOT, os("f")).unwrap();
        fs.write(fh, b"abc").unwrap();
        fs.release(fh).unwrap();

        assert_eq!(fs.setattr(file.as_u64(), Some(u64::MAX)), Err(ENOENT));
        assert_eq!(fs.getattr(file.as_u64()).unwrap().size, 3);
    }

    #[test]
    fn errors_collapse_to_enoent() {
        let mut fs = host();
        let (file, _, fh) = fs.create(ROOT, os("f")).unwrap();
        fs.release(fh).unwrap();

        assert_eq!(fs.getattr(999), Err(ENOENT));
        assert_eq!(fs.readdir(file.as_u64()), Err(ENOENT));
        assert_eq!(fs.open(ROOT), Err(ENOENT));
        assert_eq!(fs.read(42, 1), Err(ENOENT));
        assert_eq!(fs.release(fh), Err(ENOENT));
        assert_eq!(fs.mkdir(ROOT, os("f")), Err(ENOENT));
        assert_eq!(fs.create(file.as_u64(), os("x")).map(|_| ()), Err(ENOENT));
    }

    #[test]
    fn remove_releases_the_identifier() {
        let mut fs = host();
        let (file, _, fh) = fs.create(ROOT, os("f")).unwrap();
        fs.release(fh).unwrap();

        fs.remove(ROOT, os("f")).unwrap();
        assert_eq!(fs.getattr(file.as_u64()), Err(ENOENT));
        assert_eq!(fs.remove(ROOT, os("f")), Err(ENOENT));
    }

    #[test]
    fn rename_moves_across_directories() {
        let mut fs = host();
        let (src, _) = fs.mkdir(ROOT, os("src")).unwrap();
        let (dst, _) = fs.mkdir(ROOT, os("dst")).unwrap();
        let (file, _, fh) = fs.create(src.as_u64(), os("a")).unwrap();
        fs.write(fh, b"data").unwrap();
        fs.release(fh).unwrap();

        fs.rename(src.as_u64(), os("a"), dst.as_u64(), os("b")).unwrap();
        assert_eq!(fs.lookup(src.as_u64(), os("a")), Err(ENOENT));
        let (moved, attr) = fs.lookup(dst.as_u64(), os("b")).unwrap();
        assert_eq!(moved, file);
        assert_eq!(attr.size, 4);
    }

    #[test]
    fn setattr_truncates_files_only() {
        let mut fs = host();
        let (file, _, fh) = fs.create(ROOT, os("f")).unwrap();
        fs.write(fh, b"abcdef").unwrap();
        fs.release(fh).unwrap();

        assert_eq!(fs.setattr(file.as_u64(), Some(2)).unwrap().size, 2);
        assert_eq!(fs.setattr(file.as_u64(), None).unwrap().size, 2);
        assert_eq!(fs.setattr(ROOT, Some(0)), Err(ENOENT));
    }

    #[test]
    fn teardown_releases_leftover_handles() {
        let mut fs = host();
        let (_, _, _) = fs.create(ROOT, os("a")).unwrap();
        let (_, _, _) = fs.create(ROOT, os("b")).unwrap();
        assert_eq!(fs.open_handles(), 2);
        fs.release_all();
        assert_eq!(fs.open_handles(), 0);
    }

    #[test]
    fn statfs_reports_virtual_capacity() {
        let stats = host().statfs();
        assert_eq!(stats.blocks, 1024 * 1024 * 1024);
        assert_eq!(stats.namelen, 255);
    }
}
