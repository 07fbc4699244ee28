// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! FUSE adapter: binds `fuser` requests to [`HostFs`] and shapes replies.

#[cfg(not(all(feature = "fuse", target_os = "linux")))]
compile_error!("This module requires the 'fuse' feature on Linux");

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use ephemfs_core::{Attributes, FsContext, NodeKind};
use fuser::{
    FileAttr, FileType, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use libc::c_int;
use tracing::{debug, info};

use crate::ops::HostFs;

const BLKSIZE: u32 = 4096;

fn file_type(kind: NodeKind) -> FileType {
    match kind {
        NodeKind::Directory => FileType::Directory,
        NodeKind::File => FileType::RegularFile,
    }
}

pub struct EphemFuse {
    fs: HostFs,
    attr_ttl: Duration,
    entry_ttl: Duration,
    uid: u32,
    gid: u32,
}

impl EphemFuse {
    pub fn new(ctx: Arc<FsContext>) -> Self {
        let cache = &ctx.config().cache;
        let attr_ttl = Duration::from_millis(cache.attr_ttl_ms as u64);
        let entry_ttl = Duration::from_millis(cache.entry_ttl_ms as u64);
        // SAFETY: getuid/getgid cannot fail and touch no memory.
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Self {
            fs: HostFs::new(ctx),
            attr_ttl,
            entry_ttl,
            uid,
            gid,
        }
    }

    fn file_attr(&self, ino: u64, attr: &Attributes) -> FileAttr {
        FileAttr {
            ino,
            size: attr.size,
            blocks: attr.blocks(),
            atime: attr.mtime,
            mtime: attr.mtime,
            ctime: attr.ctime,
            crtime: attr.crtime,
            kind: file_type(attr.kind),
            perm: attr.perm as u16,
            nlink: if attr.is_dir() { 2 } else { 1 },
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: BLKSIZE,
            flags: 0,
        }
    }
}

impl fuser::Filesystem for EphemFuse {
    fn init(&mut self, _req: &Request, _config: &mut fuser::KernelConfig) -> Result<(), c_int> {
        info!(
            attr_ttl_ms = self.attr_ttl.as_millis() as u64,
            entry_ttl_ms = self.entry_ttl.as_millis() as u64,
            "ephemfs FUSE adapter initialized"
        );
        Ok(())
    }

    fn destroy(&mut self) {
        let open = self.fs.open_handles();
        self.fs.release_all();
        info!(released_handles = open, "ephemfs FUSE adapter destroyed");
    }

    fn forget(&mut self, _req: &Request, ino: u64, nlookup: u64) {
        // Identifiers stay bound until their path disappears.
        debug!(ino, nlookup, operation = "forget");
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        debug!(parent, name = ?name, operation = "lookup");
        match self.fs.lookup(parent, name) {
            Ok((id, attr)) => reply.entry(&self.entry_ttl, &self.file_attr(id.as_u64(), &attr), 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        debug!(ino, operation = "getattr");
        match self.fs.getattr(ino) {
            Ok(attr) => reply.attr(&self.attr_ttl, &self.file_attr(ino, &attr)),
            Err(errno) => reply.error(errno),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        debug!(ino, size = ?size, operation = "setattr");
        match self.fs.setattr(ino, size) {
            Ok(attr) => reply.attr(&self.attr_ttl, &self.file_attr(ino, &attr)),
            Err(errno) => reply.error(errno),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!(ino, offset, operation = "readdir");
        let entries = match self.fs.readdir(ino) {
            Ok(entries) => entries,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let skip = usize::try_from(offset).unwrap_or(0);
        for (i, entry) in entries.into_iter().enumerate().skip(skip) {
            // `add` reports a full buffer; the kernel comes back with the next offset.
            if reply.add(entry.ino, (i + 1) as i64, file_type(entry.kind), &entry.name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        debug!(ino, operation = "open");
        match self.fs.open(ino) {
            Ok(fh) => reply.opened(fh, fuser::consts::FOPEN_NONSEEKABLE),
            Err(errno) => reply.error(errno),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        // Streams are sequential; the kernel offset is ignored.
        debug!(ino, fh, offset, size, operation = "read");
        match self.fs.read(fh, size) {
            Ok(data) => reply.data(&data),
            Err(errno) => reply.error(errno),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        debug!(ino, fh, offset, len = data.len(), operation = "write");
        match self.fs.write(fh, data) {
            Ok(written) => reply.written(written),
            Err(errno) => reply.error(errno),
        }
    }

    fn release(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        debug!(ino, fh, operation = "release");
        match self.fs.release(fh) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        debug!(parent, name = ?name, operation = "create");
        match self.fs.create(parent, name) {
            Ok((id, attr, fh)) => reply.created(
                &self.entry_ttl,
                &self.file_attr(id.as_u64(), &attr),
                0,
                fh,
                fuser::consts::FOPEN_NONSEEKABLE,
            ),
            Err(errno) => reply.error(errno),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        debug!(parent, name = ?name, operation = "mkdir");
        match self.fs.mkdir(parent, name) {
            Ok((id, attr)) => reply.entry(&self.entry_ttl, &self.file_attr(id.as_u64(), &attr), 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!(parent, name = ?name, operation = "unlink");
        match self.fs.remove(parent, name) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!(parent, name = ?name, operation = "rmdir");
        match self.fs.remove(parent, name) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        debug!(parent, name = ?name, newparent, newname = ?newname, operation = "rename");
        match self.fs.rename(parent, name, newparent, newname) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn statfs(&mut self, _req: &Request, _ino: u64, reply: ReplyStatfs) {
        let stats = self.fs.statfs();
        reply.statfs(
            stats.blocks,
            stats.bfree,
            stats.bavail,
            stats.files,
            stats.ffree,
            stats.bsize,
            stats.namelen,
            stats.frsize,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ephemfs_core::{FsConfig, ModePolicy};

    fn adapter() -> EphemFuse {
        EphemFuse::new(FsContext::in_memory(FsConfig::default()).expect("context"))
    }

    #[test]
    fn file_attr_carries_kind_and_permissions() {
        let fuse = adapter();
        let now = SystemTime::now();
        let file = Attributes {
            kind: NodeKind::File,
            size: 1025,
            perm: ModePolicy::default().file_mode,
            mtime: now,
            ctime: now,
            crtime: now,
        };
        let attr = fuse.file_attr(7, &file);
        assert_eq!(attr.ino, 7);
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.perm, 0o664);
        assert_eq!(attr.blocks, 3);
        assert_eq!(attr.nlink, 1);

        let dir = Attributes {
            kind: NodeKind::Directory,
            size: 0,
            perm: 0o775,
            ..file
        };
        let attr = fuse.file_attr(1, &dir);
        assert_eq!(attr.kind, FileType::Directory);
        assert_eq!(attr.nlink, 2);
    }

    #[test]
    fn ttls_follow_cache_policy() {
        let mut config = FsConfig::default();
        config.cache.attr_ttl_ms = 250;
        config.cache.entry_ttl_ms = 0;
        let fuse = EphemFuse::new(FsContext::in_memory(config).expect("context"));
        assert_eq!(fuse.attr_ttl, Duration::from_millis(250));
        assert_eq!(fuse.entry_ttl, Duration::ZERO);
    }
}
