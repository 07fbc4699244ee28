// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Attribute projection from store metadata

use std::time::SystemTime;

use crate::config::ModePolicy;
use crate::store::Metadata;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    File,
}

/// Attributes reported to the kernel. Derived on demand, never stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attributes {
    pub kind: NodeKind,
    pub size: u64,
    /// Permission bits only; the file type lives in `kind`
    pub perm: u32,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub crtime: SystemTime,
}

impl Attributes {
    /// Project store metadata. Timestamps are synthesised as `now`; the
    /// store's own mtime is only meaningful to the reaper.
    pub fn project(meta: &Metadata, modes: &ModePolicy, now: SystemTime) -> Self {
        let (kind, perm) = if meta.is_dir {
            (NodeKind::Directory, modes.dir_mode)
        } else {
            (NodeKind::File, modes.file_mode)
        };
        Self {
            kind,
            size: meta.size,
            perm: perm & 0o7777,
            mtime: now,
            ctime: now,
            crtime: now,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    /// 512-byte block count
    pub fn blocks(&self) -> u64 {
        self.size.div_ceil(512)
    }
}

/// Filesystem capacity report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FsStats {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
    pub frsize: u32,
}

const VIRTUAL_CAPACITY: u64 = 1024 * 1024 * 1024;

impl FsStats {
    /// Fixed, effectively unbounded numbers: nothing is persisted, so there is
    /// no real capacity to report.
    pub fn virtual_capacity() -> Self {
        Self {
            blocks: VIRTUAL_CAPACITY,
            bfree: VIRTUAL_CAPACITY,
            bavail: VIRTUAL_CAPACITY,
            files: VIRTUAL_CAPACITY,
            ffree: VIRTUAL_CAPACITY,
            bsize: 4096,
            namelen: crate::path::NAME_MAX as u32,
            frsize: 4096,
        }
    }
}
