// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Backing store abstraction and the in-memory implementation

use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

use crate::error::{FsError, FsResult};
use crate::path;

/// Store-level metadata for a single entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Metadata {
    pub is_dir: bool,
    pub size: u64,
    pub mtime: SystemTime,
}

/// One child reported by [`Backstore::read_dir`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Sequential byte stream over one store entry.
pub trait Stream: Read + Write + Send {
    /// Close the stream. Closing twice reports [`FsError::Closed`].
    fn close(&mut self) -> FsResult<()>;
}

/// Path-addressed hierarchical storage.
///
/// Implementations must be internally synchronised: the adapter and the
/// reaper call into the store concurrently without any outer lock.
pub trait Backstore: Send + Sync {
    fn stat(&self, path: &str) -> FsResult<Metadata>;
    /// Create (or truncate) a file and return a stream positioned at its start.
    fn create(&self, path: &str) -> FsResult<Box<dyn Stream>>;
    fn open(&self, path: &str) -> FsResult<Box<dyn Stream>>;
    fn remove(&self, path: &str) -> FsResult<()>;
    fn rename(&self, from: &str, to: &str) -> FsResult<()>;
    fn mkdir_all(&self, path: &str, mode: u32) -> FsResult<()>;
    fn read_dir(&self, path: &str) -> FsResult<Vec<DirEntry>>;
    fn truncate(&self, path: &str, len: u64) -> FsResult<()>;

    /// Visit `root` and everything below it, parents before children.
    fn walk(&self, root: &str, visitor: &mut dyn FnMut(&str, &Metadata)) -> FsResult<()>;

    /// Remove a non-directory entry only if it was last modified at or before `cutoff`.
    ///
    /// Returns whether the entry was removed. Stores that can check and
    /// remove atomically should override this.
    fn remove_stale(&self, path: &str, cutoff: SystemTime) -> FsResult<bool> {
        let meta = self.stat(path)?;
        if meta.is_dir || meta.mtime > cutoff {
            return Ok(false);
        }
        self.remove(path)?;
        Ok(true)
    }
}

#[derive(Debug)]
struct FileData {
    bytes: Vec<u8>,
    mtime: SystemTime,
}

#[derive(Debug)]
enum EntryKind {
    Dir { mtime: SystemTime },
    File(Arc<RwLock<FileData>>),
}

#[derive(Debug)]
struct Entry {
    kind: EntryKind,
}

impl Entry {
    fn dir() -> Self {
        Self {
            kind: EntryKind::Dir {
                mtime: SystemTime::now(),
            },
        }
    }

    fn is_dir(&self) -> bool {
        matches!(self.kind, EntryKind::Dir { .. })
    }

    fn metadata(&self) -> Metadata {
        match &self.kind {
            EntryKind::Dir { mtime } => Metadata {
                is_dir: true,
                size: 0,
                mtime: *mtime,
            },
            EntryKind::File(data) => {
                let data = data.read().unwrap_or_else(PoisonError::into_inner);
                Metadata {
                    is_dir: false,
                    size: data.bytes.len() as u64,
                    mtime: data.mtime,
                }
            }
        }
    }
}

/// In-memory store keyed by clean absolute path.
///
/// The ordered map keeps every subtree contiguous, so children and
/// descendants are found with a prefix range scan.
#[derive(Debug)]
pub struct MemBackstore {
    entries: RwLock<BTreeMap<String, Entry>>,
}

impl MemBackstore {
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(path::ROOT.to_string(), Entry::dir());
        Self {
            entries: RwLock::new(entries),
        }
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, BTreeMap<String, Entry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Entry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn file_data(&self, path: &str) -> FsResult<Arc<RwLock<FileData>>> {
        let entries = self.read_entries();
        match entries.get(path).map(|e| &e.kind) {
            Some(EntryKind::File(data)) => Ok(Arc::clone(data)),
            Some(EntryKind::Dir { .. }) => Err(FsError::IsADirectory),
            None => Err(FsError::NotFound),
        }
    }
}

impl Default for MemBackstore {
    fn default() -> Self {
        Self::new()
    }
}

/// Keys strictly below `dir` in an ordered map.
fn descendant_keys(entries: &BTreeMap<String, Entry>, dir: &str) -> Vec<String> {
    let prefix = if dir == path::ROOT { path::ROOT.to_string() } else { format!("{dir}/") };
    entries
        .range(prefix.clone()..)
        .take_while(|(key, _)| key.starts_with(&prefix))
        .filter(|(key, _)| key.as_str() != path::ROOT)
        .map(|(key, _)| key.clone())
        .collect()
}

fn has_children(entries: &BTreeMap<String, Entry>, dir: &str) -> bool {
    let prefix = if dir == path::ROOT { path::ROOT.to_string() } else { format!("{dir}/") };
    entries
        .range(prefix.clone()..)
        .take_while(|(key, _)| key.starts_with(&prefix))
        .any(|(key, _)| key.as_str() != path::ROOT)
}

fn require_parent_dir(entries: &BTreeMap<String, Entry>, path: &str) -> FsResult<()> {
    let parent = path::parent(path).ok_or_else(|| FsError::InvalidPath(path.to_string()))?;
    match entries.get(parent) {
        Some(entry) if entry.is_dir() => Ok(()),
        Some(_) => Err(FsError::NotADirectory),
        None => Err(FsError::NotFound),
    }
}

/// A length this process cannot hold in memory.
fn too_large() -> FsError {
    FsError::Io(io::Error::from_raw_os_error(libc::EFBIG))
}

impl Backstore for MemBackstore {
    fn stat(&self, path: &str) -> FsResult<Metadata> {
        let path = path::clean(path)?;
        let entries = self.read_entries();
        entries.get(&path).map(Entry::metadata).ok_or(FsError::NotFound)
    }

    fn create(&self, path: &str) -> FsResult<Box<dyn Stream>> {
        let path = path::clean(path)?;
        let mut entries = self.write_entries();
        require_parent_dir(&entries, &path)?;

        let data = match entries.get(&path).map(|e| &e.kind) {
            Some(EntryKind::Dir { .. }) => return Err(FsError::IsADirectory),
            Some(EntryKind::File(data)) => {
                let mut guard = data.write().unwrap_or_else(PoisonError::into_inner);
                guard.bytes.clear();
                guard.mtime = SystemTime::now();
                Arc::clone(data)
            }
            None => {
                let data = Arc::new(RwLock::new(FileData {
                    bytes: Vec::new(),
                    mtime: SystemTime::now(),
                }));
                entries.insert(
                    path,
                    Entry {
                        kind: EntryKind::File(Arc::clone(&data)),
                    },
                );
                data
            }
        };
        Ok(Box::new(MemStream::new(data)))
    }

    fn open(&self, path: &str) -> FsResult<Box<dyn Stream>> {
        let path = path::clean(path)?;
        let data = self.file_data(&path)?;
        Ok(Box::new(MemStream::new(data)))
    }

    fn remove(&self, path: &str) -> FsResult<()> {
        let path = path::clean(path)?;
        if path == path::ROOT {
            return Err(FsError::InvalidPath(path));
        }
        let mut entries = self.write_entries();
        let is_dir = entries.get(&path).map(Entry::is_dir).ok_or(FsError::NotFound)?;
        if is_dir && has_children(&entries, &path) {
            return Err(FsError::NotEmpty);
        }
        entries.remove(&path);
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        let from = path::clean(from)?;
        let to = path::clean(to)?;
        if from == path::ROOT || to == path::ROOT {
            return Err(FsError::InvalidPath(from));
        }
        if path::is_descendant(&to, &from) {
            return Err(FsError::InvalidPath(to));
        }

        let mut entries = self.write_entries();
        let from_is_dir = entries.get(&from).map(Entry::is_dir).ok_or(FsError::NotFound)?;
        require_parent_dir(&entries, &to)?;
        if from == to {
            return Ok(());
        }

        if let Some(existing) = entries.get(&to) {
            match (from_is_dir, existing.is_dir()) {
                (false, true) => return Err(FsError::IsADirectory),
                (true, false) => return Err(FsError::NotADirectory),
                (true, true) if has_children(&entries, &to) => return Err(FsError::NotEmpty),
                _ => {}
            }
            entries.remove(&to);
        }

        let mut moved = descendant_keys(&entries, &from);
        moved.insert(0, from.clone());
        for key in moved {
            if let Some(entry) = entries.remove(&key) {
                entries.insert(path::rebase(&key, &from, &to), entry);
            }
        }
        Ok(())
    }

    /// Permission bits are reported from configuration, so `_mode` is not kept.
    fn mkdir_all(&self, path: &str, _mode: u32) -> FsResult<()> {
        let path = path::clean(path)?;
        let mut entries = self.write_entries();

        let mut current = String::new();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            current.push('/');
            current.push_str(component);
            match entries.get(&current) {
                Some(entry) if entry.is_dir() => {}
                Some(_) => return Err(FsError::NotADirectory),
                None => {
                    entries.insert(current.clone(), Entry::dir());
                }
            }
        }
        Ok(())
    }

    fn read_dir(&self, path: &str) -> FsResult<Vec<DirEntry>> {
        let path = path::clean(path)?;
        let entries = self.read_entries();
        match entries.get(&path) {
            Some(entry) if entry.is_dir() => {}
            Some(_) => return Err(FsError::NotADirectory),
            None => return Err(FsError::NotFound),
        }

        Ok(descendant_keys(&entries, &path)
            .into_iter()
            .filter(|key| path::parent(key) == Some(path.as_str()))
            .filter_map(|key| {
                entries.get(&key).map(|entry| DirEntry {
                    name: path::file_name(&key).to_string(),
                    is_dir: entry.is_dir(),
                })
            })
            .collect())
    }

    fn truncate(&self, path: &str, len: u64) -> FsResult<()> {
        let path = path::clean(path)?;
        let data = self.file_data(&path)?;
        let len = usize::try_from(len).map_err(|_| too_large())?;
        let mut data = data.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(additional) = len.checked_sub(data.bytes.len()) {
            data.bytes.try_reserve_exact(additional).map_err(|_| too_large())?;
        }
        data.bytes.resize(len, 0);
        data.mtime = SystemTime::now();
        Ok(())
    }

    fn walk(&self, root: &str, visitor: &mut dyn FnMut(&str, &Metadata)) -> FsResult<()> {
        let root = path::clean(root)?;
        // Snapshot first so the visitor is free to mutate the store.
        let snapshot: Vec<(String, Metadata)> = {
            let entries = self.read_entries();
            let root_meta = entries.get(&root).map(Entry::metadata).ok_or(FsError::NotFound)?;
            let mut snapshot = vec![(root.clone(), root_meta)];
            if snapshot[0].1.is_dir {
                for key in descendant_keys(&entries, &root) {
                    if let Some(entry) = entries.get(&key) {
                        snapshot.push((key, entry.metadata()));
                    }
                }
            }
            snapshot
        };

        for (path, meta) in &snapshot {
            visitor(path, meta);
        }
        Ok(())
    }

    fn remove_stale(&self, path: &str, cutoff: SystemTime) -> FsResult<bool> {
        let path = path::clean(path)?;
        let mut entries = self.write_entries();
        let data = match entries.get(&path).map(|e| &e.kind) {
            Some(EntryKind::File(data)) => Arc::clone(data),
            Some(EntryKind::Dir { .. }) => return Ok(false),
            None => return Err(FsError::NotFound),
        };
        // Writers take the data lock; holding it across the removal keeps a
        // concurrent write from landing between the check and the unlink.
        let guard = data.read().unwrap_or_else(PoisonError::into_inner);
        if guard.mtime > cutoff {
            return Ok(false);
        }
        entries.remove(&path);
        Ok(true)
    }
}

/// Stream over the shared bytes of one in-memory file.
///
/// The bytes outlive the store entry, so a stream opened before a remove
/// keeps working on the orphaned data.
pub struct MemStream {
    data: Arc<RwLock<FileData>>,
    pos: usize,
    closed: bool,
}

impl MemStream {
    fn new(data: Arc<RwLock<FileData>>) -> Self {
        Self {
            data,
            pos: 0,
            closed: false,
        }
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::other(FsError::Closed));
        }
        Ok(())
    }
}

impl Read for MemStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_open()?;
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        if self.pos >= data.bytes.len() {
            return Ok(0);
        }
        let end = std::cmp::min(self.pos + buf.len(), data.bytes.len());
        let count = end - self.pos;
        buf[..count].copy_from_slice(&data.bytes[self.pos..end]);
        self.pos = end;
        Ok(count)
    }
}

impl Write for MemStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ensure_open()?;
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        let end = self.pos + buf.len();
        if end > data.bytes.len() {
            data.bytes.resize(end, 0);
        }
        data.bytes[self.pos..end].copy_from_slice(buf);
        data.mtime = SystemTime::now();
        self.pos = end;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.ensure_open()
    }
}

impl Stream for MemStream {
    fn close(&mut self) -> FsResult<()> {
        if self.closed {
            return Err(FsError::Closed);
        }
        self.closed = true;
        Ok(())
    }
}
