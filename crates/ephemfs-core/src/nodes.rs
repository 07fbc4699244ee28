// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Node identity table
//!
//! FUSE identifies nodes by integer while the store is addressed by path.
//! This table keeps the two in step: every live path handed to the kernel
//! owns exactly one identifier, identifiers are allocated in strictly
//! increasing order and are never handed out again once their path goes
//! away.

use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use crate::path;

/// Identifier handed to the kernel for a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Reserved identifier of `/`; matches the kernel's root inode.
    pub const ROOT: NodeId = NodeId(1);

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
struct Inner {
    by_path: HashMap<String, NodeId>,
    by_id: HashMap<NodeId, String>,
    /// Highest identifier ever allocated
    max_id: NodeId,
}

impl Inner {
    fn bind(&mut self, path: String, id: NodeId) {
        self.by_id.insert(id, path.clone());
        self.by_path.insert(path, id);
    }

    fn assign(&mut self, path: &str) -> NodeId {
        if let Some(&id) = self.by_path.get(path) {
            return id;
        }
        let id = NodeId(self.max_id.0 + 1);
        self.max_id = id;
        self.bind(path.to_string(), id);
        id
    }

    fn move_subtree(&mut self, from: &str, to: &str) {
        if from == to || from == path::ROOT || to == path::ROOT {
            return;
        }
        self.unbind_subtree(to);
        for (old_path, id) in self.unbind_subtree(from) {
            let new_path = path::rebase(&old_path, from, to);
            self.bind(new_path, id);
        }
    }

    fn unbind_subtree(&mut self, root: &str) -> Vec<(String, NodeId)> {
        let doomed: Vec<String> = self
            .by_path
            .keys()
            .filter(|p| p.as_str() == root || path::is_descendant(p, root))
            .cloned()
            .collect();
        doomed
            .into_iter()
            .filter_map(|p| {
                let id = self.by_path.remove(&p)?;
                self.by_id.remove(&id);
                Some((p, id))
            })
            .collect()
    }
}

/// Bidirectional path/identifier map.
///
/// A single lock guards both directions so they can never disagree;
/// allocation takes it for writing, reverse lookups for reading.
#[derive(Debug)]
pub struct NodeTable {
    inner: RwLock<Inner>,
}

impl NodeTable {
    /// Create a table with the root pre-assigned.
    pub fn new() -> Self {
        let mut inner = Inner {
            by_path: HashMap::new(),
            by_id: HashMap::new(),
            max_id: NodeId::ROOT,
        };
        inner.bind(path::ROOT.to_string(), NodeId::ROOT);
        Self {
            inner: RwLock::new(inner),
        }
    }

    /// Return the identifier for `path`, allocating the next one if the path has none.
    pub fn assign(&self, path: &str) -> NodeId {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.assign(path)
    }

    /// Path currently bound to `id`.
    pub fn resolve(&self, id: NodeId) -> Option<String> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.by_id.get(&id).cloned()
    }

    /// Identifier already bound to `path`, without allocating.
    pub fn lookup(&self, path: &str) -> Option<NodeId> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.by_path.get(path).copied()
    }

    /// Run `op` and, if it succeeds, bind `path` in the same critical section.
    ///
    /// `op` creates or stats the entry in the store. Holding the table lock
    /// across it means no removal can slip in between the store seeing the
    /// entry and the identifier being bound.
    pub fn assign_with<T, E>(
        &self,
        path: &str,
        op: impl FnOnce() -> Result<T, E>,
    ) -> Result<(NodeId, T), E> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let value = op()?;
        Ok((inner.assign(path), value))
    }

    /// Run the store removal `op` and release `path` with its subtree in the
    /// same critical section.
    ///
    /// `op` reports whether the entry actually went away; `None` means it
    /// did not and nothing was released. The root is never released.
    pub fn invalidate_with<E>(
        &self,
        path: &str,
        op: impl FnOnce() -> Result<bool, E>,
    ) -> Result<Option<Vec<NodeId>>, E> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if !op()? {
            return Ok(None);
        }
        if path == path::ROOT {
            return Ok(Some(Vec::new()));
        }
        Ok(Some(inner.unbind_subtree(path).into_iter().map(|(_, id)| id).collect()))
    }

    /// Run the store rename `op` and carry the identifiers of `from` and its
    /// descendants over to `to` in the same critical section.
    ///
    /// Anything previously bound at or below `to` is released first, so a
    /// replaced entry never shares an identifier with the one replacing it.
    pub fn rename_with<E>(
        &self,
        from: &str,
        to: &str,
        op: impl FnOnce() -> Result<(), E>,
    ) -> Result<(), E> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        op()?;
        inner.move_subtree(from, to);
        Ok(())
    }

    /// Number of live bindings, root included.
    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.by_path.len()
    }
}

impl Default for NodeTable {
    fn default() -> Self {
        Self::new()
    }
}
