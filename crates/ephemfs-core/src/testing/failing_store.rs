// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Fault-injecting backing store for tests
//!
//! Wraps a real [`Backstore`] and fails selected operations according to a
//! [`FailureBehavior`], so error collapse and reaper robustness can be
//! exercised without a misbehaving real store.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use crate::error::{FsError, FsResult};
use crate::store::{Backstore, DirEntry, Metadata, Stream};

/// Builds the error returned by an injected failure
pub type ErrorFn = Arc<dyn Fn() -> FsError + Send + Sync>;

/// One-shot callback run after an operation succeeds
pub type AfterHook = Box<dyn FnOnce() + Send>;

/// Configurable failure behavior for store operations
#[derive(Clone, Default)]
pub enum FailureBehavior {
    /// Never fail - all operations succeed
    #[default]
    AlwaysSucceed,

    /// Always fail a specific operation
    AlwaysFail { op: &'static str, error_fn: ErrorFn },

    /// Fail the first `count` calls to a specific operation
    FailFor {
        op: &'static str,
        count: u64,
        error_fn: ErrorFn,
    },
}

/// I/O error used by most fault tests
pub fn eio_error() -> FsError {
    FsError::Io(io::Error::from_raw_os_error(libc::EIO))
}

pub struct FailingBackstore {
    inner: Arc<dyn Backstore>,
    behavior: Mutex<FailureBehavior>,
    call_counts: Mutex<HashMap<&'static str, u64>>,
    after: Mutex<HashMap<&'static str, AfterHook>>,
}

impl FailingBackstore {
    pub fn new(inner: Arc<dyn Backstore>) -> Self {
        Self::with_behavior(inner, FailureBehavior::AlwaysSucceed)
    }

    pub fn with_behavior(inner: Arc<dyn Backstore>, behavior: FailureBehavior) -> Self {
        Self {
            inner,
            behavior: Mutex::new(behavior),
            call_counts: Mutex::new(HashMap::new()),
            after: Mutex::new(HashMap::new()),
        }
    }

    /// Update the failure behavior at runtime
    pub fn set_behavior(&self, behavior: FailureBehavior) {
        *self.behavior.lock().unwrap_or_else(PoisonError::into_inner) = behavior;
    }

    /// Number of times `op` has been called
    pub fn call_count(&self, op: &str) -> u64 {
        self.call_counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(op)
            .copied()
            .unwrap_or(0)
    }

    /// Run `hook` once, right after the next successful call to `op` and
    /// before that call returns to its caller.
    pub fn after_success(&self, op: &'static str, hook: impl FnOnce() + Send + 'static) {
        self.after
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(op, Box::new(hook));
    }

    fn run<T>(&self, op: &'static str, call: impl FnOnce() -> FsResult<T>) -> FsResult<T> {
        self.check(op)?;
        let result = call();
        if result.is_ok() {
            let hook = self.after.lock().unwrap_or_else(PoisonError::into_inner).remove(op);
            if let Some(hook) = hook {
                hook();
            }
        }
        result
    }

    fn check(&self, op: &'static str) -> FsResult<()> {
        let call = {
            let mut counts = self.call_counts.lock().unwrap_or_else(PoisonError::into_inner);
            let count = counts.entry(op).or_insert(0);
            *count += 1;
            *count
        };
        let behavior = self.behavior.lock().unwrap_or_else(PoisonError::into_inner);
        match &*behavior {
            FailureBehavior::AlwaysSucceed => Ok(()),
            FailureBehavior::AlwaysFail {
                op: failing,
                error_fn,
            } if *failing == op => Err(error_fn()),
            FailureBehavior::FailFor {
                op: failing,
                count,
                error_fn,
            } if *failing == op && call <= *count => Err(error_fn()),
            _ => Ok(()),
        }
    }
}

impl Backstore for FailingBackstore {
    fn stat(&self, path: &str) -> FsResult<Metadata> {
        self.run("stat", || self.inner.stat(path))
    }

    fn create(&self, path: &str) -> FsResult<Box<dyn Stream>> {
        self.run("create", || self.inner.create(path))
    }

    fn open(&self, path: &str) -> FsResult<Box<dyn Stream>> {
        self.run("open", || self.inner.open(path))
    }

    fn remove(&self, path: &str) -> FsResult<()> {
        self.run("remove", || self.inner.remove(path))
    }

    fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        self.run("rename", || self.inner.rename(from, to))
    }

    fn mkdir_all(&self, path: &str, mode: u32) -> FsResult<()> {
        self.run("mkdir_all", || self.inner.mkdir_all(path, mode))
    }

    fn read_dir(&self, path: &str) -> FsResult<Vec<DirEntry>> {
        self.run("read_dir", || self.inner.read_dir(path))
    }

    fn truncate(&self, path: &str, len: u64) -> FsResult<()> {
        self.run("truncate", || self.inner.truncate(path, len))
    }

    fn walk(&self, root: &str, visitor: &mut dyn FnMut(&str, &Metadata)) -> FsResult<()> {
        self.run("walk", || self.inner.walk(root, visitor))
    }

    fn remove_stale(&self, path: &str, cutoff: SystemTime) -> FsResult<bool> {
        self.run("remove_stale", || self.inner.remove_stale(path, cutoff))
    }
}
