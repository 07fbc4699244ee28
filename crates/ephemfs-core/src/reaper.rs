// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Staleness reaper
//!
//! Periodically walks the store and removes files that have not been
//! modified for at least the configured threshold. Directories are left
//! alone. The sweep races with live operations; the only promise it keeps
//! is never to remove a file modified more recently than the threshold.

use std::io;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::SystemTime;

use tracing::{debug, info, warn};

use crate::error::FsResult;
use crate::node::FsContext;
use crate::path;

/// Outcome of a single sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Non-directory entries examined
    pub scanned: usize,
    pub removed: usize,
    /// Removals that failed; the sweep carried on past them
    pub failed: usize,
}

/// Run one pass as of `now`.
///
/// A file is stale when `now - mtime >= threshold`. Files whose mtime lies
/// in the future are never stale. A walk failure aborts the pass; removal
/// failures only bump `failed`.
pub fn sweep(ctx: &FsContext, now: SystemTime) -> FsResult<SweepReport> {
    let threshold = ctx.config().reaper.threshold();
    let mut report = SweepReport::default();
    let mut candidates = Vec::new();

    ctx.store().walk(path::ROOT, &mut |path, meta| {
        if meta.is_dir {
            return;
        }
        report.scanned += 1;
        let elapsed = now.duration_since(meta.mtime).unwrap_or_default();
        if elapsed >= threshold {
            candidates.push(path.to_string());
        }
    })?;

    let Some(cutoff) = now.checked_sub(threshold) else {
        return Ok(report);
    };

    for path in candidates {
        let removal = ctx
            .nodes()
            .invalidate_with(&path, || ctx.store().remove_stale(&path, cutoff));
        match removal {
            Ok(Some(released)) => {
                info!(operation = "reaper.remove", path = %path, released = released.len(), "removed stale entry");
                report.removed += 1;
            }
            Ok(None) => {
                debug!(operation = "reaper.skip", path = %path, "entry modified since scan");
            }
            Err(err) => {
                warn!(operation = "reaper.remove", path = %path, error = %err, "failed to remove stale entry");
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

/// Background sweeper owned by the process lifecycle.
///
/// Dropping it stops the thread and waits for the current pass to finish.
pub struct Reaper {
    signal: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl Reaper {
    pub fn spawn(ctx: Arc<FsContext>) -> io::Result<Self> {
        let signal = Arc::new((Mutex::new(false), Condvar::new()));
        let signal_clone = Arc::clone(&signal);
        let interval = ctx.config().reaper.interval();
        if interval.is_zero() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "reaper interval must be greater than zero",
            ));
        }
        info!(
            interval_ms = ctx.config().reaper.interval_ms,
            threshold_ms = ctx.config().reaper.threshold_ms,
            "starting staleness reaper"
        );

        let handle = thread::Builder::new().name("ephemfs-reaper".to_string()).spawn(move || {
            let (lock, cvar) = &*signal_clone;
            loop {
                let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
                let (stopped, _) = cvar
                    .wait_timeout_while(guard, interval, |stop| !*stop)
                    .unwrap_or_else(PoisonError::into_inner);
                if *stopped {
                    break;
                }
                drop(stopped);

                match sweep(&ctx, SystemTime::now()) {
                    Ok(report) if report.removed > 0 || report.failed > 0 => {
                        debug!(
                            scanned = report.scanned,
                            removed = report.removed,
                            failed = report.failed,
                            "reaper sweep finished"
                        );
                    }
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "reaper walk failed"),
                }
            }
            debug!("staleness reaper stopped");
        })?;

        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for it.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let (lock, cvar) = &*self.signal;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("staleness reaper thread panicked");
            }
        }
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.stop();
    }
}
