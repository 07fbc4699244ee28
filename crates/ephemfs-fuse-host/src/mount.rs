// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Clearing a stale mount before mounting again

use std::path::Path;
use std::process::Command;

use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum UnmountError {
    #[error("failed to run {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{binary} {mount_point} failed: {stderr}")]
    Failed {
        binary: String,
        mount_point: String,
        stderr: String,
    },
}

/// Try `fusermount -u`, then `umount`. A target that is not mounted counts
/// as success; anything else is only logged.
pub fn try_unmount(mount_point: &Path) {
    let first = match run_umount("fusermount", &["-u"], mount_point) {
        Ok(()) => return,
        Err(err) => err,
    };
    debug!(error = %first, "fusermount did not unmount; trying umount");
    if let Err(err) = run_umount("umount", &[], mount_point) {
        warn!(
            mount_point = %mount_point.display(),
            error = %err,
            "could not clear previous mount"
        );
    }
}

pub fn run_umount(binary: &str, base_args: &[&str], mount_point: &Path) -> Result<(), UnmountError> {
    let output = Command::new(binary)
        .args(base_args)
        .arg(mount_point)
        .output()
        .map_err(|source| UnmountError::Spawn {
            binary: binary.to_string(),
            source,
        })?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    if is_not_mounted(&stderr) {
        return Ok(());
    }
    Err(UnmountError::Failed {
        binary: binary.to_string(),
        mount_point: mount_point.display().to_string(),
        stderr: stderr.trim().to_string(),
    })
}

fn is_not_mounted(stderr: &str) -> bool {
    stderr.contains("not mounted") || stderr.contains("not found in /etc/mtab")
}
