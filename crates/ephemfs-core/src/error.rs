// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for ephemfs core

use libc::{c_int, EINVAL, EIO, EISDIR, ENOENT, ENOTDIR, ENOTEMPTY};
use std::io;

/// Core filesystem error type
#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("not found")]
    NotFound,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("directory not empty")]
    NotEmpty,
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("stream already closed")]
    Closed,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl FsError {
    /// Raw errno for this error, as the kernel would understand it.
    pub fn errno(&self) -> c_int {
        match self {
            FsError::NotFound => ENOENT,
            FsError::NotADirectory => ENOTDIR,
            FsError::IsADirectory => EISDIR,
            FsError::NotEmpty => ENOTEMPTY,
            FsError::InvalidPath(_) => EINVAL,
            FsError::Closed => EIO,
            FsError::Io(err) => err.raw_os_error().unwrap_or(EIO),
        }
    }
}

pub type FsResult<T> = Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(FsError::NotFound.errno(), ENOENT);
        assert_eq!(FsError::NotEmpty.errno(), ENOTEMPTY);
        assert_eq!(FsError::Io(io::Error::other("boom")).errno(), EIO);
        assert_eq!(
            FsError::Io(io::Error::from_raw_os_error(libc::ENOSPC)).errno(),
            libc::ENOSPC
        );
    }
}
