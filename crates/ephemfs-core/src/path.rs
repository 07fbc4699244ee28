// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Slash-separated path helpers.
//!
//! Every path handled by the store and the identity table is absolute and
//! clean: it starts with `/`, has no empty, `.` or `..` components and no
//! trailing slash (except the root itself).

use crate::error::{FsError, FsResult};

pub const ROOT: &str = "/";

/// Maximum single path component length
pub const NAME_MAX: usize = 255;

/// Join a child name onto a clean parent path.
///
/// The name must be a single component; anything that would escape or
/// alias the parent is rejected.
pub fn join(parent: &str, name: &str) -> FsResult<String> {
    validate_name(name)?;
    if parent == ROOT {
        Ok(format!("/{name}"))
    } else {
        Ok(format!("{parent}/{name}"))
    }
}

pub fn validate_name(name: &str) -> FsResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\0')
    {
        return Err(FsError::InvalidPath(name.to_string()));
    }
    if name.len() > NAME_MAX {
        return Err(FsError::InvalidPath(format!("name too long ({} bytes)", name.len())));
    }
    Ok(())
}

/// Normalise an arbitrary absolute path into its clean form.
pub fn clean(path: &str) -> FsResult<String> {
    if !path.starts_with('/') {
        return Err(FsError::InvalidPath(path.to_string()));
    }
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return Ok(ROOT.to_string());
    }
    Ok(parts.iter().fold(String::new(), |mut acc, part| {
        acc.push('/');
        acc.push_str(part);
        acc
    }))
}

/// Parent of a clean path; the root has no parent.
pub fn parent(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Final component of a clean path (empty for the root).
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or("")
}

/// Whether `path` lies strictly below `ancestor`.
pub fn is_descendant(path: &str, ancestor: &str) -> bool {
    if ancestor == ROOT {
        return path != ROOT;
    }
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'/'
}

/// Replace the `from` prefix of `path` with `to`. `path` must be `from` or a descendant.
pub fn rebase(path: &str, from: &str, to: &str) -> String {
    if path == from {
        return to.to_string();
    }
    let suffix = if from == ROOT { &path[1..] } else { &path[from.len() + 1..] };
    if to == ROOT {
        format!("/{suffix}")
    } else {
        format!("{to}/{suffix}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_under_root_and_nested() {
        assert_eq!(join("/", "a").unwrap(), "/a");
        assert_eq!(join("/a", "b.txt").unwrap(), "/a/b.txt");
    }

    #[test]
    fn join_rejects_escaping_names() {
        for bad in ["", ".", "..", "a/b"] {
            assert!(matches!(join("/", bad), Err(FsError::InvalidPath(_))), "{bad:?}");
        }
        let long = "x".repeat(NAME_MAX + 1);
        assert!(join("/", &long).is_err());
    }

    #[test]
    fn clean_collapses_components() {
        assert_eq!(clean("/").unwrap(), "/");
        assert_eq!(clean("//a/./b/../c/").unwrap(), "/a/c");
        assert_eq!(clean("/..").unwrap(), "/");
        assert!(clean("relative").is_err());
    }

    #[test]
    fn parent_and_name() {
        assert_eq!(parent("/"), None);
        assert_eq!(parent("/a"), Some("/"));
        assert_eq!(parent("/a/b"), Some("/a"));
        assert_eq!(file_name("/a/b"), "b");
        assert_eq!(file_name("/"), "");
    }

    #[test]
    fn descendants_need_a_separator() {
        assert!(is_descendant("/a/b", "/a"));
        assert!(!is_descendant("/ab", "/a"));
        assert!(!is_descendant("/a", "/a"));
        assert!(is_descendant("/a", "/"));
        assert_eq!(rebase("/a/b/c", "/a", "/z"), "/z/b/c");
        assert_eq!(rebase("/a", "/a", "/z"), "/z");
    }
}
