//! Helpers for slash-separated VFS paths and their local counterparts.
//!
//! VFS paths always use `/`, start with `/`, and are independent of the
//! local filesystem layout. A module maps them below its local VFS root.

use std::path::{Path, PathBuf};

/// Render a local path with forward slashes
pub fn to_slash(path: &Path) -> String {
    let s = path.to_string_lossy();
    if std::path::MAIN_SEPARATOR == '/' {
        s.into_owned()
    } else {
        s.replace(std::path::MAIN_SEPARATOR, "/")
    }
}

/// Normalize a VFS path: leading slash, no trailing slash (except for the root)
pub fn normalize_vfs(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Boundary-aware prefix test on slash-separated paths.
///
/// `prefix` is treated as a folder boundary: `/abc` covers `/abc` and
/// `/abc/def`, never `/abcdef`. A path equal to the un-slashed prefix gets
/// a trailing separator before the test.
pub fn is_under(prefix: &str, path: &str) -> bool {
    let boundary = if prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{}/", prefix)
    };

    if path == boundary.trim_end_matches('/') {
        return true;
    }
    path.starts_with(&boundary)
}

/// Local location of a VFS path below a module's local VFS root
pub fn vfs_to_local(local_vfs_root: &Path, vfs_path: &str) -> PathBuf {
    let relative = vfs_path.trim_matches('/');
    if relative.is_empty() {
        return local_vfs_root.to_path_buf();
    }
    relative
        .split('/')
        .filter(|segment| !segment.is_empty())
        .fold(local_vfs_root.to_path_buf(), |acc, segment| acc.join(segment))
}

/// VFS path of a local path below a module's local VFS root.
///
/// Returns `None` when `real` lies outside the root; the root itself maps to `/`.
pub fn local_to_vfs(local_vfs_root: &Path, real: &Path) -> Option<String> {
    let relative = real.strip_prefix(local_vfs_root).ok()?;
    let relative = to_slash(relative);
    Some(normalize_vfs(&relative))
}

/// Parent of a VFS path, `None` for the root
pub fn vfs_parent(path: &str) -> Option<String> {
    let path = normalize_vfs(path);
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(pos) => Some(path[..pos].to_string()),
        None => None,
    }
}

/// Last segment of a VFS path (empty for the root)
pub fn vfs_name(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("")
}

/// Append a child name to a VFS folder path
pub fn vfs_child(parent: &str, name: &str) -> String {
    let parent = normalize_vfs(parent);
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}
