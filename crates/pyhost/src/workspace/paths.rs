//! Workspace path resolution.

use std::path::{Component, Path, PathBuf};
use tracing::warn;

use super::WorkspaceError;

/// Resolve `relative` under `root`, rejecting anything that could escape it.
///
/// The path is built component by component: `..`, absolute components and
/// embedded NUL bytes are refused outright, even when the result would stay
/// inside the root.
pub fn resolve_path(root: &Path, relative: &str) -> Result<PathBuf, WorkspaceError> {
    let trimmed = relative.trim_start_matches('/');
    if trimmed.is_empty() || trimmed == "." {
        return Ok(root.to_path_buf());
    }

    let mut result = root.to_path_buf();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(name) => {
                if name.to_string_lossy().contains('\0') {
                    warn!("path component contains null byte: {:?}", name);
                    return Err(WorkspaceError::PathTraversal(relative.to_string()));
                }
                result.push(name);
            }
            Component::ParentDir => {
                warn!("path traversal attempt: {}", relative);
                return Err(WorkspaceError::PathTraversal(relative.to_string()));
            }
            Component::CurDir => continue,
            Component::RootDir | Component::Prefix(_) => {
                warn!("absolute component in relative path: {}", relative);
                return Err(WorkspaceError::PathTraversal(relative.to_string()));
            }
        }
    }

    if !result.starts_with(root) {
        return Err(WorkspaceError::PathTraversal(relative.to_string()));
    }

    Ok(result)
}

/// Check that writing `target` stays inside `root` once symlinks on disk are
/// taken into account.
///
/// `target` must come from [`resolve_path`]. The target itself may not be a
/// symlink, and its nearest existing ancestor must canonicalize to a path
/// under the canonical root.
pub fn verify_within_root(root: &Path, target: &Path, relative: &str) -> Result<(), WorkspaceError> {
    let canonical_root = root
        .canonicalize()
        .map_err(|e| WorkspaceError::io(root, e))?;

    if let Ok(metadata) = std::fs::symlink_metadata(target) {
        if metadata.file_type().is_symlink() {
            warn!("refusing to write through symlink: {:?}", target);
            return Err(WorkspaceError::PathTraversal(relative.to_string()));
        }
    }

    let mut existing = target;
    while std::fs::symlink_metadata(existing).is_err() {
        match existing.parent() {
            Some(parent) => existing = parent,
            None => return Ok(()),
        }
    }

    // A dangling link fails to canonicalize and is refused like an escape.
    let escaped = match existing.canonicalize() {
        Ok(canonical) => !canonical.starts_with(&canonical_root),
        Err(_) => true,
    };
    if escaped {
        warn!(
            "symlink escape attempt: {:?} resolves outside {:?}",
            target, canonical_root
        );
        return Err(WorkspaceError::PathTraversal(relative.to_string()));
    }
    Ok(())
}

/// `/`-joined path of `full` relative to `root`, or `None` if outside it.
pub fn relative_path(root: &Path, full: &Path) -> Option<String> {
    let relative = full.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();
    Some(parts.join("/"))
}

/// Whether any component of a relative path is a dotfile.
pub fn is_hidden(relative: &str) -> bool {
    relative
        .split('/')
        .any(|part| part.starts_with('.') && part != "." && part != "..")
}

/// Whether a string contains a parent-directory segment.
pub fn has_parent_segment(relative: &str) -> bool {
    relative.split(['/', '\\']).any(|part| part == "..")
}
