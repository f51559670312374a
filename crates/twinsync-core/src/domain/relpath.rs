//! Helpers for sync-root relative paths
//!
//! Snapshot maps are keyed by slash-separated paths relative to the sync
//! root, with no leading or trailing slash and never containing the root
//! name itself. The empty string denotes the root.

use std::path::{Component, Path};

use super::errors::DomainError;

/// Normalizes a relative path into snapshot-key form
///
/// Backslashes become slashes, `.` segments and duplicate or edge slashes
/// are dropped.
///
/// # Errors
/// Returns [`DomainError::InvalidPath`] for absolute paths or paths that
/// climb out of the root with `..`.
pub fn normalize(path: &str) -> Result<String, DomainError> {
    let unified = path.replace('\\', "/");
    if unified.starts_with('/') {
        return Err(DomainError::InvalidPath(format!(
            "expected a relative path: {path}"
        )));
    }
    let mut segments = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(DomainError::InvalidPath(format!(
                    "path escapes the sync root: {path}"
                )))
            }
            other => segments.push(other),
        }
    }
    Ok(segments.join("/"))
}

/// Converts a path below `root` into snapshot-key form
///
/// # Errors
/// Returns [`DomainError::InvalidPath`] if `full` is not inside `root` or
/// is not valid UTF-8.
pub fn from_fs(root: &Path, full: &Path) -> Result<String, DomainError> {
    let relative = full.strip_prefix(root).map_err(|_| {
        DomainError::InvalidPath(format!(
            "{} is not inside {}",
            full.display(),
            root.display()
        ))
    })?;
    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(os) => segments.push(os.to_str().ok_or_else(|| {
                DomainError::InvalidPath(format!("non UTF-8 path: {}", full.display()))
            })?),
            Component::CurDir => {}
            _ => {
                return Err(DomainError::InvalidPath(format!(
                    "unexpected component in {}",
                    full.display()
                )))
            }
        }
    }
    Ok(segments.join("/"))
}

/// Parent of a relative path (`""` for root-level entries)
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Last segment of a relative path
pub fn basename(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Number of segments in a relative path (root-level entries have depth 1)
pub fn depth(path: &str) -> usize {
    if path.is_empty() {
        0
    } else {
        path.split('/').count()
    }
}

/// Joins a parent path and a child name
pub fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// Returns true if `path` lies strictly below `ancestor`
pub fn is_descendant(path: &str, ancestor: &str) -> bool {
    if ancestor.is_empty() {
        return !path.is_empty();
    }
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'/'
}

/// Returns true if `path` equals `ancestor` or lies below it
pub fn is_within(path: &str, ancestor: &str) -> bool {
    path == ancestor || is_descendant(path, ancestor)
}

/// Rewrites `path` from the `from` subtree into the `to` subtree
///
/// Returns `None` when `path` is neither `from` nor one of its descendants.
pub fn rebase(path: &str, from: &str, to: &str) -> Option<String> {
    if path == from {
        return Some(to.to_string());
    }
    if is_descendant(path, from) {
        return Some(join(to, &path[from.len() + 1..]));
    }
    None
}

/// Ancestors of a path, nearest first, excluding the root
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    let mut current = path;
    std::iter::from_fn(move || {
        let next = parent(current);
        if next.is_empty() {
            None
        } else {
            current = next;
            Some(next)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_edges_and_dots() {
        assert_eq!(normalize("a//b/./c/").unwrap(), "a/b/c");
        assert_eq!(normalize("a\\b").unwrap(), "a/b");
        assert_eq!(normalize("").unwrap(), "");
    }

    #[test]
    fn test_normalize_rejects_absolute_and_parent() {
        assert!(normalize("/a").is_err());
        assert!(normalize("a/../b").is_err());
    }

    #[test]
    fn test_from_fs() {
        let root = Path::new("/home/u/Sync");
        let full = Path::new("/home/u/Sync/docs/a.txt");
        assert_eq!(from_fs(root, full).unwrap(), "docs/a.txt");
        assert!(from_fs(root, Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn test_parent_and_basename() {
        assert_eq!(parent("a/b/c.txt"), "a/b");
        assert_eq!(parent("c.txt"), "");
        assert_eq!(basename("a/b/c.txt"), "c.txt");
        assert_eq!(basename("c.txt"), "c.txt");
    }

    #[test]
    fn test_depth() {
        assert_eq!(depth(""), 0);
        assert_eq!(depth("a"), 1);
        assert_eq!(depth("a/b/c"), 3);
    }

    #[test]
    fn test_is_descendant_requires_separator() {
        assert!(is_descendant("a/b", "a"));
        assert!(!is_descendant("ab", "a"));
        assert!(!is_descendant("a", "a"));
        assert!(is_within("a", "a"));
    }

    #[test]
    fn test_rebase() {
        assert_eq!(rebase("a", "a", "b").as_deref(), Some("b"));
        assert_eq!(rebase("a/x/y", "a", "b/c").as_deref(), Some("b/c/x/y"));
        assert_eq!(rebase("ab/x", "a", "b"), None);
    }

    #[test]
    fn test_ancestors_nearest_first() {
        let found: Vec<&str> = ancestors("a/b/c").collect();
        assert_eq!(found, vec!["a/b", "a"]);
        assert_eq!(ancestors("a").count(), 0);
    }
}
