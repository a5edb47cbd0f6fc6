//! Relative-path containment.
//!
//! Page outputs and template names come from configuration and are joined
//! onto a root directory. These helpers normalise such paths lexically
//! (no filesystem access, symlinks are not followed) and refuse anything
//! that would resolve outside the root.

use std::path::{Component, Path, PathBuf};

/// Normalise `rel` into a path that stays below its root.
///
/// `.` components are dropped and `..` pops the previous component.
/// Returns `None` for absolute paths, for paths that climb above the root,
/// and for paths that normalise to nothing.
pub fn normalize_relative(rel: &str) -> Option<PathBuf> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in Path::new(rel).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.into_iter().collect())
}

/// Join `rel` onto `root`, or `None` if the result would escape `root`.
pub fn contained_join(root: &Path, rel: &str) -> Option<PathBuf> {
    normalize_relative(rel).map(|normalized| root.join(normalized))
}

/// Render a relative path with forward slashes regardless of platform.
pub fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_relative_paths_pass_through() {
        assert_eq!(normalize_relative("index.html"), Some(PathBuf::from("index.html")));
        assert_eq!(
            normalize_relative("blog/post/index.html"),
            Some(PathBuf::from("blog/post/index.html"))
        );
    }

    #[test]
    fn dot_components_are_resolved() {
        assert_eq!(
            normalize_relative("./a/./b/../c.html"),
            Some(PathBuf::from("a/c.html"))
        );
    }

    #[test]
    fn escaping_paths_are_rejected() {
        assert_eq!(normalize_relative("../index.html"), None);
        assert_eq!(normalize_relative("a/../../index.html"), None);
    }

    #[test]
    fn absolute_paths_are_rejected() {
        assert_eq!(normalize_relative("/etc/passwd"), None);
    }

    #[test]
    fn empty_paths_are_rejected() {
        assert_eq!(normalize_relative(""), None);
        assert_eq!(normalize_relative("."), None);
        assert_eq!(normalize_relative("a/.."), None);
    }

    #[test]
    fn contained_join_prefixes_root() {
        let root = Path::new("/srv/public");
        assert_eq!(
            contained_join(root, "about/index.html"),
            Some(PathBuf::from("/srv/public/about/index.html"))
        );
        assert_eq!(contained_join(root, "../secret"), None);
    }

    #[test]
    fn to_slash_joins_components() {
        let path: PathBuf = ["images", "x.webp"].iter().collect();
        assert_eq!(to_slash(&path), "images/x.webp");
    }
}
