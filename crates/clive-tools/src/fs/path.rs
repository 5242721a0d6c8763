//! Path resolution confined to a root directory.

use std::path::{Component, Path, PathBuf};

use crate::errors::ToolError;

/// Resolve `file_path` against `root` and reject anything that escapes it.
///
/// Relative paths are joined to `root`; absolute paths are accepted only if
/// they already lie under `root`. `.` and `..` are folded lexically, so the
/// target does not need to exist yet.
pub fn resolve_within(root: &Path, file_path: &str) -> Result<PathBuf, ToolError> {
    if file_path.trim().is_empty() {
        return Err(ToolError::InvalidInput {
            message: "path must not be empty".into(),
        });
    }
    let candidate = Path::new(file_path);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };
    let normalized = normalize(&joined);
    let root = normalize(root);
    if normalized == root || !normalized.starts_with(&root) {
        return Err(ToolError::OutsideRoot {
            path: file_path.to_string(),
        });
    }
    Ok(normalized)
}

/// Fold `.` and `..` components without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let _ = out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn relative_path_joins_root() {
        let p = resolve_within(Path::new("/work"), "src/a.test.ts").unwrap();
        assert_eq!(p, PathBuf::from("/work/src/a.test.ts"));
    }

    #[test]
    fn dot_segments_fold() {
        let p = resolve_within(Path::new("/work"), "./src/../tests/b.rs").unwrap();
        assert_eq!(p, PathBuf::from("/work/tests/b.rs"));
    }

    #[test]
    fn parent_escape_rejected() {
        assert_matches!(
            resolve_within(Path::new("/work"), "../etc/passwd"),
            Err(ToolError::OutsideRoot { .. })
        );
    }

    #[test]
    fn absolute_outside_rejected() {
        assert_matches!(
            resolve_within(Path::new("/work"), "/etc/passwd"),
            Err(ToolError::OutsideRoot { .. })
        );
    }

    #[test]
    fn absolute_inside_accepted() {
        let p = resolve_within(Path::new("/work"), "/work/x.rs").unwrap();
        assert_eq!(p, PathBuf::from("/work/x.rs"));
    }

    #[test]
    fn root_itself_rejected() {
        assert_matches!(
            resolve_within(Path::new("/work"), "."),
            Err(ToolError::OutsideRoot { .. })
        );
    }

    #[test]
    fn empty_path_rejected() {
        assert_matches!(
            resolve_within(Path::new("/work"), "  "),
            Err(ToolError::InvalidInput { .. })
        );
    }
}
