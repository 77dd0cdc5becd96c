//! Lexical path helpers.
//!
//! Nothing here touches the filesystem: configuration identities must compare equal
//! for the same project whether or not the file exists yet.

use std::path::{Component, Path, PathBuf};

/// Normalize a path without touching the filesystem.
///
/// Removes `.` components and resolves `..` against the preceding component.
/// A `..` that would climb above the root is dropped.
pub fn normalize_lexically(path: &Path) -> PathBuf {
  let mut normalized = PathBuf::new();
  for component in path.components() {
    match component {
      Component::ParentDir => {
        normalized.pop();
      }
      Component::CurDir => {}
      _ => normalized.push(component),
    }
  }
  normalized
}

/// Resolve `spec` against `base` unless it is already absolute.
pub fn resolve_against(base: &Path, spec: &str) -> PathBuf {
  let path = Path::new(spec);
  if path.is_absolute() {
    normalize_lexically(path)
  } else {
    normalize_lexically(&base.join(path))
  }
}
