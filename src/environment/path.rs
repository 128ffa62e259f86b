//! Lexical path confinement.
//!
//! Paths coming from the environment are normalized without touching the
//! filesystem: `.` segments are dropped, `..` segments consume their parent and
//! repeated separators collapse. The confinement check then compares whole
//! path components, so `/jenkins/workspace2` is not inside
//! `/jenkins/workspace` and a segment such as `%2e%2e` is an ordinary name.
//!
//! Symlinks are not resolved. A confined path that is a symlink pointing
//! elsewhere passes the check.

use std::path::{Path, PathBuf};

use path_clean::PathClean;

use crate::error::ValidationError;

/// Normalizes `path` lexically.
#[must_use]
pub fn normalize(path: &Path) -> PathBuf {
    path.clean()
}

/// Returns `true` if `path` is `root` or lies below it, component-wise.
#[must_use]
pub fn is_confined(path: &Path, root: &Path) -> bool {
    normalize(path).starts_with(normalize(root))
}

/// Requires `value` to be an absolute path.
pub fn require_absolute(key: &str, value: &str) -> Result<PathBuf, ValidationError> {
    let path = PathBuf::from(value);
    if !path.is_absolute() {
        return Err(ValidationError::NotAbsolute {
            key: key.to_string(),
            value: value.to_string(),
        });
    }
    Ok(path)
}

/// Validates that `value` is an absolute path inside `root`.
///
/// Returns the normalized path.
///
/// # Errors
///
/// - `ValidationError::NotAbsolute` for relative values
/// - `ValidationError::OutsideRoot` if the normalized path leaves `root`
pub fn confine(key: &str, value: &str, root: &Path) -> Result<PathBuf, ValidationError> {
    let path = normalize(&require_absolute(key, value)?);
    let root = normalize(root);

    if !path.starts_with(&root) {
        return Err(ValidationError::OutsideRoot {
            key: key.to_string(),
            path,
            root,
        });
    }
    Ok(path)
}
