//! Confinement of caller-supplied relative paths to a project root.
//!
//! Validation runs in two phases. [`lexical_check`] inspects only the string
//! and rejects anything that could name a location outside the root; no
//! filesystem call ever sees a path that fails it. [`validate_path`] then
//! resolves symlinks along the existing prefix and checks that the result is
//! still under the canonical root.

use std::path::{Component, Path, PathBuf};

use eda_error::EdaError;

/// A path that passed both validation phases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPath {
    /// Normalized path relative to the project root.
    pub relative: PathBuf,
    /// Absolute path under the canonical project root.
    pub absolute: PathBuf,
}

fn traversal(path: &str) -> EdaError {
    EdaError::PathTraversal {
        path: path.to_string(),
    }
}

/// Purely lexical validation of a caller-supplied relative path.
///
/// Rejects empty paths, NUL bytes, backslashes, absolute paths, drive or
/// root prefixes and any `..` segment. Returns the path with `.` segments
/// removed. `field` names the tool argument in argument errors.
pub fn lexical_check(field: &str, relative: &str) -> Result<PathBuf, EdaError> {
    if relative.trim().is_empty() {
        return Err(EdaError::invalid(field, "must not be empty"));
    }
    if relative.contains('\0') || relative.contains('\\') {
        return Err(traversal(relative));
    }
    if relative.starts_with('/') || looks_like_drive(relative) {
        return Err(traversal(relative));
    }

    let mut normalized = PathBuf::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(traversal(relative));
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(EdaError::invalid(field, "must name an entry inside the project"));
    }
    Ok(normalized)
}

fn looks_like_drive(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Resolve `relative` under `root`, rejecting anything that escapes it.
///
/// The deepest existing ancestor of the target is canonicalized and must
/// stay under the canonical root. An existing final component must not be a
/// symlink. Components that do not exist yet are appended unchanged.
pub fn validate_path(root: &Path, field: &str, relative: &str) -> Result<ValidatedPath, EdaError> {
    let normalized = lexical_check(field, relative)?;

    let canonical_root = root.canonicalize().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            EdaError::not_found(format!("project root for '{relative}'"))
        } else {
            EdaError::Internal(anyhow::Error::new(e).context("canonicalize project root"))
        }
    })?;

    let components: Vec<_> = normalized.components().collect();
    let mut existing = canonical_root.clone();
    let mut consumed = 0;
    for (i, component) in components.iter().enumerate() {
        let next = existing.join(component);
        match std::fs::symlink_metadata(&next) {
            Ok(meta) => {
                let is_last = i + 1 == components.len();
                if meta.file_type().is_symlink() {
                    if is_last {
                        return Err(traversal(relative));
                    }
                    let resolved = next.canonicalize().map_err(|_| traversal(relative))?;
                    if !resolved.starts_with(&canonical_root) {
                        return Err(traversal(relative));
                    }
                    existing = resolved;
                } else {
                    existing = next;
                }
                consumed = i + 1;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => break,
            Err(e) => {
                return Err(EdaError::Internal(
                    anyhow::Error::new(e).context("inspect workspace path"),
                ))
            }
        }
    }

    if !existing.starts_with(&canonical_root) {
        return Err(traversal(relative));
    }

    let mut absolute = existing;
    for component in &components[consumed..] {
        absolute.push(component);
    }

    Ok(ValidatedPath {
        relative: normalized,
        absolute,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexical_rejects_escape_shapes() {
        for candidate in [
            "../etc/passwd",
            "../../etc/passwd",
            "src/../../x",
            "src/..",
            "/etc/passwd",
            "C:/Windows",
            "c:evil",
            "src\\..\\x",
            "a\0b",
        ] {
            let err = lexical_check("path", candidate).unwrap_err();
            assert!(
                matches!(err, EdaError::PathTraversal { .. }),
                "expected traversal for {candidate:?}, got {err}"
            );
        }
    }

    #[test]
    fn lexical_normalizes_current_dir() {
        assert_eq!(lexical_check("path", "./src/./adder.v").unwrap(), PathBuf::from("src/adder.v"));
    }

    #[test]
    fn lexical_rejects_empty() {
        assert!(matches!(
            lexical_check("path", "  ").unwrap_err(),
            EdaError::InvalidArgument { .. }
        ));
        assert!(matches!(
            lexical_check("path", "./.").unwrap_err(),
            EdaError::InvalidArgument { .. }
        ));
    }

    #[test]
    fn argument_errors_name_the_caller_field() {
        for (field, value) in [("filename", ""), ("file_path", "  "), ("gds_path", "./.")] {
            match lexical_check(field, value).unwrap_err() {
                EdaError::InvalidArgument { field: got, .. } => assert_eq!(got, field),
                other => panic!("expected InvalidArgument for {field}, got {other}"),
            }
        }
        let dir = tempfile::tempdir().unwrap();
        match validate_path(dir.path(), "gds_path", "").unwrap_err() {
            EdaError::InvalidArgument { field, .. } => assert_eq!(field, "gds_path"),
            other => panic!("expected InvalidArgument, got {other}"),
        }
    }

    #[test]
    fn traversal_rejected_before_filesystem_access() {
        // The root does not exist: a filesystem lookup would yield NotFound,
        // so PathTraversal proves the lexical phase ran first.
        let root = Path::new("/definitely/not/a/real/eda/root");
        let err = validate_path(root, "path", "../../etc/passwd").unwrap_err();
        assert!(matches!(err, EdaError::PathTraversal { .. }));
    }

    #[test]
    fn resolves_new_files_under_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        let validated = validate_path(dir.path(), "path", "src/new/adder.v").unwrap();
        let root = dir.path().canonicalize().unwrap();
        assert_eq!(validated.absolute, root.join("src/new/adder.v"));
        assert_eq!(validated.relative, PathBuf::from("src/new/adder.v"));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlinked_directory_escape() {
        let outside = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("escape")).unwrap();

        let err = validate_path(dir.path(), "path", "escape/secret.txt").unwrap_err();
        assert!(matches!(err, EdaError::PathTraversal { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_as_final_component() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("real.v"), "module m; endmodule").unwrap();
        std::os::unix::fs::symlink(dir.path().join("real.v"), dir.path().join("link.v")).unwrap();

        let err = validate_path(dir.path(), "path", "link.v").unwrap_err();
        assert!(matches!(err, EdaError::PathTraversal { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn allows_internal_directory_symlink() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("reports")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("reports"), dir.path().join("latest")).unwrap();

        let validated = validate_path(dir.path(), "path", "latest/synth.v").unwrap();
        let root = dir.path().canonicalize().unwrap();
        assert_eq!(validated.absolute, root.join("reports/synth.v"));
    }
}
