//! Filesystem and path helpers shared across the crate.

use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};

/// Check whether `path` lives below `parent` (or equals it), comparing
/// lexically on normalized components without touching the filesystem.
pub fn path_contains(parent: &Path, path: &Path) -> bool {
    let parent = normalize(parent);
    let path = normalize(path);
    path.starts_with(&parent)
}

/// Lexically normalize a path: collapse `.` segments and trailing
/// separators, and resolve `..` against the components already seen.
///
/// `/tmp/`, `/tmp` and `/tmp/./` all normalize to `/tmp`.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(Component::ParentDir);
                }
            }
            other => out.push(other),
        }
    }

    if out.as_os_str().is_empty() {
        out.push(".");
    }

    out
}

/// Normalize a path given as a string, returning the POSIX form stored in
/// profiles.
pub fn normalize_str(path: &str) -> String {
    normalize(Path::new(path)).to_string_lossy().into_owned()
}

/// Compare two paths through symbolic links. Falls back to a lexical
/// comparison when either path cannot be resolved.
pub fn same_file(lhs: &Path, rhs: &Path) -> bool {
    match (lhs.canonicalize(), rhs.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => normalize(lhs) == normalize(rhs),
    }
}

/// Hex-encoded SHA-256 of the input string.
pub fn hash256(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hex::encode(hasher.finalize())
}

/// Locate an executable on `PATH`.
pub fn which(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

/// Read an environment variable under the application prefix,
/// e.g. `get_env("podman_options")` reads `E4S_CL_PODMAN_OPTIONS`.
pub fn get_env(marker: &str) -> Option<String> {
    std::env::var(format!("E4S_CL_{}", marker.to_uppercase())).ok()
}

/// Expand a path containing `..` segments into the set of directories it
/// references. Some sites require files through convoluted relative paths
/// (`/jsm_pmix/container/../lib/../bin/file`); binding only the resolved
/// target is not enough because each intermediate directory must exist.
/// Returns the minimal set of paths covering all of them.
pub fn unrelative(path: &Path) -> Vec<PathBuf> {
    let mut visited = vec![path.to_path_buf()];

    if let Ok(resolved) = path.canonicalize() {
        visited.push(resolved);
    }

    let components: Vec<_> = path.components().collect();
    for (index, component) in components.iter().enumerate() {
        if *component == Component::ParentDir {
            let prefix: PathBuf = components[..index].iter().collect();
            if let Ok(resolved) = prefix.canonicalize() {
                visited.push(resolved);
            } else {
                visited.push(normalize(&prefix));
            }
        }
    }

    visited.sort();
    visited.dedup();

    // Keep only the paths not contained in another visited path
    let kept: Vec<PathBuf> = visited
        .iter()
        .filter(|candidate| {
            !visited
                .iter()
                .any(|other| *candidate != other && path_contains(other, candidate))
        })
        .cloned()
        .collect();

    kept
}
