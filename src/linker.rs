//! Soname resolution following the dynamic-linker search order.

use std::path::{Path, PathBuf};

use crate::elf;
use crate::ldcache::LdCache;
use crate::util;

/// Directories searched by the linker when everything else fails.
const DEFAULT_TRUSTED_DIRS: [&str; 4] = ["/lib64", "/usr/lib64", "/lib", "/usr/lib"];

fn find_in(directories: &[PathBuf], soname: &str) -> Option<PathBuf> {
    directories
        .iter()
        .map(|directory| directory.join(soname))
        .find(|candidate| candidate.is_file())
}

fn ld_library_path() -> Vec<PathBuf> {
    std::env::var("LD_LIBRARY_PATH")
        .unwrap_or_default()
        .split(':')
        .filter(|part| !part.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Resolve a soname against the requester's rpath, the process
/// `LD_LIBRARY_PATH`, the requester's runpath, the linker cache and the
/// default trusted directories, in that order.
pub fn resolve(
    soname: &str,
    rpath: &[PathBuf],
    runpath: &[PathBuf],
    cache: &LdCache,
) -> Option<PathBuf> {
    // Sonames with a slash are paths, not cache keys
    if soname.contains('/') {
        let path = PathBuf::from(soname);
        return path.is_file().then_some(path);
    }

    find_in(rpath, soname)
        .or_else(|| find_in(&ld_library_path(), soname))
        .or_else(|| find_in(runpath, soname))
        .or_else(|| cache.lookup(soname).cloned())
        .or_else(|| {
            let defaults: Vec<PathBuf> =
                DEFAULT_TRUSTED_DIRS.iter().map(PathBuf::from).collect();
            find_in(&defaults, soname)
        })
}

/// Check whether an ELF object is what the linker would hand out for its
/// own soname. Objects that fail this test are orphans: loaded through
/// explicit paths (dlopen) rather than the search order, and must be
/// imported at their original location.
pub fn resolves_to_self(
    path: &Path,
    extra_rpath: &[PathBuf],
    extra_runpath: &[PathBuf],
    cache: &LdCache,
) -> bool {
    let Some(data) = elf::parse(path) else {
        return false;
    };

    let mut rpath = data.rpath.clone();
    rpath.extend_from_slice(extra_rpath);
    let mut runpath = data.runpath.clone();
    runpath.extend_from_slice(extra_runpath);

    match resolve(&data.soname, &rpath, &runpath, cache) {
        Some(resolved) => util::same_file(path, &resolved),
        None => false,
    }
}
