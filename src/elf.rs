//! ELF dynamic-section analysis.
//!
//! Extracts the fields the dynamic linker acts on (soname, needed list,
//! rpath/runpath, version definitions and needs) from shared objects, and
//! calls the vendor-stable MPI version entry point through `libloading`.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Read;
use std::os::raw::{c_char, c_int};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Relevant ELF header fields used in the dynamic linking of libraries.
#[derive(Debug, Clone, Default)]
pub struct ElfData {
    /// DT_SONAME, or the file name when the object does not declare one.
    pub soname: String,
    /// DT_NEEDED entries.
    pub needed: Vec<String>,
    /// DT_RPATH entries, split on `:`.
    pub rpath: Vec<PathBuf>,
    /// DT_RUNPATH entries, split on `:`.
    pub runpath: Vec<PathBuf>,
    /// Version definitions (GNU verdef).
    pub defined_versions: BTreeSet<String>,
    /// Version needs (GNU verneed), keyed by dependency file.
    pub required_versions: BTreeMap<String, Vec<String>>,
}

/// Check a file for the ELF magic number.
pub fn is_elf(path: &Path) -> bool {
    let mut magic = [0u8; 4];

    match fs::File::open(path) {
        Ok(mut file) => file.read_exact(&mut magic).is_ok() && magic == *b"\x7fELF",
        Err(_) => false,
    }
}

fn split_paths(entries: &[&str]) -> Vec<PathBuf> {
    entries
        .iter()
        .flat_map(|entry| entry.split(':'))
        .filter(|part| !part.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Parse the dynamic section of the object at `path`.
///
/// Returns `None` on unreadable or non-ELF input; never errors out.
pub fn parse(path: &Path) -> Option<ElfData> {
    let buffer = fs::read(path).ok()?;
    let elf = goblin::elf::Elf::parse(&buffer).ok()?;

    let mut data = ElfData {
        soname: elf
            .soname
            .map(str::to_string)
            .or_else(|| path.file_name().map(|name| name.to_string_lossy().into_owned()))
            .unwrap_or_default(),
        needed: elf.libraries.iter().map(|lib| lib.to_string()).collect(),
        rpath: split_paths(&elf.rpaths),
        runpath: split_paths(&elf.runpaths),
        ..Default::default()
    };

    if let Some(verdef) = &elf.verdef {
        for def in verdef.iter() {
            // The first auxiliary entry names the version being defined
            if let Some(aux) = def.iter().next() {
                if let Some(name) = elf.dynstrtab.get_at(aux.vda_name) {
                    data.defined_versions.insert(name.to_string());
                }
            }
        }
    }

    if let Some(verneed) = &elf.verneed {
        for need in verneed.iter() {
            let file = elf
                .dynstrtab
                .get_at(need.vn_file)
                .unwrap_or_default()
                .to_string();
            let versions: Vec<String> = need
                .iter()
                .filter_map(|aux| elf.dynstrtab.get_at(aux.vna_name))
                .map(str::to_string)
                .collect();
            data.required_versions.insert(file, versions);
        }
    }

    Some(data)
}

/// Size of the buffer handed to `MPI_Get_library_version`; matches the
/// standard's MPI_MAX_LIBRARY_VERSION_STRING with headroom.
const VERSION_BUFFER_SIZE: usize = 3072;

/// Load the shared object at `path` and call its
/// `MPI_Get_library_version` entry point into a caller-provided buffer.
///
/// Returns the banner string, truncated to a sane length, or `None` when
/// the object cannot be loaded or does not export the symbol.
pub fn mpi_library_version(path: &Path) -> Option<String> {
    type GetLibraryVersion = unsafe extern "C" fn(*mut c_char, *mut c_int) -> c_int;

    let library = match unsafe { libloading::Library::new(path) } {
        Ok(library) => library,
        Err(err) => {
            debug!("Error loading shared object {}: {err}", path.display());
            return None;
        }
    };

    let handle: libloading::Symbol<GetLibraryVersion> =
        match unsafe { library.get(b"MPI_Get_library_version\0") } {
            Ok(symbol) => symbol,
            Err(_) => {
                debug!(
                    "Extracting MPI_Get_library_version from {} failed",
                    path.display()
                );
                return None;
            }
        };

    let mut buffer = vec![0u8; VERSION_BUFFER_SIZE];
    let mut length: c_int = 0;
    unsafe { handle(buffer.as_mut_ptr() as *mut c_char, &mut length) };

    if length <= 0 {
        return None;
    }

    let end = buffer.iter().position(|byte| *byte == 0).unwrap_or(buffer.len());
    let banner = String::from_utf8_lossy(&buffer[..end]).into_owned();

    Some(banner.chars().take(500).collect())
}
