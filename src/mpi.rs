//! MPI vendor and version identification.
//!
//! A shared object identifies its MPI family through the banner returned
//! by the stable `MPI_Get_library_version` entry point. Each vendor gets
//! a substring rule to carve the version out of its banner; the rules are
//! tolerant and produce an empty version rather than failing.

use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::elf;

/// The closed set of recognized MPI distributions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MpiVendor {
    OpenMpi,
    Mpich,
    IntelMpi,
    CrayMpich,
    Mvapich,
    SpectrumMpi,
}

impl MpiVendor {
    pub const ALL: [MpiVendor; 6] = [
        MpiVendor::OpenMpi,
        MpiVendor::Mpich,
        MpiVendor::IntelMpi,
        MpiVendor::CrayMpich,
        MpiVendor::Mvapich,
        MpiVendor::SpectrumMpi,
    ];

    /// The vendor keyword as it appears in the version banner.
    pub fn keyword(&self) -> &'static str {
        match self {
            MpiVendor::OpenMpi => "Open MPI",
            MpiVendor::Mpich => "MPICH",
            MpiVendor::IntelMpi => "Intel(R) MPI",
            MpiVendor::CrayMpich => "CRAY MPICH",
            MpiVendor::Mvapich => "MVAPICH",
            MpiVendor::SpectrumMpi => "Spectrum MPI",
        }
    }

    /// Apply this vendor's version substring rule to a banner.
    ///
    /// Every rule degrades to an empty string when the banner does not
    /// have the expected shape.
    pub fn extract_version(&self, banner: &str) -> String {
        fn between<'a>(text: &'a str, after: &str, before: &str) -> Option<&'a str> {
            let (_, tail) = text.split_once(after)?;
            match tail.split_once(before) {
                Some((version, _)) => Some(version),
                None => Some(tail),
            }
        }

        let extracted = match self {
            // "Intel(R) MPI Library 2019 Update 6 for Linux* OS"
            MpiVendor::IntelMpi => between(banner, "Library", "for"),
            // "Open MPI v4.0.1, package: Open MPI Distribution, ..."
            MpiVendor::OpenMpi | MpiVendor::SpectrumMpi => between(banner, "v", ","),
            // "MPICH Version:  3.3b2\nMPICH Release date: ..."
            MpiVendor::Mpich | MpiVendor::Mvapich => between(banner, ":", "M"),
            // "MPI VERSION    : CRAY MPICH version 8.1.4 (ANL base 3.4a2)"
            MpiVendor::CrayMpich => between(banner, "version", "("),
        };

        extracted.unwrap_or_default().trim().to_string()
    }
}

impl fmt::Display for MpiVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.keyword())
    }
}

/// Identified MPI library: vendor plus version string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MpiIdentifier {
    pub vendor: MpiVendor,
    pub version: String,
}

impl fmt::Display for MpiIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}",
            self.vendor.keyword().replace(' ', "_"),
            self.version
        )
    }
}

/// Identify the vendor of a version banner.
///
/// Vendors whose keyword embeds another's (Spectrum banners also contain
/// "Open MPI") are disambiguated by keeping the longest match.
pub fn identify_banner(banner: &str) -> Option<MpiIdentifier> {
    let vendor = MpiVendor::ALL
        .iter()
        .filter(|vendor| banner.contains(vendor.keyword()))
        .max_by_key(|vendor| vendor.keyword().len())?;

    Some(MpiIdentifier {
        vendor: *vendor,
        version: vendor.extract_version(banner),
    })
}

/// Run the version entry point of a shared object and identify it.
pub fn identify_library(path: &Path) -> Option<MpiIdentifier> {
    identify_banner(&elf::mpi_library_version(path)?)
}

/// Identify the MPI family of a set of binaries.
///
/// Returns an identifier only when the binaries agree on a single one.
pub fn detect_mpi<'a>(paths: impl IntoIterator<Item = &'a PathBuf>) -> Option<MpiIdentifier> {
    let found: BTreeSet<MpiIdentifier> = paths
        .into_iter()
        .filter_map(|path| identify_library(path))
        .collect();

    if found.len() == 1 {
        found.into_iter().next()
    } else {
        None
    }
}

/// Select the MPI core libraries from a list of libraries.
pub fn filter_mpi_libs(libraries: &[PathBuf]) -> Vec<PathBuf> {
    let pattern = Regex::new(r"^libmpi.*so.*").unwrap();

    libraries
        .iter()
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| pattern.is_match(name))
        })
        .cloned()
        .collect()
}

/// Installation prefix of a single library, defined as the path stub
/// before its first `lib`/`lib64` component.
pub fn library_prefix(library: &Path) -> Option<PathBuf> {
    let components: Vec<Component> = library.components().collect();
    let index = components.iter().position(|component| {
        matches!(component, Component::Normal(name) if *name == "lib" || *name == "lib64")
    })?;

    Some(components[..index].iter().collect())
}

/// Common installation prefix of a group of libraries; `None` unless they
/// agree on a single one.
pub fn install_dir<'a>(libraries: impl IntoIterator<Item = &'a PathBuf>) -> Option<PathBuf> {
    let prefixes: BTreeSet<PathBuf> = libraries
        .into_iter()
        .filter_map(|library| library_prefix(library))
        .collect();

    if prefixes.len() == 1 {
        prefixes.into_iter().next()
    } else {
        None
    }
}

/// Compute a `-N` suffix for new profiles so automatic names stay unique.
pub fn suffix_name(name: &str, existing: &BTreeSet<String>) -> String {
    if !existing.contains(name) {
        return name.to_string();
    }

    let clone_pattern = Regex::new(&format!(r"^{}-(\d+)$", regex::escape(name))).unwrap();

    let ordinal = existing
        .iter()
        .filter_map(|candidate| clone_pattern.captures(candidate))
        .filter_map(|captures| captures[1].parse::<u64>().ok())
        .max()
        .map(|max| max + 1)
        .unwrap_or(2);

    format!("{name}-{ordinal}")
}

/// Policy of the foreign-MPI library filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum FilterPolicy {
    /// Drop foreign core MPI libraries when an authoritative installation
    /// can be determined.
    #[default]
    Auto,
    /// Keep everything.
    Off,
    /// Drop only libraries named by the explicit exclude lists.
    Manual,
}

/// Filter discarding MPI core libraries picked up from an installation
/// other than the launcher's.
///
/// A trace run under a launcher can observe libraries from several MPI
/// stacks (modules loaded but unused, compiler wrappers). Importing a
/// foreign core library alongside the authoritative one breaks the
/// substitution, so the filter drops foreign *core* libraries while
/// keeping the auxiliaries under the same prefix. When no single
/// authoritative prefix can be determined the filter keeps everything.
#[derive(Debug, Clone, Default)]
pub struct PollutionFilter {
    pub policy: FilterPolicy,
    /// Library basenames or path prefixes to drop regardless of policy.
    pub exclude: Vec<String>,
}

impl PollutionFilter {
    fn excluded(&self, library: &Path) -> bool {
        self.exclude.iter().any(|entry| {
            let as_path = Path::new(entry);
            library.starts_with(as_path)
                || library
                    .file_name()
                    .is_some_and(|name| name.to_string_lossy() == *entry)
        })
    }

    /// Apply the policy to a library list.
    ///
    /// The launcher's installation prefix is only authoritative when one
    /// of the observed core MPI libraries lives under it. A lone core
    /// library reached through some other prefix (vendor wrapper in
    /// `/usr/bin`, Spack stack on `LD_LIBRARY_PATH`) is kept: without an
    /// anchored prefix the filter fails open.
    pub fn apply(&self, libraries: Vec<PathBuf>, launcher: Option<&Path>) -> Vec<PathBuf> {
        if self.policy == FilterPolicy::Off {
            return libraries;
        }

        let libraries: Vec<PathBuf> = libraries
            .into_iter()
            .filter(|library| !self.excluded(library))
            .collect();

        if self.policy == FilterPolicy::Manual {
            return libraries;
        }

        let Some(authoritative) = launcher.and_then(launcher_prefix) else {
            debug!("No authoritative MPI prefix found, keeping all libraries");
            return libraries;
        };

        let is_core = |library: &PathBuf| filter_mpi_libs(std::slice::from_ref(library)).len() == 1;

        // Conflict requires a core library under the launcher's own
        // prefix on top of the foreign one
        let anchored = libraries
            .iter()
            .filter(|library| is_core(library))
            .any(|library| library_prefix(library).as_deref() == Some(authoritative.as_path()));

        if !anchored {
            debug!(
                "No core MPI library under the launcher prefix {}, keeping all libraries",
                authoritative.display()
            );
            return libraries;
        }

        libraries
            .into_iter()
            .filter(|library| {
                if !is_core(library) {
                    return true;
                }
                match library_prefix(library) {
                    Some(prefix) if prefix != authoritative => {
                        debug!(
                            "Dropping foreign MPI core library {} (prefix {})",
                            library.display(),
                            prefix.display()
                        );
                        false
                    }
                    _ => true,
                }
            })
            .collect()
    }
}

/// Installation prefix of a launcher binary: the path stub before its
/// `bin` directory, through symbolic links.
pub fn launcher_prefix(launcher: &Path) -> Option<PathBuf> {
    let resolved = launcher.canonicalize().unwrap_or_else(|_| launcher.to_path_buf());
    let components: Vec<Component> = resolved.components().collect();
    let index = components
        .iter()
        .position(|component| matches!(component, Component::Normal(name) if *name == "bin"))?;

    Some(components[..index].iter().collect())
}
