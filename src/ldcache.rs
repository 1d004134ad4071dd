//! Dynamic-linker cache reader.
//!
//! Decodes the glibc `ld.so.cache` format into a `{soname -> path}` map
//! plus the generator string embedded by ldconfig, which carries the libc
//! version. Handles both the standalone new-format cache and the compat
//! layout where the new header follows the old one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default location of the host linker cache.
pub const HOST_CACHE_PATH: &str = "/etc/ld.so.cache";

const NEW_MAGIC: &[u8] = b"glibc-ld.so.cache1.1";
const HEADER_SIZE: usize = 48;
const ENTRY_SIZE: usize = 24;
const EXTENSION_MAGIC: u32 = 0xeaa4_2174;
const TAG_GENERATOR: u32 = 1;

/// Decoded linker cache.
#[derive(Debug, Clone, Default)]
pub struct LdCache {
    /// Best candidate per soname, in cache preference order.
    entries: BTreeMap<String, PathBuf>,
    /// The `ldconfig` generator string, e.g. `ldconfig (GNU libc) 2.35`.
    pub generator: Option<String>,
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    data.get(offset..offset + 4)
        .map(|bytes| u32::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_cstr(data: &[u8], offset: usize) -> Option<&str> {
    let tail = data.get(offset..)?;
    let end = tail.iter().position(|byte| *byte == 0)?;
    std::str::from_utf8(&tail[..end]).ok()
}

impl LdCache {
    /// Decode a cache from raw bytes. Returns an empty cache when no
    /// new-format header can be located.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut cache = LdCache::default();

        // The new header either starts the file or follows the old-format
        // section; scan for its magic to cover both layouts.
        let base = match data
            .windows(NEW_MAGIC.len())
            .position(|window| window == NEW_MAGIC)
        {
            Some(offset) => offset,
            None => {
                debug!("No usable linker cache header found");
                return cache;
            }
        };

        let Some(nlibs) = read_u32(data, base + 20) else {
            return cache;
        };

        for index in 0..nlibs as usize {
            let entry = base + HEADER_SIZE + index * ENTRY_SIZE;
            let (Some(key), Some(value)) = (read_u32(data, entry + 4), read_u32(data, entry + 8))
            else {
                break;
            };

            let (Some(soname), Some(path)) = (
                read_cstr(data, base + key as usize),
                read_cstr(data, base + value as usize),
            ) else {
                continue;
            };

            // Entries are ordered best-first; keep the first match
            cache
                .entries
                .entry(soname.to_string())
                .or_insert_with(|| PathBuf::from(path));
        }

        cache.generator = extract_generator(data, base);
        cache
    }

    /// Read and decode the cache file at `path`.
    pub fn load(path: &Path) -> Option<Self> {
        let data = std::fs::read(path).ok()?;
        Some(Self::from_bytes(&data))
    }

    /// Decode the host's cache, empty on failure.
    pub fn host() -> Self {
        Self::load(Path::new(HOST_CACHE_PATH)).unwrap_or_default()
    }

    /// Look up the path recorded for a soname.
    pub fn lookup(&self, soname: &str) -> Option<&PathBuf> {
        self.entries.get(soname)
    }

    pub fn sonames(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PathBuf)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Libc version digits parsed out of the generator string.
    pub fn libc_version(&self) -> Option<String> {
        let generator = self.generator.as_deref()?;
        let version: String = generator
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();

        if version.is_empty() { None } else { Some(version) }
    }
}

/// Locate the generator string through the cache extension directory,
/// with a raw scan fallback for caches predating extensions.
fn extract_generator(data: &[u8], base: usize) -> Option<String> {
    let extension_offset = read_u32(data, base + 32)? as usize;

    // The extension offset counts from the start of the file in
    // standalone caches and from the new header in compat ones; accept
    // whichever position carries the magic.
    for start in [extension_offset, base + extension_offset] {
        if read_u32(data, start) != Some(EXTENSION_MAGIC) {
            continue;
        }

        let count = read_u32(data, start + 4)? as usize;
        for section in 0..count {
            let header = start + 8 + section * 16;
            if read_u32(data, header) != Some(TAG_GENERATOR) {
                continue;
            }
            let offset = read_u32(data, header + 8)? as usize;
            let size = read_u32(data, header + 12)? as usize;
            let bytes = data.get(offset..offset + size)?;
            return Some(String::from_utf8_lossy(bytes).into_owned());
        }
    }

    // Old caches embed the string without a directory
    let needle = b"GNU libc";
    data.windows(needle.len())
        .position(|window| window == needle)
        .and_then(|position| {
            let start = data[..position]
                .iter()
                .rposition(|byte| *byte == 0)
                .map(|index| index + 1)
                .unwrap_or(0);
            read_cstr(data, start).map(str::to_string)
        })
}
