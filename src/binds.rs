//! Bind request planning.
//!
//! Collects host-into-container bind requests and reduces them into a
//! minimal, conflict-free set: overlapping requests are merged, redundant
//! ones dropped, and read-only binds promoted when a contained path needs
//! write access.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::util;

/// Access mode requested for a bound file.
///
/// Ordering matters: promotion keeps the maximum of the modes in play.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum BindMode {
    #[default]
    ReadOnly,
    ReadWrite,
}

impl BindMode {
    /// The flag string container runtimes expect.
    pub fn option_string(&self) -> &'static str {
        match self {
            BindMode::ReadOnly => "ro",
            BindMode::ReadWrite => "rw",
        }
    }
}

/// Element of the bound file set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BindRequest {
    pub origin: PathBuf,
    pub destination: PathBuf,
    pub mode: BindMode,
}

impl BindRequest {
    pub fn new(origin: impl Into<PathBuf>, destination: impl Into<PathBuf>, mode: BindMode) -> Self {
        Self {
            origin: util::normalize(&origin.into()),
            destination: util::normalize(&destination.into()),
            mode,
        }
    }

    /// Bind a path to itself.
    pub fn in_place(path: impl Into<PathBuf>, mode: BindMode) -> Self {
        let path = util::normalize(&path.into());
        Self {
            origin: path.clone(),
            destination: path,
            mode,
        }
    }
}

/// Assert the containee bind is covered by the container bind. Two cases:
///
/// - Both are bound to the same destination and their origins resolve to
///   the same real file.
/// - The containee's origin sits under the container's origin by the same
///   relative path as its destination under the container's destination,
///   making the containee visible through the container's bind.
///
/// Anything else, notably a directory bind with one of its files bound
/// elsewhere, is not containment.
fn contains(container: &BindRequest, containee: &BindRequest) -> bool {
    if containee.destination == container.destination
        && util::same_file(&container.origin, &containee.origin)
    {
        return true;
    }

    match (
        containee.origin.strip_prefix(&container.origin),
        containee.destination.strip_prefix(&container.destination),
    ) {
        (Ok(origin_delta), Ok(destination_delta)) => origin_delta == destination_delta,
        _ => false,
    }
}

/// The reduced set of bind requests handed to a backend driver.
#[derive(Debug, Clone, Default)]
pub struct BindSet {
    binds: BTreeSet<BindRequest>,
}

impl BindSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a bind request, folding it into the existing set.
    ///
    /// If the new request is already covered, the covering binds are
    /// promoted to its mode when needed and the request is dropped. If
    /// the new request covers existing binds, those are removed and the
    /// new request inherits the strictest of their modes.
    pub fn add(&mut self, new: BindRequest) {
        let covering: Vec<BindRequest> = self
            .binds
            .iter()
            .filter(|bind| contains(bind, &new))
            .cloned()
            .collect();

        if !covering.is_empty() {
            let granted = covering.iter().map(|bind| bind.mode).max().unwrap();

            if granted < new.mode {
                for bind in covering {
                    self.binds.remove(&bind);
                    self.binds.insert(BindRequest {
                        mode: new.mode,
                        ..bind
                    });
                }
            }
            return;
        }

        let covered: Vec<BindRequest> = self
            .binds
            .iter()
            .filter(|bind| contains(&new, bind))
            .cloned()
            .collect();

        let mut new = new;
        if let Some(required) = covered.iter().map(|bind| bind.mode).max() {
            if required > new.mode {
                new.mode = required;
            }
        }

        for bind in covered {
            self.binds.remove(&bind);
        }
        self.binds.insert(new);
    }

    /// Bind a file in place, expanding `..`-laden paths into every
    /// directory they traverse.
    pub fn add_unrelative(&mut self, path: &Path, mode: BindMode) {
        for dependency in util::unrelative(path) {
            self.add(BindRequest::in_place(dependency, mode));
        }
    }

    /// Iterate over binds whose origin exists and whose destination is
    /// absolute, warning about the rest.
    pub fn bound(&self) -> impl Iterator<Item = &BindRequest> {
        self.binds.iter().filter(|bind| {
            let valid = bind.origin.exists() && bind.destination.is_absolute();
            if !valid {
                warn!(
                    "Attempting to bind non-existing file: {} to {}",
                    bind.origin.display(),
                    bind.destination.display()
                );
            }
            valid
        })
    }

    /// Iterate over every recorded bind, including invalid ones.
    pub fn iter(&self) -> impl Iterator<Item = &BindRequest> {
        self.binds.iter()
    }

    pub fn len(&self) -> usize {
        self.binds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.binds.is_empty()
    }
}
