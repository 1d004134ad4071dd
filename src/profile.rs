//! Profile data model and controller.
//!
//! A profile is the persistent bundle naming everything a launch needs:
//! backend, image, files and libraries to import, and the optional
//! translation shim settings. Profiles live in a [`Storage`] scope and
//! are only mutated through the [`ProfileController`], which enforces
//! name uniqueness and path normalization.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Write as _;

use crate::error::{Error, Result};
use crate::storage::{Eid, Storage};
use crate::util;

/// Name of the placeholder profile created by `init` before detection
/// renames it.
pub const INIT_TEMP_PROFILE_NAME: &str = "__INIT_TEMP_PROFILE";

/// The central persistent record.
///
/// Scalars serialize as `null` when unset so dumped records are complete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Unique human handle.
    pub name: String,

    /// Backend driver identifier.
    pub backend: Option<String>,

    /// Backend-specific image reference.
    pub image: Option<String>,

    /// Paths bound into the container at identical destinations.
    #[serde(default)]
    pub files: Vec<String>,

    /// Shared objects bound into the library import directory.
    #[serde(default)]
    pub libraries: Vec<String>,

    /// Script sourced inside the container before exec.
    pub source: Option<String>,

    /// Translation shim installation root.
    pub wi4mpi: Option<String>,

    /// Extra arguments for the translation shim.
    pub wi4mpi_options: Option<String>,
}

impl Profile {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Collapse every path list entry to its POSIX normal form and drop
    /// duplicates, preserving first-seen order.
    pub fn homogenize(&mut self) {
        for list in [&mut self.files, &mut self.libraries] {
            let mut seen = BTreeSet::new();
            let mut normalized = Vec::new();
            for entry in list.iter() {
                let path = util::normalize_str(entry);
                if seen.insert(path.clone()) {
                    normalized.push(path);
                }
            }
            *list = normalized;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Model("profile name cannot be empty".into()));
        }
        Ok(())
    }

    /// Read a scalar field by its attribute name.
    pub fn field(&self, name: &str) -> Option<String> {
        match name {
            "name" => Some(self.name.clone()),
            "backend" => self.backend.clone(),
            "image" => self.image.clone(),
            "source" => self.source.clone(),
            "wi4mpi" => self.wi4mpi.clone(),
            "wi4mpi_options" => self.wi4mpi_options.clone(),
            _ => None,
        }
    }
}

/// Ways of addressing profiles from the command line.
pub enum Selector<'a> {
    Name(&'a str),
    /// `#`/`*` wildcard pattern.
    Pattern(&'a str),
}

/// Compile a user-supplied pattern where `#` and `*` match any characters
/// and every other regex metacharacter is taken literally.
pub fn wildcard_regex(pattern: &str) -> regex::Regex {
    let mut translated = String::from("^");
    for character in pattern.chars() {
        match character {
            '#' | '*' => translated.push_str(".*"),
            other => {
                let _ = write!(translated, "{}", regex::escape(&other.to_string()));
            }
        }
    }
    translated.push('$');

    // The pattern is fully escaped above, compilation cannot fail
    regex::Regex::new(&translated).expect("escaped wildcard pattern")
}

/// Profile record controller over a storage scope.
pub struct ProfileController<'a> {
    storage: &'a mut Storage,
}

impl<'a> ProfileController<'a> {
    pub fn new(storage: &'a mut Storage) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Storage {
        self.storage
    }

    fn decode(eid: Eid, value: &serde_json::Value) -> Result<Profile> {
        serde_json::from_value(value.clone())
            .map_err(|err| Error::Model(format!("record {eid} does not match the schema: {err}")))
    }

    /// All profiles with their identifiers.
    pub fn all(&self) -> Result<Vec<(Eid, Profile)>> {
        self.storage
            .all()
            .map(|(eid, value)| Self::decode(eid, value).map(|profile| (eid, profile)))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.storage.count()
    }

    /// Find a single profile by exact name.
    pub fn one(&self, name: &str) -> Result<Option<(Eid, Profile)>> {
        Ok(self
            .all()?
            .into_iter()
            .find(|(_, profile)| profile.name == name))
    }

    pub fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.one(name)?.is_some())
    }

    /// Profiles whose name matches a compiled pattern.
    pub fn matching(&self, pattern: &regex::Regex) -> Result<Vec<(Eid, Profile)>> {
        self.match_field("name", pattern)
    }

    /// Profiles whose scalar `field` matches a regular expression.
    pub fn match_field(
        &self,
        field: &str,
        pattern: &regex::Regex,
    ) -> Result<Vec<(Eid, Profile)>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|(_, profile)| {
                profile
                    .field(field)
                    .is_some_and(|value| pattern.is_match(&value))
            })
            .collect())
    }

    /// Profiles whose scalar fields carry every given value.
    pub fn search(&self, keys: &[(&str, &str)]) -> Result<Vec<(Eid, Profile)>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|(_, profile)| {
                keys.iter().all(|(field, value)| {
                    profile.field(field).as_deref() == Some(*value)
                })
            })
            .collect())
    }

    /// Resolve a selector into concrete profiles.
    pub fn resolve(&self, selector: &Selector) -> Result<Vec<(Eid, Profile)>> {
        match selector {
            Selector::Name(name) => Ok(self.one(name)?.into_iter().collect()),
            Selector::Pattern(pattern) => self.matching(&wildcard_regex(pattern)),
        }
    }

    /// Existing profile names, for unique-name computations.
    pub fn names(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .all()?
            .into_iter()
            .map(|(_, profile)| profile.name)
            .collect())
    }

    /// Validate and insert a new profile atomically.
    pub fn create(&mut self, mut profile: Profile) -> Result<Eid> {
        profile.validate()?;
        profile.homogenize();

        if self.contains(&profile.name)? {
            return Err(Error::UniqueAttribute(profile.name));
        }

        self.storage
            .transaction(|storage| storage.insert(serde_json::to_value(&profile)?))
    }

    /// Replace the record at `eid`, preserving name uniqueness.
    pub fn update(&mut self, eid: Eid, mut profile: Profile) -> Result<()> {
        profile.validate()?;
        profile.homogenize();

        if let Some((other_eid, _)) = self.one(&profile.name)? {
            if other_eid != eid {
                return Err(Error::UniqueAttribute(profile.name));
            }
        }
        if self.storage.get(eid).is_none() {
            return Err(Error::Model(format!("no profile with eid {eid}")));
        }

        self.storage
            .transaction(|storage| storage.update(eid, serde_json::to_value(&profile)?))
    }

    /// Clear optional fields on the record at `eid`.
    pub fn unset(&mut self, eid: Eid, fields: &[&str]) -> Result<()> {
        let value = self
            .storage
            .get(eid)
            .ok_or_else(|| Error::Model(format!("no profile with eid {eid}")))?;
        let mut profile = Self::decode(eid, value)?;

        for field in fields {
            match *field {
                "backend" => profile.backend = None,
                "image" => profile.image = None,
                "source" => profile.source = None,
                "wi4mpi" => profile.wi4mpi = None,
                "wi4mpi_options" => profile.wi4mpi_options = None,
                "files" => profile.files.clear(),
                "libraries" => profile.libraries.clear(),
                other => {
                    return Err(Error::Model(format!("no attribute named '{other}'")));
                }
            }
        }

        self.update(eid, profile)
    }

    /// Delete every record in the scope and clear the selection.
    pub fn purge(&mut self) -> Result<()> {
        self.storage.transaction(|storage| storage.purge())
    }

    /// Delete a profile; a selected profile loses its selection.
    pub fn delete(&mut self, eid: Eid) -> Result<()> {
        if self.storage.get(eid).is_none() {
            return Err(Error::Model(format!("no profile with eid {eid}")));
        }
        self.storage.transaction(|storage| storage.remove(eid))
    }

    pub fn select(&mut self, eid: Eid) -> Result<()> {
        self.storage.transaction(|storage| storage.select(eid))
    }

    pub fn unselect(&mut self) -> Result<()> {
        self.storage.transaction(|storage| storage.unselect())
    }

    /// The selected profile, if any.
    pub fn selected(&self) -> Result<Option<(Eid, Profile)>> {
        match self.storage.selected_eid() {
            Some(eid) => {
                let value = self
                    .storage
                    .get(eid)
                    .ok_or(Error::NoProfileSelected)?;
                Ok(Some((eid, Self::decode(eid, value)?)))
            }
            None => Ok(None),
        }
    }

    /// Serialize profiles to the dump format: a JSON array of full
    /// records, `null` for unset scalars.
    pub fn dump(&self, profiles: &[(Eid, Profile)]) -> Result<String> {
        let records: Vec<&Profile> = profiles.iter().map(|(_, profile)| profile).collect();
        Ok(serde_json::to_string_pretty(&records)?)
    }

    /// Import records produced by [`dump`](Self::dump), renumbering eids.
    pub fn import(&mut self, data: &str) -> Result<Vec<Eid>> {
        let records: Vec<Profile> = serde_json::from_str(data)?;
        let mut created = Vec::new();
        for profile in records {
            created.push(self.create(profile)?);
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;

    fn controller(storage: &mut Storage) -> ProfileController<'_> {
        ProfileController::new(storage)
    }

    fn open() -> (tempfile::TempDir, Storage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open_path(&dir.path().join("user.json")).unwrap();
        (dir, storage)
    }

    #[test]
    fn test_create_and_fetch() {
        let (_dir, mut storage) = open();
        let mut controller = controller(&mut storage);

        let eid = controller.create(Profile::named("alpha")).unwrap();
        let (found_eid, found) = controller.one("alpha").unwrap().unwrap();
        assert_eq!(found_eid, eid);
        assert_eq!(found.name, "alpha");
        assert!(found.backend.is_none());
    }

    #[test]
    fn test_unique_name_enforced() {
        let (_dir, mut storage) = open();
        let mut controller = controller(&mut storage);

        controller.create(Profile::named("alpha")).unwrap();
        assert!(matches!(
            controller.create(Profile::named("alpha")),
            Err(Error::UniqueAttribute(_))
        ));
    }

    #[test]
    fn test_empty_name_rejected() {
        let (_dir, mut storage) = open();
        let mut controller = controller(&mut storage);
        assert!(matches!(
            controller.create(Profile::default()),
            Err(Error::Model(_))
        ));
    }

    #[test]
    fn test_update_uniqueness() {
        let (_dir, mut storage) = open();
        let mut controller = controller(&mut storage);

        let first = controller.create(Profile::named("alpha")).unwrap();
        controller.create(Profile::named("beta")).unwrap();

        // Renaming alpha over beta must fail
        assert!(matches!(
            controller.update(first, Profile::named("beta")),
            Err(Error::UniqueAttribute(_))
        ));

        // Updating in place is fine
        let mut updated = Profile::named("alpha");
        updated.backend = Some("podman".into());
        controller.update(first, updated).unwrap();
        let (_, profile) = controller.one("alpha").unwrap().unwrap();
        assert_eq!(profile.backend.as_deref(), Some("podman"));
    }

    #[test]
    fn test_paths_normalized_on_create() {
        let (_dir, mut storage) = open();
        let mut controller = controller(&mut storage);

        let mut profile = Profile::named("paths");
        profile.files = vec!["/tmp/".into(), "/tmp".into(), "/tmp/./".into(), "/data".into()];
        controller.create(profile).unwrap();

        let (_, stored) = controller.one("paths").unwrap().unwrap();
        assert_eq!(stored.files, vec!["/tmp".to_string(), "/data".to_string()]);
    }

    #[test]
    fn test_selection_lifecycle() {
        let (_dir, mut storage) = open();
        let mut controller = controller(&mut storage);

        assert!(controller.selected().unwrap().is_none());

        let eid = controller.create(Profile::named("alpha")).unwrap();
        controller.select(eid).unwrap();
        assert_eq!(controller.selected().unwrap().unwrap().1.name, "alpha");

        // Deleting the selected profile clears the selection
        controller.delete(eid).unwrap();
        assert!(controller.selected().unwrap().is_none());
    }

    #[test]
    fn test_wildcard_matching() {
        let (_dir, mut storage) = open();
        let mut controller = controller(&mut storage);

        for name in ["a-1", "a-2", "b-1", "test.profile"] {
            controller.create(Profile::named(name)).unwrap();
        }

        let matches = controller.matching(&wildcard_regex("a-*")).unwrap();
        let names: Vec<String> = matches.into_iter().map(|(_, p)| p.name).collect();
        assert_eq!(names, vec!["a-1", "a-2"]);

        // The dot is literal: "test.*" only matches names with a dot
        let matches = controller.matching(&wildcard_regex("test.*")).unwrap();
        assert_eq!(matches.len(), 1);

        // '#' behaves like '*'
        let matches = controller.matching(&wildcard_regex("b-#")).unwrap();
        assert_eq!(matches[0].1.name, "b-1");
    }

    #[test]
    fn test_search_by_field_values() {
        let (_dir, mut storage) = open();
        let mut controller = controller(&mut storage);

        let mut first = Profile::named("one");
        first.backend = Some("podman".into());
        first.image = Some("ubi9".into());
        controller.create(first).unwrap();

        let mut second = Profile::named("two");
        second.backend = Some("podman".into());
        second.image = Some("fedora".into());
        controller.create(second).unwrap();

        let found = controller.search(&[("backend", "podman")]).unwrap();
        assert_eq!(found.len(), 2);

        let found = controller
            .search(&[("backend", "podman"), ("image", "ubi9")])
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1.name, "one");

        assert!(controller.search(&[("image", "void")]).unwrap().is_empty());
    }

    #[test]
    fn test_match_field_regex() {
        let (_dir, mut storage) = open();
        let mut controller = controller(&mut storage);

        let mut profile = Profile::named("MPICH@3.4");
        profile.backend = Some("apptainer".into());
        controller.create(profile).unwrap();

        let pattern = regex::Regex::new(r"^MPICH@3\..*$").unwrap();
        assert_eq!(controller.match_field("name", &pattern).unwrap().len(), 1);

        let pattern = regex::Regex::new("^appt.*$").unwrap();
        assert_eq!(controller.match_field("backend", &pattern).unwrap().len(), 1);
    }

    #[test]
    fn test_unset_clears_fields() {
        let (_dir, mut storage) = open();
        let mut controller = controller(&mut storage);

        let mut profile = Profile::named("one");
        profile.backend = Some("podman".into());
        profile.files = vec!["/etc/hosts".into()];
        let eid = controller.create(profile).unwrap();

        controller.unset(eid, &["backend", "files"]).unwrap();
        let (_, stored) = controller.one("one").unwrap().unwrap();
        assert!(stored.backend.is_none());
        assert!(stored.files.is_empty());

        assert!(matches!(
            controller.unset(eid, &["nonsense"]),
            Err(Error::Model(_))
        ));
    }

    #[test]
    fn test_purge_empties_scope() {
        let (_dir, mut storage) = open();
        let mut controller = controller(&mut storage);

        let eid = controller.create(Profile::named("one")).unwrap();
        controller.create(Profile::named("two")).unwrap();
        controller.select(eid).unwrap();

        controller.purge().unwrap();
        assert_eq!(controller.count(), 0);
        assert!(controller.selected().unwrap().is_none());
    }

    #[test]
    fn test_dump_import_roundtrip() {
        let (_dir, mut storage) = open();
        let mut controller = controller(&mut storage);

        let mut first = Profile::named("one");
        first.backend = Some("apptainer".into());
        first.libraries = vec!["/usr/lib/libmpi.so.40".into()];
        controller.create(first).unwrap();
        controller.create(Profile::named("two")).unwrap();

        let profiles = controller.all().unwrap();
        let dumped = controller.dump(&profiles).unwrap();

        // Unset scalars appear as null in the dump
        assert!(dumped.contains("\"image\": null"));

        let (_dir2, mut second_storage) = open();
        let mut importer = ProfileController::new(&mut second_storage);
        importer.import(&dumped).unwrap();

        let originals: Vec<Profile> =
            profiles.into_iter().map(|(_, profile)| profile).collect();
        let imported: Vec<Profile> = importer
            .all()
            .unwrap()
            .into_iter()
            .map(|(_, profile)| profile)
            .collect();
        assert_eq!(originals, imported);
    }
}
