//! Persistent, transactional record storage.
//!
//! Each storage scope owns a single JSON document of the form
//! `{"Profile": {"<eid>": {...}}, "selected_profile": <eid>}`. Mutations
//! happen inside transactions that snapshot the document on entry and
//! restore it when the outermost transaction fails; the file is written
//! only on a clean outermost commit. Opening falls back to read-only when
//! the backing file cannot be written, in which case any mutation fails.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};

/// Record identifier within a scope.
pub type Eid = u64;

/// Storage scopes, in lookup priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum StorageScope {
    #[default]
    User,
    System,
}

impl StorageScope {
    /// Path of the scope's backing file.
    ///
    /// `E4S_CL_USER_PREFIX` / `E4S_CL_SYSTEM_PREFIX` override the
    /// defaults, which follow the platform data directory for the user
    /// scope and `/usr/share/e4s-cl` for the system one.
    pub fn database_path(&self) -> PathBuf {
        match self {
            StorageScope::User => {
                let prefix = crate::util::get_env("user_prefix")
                    .map(PathBuf::from)
                    .or_else(|| {
                        directories::ProjectDirs::from("", "", "e4s-cl")
                            .map(|dirs| dirs.data_dir().to_path_buf())
                    })
                    .unwrap_or_else(|| PathBuf::from(".e4s-cl"));
                prefix.join("user.json")
            }
            StorageScope::System => {
                let prefix = crate::util::get_env("system_prefix")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/usr/share/e4s-cl"));
                prefix.join("system.json")
            }
        }
    }
}

/// The on-disk document. Unknown keys are kept so a newer layout does not
/// get destroyed by an older binary, and logged once on load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Document {
    #[serde(rename = "Profile", default)]
    records: BTreeMap<Eid, serde_json::Value>,

    #[serde(rename = "selected_profile", skip_serializing_if = "Option::is_none")]
    selected: Option<Eid>,

    #[serde(flatten)]
    deprecated: BTreeMap<String, serde_json::Value>,
}

/// A single-scope record store.
pub struct Storage {
    path: PathBuf,
    readonly: bool,
    document: Document,
    transaction_depth: usize,
    snapshot: Option<Document>,
}

impl Storage {
    /// Open a storage scope, creating the backing directory when absent.
    pub fn open(scope: StorageScope) -> Result<Self> {
        Self::open_path(&scope.database_path())
    }

    /// Open a storage file directly.
    pub fn open_path(path: &Path) -> Result<Self> {
        let document = match std::fs::read_to_string(path) {
            Ok(content) if !content.trim().is_empty() => serde_json::from_str(&content)
                .map_err(|err| Error::Storage(format!("corrupt database {}: {err}", path.display())))?,
            _ => Document::default(),
        };

        for key in document.deprecated.keys() {
            debug!("Ignoring deprecated key '{key}' in {}", path.display());
        }

        let readonly = {
            if let Some(parent) = path.parent() {
                if !parent.exists() {
                    std::fs::create_dir_all(parent).is_err()
                } else if path.exists() {
                    std::fs::OpenOptions::new().append(true).open(path).is_err()
                } else {
                    // Probe the directory for write access
                    let probe = parent.join(".e4s-cl-write-test");
                    match std::fs::write(&probe, b"") {
                        Ok(()) => {
                            let _ = std::fs::remove_file(&probe);
                            false
                        }
                        Err(_) => true,
                    }
                }
            } else {
                true
            }
        };

        if readonly {
            debug!("'{}' opened read-only", path.display());
        } else {
            debug!("'{}' opened read-write", path.display());
        }

        Ok(Self {
            path: path.to_path_buf(),
            readonly,
            document,
            transaction_depth: 0,
            snapshot: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(Error::StorageReadOnly(self.path.clone()));
        }
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        self.ensure_writable()?;
        let content = serde_json::to_string_pretty(&self.document)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    /// Run `operation` inside a transaction.
    ///
    /// Nested calls refcount; only the outermost commits to disk. An
    /// error in the outermost transaction restores the document to the
    /// snapshot taken at entry.
    pub fn transaction<T>(
        &mut self,
        operation: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        if self.transaction_depth == 0 {
            self.ensure_writable()?;
            self.snapshot = Some(self.document.clone());
        }
        self.transaction_depth += 1;

        let outcome = operation(self);

        self.transaction_depth -= 1;
        if self.transaction_depth == 0 {
            match &outcome {
                Ok(_) => {
                    self.snapshot = None;
                    self.persist()?;
                }
                Err(_) => {
                    if let Some(snapshot) = self.snapshot.take() {
                        self.document = snapshot;
                    }
                }
            }
        }

        outcome
    }

    // ---- record table ----

    pub fn get(&self, eid: Eid) -> Option<&serde_json::Value> {
        self.document.records.get(&eid)
    }

    pub fn all(&self) -> impl Iterator<Item = (Eid, &serde_json::Value)> {
        self.document.records.iter().map(|(eid, value)| (*eid, value))
    }

    pub fn count(&self) -> usize {
        self.document.records.len()
    }

    pub fn insert(&mut self, value: serde_json::Value) -> Result<Eid> {
        self.ensure_writable()?;
        let eid = self
            .document
            .records
            .keys()
            .max()
            .map(|max| max + 1)
            .unwrap_or(1);
        self.document.records.insert(eid, value);
        Ok(eid)
    }

    pub fn update(&mut self, eid: Eid, value: serde_json::Value) -> Result<()> {
        self.ensure_writable()?;
        match self.document.records.get_mut(&eid) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(Error::Storage(format!("no record with eid {eid}"))),
        }
    }

    pub fn remove(&mut self, eid: Eid) -> Result<()> {
        self.ensure_writable()?;
        self.document.records.remove(&eid);
        if self.document.selected == Some(eid) {
            self.document.selected = None;
        }
        Ok(())
    }

    pub fn purge(&mut self) -> Result<()> {
        self.ensure_writable()?;
        self.document.records.clear();
        self.document.selected = None;
        Ok(())
    }

    // ---- selection pointer ----

    pub fn selected_eid(&self) -> Option<Eid> {
        // A dangling pointer counts as no selection
        self.document
            .selected
            .filter(|eid| self.document.records.contains_key(eid))
    }

    pub fn select(&mut self, eid: Eid) -> Result<()> {
        self.ensure_writable()?;
        if !self.document.records.contains_key(&eid) {
            return Err(Error::Storage(format!("no record with eid {eid}")));
        }
        self.document.selected = Some(eid);
        Ok(())
    }

    pub fn unselect(&mut self) -> Result<()> {
        self.ensure_writable()?;
        self.document.selected = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn storage() -> (tempfile::TempDir, Storage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open_path(&dir.path().join("user.json")).unwrap();
        (dir, storage)
    }

    #[test]
    fn test_insert_assigns_sequential_eids() {
        let (_dir, mut storage) = storage();
        let first = storage.insert(json!({"name": "a"})).unwrap();
        let second = storage.insert(json!({"name": "b"})).unwrap();
        assert_eq!(second, first + 1);
        assert_eq!(storage.count(), 2);
    }

    #[test]
    fn test_transaction_commit_persists() {
        let (dir, mut storage) = storage();
        storage
            .transaction(|s| s.insert(json!({"name": "kept"})).map(|_| ()))
            .unwrap();

        let reopened = Storage::open_path(&dir.path().join("user.json")).unwrap();
        assert_eq!(reopened.count(), 1);
    }

    #[test]
    fn test_transaction_rollback_restores_snapshot() {
        let (dir, mut storage) = storage();
        storage
            .transaction(|s| s.insert(json!({"name": "committed"})).map(|_| ()))
            .unwrap();

        let before = std::fs::read_to_string(dir.path().join("user.json")).unwrap();

        let result: Result<()> = storage.transaction(|s| {
            s.insert(json!({"name": "doomed"}))?;
            Err(Error::Storage("forced failure".into()))
        });
        assert!(result.is_err());
        assert_eq!(storage.count(), 1);

        // The file was never touched by the failed transaction
        let after = std::fs::read_to_string(dir.path().join("user.json")).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_nested_transactions_commit_once() {
        let (dir, mut storage) = storage();
        storage
            .transaction(|outer| {
                outer.transaction(|inner| inner.insert(json!({"name": "inner"})).map(|_| ()))?;
                // Inner commit must not have written yet; the outer exit does
                outer.insert(json!({"name": "outer"})).map(|_| ())
            })
            .unwrap();

        let reopened = Storage::open_path(&dir.path().join("user.json")).unwrap();
        assert_eq!(reopened.count(), 2);
    }

    #[test]
    fn test_inner_error_rolls_back_everything() {
        let (_dir, mut storage) = storage();
        let result: Result<()> = storage.transaction(|outer| {
            outer.insert(json!({"name": "outer"}))?;
            outer.transaction(|inner| {
                inner.insert(json!({"name": "inner"}))?;
                Err(Error::Storage("inner failure".into()))
            })
        });
        assert!(result.is_err());
        assert_eq!(storage.count(), 0);
    }

    #[test]
    fn test_selection_follows_deletion() {
        let (_dir, mut storage) = storage();
        let eid = storage.insert(json!({"name": "a"})).unwrap();
        storage.select(eid).unwrap();
        assert_eq!(storage.selected_eid(), Some(eid));

        storage.remove(eid).unwrap();
        assert_eq!(storage.selected_eid(), None);
    }

    #[test]
    fn test_select_missing_record_fails() {
        let (_dir, mut storage) = storage();
        assert!(storage.select(42).is_err());
    }

    #[test]
    fn test_readonly_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user.json");
        std::fs::write(&path, "{}").unwrap();

        let mut permissions = std::fs::metadata(&path).unwrap().permissions();
        permissions.set_readonly(true);
        std::fs::set_permissions(&path, permissions).unwrap();

        let mut storage = Storage::open_path(&path).unwrap();
        if !storage.is_readonly() {
            // Running as root bypasses permission bits; nothing to test
            return;
        }
        assert!(matches!(
            storage.insert(json!({})),
            Err(Error::StorageReadOnly(_))
        ));
    }

    #[test]
    fn test_deprecated_keys_survive_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user.json");
        std::fs::write(
            &path,
            r#"{"Profile": {}, "legacy_field": {"kept": true}}"#,
        )
        .unwrap();

        let mut storage = Storage::open_path(&path).unwrap();
        storage.transaction(|s| s.insert(json!({"name": "a"})).map(|_| ())).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("legacy_field"));
    }
}
