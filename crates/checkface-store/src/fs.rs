//! Filesystem sample store.
//!
//! Layout under the root directory:
//!
//! ```text
//! raw/<identity>/<sample-id>
//! cropped/<identity>/<sample-id>.png
//! ```

use checkface_core::{IdentityKey, SampleStore, SampleStoreError};
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

const RAW_DIR: &str = "raw";
const CROPPED_DIR: &str = "cropped";
const CROP_EXTENSION: &str = "png";

pub struct FsSampleStore {
    root: PathBuf,
}

impl FsSampleStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, SampleStoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(RAW_DIR))?;
        fs::create_dir_all(root.join(CROPPED_DIR))?;
        tracing::debug!(root = %root.display(), "opened sample store");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn raw_dir(&self, key: &IdentityKey) -> PathBuf {
        self.root.join(RAW_DIR).join(key.as_str())
    }

    fn cropped_dir(&self, key: &IdentityKey) -> PathBuf {
        self.root.join(CROPPED_DIR).join(key.as_str())
    }

    fn raw_path(&self, key: &IdentityKey, id: &str) -> Result<PathBuf, SampleStoreError> {
        check_sample_id(id)?;
        Ok(self.raw_dir(key).join(id))
    }

    fn cropped_path(&self, key: &IdentityKey, id: &str) -> Result<PathBuf, SampleStoreError> {
        check_sample_id(id)?;
        Ok(self.cropped_dir(key).join(format!("{id}.{CROP_EXTENSION}")))
    }
}

/// Sample ids become file names; they must be a single plain path component.
fn check_sample_id(id: &str) -> Result<(), SampleStoreError> {
    let valid = !id.is_empty()
        && id != "."
        && id != ".."
        && !id.chars().any(|c| c == '/' || c == '\\' || c.is_control());
    if valid {
        Ok(())
    } else {
        Err(io::Error::new(ErrorKind::InvalidInput, format!("invalid sample id {id:?}")).into())
    }
}

/// Sorted file names in `dir`; a missing directory has none.
fn file_names(dir: &Path) -> io::Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

fn write_file(dir: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    fs::write(path, bytes)
}

fn read_sample(path: &Path, key: &IdentityKey, id: &str) -> Result<Vec<u8>, SampleStoreError> {
    fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => SampleStoreError::SampleNotFound {
            identity: key.to_string(),
            sample: id.to_string(),
        },
        _ => e.into(),
    })
}

fn remove_dir_if_exists(dir: &Path) -> io::Result<()> {
    match fs::remove_dir_all(dir) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn has_files(dir: &Path) -> io::Result<bool> {
    Ok(!file_names(dir)?.is_empty())
}

impl SampleStore for FsSampleStore {
    fn identities(&self) -> Result<Vec<IdentityKey>, SampleStoreError> {
        let raw_root = self.root.join(RAW_DIR);
        let mut keys = Vec::new();

        for entry in fs::read_dir(&raw_root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            match IdentityKey::parse(name) {
                Ok(key) if key.as_str() == name => {
                    if has_files(&entry.path())? {
                        keys.push(key);
                    }
                }
                _ => {
                    tracing::warn!(dir = %entry.path().display(), "ignoring sample directory with non-canonical identity name");
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    fn store_raw(&self, key: &IdentityKey, id: &str, bytes: &[u8]) -> Result<(), SampleStoreError> {
        let path = self.raw_path(key, id)?;
        write_file(&self.raw_dir(key), &path, bytes)?;
        Ok(())
    }

    fn list_raw(&self, key: &IdentityKey) -> Result<Vec<String>, SampleStoreError> {
        Ok(file_names(&self.raw_dir(key))?)
    }

    fn read_raw(&self, key: &IdentityKey, id: &str) -> Result<Vec<u8>, SampleStoreError> {
        read_sample(&self.raw_path(key, id)?, key, id)
    }

    fn store_cropped(&self, key: &IdentityKey, id: &str, bytes: &[u8]) -> Result<(), SampleStoreError> {
        let path = self.cropped_path(key, id)?;
        write_file(&self.cropped_dir(key), &path, bytes)?;
        Ok(())
    }

    fn list_cropped(&self, key: &IdentityKey) -> Result<Vec<String>, SampleStoreError> {
        let suffix = format!(".{CROP_EXTENSION}");
        Ok(file_names(&self.cropped_dir(key))?
            .into_iter()
            .filter_map(|name| name.strip_suffix(&suffix).map(str::to_string))
            .collect())
    }

    fn read_cropped(&self, key: &IdentityKey, id: &str) -> Result<Vec<u8>, SampleStoreError> {
        read_sample(&self.cropped_path(key, id)?, key, id)
    }

    fn clear_cropped(&self, key: &IdentityKey) -> Result<(), SampleStoreError> {
        remove_dir_if_exists(&self.cropped_dir(key))?;
        Ok(())
    }

    fn remove_identity(&self, key: &IdentityKey) -> Result<(), SampleStoreError> {
        remove_dir_if_exists(&self.raw_dir(key))?;
        remove_dir_if_exists(&self.cropped_dir(key))?;
        Ok(())
    }

    fn rename_identity(&self, old: &IdentityKey, new: &IdentityKey) -> Result<(), SampleStoreError> {
        if old == new {
            return Ok(());
        }
        let (old_raw, old_cropped) = (self.raw_dir(old), self.cropped_dir(old));
        let (new_raw, new_cropped) = (self.raw_dir(new), self.cropped_dir(new));

        if has_files(&new_raw)? || has_files(&new_cropped)? {
            return Err(SampleStoreError::IdentityAlreadyExists(new.to_string()));
        }
        if !old_raw.exists() && !old_cropped.exists() {
            return Err(SampleStoreError::IdentityNotFound(old.to_string()));
        }

        for (from, to) in [(&old_raw, &new_raw), (&old_cropped, &new_cropped)] {
            if from.exists() {
                remove_dir_if_exists(to)?;
                fs::rename(from, to)?;
            }
        }
        tracing::debug!(from = %old, to = %new, "sample directories moved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> IdentityKey {
        IdentityKey::parse(s).unwrap()
    }

    fn store() -> (tempfile::TempDir, FsSampleStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSampleStore::open(dir.path().join("samples")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_layout_and_roundtrip() {
        let (_dir, store) = store();
        let carol = key("Carol Jones");
        store.store_raw(&carol, "b2", b"raw two").unwrap();
        store.store_raw(&carol, "a1", b"raw one").unwrap();
        store.store_cropped(&carol, "a1", b"png").unwrap();

        assert_eq!(store.list_raw(&carol).unwrap(), ["a1", "b2"]);
        assert_eq!(store.list_cropped(&carol).unwrap(), ["a1"]);
        assert_eq!(store.read_raw(&carol, "b2").unwrap(), b"raw two");
        assert_eq!(store.read_cropped(&carol, "a1").unwrap(), b"png");
        assert!(store.root().join("raw/carol jones/a1").is_file());
        assert!(store.root().join("cropped/carol jones/a1.png").is_file());
    }

    #[test]
    fn test_missing_samples() {
        let (_dir, store) = store();
        let nobody = key("nobody");
        assert!(store.list_raw(&nobody).unwrap().is_empty());
        assert!(store.list_cropped(&nobody).unwrap().is_empty());
        assert!(matches!(
            store.read_raw(&nobody, "x"),
            Err(SampleStoreError::SampleNotFound { .. })
        ));
        store.remove_identity(&nobody).unwrap();
        store.clear_cropped(&nobody).unwrap();
    }

    #[test]
    fn test_identities_only_with_raw_samples() {
        let (_dir, store) = store();
        store.store_raw(&key("dave"), "1", b"x").unwrap();
        store.store_raw(&key("carol"), "1", b"x").unwrap();
        store.store_cropped(&key("erin"), "1", b"x").unwrap();
        fs::create_dir_all(store.root().join("raw/empty")).unwrap();
        fs::create_dir_all(store.root().join("raw/Not Canonical")).unwrap();
        fs::write(store.root().join("raw/Not Canonical/1"), b"x").unwrap();

        assert_eq!(store.identities().unwrap(), [key("carol"), key("dave")]);
    }

    #[test]
    fn test_clear_cropped_keeps_raw() {
        let (_dir, store) = store();
        let carol = key("carol");
        store.store_raw(&carol, "1", b"raw").unwrap();
        store.store_cropped(&carol, "1", b"crop").unwrap();
        store.clear_cropped(&carol).unwrap();

        assert!(store.list_cropped(&carol).unwrap().is_empty());
        assert_eq!(store.list_raw(&carol).unwrap(), ["1"]);
    }

    #[test]
    fn test_rename_moves_both_trees() {
        let (_dir, store) = store();
        store.store_raw(&key("carol"), "1", b"raw").unwrap();
        store.store_cropped(&key("carol"), "1", b"crop").unwrap();
        store.rename_identity(&key("carol"), &key("caroline")).unwrap();

        assert!(store.list_raw(&key("carol")).unwrap().is_empty());
        assert_eq!(store.read_raw(&key("caroline"), "1").unwrap(), b"raw");
        assert_eq!(store.read_cropped(&key("caroline"), "1").unwrap(), b"crop");
    }

    #[test]
    fn test_rename_conflicts_and_missing() {
        let (_dir, store) = store();
        store.store_raw(&key("carol"), "1", b"a").unwrap();
        store.store_raw(&key("carolina"), "1", b"b").unwrap();

        assert!(matches!(
            store.rename_identity(&key("carol"), &key("carolina")),
            Err(SampleStoreError::IdentityAlreadyExists(_))
        ));
        assert_eq!(store.read_raw(&key("carol"), "1").unwrap(), b"a");
        assert!(matches!(
            store.rename_identity(&key("ghost"), &key("spirit")),
            Err(SampleStoreError::IdentityNotFound(_))
        ));
    }

    #[test]
    fn test_rejects_path_like_sample_ids() {
        let (_dir, store) = store();
        for id in ["", ".", "..", "a/b", "a\\b"] {
            assert!(matches!(
                store.store_raw(&key("carol"), id, b"x"),
                Err(SampleStoreError::Io(_))
            ));
        }
    }
}
