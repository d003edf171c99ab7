//! Single-file JSON corpus.
//!
//! The file holds the records as a JSON array in insertion order. Every
//! mutation rewrites the whole file through a sibling temp file and a
//! rename, so readers never observe a partial write. A corrupt file is
//! moved aside to `<name>.corrupt-<timestamp>` on reset.

use crate::StoreError;
use checkface_core::{BackendError, CorpusBackend, IdentityKey, IdentityRecord};
use chrono::Utc;
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub struct JsonCorpusFile {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonCorpusFile {
    /// Use `path` as the corpus file. A missing file is an empty corpus.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name: OsString = self.path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    }

    fn write(&self, records: &[IdentityRecord]) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(records)?;
        let tmp = self.sibling(".tmp");

        let mut file = fs::File::create(&tmp)?;
        file.write_all(&json)?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        tracing::debug!(path = %self.path.display(), records = records.len(), "corpus file written");
        Ok(())
    }

    /// Read, edit and rewrite the file under the write lock.
    fn modify(&self, edit: impl FnOnce(&mut Vec<IdentityRecord>)) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut records = self.read()?;
        edit(&mut records);
        self.write(&records)
    }

    fn set_aside(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        if !self.path.exists() {
            return Ok(());
        }
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3f");
        let aside = self.sibling(&format!(".corrupt-{stamp}"));
        fs::rename(&self.path, &aside)?;
        tracing::warn!(path = %self.path.display(), moved_to = %aside.display(), "corrupt corpus file set aside");
        Ok(())
    }
}

impl CorpusBackend for JsonCorpusFile {
    fn load(&self) -> Result<Vec<IdentityRecord>, BackendError> {
        self.read().map_err(StoreError::into_load_error)
    }

    fn upsert(&self, record: &IdentityRecord) -> Result<(), BackendError> {
        self.modify(|records| {
            match records.iter_mut().find(|r| r.identity_key == record.identity_key) {
                Some(existing) => *existing = record.clone(),
                None => records.push(record.clone()),
            }
        })
        .map_err(StoreError::into_write_error)
    }

    fn remove(&self, key: &IdentityKey) -> Result<(), BackendError> {
        self.modify(|records| records.retain(|r| &r.identity_key != key))
            .map_err(StoreError::into_write_error)
    }

    fn rename(&self, old: &IdentityKey, new: &IdentityKey) -> Result<(), BackendError> {
        self.modify(|records| {
            if let Some(r) = records.iter_mut().find(|r| &r.identity_key == old) {
                r.identity_key = new.clone();
            }
        })
        .map_err(StoreError::into_write_error)
    }

    fn reset(&self) -> Result<(), BackendError> {
        self.set_aside().map_err(StoreError::into_write_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkface_core::EnrollmentCorpus;

    fn key(s: &str) -> IdentityKey {
        IdentityKey::parse(s).unwrap()
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = JsonCorpusFile::open(dir.path().join("corpus.json")).unwrap();
        assert!(file.load().unwrap().is_empty());
    }

    #[test]
    fn test_mutations_persist_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.json");
        {
            let corpus = EnrollmentCorpus::load(Box::new(JsonCorpusFile::open(&path).unwrap()));
            corpus
                .upsert(IdentityRecord::new(key("alice"), vec![1.0, 0.0], 3, 0.1))
                .unwrap();
            corpus
                .upsert(IdentityRecord::new(key("bob"), vec![0.0, 1.0], 2, 0.2))
                .unwrap();
            corpus
                .upsert(IdentityRecord::new(key("alice"), vec![0.6, 0.8], 5, 0.1))
                .unwrap();
            corpus.rename(&key("bob"), &key("robert")).unwrap();
        }

        let file = JsonCorpusFile::open(&path).unwrap();
        let loaded = file.load().unwrap();
        let names: Vec<&str> = loaded.iter().map(|r| r.identity_key.as_str()).collect();
        assert_eq!(names, ["alice", "robert"]);
        assert_eq!(loaded[0].sample_count, 5);
        assert_eq!(loaded[0].representative, vec![0.6, 0.8]);
        assert!(!dir.path().join("corpus.json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_loads_as_empty_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.json");
        fs::write(&path, b"{ not json").unwrap();

        let file = JsonCorpusFile::open(&path).unwrap();
        assert!(matches!(file.load(), Err(BackendError::Corrupt(_))));
        assert!(EnrollmentCorpus::load(Box::new(file)).is_empty());
    }

    #[test]
    fn test_corrupt_file_set_aside_and_repopulated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.json");
        fs::write(&path, b"{ not json").unwrap();

        let corpus = EnrollmentCorpus::load(Box::new(JsonCorpusFile::open(&path).unwrap()));
        corpus
            .upsert(IdentityRecord::new(key("alice"), vec![1.0, 0.0], 3, 0.1))
            .unwrap();
        drop(corpus);

        let reopened = EnrollmentCorpus::load(Box::new(JsonCorpusFile::open(&path).unwrap()));
        assert_eq!(reopened.keys(), [key("alice")]);

        let aside: Vec<PathBuf> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.to_string_lossy().contains("corpus.json.corrupt-"))
            .collect();
        assert_eq!(aside.len(), 1);
        assert_eq!(fs::read(&aside[0]).unwrap(), b"{ not json");
    }

    #[test]
    fn test_invalid_key_in_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.json");
        let good = IdentityRecord::new(key("alice"), vec![1.0, 0.0], 1, 0.0);
        let json = serde_json::to_string(&vec![good])
            .unwrap()
            .replace("\"alice\"", "\"../alice\"");
        fs::write(&path, json).unwrap();

        let file = JsonCorpusFile::open(&path).unwrap();
        assert!(matches!(file.load(), Err(BackendError::Corrupt(_))));
    }
}
