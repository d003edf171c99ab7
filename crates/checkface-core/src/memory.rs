//! In-memory corpus backend and sample store, for tests and ephemeral runs.

use crate::traits::{BackendError, CorpusBackend, SampleStore, SampleStoreError};
use crate::types::{IdentityKey, IdentityRecord};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Corpus backend backed by an ordered `Vec`. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryCorpusBackend {
    records: Arc<Mutex<Vec<IdentityRecord>>>,
}

impl MemoryCorpusBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<IdentityRecord>>, BackendError> {
        self.records
            .lock()
            .map_err(|e| BackendError::Unavailable(e.to_string()))
    }
}

impl CorpusBackend for MemoryCorpusBackend {
    fn load(&self) -> Result<Vec<IdentityRecord>, BackendError> {
        Ok(self.lock()?.clone())
    }

    fn upsert(&self, record: &IdentityRecord) -> Result<(), BackendError> {
        let mut records = self.lock()?;
        match records.iter_mut().find(|r| r.identity_key == record.identity_key) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        Ok(())
    }

    fn remove(&self, key: &IdentityKey) -> Result<(), BackendError> {
        self.lock()?.retain(|r| &r.identity_key != key);
        Ok(())
    }

    fn rename(&self, old: &IdentityKey, new: &IdentityKey) -> Result<(), BackendError> {
        let mut records = self.lock()?;
        if let Some(r) = records.iter_mut().find(|r| &r.identity_key == old) {
            r.identity_key = new.clone();
        }
        Ok(())
    }

    fn reset(&self) -> Result<(), BackendError> {
        self.lock()?.clear();
        Ok(())
    }
}

#[derive(Default)]
struct IdentitySamples {
    raw: BTreeMap<String, Vec<u8>>,
    cropped: BTreeMap<String, Vec<u8>>,
}

/// Sample store backed by nested `BTreeMap`s. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemorySampleStore {
    samples: Arc<Mutex<BTreeMap<IdentityKey, IdentitySamples>>>,
}

impl MemorySampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<IdentityKey, IdentitySamples>>, SampleStoreError> {
        self.samples
            .lock()
            .map_err(|e| SampleStoreError::Io(std::io::Error::other(e.to_string())))
    }
}

fn not_found(key: &IdentityKey, id: &str) -> SampleStoreError {
    SampleStoreError::SampleNotFound {
        identity: key.to_string(),
        sample: id.to_string(),
    }
}

impl SampleStore for MemorySampleStore {
    fn identities(&self) -> Result<Vec<IdentityKey>, SampleStoreError> {
        Ok(self
            .lock()?
            .iter()
            .filter(|(_, s)| !s.raw.is_empty())
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn store_raw(&self, key: &IdentityKey, id: &str, bytes: &[u8]) -> Result<(), SampleStoreError> {
        self.lock()?
            .entry(key.clone())
            .or_default()
            .raw
            .insert(id.to_string(), bytes.to_vec());
        Ok(())
    }

    fn list_raw(&self, key: &IdentityKey) -> Result<Vec<String>, SampleStoreError> {
        Ok(self
            .lock()?
            .get(key)
            .map(|s| s.raw.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn read_raw(&self, key: &IdentityKey, id: &str) -> Result<Vec<u8>, SampleStoreError> {
        self.lock()?
            .get(key)
            .and_then(|s| s.raw.get(id).cloned())
            .ok_or_else(|| not_found(key, id))
    }

    fn store_cropped(&self, key: &IdentityKey, id: &str, bytes: &[u8]) -> Result<(), SampleStoreError> {
        self.lock()?
            .entry(key.clone())
            .or_default()
            .cropped
            .insert(id.to_string(), bytes.to_vec());
        Ok(())
    }

    fn list_cropped(&self, key: &IdentityKey) -> Result<Vec<String>, SampleStoreError> {
        Ok(self
            .lock()?
            .get(key)
            .map(|s| s.cropped.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn read_cropped(&self, key: &IdentityKey, id: &str) -> Result<Vec<u8>, SampleStoreError> {
        self.lock()?
            .get(key)
            .and_then(|s| s.cropped.get(id).cloned())
            .ok_or_else(|| not_found(key, id))
    }

    fn clear_cropped(&self, key: &IdentityKey) -> Result<(), SampleStoreError> {
        if let Some(s) = self.lock()?.get_mut(key) {
            s.cropped.clear();
        }
        Ok(())
    }

    fn remove_identity(&self, key: &IdentityKey) -> Result<(), SampleStoreError> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn rename_identity(&self, old: &IdentityKey, new: &IdentityKey) -> Result<(), SampleStoreError> {
        let mut samples = self.lock()?;
        if old == new {
            return Ok(());
        }
        if samples.get(new).is_some_and(|s| !s.raw.is_empty() || !s.cropped.is_empty()) {
            return Err(SampleStoreError::IdentityAlreadyExists(new.to_string()));
        }
        let moved = samples
            .remove(old)
            .ok_or_else(|| SampleStoreError::IdentityNotFound(old.to_string()))?;
        samples.insert(new.clone(), moved);
        Ok(())
    }
}
