//! Enrollment corpus: the single shared mutable state between retraining
//! and recognition.
//!
//! The visible state is an immutable [`CorpusState`] behind an `Arc`.
//! Readers clone the `Arc` ([`EnrollmentCorpus::snapshot`]) and never see a
//! half-applied change. Writers are serialized, write the change through the
//! backend first, then swap in the next state in one step. A failed backend
//! write leaves both the durable and the visible state untouched.

use crate::memory::MemoryCorpusBackend;
use crate::traits::{BackendError, CorpusBackend};
use crate::types::{IdentityKey, IdentityRecord};
use crate::vector::{self, VectorError};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("identity not found: {0}")]
    IdentityNotFound(String),
    #[error("identity already exists: {0}")]
    IdentityAlreadyExists(String),
    #[error("invalid record for {identity}: {reason}")]
    InvalidRecord { identity: String, reason: String },
    #[error("representative for {identity}: {source}")]
    InvalidVector {
        identity: String,
        #[source]
        source: VectorError,
    },
    #[error("corpus unavailable: {0}")]
    CorpusUnavailable(#[source] BackendError),
    #[error("corpus backend: {0}")]
    Backend(#[from] BackendError),
}

/// Point-in-time, insertion-ordered view of the corpus.
#[derive(Debug, Clone, Default)]
pub struct CorpusState {
    records: Vec<IdentityRecord>,
}

pub type CorpusSnapshot = Arc<CorpusState>;

impl CorpusState {
    /// Build a state from records in insertion order, checking every invariant.
    pub fn from_records(records: Vec<IdentityRecord>) -> Result<Self, CorpusError> {
        let mut state = Self::default();
        for record in records {
            if state.position(&record.identity_key).is_some() {
                return Err(CorpusError::InvalidRecord {
                    identity: record.identity_key.to_string(),
                    reason: "duplicate key".into(),
                });
            }
            state.check_record(&record)?;
            state.records.push(record);
        }
        Ok(state)
    }

    pub fn records(&self) -> &[IdentityRecord] {
        &self.records
    }

    pub fn get(&self, key: &IdentityKey) -> Option<&IdentityRecord> {
        self.records.iter().find(|r| &r.identity_key == key)
    }

    pub fn contains(&self, key: &IdentityKey) -> bool {
        self.position(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &IdentityKey> {
        self.records.iter().map(|r| &r.identity_key)
    }

    /// Embedding dimension shared by all records, if any are enrolled.
    pub fn dimension(&self) -> Option<usize> {
        self.records.first().map(IdentityRecord::dimension)
    }

    fn position(&self, key: &IdentityKey) -> Option<usize> {
        self.records.iter().position(|r| &r.identity_key == key)
    }

    /// Dimension pinned by records other than `key`.
    fn dimension_excluding(&self, key: &IdentityKey) -> Option<usize> {
        self.records
            .iter()
            .find(|r| &r.identity_key != key)
            .map(IdentityRecord::dimension)
    }

    fn check_record(&self, record: &IdentityRecord) -> Result<(), CorpusError> {
        let identity = || record.identity_key.to_string();

        if record.sample_count == 0 {
            return Err(CorpusError::InvalidRecord {
                identity: identity(),
                reason: "sample_count must be at least 1".into(),
            });
        }
        vector::validate(
            &record.representative,
            self.dimension_excluding(&record.identity_key),
        )
        .map_err(|source| CorpusError::InvalidVector {
            identity: identity(),
            source,
        })?;
        if !vector::is_unit(&record.representative) {
            return Err(CorpusError::InvalidRecord {
                identity: identity(),
                reason: format!(
                    "representative is not unit-norm (norm {})",
                    vector::l2_norm(&record.representative)
                ),
            });
        }
        Ok(())
    }

    fn with_upsert(&self, record: IdentityRecord) -> Self {
        let mut records = self.records.clone();
        match self.position(&record.identity_key) {
            Some(idx) => records[idx] = record,
            None => records.push(record),
        }
        Self { records }
    }

    fn without(&self, idx: usize) -> Self {
        let mut records = self.records.clone();
        records.remove(idx);
        Self { records }
    }

    fn with_renamed(&self, idx: usize, new: &IdentityKey) -> Self {
        let mut records = self.records.clone();
        records[idx].identity_key = new.clone();
        Self { records }
    }
}

/// Shared, persisted mapping from identity key to [`IdentityRecord`].
pub struct EnrollmentCorpus {
    state: RwLock<CorpusSnapshot>,
    /// Serializes writers so that backend order matches visible order.
    writer: Mutex<()>,
    backend: Box<dyn CorpusBackend>,
}

impl EnrollmentCorpus {
    /// Recover the corpus from `backend`, propagating failure.
    pub fn try_load(backend: Box<dyn CorpusBackend>) -> Result<Self, CorpusError> {
        let records = backend.load().map_err(CorpusError::CorpusUnavailable)?;
        let state = CorpusState::from_records(records).map_err(|e| {
            CorpusError::CorpusUnavailable(BackendError::Corrupt(e.to_string()))
        })?;
        Ok(Self::with_state(state, backend))
    }

    /// Recover the corpus from `backend`; a missing or corrupt store yields an
    /// empty corpus (every classification is `Unknown` until retrained).
    ///
    /// A corrupt store is reset so that retraining can repopulate it.
    pub fn load(backend: Box<dyn CorpusBackend>) -> Self {
        let records = match backend.load() {
            Ok(records) => records,
            Err(BackendError::Corrupt(reason)) => {
                tracing::warn!(%reason, "corpus store corrupt; starting empty");
                return Self::empty_after_reset(backend);
            }
            Err(e) => {
                tracing::warn!(error = %e, "corpus unavailable; starting empty");
                return Self::with_state(CorpusState::default(), backend);
            }
        };
        match CorpusState::from_records(records) {
            Ok(state) => {
                tracing::info!(identities = state.len(), "corpus loaded");
                Self::with_state(state, backend)
            }
            Err(e) => {
                tracing::warn!(error = %e, "corpus store holds invalid records; starting empty");
                Self::empty_after_reset(backend)
            }
        }
    }

    fn empty_after_reset(backend: Box<dyn CorpusBackend>) -> Self {
        match backend.reset() {
            Ok(()) => tracing::info!("corrupt corpus store reset"),
            Err(e) => tracing::error!(error = %e, "failed to reset corrupt corpus store"),
        }
        Self::with_state(CorpusState::default(), backend)
    }

    /// Empty corpus backed by memory only.
    pub fn in_memory() -> Self {
        Self::with_state(CorpusState::default(), Box::new(MemoryCorpusBackend::new()))
    }

    fn with_state(state: CorpusState, backend: Box<dyn CorpusBackend>) -> Self {
        Self {
            state: RwLock::new(Arc::new(state)),
            writer: Mutex::new(()),
            backend,
        }
    }

    /// Consistent point-in-time view. Never blocks on a retrain beyond one commit.
    pub fn snapshot(&self) -> CorpusSnapshot {
        Arc::clone(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn get(&self, key: &IdentityKey) -> Option<IdentityRecord> {
        self.snapshot().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.snapshot().dimension()
    }

    /// Identity keys in insertion order.
    pub fn keys(&self) -> Vec<IdentityKey> {
        self.snapshot().keys().cloned().collect()
    }

    /// Replace or insert the record under its key. A replaced record keeps
    /// its insertion position.
    pub fn upsert(&self, record: IdentityRecord) -> Result<(), CorpusError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot();
        current.check_record(&record)?;

        self.backend.upsert(&record)?;
        tracing::debug!(
            identity = %record.identity_key,
            samples = record.sample_count,
            "corpus upsert committed"
        );
        self.publish(current.with_upsert(record));
        Ok(())
    }

    /// Remove the record; returns whether one was present.
    pub fn remove(&self, key: &IdentityKey) -> Result<bool, CorpusError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot();
        let Some(idx) = current.position(key) else {
            return Ok(false);
        };

        self.backend.remove(key)?;
        tracing::debug!(identity = %key, "corpus remove committed");
        self.publish(current.without(idx));
        Ok(true)
    }

    /// Move the record under `old` to `new`, keeping its position.
    pub fn rename(&self, old: &IdentityKey, new: &IdentityKey) -> Result<(), CorpusError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot();
        let idx = current
            .position(old)
            .ok_or_else(|| CorpusError::IdentityNotFound(old.to_string()))?;
        if old == new {
            return Ok(());
        }
        if current.contains(new) {
            return Err(CorpusError::IdentityAlreadyExists(new.to_string()));
        }

        self.backend.rename(old, new)?;
        tracing::debug!(from = %old, to = %new, "corpus rename committed");
        self.publish(current.with_renamed(idx, new));
        Ok(())
    }

    fn publish(&self, next: CorpusState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::normalize;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn key(s: &str) -> IdentityKey {
        IdentityKey::parse(s).unwrap()
    }

    fn record(name: &str, v: &[f32], samples: usize) -> IdentityRecord {
        IdentityRecord::new(key(name), normalize(v), samples, 0.1)
    }

    /// Backend whose writes can be made to fail.
    struct FlakyBackend {
        inner: MemoryCorpusBackend,
        fail: Arc<AtomicBool>,
    }

    impl CorpusBackend for FlakyBackend {
        fn load(&self) -> Result<Vec<IdentityRecord>, BackendError> {
            self.inner.load()
        }
        fn upsert(&self, record: &IdentityRecord) -> Result<(), BackendError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(BackendError::WriteFailed("disk full".into()));
            }
            self.inner.upsert(record)
        }
        fn remove(&self, key: &IdentityKey) -> Result<(), BackendError> {
            self.inner.remove(key)
        }
        fn rename(&self, old: &IdentityKey, new: &IdentityKey) -> Result<(), BackendError> {
            self.inner.rename(old, new)
        }
        fn reset(&self) -> Result<(), BackendError> {
            self.inner.reset()
        }
    }

    struct BrokenBackend;

    impl CorpusBackend for BrokenBackend {
        fn load(&self) -> Result<Vec<IdentityRecord>, BackendError> {
            Err(BackendError::Corrupt("bad header".into()))
        }
        fn upsert(&self, _: &IdentityRecord) -> Result<(), BackendError> {
            Err(BackendError::Unavailable("broken".into()))
        }
        fn remove(&self, _: &IdentityKey) -> Result<(), BackendError> {
            Err(BackendError::Unavailable("broken".into()))
        }
        fn rename(&self, _: &IdentityKey, _: &IdentityKey) -> Result<(), BackendError> {
            Err(BackendError::Unavailable("broken".into()))
        }
        fn reset(&self) -> Result<(), BackendError> {
            Err(BackendError::Unavailable("broken".into()))
        }
    }

    #[test]
    fn test_upsert_insert_and_replace_keeps_order() {
        let corpus = EnrollmentCorpus::in_memory();
        corpus.upsert(record("alice", &[1.0, 0.0], 3)).unwrap();
        corpus.upsert(record("bob", &[0.0, 1.0], 2)).unwrap();
        corpus.upsert(record("alice", &[1.0, 1.0], 7)).unwrap();

        let snap = corpus.snapshot();
        let keys: Vec<&str> = snap.keys().map(IdentityKey::as_str).collect();
        assert_eq!(keys, ["alice", "bob"]);
        assert_eq!(snap.get(&key("alice")).unwrap().sample_count, 7);
    }

    #[test]
    fn test_upsert_rejects_invalid_records() {
        let corpus = EnrollmentCorpus::in_memory();
        let zero = IdentityRecord::new(key("a"), normalize(&[1.0, 0.0]), 0, 0.0);
        assert!(matches!(corpus.upsert(zero), Err(CorpusError::InvalidRecord { .. })));

        let not_unit = IdentityRecord::new(key("a"), vec![2.0, 0.0], 1, 0.0);
        assert!(matches!(corpus.upsert(not_unit), Err(CorpusError::InvalidRecord { .. })));

        corpus.upsert(record("a", &[1.0, 0.0], 1)).unwrap();
        let wrong_dim = record("b", &[1.0, 0.0, 0.0], 1);
        assert!(matches!(
            corpus.upsert(wrong_dim),
            Err(CorpusError::InvalidVector {
                source: VectorError::DimensionMismatch { expected: 2, actual: 3 },
                ..
            })
        ));
        assert_eq!(corpus.len(), 1);
    }

    #[test]
    fn test_remove_is_noop_when_absent() {
        let corpus = EnrollmentCorpus::in_memory();
        assert!(!corpus.remove(&key("ghost")).unwrap());
        corpus.upsert(record("alice", &[1.0, 0.0], 1)).unwrap();
        assert!(corpus.remove(&key("alice")).unwrap());
        assert!(corpus.is_empty());
    }

    #[test]
    fn test_rename_moves_record_in_place() {
        let corpus = EnrollmentCorpus::in_memory();
        corpus.upsert(record("carol", &[1.0, 0.0], 4)).unwrap();
        corpus.upsert(record("dave", &[0.0, 1.0], 4)).unwrap();
        corpus.rename(&key("carol"), &key("carolina")).unwrap();

        let snap = corpus.snapshot();
        let keys: Vec<&str> = snap.keys().map(IdentityKey::as_str).collect();
        assert_eq!(keys, ["carolina", "dave"]);
        assert_eq!(snap.records()[0].identity_key, key("carolina"));
        assert_eq!(corpus.keys(), [key("carolina"), key("dave")]);
    }

    #[test]
    fn test_rename_missing_source() {
        let corpus = EnrollmentCorpus::in_memory();
        assert!(matches!(
            corpus.rename(&key("nobody"), &key("someone")),
            Err(CorpusError::IdentityNotFound(_))
        ));
    }

    #[test]
    fn test_rename_onto_existing_fails_and_keeps_original() {
        let corpus = EnrollmentCorpus::in_memory();
        corpus.upsert(record("carol", &[1.0, 0.0], 4)).unwrap();
        corpus.upsert(record("carolina", &[0.0, 1.0], 2)).unwrap();
        let before = corpus.get(&key("carol")).unwrap();

        assert!(matches!(
            corpus.rename(&key("carol"), &key("carolina")),
            Err(CorpusError::IdentityAlreadyExists(_))
        ));
        assert_eq!(corpus.get(&key("carol")).unwrap(), before);
        assert_eq!(corpus.get(&key("carolina")).unwrap().sample_count, 2);
    }

    #[test]
    fn test_rename_to_self_is_noop() {
        let corpus = EnrollmentCorpus::in_memory();
        corpus.upsert(record("carol", &[1.0, 0.0], 4)).unwrap();
        corpus.rename(&key("carol"), &key("Carol")).unwrap();
        assert!(corpus.get(&key("carol")).is_some());
    }

    #[test]
    fn test_failed_write_leaves_state_untouched() {
        let fail = Arc::new(AtomicBool::new(false));
        let corpus = EnrollmentCorpus::load(Box::new(FlakyBackend {
            inner: MemoryCorpusBackend::new(),
            fail: Arc::clone(&fail),
        }));
        corpus.upsert(record("alice", &[1.0, 0.0], 3)).unwrap();

        fail.store(true, Ordering::SeqCst);
        let err = corpus.upsert(record("alice", &[0.0, 1.0], 9)).unwrap_err();
        assert!(matches!(err, CorpusError::Backend(BackendError::WriteFailed(_))));
        assert_eq!(corpus.get(&key("alice")).unwrap().sample_count, 3);

        let err = corpus.upsert(record("bob", &[0.0, 1.0], 1)).unwrap_err();
        assert!(matches!(err, CorpusError::Backend(_)));
        assert_eq!(corpus.len(), 1);
    }

    #[test]
    fn test_snapshot_is_point_in_time() {
        let corpus = EnrollmentCorpus::in_memory();
        corpus.upsert(record("alice", &[1.0, 0.0], 1)).unwrap();
        let snap = corpus.snapshot();
        corpus.upsert(record("bob", &[0.0, 1.0], 1)).unwrap();
        corpus.remove(&key("alice")).unwrap();

        assert_eq!(snap.len(), 1);
        assert!(snap.contains(&key("alice")));
        assert_eq!(corpus.len(), 1);
    }

    #[test]
    fn test_load_broken_backend_starts_empty() {
        let corpus = EnrollmentCorpus::load(Box::new(BrokenBackend));
        assert!(corpus.is_empty());
        assert!(matches!(
            EnrollmentCorpus::try_load(Box::new(BrokenBackend)),
            Err(CorpusError::CorpusUnavailable(BackendError::Corrupt(_)))
        ));
    }

    #[test]
    fn test_load_rejects_corrupt_records() {
        let backend = MemoryCorpusBackend::new();
        backend
            .upsert(&IdentityRecord::new(key("bad"), vec![3.0, 0.0], 1, 0.0))
            .unwrap();
        let corpus = EnrollmentCorpus::load(Box::new(backend.clone()));
        assert!(corpus.is_empty());
        assert!(backend.load().unwrap().is_empty());

        corpus.upsert(record("alice", &[1.0, 0.0, 0.0], 2)).unwrap();
        let reloaded = EnrollmentCorpus::load(Box::new(backend));
        assert_eq!(reloaded.keys(), [key("alice")]);
    }

    #[test]
    fn test_concurrent_readers_see_whole_records() {
        let corpus = Arc::new(EnrollmentCorpus::in_memory());
        corpus.upsert(record("alice", &[1.0, 0.0, 0.0], 1)).unwrap();

        let writer = {
            let corpus = Arc::clone(&corpus);
            std::thread::spawn(move || {
                for i in 2..200usize {
                    let v = if i % 2 == 0 { [1.0, 0.0, 0.0] } else { [0.0, 1.0, 0.0] };
                    corpus.upsert(record("alice", &v, i)).unwrap();
                }
            })
        };

        for _ in 0..500 {
            let snap = corpus.snapshot();
            let r = snap.get(&key("alice")).unwrap();
            // Vector and count always come from the same write.
            let expect_x = r.sample_count % 2 == 0;
            assert_eq!(r.representative[0] > 0.5, expect_x || r.sample_count == 1);
        }
        writer.join().unwrap();
    }
}
