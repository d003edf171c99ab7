//! checkface-store: durable backends for the enrollment corpus and samples.
//!
//! The corpus lives in SQLite by default, or in a single JSON file when the
//! configured path ends in `.json`. Enrollment images and their face crops
//! live in a plain directory tree.

pub mod fs;
pub mod json;
pub mod sqlite;

pub use fs::FsSampleStore;
pub use json::JsonCorpusFile;
pub use sqlite::SqliteCorpusStore;

use checkface_core::{BackendError, CorpusBackend};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid stored value: {0}")]
    InvalidValue(String),
    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// Classify a failure hit while reading the whole corpus.
    fn into_load_error(self) -> BackendError {
        match self {
            StoreError::Json(_)
            | StoreError::InvalidValue(_)
            | StoreError::Sqlite(
                rusqlite::Error::InvalidColumnType(..)
                | rusqlite::Error::FromSqlConversionFailure(..)
                | rusqlite::Error::IntegralValueOutOfRange(..),
            ) => BackendError::Corrupt(self.to_string()),
            other => BackendError::Unavailable(other.to_string()),
        }
    }

    fn into_write_error(self) -> BackendError {
        BackendError::WriteFailed(self.to_string())
    }
}

/// Open the corpus backend for `path`: a JSON file for `*.json`, SQLite
/// otherwise. Parent directories are created as needed.
pub fn open_corpus_backend(path: &Path) -> Result<Box<dyn CorpusBackend>, StoreError> {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        tracing::info!(path = %path.display(), "using JSON corpus file");
        Ok(Box::new(JsonCorpusFile::open(path)?))
    } else {
        tracing::info!(path = %path.display(), "using SQLite corpus store");
        Ok(Box::new(SqliteCorpusStore::open(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkface_core::{IdentityKey, IdentityRecord};

    #[test]
    fn test_open_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let record = IdentityRecord::new(IdentityKey::parse("carol").unwrap(), vec![1.0, 0.0], 2, 0.1);

        for name in ["corpus.json", "nested/corpus.db"] {
            let path = dir.path().join(name);
            let backend = open_corpus_backend(&path).unwrap();
            backend.upsert(&record).unwrap();
            assert_eq!(backend.load().unwrap(), vec![record.clone()]);
        }

        let json = std::fs::read_to_string(dir.path().join("corpus.json")).unwrap();
        assert!(json.contains("\"carol\""));
        assert!(dir.path().join("nested/corpus.db").exists());
    }

    #[test]
    fn test_load_error_classification() {
        assert!(matches!(
            StoreError::InvalidValue("x".into()).into_load_error(),
            BackendError::Corrupt(_)
        ));
        assert!(matches!(
            StoreError::Sqlite(rusqlite::Error::IntegralValueOutOfRange(2, -1)).into_load_error(),
            BackendError::Corrupt(_)
        ));
        assert!(matches!(
            StoreError::Poisoned.into_load_error(),
            BackendError::Unavailable(_)
        ));
    }
}
