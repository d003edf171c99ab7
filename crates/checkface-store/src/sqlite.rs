//! SQLite corpus store.
//!
//! One row per identity. Representatives are stored as little-endian `f32`
//! BLOBs; a `position` column keeps insertion order across replaces and
//! renames. Every mutation is a single statement, so each is atomic.
//! Reset copies the rows into an `identities_corrupt_<timestamp>` table
//! before emptying `identities`.

use crate::StoreError;
use checkface_core::{BackendError, CorpusBackend, IdentityKey, IdentityRecord};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS identities (
    key TEXT PRIMARY KEY NOT NULL,
    position INTEGER NOT NULL,
    representative BLOB NOT NULL,
    sample_count INTEGER NOT NULL CHECK(sample_count >= 1),
    intra_cohesion REAL NOT NULL,
    model_version TEXT,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_identities_position ON identities(position);
";

pub struct SqliteCorpusStore {
    conn: Mutex<Connection>,
}

impl SqliteCorpusStore {
    /// Open or create the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        tracing::debug!(path = %path.display(), "opened corpus database");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn load_records(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT key, representative, sample_count, intra_cohesion, model_version, updated_at
             FROM identities
             ORDER BY position",
        )?;
        let rows = stmt.query_map([], decode_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row??);
        }
        Ok(records)
    }

    fn upsert_record(&self, record: &IdentityRecord) -> Result<(), StoreError> {
        let sample_count = i64::try_from(record.sample_count)
            .map_err(|_| StoreError::InvalidValue(format!("sample_count {}", record.sample_count)))?;

        self.conn()?.execute(
            "INSERT INTO identities (
                key, position, representative, sample_count, intra_cohesion,
                model_version, updated_at
             ) VALUES (
                ?1, (SELECT COALESCE(MAX(position), -1) + 1 FROM identities),
                ?2, ?3, ?4, ?5, ?6
             )
             ON CONFLICT(key) DO UPDATE SET
                representative = excluded.representative,
                sample_count = excluded.sample_count,
                intra_cohesion = excluded.intra_cohesion,
                model_version = excluded.model_version,
                updated_at = excluded.updated_at",
            params![
                record.identity_key.as_str(),
                encode_vector(&record.representative),
                sample_count,
                f64::from(record.intra_cohesion),
                record.model_version,
                record.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn remove_record(&self, key: &IdentityKey) -> Result<(), StoreError> {
        self.conn()?
            .execute("DELETE FROM identities WHERE key = ?1", params![key.as_str()])?;
        Ok(())
    }

    fn rename_record(&self, old: &IdentityKey, new: &IdentityKey) -> Result<(), StoreError> {
        self.conn()?.execute(
            "UPDATE identities SET key = ?2 WHERE key = ?1",
            params![old.as_str(), new.as_str()],
        )?;
        Ok(())
    }

    fn quarantine_rows(&self) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let table = format!("identities_corrupt_{}", Utc::now().format("%Y%m%d%H%M%S%3f"));
        let tx = conn.transaction()?;
        tx.execute_batch(&format!(
            "CREATE TABLE {table} AS SELECT * FROM identities;
             DELETE FROM identities;"
        ))?;
        tx.commit()?;
        tracing::warn!(table = %table, "corrupt corpus rows set aside");
        Ok(())
    }
}

impl CorpusBackend for SqliteCorpusStore {
    fn load(&self) -> Result<Vec<IdentityRecord>, BackendError> {
        self.load_records().map_err(StoreError::into_load_error)
    }

    fn upsert(&self, record: &IdentityRecord) -> Result<(), BackendError> {
        self.upsert_record(record).map_err(StoreError::into_write_error)
    }

    fn remove(&self, key: &IdentityKey) -> Result<(), BackendError> {
        self.remove_record(key).map_err(StoreError::into_write_error)
    }

    fn rename(&self, old: &IdentityKey, new: &IdentityKey) -> Result<(), BackendError> {
        self.rename_record(old, new).map_err(StoreError::into_write_error)
    }

    fn reset(&self) -> Result<(), BackendError> {
        self.quarantine_rows().map_err(StoreError::into_write_error)
    }
}

/// Row decoding keeps SQLite errors and value errors apart so a malformed
/// row reports as corruption rather than an unavailable store.
fn decode_row(row: &Row<'_>) -> rusqlite::Result<Result<IdentityRecord, StoreError>> {
    let key: String = row.get(0)?;
    let blob: Vec<u8> = row.get(1)?;
    let sample_count: i64 = row.get(2)?;
    let intra_cohesion: f64 = row.get(3)?;
    let model_version: Option<String> = row.get(4)?;
    let updated_at: String = row.get(5)?;

    Ok(build_record(
        &key,
        &blob,
        sample_count,
        intra_cohesion,
        model_version,
        &updated_at,
    ))
}

fn build_record(
    key: &str,
    blob: &[u8],
    sample_count: i64,
    intra_cohesion: f64,
    model_version: Option<String>,
    updated_at: &str,
) -> Result<IdentityRecord, StoreError> {
    let identity_key = IdentityKey::parse(key)
        .map_err(|e| StoreError::InvalidValue(format!("identity key {key:?}: {e}")))?;
    let representative = decode_vector(blob)
        .ok_or_else(|| StoreError::InvalidValue(format!("{key}: representative blob of {} bytes", blob.len())))?;
    let sample_count = usize::try_from(sample_count)
        .map_err(|_| StoreError::InvalidValue(format!("{key}: sample_count {sample_count}")))?;
    let updated_at = DateTime::parse_from_rfc3339(updated_at)
        .map_err(|e| StoreError::InvalidValue(format!("{key}: updated_at: {e}")))?
        .with_timezone(&Utc);

    Ok(IdentityRecord {
        identity_key,
        representative,
        sample_count,
        intra_cohesion: intra_cohesion as f32,
        model_version,
        updated_at,
    })
}

fn encode_vector(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * std::mem::size_of::<f32>());
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_vector(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.is_empty() || blob.len() % std::mem::size_of::<f32>() != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}
