//! Collaborator seams: face detection, embedding extraction, corpus
//! persistence and enrollment sample storage.
//!
//! All collaborators are shared between recognition and retraining, so
//! implementations must be `Send + Sync`; ONNX-backed ones guard their
//! sessions internally.

use crate::types::{BoundingBox, Embedding, IdentityKey, IdentityRecord};
use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detection inference failed: {0}")]
    InferenceFailed(String),
    #[error("invalid detector input: {0}")]
    InvalidInput(String),
}

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("embedding extraction failed: {0}")]
    ExtractionFailed(String),
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("corpus store unavailable: {0}")]
    Unavailable(String),
    #[error("corpus store corrupt: {0}")]
    Corrupt(String),
    #[error("corpus store write failed: {0}")]
    WriteFailed(String),
}

#[derive(Error, Debug)]
pub enum SampleStoreError {
    #[error("no samples stored for identity {0}")]
    IdentityNotFound(String),
    #[error("samples already stored for identity {0}")]
    IdentityAlreadyExists(String),
    #[error("sample {sample} not found for identity {identity}")]
    SampleNotFound { identity: String, sample: String },
    #[error("sample store I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Locates faces in an image. An empty result is not an error.
pub trait FaceDetector: Send + Sync {
    /// Detected faces, highest confidence first.
    fn detect(&self, image: &DynamicImage) -> Result<Vec<BoundingBox>, DetectorError>;
}

/// Turns a cropped face image into an embedding (not necessarily normalized).
pub trait EmbeddingExtractor: Send + Sync {
    fn embed(&self, face: &DynamicImage) -> Result<Embedding, ExtractionError>;
}

/// Durable storage behind the enrollment corpus.
///
/// Each method is one atomic single-key change; `load` returns records in
/// insertion order.
pub trait CorpusBackend: Send + Sync {
    fn load(&self) -> Result<Vec<IdentityRecord>, BackendError>;
    /// Insert at the end, or replace in place keeping the key's position.
    fn upsert(&self, record: &IdentityRecord) -> Result<(), BackendError>;
    fn remove(&self, key: &IdentityKey) -> Result<(), BackendError>;
    /// Move `old` to `new`, keeping its position.
    fn rename(&self, old: &IdentityKey, new: &IdentityKey) -> Result<(), BackendError>;
    /// Discard every stored record so writes start from an empty store.
    /// Unreadable data is set aside rather than deleted where the backend can.
    fn reset(&self) -> Result<(), BackendError>;
}

/// Identity-keyed blob store for raw enrollment images and their face crops.
///
/// Sample ids are opaque strings chosen by the caller; a crop shares the id
/// of the raw image it was cut from.
pub trait SampleStore: Send + Sync {
    /// Identities that have at least one raw sample, sorted.
    fn identities(&self) -> Result<Vec<IdentityKey>, SampleStoreError>;

    /// Store a raw image; storing an existing id overwrites it.
    fn store_raw(&self, key: &IdentityKey, id: &str, bytes: &[u8]) -> Result<(), SampleStoreError>;
    /// Raw sample ids, sorted. Empty if the identity is unknown.
    fn list_raw(&self, key: &IdentityKey) -> Result<Vec<String>, SampleStoreError>;
    fn read_raw(&self, key: &IdentityKey, id: &str) -> Result<Vec<u8>, SampleStoreError>;

    fn store_cropped(&self, key: &IdentityKey, id: &str, bytes: &[u8]) -> Result<(), SampleStoreError>;
    /// Cropped sample ids, sorted. Empty if the identity is unknown.
    fn list_cropped(&self, key: &IdentityKey) -> Result<Vec<String>, SampleStoreError>;
    fn read_cropped(&self, key: &IdentityKey, id: &str) -> Result<Vec<u8>, SampleStoreError>;
    fn clear_cropped(&self, key: &IdentityKey) -> Result<(), SampleStoreError>;

    /// Discard raw and cropped samples. No-op if the identity is unknown.
    fn remove_identity(&self, key: &IdentityKey) -> Result<(), SampleStoreError>;
    /// Relocate raw and cropped samples from `old` to `new`.
    ///
    /// Fails with `IdentityAlreadyExists` if `new` already has samples.
    fn rename_identity(&self, old: &IdentityKey, new: &IdentityKey) -> Result<(), SampleStoreError>;
}
