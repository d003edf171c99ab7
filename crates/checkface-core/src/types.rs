use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Bounding box for a detected face, in source-image pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// Face embedding as produced by an extractor (typically 512-dimensional for ArcFace).
///
/// Values are not assumed to be normalized; the engine normalizes before any
/// distance computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values, model_version: None }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }
}

impl AsRef<[f32]> for Embedding {
    fn as_ref(&self) -> &[f32] {
        &self.values
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("identity key is empty")]
    Empty,
    #[error("identity key contains invalid character {0:?}")]
    InvalidCharacter(char),
    #[error("identity key {0:?} is reserved")]
    Reserved(String),
}

/// Normalized identity key: trimmed, inner whitespace collapsed, lowercased.
///
/// Keys also name per-identity sample locations, so path separators,
/// control characters and `.`/`..` are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn parse(raw: &str) -> Result<Self, KeyError> {
        let normalized = raw
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();

        if normalized.is_empty() {
            return Err(KeyError::Empty);
        }
        if normalized == "." || normalized == ".." {
            return Err(KeyError::Reserved(normalized));
        }
        if let Some(c) = normalized
            .chars()
            .find(|c| *c == '/' || *c == '\\' || c.is_control())
        {
            return Err(KeyError::InvalidCharacter(c));
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for IdentityKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<IdentityKey> for String {
    fn from(key: IdentityKey) -> Self {
        key.0
    }
}

impl std::str::FromStr for IdentityKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Enrolled identity as held by the corpus.
///
/// Always replaced wholesale by a retrain; never edited field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub identity_key: IdentityKey,
    /// L2-normalized centroid of the identity's enrollment embeddings.
    pub representative: Vec<f32>,
    pub sample_count: usize,
    /// Mean pairwise cosine distance among the raw samples. Diagnostic only.
    pub intra_cohesion: f32,
    pub model_version: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl IdentityRecord {
    pub fn new(
        identity_key: IdentityKey,
        representative: Vec<f32>,
        sample_count: usize,
        intra_cohesion: f32,
    ) -> Self {
        Self {
            identity_key,
            representative,
            sample_count,
            intra_cohesion,
            model_version: None,
            updated_at: Utc::now(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.representative.len()
    }
}
