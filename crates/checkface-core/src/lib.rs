//! checkface-core: Identity matching and enrollment engine.
//!
//! Distills a robust representative vector per enrolled identity from its
//! enrollment embeddings, and classifies probe embeddings against those
//! centroids with a calibrated reject threshold. Face detection and
//! embedding extraction are supplied by the caller through [`traits`].

pub mod centroid;
pub mod classifier;
pub mod corpus;
pub mod crop;
pub mod engine;
pub mod memory;
pub mod pipeline;
pub mod traits;
pub mod types;
pub mod vector;

#[cfg(test)]
mod testing;

pub use centroid::{CentroidConfig, CentroidEstimate, CentroidError, RobustCentroidEstimator};
pub use classifier::{Classification, ClassifierConfig, ClassifyError, Identity, IdentityClassifier};
pub use corpus::{CorpusError, CorpusSnapshot, CorpusState, EnrollmentCorpus};
pub use engine::{Engine, EngineError, FaceOutcome, IdentitySummary, RecognizedFace};
pub use memory::{MemoryCorpusBackend, MemorySampleStore};
pub use pipeline::{RetrainOutcome, RetrainReport, RetrainSummary, RetrainingPipeline};
pub use traits::{
    BackendError, CorpusBackend, DetectorError, EmbeddingExtractor, ExtractionError, FaceDetector,
    SampleStore, SampleStoreError,
};
pub use types::{BoundingBox, Embedding, IdentityKey, IdentityRecord, KeyError};
