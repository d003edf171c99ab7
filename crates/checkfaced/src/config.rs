use anyhow::{bail, Result};
use checkface_core::{CentroidConfig, ClassifierConfig, RobustCentroidEstimator};
use checkface_models::{DETECTOR_MODEL_FILE, EXTRACTOR_MODEL_FILE};
use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Root for all daemon state.
    pub data_dir: PathBuf,
    /// Corpus location; a `.json` extension selects the JSON corpus file.
    pub corpus_path: PathBuf,
    /// Root of the raw/cropped enrollment image tree.
    pub samples_dir: PathBuf,
    /// Cosine distance at or beyond which a probe is `Unknown`.
    pub reject_distance: f32,
    /// Multiplier in the display similarity `100 - distance * scale`.
    pub similarity_scale: f32,
    /// Z-score cutoff for centroid outlier trimming.
    pub outlier_z: f32,
    /// Minimum detector score for a face.
    pub detector_confidence: f32,
    /// Serve on the session bus instead of the system bus.
    pub session_bus: bool,
}

impl Config {
    /// Load configuration from `CHECKFACE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = var("CHECKFACE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                var("XDG_DATA_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| {
                        let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                        PathBuf::from(home).join(".local/share")
                    })
                    .join("checkface")
            });

        let parse_f32 = |key: &str, default: f32| {
            var(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
        };
        let classifier = ClassifierConfig::default();
        let centroid = CentroidConfig::default();

        Self {
            model_dir: var("CHECKFACE_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("models")),
            corpus_path: var("CHECKFACE_CORPUS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("corpus.db")),
            samples_dir: var("CHECKFACE_SAMPLES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("samples")),
            reject_distance: parse_f32("CHECKFACE_REJECT_DISTANCE", classifier.reject_distance),
            similarity_scale: parse_f32("CHECKFACE_SIMILARITY_SCALE", classifier.similarity_scale),
            outlier_z: parse_f32("CHECKFACE_OUTLIER_Z", centroid.outlier_z),
            detector_confidence: parse_f32("CHECKFACE_DETECTOR_CONFIDENCE", 0.5),
            session_bus: var("CHECKFACE_SESSION_BUS").is_some_and(|v| v != "0"),
            data_dir,
        }
    }

    /// Reject values that would make matching meaningless.
    pub fn validate(&self) -> Result<()> {
        if !(self.reject_distance > 0.0 && self.reject_distance <= 2.0) {
            bail!("CHECKFACE_REJECT_DISTANCE must be in (0, 2], got {}", self.reject_distance);
        }
        if !(self.similarity_scale.is_finite() && self.similarity_scale > 0.0) {
            bail!("CHECKFACE_SIMILARITY_SCALE must be positive, got {}", self.similarity_scale);
        }
        if !(self.outlier_z.is_finite() && self.outlier_z > 0.0) {
            bail!("CHECKFACE_OUTLIER_Z must be positive, got {}", self.outlier_z);
        }
        if !(0.0..1.0).contains(&self.detector_confidence) {
            bail!("CHECKFACE_DETECTOR_CONFIDENCE must be in [0, 1), got {}", self.detector_confidence);
        }
        Ok(())
    }

    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(DETECTOR_MODEL_FILE)
    }

    pub fn extractor_model_path(&self) -> PathBuf {
        self.model_dir.join(EXTRACTOR_MODEL_FILE)
    }

    pub fn classifier_config(&self) -> ClassifierConfig {
        ClassifierConfig {
            reject_distance: self.reject_distance,
            similarity_scale: self.similarity_scale,
        }
    }

    pub fn estimator(&self) -> RobustCentroidEstimator {
        RobustCentroidEstimator::new(CentroidConfig {
            outlier_z: self.outlier_z,
            ..CentroidConfig::default()
        })
    }
}
