use anyhow::{Context, Result};
use checkface_core::{Engine, EnrollmentCorpus};
use checkface_models::{ArcFaceExtractor, YoloFaceDetector};
use checkface_store::FsSampleStore;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;

use config::Config;
use dbus_interface::{AttendanceService, BUS_NAME, OBJECT_PATH};

/// Open the stores and load both models. Missing models are fatal.
fn build_engine(config: &Config) -> Result<Engine> {
    let detector = YoloFaceDetector::load(&config.detector_model_path(), config.detector_confidence)
        .context("failed to load face detector")?;
    let extractor = ArcFaceExtractor::load(&config.extractor_model_path())
        .context("failed to load embedding extractor")?;

    let backend = checkface_store::open_corpus_backend(&config.corpus_path)
        .with_context(|| format!("failed to open corpus at {}", config.corpus_path.display()))?;
    let corpus = EnrollmentCorpus::load(backend);
    let samples = FsSampleStore::open(&config.samples_dir)
        .with_context(|| format!("failed to open sample store at {}", config.samples_dir.display()))?;

    tracing::info!(
        identities = corpus.len(),
        dimension = ?corpus.dimension(),
        corpus = %config.corpus_path.display(),
        samples = %config.samples_dir.display(),
        "enrollment corpus loaded"
    );

    Ok(Engine::new(
        Arc::new(detector),
        Arc::new(extractor),
        Arc::new(samples),
        Arc::new(corpus),
        config.classifier_config(),
        config.estimator(),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("checkfaced starting");

    let config = Config::from_env();
    config.validate()?;
    tracing::info!(
        model_dir = %config.model_dir.display(),
        reject_distance = config.reject_distance,
        similarity_scale = config.similarity_scale,
        "configuration loaded"
    );

    let engine = Arc::new(build_engine(&config)?);
    let service = AttendanceService::new(engine, &config);

    let builder = if config.session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .with_context(|| format!("failed to claim {BUS_NAME}"))?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, session_bus = config.session_bus, "checkfaced ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("checkfaced shutting down");

    Ok(())
}
