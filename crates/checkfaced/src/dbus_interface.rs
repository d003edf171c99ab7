use crate::config::Config;
use checkface_core::{CorpusError, Engine, EngineError, IdentityKey};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use zbus::{fdo, interface};

/// Well-known bus name claimed by the daemon.
pub const BUS_NAME: &str = "org.checkface.Attendance1";
/// Object path the attendance interface is served at.
pub const OBJECT_PATH: &str = "/org/checkface/Attendance1";

/// D-Bus interface for the CheckFace attendance daemon.
///
/// Bus name: org.checkface.Attendance1
/// Object path: /org/checkface/Attendance1
///
/// Structured results are returned as JSON strings. Engine work is blocking
/// and runs on the tokio blocking pool.
pub struct AttendanceService {
    engine: Arc<Engine>,
    corpus_path: PathBuf,
    samples_dir: PathBuf,
}

impl AttendanceService {
    pub fn new(engine: Arc<Engine>, config: &Config) -> Self {
        Self {
            engine,
            corpus_path: config.corpus_path.clone(),
            samples_dir: config.samples_dir.clone(),
        }
    }

    async fn blocking<T, F>(&self, work: F) -> fdo::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Engine) -> Result<T, EngineError> + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || work(&engine))
            .await
            .map_err(|e| fdo::Error::Failed(format!("spawn_blocking failed: {e}")))?
            .map_err(engine_error)
    }
}

#[interface(name = "org.checkface.Attendance1")]
impl AttendanceService {
    /// Detect and classify every face in the image at `image_path`.
    async fn recognize(&self, image_path: &str) -> fdo::Result<String> {
        tracing::info!(image_path, "recognize requested");
        let bytes = read_image(image_path).await?;
        let faces = self.blocking(move |engine| engine.recognize_bytes(&bytes)).await?;
        to_json(&faces)
    }

    /// Store enrollment images for `identity` and retrain it.
    async fn enroll(&self, identity: &str, image_paths: Vec<String>) -> fdo::Result<String> {
        let key = parse_key(identity)?;
        tracing::info!(identity = %key, images = image_paths.len(), "enroll requested");
        if image_paths.is_empty() {
            return Err(fdo::Error::InvalidArgs("no images given".into()));
        }
        let images = read_images(&image_paths).await?;
        let report = self
            .blocking(move |engine| engine.add_images(&key, &images))
            .await?;
        to_json(&report)
    }

    /// Rebuild one identity's representative from its stored samples.
    async fn retrain(&self, identity: &str, force: bool) -> fdo::Result<String> {
        let key = parse_key(identity)?;
        tracing::info!(identity = %key, force, "retrain requested");
        let report = self.blocking(move |engine| engine.retrain(&key, force)).await?;
        to_json(&report)
    }

    /// Rebuild every identity that has stored samples.
    async fn retrain_all(&self, force: bool) -> fdo::Result<String> {
        tracing::info!(force, "retrain_all requested");
        let summary = self.blocking(move |engine| engine.retrain_all(force)).await?;
        to_json(&summary)
    }

    async fn remove_identity(&self, identity: &str) -> fdo::Result<bool> {
        let key = parse_key(identity)?;
        tracing::info!(identity = %key, "remove_identity requested");
        self.blocking(move |engine| engine.remove_identity(&key)).await
    }

    /// Rename `old` to `new`, then enroll any extra images under `new`.
    async fn rename_identity(
        &self,
        old: &str,
        new: &str,
        image_paths: Vec<String>,
    ) -> fdo::Result<String> {
        let (old, new) = (parse_key(old)?, parse_key(new)?);
        tracing::info!(from = %old, to = %new, images = image_paths.len(), "rename_identity requested");
        let images = read_images(&image_paths).await?;
        let report = self
            .blocking(move |engine| engine.rename_identity(&old, &new, &images))
            .await?;
        to_json(&report)
    }

    async fn list_identities(&self) -> fdo::Result<String> {
        to_json(&self.engine.list_identities())
    }

    /// Return daemon status information.
    async fn status(&self) -> fdo::Result<String> {
        let corpus = self.engine.corpus().snapshot();
        let classifier = self.engine.classifier_config();
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "identities": corpus.len(),
            "dimension": corpus.dimension(),
            "reject_distance": classifier.reject_distance,
            "similarity_scale": classifier.similarity_scale,
            "corpus_path": self.corpus_path.display().to_string(),
            "samples_dir": self.samples_dir.display().to_string(),
        })
        .to_string())
    }
}

fn parse_key(raw: &str) -> fdo::Result<IdentityKey> {
    IdentityKey::parse(raw).map_err(|e| fdo::Error::InvalidArgs(format!("{raw:?}: {e}")))
}

async fn read_image(path: &str) -> fdo::Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => fdo::Error::FileNotFound(path.to_string()),
        _ => fdo::Error::IOError(format!("{path}: {e}")),
    })
}

async fn read_images(paths: &[String]) -> fdo::Result<Vec<Vec<u8>>> {
    let mut images = Vec::with_capacity(paths.len());
    for path in paths {
        images.push(read_image(path).await?);
    }
    Ok(images)
}

fn to_json<T: Serialize>(value: &T) -> fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| fdo::Error::Failed(format!("serialize result: {e}")))
}

fn engine_error(e: EngineError) -> fdo::Error {
    tracing::warn!(error = %e, "request failed");
    match e {
        EngineError::Decode(_) => fdo::Error::InvalidArgs(e.to_string()),
        EngineError::Corpus(CorpusError::IdentityNotFound(_))
        | EngineError::Corpus(CorpusError::IdentityAlreadyExists(_)) => {
            fdo::Error::InvalidArgs(e.to_string())
        }
        other => fdo::Error::Failed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_normalizes() {
        assert_eq!(parse_key("  Carol   JONES ").unwrap().as_str(), "carol jones");
        assert!(matches!(parse_key("../x"), Err(fdo::Error::InvalidArgs(_))));
        assert!(matches!(parse_key("   "), Err(fdo::Error::InvalidArgs(_))));
    }

    #[test]
    fn test_engine_error_mapping() {
        let not_found = EngineError::Corpus(CorpusError::IdentityNotFound("carol".into()));
        assert!(matches!(engine_error(not_found), fdo::Error::InvalidArgs(_)));

        let exists = EngineError::Corpus(CorpusError::IdentityAlreadyExists("carolina".into()));
        match engine_error(exists) {
            fdo::Error::InvalidArgs(msg) => assert!(msg.contains("carolina")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_read_image_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.jpg");
        let err = read_image(path.to_str().unwrap()).await.unwrap_err();
        assert!(matches!(err, fdo::Error::FileNotFound(_)));
    }

    #[tokio::test]
    async fn test_read_images_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for (i, body) in [b"one".as_slice(), b"two".as_slice()].iter().enumerate() {
            let path = dir.path().join(format!("{i}.jpg"));
            std::fs::write(&path, body).unwrap();
            paths.push(path.display().to_string());
        }
        assert_eq!(read_images(&paths).await.unwrap(), vec![b"one".to_vec(), b"two".to_vec()]);
    }
}
