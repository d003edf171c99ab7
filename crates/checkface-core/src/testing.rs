//! Scripted detector/extractor doubles driven by image color.
//!
//! Test images are solid-color PNGs. The detector finds no face in black
//! images; the extractor fails on pure green, returns a NaN embedding for
//! pure magenta and otherwise embeds the image's mean color, so color
//! clusters become embedding clusters.

use crate::memory::MemorySampleStore;
use crate::traits::{
    DetectorError, EmbeddingExtractor, ExtractionError, FaceDetector, SampleStore, SampleStoreError,
};
use crate::types::{BoundingBox, Embedding, IdentityKey};
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use std::sync::atomic::{AtomicBool, Ordering};

pub const NO_FACE: [u8; 3] = [0, 0, 0];
pub const UNEMBEDDABLE: [u8; 3] = [0, 255, 0];
pub const NAN_EMBEDDING: [u8; 3] = [255, 0, 255];

pub fn solid_png(rgb: [u8; 3]) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, Rgb(rgb)));
    crate::crop::encode_png(&img).unwrap()
}

fn mean_rgb(image: &DynamicImage) -> [f32; 3] {
    let rgb = image.to_rgb8();
    let n = (rgb.width() * rgb.height()) as f32;
    let mut sum = [0.0f32; 3];
    for p in rgb.pixels() {
        for c in 0..3 {
            sum[c] += p.0[c] as f32;
        }
    }
    [sum[0] / n, sum[1] / n, sum[2] / n]
}

pub struct ColorDetector;

impl FaceDetector for ColorDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if mean_rgb(image) == [0.0, 0.0, 0.0] {
            return Ok(Vec::new());
        }
        let (w, h) = image.dimensions();
        Ok(vec![BoundingBox {
            x: 0.0,
            y: 0.0,
            width: w as f32,
            height: h as f32,
            confidence: 0.9,
        }])
    }
}

pub struct ColorExtractor;

impl EmbeddingExtractor for ColorExtractor {
    fn embed(&self, face: &DynamicImage) -> Result<Embedding, ExtractionError> {
        let [r, g, b] = mean_rgb(face);
        if [r, g, b] == [0.0, 255.0, 0.0] {
            return Err(ExtractionError::ExtractionFailed("model rejected crop".into()));
        }
        if [r, g, b] == [255.0, 0.0, 255.0] {
            return Ok(Embedding::new(vec![f32::NAN, g, b]));
        }
        Ok(Embedding {
            values: vec![r, g, b],
            model_version: Some("color-v1".into()),
        })
    }
}

fn injected(what: &str) -> SampleStoreError {
    SampleStoreError::Io(std::io::Error::other(format!("injected {what} failure")))
}

/// Memory sample store that fails reads of one raw sample id, and
/// optionally every `remove_identity`.
#[derive(Default)]
pub struct FlakySampleStore {
    pub inner: MemorySampleStore,
    pub unreadable_raw: Option<&'static str>,
    pub fail_remove: AtomicBool,
}

impl SampleStore for FlakySampleStore {
    fn identities(&self) -> Result<Vec<IdentityKey>, SampleStoreError> {
        self.inner.identities()
    }
    fn store_raw(&self, key: &IdentityKey, id: &str, bytes: &[u8]) -> Result<(), SampleStoreError> {
        self.inner.store_raw(key, id, bytes)
    }
    fn list_raw(&self, key: &IdentityKey) -> Result<Vec<String>, SampleStoreError> {
        self.inner.list_raw(key)
    }
    fn read_raw(&self, key: &IdentityKey, id: &str) -> Result<Vec<u8>, SampleStoreError> {
        if self.unreadable_raw == Some(id) {
            return Err(injected("read"));
        }
        self.inner.read_raw(key, id)
    }
    fn store_cropped(&self, key: &IdentityKey, id: &str, bytes: &[u8]) -> Result<(), SampleStoreError> {
        self.inner.store_cropped(key, id, bytes)
    }
    fn list_cropped(&self, key: &IdentityKey) -> Result<Vec<String>, SampleStoreError> {
        self.inner.list_cropped(key)
    }
    fn read_cropped(&self, key: &IdentityKey, id: &str) -> Result<Vec<u8>, SampleStoreError> {
        self.inner.read_cropped(key, id)
    }
    fn clear_cropped(&self, key: &IdentityKey) -> Result<(), SampleStoreError> {
        self.inner.clear_cropped(key)
    }
    fn remove_identity(&self, key: &IdentityKey) -> Result<(), SampleStoreError> {
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(injected("remove"));
        }
        self.inner.remove_identity(key)
    }
    fn rename_identity(&self, old: &IdentityKey, new: &IdentityKey) -> Result<(), SampleStoreError> {
        self.inner.rename_identity(old, new)
    }
}
