//! Gallery enrollment from labeled reference images.

use crate::crop::crop_face;
use crate::engine::{EngineError, EngineHandle};
use crate::types::{Embedding, Gallery};
use image::RgbImage;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Why a reference image with a usable face still produced no entry.
#[derive(Error, Debug)]
pub enum EnrollSkip {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("detected face lies outside the image")]
    EmptyCrop,
}

/// A reference image that failed extraction.
#[derive(Debug)]
pub struct EnrollFailure {
    /// Position of the image in the batch.
    pub index: usize,
    pub label: String,
    pub error: EnrollSkip,
}

/// Result of one enrollment batch.
#[derive(Debug, Default)]
pub struct EnrollReport {
    pub gallery: Gallery,
    /// Images in which the locator found no face.
    pub no_face_count: usize,
    /// Images whose detection or extraction failed; not counted as no-face.
    pub failures: Vec<EnrollFailure>,
}

/// Builds a gallery by running the engine over reference images, one at a time.
#[derive(Clone)]
pub struct GalleryEnroller {
    engine: EngineHandle,
}

impl GalleryEnroller {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }

    /// Enroll a batch of `(label, image)` pairs.
    ///
    /// Images are processed strictly in order. Only the first detected face
    /// of each image is enrolled. Per-image failures are collected in the
    /// report; the batch aborts only if the engine thread is gone.
    pub async fn enroll(&self, images: Vec<(String, RgbImage)>) -> Result<EnrollReport, EngineError> {
        let started = Instant::now();
        let total = images.len();
        let mut report = EnrollReport::default();

        for (index, (label, image)) in images.into_iter().enumerate() {
            match self.enroll_one(image).await {
                Ok(Some(embedding)) => {
                    tracing::debug!(index, label = %label, "enrolled reference");
                    report.gallery.push(label, embedding);
                }
                Ok(None) => {
                    tracing::debug!(index, label = %label, "no face in reference image");
                    report.no_face_count += 1;
                }
                Err(EnrollSkip::Engine(EngineError::ChannelClosed)) => {
                    return Err(EngineError::ChannelClosed);
                }
                Err(error) => {
                    tracing::warn!(index, label = %label, error = %error, "reference image skipped");
                    report.failures.push(EnrollFailure { index, label, error });
                }
            }
        }

        tracing::info!(
            images = total,
            enrolled = report.gallery.len(),
            no_face = report.no_face_count,
            failed = report.failures.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "enrollment complete"
        );

        Ok(report)
    }

    async fn enroll_one(&self, image: RgbImage) -> Result<Option<Embedding>, EnrollSkip> {
        let image = Arc::new(image);
        let faces = self.engine.locate(Arc::clone(&image)).await?;
        let Some(face) = faces.first() else {
            return Ok(None);
        };

        let crop = crop_face(&image, face).ok_or(EnrollSkip::EmptyCrop)?;
        let embedding = self.engine.embed(crop).await?;
        Ok(Some(embedding))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_engine;
    use crate::testing::{
        embed_error_image, face_image, locate_error_image, model, no_face_image, two_faces_image,
        FakeEmbedder, FakeLocator,
    };

    fn enroller() -> GalleryEnroller {
        let engine = spawn_engine(FakeLocator::new(), FakeEmbedder::new(model(10.0, 0.4))).unwrap();
        GalleryEnroller::new(engine)
    }

    fn batch(images: Vec<(&str, RgbImage)>) -> Vec<(String, RgbImage)> {
        images.into_iter().map(|(l, i)| (l.to_string(), i)).collect()
    }

    #[tokio::test]
    async fn test_enroll_counts_faceless_images() {
        let report = enroller()
            .enroll(batch(vec![
                ("alice", face_image([10, 10, 10])),
                ("alice", no_face_image()),
                ("bob", face_image([50, 50, 50])),
                ("carol", no_face_image()),
                ("dave", face_image([90, 90, 90])),
            ]))
            .await
            .unwrap();

        assert_eq!(report.gallery.len(), 3);
        assert_eq!(report.no_face_count, 2);
        assert!(report.failures.is_empty());

        let labels: Vec<&str> = report.gallery.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["alice", "bob", "dave"]);
        assert_eq!(report.gallery.iter().nth(1).unwrap().embedding.values(), &[50.0, 50.0, 50.0]);
    }

    #[tokio::test]
    async fn test_enroll_takes_first_face_only() {
        let report = enroller()
            .enroll(batch(vec![("group", two_faces_image([7, 7, 7]))]))
            .await
            .unwrap();

        assert_eq!(report.gallery.len(), 1);
        assert_eq!(report.no_face_count, 0);
    }

    #[tokio::test]
    async fn test_enroll_reports_failures_separately() {
        let report = enroller()
            .enroll(batch(vec![
                ("alice", face_image([10, 10, 10])),
                ("broken", locate_error_image()),
                ("blurry", embed_error_image()),
                ("empty", no_face_image()),
            ]))
            .await
            .unwrap();

        assert_eq!(report.gallery.len(), 1);
        assert_eq!(report.no_face_count, 1);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].index, 1);
        assert_eq!(report.failures[0].label, "broken");
        assert!(matches!(
            report.failures[0].error,
            EnrollSkip::Engine(EngineError::Detector(_))
        ));
        assert!(matches!(
            report.failures[1].error,
            EnrollSkip::Engine(EngineError::Embedder(_))
        ));
    }

    #[tokio::test]
    async fn test_enroll_empty_batch() {
        let report = enroller().enroll(Vec::new()).await.unwrap();
        assert!(report.gallery.is_empty());
        assert_eq!(report.no_face_count, 0);
    }

    #[tokio::test]
    async fn test_enroller_is_reusable() {
        let enroller = enroller();
        let first = enroller
            .enroll(batch(vec![("a", no_face_image()), ("b", face_image([1, 1, 1]))]))
            .await
            .unwrap();
        let second = enroller
            .enroll(batch(vec![("c", face_image([2, 2, 2]))]))
            .await
            .unwrap();

        assert_eq!((first.gallery.len(), first.no_face_count), (1, 1));
        assert_eq!((second.gallery.len(), second.no_face_count), (1, 0));
    }

    #[tokio::test]
    async fn test_enroll_aborts_when_engine_dies() {
        let engine = spawn_engine(
            FakeLocator::new().panicking(),
            FakeEmbedder::new(model(10.0, 0.4)),
        )
        .unwrap();
        let result = GalleryEnroller::new(engine)
            .enroll(batch(vec![("a", face_image([1, 1, 1]))]))
            .await;
        assert!(matches!(result, Err(EngineError::ChannelClosed)));
    }
}
