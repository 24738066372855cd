//! One engine shared by enrollment and live matching.

use crate::engine::{spawn_engine, EngineError};
use crate::enroll::{EnrollReport, GalleryEnroller};
use crate::provider::{EmbeddingProvider, FaceLocator};
use crate::scorer::{Metric, SimilarityScorer};
use crate::stream::{FrameOutcome, StreamMatcher};
use crate::types::{Gallery, ModelInfo, RecognitionState};
use image::RgbImage;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Pipeline settings that are not part of the model preset.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineConfig {
    pub metric: Metric,
    /// Upper bound on one frame's processing; `None` waits indefinitely.
    pub frame_timeout: Option<Duration>,
}

/// Recognition pipeline: enroll a gallery, then feed it frames.
#[derive(Clone)]
pub struct Pipeline {
    model: ModelInfo,
    enroller: GalleryEnroller,
    matcher: StreamMatcher,
}

impl Pipeline {
    /// Spawn the engine over the given models.
    ///
    /// The active preset is the embedder's; its threshold for `config.metric`
    /// drives every decision.
    pub fn new<L, E>(locator: L, embedder: E, config: PipelineConfig) -> Result<Self, EngineError>
    where
        L: FaceLocator,
        E: EmbeddingProvider,
    {
        let model = embedder.model_info();
        let scorer = SimilarityScorer::for_model(&model, config.metric);
        tracing::info!(
            model = model.name,
            metric = %config.metric,
            threshold = scorer.threshold(),
            timeout_ms = config.frame_timeout.map(|t| t.as_millis() as u64),
            "starting pipeline"
        );

        let engine = spawn_engine(locator, embedder)?;
        Ok(Self {
            model,
            enroller: GalleryEnroller::new(engine.clone()),
            matcher: StreamMatcher::new(engine, scorer, config.frame_timeout),
        })
    }

    pub fn model(&self) -> &ModelInfo {
        &self.model
    }

    /// Enroll reference images and install the resulting gallery.
    ///
    /// `on_complete` runs exactly once, after the gallery is live, with the
    /// gallery and the number of images without a detectable face.
    ///
    /// If the engine thread is gone the batch cannot finish: the error is
    /// returned, `on_complete` is not called and the installed gallery is
    /// left unchanged.
    pub async fn enroll<F>(
        &self,
        images: Vec<(String, RgbImage)>,
        on_complete: F,
    ) -> Result<EnrollReport, EngineError>
    where
        F: FnOnce(&Gallery, usize),
    {
        let report = self.enroller.enroll(images).await?;
        self.matcher.set_gallery(report.gallery.clone());
        on_complete(&report.gallery, report.no_face_count);
        Ok(report)
    }

    /// Fire-and-forget frame entry; `None` means the frame was dropped.
    pub fn on_frame(&self, frame: RgbImage) -> Option<JoinHandle<FrameOutcome>> {
        self.matcher.on_frame(frame)
    }

    pub async fn process_frame(&self, frame: RgbImage) -> FrameOutcome {
        self.matcher.process_frame(frame).await
    }

    pub fn subscribe(&self) -> watch::Receiver<RecognitionState> {
        self.matcher.subscribe()
    }

    pub fn state(&self) -> RecognitionState {
        self.matcher.state()
    }

    pub fn matcher(&self) -> &StreamMatcher {
        &self.matcher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{face_image, model, no_face_image, FakeEmbedder, FakeLocator};

    fn pipeline(metric: Metric) -> Pipeline {
        Pipeline::new(
            FakeLocator::new(),
            FakeEmbedder::new(model(10.0, 0.4)),
            PipelineConfig {
                metric,
                frame_timeout: None,
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_enroll_then_recognize() {
        let pipeline = pipeline(Metric::L2);
        let mut completions = Vec::new();

        let report = pipeline
            .enroll(
                vec![
                    ("alice".to_string(), face_image([10, 10, 10])),
                    ("alice".to_string(), no_face_image()),
                    ("bob".to_string(), face_image([100, 100, 100])),
                ],
                |gallery, no_face| completions.push((gallery.len(), no_face)),
            )
            .await
            .unwrap();

        assert_eq!(completions, vec![(2, 1)]);
        assert_eq!(report.gallery.len(), 2);
        assert_eq!(pipeline.matcher().gallery().len(), 2);

        let mut states = pipeline.subscribe();
        let handle = pipeline.on_frame(face_image([10, 18, 10])).unwrap();
        handle.await.unwrap();

        states.changed().await.unwrap();
        assert_eq!(
            *states.borrow(),
            RecognitionState::UserRecognized { label: "alice".into(), score: 8.0 }
        );
    }

    #[tokio::test]
    async fn test_frames_before_enrollment_are_dropped() {
        let pipeline = pipeline(Metric::Cosine);
        assert!(pipeline.on_frame(face_image([10, 10, 10])).is_none());
        assert_eq!(pipeline.state(), RecognitionState::Init);
    }

    #[tokio::test]
    async fn test_enrollment_without_faces_keeps_dropping() {
        let pipeline = pipeline(Metric::L2);
        pipeline
            .enroll(vec![("alice".to_string(), no_face_image())], |gallery, no_face| {
                assert!(gallery.is_empty());
                assert_eq!(no_face, 1);
            })
            .await
            .unwrap();

        assert!(pipeline.on_frame(face_image([10, 10, 10])).is_none());
    }

    #[tokio::test]
    async fn test_dead_engine_skips_completion() {
        let pipeline = Pipeline::new(
            FakeLocator::new().panicking(),
            FakeEmbedder::new(model(10.0, 0.4)),
            PipelineConfig::default(),
        )
        .unwrap();

        let mut completed = false;
        let result = pipeline
            .enroll(vec![("alice".to_string(), face_image([10, 10, 10]))], |_, _| {
                completed = true
            })
            .await;

        assert!(matches!(result, Err(EngineError::ChannelClosed)));
        assert!(!completed);
        assert!(pipeline.matcher().gallery().is_empty());
    }

    #[tokio::test]
    async fn test_pipeline_uses_embedder_model() {
        let pipeline = pipeline(Metric::L2);
        assert_eq!(pipeline.model().output_dims, 3);
        assert_eq!(pipeline.model().l2_threshold, 10.0);
    }
}
