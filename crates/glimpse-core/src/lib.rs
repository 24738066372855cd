//! glimpse-core — Face gallery enrollment and live-stream recognition.
//!
//! Uses SCRFD for face location and FaceNet for embeddings, both running via
//! ONNX Runtime on a dedicated engine thread. Frames are matched against the
//! enrolled gallery one at a time; overlapping frames are dropped.

pub mod crop;
pub mod detector;
pub mod embedder;
pub mod engine;
pub mod enroll;
pub mod pipeline;
pub mod provider;
pub mod scorer;
pub mod stream;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use detector::{DetectorConfig, FaceDetector};
pub use embedder::FaceNetEmbedder;
pub use enroll::{EnrollReport, GalleryEnroller};
pub use pipeline::{Pipeline, PipelineConfig};
pub use provider::{EmbeddingProvider, FaceLocator};
pub use scorer::{Metric, SimilarityScorer};
pub use stream::{DropReason, FrameOutcome, StreamMatcher};
pub use types::{BoundingBox, Embedding, Gallery, GalleryEntry, ModelInfo, Prediction, RecognitionState};

use std::path::PathBuf;

/// Default directory for model files: `$XDG_DATA_HOME/glimpse/models`,
/// falling back to `~/.local/share/glimpse/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("glimpse/models")
}
