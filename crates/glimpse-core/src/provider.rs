//! Capability seams for the detection and embedding models.
//!
//! The engine thread owns one implementation of each; the pipeline never
//! calls them directly.

use crate::detector::DetectorError;
use crate::embedder::EmbedderError;
use crate::types::{BoundingBox, Embedding, ModelInfo};
use image::RgbImage;

/// Finds face regions in an image.
pub trait FaceLocator: Send + 'static {
    /// Zero or more faces. Callers that need a single face take the first.
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError>;
}

/// Turns a cropped face into an embedding.
pub trait EmbeddingProvider: Send + 'static {
    /// Descriptor of the loaded model; `embed` output has `output_dims` values.
    fn model_info(&self) -> ModelInfo;

    fn embed(&mut self, face: &RgbImage) -> Result<Embedding, EmbedderError>;
}
