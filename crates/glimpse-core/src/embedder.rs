//! FaceNet embedding extraction via ONNX Runtime.
//!
//! Face crops are resized to the preset's square input, standardized per
//! image, and fed to the model. Outputs are returned as-is: the preset L2
//! thresholds are calibrated on unnormalized FaceNet embeddings.

use crate::provider::EmbeddingProvider;
use crate::types::{Embedding, ModelInfo, TensorLayout};
use image::{imageops, imageops::FilterType, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0} — place the FaceNet export in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("expected {expected}-dim embedding, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("face crop is empty")]
    EmptyCrop,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// FaceNet-based embedding provider.
pub struct FaceNetEmbedder {
    session: Session,
    model: ModelInfo,
}

impl FaceNetEmbedder {
    /// Load `model.asset` from `model_dir`.
    pub fn load(model_dir: &Path, model: ModelInfo) -> Result<Self, EmbedderError> {
        let path = model_dir.join(model.asset);
        if !path.exists() {
            return Err(EmbedderError::ModelNotFound(path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(&path)?;

        tracing::info!(
            path = %path.display(),
            model = model.name,
            dims = model.output_dims,
            input = model.input_dims,
            "loaded FaceNet model"
        );

        Ok(Self { session, model })
    }

    /// Extract an embedding from a cropped face.
    pub fn extract(&mut self, face: &RgbImage) -> Result<Embedding, EmbedderError> {
        if face.width() == 0 || face.height() == 0 {
            return Err(EmbedderError::EmptyCrop);
        }

        let input = preprocess(face, self.model.input_dims, self.model.layout);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != self.model.output_dims {
            return Err(EmbedderError::DimensionMismatch {
                expected: self.model.output_dims,
                actual: raw.len(),
            });
        }

        Ok(Embedding::new(raw.to_vec()))
    }
}

impl EmbeddingProvider for FaceNetEmbedder {
    fn model_info(&self) -> ModelInfo {
        self.model
    }

    fn embed(&mut self, face: &RgbImage) -> Result<Embedding, EmbedderError> {
        self.extract(face)
    }
}

/// Resize to `size`×`size` and standardize with the crop's own statistics.
///
/// `std` is floored at `1/sqrt(n)` so flat crops don't blow up.
fn preprocess(face: &RgbImage, size: usize, layout: TensorLayout) -> Array4<f32> {
    let resized = imageops::resize(face, size as u32, size as u32, FilterType::Triangle);
    let raw = resized.as_raw();

    let n = raw.len() as f32;
    let mean = raw.iter().map(|&p| p as f32).sum::<f32>() / n;
    let var = raw.iter().map(|&p| (p as f32 - mean).powi(2)).sum::<f32>() / n;
    let std = var.sqrt().max(1.0 / n.sqrt());

    let shape = match layout {
        TensorLayout::Nhwc => (1, size, size, 3),
        TensorLayout::Nchw => (1, 3, size, size),
    };
    let mut tensor = Array4::<f32>::zeros(shape);

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            let v = (pixel[c] as f32 - mean) / std;
            match layout {
                TensorLayout::Nhwc => tensor[[0, y, x, c]] = v,
                TensorLayout::Nchw => tensor[[0, c, y, x]] = v,
            }
        }
    }

    tensor
}
