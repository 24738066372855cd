//! Scripted locator and embedder for tests.
//!
//! Test images carry their script in pixel (0, 0): the red channel selects
//! the locator/embedder behavior, every other pixel holds the RGB value the
//! embedder turns into a 3-dim embedding.

use crate::detector::DetectorError;
use crate::embedder::EmbedderError;
use crate::provider::{EmbeddingProvider, FaceLocator};
use crate::types::{BoundingBox, Embedding, ModelInfo, TensorLayout};
use image::{Rgb, RgbImage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

const MARK_NO_FACE: u8 = 0;
const MARK_ONE_FACE: u8 = 1;
const MARK_TWO_FACES: u8 = 2;
const MARK_LOCATE_ERROR: u8 = 7;
const MARK_EMBED_ERROR: u8 = 8;

const SIDE: u32 = 4;

fn scripted(mark: u8, rgb: [u8; 3]) -> RgbImage {
    let mut img = RgbImage::from_pixel(SIDE, SIDE, Rgb(rgb));
    img.put_pixel(0, 0, Rgb([mark, 0, 0]));
    img
}

/// One face whose embedding is `rgb`.
pub fn face_image(rgb: [u8; 3]) -> RgbImage {
    scripted(MARK_ONE_FACE, rgb)
}

pub fn no_face_image() -> RgbImage {
    scripted(MARK_NO_FACE, [0, 0, 0])
}

pub fn two_faces_image(rgb: [u8; 3]) -> RgbImage {
    scripted(MARK_TWO_FACES, rgb)
}

pub fn locate_error_image() -> RgbImage {
    scripted(MARK_LOCATE_ERROR, [0, 0, 0])
}

/// One face that the embedder refuses.
pub fn embed_error_image() -> RgbImage {
    scripted(MARK_EMBED_ERROR, [0, 0, 0])
}

/// 3-dim model with custom thresholds.
pub fn model(l2_threshold: f32, cosine_threshold: f32) -> ModelInfo {
    ModelInfo {
        id: "test",
        name: "Test",
        asset: "test.onnx",
        cosine_threshold,
        l2_threshold,
        output_dims: 3,
        input_dims: SIDE as usize,
        layout: TensorLayout::Nhwc,
    }
}

#[derive(Default)]
pub struct FakeLocator {
    gate: Option<mpsc::Receiver<()>>,
    delay: Option<Duration>,
    failing: bool,
    panicking: bool,
    calls: Option<Arc<AtomicUsize>>,
}

impl FakeLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block every `locate` until the sender fires (or is dropped).
    pub fn gated(gate: mpsc::Receiver<()>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panicking = true;
        self
    }

    /// Count every `locate` that reaches the model.
    pub fn counting(mut self, calls: Arc<AtomicUsize>) -> Self {
        self.calls = Some(calls);
        self
    }
}

impl FaceLocator for FakeLocator {
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if let Some(calls) = &self.calls {
            calls.fetch_add(1, Ordering::SeqCst);
        }
        if let Some(gate) = &self.gate {
            let _ = gate.recv();
        }
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.panicking {
            panic!("scripted locator panic");
        }
        if self.failing {
            return Err(DetectorError::InferenceFailed("scripted failure".into()));
        }

        let whole = BoundingBox::new(0.0, 0.0, image.width() as f32, image.height() as f32, 0.99);
        match image.get_pixel(0, 0)[0] {
            MARK_NO_FACE => Ok(Vec::new()),
            MARK_TWO_FACES => Ok(vec![whole.clone(), whole]),
            MARK_LOCATE_ERROR => Err(DetectorError::InferenceFailed("scripted image failure".into())),
            _ => Ok(vec![whole]),
        }
    }
}

pub struct FakeEmbedder {
    model: ModelInfo,
    failing: bool,
}

impl FakeEmbedder {
    pub fn new(model: ModelInfo) -> Self {
        Self {
            model,
            failing: false,
        }
    }

    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }
}

impl EmbeddingProvider for FakeEmbedder {
    fn model_info(&self) -> ModelInfo {
        self.model
    }

    fn embed(&mut self, face: &RgbImage) -> Result<Embedding, EmbedderError> {
        if self.failing || face.get_pixel(0, 0)[0] == MARK_EMBED_ERROR {
            return Err(EmbedderError::InferenceFailed("scripted failure".into()));
        }
        let rgb = face.get_pixel(1, 0);
        Ok(Embedding::new(rgb.0.iter().map(|&v| v as f32).collect()))
    }
}
