use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Box without landmarks, as produced by detectors that only localize.
    pub fn new(x: f32, y: f32, width: f32, height: f32, confidence: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence,
            landmarks: None,
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Face embedding vector (128 or 512 dimensions for the FaceNet presets).
///
/// Immutable once produced; the gallery keeps its own copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Number of dimensions.
    pub fn dim(&self) -> usize {
        self.values.len()
    }
}

/// One enrolled reference sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub label: String,
    pub embedding: Embedding,
}

/// Ordered set of enrolled references.
///
/// Labels may repeat: every entry sharing a label is an independent sample of
/// the same identity and gets averaged at match time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, label: impl Into<String>, embedding: Embedding) {
        self.entries.push(GalleryEntry {
            label: label.into(),
            embedding,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, GalleryEntry> {
        self.entries.iter()
    }

    /// Distinct labels in first-enrolled order.
    pub fn labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = Vec::new();
        for entry in &self.entries {
            if !labels.contains(&entry.label.as_str()) {
                labels.push(&entry.label);
            }
        }
        labels
    }
}

impl FromIterator<(String, Embedding)> for Gallery {
    fn from_iter<I: IntoIterator<Item = (String, Embedding)>>(iter: I) -> Self {
        let mut gallery = Gallery::new();
        for (label, embedding) in iter {
            gallery.push(label, embedding);
        }
        gallery
    }
}

impl<'a> IntoIterator for &'a Gallery {
    type Item = &'a GalleryEntry;
    type IntoIter = std::slice::Iter<'a, GalleryEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Memory layout of the embedding model's input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// `[1, H, W, 3]` (TensorFlow-style exports).
    Nhwc,
    /// `[1, 3, H, W]`.
    Nchw,
}

/// Static descriptor of an embedding model preset.
///
/// Thresholds and dimensions are calibrated per model and fixed for the
/// lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModelInfo {
    /// Stable identifier used in configuration (e.g. "facenet-512").
    pub id: &'static str,
    pub name: &'static str,
    /// Model file name, resolved against the model directory.
    pub asset: &'static str,
    /// Cosine similarity must be strictly above this to accept a match.
    pub cosine_threshold: f32,
    /// L2 distance must not exceed this to accept a match.
    pub l2_threshold: f32,
    pub output_dims: usize,
    /// Side of the square input image in pixels.
    pub input_dims: usize,
    pub layout: TensorLayout,
}

impl ModelInfo {
    pub const FACENET_512: ModelInfo = ModelInfo {
        id: "facenet-512",
        name: "FaceNet-512",
        asset: "facenet_512.onnx",
        cosine_threshold: 0.3,
        l2_threshold: 23.56,
        output_dims: 512,
        input_dims: 160,
        layout: TensorLayout::Nhwc,
    };

    pub const FACENET_QUANTIZED: ModelInfo = ModelInfo {
        id: "facenet-quantized",
        name: "FaceNet Quantized",
        asset: "facenet_int_quantized.onnx",
        cosine_threshold: 0.4,
        l2_threshold: 10.0,
        output_dims: 128,
        input_dims: 160,
        layout: TensorLayout::Nhwc,
    };

    pub const FACENET_512_QUANTIZED: ModelInfo = ModelInfo {
        id: "facenet-512-quantized",
        name: "FaceNet-512 Quantized",
        asset: "facenet_512_int_quantized.onnx",
        cosine_threshold: 0.3,
        l2_threshold: 23.56,
        output_dims: 512,
        input_dims: 160,
        layout: TensorLayout::Nhwc,
    };

    /// All built-in presets.
    pub fn presets() -> &'static [ModelInfo] {
        &[
            Self::FACENET_512,
            Self::FACENET_QUANTIZED,
            Self::FACENET_512_QUANTIZED,
        ]
    }

    /// Look up a preset by its configuration id.
    pub fn from_id(id: &str) -> Option<ModelInfo> {
        Self::presets().iter().find(|m| m.id == id).copied()
    }
}

impl Default for ModelInfo {
    fn default() -> Self {
        Self::FACENET_512_QUANTIZED
    }
}

/// Recognition verdict observed by the UI layer.
///
/// `Init` holds until the first frame completes and is never re-entered.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RecognitionState {
    #[default]
    Init,
    /// Zero or several faces in the frame.
    NoUser,
    /// Exactly one face, but no enrolled identity passed the threshold.
    UserUnknown,
    UserRecognized {
        label: String,
        /// Averaged score of the winning label in the configured metric.
        score: f32,
    },
}

impl RecognitionState {
    pub fn label(&self) -> Option<&str> {
        match self {
            RecognitionState::UserRecognized { label, .. } => Some(label),
            _ => None,
        }
    }
}

/// Per-frame result for the single subject face.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub bbox: BoundingBox,
    /// Winning label, or `None` when the subject is unknown.
    pub label: Option<String>,
}
