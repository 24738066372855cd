//! Embedding comparison and the accept/reject policy.
//!
//! L2 distance picks the label with the lowest averaged distance, cosine
//! similarity the label with the highest averaged similarity. The two
//! decisions use opposite comparison directions and are kept as separate
//! functions.

use crate::types::{Embedding, ModelInfo};
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScoreError {
    #[error("embedding dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
    #[error("cosine similarity undefined for a zero-magnitude embedding")]
    ZeroMagnitude,
}

/// Distance metric, fixed once per process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    L2,
    Cosine,
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "l2" | "euclidean" => Ok(Metric::L2),
            "cosine" => Ok(Metric::Cosine),
            other => Err(format!("unknown metric: {other} (expected l2 or cosine)")),
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Metric::L2 => f.write_str("l2"),
            Metric::Cosine => f.write_str("cosine"),
        }
    }
}

fn check_dims(a: &Embedding, b: &Embedding) -> Result<(), ScoreError> {
    if a.dim() != b.dim() {
        return Err(ScoreError::DimensionMismatch {
            left: a.dim(),
            right: b.dim(),
        });
    }
    Ok(())
}

/// Euclidean distance. Lower = more similar.
pub fn l2_distance(a: &Embedding, b: &Embedding) -> Result<f32, ScoreError> {
    check_dims(a, b)?;
    Ok(a.values()
        .iter()
        .zip(b.values())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt())
}

/// Cosine similarity in [-1, 1]. Higher = more similar.
pub fn cosine_similarity(a: &Embedding, b: &Embedding) -> Result<f32, ScoreError> {
    check_dims(a, b)?;

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.values().iter().zip(b.values()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom > 0.0 {
        Ok(dot / denom)
    } else {
        Err(ScoreError::ZeroMagnitude)
    }
}

/// Score two embeddings with the given metric.
pub fn score(a: &Embedding, b: &Embedding, metric: Metric) -> Result<f32, ScoreError> {
    match metric {
        Metric::L2 => l2_distance(a, b),
        Metric::Cosine => cosine_similarity(a, b),
    }
}

/// Outcome of the threshold policy for one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Recognized { label: String, score: f32 },
    /// `best` is the best finite averaged score, if any label produced one.
    Unknown { best: Option<f32> },
}

/// First label holding the best finite average under `better`. Non-finite
/// averages never win, whatever their position.
fn best_finite(
    averages: &[(String, f32)],
    better: impl Fn(f32, f32) -> bool,
) -> Option<&(String, f32)> {
    averages
        .iter()
        .filter(|(_, score)| score.is_finite())
        .fold(None, |best: Option<&(String, f32)>, cand| match best {
            Some(b) if !better(cand.1, b.1) => Some(b),
            _ => Some(cand),
        })
}

/// Min-distance policy: the closest label wins unless its average distance
/// exceeds `threshold`. Ties go to the earlier label.
pub fn decide_l2(averages: &[(String, f32)], threshold: f32) -> Decision {
    match best_finite(averages, |cand, best| cand < best) {
        Some((label, dist)) if *dist <= threshold => Decision::Recognized {
            label: label.clone(),
            score: *dist,
        },
        Some((_, dist)) => Decision::Unknown { best: Some(*dist) },
        None => Decision::Unknown { best: None },
    }
}

/// Max-similarity policy: the most similar label wins only if its average
/// similarity is strictly above `threshold`. Ties go to the earlier label.
pub fn decide_cosine(averages: &[(String, f32)], threshold: f32) -> Decision {
    match best_finite(averages, |cand, best| cand > best) {
        Some((label, sim)) if *sim > threshold => Decision::Recognized {
            label: label.clone(),
            score: *sim,
        },
        Some((_, sim)) => Decision::Unknown { best: Some(*sim) },
        None => Decision::Unknown { best: None },
    }
}

/// Raw per-label scores collected while scanning the gallery for one frame.
#[derive(Debug, Default)]
pub struct FrameScores {
    index: HashMap<String, usize>,
    scores: Vec<(String, Vec<f32>)>,
}

impl FrameScores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, label: &str, score: f32) {
        match self.index.get(label) {
            Some(&i) => self.scores[i].1.push(score),
            None => {
                self.index.insert(label.to_string(), self.scores.len());
                self.scores.push((label.to_string(), vec![score]));
            }
        }
    }

    /// Arithmetic mean per label, in first-recorded order.
    pub fn averages(&self) -> Vec<(String, f32)> {
        self.scores
            .iter()
            .map(|(label, raw)| {
                let mean = raw.iter().sum::<f32>() / raw.len() as f32;
                (label.clone(), mean)
            })
            .collect()
    }
}

/// Metric plus the model-calibrated threshold that goes with it.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityScorer {
    metric: Metric,
    threshold: f32,
}

impl SimilarityScorer {
    pub fn new(metric: Metric, threshold: f32) -> Self {
        Self { metric, threshold }
    }

    /// Scorer using the preset's threshold for `metric`.
    pub fn for_model(model: &ModelInfo, metric: Metric) -> Self {
        let threshold = match metric {
            Metric::L2 => model.l2_threshold,
            Metric::Cosine => model.cosine_threshold,
        };
        Self::new(metric, threshold)
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn score(&self, a: &Embedding, b: &Embedding) -> Result<f32, ScoreError> {
        score(a, b, self.metric)
    }

    pub fn decide(&self, scores: &FrameScores) -> Decision {
        let averages = scores.averages();
        match self.metric {
            Metric::L2 => decide_l2(&averages, self.threshold),
            Metric::Cosine => decide_cosine(&averages, self.threshold),
        }
    }
}
