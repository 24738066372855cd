use glimpse_core::{DetectorConfig, Metric, ModelInfo, PipelineConfig};
use std::path::PathBuf;
use std::time::Duration;

/// CLI configuration, loaded from environment variables.
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// SCRFD model file name inside `model_dir`.
    pub detector_model: String,
    /// Active embedding preset.
    pub model: ModelInfo,
    /// Distance metric used for every decision.
    pub metric: Metric,
    pub detector: DetectorConfig,
    /// Per-frame processing limit; unset or 0 disables it.
    pub frame_timeout: Option<Duration>,
}

impl Config {
    /// Load configuration from `GLIMPSE_*` environment variables with defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let model_dir = get("GLIMPSE_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(glimpse_core::default_model_dir);

        let model = match get("GLIMPSE_MODEL") {
            Some(id) => ModelInfo::from_id(&id).ok_or_else(|| {
                let known: Vec<&str> = ModelInfo::presets().iter().map(|m| m.id).collect();
                anyhow::anyhow!("unknown GLIMPSE_MODEL {id:?} (known: {})", known.join(", "))
            })?,
            None => ModelInfo::default(),
        };

        let metric = match get("GLIMPSE_METRIC") {
            Some(v) => v.parse().map_err(|e: String| anyhow::anyhow!("GLIMPSE_METRIC: {e}"))?,
            None => Metric::default(),
        };

        let defaults = DetectorConfig::default();
        let detector = DetectorConfig {
            confidence_threshold: parse_or(&get, "GLIMPSE_DETECTION_CONFIDENCE", defaults.confidence_threshold),
            nms_threshold: parse_or(&get, "GLIMPSE_NMS_THRESHOLD", defaults.nms_threshold),
            intra_threads: parse_or(&get, "GLIMPSE_DETECTOR_THREADS", defaults.intra_threads),
        };

        let timeout_ms: u64 = parse_or(&get, "GLIMPSE_FRAME_TIMEOUT_MS", 0);

        Ok(Self {
            model_dir,
            detector_model: get("GLIMPSE_DETECTOR_MODEL").unwrap_or_else(|| "det_10g.onnx".to_string()),
            model,
            metric,
            detector,
            frame_timeout: (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms)),
        })
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join(&self.detector_model)
            .to_string_lossy()
            .into_owned()
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            metric: self.metric,
            frame_timeout: self.frame_timeout,
        }
    }
}

fn parse_or<T: std::str::FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match get(key) {
        Some(v) => v.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %v, "ignoring unparsable setting");
            default
        }),
        None => default,
    }
}
