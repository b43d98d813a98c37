use std::{env, path::PathBuf};

use crate::error::PipelineError;

pub const INPUT_WIDTH: u32 = 152;
pub const INPUT_HEIGHT: u32 = 200;
pub const INPUT_CHANNELS: u32 = 3;
pub const MIN_KEYPOINT_SCORE: f32 = 0.7;

const MODEL_PATH_ENV: &str = "POSE_MODEL_PATH";
const MODEL_URL_ENV: &str = "POSE_MODEL_URL";
const MIN_SCORE_ENV: &str = "POSE_MIN_KEYPOINT_SCORE";
const FLIP_ENV: &str = "POSE_FLIP_HORIZONTAL";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Architecture {
    MobileNetV1,
    ResNet50,
}

impl Architecture {
    pub fn label(&self) -> &'static str {
        match self {
            Architecture::MobileNetV1 => "mobilenet_v1",
            Architecture::ResNet50 => "resnet50",
        }
    }
}

/// Load-time model parameters. Fixed for the lifetime of a loaded model.
#[derive(Clone, Debug)]
pub struct ModelConfig {
    pub architecture: Architecture,
    pub output_stride: u32,
    pub input_width: u32,
    pub input_height: u32,
    pub channels: u32,
    pub multiplier: f32,
    pub quant_bytes: u32,
    pub flip_horizontal: bool,
    pub model_path: PathBuf,
    pub model_url: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let mut config = ModelConfig {
            architecture: Architecture::MobileNetV1,
            output_stride: 16,
            input_width: INPUT_WIDTH,
            input_height: INPUT_HEIGHT,
            channels: INPUT_CHANNELS,
            multiplier: 0.75,
            quant_bytes: 2,
            flip_horizontal: false,
            model_path: PathBuf::new(),
            model_url: None,
        };
        config.model_path = PathBuf::from("models").join(config.model_file_name());
        config
    }
}

impl ModelConfig {
    pub fn from_env() -> Self {
        let mut config = ModelConfig::default();
        if let Ok(path) = env::var(MODEL_PATH_ENV) {
            config.model_path = PathBuf::from(path);
        }
        if let Ok(url) = env::var(MODEL_URL_ENV) {
            if !url.trim().is_empty() {
                config.model_url = Some(url);
            }
        }
        if let Ok(raw) = env::var(FLIP_ENV) {
            match parse_bool(&raw) {
                Some(flip) => config.flip_horizontal = flip,
                None => log::warn!("ignoring {FLIP_ENV}={raw:?}: expected a boolean"),
            }
        }
        config
    }

    /// e.g. `posenet_mobilenet_v1_075_stride16_q2.onnx`
    pub fn model_file_name(&self) -> String {
        format!(
            "posenet_{}_{:03}_stride{}_q{}.onnx",
            self.architecture.label(),
            (self.multiplier * 100.0).round() as u32,
            self.output_stride,
            self.quant_bytes
        )
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let (strides, multipliers): (&[u32], &[f32]) = match self.architecture {
            Architecture::MobileNetV1 => (&[8, 16], &[0.5, 0.75, 1.0]),
            Architecture::ResNet50 => (&[16, 32], &[1.0]),
        };
        if !strides.contains(&self.output_stride) {
            return Err(PipelineError::Config(format!(
                "output stride {} not supported by {}, expected one of {:?}",
                self.output_stride,
                self.architecture.label(),
                strides
            )));
        }
        if !multipliers
            .iter()
            .any(|m| (m - self.multiplier).abs() < f32::EPSILON)
        {
            return Err(PipelineError::Config(format!(
                "multiplier {} not supported by {}, expected one of {:?}",
                self.multiplier,
                self.architecture.label(),
                multipliers
            )));
        }
        if ![1, 2, 4].contains(&self.quant_bytes) {
            return Err(PipelineError::Config(format!(
                "quant bytes {} not supported, expected 1, 2 or 4",
                self.quant_bytes
            )));
        }
        if self.channels != INPUT_CHANNELS {
            return Err(PipelineError::Config(format!(
                "channel depth {} not supported, expected {INPUT_CHANNELS}",
                self.channels
            )));
        }
        if self.input_width <= self.output_stride || self.input_height <= self.output_stride {
            return Err(PipelineError::Config(format!(
                "input resolution {}x{} too small for stride {}",
                self.input_width, self.input_height, self.output_stride
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct OverlayConfig {
    pub min_keypoint_score: f32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        OverlayConfig {
            min_keypoint_score: MIN_KEYPOINT_SCORE,
        }
    }
}

impl OverlayConfig {
    pub fn from_env() -> Self {
        let mut config = OverlayConfig::default();
        if let Ok(raw) = env::var(MIN_SCORE_ENV) {
            match raw.trim().parse::<f32>() {
                Ok(score) if (0.0..=1.0).contains(&score) => config.min_keypoint_score = score,
                _ => log::warn!("ignoring {MIN_SCORE_ENV}={raw:?}: expected a score in [0, 1]"),
            }
        }
        config
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ModelConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!((config.input_width, config.input_height), (152, 200));
        assert_eq!(
            config.model_path,
            PathBuf::from("models/posenet_mobilenet_v1_075_stride16_q2.onnx")
        );
    }

    #[test]
    fn rejects_unsupported_combinations() {
        let mut config = ModelConfig::default();
        config.output_stride = 32;
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));

        let mut config = ModelConfig::default();
        config.architecture = Architecture::ResNet50;
        // 0.75 is a MobileNet-only multiplier.
        assert!(config.validate().is_err());
        config.multiplier = 1.0;
        assert!(config.validate().is_ok());

        let mut config = ModelConfig::default();
        config.quant_bytes = 3;
        assert!(config.validate().is_err());

        let mut config = ModelConfig::default();
        config.channels = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_boolean_overrides() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" off "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
