use std::path::Path;

use anyhow::{Context, Result};
use ndarray::Ix4;
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::{decode_single_pose, prepare_input, select_pose_outputs};
use crate::{
    config::ModelConfig,
    error::{InferenceError, PipelineError},
    pipeline::{model::PoseModel, tensor::InputTensor},
    types::Pose,
};

/// PoseNet exported to ONNX, run through ONNX Runtime.
pub struct OrtPoseNet {
    session: Session,
    config: ModelConfig,
    label: String,
}

impl OrtPoseNet {
    pub fn new(config: ModelConfig) -> Result<Self> {
        config
            .validate()
            .context("refusing to load model with invalid configuration")?;

        if !config.model_path.is_file() {
            return Err(PipelineError::Model(format!(
                "model file {} not found",
                config.model_path.display()
            ))
            .into());
        }

        let session = load_session(&config.model_path)
            .map_err(|err| PipelineError::Model(format!("{err:#}")))?;

        let label = format!(
            "posenet-{}-{:.2}x-stride{}",
            config.architecture.label(),
            config.multiplier,
            config.output_stride
        );
        log::info!(
            "{label} loaded from {} ({} inputs, {} outputs)",
            config.model_path.display(),
            session.inputs.len(),
            session.outputs.len()
        );

        Ok(Self {
            session,
            config,
            label,
        })
    }
}

impl PoseModel for OrtPoseNet {
    fn estimate(&mut self, tensor: &InputTensor) -> Result<Pose, InferenceError> {
        let prepared = prepare_input(tensor, &self.config)?;
        let input = Tensor::from_array(prepared.input).map_err(backend_error)?;
        let outputs = self
            .session
            .run(ort::inputs![input])
            .map_err(backend_error)?;

        let mut views = Vec::with_capacity(outputs.len());
        for index in 0..outputs.len() {
            let view = outputs[index]
                .try_extract_array::<f32>()
                .map_err(backend_error)?;
            let shape = format!("{:?}", view.shape());
            let view = view
                .into_dimensionality::<Ix4>()
                .map_err(|_| InferenceError::ShapeMismatch {
                    expected: "output [1, h, w, c]".to_string(),
                    got: shape,
                })?;
            views.push(view);
        }
        let (heatmaps, offsets) = select_pose_outputs(views)?;

        let flip_width = self
            .config
            .flip_horizontal
            .then_some(tensor.width() as f32);

        decode_single_pose(
            heatmaps,
            offsets,
            self.config.output_stride,
            (prepared.scale_x, prepared.scale_y),
            flip_width,
        )
    }

    fn label(&self) -> &str {
        &self.label
    }
}

fn load_session(model_path: &Path) -> Result<Session> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(2)?
        .commit_from_file(model_path)
        .with_context(|| format!("failed to load ORT session from {}", model_path.display()))?;
    Ok(session)
}

fn backend_error(err: ort::Error) -> InferenceError {
    InferenceError::Backend(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_model_file_is_a_model_error() {
        let config = ModelConfig {
            model_path: std::env::temp_dir().join("pose-overlay-no-such-model.onnx"),
            ..ModelConfig::default()
        };
        let err = OrtPoseNet::new(config).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Model(_))
        ));
    }

    #[test]
    fn invalid_config_is_rejected_before_loading() {
        let config = ModelConfig {
            output_stride: 7,
            ..ModelConfig::default()
        };
        let err = OrtPoseNet::new(config).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Config(_))
        ));
    }
}
