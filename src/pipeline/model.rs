use crate::{error::InferenceError, pipeline::tensor::InputTensor, types::Pose};

/// A loaded single-person pose estimator.
///
/// Implementations are configured once at load time. The inference loop owns
/// its model and never issues overlapping calls.
pub trait PoseModel: Send + 'static {
    fn estimate(&mut self, tensor: &InputTensor) -> Result<Pose, InferenceError>;

    fn label(&self) -> &str {
        "pose-model"
    }
}
