#[cfg(feature = "camera-nokhwa")]
pub mod camera;
#[cfg(feature = "camera-nokhwa")]
pub mod decode;
pub mod inference_loop;
pub mod model;
pub mod posenet;
pub mod skeleton;
pub mod tensor;

// Re-exports for convenience
#[cfg(feature = "camera-nokhwa")]
pub use camera::{CameraSession, FacingMode, check_permission};
pub use inference_loop::{
    InferenceHandle, InferenceLoop, LoopState, PoseReader, StepOutcome, start_inference_loop,
};
pub use model::PoseModel;
pub use posenet::OrtPoseNet;
pub use skeleton::{CONNECTIONS, RenderablePose, SkeletonEdge, draw_overlay, render_pose};
pub use tensor::{InputTensor, TensorConverter, TensorLedger};
