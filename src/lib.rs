//! Real-time single-person pose estimation over a camera feed.
//!
//! Frames flow from the camera into an [`pipeline::InferenceLoop`], which
//! converts the newest frame to an input tensor, runs a [`pipeline::PoseModel`]
//! and publishes the latest [`types::Pose`]. Display code polls that pose and
//! turns it into an overlay with [`pipeline::render_pose`].

pub mod config;
pub mod error;
pub mod model_download;
pub mod pipeline;
pub mod types;
