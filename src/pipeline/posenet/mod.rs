//! PoseNet single-pose estimation: input preparation and output decoding.
//!
//! The heatmap/offset decoding is backend independent so it can be checked
//! against synthetic model outputs.

mod ort;

pub use self::ort::OrtPoseNet;

use ndarray::{Array4, ArrayView3, ArrayView4, Axis};
use rayon::prelude::*;

use crate::{
    config::{Architecture, ModelConfig},
    error::InferenceError,
    pipeline::tensor::InputTensor,
    types::{BodyPart, Keypoint, NUM_KEYPOINTS, Pose, Position},
};

const RESNET_MEAN: [f32; 3] = [-123.15, -115.90, -103.06];

#[derive(Debug)]
pub struct PreparedInput {
    /// NHWC, batch of one.
    pub input: Array4<f32>,
    /// Multipliers from model-input space back to tensor space.
    pub scale_x: f32,
    pub scale_y: f32,
}

/// Snaps `size` to the stride grid (`floor(size / stride) * stride + 1`).
/// Sizes already on the grid are returned unchanged.
pub fn valid_resolution(size: u32, stride: u32) -> u32 {
    if stride == 0 || size == 0 || (size - 1) % stride == 0 {
        size
    } else {
        (size / stride) * stride + 1
    }
}

pub fn prepare_input(
    tensor: &InputTensor,
    config: &ModelConfig,
) -> Result<PreparedInput, InferenceError> {
    let (src_h, src_w, channels) = tensor.shape();
    if channels != 3 || src_h == 0 || src_w == 0 {
        return Err(InferenceError::ShapeMismatch {
            expected: "[H, W, 3]".to_string(),
            got: format!("[{src_h}, {src_w}, {channels}]"),
        });
    }

    let dst_w = valid_resolution(src_w as u32, config.output_stride) as usize;
    let dst_h = valid_resolution(src_h as u32, config.output_stride) as usize;
    let scale_x = src_w as f32 / dst_w as f32;
    let scale_y = src_h as f32 / dst_h as f32;
    let src = tensor.view();

    let mut data = vec![0f32; dst_h * dst_w * 3];
    data.par_chunks_mut(dst_w * 3)
        .enumerate()
        .for_each(|(y, row)| {
            let sy = ((y as f32 + 0.5) * scale_y - 0.5).clamp(0.0, (src_h - 1) as f32);
            let y0 = sy.floor() as usize;
            let y1 = (y0 + 1).min(src_h - 1);
            let fy = sy - y0 as f32;
            for x in 0..dst_w {
                let sx = ((x as f32 + 0.5) * scale_x - 0.5).clamp(0.0, (src_w - 1) as f32);
                let x0 = sx.floor() as usize;
                let x1 = (x0 + 1).min(src_w - 1);
                let fx = sx - x0 as f32;
                for c in 0..3 {
                    let top = src[[y0, x0, c]] + (src[[y0, x1, c]] - src[[y0, x0, c]]) * fx;
                    let bottom = src[[y1, x0, c]] + (src[[y1, x1, c]] - src[[y1, x0, c]]) * fx;
                    let value = top + (bottom - top) * fy;
                    row[x * 3 + c] = match config.architecture {
                        Architecture::MobileNetV1 => value / 127.5 - 1.0,
                        Architecture::ResNet50 => value + RESNET_MEAN[c],
                    };
                }
            }
        });

    let input = Array4::from_shape_vec((1, dst_h, dst_w, 3), data).map_err(|err| {
        InferenceError::Backend(format!("failed to build model input: {err}"))
    })?;

    Ok(PreparedInput {
        input,
        scale_x,
        scale_y,
    })
}

/// Decodes one pose from heatmap logits `[h, w, 17]` and offsets `[h, w, 34]`
/// (17 y offsets followed by 17 x offsets).
///
/// Positions are returned in tensor space. When `flip_width` is set, x is
/// mirrored around a tensor of that width.
pub fn decode_single_pose(
    heatmaps: ArrayView3<'_, f32>,
    offsets: ArrayView3<'_, f32>,
    output_stride: u32,
    prepared_scale: (f32, f32),
    flip_width: Option<f32>,
) -> Result<Pose, InferenceError> {
    let (h, w, parts) = heatmaps.dim();
    if parts != NUM_KEYPOINTS || h == 0 || w == 0 {
        return Err(InferenceError::ShapeMismatch {
            expected: format!("heatmaps [h, w, {NUM_KEYPOINTS}]"),
            got: format!("{:?}", heatmaps.shape()),
        });
    }
    if offsets.dim() != (h, w, NUM_KEYPOINTS * 2) {
        return Err(InferenceError::ShapeMismatch {
            expected: format!("offsets [{h}, {w}, {}]", NUM_KEYPOINTS * 2),
            got: format!("{:?}", offsets.shape()),
        });
    }

    let stride = output_stride as f32;
    let (scale_x, scale_y) = prepared_scale;
    let keypoints = BodyPart::ALL
        .iter()
        .map(|&part| {
            let k = part.index();
            let (mut best_y, mut best_x, mut best) = (0, 0, f32::NEG_INFINITY);
            for y in 0..h {
                for x in 0..w {
                    let logit = heatmaps[[y, x, k]];
                    if logit > best {
                        best = logit;
                        best_y = y;
                        best_x = x;
                    }
                }
            }

            let offset_y = offsets[[best_y, best_x, k]];
            let offset_x = offsets[[best_y, best_x, k + NUM_KEYPOINTS]];
            let mut px = (best_x as f32 * stride + offset_x) * scale_x;
            let py = (best_y as f32 * stride + offset_y) * scale_y;
            if let Some(width) = flip_width {
                px = width - 1.0 - px;
            }

            Keypoint {
                part,
                position: Position::new(px, py),
                score: sigmoid(best),
            }
        })
        .collect();

    Ok(Pose::from_keypoints(keypoints))
}

/// Picks the heatmaps (17 channels) and offsets (34 channels) out of the
/// model outputs, in whatever order the export lists them. Extra outputs such
/// as displacement maps are ignored.
pub fn select_pose_outputs<'a>(
    outputs: Vec<ArrayView4<'a, f32>>,
) -> Result<(ArrayView3<'a, f32>, ArrayView3<'a, f32>), InferenceError> {
    let shapes: Vec<_> = outputs.iter().map(|out| out.shape().to_vec()).collect();
    let mut heatmaps = None;
    let mut offsets = None;

    for output in outputs {
        if output.len_of(Axis(0)) == 0 {
            continue;
        }
        let channels = output.len_of(Axis(3));
        if channels == NUM_KEYPOINTS && heatmaps.is_none() {
            heatmaps = Some(output.index_axis_move(Axis(0), 0));
        } else if channels == NUM_KEYPOINTS * 2 && offsets.is_none() {
            offsets = Some(output.index_axis_move(Axis(0), 0));
        }
    }

    match (heatmaps, offsets) {
        (Some(heatmaps), Some(offsets)) => Ok((heatmaps, offsets)),
        _ => Err(InferenceError::ShapeMismatch {
            expected: format!(
                "heatmaps [1, h, w, {NUM_KEYPOINTS}] and offsets [1, h, w, {}]",
                NUM_KEYPOINTS * 2
            ),
            got: format!("{shapes:?}"),
        }),
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{INPUT_HEIGHT, INPUT_WIDTH},
        pipeline::tensor::{TensorConverter, TensorLedger},
        types::Frame,
    };
    use ndarray::Array3;

    #[test]
    fn valid_resolution_matches_stride_grid() {
        assert_eq!(valid_resolution(152, 16), 145);
        assert_eq!(valid_resolution(200, 16), 193);
        assert_eq!(valid_resolution(257, 16), 257);
        assert_eq!(valid_resolution(200, 8), 201);
        assert_eq!(valid_resolution(152, 32), 129);
    }

    #[test]
    fn prepares_mobilenet_input_in_unit_range() {
        let mut converter = TensorConverter::new(INPUT_WIDTH, INPUT_HEIGHT, TensorLedger::new());
        let tensor = converter
            .convert(&Frame::rgb(vec![255; 152 * 200 * 3], 152, 200))
            .unwrap();
        let prepared = prepare_input(&tensor, &ModelConfig::default()).unwrap();

        assert_eq!(prepared.input.dim(), (1, 193, 145, 3));
        assert!(prepared.input.iter().all(|v| (*v - 1.0).abs() < 1e-4));
        assert!((prepared.scale_x - 152.0 / 145.0).abs() < 1e-6);
        assert!((prepared.scale_y - 200.0 / 193.0).abs() < 1e-6);
    }

    #[test]
    fn prepares_resnet_input_with_mean_offset() {
        let mut converter = TensorConverter::new(INPUT_WIDTH, INPUT_HEIGHT, TensorLedger::new());
        let tensor = converter
            .convert(&Frame::rgb(vec![0; 152 * 200 * 3], 152, 200))
            .unwrap();
        let config = ModelConfig {
            architecture: Architecture::ResNet50,
            output_stride: 32,
            multiplier: 1.0,
            ..ModelConfig::default()
        };
        let prepared = prepare_input(&tensor, &config).unwrap();
        assert_eq!(prepared.input.dim(), (1, 193, 129, 3));
        assert!((prepared.input[[0, 10, 10, 0]] - RESNET_MEAN[0]).abs() < 1e-4);
        assert!((prepared.input[[0, 10, 10, 2]] - RESNET_MEAN[2]).abs() < 1e-4);
    }

    #[test]
    fn decodes_argmax_cell_with_offsets() {
        let (h, w) = (13, 10);
        let mut heatmaps = Array3::<f32>::from_elem((h, w, NUM_KEYPOINTS), -5.0);
        let mut offsets = Array3::<f32>::zeros((h, w, NUM_KEYPOINTS * 2));

        let nose = BodyPart::Nose.index();
        heatmaps[[3, 4, nose]] = 2.0;
        offsets[[3, 4, nose]] = 1.5;
        offsets[[3, 4, nose + NUM_KEYPOINTS]] = -2.0;

        let pose = decode_single_pose(heatmaps.view(), offsets.view(), 16, (1.0, 1.0), None)
            .unwrap();
        assert_eq!(pose.keypoints.len(), NUM_KEYPOINTS);

        let kp = pose.keypoint(BodyPart::Nose).unwrap();
        assert_eq!(kp.position, Position::new(4.0 * 16.0 - 2.0, 3.0 * 16.0 + 1.5));
        assert!((kp.score - sigmoid(2.0)).abs() < 1e-6);

        let ankle = pose.keypoint(BodyPart::RightAnkle).unwrap();
        assert!(ankle.score < 0.01);
    }

    #[test]
    fn decode_applies_scale_and_flip() {
        let mut heatmaps = Array3::<f32>::zeros((2, 2, NUM_KEYPOINTS));
        let offsets = Array3::<f32>::zeros((2, 2, NUM_KEYPOINTS * 2));
        heatmaps[[1, 1, BodyPart::LeftWrist.index()]] = 3.0;

        let pose = decode_single_pose(heatmaps.view(), offsets.view(), 8, (2.0, 0.5), Some(100.0))
            .unwrap();
        let wrist = pose.keypoint(BodyPart::LeftWrist).unwrap();
        assert_eq!(wrist.position, Position::new(100.0 - 1.0 - 16.0, 4.0));
    }

    #[test]
    fn decode_rejects_wrong_output_shapes() {
        let heatmaps = Array3::<f32>::zeros((4, 4, 5));
        let offsets = Array3::<f32>::zeros((4, 4, 10));
        assert!(matches!(
            decode_single_pose(heatmaps.view(), offsets.view(), 16, (1.0, 1.0), None),
            Err(InferenceError::ShapeMismatch { .. })
        ));

        let heatmaps = Array3::<f32>::zeros((4, 4, NUM_KEYPOINTS));
        let offsets = Array3::<f32>::zeros((3, 4, NUM_KEYPOINTS * 2));
        assert!(
            decode_single_pose(heatmaps.view(), offsets.view(), 16, (1.0, 1.0), None).is_err()
        );
    }

    #[test]
    fn selects_outputs_by_channel_count_in_any_order() {
        let mut heatmaps = Array4::<f32>::zeros((1, 3, 3, NUM_KEYPOINTS));
        heatmaps[[0, 2, 1, 0]] = 4.0;
        let offsets = Array4::<f32>::zeros((1, 3, 3, NUM_KEYPOINTS * 2));
        let displacement = Array4::<f32>::zeros((1, 3, 3, 32));

        let (picked_heatmaps, picked_offsets) = select_pose_outputs(vec![
            displacement.view(),
            offsets.view(),
            heatmaps.view(),
        ])
        .unwrap();
        assert_eq!(picked_heatmaps.dim(), (3, 3, NUM_KEYPOINTS));
        assert_eq!(picked_heatmaps[[2, 1, 0]], 4.0);
        assert_eq!(picked_offsets.dim(), (3, 3, NUM_KEYPOINTS * 2));
    }

    #[test]
    fn missing_offsets_output_is_a_shape_mismatch() {
        let heatmaps = Array4::<f32>::zeros((1, 3, 3, NUM_KEYPOINTS));
        let other = Array4::<f32>::zeros((1, 3, 3, 32));
        assert!(matches!(
            select_pose_outputs(vec![heatmaps.view(), other.view()]),
            Err(InferenceError::ShapeMismatch { .. })
        ));
    }
}
