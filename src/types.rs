use std::time::Instant;

/// Number of body parts PoseNet reports for a single person.
pub const NUM_KEYPOINTS: usize = 17;

#[derive(Clone, Debug)]
pub struct Frame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Interleaved channels per pixel (3 = RGB, 4 = RGBA).
    pub channels: u32,
    pub timestamp: Instant,
}

impl Frame {
    pub fn rgb(pixels: Vec<u8>, width: u32, height: u32) -> Self {
        Frame {
            pixels,
            width,
            height,
            channels: 3,
            timestamp: Instant::now(),
        }
    }

    pub fn rgba(pixels: Vec<u8>, width: u32, height: u32) -> Self {
        Frame {
            pixels,
            width,
            height,
            channels: 4,
            timestamp: Instant::now(),
        }
    }

    pub fn from_image(image: &image::DynamicImage) -> Self {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        Frame::rgb(rgb.into_raw(), width, height)
    }

    pub fn expected_len(&self) -> usize {
        (self.width as usize)
            .saturating_mul(self.height as usize)
            .saturating_mul(self.channels as usize)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BodyPart {
    Nose,
    LeftEye,
    RightEye,
    LeftEar,
    RightEar,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
}

impl BodyPart {
    /// Parts in the order the model emits them.
    pub const ALL: [BodyPart; NUM_KEYPOINTS] = [
        BodyPart::Nose,
        BodyPart::LeftEye,
        BodyPart::RightEye,
        BodyPart::LeftEar,
        BodyPart::RightEar,
        BodyPart::LeftShoulder,
        BodyPart::RightShoulder,
        BodyPart::LeftElbow,
        BodyPart::RightElbow,
        BodyPart::LeftWrist,
        BodyPart::RightWrist,
        BodyPart::LeftHip,
        BodyPart::RightHip,
        BodyPart::LeftKnee,
        BodyPart::RightKnee,
        BodyPart::LeftAnkle,
        BodyPart::RightAnkle,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            BodyPart::Nose => "nose",
            BodyPart::LeftEye => "leftEye",
            BodyPart::RightEye => "rightEye",
            BodyPart::LeftEar => "leftEar",
            BodyPart::RightEar => "rightEar",
            BodyPart::LeftShoulder => "leftShoulder",
            BodyPart::RightShoulder => "rightShoulder",
            BodyPart::LeftElbow => "leftElbow",
            BodyPart::RightElbow => "rightElbow",
            BodyPart::LeftWrist => "leftWrist",
            BodyPart::RightWrist => "rightWrist",
            BodyPart::LeftHip => "leftHip",
            BodyPart::RightHip => "rightHip",
            BodyPart::LeftKnee => "leftKnee",
            BodyPart::RightKnee => "rightKnee",
            BodyPart::LeftAnkle => "leftAnkle",
            BodyPart::RightAnkle => "rightAnkle",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Position { x, y }
    }
}

/// A single body part estimate in tensor-space coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Keypoint {
    pub part: BodyPart,
    pub position: Position,
    pub score: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Pose {
    pub keypoints: Vec<Keypoint>,
    pub score: f32,
}

impl Pose {
    /// Builds a pose whose overall score is the mean keypoint score.
    pub fn from_keypoints(keypoints: Vec<Keypoint>) -> Self {
        let score = if keypoints.is_empty() {
            0.0
        } else {
            keypoints.iter().map(|k| k.score).sum::<f32>() / keypoints.len() as f32
        };
        Pose { keypoints, score }
    }

    pub fn keypoint(&self, part: BodyPart) -> Option<&Keypoint> {
        self.keypoints.iter().find(|k| k.part == part)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_part_indices_follow_model_order() {
        for (idx, part) in BodyPart::ALL.iter().enumerate() {
            assert_eq!(part.index(), idx);
            assert_eq!(BodyPart::from_index(idx), Some(*part));
        }
        assert_eq!(BodyPart::from_index(NUM_KEYPOINTS), None);
    }

    #[test]
    fn pose_score_is_mean_of_keypoints() {
        let pose = Pose::from_keypoints(vec![
            Keypoint {
                part: BodyPart::Nose,
                position: Position::new(1.0, 2.0),
                score: 0.2,
            },
            Keypoint {
                part: BodyPart::LeftEye,
                position: Position::new(3.0, 4.0),
                score: 0.6,
            },
        ]);
        assert!((pose.score - 0.4).abs() < 1e-6);
        assert_eq!(
            pose.keypoint(BodyPart::LeftEye).map(|k| k.position),
            Some(Position::new(3.0, 4.0))
        );
        assert!(pose.keypoint(BodyPart::RightAnkle).is_none());
    }

    #[test]
    fn empty_pose_scores_zero() {
        assert_eq!(Pose::from_keypoints(Vec::new()).score, 0.0);
    }
}
