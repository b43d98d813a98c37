use crate::types::{BodyPart, Keypoint, Pose, Position};

pub type SkeletonEdge = (BodyPart, BodyPart);

/// Anatomical connections drawn between body parts.
pub const CONNECTIONS: &[SkeletonEdge] = &[
    (BodyPart::LeftHip, BodyPart::LeftShoulder),
    (BodyPart::LeftElbow, BodyPart::LeftShoulder),
    (BodyPart::LeftElbow, BodyPart::LeftWrist),
    (BodyPart::LeftHip, BodyPart::LeftKnee),
    (BodyPart::LeftKnee, BodyPart::LeftAnkle),
    (BodyPart::RightHip, BodyPart::RightShoulder),
    (BodyPart::RightElbow, BodyPart::RightShoulder),
    (BodyPart::RightElbow, BodyPart::RightWrist),
    (BodyPart::RightHip, BodyPart::RightKnee),
    (BodyPart::RightKnee, BodyPart::RightAnkle),
    (BodyPart::LeftShoulder, BodyPart::RightShoulder),
    (BodyPart::LeftHip, BodyPart::RightHip),
];

pub const SKELETON_LINE_THICKNESS: i32 = 3;
const POINT_RADIUS: i32 = 4;
const LINE_COLOR: [u8; 4] = [236, 72, 153, 255];
const POINT_COLOR: [u8; 4] = [59, 130, 246, 255];

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderablePose {
    pub points: Vec<Keypoint>,
    pub lines: Vec<(Position, Position)>,
}

impl RenderablePose {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty() && self.lines.is_empty()
    }
}

/// Keeps keypoints scoring strictly above `min_score` and the edges whose
/// endpoints both survive.
pub fn render_pose(pose: Option<&Pose>, edges: &[SkeletonEdge], min_score: f32) -> RenderablePose {
    let Some(pose) = pose else {
        return RenderablePose::default();
    };

    let confident = |part: BodyPart| {
        pose.keypoint(part)
            .filter(|k| k.score > min_score)
            .map(|k| k.position)
    };

    let points = pose
        .keypoints
        .iter()
        .filter(|k| k.score > min_score)
        .copied()
        .collect();

    let lines = edges
        .iter()
        .filter_map(|&(a, b)| Some((confident(a)?, confident(b)?)))
        .collect();

    RenderablePose { points, lines }
}

/// Rasterises an overlay onto an RGBA buffer. `scale` maps tensor-space
/// coordinates to buffer pixels.
pub fn draw_overlay(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    overlay: &RenderablePose,
    scale: (f32, f32),
) {
    let (sx, sy) = scale;
    let to_px = |p: &Position| (p.x * sx, p.y * sy);

    for (a, b) in &overlay.lines {
        draw_line(
            buffer,
            width,
            height,
            to_px(a),
            to_px(b),
            LINE_COLOR,
            SKELETON_LINE_THICKNESS,
        );
    }

    for keypoint in &overlay.points {
        let (x, y) = to_px(&keypoint.position);
        draw_circle(
            buffer,
            width,
            height,
            (x as i32, y as i32),
            POINT_RADIUS,
            POINT_COLOR,
        );
    }
}

fn draw_line(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    p0: (f32, f32),
    p1: (f32, f32),
    color: [u8; 4],
    thickness: i32,
) {
    let (mut x0, mut y0) = (p0.0 as i32, p0.1 as i32);
    let (x1, y1) = (p1.0 as i32, p1.1 as i32);
    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let radius = (thickness.max(1) - 1) / 2;

    loop {
        for ox in -radius..=radius {
            for oy in -radius..=radius {
                if ox.abs() + oy.abs() <= radius {
                    put_pixel_safe(buffer, width, height, x0 + ox, y0 + oy, color);
                }
            }
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn draw_circle(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    center: (i32, i32),
    radius: i32,
    color: [u8; 4],
) {
    let (cx, cy) = center;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                put_pixel_safe(buffer, width, height, cx + dx, cy + dy, color);
            }
        }
    }
}

fn put_pixel_safe(buffer: &mut [u8], width: u32, height: u32, x: i32, y: i32, color: [u8; 4]) {
    if x < 0 || y < 0 {
        return;
    }
    let (ux, uy) = (x as u32, y as u32);
    if ux >= width || uy >= height {
        return;
    }
    let idx = ((uy * width + ux) as usize) * 4;
    if idx + 3 < buffer.len() {
        buffer[idx..idx + 4].copy_from_slice(&color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kp(part: BodyPart, x: f32, y: f32, score: f32) -> Keypoint {
        Keypoint {
            part,
            position: Position::new(x, y),
            score,
        }
    }

    fn face_pose() -> Pose {
        Pose::from_keypoints(vec![
            kp(BodyPart::Nose, 10.0, 10.0, 0.9),
            kp(BodyPart::LeftEye, 12.0, 8.0, 0.95),
            kp(BodyPart::LeftEar, 15.0, 9.0, 0.3),
        ])
    }

    const FACE_EDGES: &[SkeletonEdge] = &[
        (BodyPart::Nose, BodyPart::LeftEye),
        (BodyPart::LeftEye, BodyPart::LeftEar),
    ];

    #[test]
    fn no_pose_renders_nothing() {
        assert!(render_pose(None, CONNECTIONS, 0.7).is_empty());
    }

    #[test]
    fn filters_low_confidence_points_and_edges() {
        let pose = face_pose();
        let overlay = render_pose(Some(&pose), FACE_EDGES, 0.7);

        let parts: Vec<_> = overlay.points.iter().map(|k| k.part).collect();
        assert_eq!(parts, vec![BodyPart::Nose, BodyPart::LeftEye]);
        assert_eq!(
            overlay.lines,
            vec![(Position::new(10.0, 10.0), Position::new(12.0, 8.0))]
        );
    }

    #[test]
    fn edge_needs_both_endpoints() {
        let pose = Pose::from_keypoints(vec![
            kp(BodyPart::LeftShoulder, 0.0, 0.0, 0.5),
            kp(BodyPart::LeftElbow, 5.0, 5.0, 0.9),
        ]);
        let overlay = render_pose(Some(&pose), CONNECTIONS, 0.7);
        assert_eq!(overlay.points.len(), 1);
        assert!(overlay.lines.is_empty());
    }

    #[test]
    fn threshold_is_strict() {
        let pose = Pose::from_keypoints(vec![kp(BodyPart::Nose, 0.0, 0.0, 0.7)]);
        assert!(render_pose(Some(&pose), CONNECTIONS, 0.7).points.is_empty());
    }

    #[test]
    fn raising_threshold_never_adds_output() {
        let pose = Pose::from_keypoints(
            BodyPart::ALL
                .iter()
                .enumerate()
                .map(|(i, &part)| kp(part, i as f32, i as f32, i as f32 / 16.0))
                .collect(),
        );
        let mut last = (usize::MAX, usize::MAX);
        for step in 0..=20 {
            let overlay = render_pose(Some(&pose), CONNECTIONS, step as f32 / 20.0);
            let counts = (overlay.points.len(), overlay.lines.len());
            assert!(counts.0 <= last.0 && counts.1 <= last.1);
            last = counts;
        }
    }

    #[test]
    fn rendering_is_idempotent() {
        let pose = face_pose();
        let first = render_pose(Some(&pose), FACE_EDGES, 0.7);
        let second = render_pose(Some(&pose), FACE_EDGES, 0.7);
        assert_eq!(first, second);
    }

    #[test]
    fn draws_points_and_lines_inside_bounds() {
        let (width, height) = (32u32, 32u32);
        let mut buffer = vec![0u8; (width * height * 4) as usize];
        let overlay = RenderablePose {
            points: vec![kp(BodyPart::Nose, 4.0, 4.0, 0.9)],
            lines: vec![(Position::new(2.0, 20.0), Position::new(40.0, 20.0))],
        };
        draw_overlay(&mut buffer, width, height, &overlay, (2.0, 1.0));

        let pixel = |x: u32, y: u32| {
            let idx = ((y * width + x) * 4) as usize;
            [buffer[idx], buffer[idx + 1], buffer[idx + 2], buffer[idx + 3]]
        };
        assert_eq!(pixel(8, 4), POINT_COLOR);
        assert_eq!(pixel(10, 20), LINE_COLOR);
        assert_eq!(pixel(31, 20), LINE_COLOR);
        assert_eq!(pixel(0, 0), [0, 0, 0, 0]);
    }
}
