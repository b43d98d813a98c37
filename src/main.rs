use std::{
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow};
use pose_overlay::{
    config::{ModelConfig, OverlayConfig},
    model_download::ensure_model_ready,
    pipeline::{
        CONNECTIONS, InferenceLoop, OrtPoseNet, PoseReader, StepOutcome, TensorConverter,
        TensorLedger, draw_overlay, inference_loop::LoopStatsSnapshot, render_pose,
    },
    types::Frame,
};

const RENDER_INTERVAL: Duration = Duration::from_millis(33);
const STATS_INTERVAL: Duration = Duration::from_secs(5);

enum Mode {
    Live {
        back_camera: bool,
        duration: Option<Duration>,
    },
    Image {
        input: PathBuf,
        output: PathBuf,
    },
}

fn parse_args() -> Result<Mode> {
    let mut args = std::env::args().skip(1);
    let mut back_camera = false;
    let mut duration = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--image" => {
                let input = args
                    .next()
                    .map(PathBuf::from)
                    .ok_or_else(|| anyhow!("--image needs an input path"))?;
                let output = args
                    .next()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| input.with_extension("pose.png"));
                return Ok(Mode::Image { input, output });
            }
            "--back" => back_camera = true,
            "--seconds" => {
                let secs = args
                    .next()
                    .and_then(|s| s.parse::<u64>().ok())
                    .ok_or_else(|| anyhow!("--seconds needs a whole number"))?;
                duration = Some(Duration::from_secs(secs));
            }
            other => return Err(anyhow!("unknown argument {other:?}")),
        }
    }

    Ok(Mode::Live {
        back_camera,
        duration,
    })
}

fn load_model(config: &ModelConfig) -> Result<OrtPoseNet> {
    ensure_model_ready(&config.model_path, config.model_url.as_deref(), |_evt| {})?;
    OrtPoseNet::new(config.clone())
}

fn converter_for(config: &ModelConfig) -> TensorConverter {
    TensorConverter::new(config.input_width, config.input_height, TensorLedger::new())
}

fn main() -> Result<()> {
    env_logger::init();

    let model_config = ModelConfig::from_env();
    let overlay_config = OverlayConfig::from_env();

    match parse_args()? {
        Mode::Image { input, output } => {
            run_on_image(&input, &output, &model_config, &overlay_config)
        }
        Mode::Live {
            back_camera,
            duration,
        } => run_live(back_camera, duration, &model_config, &overlay_config),
    }
}

fn run_on_image(
    input: &Path,
    output: &Path,
    model_config: &ModelConfig,
    overlay_config: &OverlayConfig,
) -> Result<()> {
    let image = image::open(input).with_context(|| format!("failed to open {}", input.display()))?;
    let frame = Frame::from_image(&image);

    let model = load_model(model_config)?;
    let mut inference_loop = InferenceLoop::new(model, converter_for(model_config));
    match inference_loop.step(&frame) {
        StepOutcome::Updated => {}
        outcome => return Err(anyhow!("no pose estimated for {}: {outcome:?}", input.display())),
    }

    let pose = inference_loop.reader().latest();
    let overlay = render_pose(
        pose.as_deref(),
        CONNECTIONS,
        overlay_config.min_keypoint_score,
    );
    log::info!(
        "{}: pose score {:.3}, {} points, {} lines",
        input.display(),
        pose.as_ref().map(|p| p.score).unwrap_or(0.0),
        overlay.points.len(),
        overlay.lines.len()
    );

    let mut canvas = image.to_rgba8();
    let (width, height) = canvas.dimensions();
    let scale = (
        width as f32 / model_config.input_width as f32,
        height as f32 / model_config.input_height as f32,
    );
    draw_overlay(&mut canvas, width, height, &overlay, scale);
    canvas
        .save(output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    log::info!("wrote {}", output.display());
    Ok(())
}

#[cfg(feature = "camera-nokhwa")]
fn run_live(
    back_camera: bool,
    duration: Option<Duration>,
    model_config: &ModelConfig,
    overlay_config: &OverlayConfig,
) -> Result<()> {
    use crossbeam_channel::bounded;
    use pose_overlay::pipeline::{CameraSession, FacingMode, start_inference_loop};

    let (frame_tx, frame_rx) = bounded(1);
    let facing = if back_camera {
        FacingMode::Back
    } else {
        FacingMode::Front
    };
    let camera = CameraSession::start(facing, frame_tx)?;

    let model = load_model(model_config)?;
    let inference = start_inference_loop(model, converter_for(model_config), frame_rx);

    render_until(
        inference.reader(),
        overlay_config,
        duration,
        || inference.stats(),
    );

    drop(camera);
    let ledger = inference.ledger().snapshot();
    inference.stop();
    log::info!(
        "tensors created {}, released {}, peak in flight {}",
        ledger.created,
        ledger.released,
        ledger.peak_live
    );
    Ok(())
}

#[cfg(not(feature = "camera-nokhwa"))]
fn run_live(
    _back_camera: bool,
    _duration: Option<Duration>,
    _model_config: &ModelConfig,
    _overlay_config: &OverlayConfig,
) -> Result<()> {
    Err(anyhow!(
        "built without the camera-nokhwa feature; use --image <path> instead"
    ))
}

/// Polls the latest pose on every display tick, as a UI would.
#[cfg_attr(not(feature = "camera-nokhwa"), allow(dead_code))]
fn render_until<F>(
    reader: PoseReader,
    overlay_config: &OverlayConfig,
    duration: Option<Duration>,
    stats: F,
) where
    F: Fn() -> LoopStatsSnapshot,
{
    let started = Instant::now();
    let mut last_stats = Instant::now();

    while duration.is_none_or(|limit| started.elapsed() < limit) {
        let pose = reader.latest();
        let overlay = render_pose(
            pose.as_deref(),
            CONNECTIONS,
            overlay_config.min_keypoint_score,
        );
        log::debug!(
            "overlay: {} points, {} lines",
            overlay.points.len(),
            overlay.lines.len()
        );

        if last_stats.elapsed() >= STATS_INTERVAL {
            let snapshot = stats();
            log::info!(
                "frames {} (dropped {}), poses {}, failures {}",
                snapshot.frames_received,
                snapshot.frames_dropped,
                snapshot.poses_updated,
                snapshot.conversion_failures + snapshot.inference_failures
            );
            last_stats = Instant::now();
        }

        thread::sleep(RENDER_INTERVAL);
    }
}
