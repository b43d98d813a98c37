use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Instant,
};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Sender, TrySendError};
use nokhwa::{
    Camera,
    pixel_format::RgbFormat,
    query,
    utils::{
        ApiBackend, CameraIndex, CameraInfo, FrameFormat, RequestedFormat, RequestedFormatType,
    },
};

use super::decode;
use crate::{error::PipelineError, types::Frame};

// Prefer pixel formats that are widely supported on macOS (the built-in cameras
// often reject YUYV even though Nokhwa reports it).
const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
    FrameFormat::RAWRGB,
    FrameFormat::RAWBGR,
    FrameFormat::GRAY,
    FrameFormat::YUYV,
    FrameFormat::NV12,
    FrameFormat::MJPEG,
];

fn requested_formats() -> [RequestedFormat<'static>; 3] {
    [
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestFrameRate,
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    ]
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FacingMode {
    #[default]
    Front,
    Back,
}

impl FacingMode {
    pub fn toggled(self) -> Self {
        match self {
            FacingMode::Front => FacingMode::Back,
            FacingMode::Back => FacingMode::Front,
        }
    }

    /// Desktop backends expose no facing metadata: the first device is
    /// treated as the front camera and the second as the back one.
    fn pick(self, devices: &[CameraDevice]) -> Option<&CameraDevice> {
        match self {
            FacingMode::Front => devices.first(),
            FacingMode::Back => devices.get(1).or_else(|| devices.first()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CameraDevice {
    pub index: CameraIndex,
    pub label: String,
}

/// Returns `PermissionDenied` when the OS refuses camera access.
pub fn check_permission() -> Result<(), PipelineError> {
    if nokhwa::nokhwa_check() {
        Ok(())
    } else {
        Err(PipelineError::PermissionDenied)
    }
}

pub fn available_cameras() -> Result<Vec<CameraDevice>> {
    let cameras = query(ApiBackend::Auto).context("failed to enumerate cameras")?;
    Ok(cameras
        .into_iter()
        .map(|info| CameraDevice {
            index: info.index().clone(),
            label: format_camera_label(&info),
        })
        .collect())
}

fn format_camera_label(info: &CameraInfo) -> String {
    info.human_name()
}

fn build_camera(index: CameraIndex) -> Result<Camera> {
    let mut last_err = None;

    for requested in requested_formats() {
        match Camera::new(index.clone(), requested) {
            Ok(mut camera) => match camera.open_stream() {
                Ok(()) => return Ok(camera),
                Err(err) => last_err = Some(err.into()),
            },
            Err(err) => last_err = Some(err.into()),
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("failed to open camera with any supported format")))
}

#[derive(Debug)]
pub struct CameraStream {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CameraStream {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Captures frames on a dedicated thread. Frames are offered with
/// `try_send`, so a busy consumer causes drops rather than a backlog.
pub fn start_camera_stream(index: CameraIndex, frame_tx: Sender<Frame>) -> Result<CameraStream> {
    // Fail fast before spawning the capture thread.
    build_camera(index.clone())?;

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();

    let handle = thread::spawn(move || {
        let mut camera = match build_camera(index) {
            Ok(cam) => cam,
            Err(err) => {
                log::error!("failed to open camera: {err:?}");
                return;
            }
        };

        while !stop_flag.load(Ordering::Relaxed) {
            let frame_start = Instant::now();
            let buffer = match camera.frame() {
                Ok(buffer) => buffer,
                Err(err) => {
                    log::warn!(
                        "camera frame read failed (after {:?}): {err:?}",
                        frame_start.elapsed()
                    );
                    continue;
                }
            };

            let frame = match decode::decode_camera_buffer(&buffer) {
                Ok(frame) => frame,
                Err(err) => {
                    log::warn!("failed to decode camera frame: {err:?}");
                    continue;
                }
            };

            // Drop if the inference loop is busy, otherwise forward every frame.
            if let Err(TrySendError::Disconnected(_)) = frame_tx.try_send(frame) {
                log::info!("frame consumer disconnected, stopping capture");
                break;
            }
        }

        if let Err(err) = camera.stop_stream() {
            log::warn!("failed to stop camera stream: {err:?}");
        }
    });

    Ok(CameraStream {
        stop,
        handle: Some(handle),
    })
}

/// The active camera plus its facing mode. Switching facing restarts the
/// capture thread but keeps the same frame channel, so downstream consumers
/// are unaffected.
pub struct CameraSession {
    facing: FacingMode,
    frame_tx: Sender<Frame>,
    stream: Option<CameraStream>,
}

impl CameraSession {
    pub fn start(facing: FacingMode, frame_tx: Sender<Frame>) -> Result<Self> {
        check_permission()?;
        let mut session = CameraSession {
            facing,
            frame_tx,
            stream: None,
        };
        session.restart()?;
        Ok(session)
    }

    pub fn facing(&self) -> FacingMode {
        self.facing
    }

    pub fn switch_facing(&mut self) -> Result<FacingMode> {
        self.facing = self.facing.toggled();
        self.restart()?;
        Ok(self.facing)
    }

    fn restart(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            stream.stop();
        }

        let devices = available_cameras()?;
        let device = self
            .facing
            .pick(&devices)
            .ok_or_else(|| PipelineError::Camera("no camera available".to_string()))?;
        log::info!("starting {:?} camera: {}", self.facing, device.label);

        let stream = start_camera_stream(device.index.clone(), self.frame_tx.clone())
            .with_context(|| format!("failed to start camera {}", device.label))?;
        self.stream = Some(stream);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(idx: u32) -> CameraDevice {
        CameraDevice {
            index: CameraIndex::Index(idx),
            label: format!("cam{idx}"),
        }
    }

    #[test]
    fn toggling_facing_alternates() {
        assert_eq!(FacingMode::Front.toggled(), FacingMode::Back);
        assert_eq!(FacingMode::Back.toggled().toggled(), FacingMode::Back);
    }

    #[test]
    fn picks_devices_by_facing() {
        let devices = vec![device(0), device(1)];
        assert_eq!(FacingMode::Front.pick(&devices).unwrap().label, "cam0");
        assert_eq!(FacingMode::Back.pick(&devices).unwrap().label, "cam1");

        let single = vec![device(0)];
        assert_eq!(FacingMode::Back.pick(&single).unwrap().label, "cam0");
        assert!(FacingMode::Front.pick(&[]).is_none());
    }
}
