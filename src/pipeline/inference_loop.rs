use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError};

use super::{model::PoseModel, tensor::{TensorConverter, TensorLedger}};
use crate::{
    error::InferenceError,
    types::{Frame, Pose},
};

// How long an idle loop waits for a frame before re-checking the stop flag.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Busy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Updated,
    ConversionSkipped,
    InferenceFailed,
}

/// Single-slot holder for the most recent pose. Written only by the loop.
#[derive(Debug, Default)]
pub struct LatestPose {
    slot: Arc<Mutex<Option<Arc<Pose>>>>,
}

impl LatestPose {
    fn store(&self, pose: Pose) {
        let pose = Arc::new(pose);
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(pose);
    }

    pub fn reader(&self) -> PoseReader {
        PoseReader {
            slot: self.slot.clone(),
        }
    }
}

/// Read-only view of the latest pose, polled on every display tick.
#[derive(Clone, Debug)]
pub struct PoseReader {
    slot: Arc<Mutex<Option<Arc<Pose>>>>,
}

impl PoseReader {
    pub fn latest(&self) -> Option<Arc<Pose>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Clone, Debug, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, Default)]
pub struct LoopStats {
    inner: Arc<StatsCounters>,
}

#[derive(Debug, Default)]
struct StatsCounters {
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
    poses_updated: AtomicU64,
    conversion_failures: AtomicU64,
    inference_failures: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopStatsSnapshot {
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub poses_updated: u64,
    pub conversion_failures: u64,
    pub inference_failures: u64,
}

impl LoopStats {
    pub fn snapshot(&self) -> LoopStatsSnapshot {
        let c = &self.inner;
        LoopStatsSnapshot {
            frames_received: c.frames_received.load(Ordering::Relaxed),
            frames_dropped: c.frames_dropped.load(Ordering::Relaxed),
            poses_updated: c.poses_updated.load(Ordering::Relaxed),
            conversion_failures: c.conversion_failures.load(Ordering::Relaxed),
            inference_failures: c.inference_failures.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Idle/Busy scheduler that feeds frames to a pose model one at a time.
///
/// The loop owns the model, so only one estimate can be in flight. Each
/// iteration converts the newest frame, runs the model, publishes the pose on
/// success and releases the tensor whatever the outcome. Errors are logged
/// and never end the loop.
pub struct InferenceLoop<M: PoseModel> {
    model: M,
    converter: TensorConverter,
    state: LoopState,
    latest: LatestPose,
    stop: StopHandle,
    stats: LoopStats,
}

impl<M: PoseModel> InferenceLoop<M> {
    pub fn new(model: M, converter: TensorConverter) -> Self {
        InferenceLoop {
            model,
            converter,
            state: LoopState::Idle,
            latest: LatestPose::default(),
            stop: StopHandle::default(),
            stats: LoopStats::default(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn reader(&self) -> PoseReader {
        self.latest.reader()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn stats(&self) -> LoopStats {
        self.stats.clone()
    }

    pub fn ledger(&self) -> TensorLedger {
        self.converter.ledger().clone()
    }

    /// Runs one Idle -> Busy -> Idle cycle on `frame`.
    pub fn step(&mut self, frame: &Frame) -> StepOutcome {
        LoopStats::bump(&self.stats.inner.frames_received);

        let tensor = match self.converter.convert(frame) {
            Ok(tensor) => tensor,
            Err(err) => {
                log::warn!("skipping frame: {err}");
                LoopStats::bump(&self.stats.inner.conversion_failures);
                return StepOutcome::ConversionSkipped;
            }
        };

        self.state = LoopState::Busy;
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.model.estimate(&tensor)))
            .unwrap_or_else(|payload| Err(InferenceError::Panicked(panic_message(payload))));
        tensor.release();
        self.state = LoopState::Idle;

        match result {
            Ok(pose) => {
                log::trace!(
                    "pose updated (score {:.3}, {} keypoints)",
                    pose.score,
                    pose.keypoints.len()
                );
                self.latest.store(pose);
                LoopStats::bump(&self.stats.inner.poses_updated);
                StepOutcome::Updated
            }
            Err(err) => {
                log::warn!("pose inference failed: {err}");
                LoopStats::bump(&self.stats.inner.inference_failures);
                StepOutcome::InferenceFailed
            }
        }
    }

    /// Drives the loop until a stop is requested or the frame source hangs up.
    /// The stop flag is only checked while idle, both before waiting for a
    /// frame and before starting inference on one.
    pub fn run(&mut self, frame_rx: &Receiver<Frame>) {
        log::info!("inference loop started ({})", self.model.label());

        while !self.stop.is_stopped() {
            match recv_latest_frame(frame_rx, &self.stats) {
                Ok(_) if self.stop.is_stopped() => break,
                Ok(frame) => {
                    self.step(&frame);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    log::info!("frame source disconnected");
                    break;
                }
            }
        }

        let stats = self.stats.snapshot();
        log::info!(
            "inference loop stopped: {} frames, {} dropped, {} poses, {} skipped, {} failed",
            stats.frames_received,
            stats.frames_dropped,
            stats.poses_updated,
            stats.conversion_failures,
            stats.inference_failures
        );
    }
}

/// Waits for a frame, then skips ahead to the newest one queued.
fn recv_latest_frame(
    frame_rx: &Receiver<Frame>,
    stats: &LoopStats,
) -> Result<Frame, RecvTimeoutError> {
    let mut frame = frame_rx.recv_timeout(IDLE_POLL_INTERVAL)?;
    while let Ok(newer) = frame_rx.try_recv() {
        LoopStats::bump(&stats.inner.frames_dropped);
        frame = newer;
    }
    Ok(frame)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// A loop running on its own thread. Dropping the handle stops and joins it.
#[derive(Debug)]
pub struct InferenceHandle {
    stop: StopHandle,
    reader: PoseReader,
    stats: LoopStats,
    ledger: TensorLedger,
    handle: Option<thread::JoinHandle<()>>,
}

impl InferenceHandle {
    pub fn reader(&self) -> PoseReader {
        self.reader.clone()
    }

    pub fn stats(&self) -> LoopStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn ledger(&self) -> &TensorLedger {
        &self.ledger
    }

    pub fn request_stop(&self) {
        self.stop.stop();
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("inference thread panicked");
            }
        }
    }
}

impl Drop for InferenceHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub fn start_inference_loop<M: PoseModel>(
    model: M,
    converter: TensorConverter,
    frame_rx: Receiver<Frame>,
) -> InferenceHandle {
    let mut inference_loop = InferenceLoop::new(model, converter);
    let stop = inference_loop.stop_handle();
    let reader = inference_loop.reader();
    let stats = inference_loop.stats();
    let ledger = inference_loop.ledger();

    let handle = thread::spawn(move || inference_loop.run(&frame_rx));

    InferenceHandle {
        stop,
        reader,
        stats,
        ledger,
        handle: Some(handle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pipeline::tensor::InputTensor,
        types::{BodyPart, Keypoint, Position},
    };

    struct PanickingModel;

    impl PoseModel for PanickingModel {
        fn estimate(&mut self, _tensor: &InputTensor) -> Result<Pose, InferenceError> {
            panic!("numeric blow-up");
        }
    }

    fn frame() -> Frame {
        Frame::rgb(vec![0; 16 * 16 * 3], 16, 16)
    }

    #[test]
    fn panic_in_model_returns_loop_to_idle() {
        let converter = TensorConverter::new(152, 200, TensorLedger::new());
        let mut inference_loop = InferenceLoop::new(PanickingModel, converter);

        assert_eq!(inference_loop.step(&frame()), StepOutcome::InferenceFailed);
        assert_eq!(inference_loop.state(), LoopState::Idle);
        assert_eq!(inference_loop.step(&frame()), StepOutcome::InferenceFailed);

        let ledger = inference_loop.ledger().snapshot();
        assert_eq!((ledger.created, ledger.released, ledger.live), (2, 2, 0));
        assert!(inference_loop.reader().latest().is_none());
    }

    #[test]
    fn panic_message_extracts_strings() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7u8)), "unknown panic");
    }

    #[test]
    fn reader_sees_last_stored_pose_only() {
        let latest = LatestPose::default();
        let reader = latest.reader();
        assert!(reader.latest().is_none());

        let pose = |score| {
            Pose::from_keypoints(vec![Keypoint {
                part: BodyPart::Nose,
                position: Position::new(0.0, 0.0),
                score,
            }])
        };
        latest.store(pose(0.1));
        latest.store(pose(0.9));
        assert_eq!(reader.latest().map(|p| p.score), Some(0.9));
    }

    #[test]
    fn recv_latest_frame_skips_stale_frames() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let stats = LoopStats::default();
        for width in 1..=3 {
            tx.send(Frame::rgb(vec![0; width * 3], width as u32, 1)).unwrap();
        }
        let frame = recv_latest_frame(&rx, &stats).unwrap();
        assert_eq!(frame.width, 3);
        assert_eq!(stats.snapshot().frames_dropped, 2);

        drop(tx);
        assert!(matches!(
            recv_latest_frame(&rx, &stats),
            Err(RecvTimeoutError::Disconnected)
        ));
    }
}
