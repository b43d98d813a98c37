use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use fast_image_resize as fir;
use ndarray::{Array3, ArrayView3};
use rayon::prelude::*;

use crate::{config::INPUT_CHANNELS, error::ConversionError, types::Frame};

/// Counts tensor allocations so leaks and double releases are observable.
#[derive(Clone, Debug, Default)]
pub struct TensorLedger {
    inner: Arc<LedgerCounts>,
}

#[derive(Debug, Default)]
struct LedgerCounts {
    created: AtomicUsize,
    released: AtomicUsize,
    live: AtomicUsize,
    peak_live: AtomicUsize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub created: usize,
    pub released: usize,
    pub live: usize,
    pub peak_live: usize,
}

impl TensorLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            created: self.inner.created.load(Ordering::SeqCst),
            released: self.inner.released.load(Ordering::SeqCst),
            live: self.inner.live.load(Ordering::SeqCst),
            peak_live: self.inner.peak_live.load(Ordering::SeqCst),
        }
    }

    fn on_create(&self) {
        self.inner.created.fetch_add(1, Ordering::SeqCst);
        let live = self.inner.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak_live.fetch_max(live, Ordering::SeqCst);
    }

    fn on_release(&self) {
        self.inner.released.fetch_add(1, Ordering::SeqCst);
        self.inner.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Model input of shape (height, width, 3) with pixel values in [0, 255].
///
/// The backing buffer is freed exactly once: either through [`release`]
/// or, on any other exit path, when the tensor is dropped.
///
/// [`release`]: InputTensor::release
#[derive(Debug)]
pub struct InputTensor {
    data: Array3<f32>,
    ledger: TensorLedger,
}

impl InputTensor {
    pub fn view(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    /// (height, width, channels)
    pub fn shape(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn width(&self) -> usize {
        self.data.dim().1
    }

    pub fn height(&self) -> usize {
        self.data.dim().0
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for InputTensor {
    fn drop(&mut self) {
        self.ledger.on_release();
    }
}

pub struct TensorConverter {
    width: u32,
    height: u32,
    resizer: fir::Resizer,
    ledger: TensorLedger,
}

impl TensorConverter {
    pub fn new(width: u32, height: u32, ledger: TensorLedger) -> Self {
        TensorConverter {
            width,
            height,
            resizer: fir::Resizer::new(),
            ledger,
        }
    }

    pub fn ledger(&self) -> &TensorLedger {
        &self.ledger
    }

    pub fn target_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Stretches the frame to the target resolution and drops any alpha channel.
    pub fn convert(&mut self, frame: &Frame) -> Result<InputTensor, ConversionError> {
        if frame.width == 0 || frame.height == 0 {
            return Err(ConversionError::EmptyFrame {
                width: frame.width,
                height: frame.height,
            });
        }
        let pixel_type = match frame.channels {
            3 => fir::PixelType::U8x3,
            4 => fir::PixelType::U8x4,
            other => return Err(ConversionError::UnsupportedChannels(other)),
        };
        let expected = frame.expected_len();
        if frame.pixels.len() != expected {
            return Err(ConversionError::BufferSizeMismatch {
                got: frame.pixels.len(),
                expected,
            });
        }

        let resized;
        let pixels: &[u8] = if frame.width == self.width && frame.height == self.height {
            &frame.pixels
        } else {
            let src_image =
                fir::images::ImageRef::new(frame.width, frame.height, &frame.pixels, pixel_type)
                    .map_err(|err| ConversionError::Resize(err.to_string()))?;
            let mut dst_image = fir::images::Image::new(self.width, self.height, pixel_type);
            let resize_options = fir::ResizeOptions::new()
                .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
            self.resizer
                .resize(&src_image, &mut dst_image, Some(&resize_options))
                .map_err(|err| ConversionError::Resize(err.to_string()))?;
            resized = dst_image.into_vec();
            &resized
        };

        let values: Vec<f32> = pixels
            .par_chunks_exact(frame.channels as usize)
            .flat_map_iter(|px| [px[0] as f32, px[1] as f32, px[2] as f32])
            .collect();
        let data = Array3::from_shape_vec(
            (
                self.height as usize,
                self.width as usize,
                INPUT_CHANNELS as usize,
            ),
            values,
        )
        .map_err(|err| ConversionError::Resize(format!("failed to build input tensor: {err}")))?;

        self.ledger.on_create();
        Ok(InputTensor {
            data,
            ledger: self.ledger.clone(),
        })
    }
}
