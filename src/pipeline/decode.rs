//! Camera buffer decoding into packed RGB frames.

use anyhow::{Result, anyhow};
use nokhwa::{Buffer, utils::FrameFormat};
use rayon::prelude::*;
use yuv::{
    YuvBiPlanarImage, YuvConversionMode, YuvPackedImage, YuvRange, YuvStandardMatrix,
    yuv_nv12_to_rgb, yuyv422_to_rgb,
};
use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

use crate::types::Frame;

pub fn decode_camera_buffer(buffer: &Buffer) -> Result<Frame> {
    let resolution = buffer.resolution();
    let (width, height) = (resolution.width_x, resolution.height_y);
    let data = buffer.buffer();

    let rgb = match buffer.source_frame_format() {
        FrameFormat::NV12 => nv12_to_rgb(data, width, height)?,
        FrameFormat::YUYV => yuyv_to_rgb(data, width, height)?,
        FrameFormat::MJPEG => mjpeg_to_rgb(data, width, height)?,
        FrameFormat::RAWRGB => packed_rgb(data, width, height, false)?,
        FrameFormat::RAWBGR => packed_rgb(data, width, height, true)?,
        FrameFormat::GRAY => gray_to_rgb(data, width, height)?,
    };

    Ok(Frame::rgb(rgb, width, height))
}

fn nv12_to_rgb(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let y_len = width as usize * height as usize;
    let uv_len = y_len / 2;
    if data.len() < y_len + uv_len {
        return Err(anyhow!(
            "NV12 buffer too small: got {}, expected {}",
            data.len(),
            y_len + uv_len
        ));
    }

    let image = YuvBiPlanarImage {
        y_plane: &data[..y_len],
        y_stride: width,
        uv_plane: &data[y_len..y_len + uv_len],
        uv_stride: width,
        width,
        height,
    };
    let mut rgb = vec![0u8; y_len * 3];
    yuv_nv12_to_rgb(
        &image,
        &mut rgb,
        width * 3,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
        YuvConversionMode::Balanced,
    )
    .map_err(|err| anyhow!("NV12 to RGB failed: {err:?}"))?;

    Ok(rgb)
}

fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let expected = width as usize * height as usize * 2;
    if data.len() < expected {
        return Err(anyhow!(
            "YUYV buffer too small: got {}, expected {expected}",
            data.len()
        ));
    }

    let packed = YuvPackedImage {
        yuy: data,
        yuy_stride: width * 2,
        width,
        height,
    };
    let mut rgb = vec![0u8; width as usize * height as usize * 3];
    yuyv422_to_rgb(
        &packed,
        &mut rgb,
        width * 3,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
    )
    .map_err(|err| anyhow!("YUYV422 to RGB failed: {err:?}"))?;

    Ok(rgb)
}

fn mjpeg_to_rgb(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGB);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let rgb = decoder
        .decode()
        .map_err(|err| anyhow!("MJPEG decode failed: {err:?}"))?;

    if let Some(info) = decoder.info() {
        if (info.width as u32, info.height as u32) != (width, height) {
            return Err(anyhow!(
                "MJPEG frame is {}x{}, camera reported {width}x{height}",
                info.width,
                info.height
            ));
        }
    }
    let expected = usize::try_from(width)
        .and_then(|w| usize::try_from(height).map(|h| w * h * 3))
        .map_err(|_| anyhow!("MJPEG dimensions do not fit usize"))?;
    if rgb.len() < expected {
        return Err(anyhow!(
            "MJPEG decode produced too few bytes: got {}, expected {expected}",
            rgb.len()
        ));
    }

    Ok(rgb)
}

fn packed_rgb(data: &[u8], width: u32, height: u32, swap_rb: bool) -> Result<Vec<u8>> {
    let expected = width as usize * height as usize * 3;
    if data.len() < expected {
        return Err(anyhow!(
            "RGB buffer too small: got {}, expected {expected}",
            data.len()
        ));
    }

    let mut rgb = data[..expected].to_vec();
    if swap_rb {
        rgb.par_chunks_exact_mut(3).for_each(|px| px.swap(0, 2));
    }
    Ok(rgb)
}

fn gray_to_rgb(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let expected = width as usize * height as usize;
    if data.len() < expected {
        return Err(anyhow!(
            "GRAY buffer too small: got {}, expected {expected}",
            data.len()
        ));
    }

    let mut rgb = vec![0u8; expected * 3];
    rgb.par_chunks_exact_mut(3)
        .zip(data[..expected].par_iter().copied())
        .for_each(|(dst, value)| dst.fill(value));
    Ok(rgb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgr_is_swapped_to_rgb() {
        let rgb = packed_rgb(&[1, 2, 3, 4, 5, 6], 2, 1, true).unwrap();
        assert_eq!(rgb, vec![3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn gray_is_replicated_across_channels() {
        let rgb = gray_to_rgb(&[9, 200], 2, 1).unwrap();
        assert_eq!(rgb, vec![9, 9, 9, 200, 200, 200]);
    }

    #[test]
    fn short_buffers_are_rejected() {
        assert!(packed_rgb(&[0; 5], 2, 1, false).is_err());
        assert!(gray_to_rgb(&[0; 3], 2, 2).is_err());
        assert!(yuyv_to_rgb(&[0; 7], 2, 2).is_err());
        assert!(nv12_to_rgb(&[0; 5], 2, 2).is_err());
    }
}
