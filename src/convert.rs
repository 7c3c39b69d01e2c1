// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Packed YUV 4:2:2 to RGB888 conversion.

use crate::error::{CameraError, Result};

/// Bytes per pixel of packed YUYV.
pub const YUYV_BPP: usize = 2;

/// Bytes per pixel of packed RGB888.
pub const RGB_BPP: usize = 3;

#[inline]
fn clip(x: f64) -> u8 {
    x.clamp(0.0, 255.0) as u8
}

/// Converts one YUV sample to RGB with BT.601 constants, saturating each
/// channel before truncation.
#[inline]
pub fn yuv_to_rgb(y: u8, cb: u8, cr: u8) -> [u8; 3] {
    let y = f64::from(y);
    let cb = f64::from(cb) - 128.0;
    let cr = f64::from(cr) - 128.0;
    [
        clip(y + 1.402 * cr),
        clip(y - 0.344 * cb - 0.714 * cr),
        clip(y + 1.772 * cb),
    ]
}

/// Converts a YUYV frame into packed RGB888.
///
/// Each 4 byte group `Y0 Cb Y1 Cr` encodes two horizontally adjacent pixels
/// sharing one chroma pair. `stride` is the source line length in bytes and
/// may exceed `width * 2` when the driver pads lines.
///
/// # Errors
///
/// Returns [`CameraError::FrameSize`] if `width` is odd, `stride` is shorter
/// than a line, `src` does not cover the frame, or `dst` is not exactly
/// `width * height * 3` bytes.
pub fn yuyv_to_rgb(
    width: usize,
    height: usize,
    stride: usize,
    src: &[u8],
    dst: &mut [u8],
) -> Result<()> {
    let line = width * YUYV_BPP;
    if width % 2 != 0 || stride < line {
        return Err(CameraError::FrameSize {
            expected: line,
            actual: stride,
        });
    }

    let needed = match height {
        0 => 0,
        h => stride * (h - 1) + line,
    };
    if src.len() < needed {
        return Err(CameraError::FrameSize {
            expected: needed,
            actual: src.len(),
        });
    }

    let out_len = width * height * RGB_BPP;
    if dst.len() != out_len {
        return Err(CameraError::FrameSize {
            expected: out_len,
            actual: dst.len(),
        });
    }

    if out_len == 0 {
        return Ok(());
    }

    for (row, out) in dst.chunks_exact_mut(width * RGB_BPP).enumerate() {
        let start = row * stride;
        let yuyv = &src[start..start + line];
        for (group, pixels) in yuyv.chunks_exact(4).zip(out.chunks_exact_mut(2 * RGB_BPP)) {
            let (y0, cb, y1, cr) = (group[0], group[1], group[2], group[3]);
            pixels[..3].copy_from_slice(&yuv_to_rgb(y0, cb, cr));
            pixels[3..].copy_from_slice(&yuv_to_rgb(y1, cb, cr));
        }
    }

    Ok(())
}

/// RGB888 frame reused across captures.
///
/// The backing allocation changes only when the frame dimensions do.
#[derive(Debug, Default)]
pub struct RgbFrame {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl RgbFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sizes the frame for `width` x `height` and returns its pixels.
    pub fn prepare(&mut self, width: u32, height: u32) -> Result<&mut [u8]> {
        if self.width != width || self.height != height || self.data.is_empty() {
            let size = width as usize * height as usize * RGB_BPP;
            let mut data = Vec::new();
            data.try_reserve_exact(size)
                .map_err(|_| CameraError::OutOfMemory("rgb frame"))?;
            data.resize(size, 0);
            self.data = data;
            self.width = width;
            self.height = height;
        }
        Ok(&mut self.data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }
}
