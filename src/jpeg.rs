// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! JPEG compression into a linearly growing buffer.
//!
//! The compressed size is not known until the encoder finishes, so the
//! encoder writes through a [`JpegSink`] that extends its [`JpegOutput`] by
//! one [`BLOCK_SIZE`] block whenever the current region is full.

use crate::error::{CameraError, Result};
use image::{codecs::jpeg::JpegEncoder, ExtendedColorType};
use std::io::{self, Write};
use tracing::{debug, error, instrument};

/// Growth increment of the JPEG buffer, also its initial size.
pub const BLOCK_SIZE: usize = 4096;

/// Holds the most recently encoded image.
///
/// The allocation is kept between encodes and only ever grows, up to an
/// optional limit. `as_slice` covers the logical image, which may be shorter
/// than the allocation.
#[derive(Debug)]
pub struct JpegOutput {
    buf: Vec<u8>,
    used: usize,
    limit: Option<usize>,
}

impl Default for JpegOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl JpegOutput {
    pub fn new() -> Self {
        Self {
            buf: vec![0; BLOCK_SIZE],
            used: 0,
            limit: None,
        }
    }

    /// An output that refuses to grow past `limit` bytes, rounded up to a
    /// whole block.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit.max(BLOCK_SIZE)),
            ..Self::new()
        }
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// The encoded image.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.used]
    }

    pub fn len(&self) -> usize {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Bytes currently allocated.
    pub fn allocated(&self) -> usize {
        self.buf.len()
    }
}

/// Destination handed to the encoder for a single encode call.
pub struct JpegSink<'a> {
    out: &'a mut JpegOutput,
    next: usize,
    free: usize,
}

impl<'a> JpegSink<'a> {
    /// Points the cursor at the start of `out` with all of it free.
    pub fn init(out: &'a mut JpegOutput) -> Self {
        let free = out.buf.len();
        Self { out, next: 0, free }
    }

    /// Extends the output by one block and points the cursor at it.
    ///
    /// Called only when no free space is left. The existing bytes are
    /// untouched if the allocation fails or the limit would be exceeded.
    pub fn handle_full(&mut self) -> io::Result<()> {
        let old = self.out.buf.len();
        if let Some(limit) = self.out.limit {
            if old + BLOCK_SIZE > limit.next_multiple_of(BLOCK_SIZE) {
                error!("jpeg exceeds the {limit} byte output limit");
                return Err(io::Error::new(
                    io::ErrorKind::OutOfMemory,
                    format!("jpeg output limited to {limit} bytes"),
                ));
            }
        }
        self.out.buf.try_reserve_exact(BLOCK_SIZE).map_err(|e| {
            error!("jpeg buffer growth to {} bytes failed: {e}", old + BLOCK_SIZE);
            io::Error::new(io::ErrorKind::OutOfMemory, e)
        })?;
        self.out.buf.resize(old + BLOCK_SIZE, 0);
        self.next = old;
        self.free = BLOCK_SIZE;
        Ok(())
    }

    /// Records the logical image length and returns it.
    pub fn finish(self) -> usize {
        self.out.used = self.out.buf.len() - self.free;
        self.out.used
    }

    pub fn free(&self) -> usize {
        self.free
    }
}

impl Write for JpegSink<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        if self.free == 0 {
            self.handle_full()?;
        }
        let n = data.len().min(self.free);
        self.out.buf[self.next..self.next + n].copy_from_slice(&data[..n]);
        self.next += n;
        self.free -= n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Compresses a packed RGB888 frame into `out` as a baseline JPEG.
///
/// `quality` is clamped to 1..=100. If the encoder fails `out` is left
/// empty, since the previous image may have been partially overwritten.
#[instrument(skip(out, rgb))]
pub fn encode(
    out: &mut JpegOutput,
    rgb: &[u8],
    width: u32,
    height: u32,
    quality: u8,
) -> Result<usize> {
    let expected = width as usize * height as usize * 3;
    if rgb.len() != expected {
        return Err(CameraError::FrameSize {
            expected,
            actual: rgb.len(),
        });
    }

    let mut sink = JpegSink::init(out);
    let encoded = JpegEncoder::new_with_quality(&mut sink, quality.clamp(1, 100)).encode(
        rgb,
        width,
        height,
        ExtendedColorType::Rgb8,
    );
    match encoded {
        Ok(()) => {
            let size = sink.finish();
            debug!("jpeg {}x{} q{} {} bytes", width, height, quality, size);
            Ok(size)
        }
        Err(e) => {
            drop(sink);
            out.used = 0;
            Err(CameraError::Encode(e))
        }
    }
}
