// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! The kernel boundary.
//!
//! Every call the capture engine makes to a video device goes through the
//! [`Driver`] trait, so the state machine, buffer pools and capture loop can
//! run against [`crate::V4l2Driver`] in production or a scripted double in
//! tests. Errors are plain [`std::io::Error`] values carrying the raw `errno`
//! so callers can tell `EINTR`, `EAGAIN`, `EIO` and `EINVAL` apart.

use std::{
    fmt, io,
    os::unix::fs::FileTypeExt,
    path::{Path, PathBuf},
    time::Duration,
};

/// Device nodes probed when the configured path cannot be opened.
pub const CANDIDATE_DEVICES: std::ops::RangeInclusive<u32> = 0..=9;

/// Four character pixel format code.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    pub const YUYV: FourCC = FourCC(*b"YUYV");

    pub const fn to_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    pub const fn from_u32(code: u32) -> Self {
        FourCC(code.to_le_bytes())
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCC({self})")
    }
}

/// Result of `VIDIOC_QUERYCAP`, reduced to what capture needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub driver: String,
    pub card: String,
    pub bus_info: String,
    pub video_capture: bool,
    pub read_write: bool,
    pub streaming: bool,
}

/// Single-planar pixel format as exchanged with `VIDIOC_S_FMT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixFormat {
    pub width: u32,
    pub height: u32,
    pub fourcc: FourCC,
    pub bytes_per_line: u32,
    pub size_image: u32,
}

impl PixFormat {
    /// A packed YUYV request; stride and size are left for the driver.
    pub const fn yuyv(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            fourcc: FourCC::YUYV,
            bytes_per_line: 0,
            size_image: 0,
        }
    }

    /// Applies the minimum stride and image size a packed 2 byte per pixel
    /// format needs. Some drivers under-report both.
    pub fn floor_corrected(mut self) -> Self {
        self.bytes_per_line = self.bytes_per_line.max(self.width.saturating_mul(2));
        self.size_image = self
            .size_image
            .max(self.bytes_per_line.saturating_mul(self.height));
        self
    }
}

/// Buffer memory model passed to `VIDIOC_REQBUFS`, `VIDIOC_QBUF` and
/// `VIDIOC_DQBUF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Memory {
    Mmap,
    UserPtr,
}

/// Kernel-side placement of a driver allocated buffer (`VIDIOC_QUERYBUF`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub index: u32,
    pub offset: u32,
    pub length: u32,
}

/// A buffer descriptor passed to `VIDIOC_QBUF` or returned by
/// `VIDIOC_DQBUF`. `userptr` is only meaningful for [`Memory::UserPtr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    pub index: u32,
    pub memory: Memory,
    pub userptr: usize,
    pub length: u32,
    pub bytes_used: u32,
}

/// Memory mapped into the process by the driver. Dropping it unmaps it.
pub trait MappedRegion {
    fn as_slice(&self) -> &[u8];
    fn as_mut_slice(&mut self) -> &mut [u8];
}

/// Control interface to a video capture device.
///
/// A driver owns at most one open descriptor at a time. `close` must be
/// idempotent.
pub trait Driver {
    fn open(&mut self, path: &Path) -> io::Result<()>;

    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Device nodes to try when the configured one cannot be opened.
    fn candidates(&self) -> Vec<PathBuf> {
        CANDIDATE_DEVICES
            .map(|n| PathBuf::from(format!("/dev/video{n}")))
            .filter(|path| {
                std::fs::metadata(path)
                    .map(|meta| meta.file_type().is_char_device())
                    .unwrap_or(false)
            })
            .collect()
    }

    fn query_capabilities(&mut self) -> io::Result<Capabilities>;

    /// Resets the crop rectangle to the driver default.
    fn reset_crop(&mut self) -> io::Result<()>;

    /// Requests `format`; returns what the driver actually configured.
    fn set_format(&mut self, format: &PixFormat) -> io::Result<PixFormat>;

    /// Returns the number of buffers the driver granted.
    fn request_buffers(&mut self, memory: Memory, count: u32) -> io::Result<u32>;

    fn query_buffer(&mut self, index: u32) -> io::Result<BufferInfo>;

    fn map_buffer(&mut self, info: &BufferInfo) -> io::Result<Box<dyn MappedRegion>>;

    fn queue_buffer(&mut self, desc: &BufferDesc) -> io::Result<()>;

    fn dequeue_buffer(&mut self, memory: Memory) -> io::Result<BufferDesc>;

    fn stream_on(&mut self) -> io::Result<()>;

    fn stream_off(&mut self) -> io::Result<()>;

    /// Waits until a frame can be read or dequeued. `Ok(false)` on timeout.
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Reads one frame with `read()`, returning the number of bytes read.
    fn read_frame(&mut self, dst: &mut [u8]) -> io::Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc() {
        assert_eq!(FourCC::YUYV.to_u32(), v4l2_sys::V4L2_PIX_FMT_YUYV);
        assert_eq!(FourCC::from_u32(v4l2_sys::V4L2_PIX_FMT_YUYV), FourCC::YUYV);
        assert_eq!(FourCC::YUYV.to_string(), "YUYV");
    }

    #[test]
    fn test_floor_correction() {
        let fmt = PixFormat {
            width: 640,
            height: 480,
            fourcc: FourCC::YUYV,
            bytes_per_line: 100,
            size_image: 10,
        }
        .floor_corrected();
        assert_eq!(fmt.bytes_per_line, 1280);
        assert_eq!(fmt.size_image, 1280 * 480);

        // padded strides reported by the driver are kept
        let fmt = PixFormat {
            bytes_per_line: 1536,
            size_image: 1536 * 480 + 64,
            ..fmt
        }
        .floor_corrected();
        assert_eq!(fmt.bytes_per_line, 1536);
        assert_eq!(fmt.size_image, 1536 * 480 + 64);
    }
}
