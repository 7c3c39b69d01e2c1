// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! # Field Camera Library
//!
//! Single still capture from V4L2 video devices for unattended field
//! stations that sample sensors and images on a schedule. A [`Camera`] opens
//! a device, negotiates a packed YUYV format, captures exactly one frame,
//! converts it to RGB888 and compresses it to JPEG.
//!
//! ## Features
//!
//! - **Three I/O Methods**: `read()`, driver allocated memory-mapped buffers
//!   and application allocated user-pointer buffers, selected at runtime with
//!   [`IoMethod`].
//! - **Bounded Capture**: a readiness-polling loop with a fixed retry budget
//!   that tolerates timeouts, signals and transient driver errors.
//! - **Buffer Ownership**: each buffer is tagged with the side that owns it,
//!   so touching a kernel-owned buffer is reported instead of racing the
//!   driver.
//! - **Growable JPEG Output**: the encoder writes into a buffer that grows one
//!   block at a time and is reused across captures.
//! - **Device Fallback**: when the configured node is missing the first
//!   `/dev/videoN` that opens is adopted.
//!
//! ## Example
//!
//! ```no_run
//! use fieldcam::{Camera, CaptureSettings, IoMethod};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = CaptureSettings {
//!     width: 1280,
//!     height: 720,
//!     io_method: IoMethod::UserPtr,
//!     ..Default::default()
//! };
//! let mut camera = Camera::new(settings)?;
//! let snapshot = camera.capture()?;
//! println!("{}x{} {} bytes", snapshot.width, snapshot.height, snapshot.jpeg.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Requirements
//!
//! - **Linux**: any kernel with V4L2, a capture device offering YUYV. The
//!   `vivid` test driver works for development.
//!
//! ## Safety
//!
//! `unsafe` code is limited to the ioctl and `mmap()` calls in [`v4l2`] and
//! the aligned heap buffers in [`buffer`], each wrapped in a safe owner that
//! releases its resource on drop.

pub mod buffer;
pub mod camera;
pub mod capture;
pub mod config;
pub mod convert;
pub mod driver;
pub mod error;
pub mod jpeg;
pub mod v4l2;

#[cfg(test)]
mod mock;

pub use buffer::{BufferPool, IoMethod, Owner};
pub use camera::{Camera, CameraState, Snapshot};
pub use capture::CaptureLoop;
pub use config::CaptureSettings;
pub use driver::Driver;
pub use error::{CameraError, Result};
pub use v4l2::V4l2Driver;
