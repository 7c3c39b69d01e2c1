// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{buffer::Owner, camera::CameraState, IoMethod};
use std::{io, path::PathBuf};
use thiserror::Error;

/// Errors reported by the capture engine.
///
/// Transient driver conditions (timeouts, `EAGAIN`, the tolerated `EIO`) are
/// absorbed by the capture loop and never surface here.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("cannot open '{}': {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} is no device", .0.display())]
    NotCharDevice(PathBuf),

    #[error("no usable video device found (configured {})", .0.display())]
    NoDevice(PathBuf),

    #[error("{op} failed: {source}")]
    Ioctl {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{} is no video capture device", .0.display())]
    NotCapture(PathBuf),

    #[error("{} does not support {method} i/o", path.display())]
    Unsupported { path: PathBuf, method: IoMethod },

    #[error(
        "insufficient buffer memory on {}: driver granted {granted} buffer(s)",
        path.display()
    )]
    InsufficientBuffers { path: PathBuf, granted: u32 },

    #[error("out of memory allocating {0}")]
    OutOfMemory(&'static str),

    #[error("mmap of buffer {index} failed: {source}")]
    Map {
        index: u32,
        #[source]
        source: io::Error,
    },

    #[error("{op} requires state {expected:?} but camera is {actual:?}")]
    InvalidState {
        op: &'static str,
        expected: CameraState,
        actual: CameraState,
    },

    #[error("camera is in the error state and must be recreated")]
    Faulted,

    #[error("buffer {index} is owned by the {owner:?}")]
    Ownership { index: usize, owner: Owner },

    #[error("driver returned a buffer that is not part of the pool")]
    UnknownBuffer,

    #[error("waiting for a frame failed: {0}")]
    Wait(#[source] io::Error),

    #[error("read error: {0}")]
    Read(#[source] io::Error),

    #[error("no frame after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("frame size mismatch: expected {expected} bytes, got {actual}")]
    FrameSize { expected: usize, actual: usize },

    #[error("jpeg encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T, E = CameraError> = std::result::Result<T, E>;

/// Driver conditions that mean "no frame yet" rather than a failure.
///
/// `EIO` is accepted here because V4L2 documents it as possibly transient
/// for `read()` and `VIDIOC_DQBUF`. This can hide a real hardware fault.
pub fn is_transient(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EAGAIN) | Some(libc::EIO))
        || err.kind() == io::ErrorKind::WouldBlock
}
