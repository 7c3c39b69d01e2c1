// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Device lifecycle and the single-snapshot entry point.

use crate::{
    buffer::{BufferPool, IoMethod},
    capture::CaptureLoop,
    config::CaptureSettings,
    convert::{yuyv_to_rgb, RgbFrame},
    driver::{Capabilities, Driver, FourCC, PixFormat},
    error::{CameraError, Result},
    jpeg::{self, JpegOutput},
    v4l2::V4l2Driver,
};
use std::{
    io,
    path::{Path, PathBuf},
};
use tracing::{debug, error, info, instrument, warn};

/// Lifecycle of a [`Camera`].
///
/// ```text
/// Clean -> Open -> Initialized -> Capturing
///   ^                                 |
///   +------------- close() -----------+
/// ```
///
/// A failure while opening, initializing or starting moves the camera to
/// `Error`, which it never leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraState {
    Clean,
    Open,
    Initialized,
    Capturing,
    Error,
}

/// A JPEG encoded still, borrowed from the camera until its next capture.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot<'a> {
    pub jpeg: &'a [u8],
    pub width: u32,
    pub height: u32,
}

/// One V4L2 capture device and the buffers used to take stills from it.
///
/// The device is opened, initialized and started lazily by the first
/// [`Camera::capture`]. Every snapshot reuses the same RGB and JPEG buffers.
///
/// # Example
///
/// ```no_run
/// use fieldcam::{Camera, CaptureSettings};
///
/// # fn main() -> Result<(), fieldcam::CameraError> {
/// let mut camera = Camera::new(CaptureSettings::default())?;
/// let snapshot = camera.capture()?;
/// std::fs::write("still.jpg", snapshot.jpeg)?;
/// # Ok(())
/// # }
/// ```
pub struct Camera<D: Driver = V4l2Driver> {
    driver: D,
    settings: CaptureSettings,
    path: PathBuf,
    state: CameraState,
    streaming: bool,
    format: Option<PixFormat>,
    capabilities: Option<Capabilities>,
    pool: Box<dyn BufferPool>,
    rgb: RgbFrame,
    jpeg: JpegOutput,
}

impl Camera<V4l2Driver> {
    pub fn new(settings: CaptureSettings) -> Result<Self> {
        Self::with_driver(V4l2Driver::new(), settings)
    }
}

impl<D: Driver> Camera<D> {
    pub fn with_driver(driver: D, settings: CaptureSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            driver,
            path: settings.device.clone(),
            pool: settings.io_method.pool(),
            settings,
            state: CameraState::Clean,
            streaming: false,
            format: None,
            capabilities: None,
            rgb: RgbFrame::new(),
            jpeg: JpegOutput::new(),
        })
    }

    pub fn state(&self) -> CameraState {
        self.state
    }

    /// The device actually in use, which differs from the configured one
    /// when a fallback device was adopted.
    pub fn device_path(&self) -> &Path {
        &self.path
    }

    /// Negotiated width, or the configured one before initialization.
    pub fn width(&self) -> u32 {
        self.format.map_or(self.settings.width, |f| f.width)
    }

    pub fn height(&self) -> u32 {
        self.format.map_or(self.settings.height, |f| f.height)
    }

    pub fn format(&self) -> Option<&PixFormat> {
        self.format.as_ref()
    }

    pub fn capabilities(&self) -> Option<&Capabilities> {
        self.capabilities.as_ref()
    }

    pub fn io_method(&self) -> IoMethod {
        self.pool.method()
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    fn expect_state(&self, op: &'static str, expected: CameraState) -> Result<()> {
        match self.state {
            CameraState::Error => Err(CameraError::Faulted),
            actual if actual == expected => Ok(()),
            actual => Err(CameraError::InvalidState {
                op,
                expected,
                actual,
            }),
        }
    }

    /// Moves to `Error` after releasing everything acquired so far.
    fn fail(&mut self, err: CameraError) -> CameraError {
        error!("{}: {err}", self.path.display());
        self.teardown();
        self.state = CameraState::Error;
        err
    }

    /// The descriptor is closed before the pool is released: until then
    /// queued buffers may still be written by the driver, even when
    /// `VIDIOC_STREAMOFF` failed.
    fn teardown(&mut self) {
        if self.streaming {
            if let Err(e) = self.driver.stream_off() {
                warn!("VIDIOC_STREAMOFF error {e}");
            }
            self.streaming = false;
        }
        self.driver.close();
        self.pool.release();
    }

    /// Opens the configured device, or the first `/dev/videoN` that opens.
    #[instrument(skip(self), fields(device = %self.settings.device.display()))]
    pub fn open(&mut self) -> Result<()> {
        self.expect_state("open", CameraState::Clean)?;

        let configured = self.settings.device.clone();
        let err = match self.driver.open(&configured) {
            Ok(()) => {
                self.path = configured;
                self.state = CameraState::Open;
                return Ok(());
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {
                CameraError::NotCharDevice(configured.clone())
            }
            Err(source) => CameraError::Open {
                path: configured.clone(),
                source,
            },
        };
        warn!("{err}, scanning for another video device");

        for candidate in self.driver.candidates() {
            if candidate == configured {
                continue;
            }
            match self.driver.open(&candidate) {
                Ok(()) => {
                    info!("using {} instead of {}", candidate.display(), configured.display());
                    self.path = candidate;
                    self.state = CameraState::Open;
                    return Ok(());
                }
                Err(e) => debug!("cannot open {}: {e}", candidate.display()),
            }
        }

        Err(self.fail(CameraError::NoDevice(configured)))
    }

    /// Checks capabilities, negotiates the format and allocates buffers.
    #[instrument(skip(self), fields(device = %self.path.display()))]
    pub fn init(&mut self) -> Result<()> {
        self.expect_state("init", CameraState::Open)?;
        match self.negotiate() {
            Ok(()) => {
                self.state = CameraState::Initialized;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn negotiate(&mut self) -> Result<()> {
        let caps = self
            .driver
            .query_capabilities()
            .map_err(|source| CameraError::Ioctl {
                op: "VIDIOC_QUERYCAP",
                source,
            })?;
        debug!("{} {} on {}", caps.driver, caps.card, caps.bus_info);

        if !caps.video_capture {
            return Err(CameraError::NotCapture(self.path.clone()));
        }
        let method = self.pool.method();
        let supported = match method {
            IoMethod::Read => caps.read_write,
            IoMethod::Mmap | IoMethod::UserPtr => caps.streaming,
        };
        if !supported {
            return Err(CameraError::Unsupported {
                path: self.path.clone(),
                method,
            });
        }
        self.capabilities = Some(caps);

        if let Err(e) = self.driver.reset_crop() {
            debug!("crop reset ignored: {e}");
        }

        let requested = PixFormat::yuyv(self.settings.width, self.settings.height);
        let applied = self
            .driver
            .set_format(&requested)
            .map_err(|source| CameraError::Ioctl {
                op: "VIDIOC_S_FMT",
                source,
            })?;
        if applied.width != requested.width {
            warn!(
                "driver adjusted width {} to {}",
                requested.width, applied.width
            );
        }
        if applied.height != requested.height {
            warn!(
                "driver adjusted height {} to {}",
                requested.height, applied.height
            );
        }
        if applied.fourcc != FourCC::YUYV {
            warn!("driver selected {} instead of YUYV", applied.fourcc);
        }

        let format = applied.floor_corrected();
        info!(
            "{}x{} {} stride {} size {}",
            format.width, format.height, format.fourcc, format.bytes_per_line, format.size_image
        );
        self.format = Some(format);

        self.pool
            .allocate(&mut self.driver, &self.path, format.size_image as usize)
    }

    /// Queues every buffer and enables streaming. A no-op for `read()` i/o.
    #[instrument(skip(self), fields(device = %self.path.display()))]
    pub fn start(&mut self) -> Result<()> {
        self.expect_state("start", CameraState::Initialized)?;
        match self.begin_streaming() {
            Ok(()) => {
                self.state = CameraState::Capturing;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn begin_streaming(&mut self) -> Result<()> {
        if !self.pool.method().is_streaming() {
            return Ok(());
        }
        self.pool.submit_all(&mut self.driver)?;
        self.driver
            .stream_on()
            .map_err(|source| CameraError::Ioctl {
                op: "VIDIOC_STREAMON",
                source,
            })?;
        self.streaming = true;
        Ok(())
    }

    /// Takes one still, bringing the device up first if needed.
    ///
    /// A failed capture leaves the camera streaming and ready for the next
    /// attempt. Only a failure to bring the device up is fatal.
    #[instrument(skip(self), fields(device = %self.path.display()))]
    pub fn capture(&mut self) -> Result<Snapshot<'_>> {
        match self.state {
            CameraState::Error => return Err(CameraError::Faulted),
            CameraState::Clean => {
                self.open()?;
                self.init()?;
                self.start()?;
            }
            CameraState::Open => {
                self.init()?;
                self.start()?;
            }
            CameraState::Initialized => self.start()?,
            CameraState::Capturing => {}
        }

        let format = self.format.ok_or(CameraError::InvalidState {
            op: "capture",
            expected: CameraState::Capturing,
            actual: self.state,
        })?;
        let (width, height) = (format.width, format.height);
        let stride = format.bytes_per_line as usize;
        let quality = self.settings.quality;

        let Self {
            driver,
            pool,
            rgb,
            jpeg: output,
            settings,
            ..
        } = self;
        CaptureLoop::from(&*settings).run(driver, pool.as_mut(), |frame| {
            let dst = rgb.prepare(width, height)?;
            yuyv_to_rgb(width as usize, height as usize, stride, frame, dst)?;
            jpeg::encode(output, rgb.as_slice(), width, height, quality)
        })?;

        Ok(Snapshot {
            jpeg: self.jpeg.as_slice(),
            width,
            height,
        })
    }

    /// Stops streaming, releases every buffer and closes the device.
    ///
    /// Idempotent. A healthy camera returns to `Clean` and reopens on the
    /// next capture; a faulted one stays `Error`.
    pub fn close(&mut self) {
        if self.driver.is_open() || !self.pool.buffers().is_empty() {
            debug!("closing {}", self.path.display());
        }
        self.teardown();
        if self.state != CameraState::Error {
            self.state = CameraState::Clean;
        }
    }
}

impl<D: Driver> Drop for Camera<D> {
    fn drop(&mut self) {
        self.close();
    }
}
