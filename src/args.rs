// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use fieldcam::{CameraError, CaptureSettings, IoMethod};
use std::{fs, path::PathBuf, time::Duration};

/// Frame exchange method with the capture driver.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum IoSetting {
    /// read() into a single buffer
    Read,
    /// Driver allocated buffers mapped into the process
    Mmap,
    /// Page aligned application buffers passed by address
    Userptr,
}

impl From<IoSetting> for IoMethod {
    fn from(io: IoSetting) -> Self {
        match io {
            IoSetting::Read => IoMethod::Read,
            IoSetting::Mmap => IoMethod::Mmap,
            IoSetting::Userptr => IoMethod::UserPtr,
        }
    }
}

/// Command-line arguments for the field camera snapshot tool.
///
/// Takes a single still from the camera and stores it as a timestamped JPEG
/// in the output directory. Arguments can be specified via command line or
/// environment variables.
///
/// # Example
///
/// ```bash
/// # Via command line
/// fieldcam --camera /dev/video0 --camera-size "1280 720" --io userptr
///
/// # Via device configuration
/// export CONFIG=/etc/fieldcam/config.json
/// fieldcam
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Camera capture device path (e.g., /dev/video0)
    #[arg(short, long, env = "CAMERA", default_value = "/dev/video0")]
    pub camera: PathBuf,

    /// Camera capture resolution in pixels (width height)
    #[arg(
        long,
        env = "CAMERA_SIZE",
        default_value = "640 480",
        value_delimiter = ' ',
        num_args = 2
    )]
    pub camera_size: Vec<u32>,

    /// JPEG quality (1-100)
    #[arg(short, long, env = "QUALITY", default_value = "90")]
    pub quality: u8,

    /// Frame exchange method
    #[arg(long, env = "IO_METHOD", default_value = "mmap", value_enum)]
    pub io: IoSetting,

    /// Readiness waits before giving up on a frame
    #[arg(long, env = "ATTEMPTS", default_value = "10")]
    pub attempts: u32,

    /// Timeout of a single readiness wait in seconds
    #[arg(long, env = "TIMEOUT", default_value = "2")]
    pub timeout: f64,

    /// Device configuration JSON file; its camera section replaces the
    /// capture options above
    #[arg(long, env = "CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory receiving the captured images
    #[arg(short, long, env = "OUTPUT", default_value = "photostream")]
    pub output: PathBuf,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Enable Tracy profiler for performance analysis
    #[arg(long, env = "TRACY")]
    pub tracy: bool,
}

impl Args {
    /// Builds the capture settings from the configuration file when one is
    /// given, otherwise from the individual options.
    pub fn settings(&self) -> Result<CaptureSettings, CameraError> {
        if let Some(path) = &self.config {
            let text = fs::read_to_string(path)?;
            let config = serde_json::from_str(&text)
                .map_err(|e| CameraError::Config(format!("{}: {e}", path.display())))?;
            return CaptureSettings::from_json(&config);
        }

        let timeout = Duration::try_from_secs_f64(self.timeout)
            .map_err(|e| CameraError::Config(format!("timeout {}: {e}", self.timeout)))?;
        let settings = CaptureSettings {
            device: self.camera.clone(),
            width: self.camera_size[0],
            height: self.camera_size[1],
            quality: self.quality,
            io_method: self.io.into(),
            attempts: self.attempts,
            timeout,
        };
        settings.validate()?;
        Ok(settings)
    }
}
