// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    buffer::IoMethod,
    capture::{MAX_ATTEMPTS, WAIT_TIMEOUT},
    error::{CameraError, Result},
};
use serde_json::{Map, Value};
use std::{path::PathBuf, time::Duration};

/// Everything a [`crate::Camera`] needs to produce a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSettings {
    pub device: PathBuf,
    pub width: u32,
    pub height: u32,
    /// JPEG quality, 1 to 100.
    pub quality: u8,
    pub io_method: IoMethod,
    pub attempts: u32,
    pub timeout: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/video0"),
            width: 640,
            height: 480,
            quality: 90,
            io_method: IoMethod::Mmap,
            attempts: MAX_ATTEMPTS,
            timeout: WAIT_TIMEOUT,
        }
    }
}

fn invalid(msg: impl Into<String>) -> CameraError {
    CameraError::Config(msg.into())
}

/// Parses a `"WIDTHxHEIGHT"` size such as `"1280x720"`.
pub fn parse_size(size: &str) -> Result<(u32, u32)> {
    let (w, h) = size
        .split_once(|c| c == 'x' || c == 'X')
        .ok_or_else(|| invalid(format!("size '{size}' is not WIDTHxHEIGHT")))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<u32>()
            .map_err(|e| invalid(format!("size '{size}': {e}")))
    };
    Ok((parse(w)?, parse(h)?))
}

fn number<T: TryFrom<u64>>(camera: &Map<String, Value>, key: &str) -> Result<Option<T>> {
    camera
        .get(key)
        .map(|v| {
            v.as_u64()
                .and_then(|n| T::try_from(n).ok())
                .ok_or_else(|| invalid(format!("camera.{key} must be a positive integer, got {v}")))
        })
        .transpose()
}

fn string<'a>(camera: &'a Map<String, Value>, key: &str) -> Result<Option<&'a str>> {
    camera
        .get(key)
        .map(|v| {
            v.as_str()
                .ok_or_else(|| invalid(format!("camera.{key} must be a string, got {v}")))
        })
        .transpose()
}

impl CaptureSettings {
    /// Reads the `camera` section of a device configuration document.
    ///
    /// ```
    /// use fieldcam::{CaptureSettings, IoMethod};
    /// use serde_json::json;
    ///
    /// let cfg = json!({ "camera": { "device": "/dev/video1", "size": "320x240", "io": "read" } });
    /// let settings = CaptureSettings::from_json(&cfg).unwrap();
    /// assert_eq!((settings.width, settings.height), (320, 240));
    /// assert_eq!(settings.io_method, IoMethod::Read);
    /// ```
    pub fn from_json(config: &Value) -> Result<Self> {
        let camera = config
            .get("camera")
            .and_then(Value::as_object)
            .ok_or_else(|| invalid("missing 'camera' section"))?;

        let device = string(camera, "device")?.ok_or_else(|| invalid("missing camera.device"))?;
        let size = string(camera, "size")?.ok_or_else(|| invalid("missing camera.size"))?;
        let (width, height) = parse_size(size)?;

        let mut settings = Self {
            device: PathBuf::from(device),
            width,
            height,
            ..Self::default()
        };
        if let Some(quality) = number::<u8>(camera, "quality")? {
            settings.quality = quality;
        }
        if let Some(io) = string(camera, "io")? {
            settings.io_method = io.parse()?;
        }
        if let Some(attempts) = number::<u32>(camera, "attempts")? {
            settings.attempts = attempts;
        }
        if let Some(timeout) = camera.get("timeout") {
            settings.timeout = timeout
                .as_f64()
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .ok_or_else(|| invalid(format!("camera.timeout must be seconds, got {timeout}")))?;
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(invalid(format!(
                "resolution {}x{} must be non-zero",
                self.width, self.height
            )));
        }
        if !(1..=100).contains(&self.quality) {
            return Err(invalid(format!("quality {} outside 1..=100", self.quality)));
        }
        if self.attempts == 0 {
            return Err(invalid("attempts must be at least 1"));
        }
        if self.timeout.is_zero() {
            return Err(invalid("timeout must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let settings = CaptureSettings::default();
        assert_eq!(settings.device, PathBuf::from("/dev/video0"));
        assert_eq!((settings.width, settings.height), (640, 480));
        assert_eq!(settings.quality, 90);
        assert_eq!(settings.io_method, IoMethod::Mmap);
        assert_eq!(settings.attempts, 10);
        assert_eq!(settings.timeout, Duration::from_secs(2));
        settings.validate().unwrap();
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("640x480").unwrap(), (640, 480));
        assert_eq!(parse_size("1920X1080").unwrap(), (1920, 1080));
        assert!(parse_size("640").is_err());
        assert!(parse_size("640x").is_err());
        assert!(parse_size("-1x480").is_err());
    }

    #[test]
    fn test_from_json_full() {
        let cfg = json!({
            "camera": {
                "device": "/dev/video2",
                "size": "1280x720",
                "quality": 75,
                "io": "userptr",
                "attempts": 3,
                "timeout": 0.5
            },
            "sensors": {}
        });
        let settings = CaptureSettings::from_json(&cfg).unwrap();
        assert_eq!(
            settings,
            CaptureSettings {
                device: PathBuf::from("/dev/video2"),
                width: 1280,
                height: 720,
                quality: 75,
                io_method: IoMethod::UserPtr,
                attempts: 3,
                timeout: Duration::from_millis(500),
            }
        );
    }

    #[test]
    fn test_from_json_minimal_keeps_defaults() {
        let cfg = json!({ "camera": { "device": "/dev/video0", "size": "160x120" } });
        let settings = CaptureSettings::from_json(&cfg).unwrap();
        assert_eq!(settings.quality, 90);
        assert_eq!(settings.io_method, IoMethod::Mmap);
        assert_eq!(settings.attempts, MAX_ATTEMPTS);
    }

    #[test]
    fn test_from_json_rejects() {
        for cfg in [
            json!({}),
            json!({ "camera": "/dev/video0" }),
            json!({ "camera": { "size": "640x480" } }),
            json!({ "camera": { "device": "/dev/video0" } }),
            json!({ "camera": { "device": 0, "size": "640x480" } }),
            json!({ "camera": { "device": "/dev/video0", "size": "0x480" } }),
            json!({ "camera": { "device": "/dev/video0", "size": "640x480", "quality": 0 } }),
            json!({ "camera": { "device": "/dev/video0", "size": "640x480", "quality": 300 } }),
            json!({ "camera": { "device": "/dev/video0", "size": "640x480", "io": "dmabuf" } }),
            json!({ "camera": { "device": "/dev/video0", "size": "640x480", "attempts": 0 } }),
            json!({ "camera": { "device": "/dev/video0", "size": "640x480", "timeout": -1 } }),
        ] {
            let err = CaptureSettings::from_json(&cfg).unwrap_err();
            assert!(matches!(err, CameraError::Config(_)), "{cfg}: {err}");
        }
    }
}
