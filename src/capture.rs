// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    buffer::BufferPool,
    config::CaptureSettings,
    driver::Driver,
    error::{CameraError, Result},
};
use std::{io, time::Duration};
use tracing::{debug, error, instrument, warn};

/// Readiness waits before a capture gives up.
pub const MAX_ATTEMPTS: u32 = 10;

/// Upper bound of a single readiness wait.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Bounded wait, dequeue, process and requeue of a single frame.
///
/// Timeouts, interrupted waits and "no frame yet" results each consume one
/// attempt. The first frame obtained is processed exactly once and its buffer
/// is returned to the driver whether processing succeeded or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureLoop {
    pub attempts: u32,
    pub timeout: Duration,
}

impl Default for CaptureLoop {
    fn default() -> Self {
        Self::new(MAX_ATTEMPTS, WAIT_TIMEOUT)
    }
}

impl From<&CaptureSettings> for CaptureLoop {
    fn from(settings: &CaptureSettings) -> Self {
        Self::new(settings.attempts, settings.timeout)
    }
}

impl CaptureLoop {
    pub const fn new(attempts: u32, timeout: Duration) -> Self {
        Self { attempts, timeout }
    }

    #[instrument(skip_all, fields(method = %pool.method()))]
    pub fn run<T>(
        &self,
        driver: &mut dyn Driver,
        pool: &mut dyn BufferPool,
        mut process: impl FnMut(&[u8]) -> Result<T>,
    ) -> Result<T> {
        for attempt in 1..=self.attempts {
            match driver.wait_readable(self.timeout) {
                Ok(true) => {}
                Ok(false) => {
                    warn!("select timeout on attempt {}/{}", attempt, self.attempts);
                    continue;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    debug!("wait interrupted on attempt {attempt}");
                    continue;
                }
                Err(e) => {
                    error!("select error {e}");
                    return Err(CameraError::Wait(e));
                }
            }

            let Some(index) = pool.dequeue(driver)? else {
                debug!("no frame ready on attempt {attempt}");
                continue;
            };

            let processed = pool.frame(index).and_then(|frame| process(frame));
            let requeued = pool.requeue(driver, index);
            return match (processed, requeued) {
                (Ok(value), Ok(())) => Ok(value),
                (Ok(_), Err(e)) => Err(e),
                (Err(e), requeued) => {
                    if let Err(r) = requeued {
                        error!("requeue of buffer {index} failed: {r}");
                    }
                    error!("frame processing failed: {e}");
                    Err(e)
                }
            };
        }

        error!("no frame after {} attempts", self.attempts);
        Err(CameraError::Exhausted {
            attempts: self.attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        buffer::{IoMethod, Owner},
        mock::{FakeDriver, Readiness},
    };
    use std::path::Path;

    const SIZE: usize = 64 * 48 * 2;

    fn streaming(method: IoMethod, driver: &mut FakeDriver) -> Box<dyn BufferPool> {
        let mut pool = method.pool();
        pool.allocate(driver, Path::new("/dev/video0"), SIZE).unwrap();
        pool.submit_all(driver).unwrap();
        driver.stream_on().unwrap();
        pool
    }

    fn quick(attempts: u32) -> CaptureLoop {
        CaptureLoop::new(attempts, Duration::from_millis(1))
    }

    #[test]
    fn test_ready_on_third_attempt() {
        for method in [IoMethod::Read, IoMethod::Mmap, IoMethod::UserPtr] {
            let mut driver = FakeDriver::new();
            driver.script([Readiness::Timeout, Readiness::Timeout, Readiness::Ready]);
            let mut pool = streaming(method, &mut driver);

            let mut calls = 0;
            let len = quick(MAX_ATTEMPTS)
                .run(&mut driver, pool.as_mut(), |frame| {
                    calls += 1;
                    Ok(frame.len())
                })
                .unwrap();

            assert_eq!(calls, 1, "{method}");
            assert!(len >= SIZE);
            assert_eq!(driver.waits(), 3);
            if method.is_streaming() {
                assert!(pool.buffers().iter().all(|b| b.owner() == Owner::Kernel));
            }
        }
    }

    #[test]
    fn test_never_ready() {
        let mut driver = FakeDriver::new();
        driver.default_readiness = Readiness::Timeout;
        let mut pool = streaming(IoMethod::Mmap, &mut driver);

        let mut calls = 0;
        let err = quick(MAX_ATTEMPTS)
            .run(&mut driver, pool.as_mut(), |_| {
                calls += 1;
                Ok(())
            })
            .unwrap_err();

        assert_eq!(calls, 0);
        assert!(matches!(err, CameraError::Exhausted { attempts: MAX_ATTEMPTS }));
        assert_eq!(driver.waits(), MAX_ATTEMPTS as usize);
    }

    #[test]
    fn test_interrupt_consumes_attempt() {
        let mut driver = FakeDriver::new();
        driver.script([Readiness::Interrupted, Readiness::Interrupted]);
        driver.default_readiness = Readiness::Timeout;
        let mut pool = streaming(IoMethod::Mmap, &mut driver);

        let err = quick(2).run(&mut driver, pool.as_mut(), |_| Ok(())).unwrap_err();
        assert!(matches!(err, CameraError::Exhausted { attempts: 2 }));
    }

    #[test]
    fn test_wait_error_aborts() {
        let mut driver = FakeDriver::new();
        driver.script([Readiness::Fail(libc::EBADF), Readiness::Ready]);
        let mut pool = streaming(IoMethod::Mmap, &mut driver);

        let err = quick(5).run(&mut driver, pool.as_mut(), |_| Ok(())).unwrap_err();
        assert!(matches!(err, CameraError::Wait(_)));
        assert_eq!(driver.waits(), 1);
    }

    #[test]
    fn test_eio_tolerated() {
        let mut driver = FakeDriver::new();
        let mut pool = streaming(IoMethod::Mmap, &mut driver);
        driver.dequeue_error = Some(libc::EIO);

        let mut calls = 0;
        quick(3)
            .run(&mut driver, pool.as_mut(), |_| {
                calls += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(calls, 1);
        assert_eq!(driver.waits(), 2);
    }

    #[test]
    fn test_hard_dequeue_error_aborts() {
        let mut driver = FakeDriver::new();
        let mut pool = streaming(IoMethod::UserPtr, &mut driver);
        driver.dequeue_error = Some(libc::ENODEV);

        let err = quick(3).run(&mut driver, pool.as_mut(), |_| Ok(())).unwrap_err();
        assert!(matches!(err, CameraError::Ioctl { op: "VIDIOC_DQBUF", .. }));
        assert_eq!(driver.waits(), 1);
    }

    #[test]
    fn test_processing_failure_still_requeues() {
        let mut driver = FakeDriver::new();
        let mut pool = streaming(IoMethod::Mmap, &mut driver);
        let queued = driver.queued().len();

        let err = quick(3)
            .run(&mut driver, pool.as_mut(), |_| -> Result<()> {
                Err(CameraError::OutOfMemory("test"))
            })
            .unwrap_err();

        assert!(matches!(err, CameraError::OutOfMemory("test")));
        assert_eq!(driver.queued().len(), queued + 1);
        assert!(pool.buffers().iter().all(|b| b.owner() == Owner::Kernel));
    }

    #[test]
    fn test_requeue_failure_reported() {
        let mut driver = FakeDriver::new();
        let mut pool = streaming(IoMethod::Mmap, &mut driver);
        driver.queue_error = Some(libc::EINVAL);

        let err = quick(3).run(&mut driver, pool.as_mut(), |_| Ok(())).unwrap_err();
        assert!(matches!(err, CameraError::Ioctl { op: "VIDIOC_QBUF", .. }));
    }
}
