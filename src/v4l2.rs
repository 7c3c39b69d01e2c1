// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::driver::{
    BufferDesc, BufferInfo, Capabilities, Driver, FourCC, MappedRegion, Memory, PixFormat,
};
use libc::{c_int, c_void, MAP_FAILED, MAP_SHARED, POLLIN, PROT_READ, PROT_WRITE};
use nix::errno::Errno;
use std::{
    fs::{File, OpenOptions},
    io::{self, Read},
    os::{
        fd::{AsRawFd, RawFd},
        unix::fs::{FileTypeExt, OpenOptionsExt},
    },
    path::Path,
    ptr::null_mut,
    slice::{from_raw_parts, from_raw_parts_mut},
    time::Duration,
};
use tracing::{debug, warn};
use v4l2_sys::*;

/// [`Driver`] backed by a real V4L2 device node.
///
/// The node is opened read/write and non-blocking, so `read()` and
/// `VIDIOC_DQBUF` report `EAGAIN` instead of blocking; readiness is waited
/// for with `poll()`.
#[derive(Debug, Default)]
pub struct V4l2Driver {
    file: Option<File>,
}

impl V4l2Driver {
    pub fn new() -> Self {
        Self::default()
    }

    fn fd(&self) -> io::Result<RawFd> {
        self.file
            .as_ref()
            .map(AsRawFd::as_raw_fd)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))
    }
}

/// Issues an ioctl, retrying while it is interrupted by a signal.
fn xioctl(mut f: impl FnMut() -> nix::Result<c_int>) -> io::Result<()> {
    loop {
        match f() {
            Ok(_) => return Ok(()),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

const fn memory_code(memory: Memory) -> u32 {
    match memory {
        Memory::Mmap => V4L2_MEMORY_MMAP,
        Memory::UserPtr => V4L2_MEMORY_USERPTR,
    }
}

impl Driver for V4l2Driver {
    fn open(&mut self, path: &Path) -> io::Result<()> {
        let meta = std::fs::metadata(path)?;
        if !meta.file_type().is_char_device() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is no device", path.display()),
            ));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)?;
        debug!("opened {} fd:{}", path.display(), file.as_raw_fd());
        self.file = Some(file);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(file) = self.file.take() {
            debug!("closing fd:{}", file.as_raw_fd());
        }
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn query_capabilities(&mut self) -> io::Result<Capabilities> {
        let fd = self.fd()?;
        let mut cap = v4l2_capability::default();
        xioctl(|| unsafe { vidioc_querycap(fd, &mut cap) })?;

        let flags = if cap.capabilities & V4L2_CAP_DEVICE_CAPS != 0 {
            cap.device_caps
        } else {
            cap.capabilities
        };

        Ok(Capabilities {
            driver: cstr_field(&cap.driver),
            card: cstr_field(&cap.card),
            bus_info: cstr_field(&cap.bus_info),
            video_capture: flags & V4L2_CAP_VIDEO_CAPTURE != 0,
            read_write: flags & V4L2_CAP_READWRITE != 0,
            streaming: flags & V4L2_CAP_STREAMING != 0,
        })
    }

    fn reset_crop(&mut self) -> io::Result<()> {
        let fd = self.fd()?;
        let mut cropcap = v4l2_cropcap {
            type_: V4L2_BUF_TYPE_VIDEO_CAPTURE,
            ..Default::default()
        };
        xioctl(|| unsafe { vidioc_cropcap(fd, &mut cropcap) })?;

        let crop = v4l2_crop {
            type_: V4L2_BUF_TYPE_VIDEO_CAPTURE,
            c: cropcap.defrect,
        };
        xioctl(|| unsafe { vidioc_s_crop(fd, &crop) })
    }

    fn set_format(&mut self, format: &PixFormat) -> io::Result<PixFormat> {
        let fd = self.fd()?;
        let mut fmt = v4l2_format {
            type_: V4L2_BUF_TYPE_VIDEO_CAPTURE,
            ..Default::default()
        };
        fmt.fmt.pix = v4l2_pix_format {
            width: format.width,
            height: format.height,
            pixelformat: format.fourcc.to_u32(),
            field: V4L2_FIELD_INTERLACED,
            bytesperline: format.bytes_per_line,
            sizeimage: format.size_image,
            ..Default::default()
        };
        xioctl(|| unsafe { vidioc_s_fmt(fd, &mut fmt) })?;

        // SAFETY: VIDIOC_S_FMT with a capture type fills the `pix` member.
        let pix = unsafe { fmt.fmt.pix };
        Ok(PixFormat {
            width: pix.width,
            height: pix.height,
            fourcc: FourCC::from_u32(pix.pixelformat),
            bytes_per_line: pix.bytesperline,
            size_image: pix.sizeimage,
        })
    }

    fn request_buffers(&mut self, memory: Memory, count: u32) -> io::Result<u32> {
        let fd = self.fd()?;
        let mut req = v4l2_requestbuffers {
            count,
            type_: V4L2_BUF_TYPE_VIDEO_CAPTURE,
            memory: memory_code(memory),
            ..Default::default()
        };
        xioctl(|| unsafe { vidioc_reqbufs(fd, &mut req) })?;
        Ok(req.count)
    }

    fn query_buffer(&mut self, index: u32) -> io::Result<BufferInfo> {
        let fd = self.fd()?;
        let mut buf = v4l2_buffer {
            index,
            type_: V4L2_BUF_TYPE_VIDEO_CAPTURE,
            memory: V4L2_MEMORY_MMAP,
            ..Default::default()
        };
        xioctl(|| unsafe { vidioc_querybuf(fd, &mut buf) })?;
        Ok(BufferInfo {
            index,
            // SAFETY: the driver fills `offset` for MMAP buffers.
            offset: unsafe { buf.m.offset },
            length: buf.length,
        })
    }

    fn map_buffer(&mut self, info: &BufferInfo) -> io::Result<Box<dyn MappedRegion>> {
        let fd = self.fd()?;
        let len = info.length as usize;
        // SAFETY: a fresh shared mapping of the driver buffer described by
        // VIDIOC_QUERYBUF; it aliases no Rust allocation.
        let ptr = unsafe {
            libc::mmap(
                null_mut(),
                len,
                PROT_READ | PROT_WRITE,
                MAP_SHARED,
                fd,
                info.offset as libc::off_t,
            )
        };
        if ptr == MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Box::new(Mmap {
            ptr: ptr.cast::<u8>(),
            len,
        }))
    }

    fn queue_buffer(&mut self, desc: &BufferDesc) -> io::Result<()> {
        let fd = self.fd()?;
        let mut buf = v4l2_buffer {
            index: desc.index,
            type_: V4L2_BUF_TYPE_VIDEO_CAPTURE,
            memory: memory_code(desc.memory),
            ..Default::default()
        };
        if desc.memory == Memory::UserPtr {
            buf.m.userptr = desc.userptr as libc::c_ulong;
            buf.length = desc.length;
        }
        xioctl(|| unsafe { vidioc_qbuf(fd, &mut buf) })
    }

    fn dequeue_buffer(&mut self, memory: Memory) -> io::Result<BufferDesc> {
        let fd = self.fd()?;
        let mut buf = v4l2_buffer {
            type_: V4L2_BUF_TYPE_VIDEO_CAPTURE,
            memory: memory_code(memory),
            ..Default::default()
        };
        xioctl(|| unsafe { vidioc_dqbuf(fd, &mut buf) })?;
        let userptr = match memory {
            // SAFETY: the driver fills `userptr` for USERPTR buffers.
            Memory::UserPtr => (unsafe { buf.m.userptr }) as usize,
            Memory::Mmap => 0,
        };
        Ok(BufferDesc {
            index: buf.index,
            memory,
            userptr,
            length: buf.length,
            bytes_used: buf.bytesused,
        })
    }

    fn stream_on(&mut self) -> io::Result<()> {
        let fd = self.fd()?;
        let kind = V4L2_BUF_TYPE_VIDEO_CAPTURE as c_int;
        xioctl(|| unsafe { vidioc_streamon(fd, &kind) })
    }

    fn stream_off(&mut self) -> io::Result<()> {
        let fd = self.fd()?;
        let kind = V4L2_BUF_TYPE_VIDEO_CAPTURE as c_int;
        xioctl(|| unsafe { vidioc_streamoff(fd, &kind) })
    }

    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        let mut pfd = libc::pollfd {
            fd: self.fd()?,
            events: POLLIN,
            revents: 0,
        };
        let millis = c_int::try_from(timeout.as_millis()).unwrap_or(c_int::MAX);
        // SAFETY: `pfd` is one valid pollfd for the duration of the call.
        match unsafe { libc::poll(&mut pfd, 1, millis) } {
            -1 => Err(io::Error::last_os_error()),
            0 => Ok(false),
            _ => Ok(true),
        }
    }

    fn read_frame(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.read(dst),
            None => Err(io::Error::from_raw_os_error(libc::EBADF)),
        }
    }
}

/// A driver buffer mapped into the process with `mmap()`, unmapped on drop.
struct Mmap {
    ptr: *mut u8,
    len: usize,
}

impl MappedRegion for Mmap {
    fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` maps `len` bytes until `Drop` unmaps them.
        unsafe { from_raw_parts(self.ptr, self.len) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as for `as_slice`, and `&mut self` makes the borrow unique.
        unsafe { from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl Drop for Mmap {
    fn drop(&mut self) {
        // SAFETY: the region was mapped by `map_buffer` and unmapped once.
        if unsafe { libc::munmap(self.ptr.cast::<c_void>(), self.len) } != 0 {
            warn!("munmap failed: {}", io::Error::last_os_error());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_driver() {
        let mut driver = V4l2Driver::new();
        assert!(!driver.is_open());
        let err = driver.query_capabilities().unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
        driver.close();
        driver.close();
    }

    #[test]
    fn test_open_rejects_regular_file() {
        let mut driver = V4l2Driver::new();
        let err = driver.open(Path::new("Cargo.toml")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(!driver.is_open());
    }

    #[test]
    fn test_open_missing() {
        let mut driver = V4l2Driver::new();
        let err = driver.open(Path::new("/dev/does-not-exist")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
