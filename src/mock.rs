// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Scripted [`Driver`] used by the unit tests.

use crate::driver::{
    BufferDesc, BufferInfo, Capabilities, Driver, MappedRegion, Memory, PixFormat,
};
use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    io,
    path::{Path, PathBuf},
    rc::Rc,
    time::Duration,
};

/// Outcome of one `wait_readable` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Timeout,
    Interrupted,
    Fail(i32),
}

fn errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

/// In-memory stand-in for a V4L2 device.
///
/// Single shot overrides (`*_error`, `ready_*`) are consumed by the next
/// matching call.
pub struct FakeDriver {
    pub openable: Vec<PathBuf>,
    pub candidates: Vec<PathBuf>,
    pub caps: Capabilities,
    pub adjust_to: Option<(u32, u32)>,
    pub underreport: bool,
    pub granted: u32,
    pub fill: u8,
    pub default_readiness: Readiness,

    pub query_error: Option<i32>,
    pub crop_error: Option<i32>,
    pub reqbufs_error: Option<i32>,
    pub stream_on_error: Option<i32>,
    pub stream_off_error: Option<i32>,
    pub queue_error: Option<i32>,
    pub dequeue_error: Option<i32>,
    pub read_error: Option<i32>,
    pub fail_map_at: Option<u32>,
    pub ready_index: Option<u32>,
    pub ready_userptr: Option<(usize, u32)>,
    /// Mapped length override for one buffer index.
    pub short_buffer: Option<(u32, u32)>,

    readiness: VecDeque<Readiness>,
    open: Option<PathBuf>,
    opened: Vec<PathBuf>,
    closes: usize,
    format: Option<PixFormat>,
    requested: Option<(Memory, u32)>,
    queued: Vec<BufferDesc>,
    in_kernel: VecDeque<BufferDesc>,
    live_maps: Rc<Cell<usize>>,
    total_maps: usize,
    streaming: bool,
    stream_ons: usize,
    stream_offs: usize,
    waits: usize,
    events: Rc<RefCell<Vec<&'static str>>>,
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDriver {
    pub fn new() -> Self {
        Self {
            openable: vec![PathBuf::from("/dev/video0")],
            candidates: Vec::new(),
            caps: Capabilities {
                driver: "fake".to_owned(),
                card: "Fake Camera".to_owned(),
                bus_info: "platform:fake".to_owned(),
                video_capture: true,
                read_write: true,
                streaming: true,
            },
            adjust_to: None,
            underreport: false,
            granted: 4,
            fill: 128,
            default_readiness: Readiness::Ready,
            query_error: None,
            crop_error: None,
            reqbufs_error: None,
            stream_on_error: None,
            stream_off_error: None,
            queue_error: None,
            dequeue_error: None,
            read_error: None,
            fail_map_at: None,
            ready_index: None,
            ready_userptr: None,
            short_buffer: None,
            readiness: VecDeque::new(),
            open: None,
            opened: Vec::new(),
            closes: 0,
            format: None,
            requested: None,
            queued: Vec::new(),
            in_kernel: VecDeque::new(),
            live_maps: Rc::new(Cell::new(0)),
            total_maps: 0,
            streaming: false,
            stream_ons: 0,
            stream_offs: 0,
            waits: 0,
            events: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Readiness results returned before falling back to `default_readiness`.
    pub fn script(&mut self, steps: impl IntoIterator<Item = Readiness>) {
        self.readiness.extend(steps);
    }

    pub fn opened(&self) -> &[PathBuf] {
        &self.opened
    }

    pub fn closes(&self) -> usize {
        self.closes
    }

    pub fn requested(&self) -> Option<(Memory, u32)> {
        self.requested
    }

    /// Every successful `VIDIOC_QBUF`, in call order.
    pub fn queued(&self) -> &[BufferDesc] {
        &self.queued
    }

    pub fn live_maps(&self) -> usize {
        self.live_maps.get()
    }

    pub fn total_maps(&self) -> usize {
        self.total_maps
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn stream_ons(&self) -> usize {
        self.stream_ons
    }

    pub fn stream_offs(&self) -> usize {
        self.stream_offs
    }

    pub fn waits(&self) -> usize {
        self.waits
    }

    /// Shared log of `stream_off` and `close` calls, in call order. Tests may
    /// push their own entries to interleave other events.
    pub fn events(&self) -> Rc<RefCell<Vec<&'static str>>> {
        Rc::clone(&self.events)
    }

    fn image_size(&self) -> u32 {
        self.format.map_or(640 * 480 * 2, |f| f.size_image)
    }
}

struct FakeRegion {
    data: Vec<u8>,
    live: Rc<Cell<usize>>,
}

impl MappedRegion for FakeRegion {
    fn as_slice(&self) -> &[u8] {
        &self.data
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for FakeRegion {
    fn drop(&mut self) {
        self.live.set(self.live.get() - 1);
    }
}

impl Driver for FakeDriver {
    fn open(&mut self, path: &Path) -> io::Result<()> {
        self.opened.push(path.to_path_buf());
        if !self.openable.iter().any(|p| p == path) {
            return Err(errno(libc::ENOENT));
        }
        self.open = Some(path.to_path_buf());
        Ok(())
    }

    fn close(&mut self) {
        if self.open.take().is_some() {
            self.closes += 1;
            self.events.borrow_mut().push("close");
        }
        self.streaming = false;
        self.in_kernel.clear();
    }

    fn is_open(&self) -> bool {
        self.open.is_some()
    }

    fn candidates(&self) -> Vec<PathBuf> {
        self.candidates.clone()
    }

    fn query_capabilities(&mut self) -> io::Result<Capabilities> {
        match self.query_error.take() {
            Some(code) => Err(errno(code)),
            None => Ok(self.caps.clone()),
        }
    }

    fn reset_crop(&mut self) -> io::Result<()> {
        match self.crop_error.take() {
            Some(code) => Err(errno(code)),
            None => Ok(()),
        }
    }

    fn set_format(&mut self, format: &PixFormat) -> io::Result<PixFormat> {
        let (width, height) = self.adjust_to.unwrap_or((format.width, format.height));
        let (bytes_per_line, size_image) = match self.underreport {
            true => (0, 0),
            false => (width * 2, width * 2 * height),
        };
        let applied = PixFormat {
            width,
            height,
            fourcc: format.fourcc,
            bytes_per_line,
            size_image,
        };
        self.format = Some(applied.floor_corrected());
        Ok(applied)
    }

    fn request_buffers(&mut self, memory: Memory, count: u32) -> io::Result<u32> {
        if let Some(code) = self.reqbufs_error.take() {
            return Err(errno(code));
        }
        self.requested = Some((memory, count));
        Ok(match memory {
            Memory::Mmap => self.granted.min(count),
            Memory::UserPtr => count,
        })
    }

    fn query_buffer(&mut self, index: u32) -> io::Result<BufferInfo> {
        let length = match self.short_buffer {
            Some((short, length)) if short == index => length,
            _ => self.image_size(),
        };
        Ok(BufferInfo {
            index,
            offset: index * length,
            length,
        })
    }

    fn map_buffer(&mut self, info: &BufferInfo) -> io::Result<Box<dyn MappedRegion>> {
        if self.fail_map_at == Some(info.index) {
            return Err(errno(libc::ENOMEM));
        }
        self.total_maps += 1;
        self.live_maps.set(self.live_maps.get() + 1);
        Ok(Box::new(FakeRegion {
            data: vec![self.fill; info.length as usize],
            live: Rc::clone(&self.live_maps),
        }))
    }

    fn queue_buffer(&mut self, desc: &BufferDesc) -> io::Result<()> {
        if let Some(code) = self.queue_error.take() {
            return Err(errno(code));
        }
        self.queued.push(*desc);
        self.in_kernel.push_back(*desc);
        Ok(())
    }

    fn dequeue_buffer(&mut self, memory: Memory) -> io::Result<BufferDesc> {
        if let Some(code) = self.dequeue_error.take() {
            return Err(errno(code));
        }
        let length = self.image_size();
        if let Some(index) = self.ready_index.take() {
            self.in_kernel.retain(|d| d.index != index);
            return Ok(BufferDesc {
                index,
                memory,
                userptr: 0,
                length,
                bytes_used: length,
            });
        }
        if let Some((userptr, length)) = self.ready_userptr.take() {
            self.in_kernel.retain(|d| d.userptr != userptr);
            return Ok(BufferDesc {
                index: 0,
                memory,
                userptr,
                length,
                bytes_used: length,
            });
        }
        match self.in_kernel.pop_front() {
            Some(desc) => Ok(BufferDesc {
                bytes_used: length,
                ..desc
            }),
            None => Err(errno(libc::EAGAIN)),
        }
    }

    fn stream_on(&mut self) -> io::Result<()> {
        if let Some(code) = self.stream_on_error.take() {
            return Err(errno(code));
        }
        self.stream_ons += 1;
        self.streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> io::Result<()> {
        self.stream_offs += 1;
        self.events.borrow_mut().push("stream_off");
        if let Some(code) = self.stream_off_error.take() {
            return Err(errno(code));
        }
        self.streaming = false;
        self.in_kernel.clear();
        Ok(())
    }

    fn wait_readable(&mut self, _timeout: Duration) -> io::Result<bool> {
        self.waits += 1;
        match self.readiness.pop_front().unwrap_or(self.default_readiness) {
            Readiness::Ready => Ok(true),
            Readiness::Timeout => Ok(false),
            Readiness::Interrupted => Err(errno(libc::EINTR)),
            Readiness::Fail(code) => Err(errno(code)),
        }
    }

    fn read_frame(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        if let Some(code) = self.read_error.take() {
            return Err(errno(code));
        }
        dst.fill(self.fill);
        Ok(dst.len())
    }
}
