// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Capture buffers and the three ways of exchanging them with a driver.
//!
//! A [`CaptureBuffer`] is owned either by the application or by the kernel.
//! Submitting it to the driver hands it to the kernel; dequeueing it hands it
//! back. Its bytes are only reachable while the application owns it.
//!
//! | [`IoMethod`] | pool            | buffers                         |
//! |--------------|-----------------|---------------------------------|
//! | `Read`       | [`ReadPool`]    | one heap buffer, filled by `read()` |
//! | `Mmap`       | [`MmapPool`]    | driver allocated, mapped, at least 2 |
//! | `UserPtr`    | [`UserPtrPool`] | four page aligned heap buffers  |

use crate::{
    driver::{BufferDesc, Driver, MappedRegion, Memory},
    error::{is_transient, CameraError, Result},
};
use std::{
    alloc::{alloc_zeroed, dealloc, Layout},
    fmt,
    path::Path,
    ptr::NonNull,
    slice::{from_raw_parts, from_raw_parts_mut},
    str::FromStr,
};
use tracing::{debug, error, warn};

/// Buffers requested from the driver for memory-mapped streaming.
pub const MMAP_BUFFER_REQUEST: u32 = 4;

/// Buffers allocated for user-pointer streaming.
pub const USERPTR_BUFFER_COUNT: u32 = 4;

/// Streaming needs one buffer being filled while another is queued.
pub const MIN_STREAMING_BUFFERS: u32 = 2;

/// How frames are exchanged with the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoMethod {
    /// Blocking-style `read()` into a single application buffer.
    Read,
    /// Driver allocated buffers mapped into the process.
    #[default]
    Mmap,
    /// Application allocated buffers handed to the driver by address.
    UserPtr,
}

impl IoMethod {
    /// Whether this method uses the streaming queue protocol.
    pub fn is_streaming(self) -> bool {
        !matches!(self, IoMethod::Read)
    }

    /// Builds an empty pool for this method.
    pub fn pool(self) -> Box<dyn BufferPool> {
        match self {
            IoMethod::Read => Box::<ReadPool>::default(),
            IoMethod::Mmap => Box::<MmapPool>::default(),
            IoMethod::UserPtr => Box::<UserPtrPool>::default(),
        }
    }
}

impl fmt::Display for IoMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IoMethod::Read => "read",
            IoMethod::Mmap => "mmap",
            IoMethod::UserPtr => "userptr",
        })
    }
}

impl FromStr for IoMethod {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "read" => Ok(IoMethod::Read),
            "mmap" => Ok(IoMethod::Mmap),
            "userptr" => Ok(IoMethod::UserPtr),
            other => Err(CameraError::Config(format!("unknown io method '{other}'"))),
        }
    }
}

/// Which side of the driver boundary may touch a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Kernel,
    Application,
}

/// Zeroed heap allocation with a chosen alignment.
pub struct AlignedBuf {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
}

impl AlignedBuf {
    pub fn zeroed(len: usize, align: usize) -> Result<Self> {
        let layout = Layout::from_size_align(len.max(1), align)
            .map_err(|e| CameraError::Config(format!("buffer layout {len}/{align}: {e}")))?;
        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or(CameraError::OutOfMemory("capture buffer"))?;
        Ok(Self { ptr, len, layout })
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` owns `layout.size() >= len` zeroed bytes for the
        // lifetime of `self`.
        unsafe { from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as for `as_slice`, and `&mut self` makes the borrow unique.
        unsafe { from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        // SAFETY: `ptr` came from `alloc_zeroed(layout)` and is freed once.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl fmt::Debug for AlignedBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AlignedBuf({:p}, {} bytes)", self.ptr, self.len)
    }
}

enum Backing {
    Heap(AlignedBuf),
    Mapped(Box<dyn MappedRegion>),
}

impl Backing {
    fn as_slice(&self) -> &[u8] {
        match self {
            Backing::Heap(buf) => buf.as_slice(),
            Backing::Mapped(region) => region.as_slice(),
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Backing::Heap(buf) => buf.as_mut_slice(),
            Backing::Mapped(region) => region.as_mut_slice(),
        }
    }
}

/// One frame sized region exchanged with the driver.
pub struct CaptureBuffer {
    index: usize,
    backing: Backing,
    owner: Owner,
}

impl CaptureBuffer {
    fn new(index: usize, backing: Backing) -> Self {
        Self {
            index,
            backing,
            owner: Owner::Application,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn owner(&self) -> Owner {
        self.owner
    }

    pub fn len(&self) -> usize {
        self.backing.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start address, used to identify user-pointer buffers.
    pub fn addr(&self) -> usize {
        self.backing.as_slice().as_ptr() as usize
    }

    pub fn bytes(&self) -> Result<&[u8]> {
        self.check_owner()?;
        Ok(self.backing.as_slice())
    }

    pub fn bytes_mut(&mut self) -> Result<&mut [u8]> {
        self.check_owner()?;
        Ok(self.backing.as_mut_slice())
    }

    fn check_owner(&self) -> Result<()> {
        match self.owner {
            Owner::Application => Ok(()),
            Owner::Kernel => Err(CameraError::Ownership {
                index: self.index,
                owner: Owner::Kernel,
            }),
        }
    }

    fn reclaim(&mut self) -> Result<()> {
        match self.owner {
            Owner::Kernel => {
                self.owner = Owner::Application;
                Ok(())
            }
            Owner::Application => Err(CameraError::Ownership {
                index: self.index,
                owner: Owner::Application,
            }),
        }
    }
}

impl fmt::Debug for CaptureBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureBuffer")
            .field("index", &self.index)
            .field("len", &self.len())
            .field("owner", &self.owner)
            .finish()
    }
}

/// The set of capture buffers and the protocol used to fill them.
pub trait BufferPool {
    fn method(&self) -> IoMethod;

    /// Builds the pool for frames of `image_size` bytes. On failure nothing
    /// stays allocated or mapped.
    fn allocate(&mut self, driver: &mut dyn Driver, path: &Path, image_size: usize)
        -> Result<()>;

    /// Hands every buffer to the driver's incoming queue.
    fn submit_all(&mut self, driver: &mut dyn Driver) -> Result<()>;

    /// Obtains one filled buffer. `Ok(None)` means no frame is ready yet.
    fn dequeue(&mut self, driver: &mut dyn Driver) -> Result<Option<usize>>;

    /// Returns a dequeued buffer to the driver for reuse.
    fn requeue(&mut self, driver: &mut dyn Driver, index: usize) -> Result<()>;

    fn buffers(&self) -> &[CaptureBuffer];

    /// Frees or unmaps every buffer. Safe on empty and partial pools.
    fn release(&mut self);

    fn frame(&self, index: usize) -> Result<&[u8]> {
        self.buffers()
            .get(index)
            .ok_or(CameraError::UnknownBuffer)?
            .bytes()
    }
}

fn request_error(path: &Path, method: IoMethod, source: std::io::Error) -> CameraError {
    if source.raw_os_error() == Some(libc::EINVAL) {
        error!("{} does not support {} i/o", path.display(), method);
        CameraError::Unsupported {
            path: path.to_path_buf(),
            method,
        }
    } else {
        error!("VIDIOC_REQBUFS error {source}");
        CameraError::Ioctl {
            op: "VIDIOC_REQBUFS",
            source,
        }
    }
}

/// Maps a dequeue/read failure onto "no frame yet" or a hard error.
fn not_ready(op: &'static str, err: std::io::Error) -> Result<Option<usize>> {
    if is_transient(&err) {
        if err.raw_os_error() == Some(libc::EIO) {
            warn!("{op} reported EIO, treating as no frame");
        }
        return Ok(None);
    }
    error!("{op} error {err}");
    Err(CameraError::Ioctl { op, source: err })
}

fn submit(
    driver: &mut dyn Driver,
    buffer: &mut CaptureBuffer,
    memory: Memory,
) -> Result<()> {
    buffer.check_owner()?;
    let desc = BufferDesc {
        index: buffer.index as u32,
        memory,
        userptr: match memory {
            Memory::UserPtr => buffer.addr(),
            Memory::Mmap => 0,
        },
        length: buffer.len() as u32,
        bytes_used: 0,
    };
    driver.queue_buffer(&desc).map_err(|source| {
        error!("VIDIOC_QBUF error {source}");
        CameraError::Ioctl {
            op: "VIDIOC_QBUF",
            source,
        }
    })?;
    buffer.owner = Owner::Kernel;
    Ok(())
}

/// Single buffer filled with `read()`.
#[derive(Debug, Default)]
pub struct ReadPool {
    buffers: Vec<CaptureBuffer>,
}

impl BufferPool for ReadPool {
    fn method(&self) -> IoMethod {
        IoMethod::Read
    }

    fn allocate(&mut self, _driver: &mut dyn Driver, _path: &Path, image_size: usize) -> Result<()> {
        self.release();
        let buf = AlignedBuf::zeroed(image_size, std::mem::align_of::<u64>())?;
        self.buffers.push(CaptureBuffer::new(0, Backing::Heap(buf)));
        debug!("read buffer {image_size} bytes");
        Ok(())
    }

    fn submit_all(&mut self, _driver: &mut dyn Driver) -> Result<()> {
        Ok(())
    }

    fn dequeue(&mut self, driver: &mut dyn Driver) -> Result<Option<usize>> {
        let buffer = self.buffers.first_mut().ok_or(CameraError::UnknownBuffer)?;
        match driver.read_frame(buffer.bytes_mut()?) {
            Ok(n) => {
                debug!("read {n} bytes");
                Ok(Some(0))
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Ok(None),
            Err(e) if is_transient(&e) => not_ready("read", e),
            Err(e) => {
                error!("read error {e}");
                Err(CameraError::Read(e))
            }
        }
    }

    fn requeue(&mut self, _driver: &mut dyn Driver, _index: usize) -> Result<()> {
        Ok(())
    }

    fn buffers(&self) -> &[CaptureBuffer] {
        &self.buffers
    }

    fn release(&mut self) {
        self.buffers.clear();
    }
}

/// Driver allocated buffers mapped into the process.
#[derive(Debug, Default)]
pub struct MmapPool {
    buffers: Vec<CaptureBuffer>,
}

impl BufferPool for MmapPool {
    fn method(&self) -> IoMethod {
        IoMethod::Mmap
    }

    fn allocate(&mut self, driver: &mut dyn Driver, path: &Path, _image_size: usize) -> Result<()> {
        self.release();
        let granted = driver
            .request_buffers(Memory::Mmap, MMAP_BUFFER_REQUEST)
            .map_err(|e| request_error(path, IoMethod::Mmap, e))?;
        if granted < MIN_STREAMING_BUFFERS {
            error!("insufficient buffer memory on {}", path.display());
            return Err(CameraError::InsufficientBuffers {
                path: path.to_path_buf(),
                granted,
            });
        }

        // Published only once every buffer is mapped; dropping the partial
        // list unmaps what was already mapped.
        let mut buffers = Vec::with_capacity(granted as usize);
        for index in 0..granted {
            let info = driver.query_buffer(index).map_err(|source| {
                error!("VIDIOC_QUERYBUF error {source}");
                CameraError::Ioctl {
                    op: "VIDIOC_QUERYBUF",
                    source,
                }
            })?;
            let region = driver.map_buffer(&info).map_err(|source| {
                error!("mmap error {source}");
                CameraError::Map { index, source }
            })?;
            debug!(
                "mapped buffer {} {} bytes at offset {}",
                index, info.length, info.offset
            );
            buffers.push(CaptureBuffer::new(index as usize, Backing::Mapped(region)));
        }
        self.buffers = buffers;
        Ok(())
    }

    fn submit_all(&mut self, driver: &mut dyn Driver) -> Result<()> {
        for buffer in self.buffers.iter_mut() {
            submit(driver, buffer, Memory::Mmap)?;
        }
        Ok(())
    }

    fn dequeue(&mut self, driver: &mut dyn Driver) -> Result<Option<usize>> {
        let desc = match driver.dequeue_buffer(Memory::Mmap) {
            Ok(desc) => desc,
            Err(e) => return not_ready("VIDIOC_DQBUF", e),
        };
        let buffer = self
            .buffers
            .get_mut(desc.index as usize)
            .ok_or(CameraError::UnknownBuffer)?;
        buffer.reclaim()?;
        Ok(Some(buffer.index))
    }

    fn requeue(&mut self, driver: &mut dyn Driver, index: usize) -> Result<()> {
        let buffer = self.buffers.get_mut(index).ok_or(CameraError::UnknownBuffer)?;
        submit(driver, buffer, Memory::Mmap)
    }

    fn buffers(&self) -> &[CaptureBuffer] {
        &self.buffers
    }

    fn release(&mut self) {
        if !self.buffers.is_empty() {
            debug!("unmapping {} buffers", self.buffers.len());
        }
        self.buffers.clear();
    }
}

/// Application allocated, page aligned buffers passed by address.
#[derive(Debug, Default)]
pub struct UserPtrPool {
    buffers: Vec<CaptureBuffer>,
}

/// System page size, used to align user-pointer buffers.
pub fn page_size() -> usize {
    // SAFETY: sysconf has no memory preconditions.
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        n if n > 0 => n as usize,
        _ => 4096,
    }
}

impl BufferPool for UserPtrPool {
    fn method(&self) -> IoMethod {
        IoMethod::UserPtr
    }

    fn allocate(&mut self, driver: &mut dyn Driver, path: &Path, image_size: usize) -> Result<()> {
        self.release();
        let page = page_size();
        let size = (image_size + page - 1) & !(page - 1);

        let granted = driver
            .request_buffers(Memory::UserPtr, USERPTR_BUFFER_COUNT)
            .map_err(|e| request_error(path, IoMethod::UserPtr, e))?;
        if granted < USERPTR_BUFFER_COUNT {
            warn!(
                "driver accepted {granted} of {USERPTR_BUFFER_COUNT} user pointer buffers on {}",
                path.display()
            );
        } else {
            debug!("driver accepted {granted} user pointer buffers");
        }

        let mut buffers = Vec::with_capacity(USERPTR_BUFFER_COUNT as usize);
        for index in 0..USERPTR_BUFFER_COUNT as usize {
            let buf = AlignedBuf::zeroed(size, page).inspect_err(|_| {
                error!("out of memory allocating user pointer buffer {index}");
            })?;
            buffers.push(CaptureBuffer::new(index, Backing::Heap(buf)));
        }
        self.buffers = buffers;
        Ok(())
    }

    fn submit_all(&mut self, driver: &mut dyn Driver) -> Result<()> {
        for buffer in self.buffers.iter_mut() {
            submit(driver, buffer, Memory::UserPtr)?;
        }
        Ok(())
    }

    fn dequeue(&mut self, driver: &mut dyn Driver) -> Result<Option<usize>> {
        let desc = match driver.dequeue_buffer(Memory::UserPtr) {
            Ok(desc) => desc,
            Err(e) => return not_ready("VIDIOC_DQBUF", e),
        };
        let Some(buffer) = self
            .buffers
            .iter_mut()
            .find(|b| b.addr() == desc.userptr && b.len() == desc.length as usize)
        else {
            error!(
                "dequeued user pointer {:#x}/{} is not in the pool, requeueing it",
                desc.userptr, desc.length
            );
            if let Err(e) = driver.queue_buffer(&desc) {
                error!("VIDIOC_QBUF error {e}");
            }
            return Err(CameraError::UnknownBuffer);
        };
        buffer.reclaim()?;
        Ok(Some(buffer.index))
    }

    fn requeue(&mut self, driver: &mut dyn Driver, index: usize) -> Result<()> {
        let buffer = self.buffers.get_mut(index).ok_or(CameraError::UnknownBuffer)?;
        submit(driver, buffer, Memory::UserPtr)
    }

    fn buffers(&self) -> &[CaptureBuffer] {
        &self.buffers
    }

    fn release(&mut self) {
        self.buffers.clear();
    }
}
