//! Memory-mapped streaming I/O on a raw V4L2 file descriptor.
//!
//! Buffers are requested, mapped, queued and dequeued one index at a time so
//! the session can track ownership of each slot itself.
#![allow(unsafe_code)]

use std::io;
use std::os::unix::io::RawFd;
use std::ptr::{self, NonNull};
use std::time::Duration;

use v4l::buffer::Type;
use v4l::memory::Memory;
use v4l::v4l2::vidioc;
use v4l::v4l_sys::{v4l2_buffer, v4l2_requestbuffers};

use crate::traits::FrameMetadata;

/// `_IOW('V', 68, enum v4l2_priority)`
const VIDIOC_S_PRIORITY: libc::c_ulong = 0x4004_5644;
/// `V4L2_PRIORITY_RECORD`: exclusive use of the device.
const PRIORITY_RECORD: u32 = 3;

/// One driver buffer mapped into the process. Unmapped on drop.
pub struct MappedBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

impl MappedBuffer {
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` came from a successful mmap of `len` bytes and stays
        // mapped until drop.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

// SAFETY: the mapping is owned by this value alone and only ever read.
unsafe impl Send for MappedBuffer {}

impl Drop for MappedBuffer {
    fn drop(&mut self) {
        // SAFETY: unmapping exactly the region returned by mmap.
        let result = unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.len) };
        if result < 0 {
            tracing::warn!(len = self.len, error = %io::Error::last_os_error(), "munmap failed");
        }
    }
}

fn ioctl<T>(fd: RawFd, request: libc::c_ulong, arg: &mut T) -> io::Result<()> {
    loop {
        // SAFETY: `arg` is the struct the request expects and outlives the call.
        let result = unsafe { libc::ioctl(fd, request as _, ptr::from_mut(arg)) };
        if result >= 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

fn capture_buffer(index: u32) -> v4l2_buffer {
    // SAFETY: plain C struct, all-zero is a valid value.
    let mut buf: v4l2_buffer = unsafe { std::mem::zeroed() };
    buf.index = index;
    buf.type_ = Type::VideoCapture as u32;
    buf.memory = Memory::Mmap as u32;
    buf
}

/// Ask for exclusive use of the device. `EBUSY` means someone else holds it;
/// drivers without priority support accept any caller.
pub fn claim_exclusive(fd: RawFd) -> io::Result<()> {
    let mut priority = PRIORITY_RECORD;
    match ioctl(fd, VIDIOC_S_PRIORITY, &mut priority) {
        Err(err) if err.raw_os_error() == Some(libc::EBUSY) => Err(err),
        _ => Ok(()),
    }
}

/// `VIDIOC_REQBUFS`; returns the number of buffers the driver granted.
pub fn request_buffers(fd: RawFd, count: u32) -> io::Result<u32> {
    // SAFETY: plain C struct, all-zero is a valid value.
    let mut req: v4l2_requestbuffers = unsafe { std::mem::zeroed() };
    req.count = count;
    req.type_ = Type::VideoCapture as u32;
    req.memory = Memory::Mmap as u32;
    ioctl(fd, vidioc::VIDIOC_REQBUFS as _, &mut req)?;
    Ok(req.count)
}

/// Query buffer `index` and map it read-only.
pub fn map_buffer(fd: RawFd, index: u32) -> io::Result<MappedBuffer> {
    let mut buf = capture_buffer(index);
    ioctl(fd, vidioc::VIDIOC_QUERYBUF as _, &mut buf)?;

    let len = buf.length as usize;
    // SAFETY: QUERYBUF with MMAP memory fills the `offset` member.
    let offset = unsafe { buf.m.offset };
    let offset = libc::off_t::try_from(offset)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "buffer offset out of range"))?;

    // SAFETY: fresh shared mapping of a driver buffer; the kernel validates
    // the offset and length.
    let addr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ,
            libc::MAP_SHARED,
            fd,
            offset,
        )
    };
    if addr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    NonNull::new(addr.cast::<u8>())
        .map(|ptr| MappedBuffer { ptr, len })
        .ok_or_else(|| io::Error::other("mmap returned null"))
}

/// `VIDIOC_QBUF`
pub fn queue(fd: RawFd, index: u32) -> io::Result<()> {
    let mut buf = capture_buffer(index);
    ioctl(fd, vidioc::VIDIOC_QBUF as _, &mut buf)
}

/// `VIDIOC_DQBUF`
pub fn dequeue(fd: RawFd) -> io::Result<FrameMetadata> {
    let mut buf = capture_buffer(0);
    ioctl(fd, vidioc::VIDIOC_DQBUF as _, &mut buf)?;

    let secs = u64::try_from(buf.timestamp.tv_sec).unwrap_or(0);
    let nanos = u32::try_from(buf.timestamp.tv_usec)
        .unwrap_or(0)
        .saturating_mul(1000);
    Ok(FrameMetadata {
        index: buf.index as usize,
        sequence: buf.sequence,
        timestamp: Duration::new(secs, nanos),
        bytes_used: buf.bytesused,
    })
}

/// `VIDIOC_STREAMON` / `VIDIOC_STREAMOFF`
pub fn set_streaming(fd: RawFd, on: bool) -> io::Result<()> {
    let mut typ = Type::VideoCapture as libc::c_int;
    let request = if on {
        vidioc::VIDIOC_STREAMON
    } else {
        vidioc::VIDIOC_STREAMOFF
    };
    ioctl(fd, request as _, &mut typ)
}

/// Wait until the device has a filled buffer. `Ok(false)` on timeout.
pub fn poll_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout_ms = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);
    loop {
        // SAFETY: one valid pollfd.
        let result = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if result >= 0 {
            // POLLERR is left for DQBUF to explain
            return Ok(result > 0);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}
