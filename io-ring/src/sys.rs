//! The raw kernel boundary: setup and enter syscalls, shared mappings, ABI types.
//!
//! Everything the kernel reports or consumes crosses through here. The layout
//! structs mirror the kernel ABI exactly and the reported field offsets are
//! honored as opaque values, never assumed.
#![allow(unsafe_code)]
use core::ptr;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

use libc;

/// Region selector for the submission queue metadata mapping.
pub(crate) const OFF_SQ_RING: libc::off_t = 0;
/// Region selector for the completion queue mapping.
pub(crate) const OFF_CQ_RING: libc::off_t = 0x8000000;
/// Region selector for the submission entry slot mapping.
pub(crate) const OFF_SQES: libc::off_t = 0x10000000;

/// Setup flag requesting an explicit completion ring size.
pub(crate) const SETUP_CQSIZE: u32 = 1 << 3;

/// Enter flag: block until `min_complete` completions are available.
pub const ENTER_GETEVENTS: u32 = 1 << 0;

/// Opcode for a no-op request, completes immediately with result 0.
pub const OP_NOP: u8 = 0;
/// Opcode for a plain write from a user buffer.
pub const OP_WRITE: u8 = 23;

/// An errno value, the error representation of every raw kernel call here.
///
/// Converting into a `std::io::Error` attaches the OS error description.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Errno(pub libc::c_int);

#[derive(Clone, Copy)]
struct SyscallResult(libc::c_long);

/// Interprets a raw integer return value as success or errno.
trait LibcResult: Copy {
    fn is_fail(self) -> bool;

    fn errno(self) -> Result<(), Errno> {
        if self.is_fail() {
            Err(Errno::new())
        } else {
            Ok(())
        }
    }
}

impl Errno {
    pub fn new() -> Errno {
        Errno(unsafe { *libc::__errno_location() })
    }
}

impl LibcResult for SyscallResult {
    fn is_fail(self) -> bool {
        self.0 < 0
    }
}

impl From<Errno> for io::Error {
    fn from(err: Errno) -> io::Error {
        io::Error::from_raw_os_error(err.0 as i32)
    }
}

impl core::fmt::Display for Errno {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "{}", io::Error::from_raw_os_error(self.0))
    }
}

/// Submission ring field offsets, reported by the kernel at setup.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct SqOffsets {
    pub(crate) head: u32,
    pub(crate) tail: u32,
    pub(crate) ring_mask: u32,
    pub(crate) ring_entries: u32,
    pub(crate) flags: u32,
    pub(crate) dropped: u32,
    pub(crate) array: u32,
    resv1: u32,
    user_addr: u64,
}

/// Completion ring field offsets, reported by the kernel at setup.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct CqOffsets {
    pub(crate) head: u32,
    pub(crate) tail: u32,
    pub(crate) ring_mask: u32,
    pub(crate) ring_entries: u32,
    pub(crate) overflow: u32,
    pub(crate) cqes: u32,
    pub(crate) flags: u32,
    resv1: u32,
    user_addr: u64,
}

/// The parameter block exchanged with `io_uring_setup`.
///
/// The process fills in the requested flags, the kernel fills in the entry
/// counts it actually granted and the layout offsets of both rings.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Params {
    pub(crate) sq_entries: u32,
    pub(crate) cq_entries: u32,
    pub(crate) flags: u32,
    pub(crate) sq_thread_cpu: u32,
    pub(crate) sq_thread_idle: u32,
    pub(crate) features: u32,
    pub(crate) wq_fd: u32,
    resv: [u32; 3],
    pub(crate) sq_off: SqOffsets,
    pub(crate) cq_off: CqOffsets,
}

/// One request descriptor, a fixed 64-byte slot in the submission ring.
///
/// The process populates a slot and must not touch it again once the kernel
/// has been notified; the kernel consumes it during `enter`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct Sqe {
    pub opcode: u8,
    pub flags: u8,
    pub ioprio: u16,
    pub fd: i32,
    pub off: u64,
    pub addr: u64,
    pub len: u32,
    pub op_flags: u32,
    pub user_data: u64,
    pub buf_index: u16,
    pub personality: u16,
    pub splice_fd_in: i32,
    pad: [u64; 2],
}

/// One result descriptor, a fixed 16-byte slot in the completion ring.
///
/// Filled by the kernel; only valid to read while the head/tail protocol
/// says the slot is occupied.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct Cqe {
    pub user_data: u64,
    pub res: i32,
    pub flags: u32,
}

impl Cqe {
    /// Interpret the raw result as bytes-transferred or an OS error.
    pub fn result(&self) -> Result<u32, Errno> {
        if self.res < 0 {
            Err(Errno(-self.res))
        } else {
            Ok(self.res as u32)
        }
    }
}

/// The kernel-assigned ring descriptor.
///
/// Closed on drop, which also invalidates the ring behind all mappings that
/// were created from it.
#[derive(Debug)]
pub(crate) struct RingFd(libc::c_int);

impl AsRawFd for RingFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl Drop for RingFd {
    fn drop(&mut self) {
        unsafe { libc::close(self.0) };
    }
}

/// Create a ring of the requested depth.
///
/// Any non-positive return is failure; the kernel reports the granted entry
/// counts and ring layout through `params`.
pub(crate) fn setup(entries: u32, params: &mut Params) -> Result<RingFd, Errno> {
    let fd = unsafe {
        libc::syscall(
            libc::SYS_io_uring_setup,
            entries as libc::c_ulong,
            params as *mut Params,
        )
    };

    if fd <= 0 {
        return Err(Errno::new());
    }

    Ok(RingFd(fd as libc::c_int))
}

/// Tell the kernel to consume `to_submit` entries and, depending on `flags`,
/// wait for `min_complete` completions.
///
/// Returns the number of entries the kernel accepted. Blocks for a
/// kernel-controlled duration when a wait was requested.
pub(crate) fn enter(
    fd: &RingFd,
    to_submit: u32,
    min_complete: u32,
    flags: u32,
) -> Result<u32, Errno> {
    let res = unsafe {
        libc::syscall(
            libc::SYS_io_uring_enter,
            fd.0 as libc::c_ulong,
            to_submit as libc::c_ulong,
            min_complete as libc::c_ulong,
            flags as libc::c_ulong,
            ptr::null::<libc::sigset_t>(),
            0 as libc::size_t,
        )
    };

    SyscallResult(res).errno()?;

    Ok(res as u32)
}

/// A shared, eagerly populated mapping backed by the ring descriptor.
///
/// This is coherent memory between the process and the kernel: reads observe
/// the latest kernel-written value and writes need no explicit flush.
/// Unmapped on drop so a partially initialized ring rolls itself back.
pub(crate) struct Mapping {
    ptr: *mut libc::c_void,
    len: usize,
}

impl Mapping {
    pub(crate) fn shared(fd: &RingFd, len: usize, offset: libc::off_t) -> Result<Mapping, Errno> {
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_POPULATE,
                fd.0,
                offset,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(Errno::new());
        }

        Ok(Mapping { ptr, len })
    }

    /// Pointer to a kernel-reported byte offset within the mapping.
    pub(crate) fn offset(&self, bytes: u32) -> *mut u8 {
        debug_assert!((bytes as usize) < self.len);
        unsafe { (self.ptr as *mut u8).add(bytes as usize) }
    }

    pub(crate) fn base(&self) -> *mut u8 {
        self.ptr as *mut u8
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        unsafe { libc::munmap(self.ptr, self.len) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem;

    #[test]
    fn abi_layout() {
        assert_eq!(mem::size_of::<SqOffsets>(), 40);
        assert_eq!(mem::size_of::<CqOffsets>(), 40);
        assert_eq!(mem::size_of::<Params>(), 120);
        assert_eq!(mem::size_of::<Sqe>(), 64);
        assert_eq!(mem::size_of::<Cqe>(), 16);
    }
}
