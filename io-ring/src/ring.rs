//! Typed views over the mapped rings and the driver operating on them.
#![allow(unsafe_code)]
use core::mem;
use core::sync::atomic::{AtomicU32, Ordering};
use std::fmt;
use std::os::unix::io::{AsRawFd, RawFd};

use crate::sys::{self, Cqe, Errno, Sqe};

/// Everything that can go wrong while driving the ring.
///
/// No variant is retried anywhere in this crate; every error is reported
/// synchronously from the operation that detected it.
#[derive(Debug)]
pub enum Error {
    /// The kernel refused to create the ring. Fatal, nothing was mapped.
    Create(Errno),
    /// A shared memory mapping failed after creation succeeded. Fatal; the
    /// mappings made so far and the descriptor are released on the way out.
    Map(Errno),
    /// The submit/wait syscall failed or was interrupted. The errno is
    /// preserved so callers can tell `EINTR` from hard failures and retry
    /// with the same or adjusted counts.
    Enter(Errno),
    /// The kernel accepted fewer entries than were submitted. Carries the
    /// accepted count.
    Partial(u32),
    /// Every submission slot is occupied by an in-flight request. Reap a
    /// completion to free capacity.
    Full,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Create(err) => write!(f, "ring creation refused: {}", err),
            Error::Map(err) => write!(f, "ring mapping failed: {}", err),
            Error::Enter(err) => write!(f, "ring enter failed: {}", err),
            Error::Partial(accepted) => {
                write!(f, "kernel accepted only {} submitted entries", accepted)
            }
            Error::Full => write!(f, "all submission slots are in flight"),
        }
    }
}

impl std::error::Error for Error {}

/// The view over the submission ring.
///
/// A live window into two kernel-shared mappings: the metadata region
/// (counters, mask, index array) and the entry slot array. The process owns
/// writes to the tail and the index array; the kernel owns writes to the
/// head. This single-writer-per-field split is the entire synchronization
/// mechanism, so the view must only ever be driven from one thread. The raw
/// pointers keep it `!Send` accordingly.
pub struct SubmissionQueue {
    /// Keeps the metadata region mapped for as long as the view lives.
    _ring: sys::Mapping,
    /// Keeps the entry slot region mapped for as long as the view lives.
    _slots: sys::Mapping,
    head: *const AtomicU32,
    tail: *const AtomicU32,
    ring_mask: *const u32,
    array: *mut u32,
    sqes: *mut Sqe,
}

impl SubmissionQueue {
    fn map(fd: &sys::RingFd, params: &sys::Params) -> Result<Self, Errno> {
        let ring_len = params.sq_off.array as usize
            + params.sq_entries as usize * mem::size_of::<u32>();
        let ring = sys::Mapping::shared(fd, ring_len, sys::OFF_SQ_RING)?;

        let slots_len = params.sq_entries as usize * mem::size_of::<Sqe>();
        let slots = sys::Mapping::shared(fd, slots_len, sys::OFF_SQES)?;

        let head = ring.offset(params.sq_off.head) as *const AtomicU32;
        let tail = ring.offset(params.sq_off.tail) as *const AtomicU32;
        let ring_mask = ring.offset(params.sq_off.ring_mask) as *const u32;
        let array = ring.offset(params.sq_off.array) as *mut u32;
        let sqes = slots.base() as *mut Sqe;

        Ok(SubmissionQueue {
            _ring: ring,
            _slots: slots,
            head,
            tail,
            ring_mask,
            array,
            sqes,
        })
    }

    /// The kernel's consumption counter.
    pub fn head(&self) -> u32 {
        unsafe { (*self.head).load(Ordering::Acquire) }
    }

    /// The process's production counter.
    pub fn tail(&self) -> u32 {
        unsafe { (*self.tail).load(Ordering::Acquire) }
    }

    /// Fixed position mask, always one less than the entry count.
    pub fn mask(&self) -> u32 {
        unsafe { *self.ring_mask }
    }

    /// Number of entry slots in the ring.
    pub fn capacity(&self) -> u32 {
        self.mask() + 1
    }

    /// The slot index published for ring position `pos & mask`.
    ///
    /// Acquisition always publishes the identity mapping, so this equals the
    /// masked position for every slot handed out so far.
    pub fn array_entry(&self, pos: u32) -> u32 {
        unsafe { *self.array.add((pos & self.mask()) as usize) }
    }

    /// Reserve the next slot in natural index order and hand it out zeroed.
    ///
    /// The tail moves before the slot is populated. That is sound here: the
    /// kernel inspects entries only between its last-seen head and the tail
    /// it reads at enter time, and population always happens before enter.
    fn acquire(&mut self) -> &mut Sqe {
        let tail = unsafe { (*self.tail).load(Ordering::Relaxed) };
        let index = tail & self.mask();

        // Publish that ring position `index` maps to slot `index`.
        unsafe { *self.array.add(index as usize) = index };
        unsafe { (*self.tail).store(tail.wrapping_add(1), Ordering::Release) };

        let slot = unsafe { &mut *self.sqes.add(index as usize) };
        *slot = Sqe::default();
        slot
    }
}

/// The view over the completion ring.
///
/// The inverse write split of [`SubmissionQueue`]: the kernel produces at the
/// tail, the process consumes at the head.
pub struct CompletionQueue {
    /// Keeps the completion region mapped for as long as the view lives.
    _ring: sys::Mapping,
    head: *const AtomicU32,
    tail: *const AtomicU32,
    ring_mask: *const u32,
    cqes: *const Cqe,
}

impl CompletionQueue {
    fn map(fd: &sys::RingFd, params: &sys::Params) -> Result<Self, Errno> {
        let ring_len = params.cq_off.cqes as usize
            + params.cq_entries as usize * mem::size_of::<Cqe>();
        let ring = sys::Mapping::shared(fd, ring_len, sys::OFF_CQ_RING)?;

        let head = ring.offset(params.cq_off.head) as *const AtomicU32;
        let tail = ring.offset(params.cq_off.tail) as *const AtomicU32;
        let ring_mask = ring.offset(params.cq_off.ring_mask) as *const u32;
        let cqes = ring.offset(params.cq_off.cqes) as *const Cqe;

        Ok(CompletionQueue {
            _ring: ring,
            head,
            tail,
            ring_mask,
            cqes,
        })
    }

    /// The process's consumption counter.
    pub fn head(&self) -> u32 {
        unsafe { (*self.head).load(Ordering::Acquire) }
    }

    /// The kernel's production counter.
    pub fn tail(&self) -> u32 {
        unsafe { (*self.tail).load(Ordering::Acquire) }
    }

    /// Fixed position mask, always one less than the result slot count.
    pub fn mask(&self) -> u32 {
        unsafe { *self.ring_mask }
    }

    /// Number of result slots in the ring.
    pub fn capacity(&self) -> u32 {
        self.mask() + 1
    }

    /// Take the oldest unread result, or nothing without blocking.
    ///
    /// The slot contents are copied out before the head advances, so the
    /// returned record stays valid while the kernel reuses the slot. The
    /// head advances exactly once per consumed slot.
    fn pop(&mut self) -> Option<Cqe> {
        let head = unsafe { (*self.head).load(Ordering::Relaxed) };
        let tail = unsafe { (*self.tail).load(Ordering::Acquire) };

        if head == tail {
            return None;
        }

        let index = head & self.mask();
        let entry = unsafe { *self.cqes.add(index as usize) };
        unsafe { (*self.head).store(head.wrapping_add(1), Ordering::Release) };

        Some(entry)
    }
}

/// An initialized ring: the kernel descriptor plus both mapped views.
///
/// Creating one issues a single kernel call and three shared mappings. Both
/// views and the descriptor are released when the ring is dropped, including
/// on every early-exit path of a failed initialization.
pub struct Ring {
    fd: sys::RingFd,
    sq: SubmissionQueue,
    cq: CompletionQueue,
    in_flight: u32,
}

impl Ring {
    /// Create a ring with `depth` submission slots.
    ///
    /// The completion ring is sized to the same depth, so completions are
    /// bounded by the same capacity the in-flight accounting enforces and
    /// both views report the same mask. The kernel rounds a depth that is
    /// not a power of two up to the next one.
    pub fn new(depth: u32) -> Result<Ring, Error> {
        let mut params = sys::Params::default();
        params.flags = sys::SETUP_CQSIZE;
        params.cq_entries = depth;

        let fd = sys::setup(depth, &mut params).map_err(Error::Create)?;
        let sq = SubmissionQueue::map(&fd, &params).map_err(Error::Map)?;
        let cq = CompletionQueue::map(&fd, &params).map_err(Error::Map)?;

        Ok(Ring {
            fd,
            sq,
            cq,
            in_flight: 0,
        })
    }

    /// Reserve one entry slot for the caller to populate.
    ///
    /// The slot is consumed by the kernel on the next [`enter`] and must not
    /// be touched after that. Fails with [`Error::Full`] once as many
    /// requests are in flight as the ring has slots; reaping a completion
    /// frees capacity again.
    ///
    /// [`enter`]: #method.enter
    pub fn acquire(&mut self) -> Result<&mut Sqe, Error> {
        if self.in_flight >= self.sq.capacity() {
            return Err(Error::Full);
        }

        self.in_flight += 1;
        Ok(self.sq.acquire())
    }

    /// Reserve a slot and fill it with a write of `buf` to `fd`.
    ///
    /// Pure data population; the kernel is not involved until [`enter`].
    ///
    /// # Safety
    ///
    /// The kernel reads `buf` at some point between the next `enter` and the
    /// completion of this request. The caller must keep the buffer alive and
    /// unmoved until the matching completion has been reaped.
    ///
    /// [`enter`]: #method.enter
    pub unsafe fn prepare_write(&mut self, fd: RawFd, buf: &[u8]) -> Result<(), Error> {
        let sqe = self.acquire()?;

        sqe.opcode = sys::OP_WRITE;
        sqe.fd = fd;
        sqe.addr = buf.as_ptr() as u64;
        sqe.len = buf.len() as u32;

        Ok(())
    }

    /// Notify the kernel of `to_submit` new entries and optionally wait.
    ///
    /// With [`ENTER_GETEVENTS`] in `flags` and `min_complete` greater than
    /// zero this blocks the calling thread until that many completions are
    /// available or the wait is interrupted. Returns the number of entries
    /// the kernel accepted; accepting fewer than `to_submit` is reported as
    /// [`Error::Partial`] rather than silently ignored.
    ///
    /// [`ENTER_GETEVENTS`]: ../constant.ENTER_GETEVENTS.html
    pub fn enter(&mut self, to_submit: u32, min_complete: u32, flags: u32) -> Result<u32, Error> {
        let accepted =
            sys::enter(&self.fd, to_submit, min_complete, flags).map_err(Error::Enter)?;

        if accepted < to_submit {
            return Err(Error::Partial(accepted));
        }

        Ok(accepted)
    }

    /// Submit and wait in one call, choosing the flags accordingly.
    pub fn submit_and_wait(&mut self, to_submit: u32, min_complete: u32) -> Result<u32, Error> {
        let flags = if min_complete > 0 {
            sys::ENTER_GETEVENTS
        } else {
            0
        };
        self.enter(to_submit, min_complete, flags)
    }

    /// Fetch one completed result, or `None` on an empty ring.
    ///
    /// An empty ring is an expected, frequent outcome, not an error.
    /// Results come back in the order the kernel produced them.
    pub fn reap(&mut self) -> Option<Cqe> {
        let entry = self.cq.pop()?;
        self.in_flight = self.in_flight.saturating_sub(1);
        Some(entry)
    }

    /// Requests acquired but not yet reaped.
    pub fn in_flight(&self) -> u32 {
        self.in_flight
    }

    /// The submission queue view, for observation.
    pub fn submission(&self) -> &SubmissionQueue {
        &self.sq
    }

    /// The completion queue view, for observation.
    pub fn completion(&self) -> &CompletionQueue {
        &self.cq
    }
}

impl AsRawFd for Ring {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
