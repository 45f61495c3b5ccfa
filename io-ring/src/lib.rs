//! A minimal user-space driver for the Linux `io_uring` rings.
//!
//! The kernel exposes asynchronous I/O through two fixed-capacity circular
//! buffers shared with the process via memory mapping: the process hands
//! request descriptors to the kernel through the submission queue and the
//! kernel hands result descriptors back through the completion queue. Each
//! ring is coordinated by a head and tail counter with a strict split of who
//! writes which: the process owns the submission tail and the completion
//! head, the kernel owns the inverse pair. Because the two parties never
//! write the same word, no locks are involved anywhere.
//!
//! [`Ring::new`] issues the creation syscall and establishes the three
//! shared mappings (submission metadata, submission entry slots, completion
//! ring), translating the kernel-reported field offsets into typed views
//! exactly once. After that, enqueueing a request costs no syscall at all;
//! only [`Ring::enter`] crosses into the kernel, to announce submitted
//! entries and optionally block for completions.
//!
//! ```no_run
//! use io_ring::{Ring, ENTER_GETEVENTS};
//!
//! let mut ring = Ring::new(1)?;
//! let text = b"Hello io_uring!\n";
//!
//! unsafe { ring.prepare_write(libc::STDOUT_FILENO, text) }?;
//! ring.enter(1, 1, ENTER_GETEVENTS)?;
//!
//! let completion = ring.reap().expect("enter waited for one completion");
//! assert_eq!(completion.result().unwrap() as usize, text.len());
//! # Ok::<(), io_ring::Error>(())
//! ```
//!
//! The driver is deliberately single-threaded: one submitting thread per
//! ring, enforced by the views being `!Send`. Multi-producer submission
//! would need either a lock around slot acquisition or a compare-and-swap
//! tail protocol, neither of which is provided here.
#![warn(unreachable_pub)]

mod ring;
mod sys;

pub use ring::{CompletionQueue, Error, Ring, SubmissionQueue};
pub use sys::{Cqe, Errno, Sqe, ENTER_GETEVENTS, OP_NOP, OP_WRITE};
