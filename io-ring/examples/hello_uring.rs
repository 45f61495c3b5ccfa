//! Writes one buffer to standard output through the ring.
use io_ring::{Ring, ENTER_GETEVENTS};

fn main() {
    let mut ring = Ring::new(1)
        .expect("Couldn't initialize ring");

    let text = b"Hello io_uring!\n";

    // The buffer lives until after the reap below, as required.
    unsafe { ring.prepare_write(libc::STDOUT_FILENO, text) }
        .expect("First slot of a fresh ring is free");

    let accepted = ring.enter(1, 1, ENTER_GETEVENTS)
        .expect("Submitting failed");
    assert!(accepted >= 1);

    let completion = ring.reap()
        .expect("The blocking enter produced one completion");
    completion.result()
        .expect("Write to stdout failed");
}
