use io_ring::{Error, Ring, ENTER_GETEVENTS, OP_NOP};

const HELLO: &[u8] = b"Hello, world";

#[test]
fn masks_match_requested_depth() {
    let ring = Ring::new(8).expect("Failed to initiate io uring");

    assert_eq!(ring.submission().mask(), 7);
    assert_eq!(ring.completion().mask(), 7);
    assert_eq!(ring.submission().capacity(), 8);
    assert_eq!(ring.completion().capacity(), 8);

    // A fresh ring has nothing produced on either side.
    assert_eq!(ring.submission().head(), ring.submission().tail());
    assert_eq!(ring.completion().head(), ring.completion().tail());
}

#[test]
fn zero_depth_is_refused_at_creation() {
    match Ring::new(0) {
        Err(Error::Create(_)) => (),
        Err(other) => panic!("Wrong error for zero depth: {:?}", other),
        Ok(_) => panic!("Kernel accepted a zero-entry ring"),
    }
}

#[test]
fn acquisition_advances_tail_in_order() {
    let mut ring = Ring::new(8).expect("Failed to initiate io uring");
    let initial = ring.submission().tail();

    for k in 0..3 {
        assert_eq!(ring.submission().tail(), initial.wrapping_add(k));
        ring.acquire().expect("Ring has free capacity");

        // Each acquisition publishes the identity mapping: ring position
        // `tail & mask` refers to slot `tail & mask`.
        let position = initial.wrapping_add(k) & ring.submission().mask();
        assert_eq!(ring.submission().array_entry(position), position);
    }

    assert_eq!(ring.submission().tail(), initial.wrapping_add(3));
    assert_eq!(ring.in_flight(), 3);
}

#[test]
fn reaping_an_empty_ring_yields_nothing() {
    let mut ring = Ring::new(4).expect("Failed to initiate io uring");
    let head = ring.completion().head();

    assert!(ring.reap().is_none());
    assert_eq!(ring.completion().head(), head);
}

#[test]
fn full_ring_rejects_further_acquisition() {
    let mut ring = Ring::new(1).expect("Failed to initiate io uring");

    ring.acquire().expect("First slot is free");
    match ring.acquire() {
        Err(Error::Full) => (),
        Err(other) => panic!("Wrong error on a full ring: {:?}", other),
        Ok(_) => panic!("Acquired beyond ring capacity"),
    }
}

#[test]
fn nop_request_completes_with_zero() {
    let mut ring = Ring::new(2).expect("Failed to initiate io uring");

    // A nop needs no buffer or descriptor; the acquired slot comes zeroed,
    // so the opcode is the only field to set.
    ring.acquire().expect("Fresh ring has a free slot").opcode = OP_NOP;

    let accepted = ring.enter(1, 1, ENTER_GETEVENTS)
        .expect("Submitting failed");
    assert!(accepted >= 1, "No entry was accepted");

    let entry = ring.reap().expect("The blocking enter awaited a completion");
    assert_eq!(entry.result().expect("Nop failed"), 0);
    assert!(ring.reap().is_none());
}

#[test]
fn write_round_trip_through_a_pipe() {
    let [read_end, write_end] = pipe();
    let mut ring = Ring::new(4).expect("Failed to initiate io uring");

    unsafe { ring.prepare_write(write_end, HELLO) }
        .expect("Fresh ring has a free slot");

    let accepted = ring.enter(1, 1, ENTER_GETEVENTS)
        .expect("Submitting failed");
    assert!(accepted >= 1, "No entry was accepted");

    // Exactly one completion for one submission.
    let entry = ring.reap().expect("The blocking enter awaited a completion");
    assert_eq!(entry.result().expect("Write failed"), HELLO.len() as u32);
    assert!(ring.reap().is_none());
    assert_eq!(ring.in_flight(), 0);

    let mut buffer = [0u8; 64];
    let len = unsafe {
        libc::read(
            read_end,
            buffer.as_mut_ptr() as *mut libc::c_void,
            buffer.len())
    };
    assert_eq!(len, HELLO.len() as isize);
    assert_eq!(&buffer[..HELLO.len()], HELLO);

    unsafe {
        libc::close(read_end);
        libc::close(write_end);
    }
}

#[test]
fn reaping_frees_submission_capacity() {
    let [read_end, write_end] = pipe();
    let mut ring = Ring::new(1).expect("Failed to initiate io uring");

    unsafe { ring.prepare_write(write_end, HELLO) }
        .expect("First slot is free");
    ring.submit_and_wait(1, 1).expect("Submitting failed");
    ring.reap().expect("One completion was awaited");

    // The slot is reusable once its completion has been consumed.
    unsafe { ring.prepare_write(write_end, HELLO) }
        .expect("Reaping freed the slot again");
    ring.submit_and_wait(1, 1).expect("Submitting failed");
    let entry = ring.reap().expect("One completion was awaited");
    assert_eq!(entry.result().expect("Write failed"), HELLO.len() as u32);

    unsafe {
        libc::close(read_end);
        libc::close(write_end);
    }
}

fn pipe() -> [libc::c_int; 2] {
    let mut pair = [0, 0];
    let result = unsafe { libc::pipe(pair.as_mut_ptr()) };
    assert_eq!(result, 0, "Opening pipe failed");
    pair
}
