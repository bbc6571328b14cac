// SPDX-License-Identifier: MIT
#![allow(unsafe_code)]
//
// Byte intake — the blocking-read side of the pipeline.
//
// Raw mode delivers input one read() at a time, and read() blocks.
// The router cannot block with it: drag completion and coalescing
// deadlines fire on the order of milliseconds. The intake therefore
// owns a thread of its own and ships every chunk into a bounded
// channel; the router holds the receiving end and waits against a
// deadline instead of a file descriptor.
//
// The thread never parks inside read(). It waits for stdin to become
// readable via poll() with a short timeout, re-checking a shutdown
// flag whenever the wait comes back empty, so stopping the intake
// costs at most one wait interval.
//
// The channel is bounded: a wedged consumer turns into backpressure
// on the terminal, not unbounded buffering in the process. Teardown
// drops the receiving end first, which fails any blocked send and
// lets the thread exit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Size of one read. A keypress is a handful of bytes; a paste comes
/// through in kernel-buffer-sized pieces and reassembles downstream.
const CHUNK_SIZE: usize = 4096;

/// Chunks in flight between the intake thread and its consumer.
const QUEUE_DEPTH: usize = 256;

/// How long one readability wait lasts before the shutdown flag is
/// re-checked (milliseconds).
const WAIT_MS: i32 = 50;

/// Background thread feeding raw stdin chunks into a bounded channel.
///
/// The channel closes when the intake shuts down, stdin reaches EOF,
/// or the receiver is dropped.
///
/// # Example
///
/// ```no_run
/// use q_term::intake::ByteIntake;
///
/// let (intake, chunks) = ByteIntake::start();
/// while let Ok(bytes) = chunks.recv() {
///     println!("{} byte(s)", bytes.len());
/// }
/// // The thread is joined when `intake` drops.
/// ```
pub struct ByteIntake {
    /// Joined on shutdown; `None` once that has happened.
    thread: Option<JoinHandle<()>>,
    /// Tells the thread to exit at its next wait boundary.
    shutdown: Arc<AtomicBool>,
}

impl ByteIntake {
    /// Start the intake thread and hand back the chunk receiver.
    /// Every delivered `Vec<u8>` is non-empty.
    ///
    /// # Panics
    ///
    /// Panics if the OS refuses to spawn a thread.
    #[must_use]
    pub fn start() -> (Self, Receiver<Vec<u8>>) {
        let (tx, rx) = sync_channel(QUEUE_DEPTH);
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);

        let thread = thread::Builder::new()
            .name("byte-intake".into())
            .spawn(move || intake_loop(&tx, &flag))
            .expect("spawning the byte intake thread failed");

        (
            Self {
                thread: Some(thread),
                shutdown,
            },
            rx,
        )
    }

    /// Ask the thread to exit and wait for it. Safe to call more than
    /// once. If the queue may still be full, drop the receiver before
    /// calling this so a blocked send can fail out.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ByteIntake {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The intake loop: wait for readability, read one chunk, send it on.
/// Exits on the shutdown flag, EOF, read error, or a dropped receiver.
#[cfg(unix)]
fn intake_loop(tx: &SyncSender<Vec<u8>>, shutdown: &AtomicBool) {
    use std::os::unix::io::AsRawFd;

    let fd = std::io::stdin().as_raw_fd();
    let mut chunk = [0u8; CHUNK_SIZE];

    while !shutdown.load(Ordering::Relaxed) {
        if !readable_within(fd, WAIT_MS) {
            // Nothing arrived (or the wait itself failed transiently):
            // go around and look at the flag again.
            continue;
        }

        let n = unsafe { libc::read(fd, chunk.as_mut_ptr().cast(), chunk.len()) };
        let Ok(len) = usize::try_from(n) else {
            return; // read error
        };
        if len == 0 {
            return; // EOF
        }
        if tx.send(chunk[..len].to_vec()).is_err() {
            return; // consumer went away
        }
    }
}

/// Wait up to `timeout_ms` for stdin to become readable.
#[cfg(unix)]
fn readable_within(fd: i32, timeout_ms: i32) -> bool {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    unsafe { libc::poll(&raw mut pollfd, 1, timeout_ms) > 0 }
}

/// Portable fallback: plain blocking reads. Shutdown is lazier here —
/// the flag is only seen after the current read returns.
#[cfg(not(unix))]
fn intake_loop(tx: &SyncSender<Vec<u8>>, shutdown: &AtomicBool) {
    use std::io::Read;

    let mut chunk = [0u8; CHUNK_SIZE];
    while !shutdown.load(Ordering::Relaxed) {
        let Ok(len) = std::io::stdin().lock().read(&mut chunk) else {
            return;
        };
        if len == 0 {
            return;
        }
        if tx.send(chunk[..len].to_vec()).is_err() {
            return;
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
