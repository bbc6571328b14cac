// SPDX-License-Identifier: MIT
//
// Pipeline assembly — the threaded owner of the router.
//
// One router thread owns all pipeline state and receives every input
// through a bounded message queue: byte chunks from the intake,
// injected keypress records, and subscription changes. Observable event
// order therefore matches arrival order, and subscriber mutation is
// serialised between broadcasts.
//
// The thread blocks on `recv_timeout` against the router's nearest
// deadline (or plain `recv` when idle), then fires expired flushes —
// the hybrid wait/tick loop. Nothing polls; an idle pipeline costs
// nothing.
//
// Activation order matters: raw mode first (a failure there is fatal
// and surfaces before any thread exists), then the router thread, then
// the intake and its forwarder. Deactivation reverses it: shutdown
// message, join the router, stop the intake, restore the terminal.
// Buffers are discarded on teardown, not flushed.

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use q_term::intake::ByteIntake;
use q_term::terminal::Terminal;

use crate::event::KeyEvent;
use crate::router::{Config, Router};
use crate::subscription::{Handler, SubscriberId};

/// Depth of the router's bounded message queue.
const QUEUE_DEPTH: usize = 256;

/// Messages delivered to the router thread.
enum Msg {
    /// A raw chunk from the terminal.
    Chunk(Vec<u8>),
    /// A pre-parsed keypress record from the host.
    Record(KeyEvent),
    /// Register a handler under a pre-allocated id.
    Subscribe(SubscriberId, Handler),
    /// Remove a handler.
    Unsubscribe(SubscriberId),
    /// Tear down: discard buffers, exit the thread.
    Shutdown,
}

/// Handle for one registered subscriber.
///
/// Cancelling is explicit: dropping the handle without calling
/// [`cancel`](Self::cancel) leaves the handler subscribed for the
/// pipeline's lifetime.
pub struct Subscription {
    id: SubscriberId,
    tx: SyncSender<Msg>,
}

impl Subscription {
    /// Unregister the handler. Safe at any time, including from within
    /// a handler: the removal is queued and takes effect before the
    /// next broadcast.
    pub fn cancel(self) {
        let _ = self.tx.try_send(Msg::Unsubscribe(self.id));
    }
}

/// The active keypress pipeline.
///
/// Created by [`activate`](Self::activate), which moves the terminal to
/// raw mode and spawns the intake and router threads. Torn down by
/// [`deactivate`](Self::deactivate) or drop, which restores the
/// terminal.
pub struct Pipeline {
    tx: SyncSender<Msg>,
    router_thread: Option<JoinHandle<()>>,
    forwarder: Option<JoinHandle<()>>,
    intake: Option<ByteIntake>,
    terminal: Terminal,
}

impl Pipeline {
    /// Activate the pipeline: raw mode, feature toggles, threads.
    ///
    /// # Errors
    ///
    /// Returns an error if the terminal cannot be moved to raw mode —
    /// fatal, nothing is left running.
    pub fn activate(cfg: Config) -> io::Result<Self> {
        let mut terminal = Terminal::new()?;
        terminal.enter(cfg.kitty_protocol_enabled)?;

        let (tx, rx) = mpsc::sync_channel::<Msg>(QUEUE_DEPTH);

        let router_thread = thread::Builder::new()
            .name("keypress-router".into())
            .spawn(move || {
                let mut router = Router::new(cfg);
                loop {
                    let msg = match router.next_deadline() {
                        Some(deadline) => {
                            let now = Instant::now();
                            if deadline <= now {
                                router.poll(now);
                                continue;
                            }
                            match rx.recv_timeout(deadline.duration_since(now)) {
                                Ok(msg) => msg,
                                Err(RecvTimeoutError::Timeout) => {
                                    router.poll(Instant::now());
                                    continue;
                                }
                                Err(RecvTimeoutError::Disconnected) => break,
                            }
                        }
                        None => match rx.recv() {
                            Ok(msg) => msg,
                            Err(_) => break,
                        },
                    };

                    match msg {
                        Msg::Chunk(bytes) => router.feed_bytes(&bytes, Instant::now()),
                        Msg::Record(event) => router.feed_record(event, Instant::now()),
                        Msg::Subscribe(id, handler) => {
                            router.insert_subscriber(id, handler);
                        }
                        Msg::Unsubscribe(id) => {
                            router.unsubscribe(id);
                        }
                        Msg::Shutdown => {
                            router.shutdown();
                            break;
                        }
                    }
                }
            })?;

        let (intake, byte_rx) = ByteIntake::start();

        // Forward intake chunks into the router queue. A separate
        // thread so the intake stays a plain byte source with no
        // knowledge of router messages.
        let chunk_tx = tx.clone();
        let forwarder = thread::Builder::new()
            .name("keypress-forwarder".into())
            .spawn(move || {
                while let Ok(chunk) = byte_rx.recv() {
                    if chunk_tx.send(Msg::Chunk(chunk)).is_err() {
                        break;
                    }
                }
            })?;

        Ok(Self {
            tx,
            router_thread: Some(router_thread),
            forwarder: Some(forwarder),
            intake: Some(intake),
            terminal,
        })
    }

    /// Register an event handler. Events arrive on the router thread;
    /// handlers should be short and synchronous.
    pub fn subscribe(
        &self,
        handler: impl FnMut(&KeyEvent) + Send + 'static,
    ) -> Subscription {
        let id = SubscriberId::next();
        // Blocking send: a full queue means the router is draining
        // real input ahead of us.
        let _ = self.tx.send(Msg::Subscribe(id, Box::new(handler)));
        Subscription {
            id,
            tx: self.tx.clone(),
        }
    }

    /// Inject a pre-parsed keypress record, as a host front-end parser
    /// would. Ignored in passthrough mode.
    pub fn inject_record(&self, event: KeyEvent) {
        let _ = self.tx.send(Msg::Record(event));
    }

    /// Tear down the pipeline and restore the terminal.
    ///
    /// Pending timers are cancelled and buffered bytes are discarded —
    /// no flush. In-flight broadcasts complete before the router exits.
    ///
    /// # Errors
    ///
    /// Returns an error if restoring the terminal fails; the threads
    /// are stopped regardless.
    pub fn deactivate(mut self) -> io::Result<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> io::Result<()> {
        // Stop the router first; dropping its receiver unblocks any
        // producer stuck on a full queue.
        match self.tx.try_send(Msg::Shutdown) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => {
                // Queue full: the blocking send still delivers because
                // the router drains ahead of it.
                let _ = self.tx.send(Msg::Shutdown);
            }
        }
        if let Some(handle) = self.router_thread.take() {
            let _ = handle.join();
        }
        if let Some(mut intake) = self.intake.take() {
            intake.shutdown();
        }
        if let Some(handle) = self.forwarder.take() {
            let _ = handle.join();
        }
        self.terminal.leave()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.router_thread.is_some() {
            let _ = self.teardown();
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::KeyCode;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    // Stdin is not a TTY under test, so raw mode is a no-op and the
    // intake sees EOF; the pipeline must still activate, route injected
    // records, and tear down cleanly.

    #[test]
    fn activate_and_deactivate() {
        let pipeline = Pipeline::activate(Config::default()).unwrap();
        pipeline.deactivate().unwrap();
    }

    #[test]
    fn drop_tears_down() {
        let pipeline = Pipeline::activate(Config::default()).unwrap();
        drop(pipeline); // Must not hang.
    }

    #[test]
    fn injected_records_reach_subscribers() {
        let pipeline = Pipeline::activate(Config::default()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = pipeline.subscribe(move |ev| sink.lock().unwrap().push(ev.clone()));

        pipeline.inject_record(KeyEvent::key(KeyCode::Char('q'), "q"));

        // The router thread delivers asynchronously; give it a moment.
        let deadline = Instant::now() + Duration::from_secs(1);
        while seen.lock().unwrap().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(seen.lock().unwrap().len(), 1);
        pipeline.deactivate().unwrap();
    }

    #[test]
    fn cancelled_subscription_stops_delivery() {
        let pipeline = Pipeline::activate(Config::default()).unwrap();
        let seen = Arc::new(Mutex::new(0u32));
        let sink = Arc::clone(&seen);
        let sub = pipeline.subscribe(move |_| *sink.lock().unwrap() += 1);

        pipeline.inject_record(KeyEvent::key(KeyCode::Char('a'), "a"));
        let deadline = Instant::now() + Duration::from_secs(1);
        while *seen.lock().unwrap() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }

        sub.cancel();
        pipeline.inject_record(KeyEvent::key(KeyCode::Char('b'), "b"));
        // Drain: deactivate joins the router, so all queued messages
        // have been handled once it returns.
        pipeline.deactivate().unwrap();
        assert_eq!(*seen.lock().unwrap(), 1);
    }
}
