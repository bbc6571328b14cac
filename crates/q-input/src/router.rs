// SPDX-License-Identifier: MIT
//
// Keypress router — the top-level input state machine.
//
// Composes the paste framer, drag heuristic, kitty parser, and legacy
// decoder into one pipeline and fans decoded events out to subscribers.
// The router is a pure state machine over explicit time: callers feed
// it bytes or pre-parsed records, ask for its nearest deadline, and
// call `poll(now)` when that deadline passes. The threaded assembly in
// `pipeline.rs` drives it from a channel loop; tests drive it directly
// with fabricated instants.
//
// # Byte accounting
//
// Every byte that enters the router contributes to exactly one emitted
// event — an ordinary key, part of a paste payload, or part of a kitty
// sequence — or is explicitly dropped: kitty buffer overflow, and the
// prefix discarded when Ctrl+C cancels a stuck sequence. Nothing else
// may lose bytes; mis-framing silently corrupts downstream editors.
//
// # Two input paths
//
// `feed_bytes` is the chunk path: raw reads from the terminal. The
// framer splits out paste payloads; remaining spans run through the
// kitty parser (when enabled), whose fallback runs feed the legacy
// decoder.
//
// `feed_record` is the record path: pre-parsed keypress records from a
// host that has its own front-end parser. Records are suppressed while
// a paste is open, can cancel a stuck kitty sequence (Ctrl+C), and
// drive the drag heuristic. Internally decoded keys go through the
// same logic, so both paths behave identically. In passthrough mode
// (`paste_workaround`) records are ignored entirely and raw chunks
// alone drive the pipeline, coalesced through a short-flush buffer.

use std::time::{Duration, Instant};

use crate::drag::DragHeuristic;
use crate::event::{KeyEvent, Modifiers};
use crate::kitty::{KittyOut, KittyParser};
use crate::legacy::LegacyDecoder;
use crate::paste::{PasteFramer, Span};
use crate::subscription::{Handler, SubscriberId, SubscriberSet};

/// Short-flush window for the passthrough coalescing buffer and for
/// releasing split-sequence tails. Small bursts inside the window
/// coalesce into one flush; a lone ESC resolves after it.
pub const FLUSH_TIMEOUT_MS: u64 = 8;

/// Passthrough buffer size past which a flush happens immediately,
/// without waiting for the timer.
pub const RAW_FLUSH_THRESHOLD: usize = 64;

/// Pipeline configuration, immutable per instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct Config {
    /// Decode kitty keyboard protocol sequences.
    pub kitty_protocol_enabled: bool,
    /// Passthrough mode: ignore pre-parsed records and drive event
    /// generation from raw chunks alone, coalesced through the
    /// short-flush buffer. Required for terminals whose front-end
    /// parser mangles paste markers.
    pub paste_workaround: bool,
    /// Emit diagnostics for kitty buffer state transitions.
    pub debug_keystroke_logging: bool,
}

/// The keypress router.
pub struct Router {
    cfg: Config,
    framer: PasteFramer,
    kitty: KittyParser,
    legacy: LegacyDecoder,
    drag: DragHeuristic,
    /// Passthrough coalescing buffer.
    raw: Vec<u8>,
    /// Deadline for the next short flush (raw buffer, held tails,
    /// pending legacy bytes).
    flush_deadline: Option<Instant>,
    subscribers: SubscriberSet,
}

impl Router {
    #[must_use]
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            framer: PasteFramer::new(),
            kitty: KittyParser::new(cfg.debug_keystroke_logging),
            // The legacy decoder owns classic escape sequences only
            // when the kitty parser is not decoding them.
            legacy: LegacyDecoder::new(!cfg.kitty_protocol_enabled),
            drag: DragHeuristic::new(),
            raw: Vec::new(),
            flush_deadline: None,
            subscribers: SubscriberSet::new(),
        }
    }

    // ── Subscriptions ───────────────────────────────────────────────

    /// Register an event handler; returns the id for unsubscribing.
    pub fn subscribe(
        &mut self,
        handler: impl FnMut(&KeyEvent) + Send + 'static,
    ) -> SubscriberId {
        self.subscribers.add(handler)
    }

    /// Register a handler under a pre-allocated id.
    pub(crate) fn insert_subscriber(&mut self, id: SubscriberId, handler: Handler) {
        self.subscribers.insert(id, handler);
    }

    /// Remove a handler. Returns whether it was registered.
    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        self.subscribers.remove(id)
    }

    // ── Input paths ─────────────────────────────────────────────────

    /// Feed a raw chunk from the terminal.
    pub fn feed_bytes(&mut self, data: &[u8], now: Instant) {
        if self.cfg.paste_workaround {
            self.raw.extend_from_slice(data);
            if self.raw.len() > RAW_FLUSH_THRESHOLD {
                self.flush_raw(now);
                self.rearm_flush(now);
            } else {
                self.flush_deadline =
                    Some(now + Duration::from_millis(FLUSH_TIMEOUT_MS));
            }
            return;
        }

        self.scan(data, now, false);
        self.rearm_flush(now);
    }

    /// Feed a pre-parsed keypress record.
    ///
    /// Ignored in passthrough mode; suppressed while a paste is open.
    pub fn feed_record(&mut self, event: KeyEvent, now: Instant) {
        if self.cfg.paste_workaround {
            return;
        }
        self.deliver(event, now);
    }

    // ── Timers ──────────────────────────────────────────────────────

    /// The nearest pending deadline, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.flush_deadline, self.drag.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Fire any deadlines that have passed.
    pub fn poll(&mut self, now: Instant) {
        if self.flush_deadline.is_some_and(|d| now >= d) {
            self.flush_deadline = None;
            if self.cfg.paste_workaround && !self.raw.is_empty() {
                self.flush_raw(now);
            } else {
                // Release split-sequence tails: a held delimiter prefix
                // and any pending legacy bytes resolve to literal events
                // after the quiet window. Never in the same poll as a
                // raw flush — a tail the flush just parked may be the
                // front of a delimiter still in flight.
                let tail = self.framer.take_tail();
                if !tail.is_empty() {
                    self.decode_span(&tail, now);
                }
                for event in self.legacy.flush() {
                    self.deliver(event, now);
                }
            }
            self.rearm_flush(now);
        }

        if let Some(event) = self.drag.expire(now) {
            self.emit(&event);
        }
    }

    /// Discard all buffered state without flushing (teardown).
    pub fn shutdown(&mut self) {
        self.framer.reset();
        self.kitty.cancel();
        self.legacy.clear();
        self.drag.cancel();
        self.raw.clear();
        self.flush_deadline = None;
    }

    // ── Chunk scanning ──────────────────────────────────────────────

    /// Run one byte run through the framer and the decoder cascade.
    ///
    /// `classify` enables the passthrough flush rule: a multi-byte span
    /// that contains a carriage return or starts with a quote is
    /// emitted as a single paste event instead of being decoded
    /// byte-by-byte.
    fn scan(&mut self, data: &[u8], now: Instant, classify: bool) {
        for span in self.framer.scan(data) {
            match span {
                Span::Paste(payload) => {
                    // Entering/closing a paste region flushes whatever
                    // ordinary input was pending ahead of the marker.
                    self.flush_pending_input(now);
                    self.emit(&KeyEvent::paste(
                        String::from_utf8_lossy(&payload).into_owned(),
                    ));
                }
                Span::Bytes(bytes) => {
                    if classify && paste_like(&bytes) {
                        self.emit(&KeyEvent::paste(
                            String::from_utf8_lossy(&bytes).into_owned(),
                        ));
                    } else {
                        self.decode_span(&bytes, now);
                    }
                }
            }
        }

        // A start marker with no end yet: the pre-marker input has been
        // decoded above; pending partial state must not leak into the
        // paste payload's event order.
        if self.framer.is_pasting() {
            self.flush_pending_input(now);
        }
    }

    /// Decode one non-paste span through kitty (when enabled) and the
    /// legacy decoder.
    fn decode_span(&mut self, bytes: &[u8], now: Instant) {
        if self.cfg.kitty_protocol_enabled {
            for out in self.kitty.feed(bytes) {
                match out {
                    KittyOut::Key(event) => self.deliver(event, now),
                    KittyOut::Fallback(raw) => {
                        for event in self.legacy.advance(&raw) {
                            self.deliver(event, now);
                        }
                    }
                }
            }
        } else {
            for event in self.legacy.advance(bytes) {
                self.deliver(event, now);
            }
        }
    }

    /// Flush partial decoder state as ordinary events (used when a
    /// paste region opens so pre-marker bytes come out ahead of the
    /// payload).
    fn flush_pending_input(&mut self, _now: Instant) {
        for event in self.drag.flush() {
            self.emit(&event);
        }
        let pending = self.kitty.take_pending();
        if !pending.is_empty() {
            for event in self.legacy.advance(&pending) {
                self.emit(&event);
            }
        }
        for event in self.legacy.flush() {
            self.emit(&event);
        }
    }

    // ── Record logic ────────────────────────────────────────────────

    /// The record path: paste suppression, Ctrl+C cancellation, drag
    /// heuristic, then broadcast. Both externally injected records and
    /// internally decoded keys come through here.
    fn deliver(&mut self, event: KeyEvent, now: Instant) {
        // Records arriving inside a paste region duplicate payload
        // bytes already accumulating in the framer.
        if self.framer.is_pasting() {
            return;
        }

        // Ctrl+C with a stuck sequence: drop the buffer, emit Ctrl+C.
        if event.is_ctrl_c() && self.kitty.is_pending() {
            self.kitty.cancel();
            self.emit(&event);
            return;
        }

        // The drag heuristic watches the record stream only in the
        // normal path; passthrough covers the drag shape in its flush
        // classification.
        if !self.cfg.paste_workaround {
            if self.drag.is_active() {
                if self.drag.absorb(&event, now) {
                    return;
                }
                for flushed in self.drag.flush() {
                    self.emit(&flushed);
                }
                self.emit(&event);
                return;
            }
            if DragHeuristic::opens(&event) && !self.kitty.is_pending() {
                self.drag.start(&event, now);
                return;
            }
        }

        self.emit(&event);
    }

    fn emit(&mut self, event: &KeyEvent) {
        self.subscribers.broadcast(event);
    }

    // ── Passthrough flushing ────────────────────────────────────────

    /// Flush the passthrough coalescing buffer through the framer and
    /// decoder cascade with the paste-likeness classification.
    fn flush_raw(&mut self, now: Instant) {
        if self.raw.is_empty() {
            return;
        }
        let buffered = std::mem::take(&mut self.raw);
        self.scan(&buffered, now, true);
    }

    /// Re-arm the flush deadline if anything is waiting on it.
    fn rearm_flush(&mut self, now: Instant) {
        let waiting = !self.raw.is_empty()
            || self.framer.has_idle_tail()
            || self.legacy.has_pending();
        self.flush_deadline = if waiting {
            Some(now + Duration::from_millis(FLUSH_TIMEOUT_MS))
        } else {
            None
        };
    }
}

/// The passthrough flush rule: a coalesced multi-byte run that contains
/// a carriage return, or opens with a quote and carries more after it,
/// reads as pasted content rather than typed keys.
fn paste_like(bytes: &[u8]) -> bool {
    bytes.len() > 1 && (bytes.contains(&b'\r') || bytes[0] == b'\'' || bytes[0] == b'"')
}

/// Convenience: a Ctrl+C record, as a front-end parser would deliver it.
#[must_use]
pub fn ctrl_c_record() -> KeyEvent {
    KeyEvent::with_modifiers(crate::event::KeyCode::Char('c'), Modifiers::CTRL, "\x03")
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::KeyCode;
    use std::sync::{Arc, Mutex};

    /// A router plus a shared sink collecting every broadcast event.
    fn harness(cfg: Config) -> (Router, Arc<Mutex<Vec<KeyEvent>>>) {
        let mut router = Router::new(cfg);
        let sink = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&sink);
        router.subscribe(move |ev| s.lock().unwrap().push(ev.clone()));
        (router, sink)
    }

    fn kitty_cfg() -> Config {
        Config {
            kitty_protocol_enabled: true,
            ..Config::default()
        }
    }

    fn passthrough_cfg() -> Config {
        Config {
            kitty_protocol_enabled: true,
            paste_workaround: true,
            ..Config::default()
        }
    }

    fn events(sink: &Arc<Mutex<Vec<KeyEvent>>>) -> Vec<KeyEvent> {
        sink.lock().unwrap().clone()
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    // ── Concrete end-to-end scenarios ───────────────────────────

    #[test]
    fn numpad_enter_with_ctrl() {
        let (mut r, sink) = harness(kitty_cfg());
        r.feed_bytes(b"\x1b[57414;5u", Instant::now());

        let got = events(&sink);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].code, KeyCode::Return);
        assert_eq!(got[0].modifiers, Modifiers::CTRL);
        assert!(got[0].kitty_protocol);
        assert!(!got[0].paste);
    }

    #[test]
    fn double_delete_one_chunk() {
        let (mut r, sink) = harness(kitty_cfg());
        r.feed_bytes(b"\x1b[3~\x1b[3~", Instant::now());

        let got = events(&sink);
        assert_eq!(got.len(), 2);
        assert!(got.iter().all(|e| e.code == KeyCode::Delete));
    }

    #[test]
    fn delete_then_pageup_concatenated() {
        let (mut r, sink) = harness(kitty_cfg());
        r.feed_bytes(b"\x1b[3~\x1b[5~", Instant::now());

        let codes: Vec<_> = events(&sink).iter().map(|e| e.code).collect();
        assert_eq!(codes, vec![KeyCode::Delete, KeyCode::PageUp]);
    }

    #[test]
    fn fragmented_paste_across_chunks() {
        let (mut r, sink) = harness(passthrough_cfg());
        let t0 = Instant::now();
        r.feed_bytes(b"\x1b[200~partial", t0);
        r.feed_bytes(b" content\x1b[201~", t0);
        r.poll(t0 + ms(FLUSH_TIMEOUT_MS));

        let got = events(&sink);
        assert_eq!(got.len(), 1);
        assert!(got[0].paste);
        assert_eq!(got[0].sequence, "partial content");
    }

    #[test]
    fn mixed_stream_chars_then_paste() {
        let (mut r, sink) = harness(passthrough_cfg());
        let t0 = Instant::now();
        r.feed_bytes(b"before", t0);
        r.feed_bytes(b"\x1b[200~pasted", t0);
        r.feed_bytes(b"\x1b[201~", t0);
        r.poll(t0 + ms(FLUSH_TIMEOUT_MS));

        let got = events(&sink);
        assert_eq!(got.len(), 7, "six chars then one paste: {got:?}");
        let typed: String = got[..6].iter().map(|e| e.sequence.as_str()).collect();
        assert_eq!(typed, "before");
        assert!(got[..6].iter().all(|e| !e.paste));
        assert!(got[6].paste);
        assert_eq!(got[6].sequence, "pasted");
    }

    #[test]
    fn drag_quote_then_quiet_becomes_paste() {
        let (mut r, sink) = harness(kitty_cfg());
        let t0 = Instant::now();
        r.feed_bytes(b"'", t0);
        for (i, b) in b"path".iter().enumerate() {
            r.feed_bytes(&[*b], t0 + ms(i as u64));
        }

        // Nothing before the quiet period ends.
        r.poll(t0 + ms(50));
        assert!(events(&sink).is_empty());

        r.poll(t0 + ms(3) + ms(crate::drag::DRAG_COMPLETION_TIMEOUT_MS));
        let got = events(&sink);
        assert_eq!(got.len(), 1);
        assert!(got[0].paste);
        assert_eq!(got[0].sequence, "'path");
    }

    #[test]
    fn ctrl_c_cancels_stuck_buffer() {
        let (mut r, sink) = harness(kitty_cfg());
        let t0 = Instant::now();
        r.feed_bytes(b"\x1b[1;", t0);
        assert!(events(&sink).is_empty());

        r.feed_record(ctrl_c_record(), t0);
        let got = events(&sink);
        assert_eq!(got.len(), 1);
        assert!(got[0].is_ctrl_c());

        // The next sequence decodes cleanly — the stuck prefix is gone.
        r.feed_bytes(b"\x1b[3~", t0);
        let got = events(&sink);
        assert_eq!(got.len(), 2);
        assert_eq!(got[1].code, KeyCode::Delete);
    }

    #[test]
    fn shift_tab_both_forms() {
        for seq in [b"\x1b[Z".as_slice(), b"\x1b[1;2Z".as_slice()] {
            let (mut r, sink) = harness(kitty_cfg());
            r.feed_bytes(seq, Instant::now());
            let got = events(&sink);
            assert_eq!(got.len(), 1, "for {seq:?}");
            assert_eq!(got[0].code, KeyCode::Tab);
            assert!(got[0].modifiers.contains(Modifiers::SHIFT));
        }
    }

    // ── Universal invariants ────────────────────────────────────

    #[test]
    fn byte_preservation_without_escapes() {
        let (mut r, sink) = harness(kitty_cfg());
        let input = b"hello, world!\t123\r";
        r.feed_bytes(input, Instant::now());

        let joined: String = events(&sink).iter().map(|e| e.sequence.as_str()).collect();
        assert_eq!(joined.as_bytes(), input);
    }

    #[test]
    fn chunking_invariance_for_kitty_sequences() {
        let stream = b"\x1b[57414;5u\x1b[3~\x1b[1;2Z";

        let (mut r, sink) = harness(kitty_cfg());
        r.feed_bytes(stream, Instant::now());
        let whole = events(&sink);

        for split in 1..stream.len() {
            let (mut r, sink) = harness(kitty_cfg());
            let t0 = Instant::now();
            r.feed_bytes(&stream[..split], t0);
            r.feed_bytes(&stream[split..], t0);
            assert_eq!(events(&sink), whole, "split at {split}");
        }
    }

    #[test]
    fn paste_fidelity() {
        let (mut r, sink) = harness(kitty_cfg());
        let payload = "line one\nline two\twith\ttabs\n";
        let mut input = Vec::new();
        input.extend_from_slice(b"\x1b[200~");
        input.extend_from_slice(payload.as_bytes());
        input.extend_from_slice(b"\x1b[201~");
        r.feed_bytes(&input, Instant::now());

        let got = events(&sink);
        assert_eq!(got.len(), 1);
        assert!(got[0].paste);
        assert_eq!(got[0].sequence, payload);
    }

    #[test]
    fn no_kitty_flag_when_disabled() {
        let (mut r, sink) = harness(Config::default());
        let t0 = Instant::now();
        r.feed_bytes(b"\x1b[3~abc\x1b[1;2Z\x1b[A", t0);
        r.poll(t0 + ms(FLUSH_TIMEOUT_MS));

        let got = events(&sink);
        assert!(!got.is_empty());
        assert!(got.iter().all(|e| !e.kitty_protocol));
    }

    // ── Routing details ─────────────────────────────────────────

    #[test]
    fn legacy_csi_when_kitty_disabled() {
        let (mut r, sink) = harness(Config::default());
        r.feed_bytes(b"\x1b[A\x1b[3~", Instant::now());

        let codes: Vec<_> = events(&sink).iter().map(|e| e.code).collect();
        assert_eq!(codes, vec![KeyCode::Up, KeyCode::Delete]);
    }

    #[test]
    fn plain_chars_between_sequences() {
        let (mut r, sink) = harness(kitty_cfg());
        r.feed_bytes(b"ab\x1b[3~cd", Instant::now());

        let codes: Vec<_> = events(&sink).iter().map(|e| e.code).collect();
        assert_eq!(
            codes,
            vec![
                KeyCode::Char('a'),
                KeyCode::Char('b'),
                KeyCode::Delete,
                KeyCode::Char('c'),
                KeyCode::Char('d'),
            ]
        );
    }

    #[test]
    fn sequence_split_across_chunk_boundary() {
        let (mut r, sink) = harness(kitty_cfg());
        let t0 = Instant::now();
        r.feed_bytes(b"\x1b[5", t0);
        assert!(events(&sink).is_empty());
        r.feed_bytes(b"7414;5u", t0);

        let got = events(&sink);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].code, KeyCode::Return);
    }

    #[test]
    fn paste_marker_interrupts_pending_sequence() {
        let (mut r, sink) = harness(kitty_cfg());
        let t0 = Instant::now();
        // An unfinished kitty sequence, then a paste begins: the
        // pre-marker bytes must flush ahead of the payload.
        r.feed_bytes(b"\x1b[1;", t0);
        r.feed_bytes(b"\x1b[200~text\x1b[201~", t0);

        let got = events(&sink);
        assert!(got.last().unwrap().paste);
        assert_eq!(got.last().unwrap().sequence, "text");
        // The stuck prefix surfaced as ordinary input, not silence.
        assert!(got.len() > 1);
        assert_eq!(got[0].code, KeyCode::Escape);
    }

    #[test]
    fn records_suppressed_during_paste() {
        let (mut r, sink) = harness(kitty_cfg());
        let t0 = Instant::now();
        r.feed_bytes(b"\x1b[200~abc", t0);
        r.feed_record(KeyEvent::key(KeyCode::Char('a'), "a"), t0);
        assert!(events(&sink).is_empty());

        r.feed_bytes(b"\x1b[201~", t0);
        let got = events(&sink);
        assert_eq!(got.len(), 1);
        assert!(got[0].paste);
        assert_eq!(got[0].sequence, "abc");
    }

    #[test]
    fn drag_flushes_on_non_char_event() {
        let (mut r, sink) = harness(kitty_cfg());
        let t0 = Instant::now();
        r.feed_bytes(b"'ab", t0);
        assert!(events(&sink).is_empty());

        // Return is not a plain character: drag abandons and the run
        // comes out as ordinary keys.
        r.feed_record(KeyEvent::key(KeyCode::Return, "\r"), t0);
        let codes: Vec<_> = events(&sink).iter().map(|e| e.code).collect();
        assert_eq!(
            codes,
            vec![
                KeyCode::Char('\''),
                KeyCode::Char('a'),
                KeyCode::Char('b'),
                KeyCode::Return,
            ]
        );
    }

    #[test]
    fn quote_inside_pending_sequence_joins_the_sequence() {
        let (mut r, sink) = harness(kitty_cfg());
        let t0 = Instant::now();
        r.feed_bytes(b"\x1b[1;", t0);
        // The quote lands in the kitty buffer, making the whole run a
        // definite reject that falls through to the legacy decoder.
        r.feed_bytes(b"'", t0);

        let got = events(&sink);
        let codes: Vec<_> = got.iter().map(|e| e.code).collect();
        assert_eq!(
            codes,
            vec![
                KeyCode::Escape,
                KeyCode::Char('['),
                KeyCode::Char('1'),
                KeyCode::Char(';'),
            ]
        );
        // The trailing quote opened the drag heuristic (the buffer was
        // clean by the time it decoded); quiet expiry surfaces it.
        r.poll(t0 + ms(crate::drag::DRAG_COMPLETION_TIMEOUT_MS));
        let got = events(&sink);
        assert!(got.last().unwrap().paste);
        assert_eq!(got.last().unwrap().sequence, "'");
    }

    // ── Passthrough coalescing ──────────────────────────────────

    #[test]
    fn passthrough_cr_burst_is_one_paste() {
        let (mut r, sink) = harness(passthrough_cfg());
        let t0 = Instant::now();
        r.feed_bytes(b"\rrest of paste", t0);
        assert!(events(&sink).is_empty(), "coalescing until the flush");
        r.poll(t0 + ms(FLUSH_TIMEOUT_MS));

        let got = events(&sink);
        assert_eq!(got.len(), 1);
        assert!(got[0].paste);
        assert_eq!(got[0].sequence, "\rrest of paste");
    }

    #[test]
    fn passthrough_quote_burst_is_one_paste() {
        let (mut r, sink) = harness(passthrough_cfg());
        let t0 = Instant::now();
        r.feed_bytes(b"'/tmp/file.txt'", t0);
        r.poll(t0 + ms(FLUSH_TIMEOUT_MS));

        let got = events(&sink);
        assert_eq!(got.len(), 1);
        assert!(got[0].paste);
        assert_eq!(got[0].sequence, "'/tmp/file.txt'");
    }

    #[test]
    fn passthrough_lone_return_is_a_keypress() {
        let (mut r, sink) = harness(passthrough_cfg());
        let t0 = Instant::now();
        r.feed_bytes(b"\r", t0);
        r.poll(t0 + ms(FLUSH_TIMEOUT_MS));

        let got = events(&sink);
        assert_eq!(got.len(), 1);
        assert!(!got[0].paste);
        assert_eq!(got[0].code, KeyCode::Return);
    }

    #[test]
    fn passthrough_plain_burst_is_individual_keys() {
        let (mut r, sink) = harness(passthrough_cfg());
        let t0 = Instant::now();
        r.feed_bytes(b"ab", t0);
        r.poll(t0 + ms(FLUSH_TIMEOUT_MS));

        let codes: Vec<_> = events(&sink).iter().map(|e| e.code).collect();
        assert_eq!(codes, vec![KeyCode::Char('a'), KeyCode::Char('b')]);
    }

    #[test]
    fn passthrough_sequences_decode_after_flush() {
        let (mut r, sink) = harness(passthrough_cfg());
        let t0 = Instant::now();
        r.feed_bytes(b"\x1b[3~", t0);
        assert!(events(&sink).is_empty());
        r.poll(t0 + ms(FLUSH_TIMEOUT_MS));

        let got = events(&sink);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].code, KeyCode::Delete);
    }

    #[test]
    fn passthrough_overflow_flushes_immediately() {
        let (mut r, sink) = harness(passthrough_cfg());
        let t0 = Instant::now();
        // More than the threshold in one chunk: no waiting on the timer.
        let big: Vec<u8> = std::iter::repeat(b'x').take(RAW_FLUSH_THRESHOLD + 8).collect();
        r.feed_bytes(&big, t0);
        assert_eq!(events(&sink).len(), RAW_FLUSH_THRESHOLD + 8);
    }

    #[test]
    fn passthrough_records_are_ignored() {
        let (mut r, sink) = harness(passthrough_cfg());
        r.feed_record(KeyEvent::key(KeyCode::Char('x'), "x"), Instant::now());
        assert!(events(&sink).is_empty());
    }

    #[test]
    fn passthrough_timer_rearms_per_chunk() {
        let (mut r, _sink) = harness(passthrough_cfg());
        let t0 = Instant::now();
        r.feed_bytes(b"a", t0);
        let d1 = r.next_deadline().unwrap();
        r.feed_bytes(b"b", t0 + ms(3));
        let d2 = r.next_deadline().unwrap();
        assert!(d2 > d1);
    }

    // ── Flush deadline / split tails ────────────────────────────

    #[test]
    fn lone_esc_resolves_after_flush_window() {
        let (mut r, sink) = harness(Config::default());
        let t0 = Instant::now();
        r.feed_bytes(b"\x1b", t0);
        assert!(events(&sink).is_empty());

        r.poll(t0 + ms(FLUSH_TIMEOUT_MS));
        let got = events(&sink);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].code, KeyCode::Escape);
    }

    #[test]
    fn split_marker_prefix_still_decodes_as_key() {
        let (mut r, sink) = harness(kitty_cfg());
        let t0 = Instant::now();
        // "\x1b[2" could open a paste marker; the next chunk proves it
        // was Insert.
        r.feed_bytes(b"\x1b[2", t0);
        assert!(events(&sink).is_empty());
        r.feed_bytes(b"~", t0);

        let got = events(&sink);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].code, KeyCode::Insert);
    }

    // ── Subscription behaviour ──────────────────────────────────

    #[test]
    fn unsubscribe_stops_delivery() {
        let mut r = Router::new(kitty_cfg());
        let sink = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&sink);
        let id = r.subscribe(move |ev| s.lock().unwrap().push(ev.clone()));

        r.feed_bytes(b"a", Instant::now());
        assert!(r.unsubscribe(id));
        r.feed_bytes(b"b", Instant::now());
        assert_eq!(events(&sink).len(), 1);
    }

    #[test]
    fn panicking_subscriber_does_not_block_others() {
        let mut r = Router::new(kitty_cfg());
        r.subscribe(|_| panic!("broken handler"));
        let sink = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&sink);
        r.subscribe(move |ev| s.lock().unwrap().push(ev.clone()));

        r.feed_bytes(b"a", Instant::now());
        assert_eq!(events(&sink).len(), 1);
    }

    // ── Teardown ────────────────────────────────────────────────

    #[test]
    fn shutdown_discards_buffers_without_flush() {
        let (mut r, sink) = harness(kitty_cfg());
        let t0 = Instant::now();
        r.feed_bytes(b"\x1b[200~half a paste", t0);
        r.feed_bytes(b"\x1b[1;", t0);
        r.shutdown();

        assert!(r.next_deadline().is_none());
        r.poll(t0 + ms(1000));
        assert!(events(&sink).is_empty());
    }
}
