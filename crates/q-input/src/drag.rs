// SPDX-License-Identifier: MIT
//
// Drag-and-drop heuristic.
//
// Several terminals deliver a drag-and-dropped file path as
// `'/path/to/file'` — a quoted literal with no bracketed-paste framing
// and a brief inter-byte pause at the end. The heuristic watches for a
// bare quote character opening a fresh input run, buffers the
// characters that follow, and — once the stream goes quiet — emits the
// whole run as a single synthetic paste event.
//
// The router owns the clock: it asks for the current deadline and calls
// [`DragHeuristic::expire`] when the deadline passes. Every absorbed
// character pushes the deadline out, so the quiet period is measured
// from the last byte, not the first.

use std::time::{Duration, Instant};

use crate::event::{KeyCode, KeyEvent};

/// Quiet period after the last character before the accumulated run is
/// emitted as a synthetic paste.
pub const DRAG_COMPLETION_TIMEOUT_MS: u64 = 100;

/// Drag-and-drop accumulator.
pub struct DragHeuristic {
    /// Accumulated text including the leading quote. `None` when idle.
    acc: Option<String>,
    /// When the quiet period ends.
    deadline: Option<Instant>,
}

impl DragHeuristic {
    #[must_use]
    pub fn new() -> Self {
        Self {
            acc: None,
            deadline: None,
        }
    }

    /// Whether a drag run is being accumulated.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.acc.is_some()
    }

    /// The pending quiet deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether `event` is the kind of event that opens a drag run: a
    /// bare single- or double-quote character with no modifiers.
    #[must_use]
    pub fn opens(event: &KeyEvent) -> bool {
        matches!(event.code, KeyCode::Char('\'' | '"')) && event.is_plain_char()
    }

    /// Open a drag run with the quote event. Caller has already checked
    /// [`opens`](Self::opens) and the router-level gates (no paste in
    /// progress, no kitty sequence pending).
    pub fn start(&mut self, event: &KeyEvent, now: Instant) {
        debug_assert!(!self.is_active());
        self.acc = Some(event.sequence.clone());
        self.arm(now);
    }

    /// Absorb a plain character into the run, pushing the deadline out.
    ///
    /// Returns `false` if the event is not a plain character — the
    /// caller must then [`flush`](Self::flush) the run and handle the
    /// event itself.
    pub fn absorb(&mut self, event: &KeyEvent, now: Instant) -> bool {
        if !event.is_plain_char() {
            return false;
        }
        if let (Some(acc), KeyCode::Char(c)) = (self.acc.as_mut(), event.code) {
            acc.push(c);
        }
        self.arm(now);
        true
    }

    /// Abandon the heuristic: return the accumulated characters as
    /// ordinary key events, in order.
    #[must_use]
    pub fn flush(&mut self) -> Vec<KeyEvent> {
        self.deadline = None;
        self.acc
            .take()
            .map(|acc| {
                acc.chars()
                    .map(|c| KeyEvent::key(KeyCode::Char(c), c.to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// If the quiet deadline has passed, emit the synthetic paste.
    #[must_use]
    pub fn expire(&mut self, now: Instant) -> Option<KeyEvent> {
        let deadline = self.deadline?;
        if now < deadline {
            return None;
        }
        self.deadline = None;
        self.acc.take().map(KeyEvent::paste)
    }

    /// Discard all state (teardown — no flush).
    pub fn cancel(&mut self) {
        self.acc = None;
        self.deadline = None;
    }

    fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + Duration::from_millis(DRAG_COMPLETION_TIMEOUT_MS));
    }
}

impl Default for DragHeuristic {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Modifiers;

    fn ch(c: char) -> KeyEvent {
        KeyEvent::key(KeyCode::Char(c), c.to_string())
    }

    fn timeout() -> Duration {
        Duration::from_millis(DRAG_COMPLETION_TIMEOUT_MS)
    }

    #[test]
    fn quote_opens() {
        assert!(DragHeuristic::opens(&ch('\'')));
        assert!(DragHeuristic::opens(&ch('"')));
        assert!(!DragHeuristic::opens(&ch('a')));
        assert!(!DragHeuristic::opens(&KeyEvent::with_modifiers(
            KeyCode::Char('\''),
            Modifiers::CTRL,
            "'",
        )));
    }

    #[test]
    fn accumulates_and_expires_to_paste() {
        let t0 = Instant::now();
        let mut drag = DragHeuristic::new();
        drag.start(&ch('\''), t0);
        for (i, c) in "path".chars().enumerate() {
            assert!(drag.absorb(&ch(c), t0 + Duration::from_millis(i as u64)));
        }

        // Not yet quiet.
        assert!(drag.expire(t0 + Duration::from_millis(50)).is_none());
        assert!(drag.is_active());

        // Quiet period elapsed from the *last* byte.
        let ev = drag.expire(t0 + Duration::from_millis(3) + timeout()).unwrap();
        assert!(ev.paste);
        assert_eq!(ev.sequence, "'path");
        assert!(!drag.is_active());
    }

    #[test]
    fn each_byte_pushes_deadline_out() {
        let t0 = Instant::now();
        let mut drag = DragHeuristic::new();
        drag.start(&ch('"'), t0);
        let d1 = drag.deadline().unwrap();
        assert!(drag.absorb(&ch('x'), t0 + Duration::from_millis(30)));
        let d2 = drag.deadline().unwrap();
        assert!(d2 > d1);
    }

    #[test]
    fn non_char_event_refuses_absorb() {
        let t0 = Instant::now();
        let mut drag = DragHeuristic::new();
        drag.start(&ch('\''), t0);
        drag.absorb(&ch('a'), t0);

        let ret = KeyEvent::key(KeyCode::Return, "\r");
        assert!(!drag.absorb(&ret, t0));

        // Caller flushes: accumulated chars come back as ordinary keys.
        let flushed = drag.flush();
        let codes: Vec<_> = flushed.iter().map(|e| e.code).collect();
        assert_eq!(codes, vec![KeyCode::Char('\''), KeyCode::Char('a')]);
        assert!(!drag.is_active());
    }

    #[test]
    fn expire_before_deadline_is_none() {
        let t0 = Instant::now();
        let mut drag = DragHeuristic::new();
        drag.start(&ch('\''), t0);
        assert!(drag.expire(t0).is_none());
        assert!(drag.is_active());
    }

    #[test]
    fn cancel_discards_silently() {
        let t0 = Instant::now();
        let mut drag = DragHeuristic::new();
        drag.start(&ch('\''), t0);
        drag.cancel();
        assert!(!drag.is_active());
        assert!(drag.deadline().is_none());
        assert!(drag.flush().is_empty());
    }
}
