// SPDX-License-Identifier: MIT
//
// Kitty keyboard protocol parser.
//
// An incremental buffer machine over CSI sequences. Bytes are appended
// as they arrive; after each append the machine re-scans from the start
// of the buffer, so two sequences concatenated in one chunk each emit,
// and a sequence split across arbitrary read boundaries assembles.
//
// Three sequence shapes are decoded:
//
//   ESC [ <codepoint> [; <mods>[:<type>]] u    kitty u-form
//   ESC [ <n> [; <mods>] ~                     editing/function keys
//   ESC [ [<n>] [; <mods>] <letter>            arrows, home/end, F1-F4, Z
//
// Everything else falls through: bytes the machine definitively rejects
// come back out as `Fallback` runs for the legacy decoder, so no byte
// is silently lost. The two exceptions are deliberate drops — buffer
// overflow past the cap, and Ctrl+C cancelling a stuck sequence.

use log::debug;

use crate::event::{KeyCode, KeyEvent, Modifiers};

/// ESC byte (0x1B).
pub(crate) const ESC: u8 = 0x1b;

/// Ctrl+C byte (0x03) — cancels a pending sequence.
const CTRL_C: u8 = 0x03;

/// Maximum bytes retained while waiting for a sequence to complete.
///
/// No valid keyboard sequence is anywhere near this long; a buffer that
/// grows past the cap is garbage and is dropped with a diagnostic.
pub const KITTY_BUFFER_CAP: usize = 64;

/// What the parser hands back for a fed chunk, in byte order.
#[derive(Debug, PartialEq, Eq)]
pub enum KittyOut {
    /// A decoded kitty/CSI key event.
    Key(KeyEvent),
    /// Bytes the parser does not own — plain input or a rejected
    /// sequence prefix — to be decoded by the legacy path.
    Fallback(Vec<u8>),
}

/// Result of scanning the buffer for one sequence.
enum Scan {
    /// A complete sequence: the event and how many bytes it consumed.
    Complete(KeyEvent, usize),
    /// A plausible prefix — wait for more bytes.
    Partial,
    /// Definitely not a sequence we decode.
    Reject,
}

/// Incremental kitty/CSI sequence parser.
pub struct KittyParser {
    /// Bytes of the sequence in progress. Non-empty only while a CSI
    /// sequence is being assembled.
    buf: Vec<u8>,
    /// Emit buffer-transition diagnostics.
    debug_logging: bool,
}

impl KittyParser {
    #[must_use]
    pub fn new(debug_logging: bool) -> Self {
        Self {
            buf: Vec::with_capacity(16),
            debug_logging,
        }
    }

    /// Whether a sequence is currently in progress.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Discard any pending sequence bytes without emitting them.
    ///
    /// Used for Ctrl+C cancellation of a stuck sequence and for
    /// teardown.
    pub fn cancel(&mut self) {
        if !self.buf.is_empty() {
            if self.debug_logging {
                debug!("kitty buffer cleared, {} byte(s) dropped", self.buf.len());
            }
            self.buf.clear();
        }
    }

    /// Hand back the pending bytes for ordinary decoding.
    ///
    /// Used when a paste start marker interrupts a sequence: the
    /// pre-marker bytes must flush as ordinary input, not vanish.
    #[must_use]
    pub fn take_pending(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }

    /// Feed raw bytes and collect decoded keys and fallback runs.
    ///
    /// Bytes that arrive while no sequence is in progress and are not
    /// ESC pass straight through as fallback; ESC opens a sequence
    /// buffer that accumulates until it completes, rejects, overflows,
    /// or is cancelled by Ctrl+C.
    pub fn feed(&mut self, data: &[u8]) -> Vec<KittyOut> {
        let mut out = Vec::new();
        let mut passthrough: Vec<u8> = Vec::new();

        for &byte in data {
            if self.buf.is_empty() && byte != ESC {
                passthrough.push(byte);
                continue;
            }

            if !passthrough.is_empty() {
                out.push(KittyOut::Fallback(std::mem::take(&mut passthrough)));
            }

            // Ctrl+C mid-sequence: drop the stuck buffer, let the 0x03
            // itself decode normally so the Ctrl+C event still fires.
            if byte == CTRL_C && !self.buf.is_empty() {
                if self.debug_logging {
                    debug!(
                        "kitty buffer cancelled by ctrl+c, {} byte(s) dropped",
                        self.buf.len()
                    );
                }
                self.buf.clear();
                out.push(KittyOut::Fallback(vec![CTRL_C]));
                continue;
            }

            self.buf.push(byte);

            if self.buf.len() > KITTY_BUFFER_CAP {
                if self.debug_logging {
                    debug!(
                        "kitty buffer overflow, {} byte(s) dropped",
                        self.buf.len()
                    );
                }
                self.buf.clear();
                continue;
            }

            self.drain_complete(&mut out);
        }

        if !passthrough.is_empty() {
            out.push(KittyOut::Fallback(passthrough));
        }

        out
    }

    /// Repeatedly scan the buffer front, emitting every complete
    /// sequence and peeling rejected prefixes off to the fallback path.
    fn drain_complete(&mut self, out: &mut Vec<KittyOut>) {
        while !self.buf.is_empty() {
            match scan_sequence(&self.buf) {
                Scan::Complete(event, consumed) => {
                    if self.debug_logging {
                        debug!("kitty sequence decoded: {event} ({consumed} bytes)");
                    }
                    self.buf.drain(..consumed);
                    out.push(KittyOut::Key(event));
                }
                Scan::Partial => break,
                Scan::Reject => {
                    // Peel off the unparseable prefix up to the next ESC
                    // and rescan the rest — a valid sequence following
                    // garbage must still decode.
                    let cut = self.buf[1..]
                        .iter()
                        .position(|&b| b == ESC)
                        .map_or(self.buf.len(), |i| i + 1);
                    let rejected: Vec<u8> = self.buf.drain(..cut).collect();
                    if self.debug_logging {
                        debug!("kitty reject, {} byte(s) to legacy decoder", rejected.len());
                    }
                    out.push(KittyOut::Fallback(rejected));
                }
            }
        }
    }
}

// ─── Sequence scanning ──────────────────────────────────────────────────────

/// Scan the buffer (which starts with ESC) for one complete sequence.
fn scan_sequence(buf: &[u8]) -> Scan {
    debug_assert!(!buf.is_empty() && buf[0] == ESC);

    if buf.len() < 2 {
        return Scan::Partial;
    }
    if buf[1] != b'[' {
        return Scan::Reject;
    }

    // Scan for the final byte. CSI parameter bytes are 0x30..=0x3F
    // (digits, `;`, `:`, private markers); the final byte is 0x40..=0x7E.
    let mut end = 2;
    while end < buf.len() {
        let b = buf[end];
        if (0x40..=0x7E).contains(&b) {
            break;
        }
        if !(0x30..=0x3F).contains(&b) {
            return Scan::Reject;
        }
        end += 1;
    }
    if end >= buf.len() {
        return Scan::Partial;
    }

    let final_byte = buf[end];
    let consumed = end + 1;
    let params = parse_csi_params(&buf[2..end]);
    let sequence = String::from_utf8_lossy(&buf[..consumed]).into_owned();
    let modifiers = params
        .get(1)
        .map_or(Modifiers::empty(), |p| Modifiers::from_csi_param(p.value));

    let code = match final_byte {
        b'u' => {
            let Some(cp) = params.first().map(|p| p.value) else {
                return Scan::Reject;
            };
            match u_form_keycode(cp) {
                Some(code) => code,
                None => return Scan::Reject,
            }
        }
        b'~' => {
            let Some(n) = params.first().map(|p| p.value) else {
                return Scan::Reject;
            };
            match tilde_keycode(n) {
                Some(code) => code,
                None => return Scan::Reject,
            }
        }
        b'A' => KeyCode::Up,
        b'B' => KeyCode::Down,
        b'C' => KeyCode::Right,
        b'D' => KeyCode::Left,
        b'H' => KeyCode::Home,
        b'F' => KeyCode::End,
        b'P' => KeyCode::F(1),
        b'Q' => KeyCode::F(2),
        b'R' => KeyCode::F(3),
        b'S' => KeyCode::F(4),
        // Back-tab: shifted whether or not the parameter says so
        // (`ESC[Z` carries no parameters at all).
        b'Z' => {
            return Scan::Complete(
                KeyEvent::kitty(KeyCode::Tab, modifiers | Modifiers::SHIFT, sequence),
                consumed,
            );
        }
        _ => return Scan::Reject,
    };

    Scan::Complete(KeyEvent::kitty(code, modifiers, sequence), consumed)
}

/// Map a kitty `u`-form codepoint to a key.
///
/// ASCII control codepoints have dedicated names; the kitty private-use
/// aliases for the same keys are accepted too, as is the numpad enter
/// codepoint. Anything printable passes through as a character;
/// unprintable codepoints reject.
fn u_form_keycode(cp: u32) -> Option<KeyCode> {
    match cp {
        13 | 57345 | 57414 => Some(KeyCode::Return),
        27 | 57344 => Some(KeyCode::Escape),
        9 | 57346 => Some(KeyCode::Tab),
        127 | 57347 => Some(KeyCode::Backspace),
        cp => char::from_u32(cp)
            .filter(|c| !c.is_control())
            .map(KeyCode::Char),
    }
}

/// Map a tilde-form numeric code to a key.
///
/// Editing/navigation keys use 1-8; function keys use the classic
/// gapped codes starting at 15. F1-F4 never arrive in tilde form —
/// terminals send them as SS3, CSI letter, or kitty PUA sequences.
#[allow(clippy::cast_possible_truncation)] // Codes 15-24 fit in u8.
fn tilde_keycode(n: u32) -> Option<KeyCode> {
    match n {
        1 | 7 => Some(KeyCode::Home),
        2 => Some(KeyCode::Insert),
        3 => Some(KeyCode::Delete),
        4 | 8 => Some(KeyCode::End),
        5 => Some(KeyCode::PageUp),
        6 => Some(KeyCode::PageDown),
        15 => Some(KeyCode::F(5)),
        17..=21 => Some(KeyCode::F(n as u8 - 11)),
        23 | 24 => Some(KeyCode::F(n as u8 - 12)),
        _ => None,
    }
}

// ─── CSI parameters ─────────────────────────────────────────────────────────

/// CSI parameter: main value plus optional colon sub-parameter.
///
/// The colon sub-parameter is used by the kitty protocol to encode the
/// event type inside the modifier parameter (`modifier:event_type`).
/// The pipeline's event model has no press/repeat/release axis, so the
/// sub-parameter is parsed and otherwise ignored.
pub(crate) struct CsiParam {
    pub value: u32,
    #[allow(dead_code)] // Parsed for sequence validity; no output axis for it.
    pub sub: u32,
}

/// Parse semicolon-separated CSI parameters with optional colon
/// sub-parameters.
///
/// Examples:
/// - `1;2` → `[(1,0), (2,0)]`
/// - `97;5:2` → `[(97,0), (5,2)]`
/// - (empty) → `[]`
pub(crate) fn parse_csi_params(raw: &[u8]) -> Vec<CsiParam> {
    if raw.is_empty() {
        return Vec::new();
    }

    let mut params = Vec::with_capacity(4);
    let mut pos = 0;

    while pos <= raw.len() {
        let (value, next) = parse_u32_at(raw, pos);
        pos = next;

        let sub = if pos < raw.len() && raw[pos] == b':' {
            pos += 1;
            let (v, n) = parse_u32_at(raw, pos);
            pos = n;
            v
        } else {
            0
        };

        params.push(CsiParam { value, sub });

        if pos < raw.len() && raw[pos] == b';' {
            pos += 1;
        } else {
            break;
        }
    }

    params
}

/// Parse a u32 from bytes starting at `start`, stopping at non-digit.
/// Returns `(value, next_position)`.
fn parse_u32_at(buf: &[u8], start: usize) -> (u32, usize) {
    let mut val: u32 = 0;
    let mut pos = start;
    while pos < buf.len() && buf[pos].is_ascii_digit() {
        val = val
            .saturating_mul(10)
            .saturating_add(u32::from(buf[pos] - b'0'));
        pos += 1;
    }
    (val, pos)
}

// ─── Tests ──────────────────────────────────────────────────────────────────
