// SPDX-License-Identifier: MIT
//
// Legacy keypress decoder.
//
// Turns raw bytes into key events the traditional way: printable ASCII
// and UTF-8 one character at a time, control bytes as ctrl+letter, and
// — when CSI decoding is enabled — the classic escape sequences
// (arrows, editing keys, function keys, SS3, Alt+letter).
//
// CSI decoding is enabled only when the kitty parser is off: with kitty
// parsing on, escape runs belong to the kitty buffer and anything it
// rejects arrives here to be decoded as a literal ESC plus characters.
//
// The decoder maintains a small internal buffer because escape
// sequences and UTF-8 characters can span multiple reads. Feed bytes
// with [`LegacyDecoder::advance`]; after a quiet period, call
// [`LegacyDecoder::flush`] to emit any pending bytes (a lone ESC
// becomes a real Escape keypress).

use crate::event::{KeyCode, KeyEvent, Modifiers};
use crate::kitty::parse_csi_params;

/// Result of trying to parse one event from the buffer.
enum Parsed {
    /// Successfully parsed an event, consuming `usize` bytes.
    Event(KeyEvent, usize),
    /// Sequence is incomplete — need more bytes.
    Incomplete,
    /// Unrecognized byte(s), skip `usize` bytes.
    Skip(usize),
}

/// Incremental legacy keypress decoder.
pub struct LegacyDecoder {
    /// Accumulated raw bytes waiting to be parsed.
    buf: Vec<u8>,
    /// Decode classic CSI/SS3/Alt+letter escape sequences. Off when the
    /// kitty parser owns escape runs.
    decode_csi: bool,
}

impl LegacyDecoder {
    #[must_use]
    pub fn new(decode_csi: bool) -> Self {
        Self {
            buf: Vec::with_capacity(16),
            decode_csi,
        }
    }

    /// Feed raw bytes and return all events that can be decoded.
    ///
    /// Bytes that form an incomplete sequence are kept in the internal
    /// buffer and combined with future calls.
    pub fn advance(&mut self, data: &[u8]) -> Vec<KeyEvent> {
        self.buf.extend_from_slice(data);
        let mut events = Vec::new();
        let mut pos = 0;

        while pos < self.buf.len() {
            match try_parse(&self.buf[pos..], self.decode_csi) {
                Parsed::Event(event, consumed) => {
                    events.push(event);
                    pos += consumed;
                }
                Parsed::Incomplete => break,
                Parsed::Skip(n) => pos += n.max(1),
            }
        }

        if pos > 0 {
            self.buf.drain(..pos);
        }

        events
    }

    /// Are there unconsumed bytes that might complete with more data?
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Flush pending bytes as literal key events.
    ///
    /// Called after a quiet period to resolve the ESC ambiguity: a lone
    /// ESC byte becomes an Escape key event, and any other leftover
    /// bytes become their literal events.
    pub fn flush(&mut self) -> Vec<KeyEvent> {
        let mut events = Vec::new();
        for &byte in &self.buf {
            let seq = (byte as char).to_string();
            let event = match byte {
                0x1B => KeyEvent::key(KeyCode::Escape, seq),
                0x00 => KeyEvent::with_modifiers(KeyCode::Char('@'), Modifiers::CTRL, seq),
                0x09 => KeyEvent::key(KeyCode::Tab, seq),
                0x0A | 0x0D => KeyEvent::key(KeyCode::Return, seq),
                b @ (0x01..=0x08 | 0x0B..=0x0C | 0x0E..=0x1A) => KeyEvent::with_modifiers(
                    KeyCode::Char((b + b'a' - 1) as char),
                    Modifiers::CTRL,
                    seq,
                ),
                b @ 0x1C..=0x1F => KeyEvent::with_modifiers(
                    KeyCode::Char((b + 0x40) as char),
                    Modifiers::CTRL,
                    seq,
                ),
                0x7F => KeyEvent::key(KeyCode::Backspace, seq),
                b @ 0x20..=0x7E => KeyEvent::key(KeyCode::Char(b as char), seq),
                // Stray UTF-8 fragments have no literal reading.
                _ => continue,
            };
            events.push(event);
        }
        self.buf.clear();
        events
    }

    /// Discard pending bytes without emitting them (teardown).
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

// ─── Stateless parsing functions ────────────────────────────────────────────
//
// All parse functions are pure — they read from the remaining bytes and
// return what they found plus how many bytes to consume.

/// Try to parse a single event from the start of `buf`.
fn try_parse(buf: &[u8], decode_csi: bool) -> Parsed {
    if buf.is_empty() {
        return Parsed::Skip(0);
    }

    match buf[0] {
        // ESC — escape sequence (when we own them) or literal Escape.
        0x1B => {
            if decode_csi {
                parse_escape(buf)
            } else {
                Parsed::Event(KeyEvent::key(KeyCode::Escape, "\x1b"), 1)
            }
        }
        // Control characters.
        0x00 => Parsed::Event(
            KeyEvent::with_modifiers(KeyCode::Char('@'), Modifiers::CTRL, "\0"),
            1,
        ),
        b @ (0x01..=0x07 | 0x0B..=0x0C | 0x0E..=0x1A) => Parsed::Event(
            KeyEvent::with_modifiers(
                KeyCode::Char((b + b'a' - 1) as char),
                Modifiers::CTRL,
                (b as char).to_string(),
            ),
            1,
        ),
        b @ (0x08 | 0x7F) => {
            Parsed::Event(KeyEvent::key(KeyCode::Backspace, (b as char).to_string()), 1)
        }
        0x09 => Parsed::Event(KeyEvent::key(KeyCode::Tab, "\t"), 1),
        b @ (0x0A | 0x0D) => {
            Parsed::Event(KeyEvent::key(KeyCode::Return, (b as char).to_string()), 1)
        }
        // Ctrl+punctuation (FS/GS/RS/US → ctrl+\ ] ^ _).
        b @ 0x1C..=0x1F => Parsed::Event(
            KeyEvent::with_modifiers(
                KeyCode::Char((b + 0x40) as char),
                Modifiers::CTRL,
                (b as char).to_string(),
            ),
            1,
        ),
        // ASCII printable.
        b @ 0x20..=0x7E => Parsed::Event(
            KeyEvent::key(KeyCode::Char(b as char), (b as char).to_string()),
            1,
        ),
        // UTF-8 multi-byte.
        0xC0..=0xFF => parse_utf8(buf),
        // Bare continuation bytes (0x80..=0xBF) — invalid lead, skip.
        _ => Parsed::Skip(1),
    }
}

// ── Escape sequences ────────────────────────────────────────────────────────

fn parse_escape(buf: &[u8]) -> Parsed {
    debug_assert_eq!(buf[0], 0x1B);

    if buf.len() < 2 {
        return Parsed::Incomplete;
    }

    match buf[1] {
        // CSI: ESC [
        b'[' => parse_csi(buf),
        // SS3: ESC O
        b'O' => parse_ss3(buf),
        // Meta+ESC.
        0x1B => Parsed::Event(
            KeyEvent::with_modifiers(KeyCode::Escape, Modifiers::META, "\x1b\x1b"),
            2,
        ),
        // Meta+printable character.
        b @ 0x20..=0x7E => Parsed::Event(
            KeyEvent::with_modifiers(
                KeyCode::Char(b as char),
                Modifiers::META,
                String::from_utf8_lossy(&buf[..2]).into_owned(),
            ),
            2,
        ),
        // Meta+control character (e.g. ESC Ctrl+A).
        b @ 0x01..=0x1A => Parsed::Event(
            KeyEvent::with_modifiers(
                KeyCode::Char((b + b'a' - 1) as char),
                Modifiers::META | Modifiers::CTRL,
                String::from_utf8_lossy(&buf[..2]).into_owned(),
            ),
            2,
        ),
        // Unknown byte after ESC — emit standalone Escape.
        _ => Parsed::Event(KeyEvent::key(KeyCode::Escape, "\x1b"), 1),
    }
}

// ── CSI (Control Sequence Introducer) ───────────────────────────────────────

#[allow(clippy::cast_possible_truncation)] // Function-key codes fit in u8.
fn parse_csi(buf: &[u8]) -> Parsed {
    debug_assert!(buf.len() >= 2 && buf[0] == 0x1B && buf[1] == b'[');

    if buf.len() < 3 {
        return Parsed::Incomplete;
    }

    // Scan for the final byte (0x40..=0x7E).
    // CSI parameter bytes are in 0x30..=0x3F, intermediate in 0x20..=0x2F.
    let mut end = 2;
    while end < buf.len() {
        let b = buf[end];
        if (0x40..=0x7E).contains(&b) {
            break;
        }
        if !(0x20..=0x3F).contains(&b) {
            // Invalid byte in CSI sequence — abort.
            return Parsed::Skip(end + 1);
        }
        end += 1;
    }

    if end >= buf.len() {
        return Parsed::Incomplete;
    }

    let final_byte = buf[end];
    let consumed = end + 1;
    let params = parse_csi_params(&buf[2..end]);
    let sequence = String::from_utf8_lossy(&buf[..consumed]).into_owned();
    let modifiers = params
        .get(1)
        .map_or(Modifiers::empty(), |p| Modifiers::from_csi_param(p.value));

    // ── Tilde-terminated sequences (editing keys, function keys) ─────
    if final_byte == b'~' {
        let first = params.first().map_or(0, |p| p.value);
        let code = match first {
            1 | 7 => KeyCode::Home,
            2 => KeyCode::Insert,
            3 => KeyCode::Delete,
            4 | 8 => KeyCode::End,
            5 => KeyCode::PageUp,
            6 => KeyCode::PageDown,
            // F5 upward only: F1-F4 come in as SS3 or CSI letters.
            15 => KeyCode::F(5),
            17..=21 => KeyCode::F(first as u8 - 11),
            23 | 24 => KeyCode::F(first as u8 - 12),
            _ => return Parsed::Skip(consumed),
        };
        return Parsed::Event(
            KeyEvent::with_modifiers(code, modifiers, sequence),
            consumed,
        );
    }

    // ── Standard CSI sequences with letter final bytes ──────────────
    let code = match final_byte {
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
        b'Z' => {
            return Parsed::Event(
                KeyEvent::with_modifiers(
                    KeyCode::Tab,
                    modifiers | Modifiers::SHIFT,
                    sequence,
                ),
                consumed,
            );
        }
        _ => return Parsed::Skip(consumed),
    };

    Parsed::Event(
        KeyEvent::with_modifiers(code, modifiers, sequence),
        consumed,
    )
}

// ── SS3 (Single Shift 3) ───────────────────────────────────────────────────

fn parse_ss3(buf: &[u8]) -> Parsed {
    debug_assert!(buf.len() >= 2 && buf[0] == 0x1B && buf[1] == b'O');

    if buf.len() < 3 {
        return Parsed::Incomplete;
    }

    let code = match buf[2] {
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
        _ => return Parsed::Skip(3),
    };

    Parsed::Event(
        KeyEvent::key(code, String::from_utf8_lossy(&buf[..3]).into_owned()),
        3,
    )
}

// ── UTF-8 ──────────────────────────────────────────────────────────────────

fn parse_utf8(buf: &[u8]) -> Parsed {
    let expected = utf8_char_len(buf[0]);

    if expected == 0 {
        return Parsed::Skip(1);
    }
    if buf.len() < expected {
        return Parsed::Incomplete;
    }

    // Validate continuation bytes (must start with 0b10xxxxxx).
    for &b in &buf[1..expected] {
        if b & 0xC0 != 0x80 {
            return Parsed::Skip(1);
        }
    }

    std::str::from_utf8(&buf[..expected]).map_or(Parsed::Skip(1), |s| {
        s.chars().next().map_or(Parsed::Skip(expected), |ch| {
            Parsed::Event(
                KeyEvent::key(KeyCode::Char(ch), s.to_string()),
                expected,
            )
        })
    })
}

/// Expected byte length of a UTF-8 character from its lead byte.
/// Returns 0 for invalid lead bytes (continuation bytes, 0xFE, 0xFF).
const fn utf8_char_len(lead: u8) -> usize {
    match lead {
        0x00..=0x7F => 1,
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF7 => 4,
        _ => 0,
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
