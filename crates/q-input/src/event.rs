// SPDX-License-Identifier: MIT
//
// Key event model.
//
// One output type crosses the pipeline boundary: `KeyEvent`. Everything
// the decoders produce — ordinary keys, kitty-protocol keys, bracketed
// pastes, drag-synthesised pastes — is a `KeyEvent`, so subscribers
// handle a single stream.

use std::fmt;

use bitflags::bitflags;

/// Identity of a key.
///
/// Printable characters use [`Char`](KeyCode::Char); named keys have
/// dedicated variants; function keys F1–F12 use [`F`](KeyCode::F).
/// [`None`](KeyCode::None) is the identity of paste events, which carry
/// their content in [`KeyEvent::sequence`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCode {
    /// No key identity (paste events).
    None,
    /// A Unicode character (printable).
    Char(char),
    Return,
    Escape,
    Tab,
    Backspace,
    Delete,
    Insert,
    // ── Navigation ──────────────────────────────────────────────
    Home,
    End,
    Up,
    Down,
    Left,
    Right,
    PageUp,
    PageDown,
    /// F1 through F12.
    F(u8),
}

impl fmt::Display for KeyCode {
    /// The canonical lowercase key name: `return`, `pageup`, `f5`,
    /// single characters as themselves, the empty string for `None`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => Ok(()),
            Self::Char(c) => write!(f, "{c}"),
            Self::Return => write!(f, "return"),
            Self::Escape => write!(f, "escape"),
            Self::Tab => write!(f, "tab"),
            Self::Backspace => write!(f, "backspace"),
            Self::Delete => write!(f, "delete"),
            Self::Insert => write!(f, "insert"),
            Self::Home => write!(f, "home"),
            Self::End => write!(f, "end"),
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
            Self::Left => write!(f, "left"),
            Self::Right => write!(f, "right"),
            Self::PageUp => write!(f, "pageup"),
            Self::PageDown => write!(f, "pagedown"),
            Self::F(n) => write!(f, "f{n}"),
        }
    }
}

bitflags! {
    /// Keyboard modifier flags.
    ///
    /// Matches the one-origin CSI/Kitty modifier encoding minus one:
    /// bit 0 shift, bit 1 alt/meta, bit 2 ctrl.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0000_0001;
        const META  = 0b0000_0010;
        const CTRL  = 0b0000_0100;
    }
}

impl Modifiers {
    /// Decode a CSI/Kitty modifier parameter.
    ///
    /// The encoding is `1 + bitmask`; a parameter of 0 or 1 means no
    /// modifiers. Bits beyond ctrl (super, hyper, caps/num lock state)
    /// are dropped — the event model carries shift/meta/ctrl only.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // Only the low 3 bits matter.
    pub const fn from_csi_param(param: u32) -> Self {
        let bits = if param > 0 { param - 1 } else { 0 };
        Self::from_bits_truncate(bits as u8)
    }
}

/// A decoded input event.
///
/// Every byte that enters the pipeline leaves it inside the `sequence`
/// of exactly one `KeyEvent` (or is explicitly dropped on overflow or
/// Ctrl+C cancellation). For ordinary keys `sequence` is the byte run
/// that produced the event; for paste events it is the paste content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    /// Which key was pressed ([`KeyCode::None`] for pastes).
    pub code: KeyCode,
    /// Active modifier keys.
    pub modifiers: Modifiers,
    /// The exact byte run that produced this event, as UTF-8 text.
    pub sequence: String,
    /// True for bracketed-paste and drag-synthesised events.
    pub paste: bool,
    /// True iff the event was decoded from a kitty-protocol sequence.
    pub kitty_protocol: bool,
}

impl KeyEvent {
    /// An ordinary key press with no modifiers.
    #[must_use]
    pub fn key(code: KeyCode, sequence: impl Into<String>) -> Self {
        Self::with_modifiers(code, Modifiers::empty(), sequence)
    }

    /// An ordinary key press with modifiers.
    #[must_use]
    pub fn with_modifiers(
        code: KeyCode,
        modifiers: Modifiers,
        sequence: impl Into<String>,
    ) -> Self {
        Self {
            code,
            modifiers,
            sequence: sequence.into(),
            paste: false,
            kitty_protocol: false,
        }
    }

    /// A key decoded from a kitty-protocol sequence.
    #[must_use]
    pub fn kitty(
        code: KeyCode,
        modifiers: Modifiers,
        sequence: impl Into<String>,
    ) -> Self {
        Self {
            code,
            modifiers,
            sequence: sequence.into(),
            paste: false,
            kitty_protocol: true,
        }
    }

    /// A paste event carrying `text` verbatim.
    #[must_use]
    pub fn paste(text: impl Into<String>) -> Self {
        Self {
            code: KeyCode::None,
            modifiers: Modifiers::empty(),
            sequence: text.into(),
            paste: true,
            kitty_protocol: false,
        }
    }

    /// Whether this is a plain, unmodified character press.
    ///
    /// The drag heuristic absorbs exactly these.
    #[must_use]
    pub fn is_plain_char(&self) -> bool {
        matches!(self.code, KeyCode::Char(_)) && self.modifiers.is_empty() && !self.paste
    }

    /// Whether this is Ctrl+C.
    #[must_use]
    pub fn is_ctrl_c(&self) -> bool {
        self.code == KeyCode::Char('c') && self.modifiers.contains(Modifiers::CTRL)
    }
}

impl fmt::Display for KeyEvent {
    /// Human-readable form: `ctrl+shift+return`, `a`, `paste(12B)`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.paste {
            return write!(f, "paste({}B)", self.sequence.len());
        }
        if self.modifiers.contains(Modifiers::CTRL) {
            write!(f, "ctrl+")?;
        }
        if self.modifiers.contains(Modifiers::META) {
            write!(f, "meta+")?;
        }
        if self.modifiers.contains(Modifiers::SHIFT) {
            write!(f, "shift+")?;
        }
        write!(f, "{}", self.code)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
