// SPDX-License-Identifier: MIT
//
// Bracketed paste framer.
//
// Recognises the fixed delimiters `ESC[200~` (start) and `ESC[201~`
// (end) in a chunked byte stream and splits each chunk into spans:
// ordinary bytes for the decoders, and complete paste payloads emitted
// verbatim — newlines and all, with no per-character decoding.
//
// Delimiters straddle read boundaries: the framer retains a tail of up
// to 5 bytes (the longest proper delimiter prefix) between chunks and
// retries against the concatenation. A tail that stops matching is
// released downstream intact, so a split escape sequence that merely
// shares a prefix with the delimiters still reaches the key decoders.

/// Bracketed paste opening delimiter: `ESC [ 200 ~`
pub const PASTE_START: &[u8] = b"\x1b[200~";
/// Bracketed paste closing delimiter: `ESC [ 201 ~`
pub const PASTE_END: &[u8] = b"\x1b[201~";

/// One framed region of the input stream, in byte order.
#[derive(Debug, PartialEq, Eq)]
pub enum Span {
    /// Ordinary bytes for the key decoders.
    Bytes(Vec<u8>),
    /// A complete paste payload (delimiters stripped).
    Paste(Vec<u8>),
}

/// Two-state bracketed paste framer.
pub struct PasteFramer {
    /// Inside a paste region (between start and end delimiters).
    pasting: bool,
    /// Payload accumulated since the start delimiter.
    acc: Vec<u8>,
    /// Possible delimiter prefix held back from the previous chunk.
    tail: Vec<u8>,
}

impl PasteFramer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pasting: false,
            acc: Vec::new(),
            tail: Vec::new(),
        }
    }

    /// Whether a paste region is currently open.
    #[must_use]
    pub fn is_pasting(&self) -> bool {
        self.pasting
    }

    /// Release a held delimiter-prefix tail for ordinary decoding.
    ///
    /// Returns empty while a paste is open (the tail may be the start
    /// of the closing delimiter) or when nothing is held. The router
    /// calls this on its flush deadline so a lone ESC does not sit in
    /// the framer forever.
    #[must_use]
    pub fn take_tail(&mut self) -> Vec<u8> {
        if self.pasting {
            Vec::new()
        } else {
            std::mem::take(&mut self.tail)
        }
    }

    /// Whether a tail is held while no paste is open.
    #[must_use]
    pub fn has_idle_tail(&self) -> bool {
        !self.pasting && !self.tail.is_empty()
    }

    /// Discard all state (teardown — no flush).
    pub fn reset(&mut self) {
        self.pasting = false;
        self.acc.clear();
        self.tail.clear();
    }

    /// Frame one chunk into spans.
    ///
    /// The held tail from the previous call is prepended before
    /// scanning, so delimiters split across chunks reassemble.
    pub fn scan(&mut self, data: &[u8]) -> Vec<Span> {
        let mut work = std::mem::take(&mut self.tail);
        work.extend_from_slice(data);

        let mut spans = Vec::new();
        let mut literal: Vec<u8> = Vec::new();
        let mut pos = 0;

        while pos < work.len() {
            if self.pasting {
                match find(&work[pos..], PASTE_END) {
                    Some(off) => {
                        self.acc.extend_from_slice(&work[pos..pos + off]);
                        spans.push(Span::Paste(std::mem::take(&mut self.acc)));
                        self.pasting = false;
                        pos += off + PASTE_END.len();
                    }
                    None => {
                        // Keep a possible end-delimiter prefix as tail,
                        // accumulate the rest as payload.
                        let keep = delimiter_prefix_len(&work[pos..]);
                        let cut = work.len() - keep;
                        self.acc.extend_from_slice(&work[pos..cut]);
                        self.tail = work[cut..].to_vec();
                        pos = work.len();
                    }
                }
            } else {
                match find_delimiter(&work[pos..]) {
                    Some((off, is_start)) => {
                        literal.extend_from_slice(&work[pos..pos + off]);
                        pos += off + PASTE_START.len();
                        if is_start {
                            if !literal.is_empty() {
                                spans.push(Span::Bytes(std::mem::take(&mut literal)));
                            }
                            self.pasting = true;
                        }
                        // An end delimiter while idle is dropped.
                    }
                    None => {
                        let keep = delimiter_prefix_len(&work[pos..]);
                        let cut = work.len() - keep;
                        literal.extend_from_slice(&work[pos..cut]);
                        self.tail = work[cut..].to_vec();
                        pos = work.len();
                    }
                }
            }
        }

        if !literal.is_empty() {
            spans.push(Span::Bytes(literal));
        }

        spans
    }
}

impl Default for PasteFramer {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

/// Find the first occurrence of `needle` in `haystack`.
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Find the first paste delimiter, reporting whether it is the start
/// delimiter. The two delimiters differ only in their fifth byte, so a
/// single scan over ESC positions covers both.
fn find_delimiter(haystack: &[u8]) -> Option<(usize, bool)> {
    for (i, window) in haystack.windows(PASTE_START.len()).enumerate() {
        if window == PASTE_START {
            return Some((i, true));
        }
        if window == PASTE_END {
            return Some((i, false));
        }
    }
    None
}

/// Length of the longest suffix of `slice` that is a proper prefix of
/// either delimiter (at most 5 bytes).
fn delimiter_prefix_len(slice: &[u8]) -> usize {
    let max = slice.len().min(PASTE_START.len() - 1);
    for k in (1..=max).rev() {
        let suffix = &slice[slice.len() - k..];
        if suffix == &PASTE_START[..k] || suffix == &PASTE_END[..k] {
            return k;
        }
    }
    0
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(b: &[u8]) -> Span {
        Span::Bytes(b.to_vec())
    }

    fn paste(b: &[u8]) -> Span {
        Span::Paste(b.to_vec())
    }

    // ── Whole delimiters in one chunk ───────────────────────────

    #[test]
    fn plain_bytes_pass_through() {
        let mut framer = PasteFramer::new();
        assert_eq!(framer.scan(b"hello"), vec![bytes(b"hello")]);
        assert!(!framer.is_pasting());
    }

    #[test]
    fn complete_paste_in_one_chunk() {
        let mut framer = PasteFramer::new();
        let spans = framer.scan(b"\x1b[200~pasted\x1b[201~");
        assert_eq!(spans, vec![paste(b"pasted")]);
        assert!(!framer.is_pasting());
    }

    #[test]
    fn bytes_before_paste() {
        let mut framer = PasteFramer::new();
        let spans = framer.scan(b"before\x1b[200~pasted\x1b[201~");
        assert_eq!(spans, vec![bytes(b"before"), paste(b"pasted")]);
    }

    #[test]
    fn bytes_after_paste() {
        let mut framer = PasteFramer::new();
        let spans = framer.scan(b"\x1b[200~p\x1b[201~after");
        assert_eq!(spans, vec![paste(b"p"), bytes(b"after")]);
    }

    #[test]
    fn payload_kept_verbatim() {
        let mut framer = PasteFramer::new();
        let spans = framer.scan(b"\x1b[200~line1\nline2\r\nend\x1b[201~");
        assert_eq!(spans, vec![paste(b"line1\nline2\r\nend")]);
    }

    #[test]
    fn end_delimiter_while_idle_is_dropped() {
        let mut framer = PasteFramer::new();
        let spans = framer.scan(b"ab\x1b[201~cd");
        assert_eq!(spans, vec![bytes(b"abcd")]);
        assert!(!framer.is_pasting());
    }

    #[test]
    fn two_pastes_one_chunk() {
        let mut framer = PasteFramer::new();
        let spans = framer.scan(b"\x1b[200~one\x1b[201~\x1b[200~two\x1b[201~");
        assert_eq!(spans, vec![paste(b"one"), paste(b"two")]);
    }

    // ── Split across chunks ─────────────────────────────────────

    #[test]
    fn paste_split_across_chunks() {
        let mut framer = PasteFramer::new();
        assert_eq!(framer.scan(b"\x1b[200~partial"), Vec::<Span>::new());
        assert!(framer.is_pasting());
        assert_eq!(framer.scan(b" content"), Vec::<Span>::new());
        let spans = framer.scan(b"\x1b[201~");
        assert_eq!(spans, vec![paste(b"partial content")]);
    }

    #[test]
    fn start_delimiter_split_at_every_point() {
        let payload = b"\x1b[200~X\x1b[201~";
        for split in 1..payload.len() {
            let mut framer = PasteFramer::new();
            let mut spans = framer.scan(&payload[..split]);
            spans.extend(framer.scan(&payload[split..]));
            assert_eq!(spans, vec![paste(b"X")], "split at {split}");
        }
    }

    #[test]
    fn held_tail_released_when_not_a_delimiter() {
        let mut framer = PasteFramer::new();
        // "\x1b[" could open a delimiter — held back.
        assert_eq!(framer.scan(b"\x1b["), Vec::<Span>::new());
        assert!(framer.has_idle_tail());
        // "3~" disambiguates: this is a CSI delete, not a paste marker.
        let spans = framer.scan(b"3~");
        assert_eq!(spans, vec![bytes(b"\x1b[3~")]);
        assert!(!framer.has_idle_tail());
    }

    #[test]
    fn five_byte_prefix_held() {
        let mut framer = PasteFramer::new();
        assert_eq!(framer.scan(b"\x1b[200"), Vec::<Span>::new());
        assert!(framer.has_idle_tail());
        let spans = framer.scan(b"~payload\x1b[201~");
        assert_eq!(spans, vec![paste(b"payload")]);
    }

    #[test]
    fn end_delimiter_split_inside_payload() {
        let mut framer = PasteFramer::new();
        framer.scan(b"\x1b[200~data\x1b[20");
        assert!(framer.is_pasting());
        let spans = framer.scan(b"1~");
        assert_eq!(spans, vec![paste(b"data")]);
    }

    #[test]
    fn near_delimiter_inside_payload_stays_payload() {
        let mut framer = PasteFramer::new();
        framer.scan(b"\x1b[200~a\x1b[20");
        // "\x1b[209" is not a delimiter — those bytes are payload.
        framer.scan(b"9x");
        let spans = framer.scan(b"\x1b[201~");
        assert_eq!(spans, vec![paste(b"a\x1b[209x")]);
    }

    // ── Tail management ─────────────────────────────────────────

    #[test]
    fn take_tail_idle() {
        let mut framer = PasteFramer::new();
        framer.scan(b"\x1b");
        assert_eq!(framer.take_tail(), b"\x1b".to_vec());
        assert!(!framer.has_idle_tail());
    }

    #[test]
    fn take_tail_empty_while_pasting() {
        let mut framer = PasteFramer::new();
        framer.scan(b"\x1b[200~abc\x1b[20");
        assert!(framer.is_pasting());
        assert!(framer.take_tail().is_empty());
    }

    #[test]
    fn reset_discards_everything() {
        let mut framer = PasteFramer::new();
        framer.scan(b"\x1b[200~half");
        framer.reset();
        assert!(!framer.is_pasting());
        assert_eq!(framer.scan(b"abc"), vec![bytes(b"abc")]);
    }
}
