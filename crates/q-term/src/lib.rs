// SPDX-License-Identifier: MIT
//
// q-term — Terminal control and byte intake for quill.
//
// The thin layer between the keypress pipeline and the operating
// system: raw mode via termios (with RAII restore and a panic hook),
// the input-feature escape sequences (bracketed paste, Kitty keyboard
// protocol), and the byte intake thread delivering raw stdin chunks
// into a bounded channel.
//
// This crate intentionally avoids external terminal frameworks
// (ratatui, crossterm) in favor of direct control via ANSI escape
// sequences and raw termios. The pipeline's correctness depends on
// seeing the exact bytes the terminal sends; an abstraction layer that
// pre-parses or reorders them would defeat it.

#[allow(clippy::missing_errors_doc)] // ANSI functions all just forward io::Write errors.
pub mod ansi;
pub mod intake;
pub mod terminal;
