// SPDX-License-Identifier: MIT
//
// Terminal control — raw mode and input-feature toggles, with RAII cleanup.
//
// Safety: This module necessarily uses `unsafe` for termios (tcgetattr,
// tcsetattr), isatty, and raw fd writes. These are the standard POSIX
// interfaces for terminal control — there is no safe alternative. Each
// unsafe block is minimal and documented.
#![allow(unsafe_code)]
//
// This module owns the terminal's raw state. It enters raw mode via
// termios, enables bracketed paste and (optionally) the Kitty keyboard
// protocol, and guarantees cleanup on drop — even if the process panics
// while a half-parsed escape sequence is in flight.
//
// The panic hook bypasses Rust's stdout lock entirely, writing a
// pre-built restore sequence directly to fd 1. This prevents deadlock
// if the panic happened while the lock was held. One raw write,
// everything restored, then the original panic handler prints its
// message to a working terminal.

use std::io::{self, Write};
use std::sync::{Mutex, Once};

use crate::ansi;

// ─── Terminal Queries ───────────────────────────────────────────────────────

/// Check whether stdin is connected to a terminal (TTY).
#[cfg(unix)]
#[must_use]
pub fn is_tty() -> bool {
    unsafe { libc::isatty(libc::STDIN_FILENO) != 0 }
}

#[cfg(not(unix))]
#[must_use]
pub fn is_tty() -> bool {
    false
}

// ─── Panic-Safe Terminal Restore ────────────────────────────────────────────

/// Global backup of original termios for panic recovery.
///
/// The [`Terminal`] struct owns its own copy, but the panic hook can't
/// access it. This global backup — behind a [`Mutex`], not `static mut` —
/// lets the hook restore cooked mode without the struct.
#[cfg(unix)]
static TERMIOS_BACKUP: Mutex<Option<libc::termios>> = Mutex::new(None);

/// Restore termios from the global backup. Best-effort, ignores errors.
#[cfg(unix)]
fn restore_termios_from_backup() {
    if let Ok(guard) = TERMIOS_BACKUP.lock() {
        if let Some(ref original) = *guard {
            unsafe {
                let _ = libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, original);
            }
        }
    }
}

/// Panic hook guard — ensures the hook is installed at most once per process.
static PANIC_HOOK_INSTALLED: Once = Once::new();

/// Install a panic hook that restores the terminal before printing the error.
///
/// Without this, a panic in raw mode leaves the user's terminal broken:
/// no echo, no line editing, kitty sequences spraying into the shell.
/// Our hook writes [`ansi::EMERGENCY_RESTORE`] directly to fd 1
/// (bypassing Rust's stdout lock to avoid deadlock), restores termios,
/// then delegates to the original panic handler so the error prints to
/// a working terminal.
fn install_panic_hook() {
    PANIC_HOOK_INSTALLED.call_once(|| {
        let original = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            emergency_restore();

            #[cfg(unix)]
            restore_termios_from_backup();

            original(info);
        }));
    });
}

/// Write the input-feature restore sequence directly to stdout's fd.
fn emergency_restore() {
    #[cfg(unix)]
    unsafe {
        let _ = libc::write(
            libc::STDOUT_FILENO,
            ansi::EMERGENCY_RESTORE.as_ptr().cast::<libc::c_void>(),
            ansi::EMERGENCY_RESTORE.len(),
        );
    }

    #[cfg(not(unix))]
    {
        let _ = io::stdout().write_all(ansi::EMERGENCY_RESTORE);
        let _ = io::stdout().flush();
    }
}

// ─── Terminal ───────────────────────────────────────────────────────────────

/// Terminal handle with RAII cleanup.
///
/// Call [`enter`](Self::enter) to switch stdin to raw mode and enable the
/// input features the pipeline decodes (bracketed paste, optionally the
/// Kitty keyboard protocol). The terminal is automatically restored when
/// the handle is dropped — even on panic.
///
/// # Example
///
/// ```no_run
/// use q_term::terminal::Terminal;
///
/// let mut term = Terminal::new()?;
/// term.enter(true)?; // raw mode + bracketed paste + kitty keyboard
/// // ... read and decode input ...
/// // Terminal is restored automatically on drop.
/// # Ok::<(), std::io::Error>(())
/// ```
pub struct Terminal {
    /// Original termios saved before entering raw mode.
    #[cfg(unix)]
    original_termios: Option<libc::termios>,

    /// Whether the Kitty keyboard protocol was pushed on enter.
    kitty_pushed: bool,

    /// Whether we're in raw input mode.
    active: bool,
}

impl Terminal {
    /// Create a terminal handle.
    ///
    /// Does **not** touch the terminal — call [`enter`](Self::enter) for
    /// that.
    ///
    /// # Errors
    ///
    /// Currently infallible, but returns `Result` for forward
    /// compatibility (e.g., Windows console API initialization).
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            original_termios: None,
            kitty_pushed: false,
            active: false,
        })
    }

    /// Whether we're currently in raw input mode.
    #[inline]
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Enter raw input mode.
    ///
    /// Enables raw mode (via termios) and bracketed paste; when
    /// `kitty_keyboard` is set, pushes the Kitty disambiguate flag so the
    /// terminal reports keys as `CSI … u` sequences.
    ///
    /// Idempotent: calling `enter()` while already active is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the raw-mode toggle or terminal output fails.
    /// A raw-mode failure is fatal to the caller: the pipeline cannot
    /// run against a line-buffered stream.
    pub fn enter(&mut self, kitty_keyboard: bool) -> io::Result<()> {
        if self.active {
            return Ok(());
        }

        // Install the panic hook (once per process).
        install_panic_hook();

        self.enable_raw_mode()?;

        // Batch the mode-switch sequences to stdout. Like raw mode,
        // skipped when stdin is not a terminal (tests, pipes).
        if is_tty() {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            ansi::enable_bracketed_paste(&mut lock)?;
            if kitty_keyboard {
                ansi::push_kitty_keyboard(&mut lock, 1)?;
                self.kitty_pushed = true;
            }
            lock.flush()?;
        }

        self.active = true;
        Ok(())
    }

    /// Leave raw input mode and restore the terminal.
    ///
    /// Disables the input features in reverse order and exits raw mode.
    /// Idempotent: calling `leave()` while inactive is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if terminal output or termios restore fails.
    pub fn leave(&mut self) -> io::Result<()> {
        if !self.active {
            return Ok(());
        }

        if is_tty() {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            if self.kitty_pushed {
                ansi::pop_kitty_keyboard(&mut lock)?;
                self.kitty_pushed = false;
            }
            ansi::disable_bracketed_paste(&mut lock)?;
            lock.flush()?;
        }

        self.disable_raw_mode()?;
        self.active = false;
        Ok(())
    }

    // ── Raw Mode (termios) ──────────────────────────────────────────

    #[cfg(unix)]
    fn enable_raw_mode(&mut self) -> io::Result<()> {
        use std::os::unix::io::AsRawFd;

        if !is_tty() {
            return Ok(());
        }

        let fd = io::stdin().as_raw_fd();

        unsafe {
            let mut termios: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(fd, &raw mut termios) != 0 {
                return Err(io::Error::last_os_error());
            }

            // Save original for restore.
            self.original_termios = Some(termios);

            // Also save to global backup for the panic hook.
            if let Ok(mut guard) = TERMIOS_BACKUP.lock() {
                *guard = Some(termios);
            }

            // cfmakeraw equivalent: disable all line processing. ISIG off
            // means Ctrl+C arrives as byte 0x03 instead of SIGINT — the
            // pipeline needs the byte to cancel stuck escape sequences.
            termios.c_iflag &= !(libc::IGNBRK
                | libc::BRKINT
                | libc::PARMRK
                | libc::ISTRIP
                | libc::INLCR
                | libc::IGNCR
                | libc::ICRNL
                | libc::IXON);
            termios.c_oflag &= !libc::OPOST;
            termios.c_lflag &=
                !(libc::ECHO | libc::ECHONL | libc::ICANON | libc::ISIG | libc::IEXTEN);
            termios.c_cflag &= !(libc::CSIZE | libc::PARENB);
            termios.c_cflag |= libc::CS8;

            // VMIN=1, VTIME=0: read() blocks until at least 1 byte available.
            termios.c_cc[libc::VMIN] = 1;
            termios.c_cc[libc::VTIME] = 0;

            if libc::tcsetattr(fd, libc::TCSAFLUSH, &raw const termios) != 0 {
                return Err(io::Error::last_os_error());
            }
        }

        Ok(())
    }

    #[cfg(not(unix))]
    fn enable_raw_mode(&mut self) -> io::Result<()> {
        Ok(())
    }

    #[cfg(unix)]
    fn disable_raw_mode(&mut self) -> io::Result<()> {
        if let Some(ref original) = self.original_termios {
            use std::os::unix::io::AsRawFd;
            let fd = io::stdin().as_raw_fd();

            unsafe {
                if libc::tcsetattr(fd, libc::TCSAFLUSH, original) != 0 {
                    return Err(io::Error::last_os_error());
                }
            }

            // Clear the global backup — we've restored successfully.
            if let Ok(mut guard) = TERMIOS_BACKUP.lock() {
                *guard = None;
            }

            self.original_termios = None;
        }

        Ok(())
    }

    #[cfg(not(unix))]
    fn disable_raw_mode(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for Terminal {
    fn drop(&mut self) {
        if self.active {
            let _ = self.leave();
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
