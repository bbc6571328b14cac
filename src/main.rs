// SPDX-License-Identifier: MIT
//
// quill — a terminal keypress inspector.
//
// Moves the terminal to raw mode, runs the keypress pipeline, and
// prints every decoded event: key name, modifiers, the exact byte
// sequence that produced it, and whether it came from the kitty
// protocol or a paste. Useful for checking what a terminal actually
// sends, and for exercising the pipeline end to end.
//
//   quill                    kitty decoding on (default)
//   quill --no-kitty         legacy decoding only
//   quill --paste-workaround passthrough coalescing mode
//   quill --debug-keys       kitty buffer diagnostics (via RUST_LOG)
//
// Exit with Ctrl+C or Ctrl+D. Ctrl+C arrives as an ordinary event
// here — raw mode disables signal generation — which is exactly what
// lets the pipeline use it to cancel stuck escape sequences.

use std::env;
use std::io::{self, Write};
use std::process;
use std::sync::mpsc;

use q_input::{Config, KeyCode, KeyEvent, Modifiers, Pipeline};
use q_term::terminal::is_tty;

fn parse_args() -> Config {
    let mut config = Config {
        kitty_protocol_enabled: true,
        ..Config::default()
    };

    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--no-kitty" => config.kitty_protocol_enabled = false,
            "--paste-workaround" => config.paste_workaround = true,
            "--debug-keys" => config.debug_keystroke_logging = true,
            "-h" | "--help" => {
                println!(
                    "usage: quill [--no-kitty] [--paste-workaround] [--debug-keys]"
                );
                process::exit(0);
            }
            other => {
                eprintln!("quill: unknown option: {other}");
                process::exit(2);
            }
        }
    }

    config
}

/// One printed line per event. Raw mode means explicit `\r\n`.
fn print_event(event: &KeyEvent) {
    let stdout = io::stdout();
    let mut lock = stdout.lock();

    if event.paste {
        let _ = write!(
            lock,
            "paste   {:5}B  {:?}\r\n",
            event.sequence.len(),
            event.sequence
        );
    } else {
        let _ = write!(
            lock,
            "{:<18} {} seq={:?}\r\n",
            event.to_string(),
            if event.kitty_protocol { "kitty " } else { "      " },
            event.sequence
        );
    }
    let _ = lock.flush();
}

fn main() {
    env_logger::init();
    let config = parse_args();

    if !is_tty() {
        eprintln!("quill: stdin is not a terminal");
        process::exit(1);
    }

    let pipeline = Pipeline::activate(config).unwrap_or_else(|e| {
        eprintln!("quill: failed to initialize terminal: {e}");
        process::exit(1);
    });

    // Events arrive on the router thread; hand them to the main thread
    // for printing so the handler stays short.
    let (tx, rx) = mpsc::channel();
    let _subscription = pipeline.subscribe(move |event| {
        let _ = tx.send(event.clone());
    });

    print!("quill — press keys to inspect them, Ctrl+C or Ctrl+D to quit\r\n\r\n");
    let _ = io::stdout().flush();

    for event in rx {
        print_event(&event);

        let ctrl_d = event.code == KeyCode::Char('d')
            && event.modifiers.contains(Modifiers::CTRL);
        if event.is_ctrl_c() || ctrl_d {
            break;
        }
    }

    if let Err(e) = pipeline.deactivate() {
        eprintln!("quill: {e}");
        process::exit(1);
    }
}
