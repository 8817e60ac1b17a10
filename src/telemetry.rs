//! Tracing setup and event formatting.
//!
//! [`init`] wires up the ambient logging stack: `.env` is loaded first so
//! `RUST_LOG` can live next to the project, then a `tracing-subscriber`
//! fmt layer with env-filter is installed. Event rendering for sinks is
//! controlled by [`FormatterMode`], which auto-detects TTY capability.

use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;

use crate::event_bus::Event;

const LINE_COLOR: &str = "\x1b[35m";
const RESET_COLOR: &str = "\x1b[0m";

/// Install the default tracing subscriber, reading `RUST_LOG` after
/// loading `.env`. Safe to call more than once; later calls are no-ops.
pub fn init() {
    dotenvy::dotenv().ok();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Formatter color mode for rendered events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatterMode {
    /// Auto-detect TTY capability (checks `stderr.is_terminal()`).
    #[default]
    Auto,
    /// Always include ANSI color codes.
    Colored,
    /// Never include ANSI color codes.
    Plain,
}

impl FormatterMode {
    /// Returns true if this mode should use colored output.
    ///
    /// For `Auto` mode, performs TTY detection on each call.
    pub fn is_colored(&self) -> bool {
        match self {
            FormatterMode::Auto => std::io::stderr().is_terminal(),
            FormatterMode::Colored => true,
            FormatterMode::Plain => false,
        }
    }
}

/// Renders events into sink-ready text.
pub trait EventFormatter: Send + Sync {
    fn render_event(&self, event: &Event) -> String;
}

/// Plain text formatter with optional ANSI color codes.
pub struct PlainFormatter {
    mode: FormatterMode,
}

impl PlainFormatter {
    /// Formatter with auto-detected color mode.
    pub fn new() -> Self {
        Self {
            mode: FormatterMode::Auto,
        }
    }

    /// Formatter with explicit color mode.
    pub fn with_mode(mode: FormatterMode) -> Self {
        Self { mode }
    }
}

impl Default for PlainFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventFormatter for PlainFormatter {
    fn render_event(&self, event: &Event) -> String {
        if self.mode.is_colored() {
            format!("{LINE_COLOR}{event}{RESET_COLOR}\n")
        } else {
            format!("{event}\n")
        }
    }
}
