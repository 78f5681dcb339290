//! UI sink abstraction.
//!
//! [`UiSink`] is the narrow set of setters the conversion manager drives.
//! The CLI renders it on the terminal ([`TerminalUi`]); tests record the
//! calls instead.

pub mod terminal;

pub use terminal::TerminalUi;

/// Independently visible areas of the interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Preview,
    Progress,
    Download,
    Error,
}

/// State of the convert button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonState {
    Idle,
    Loading,
}

impl ButtonState {
    pub fn label(&self) -> &'static str {
        match self {
            ButtonState::Idle => "Convert to WebM",
            ButtonState::Loading => "Converting...",
        }
    }
}

/// Setter-only view of the user interface.
pub trait UiSink {
    fn show_section(&mut self, section: Section);
    fn hide_section(&mut self, section: Section);

    /// Progress bar value, `0..=100`.
    fn set_progress(&mut self, percent: u8);
    fn set_phase(&mut self, message: &str);
    fn set_eta(&mut self, message: &str);

    fn set_convert_button(&mut self, state: ButtonState);
    fn set_cancel_enabled(&mut self, enabled: bool);

    /// Show the error section with `message`.
    fn show_error(&mut self, message: &str);
    fn set_error_hint(&mut self, message: &str);
    /// Hide the error section and clear its message and hint.
    fn clear_error(&mut self);

    fn display_video_info(&mut self, name: &str, size_label: &str, mime: &str);
}

// ---------------------------------------------------------------------------
// RecordingUi (test double)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub use recording::{RecordingUi, UiEvent};
