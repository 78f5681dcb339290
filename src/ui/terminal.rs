//! Terminal rendering of the UI sink.
//!
//! Progress is an [`indicatif`] bar that exists while the progress section is
//! shown; phase and ETA text ride along as the bar's message. Everything else
//! is printed as ordinary lines, with the bar suspended around each one.
//! Write errors are ignored: losing a status line must never fail a
//! conversion.

use std::io::{self, Write};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::{ButtonState, Section, UiSink};

const BAR_TEMPLATE: &str = "[{elapsed_precise}] [{bar:30}] {pos:>3}% {msg}";

pub struct TerminalUi<W: Write = io::Stderr> {
    out: W,
    draw_to_stderr: bool,
    bar: Option<ProgressBar>,
    percent: u8,
    phase: String,
    eta: String,
}

impl TerminalUi<io::Stderr> {
    pub fn new() -> Self {
        Self {
            draw_to_stderr: true,
            ..Self::with_writer(io::stderr())
        }
    }
}

impl Default for TerminalUi<io::Stderr> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write> TerminalUi<W> {
    /// Lines go to `out`; the progress bar is not drawn.
    pub fn with_writer(out: W) -> Self {
        Self {
            out,
            draw_to_stderr: false,
            bar: None,
            percent: 0,
            phase: String::new(),
            eta: String::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn open_bar(&mut self) {
        if self.bar.is_some() {
            return;
        }
        let target = if self.draw_to_stderr {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(Some(100), target);
        bar.set_style(
            ProgressStyle::with_template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>."),
        );
        bar.set_position(u64::from(self.percent));
        bar.set_message(compose_message(&self.phase, &self.eta));
        self.bar = Some(bar);
    }

    fn refresh_message(&self) {
        if let Some(bar) = &self.bar {
            bar.set_message(compose_message(&self.phase, &self.eta));
        }
    }

    fn line(&mut self, text: &str) {
        match &self.bar {
            Some(bar) => bar.suspend(|| {
                let _ = writeln!(self.out, "{text}");
            }),
            None => {
                let _ = writeln!(self.out, "{text}");
            }
        }
    }
}

/// Bar message: phase and ETA separated by two spaces, empty parts skipped.
pub fn compose_message(phase: &str, eta: &str) -> String {
    [phase, eta]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("  ")
}

impl<W: Write> UiSink for TerminalUi<W> {
    fn show_section(&mut self, section: Section) {
        match section {
            Section::Progress => self.open_bar(),
            Section::Download => self.line("Converted file is ready."),
            Section::Preview | Section::Error => {}
        }
    }

    fn hide_section(&mut self, section: Section) {
        if section == Section::Progress {
            if let Some(bar) = self.bar.take() {
                bar.finish();
            }
        }
    }

    fn set_progress(&mut self, percent: u8) {
        self.percent = percent.min(100);
        if let Some(bar) = &self.bar {
            bar.set_position(u64::from(self.percent));
        }
    }

    fn set_phase(&mut self, message: &str) {
        self.phase = message.to_string();
        self.refresh_message();
    }

    fn set_eta(&mut self, message: &str) {
        self.eta = message.to_string();
        self.refresh_message();
    }

    fn set_convert_button(&mut self, state: ButtonState) {
        log::debug!("ui: convert button {:?} ({})", state, state.label());
    }

    fn set_cancel_enabled(&mut self, enabled: bool) {
        if enabled {
            self.line("Press Ctrl-C to cancel.");
        }
    }

    fn show_error(&mut self, message: &str) {
        self.line(&format!("error: {message}"));
    }

    fn set_error_hint(&mut self, message: &str) {
        if !message.is_empty() {
            self.line(&format!("hint: {message}"));
        }
    }

    fn clear_error(&mut self) {}

    fn display_video_info(&mut self, name: &str, size_label: &str, mime: &str) {
        self.line(&format!("File: {name}"));
        self.line(&format!("Size: {size_label}"));
        self.line(&format!("Type: {mime}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(ui: TerminalUi<Vec<u8>>) -> String {
        String::from_utf8(ui.into_inner()).unwrap()
    }

    #[test]
    fn message_joins_phase_and_eta() {
        assert_eq!(
            compose_message("Encoding frames...", "Estimated time remaining: 10s"),
            "Encoding frames...  Estimated time remaining: 10s"
        );
        assert_eq!(compose_message("", "Almost done..."), "Almost done...");
        assert_eq!(compose_message("", ""), "");
    }

    #[test]
    fn bar_exists_only_while_progress_is_shown() {
        let mut ui = TerminalUi::with_writer(Vec::new());
        ui.set_progress(40);
        assert!(ui.bar.is_none());

        ui.show_section(Section::Progress);
        let bar = ui.bar.clone().unwrap();
        assert_eq!(bar.length(), Some(100));
        assert_eq!(bar.position(), 40);

        ui.hide_section(Section::Progress);
        assert!(ui.bar.is_none());
        assert!(bar.is_finished());
    }

    #[test]
    fn progress_updates_drive_the_bar() {
        let mut ui = TerminalUi::with_writer(Vec::new());
        ui.show_section(Section::Progress);
        ui.set_progress(250);
        ui.set_phase("Finalizing...");
        ui.set_eta("Almost done...");

        let bar = ui.bar.as_ref().unwrap();
        assert_eq!(bar.position(), 100);
        assert_eq!(bar.message(), "Finalizing...  Almost done...");
    }

    #[test]
    fn lines_print_around_the_bar() {
        let mut ui = TerminalUi::with_writer(Vec::new());
        ui.show_section(Section::Progress);
        ui.set_progress(10);
        ui.show_error("Conversion failed: boom");
        ui.hide_section(Section::Progress);

        assert_eq!(output(ui), "error: Conversion failed: boom\n");
    }

    #[test]
    fn video_info_and_errors_are_lines() {
        let mut ui = TerminalUi::with_writer(Vec::new());
        ui.display_video_info("clip.mp4", "1.50 MB", "video/mp4");
        ui.show_error("Conversion failed: boom");
        ui.set_error_hint("You can start the conversion again.");

        assert_eq!(
            output(ui),
            "File: clip.mp4\nSize: 1.50 MB\nType: video/mp4\nerror: Conversion failed: boom\nhint: You can start the conversion again.\n"
        );
    }
}
