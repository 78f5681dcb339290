//! Conversion manager: drives the UI from converter events.
//!
//! [`ConversionManager`] owns the selected file and the last result. Every
//! user action (select, convert, cancel, download) maps to one `handle_*`
//! method that calls into the [`VideoConverter`] and updates the
//! [`UiSink`]. Failures of any kind end up as a single message string here;
//! nothing below this layer talks to the UI.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::converter::{ConversionError, ConversionProgress, ConversionResult, VideoConverter};
use crate::intake::{format_file_size, output_file_name, validate_video_file, IntakeError, VideoFile};
use crate::progress;
use crate::ui::{ButtonState, Section, UiSink};

use super::state::ConversionState;

const DEFAULT_OUTPUT_NAME: &str = "output.webm";

pub struct ConversionManager<U: UiSink> {
    converter: Arc<VideoConverter>,
    ui: U,
    output_dir: PathBuf,
    max_file_size_mb: u64,
    current_file: Option<VideoFile>,
    converted: Option<ConversionResult>,
    state: ConversionState,
}

impl<U: UiSink> ConversionManager<U> {
    pub fn new(
        converter: Arc<VideoConverter>,
        ui: U,
        output_dir: impl Into<PathBuf>,
        max_file_size_mb: u64,
    ) -> Self {
        Self {
            converter,
            ui,
            output_dir: output_dir.into(),
            max_file_size_mb,
            current_file: None,
            converted: None,
            state: ConversionState::Idle,
        }
    }

    pub fn state(&self) -> ConversionState {
        self.state
    }

    pub fn converter(&self) -> &Arc<VideoConverter> {
        &self.converter
    }

    pub fn current_file(&self) -> Option<&VideoFile> {
        self.current_file.as_ref()
    }

    pub fn converted(&self) -> Option<&ConversionResult> {
        self.converted.as_ref()
    }

    pub fn ui(&self) -> &U {
        &self.ui
    }

    /// Start loading the engine ahead of the first conversion.
    ///
    /// A failure is shown but not fatal: `handle_convert` reports
    /// `NotLoaded` if the user tries anyway.
    pub async fn preload(&mut self) -> bool {
        match self.converter.load().await {
            Ok(()) => {
                log::info!("manager: engine ready");
                true
            }
            Err(e) => {
                log::error!("manager: engine load failed: {e}");
                self.ui.show_error(&format!("Failed to load converter: {e}"));
                false
            }
        }
    }

    /// Validate `file` and make it the current selection.
    pub fn handle_file_selected(&mut self, file: VideoFile) -> Result<(), IntakeError> {
        if let Err(e) = validate_video_file(&file, self.max_file_size_mb) {
            log::warn!("manager: rejected {}: {e}", file.name);
            self.ui.show_error(&e.to_string());
            return Err(e);
        }

        self.ui.clear_error();
        self.ui.hide_section(Section::Download);
        self.ui.show_section(Section::Preview);
        self.ui
            .display_video_info(&file.name, &format_file_size(file.size), &file.mime);

        log::info!("manager: selected {} ({} bytes, {})", file.name, file.size, file.mime);
        self.current_file = Some(file);
        self.converted = None;
        self.state = ConversionState::Idle;
        Ok(())
    }

    /// Convert the current file, streaming progress into the UI.
    ///
    /// Returns the state the attempt ended in.
    pub async fn handle_convert(&mut self) -> ConversionState {
        let Some(file) = self.current_file.clone() else {
            self.ui.show_error("Please select a video file first.");
            return self.state;
        };

        if self.state.is_busy() {
            // The previous attempt's future was dropped before it settled.
            log::warn!(
                "manager: abandoning stale attempt ({})",
                self.state.label()
            );
            self.converter.cancel();
        }

        self.ui.clear_error();
        self.ui.set_convert_button(ButtonState::Loading);
        self.ui.show_section(Section::Progress);
        self.ui.set_cancel_enabled(true);
        self.ui.hide_section(Section::Download);
        self.ui.set_progress(0);
        self.ui.set_phase("Preparing conversion...");
        self.ui.set_eta("Estimating time remaining...");

        self.converted = None;
        self.state = if self.converter.is_loaded() {
            ConversionState::Sent
        } else {
            ConversionState::AwaitingLoad
        };

        let started = Instant::now();
        let outcome = match self.converter.convert(&file).await {
            Ok(task) => {
                self.state = ConversionState::Sent;
                let ui = &mut self.ui;
                task.finish(|update| show_progress(ui, update, started)).await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(result) => self.show_complete(result),
            Err(e) if e.is_cancelled() => self.show_cancelled(),
            Err(e) => self.show_failed(&e),
        }
        self.state
    }

    /// Abort the running conversion and reload a fresh execution context.
    pub fn handle_cancel(&mut self) {
        log::info!("manager: cancel from {}", self.state.label());
        self.converter.cancel();
        self.show_cancelled();
    }

    /// Write the last result into the output directory.
    ///
    /// Returns `Ok(None)` when there is nothing to write.
    pub async fn handle_download(&mut self) -> std::io::Result<Option<PathBuf>> {
        let Some(result) = &self.converted else {
            self.ui.show_error("No converted video available.");
            return Ok(None);
        };

        let name = self
            .current_file
            .as_ref()
            .map(|f| output_file_name(&f.name))
            .unwrap_or_else(|| DEFAULT_OUTPUT_NAME.to_string());

        let path = write_output(&self.output_dir, &name, &result.output_bytes).await?;
        log::info!(
            "manager: wrote {} ({} bytes)",
            path.display(),
            result.output_bytes.len()
        );
        Ok(Some(path))
    }

    fn show_complete(&mut self, result: ConversionResult) {
        log::info!(
            "manager: conversion complete ({} bytes)",
            result.output_bytes.len()
        );
        self.ui.hide_section(Section::Progress);
        self.ui.show_section(Section::Download);
        self.ui.set_convert_button(ButtonState::Idle);
        self.ui.set_cancel_enabled(false);
        self.ui.set_phase("Conversion complete");
        self.ui.set_eta("");
        self.converted = Some(result);
        self.state = ConversionState::Completed;
    }

    fn show_failed(&mut self, error: &ConversionError) {
        log::error!("manager: conversion failed: {error}");
        self.ui.show_error(&format!("Conversion failed: {error}"));
        self.ui.hide_section(Section::Progress);
        self.ui.set_convert_button(ButtonState::Idle);
        self.ui.set_cancel_enabled(false);
        self.ui.set_eta("");
        self.state = ConversionState::Failed;
    }

    fn show_cancelled(&mut self) {
        self.ui.hide_section(Section::Progress);
        self.ui.show_error("Conversion canceled.");
        self.ui.set_error_hint("You can start the conversion again.");
        self.ui.set_convert_button(ButtonState::Idle);
        self.ui.set_cancel_enabled(false);
        self.ui.set_eta("");
        self.state = ConversionState::Cancelled;
    }
}

fn show_progress<U: UiSink>(ui: &mut U, update: ConversionProgress, started: Instant) {
    let projection = progress::project(update.percent, started, Instant::now());
    ui.set_progress(projection.percent);
    ui.set_phase(projection.phase.message());
    if let Some(eta) = projection.eta {
        ui.set_eta(&format!("Estimated time remaining: {eta}"));
    }
}

async fn write_output(dir: &Path, name: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(name);
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
