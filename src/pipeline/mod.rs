//! Conversion pipeline for the front end.
//!
//! This module turns user actions into converter calls and converter events
//! into UI updates.
//!
//! # Architecture
//!
//! ```text
//! handle_file_selected ─▶ validate ─▶ Preview + video info
//!
//! handle_convert
//!        │
//!        ├─ VideoConverter::convert      (AwaitingLoad → Sent)
//!        ├─ ConversionTask::finish       progress ─▶ progress::project ─▶ UiSink
//!        └─ outcome                      Completed | Failed | Cancelled
//!
//! handle_cancel ─▶ VideoConverter::cancel ─▶ canceled state + hint
//! handle_download ─▶ <output dir>/<name>.webm
//! ```

pub mod manager;
pub mod state;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use manager::ConversionManager;
pub use state::ConversionState;
