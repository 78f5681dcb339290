//! webm-convert: video to WebM conversion through an isolated execution
//! context.
//!
//! The layers, from the caller down:
//!
//! - [`pipeline`]: the conversion manager that drives a [`ui::UiSink`].
//! - [`converter`]: the caller-side bridge, `VideoConverter`.
//! - [`worker`]: the execution context, engine lifecycle and executor.
//! - [`engine`]: the codec engine seam and its ffmpeg implementation.

pub mod config;
pub mod converter;
pub mod engine;
pub mod intake;
pub mod pipeline;
pub mod progress;
pub mod ui;
pub mod webm;
pub mod worker;
