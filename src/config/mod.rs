//! Configuration module for webm-convert.
//!
//! Provides `AppConfig` (top-level settings), sub-configs for the engine,
//! the conversion worker, intake and output, `AppPaths` for cross-platform
//! directories, and TOML persistence via `AppConfig::load` / `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{
    AppConfig, ConversionConfig, EngineConfig, IntakeConfig, OutputConfig, ProfileConfig,
};
