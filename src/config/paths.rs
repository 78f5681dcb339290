//! Cross-platform application paths using the `dirs` crate.
//!
//! Layout:
//!
//! Config dir (settings):
//!   Windows: %APPDATA%\webm-convert\
//!   macOS:   ~/Library/Application Support/webm-convert/
//!   Linux:   ~/.config/webm-convert/
//!
//! Data dir (downloaded engine artifacts):
//!   Windows: %LOCALAPPDATA%\webm-convert\engine\
//!   macOS:   ~/Library/Application Support/webm-convert/engine/
//!   Linux:   ~/.local/share/webm-convert/engine/
//!
//! Converted files land in the user's download directory unless the
//! configuration names another one.

use std::path::PathBuf;

/// Holds all resolved application directory/file paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Directory for `settings.toml`.
    pub config_dir: PathBuf,
    /// Full path to `settings.toml`.
    pub settings_file: PathBuf,
    /// Cache for engine artifacts downloaded from an http(s) location.
    pub engine_dir: PathBuf,
    /// Default destination for converted files.
    pub output_dir: PathBuf,
}

impl AppPaths {
    const APP_NAME: &'static str = "webm-convert";

    /// Resolves all paths using the `dirs` crate.
    ///
    /// Falls back to the current directory if the platform cannot provide a
    /// standard path.
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let output_dir = dirs::download_dir().unwrap_or_else(|| PathBuf::from("."));

        Self {
            settings_file: config_dir.join("settings.toml"),
            config_dir,
            engine_dir: data_dir.join("engine"),
            output_dir,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}
