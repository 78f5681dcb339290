//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across tasks.
//! Every struct is `#[serde(default)]`, so a settings file only needs to name
//! the values it overrides.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Where the codec engine comes from and how long loading may take.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base location of the engine artifacts.
    ///
    /// - `"system"`: look both artifacts up on `PATH`.
    /// - `http://…` / `https://…`: download `{base}/{name}` on first load.
    /// - anything else: a local directory.
    pub base_location: String,
    /// Name of the executable core artifact (e.g. `"ffmpeg"`).
    pub core_name: String,
    /// Name of the companion module artifact (e.g. `"ffprobe"`).
    pub module_name: String,
    /// Client-side limit on a single `load()` round trip, in seconds.
    pub load_timeout_secs: u64,
    /// How long a second load request waits for an in-flight load, in seconds.
    pub load_wait_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_location: "system".into(),
            core_name: "ffmpeg".into(),
            module_name: "ffprobe".into(),
            load_timeout_secs: 30,
            load_wait_secs: 10,
        }
    }
}

impl EngineConfig {
    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }

    pub fn load_wait(&self) -> Duration {
        Duration::from_secs(self.load_wait_secs)
    }
}

// ---------------------------------------------------------------------------
// ProfileConfig
// ---------------------------------------------------------------------------

/// The fixed WebM output profile.
///
/// Defaults are tuned for bounded memory and CPU: VP8 at a capped bitrate,
/// 4:2:0 chroma, no audio track, fast encoder effort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    /// Encoder name passed to `-c:v` (`"libvpx"` for VP8, `"libvpx-vp9"`).
    pub video_codec: String,
    /// Target bitrate passed to `-b:v`.
    pub video_bitrate: String,
    /// Pixel format passed to `-pix_fmt`.
    pub pixel_format: String,
    /// Drop every audio stream (`-an`).
    pub strip_audio: bool,
    /// libvpx deadline (`good`, `best`, `realtime`).
    pub quality: String,
    /// libvpx `-cpu-used` speed/quality trade-off.
    pub cpu_used: u8,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            video_codec: "libvpx".into(),
            video_bitrate: "1000k".into(),
            pixel_format: "yuv420p".into(),
            strip_audio: true,
            quality: "good".into(),
            cpu_used: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// ConversionConfig
// ---------------------------------------------------------------------------

/// Settings for a single conversion run inside the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    /// Hard wall-clock limit on the engine's exec call, in seconds.
    pub exec_timeout_secs: u64,
    /// Pause between a successful exec and reading the output, in milliseconds.
    pub settle_delay_ms: u64,
    /// Recreate the execution context after an exec timeout.
    pub recycle_on_timeout: bool,
    /// Output encoding profile.
    pub profile: ProfileConfig,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            exec_timeout_secs: 120,
            settle_delay_ms: 100,
            recycle_on_timeout: true,
            profile: ProfileConfig::default(),
        }
    }
}

impl ConversionConfig {
    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

// ---------------------------------------------------------------------------
// IntakeConfig / OutputConfig
// ---------------------------------------------------------------------------

/// Input file acceptance rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    /// Largest accepted input, in megabytes (1 MB = 1 048 576 bytes).
    pub max_file_size_mb: u64,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: crate::intake::MAX_FILE_SIZE_MB,
        }
    }
}

/// Where converted files are written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Destination directory. `None` means [`AppPaths::output_dir`].
    pub directory: Option<PathBuf>,
}

impl OutputConfig {
    /// Resolved destination directory.
    pub fn resolve(&self) -> PathBuf {
        self.directory
            .clone()
            .unwrap_or_else(|| AppPaths::new().output_dir)
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use webm_convert::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Engine artifact location and load limits.
    pub engine: EngineConfig,
    /// Worker-side conversion settings.
    pub conversion: ConversionConfig,
    /// Input validation settings.
    pub intake: IntakeConfig,
    /// Output destination.
    pub output: OutputConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path.
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
