//! The isolated execution context that owns the codec engine.
//!
//! # Architecture
//!
//! ```text
//! VideoConverter (bridge)
//!    │  WorkerRequest (mpsc)              ▲ WorkerResponse (mpsc)
//!    ▼                                    │
//! ExecutionContext task ──────────────────┤
//!    ├─ Load    → EngineLifecycle::handle_load      ─┤ Loaded / Error
//!    └─ Convert → ConversionExecutor::handle_convert ─┘ Progress / Complete / Error
//! ```
//!
//! Each request runs as a child task of the context. Aborting the context
//! drops the engine and everything running against it.

pub mod context;
pub mod executor;
pub mod lifecycle;
pub mod protocol;

use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppConfig, AppPaths, ProfileConfig};
use crate::engine::{artifact_source_for, ArtifactSource, EngineFactory, FfmpegEngineFactory};

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use context::ExecutionContext;
pub use executor::{codec_tag, profile_args, ConversionExecutor, ExecutorError};
pub use lifecycle::{EngineLifecycle, EngineState};
pub use protocol::{FailureKind, Outbox, RequestId, WorkerRequest, WorkerResponse};

// ---------------------------------------------------------------------------
// WorkerSettings / WorkerSpec
// ---------------------------------------------------------------------------

/// Plain settings copied into every execution context.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    pub core_name: String,
    pub module_name: String,
    /// How long a second `Load` waits for one already in flight.
    pub load_wait: Duration,
    pub exec_timeout: Duration,
    pub settle_delay: Duration,
    pub profile: ProfileConfig,
}

impl WorkerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            core_name: config.engine.core_name.clone(),
            module_name: config.engine.module_name.clone(),
            load_wait: config.engine.load_wait(),
            exec_timeout: config.conversion.exec_timeout(),
            settle_delay: config.conversion.settle_delay(),
            profile: config.conversion.profile.clone(),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Everything needed to spawn a fresh execution context.
///
/// The bridge keeps one of these and spawns a new context from it after
/// every cancellation.
#[derive(Clone)]
pub struct WorkerSpec {
    pub settings: WorkerSettings,
    pub factory: Arc<dyn EngineFactory>,
    pub artifacts: Arc<dyn ArtifactSource>,
}

impl std::fmt::Debug for WorkerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSpec")
            .field("settings", &self.settings)
            .field("artifacts", &self.artifacts.location())
            .finish_non_exhaustive()
    }
}

impl WorkerSpec {
    pub fn new(
        settings: WorkerSettings,
        factory: Arc<dyn EngineFactory>,
        artifacts: Arc<dyn ArtifactSource>,
    ) -> Self {
        Self {
            settings,
            factory,
            artifacts,
        }
    }

    /// Production spec: `ffmpeg` engines with artifacts from
    /// `engine.base_location`. Downloaded artifacts are cached in
    /// [`AppPaths::engine_dir`].
    pub fn from_config(config: &AppConfig) -> Self {
        let cache_dir = AppPaths::new().engine_dir;
        Self::new(
            WorkerSettings::from_config(config),
            Arc::new(FfmpegEngineFactory),
            artifact_source_for(&config.engine.base_location, &cache_dir),
        )
    }
}
