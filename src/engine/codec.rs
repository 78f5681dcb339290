//! Core codec engine trait, its events and errors.
//!
//! # Overview
//!
//! [`CodecEngine`] is the opaque transcoding capability the worker drives.  It
//! is object-safe and `Send + Sync` so it can be held behind an
//! `Arc<dyn CodecEngine>`.
//!
//! Engines report `log` lines and `progress` ratios through the
//! [`EventSink`] handed to [`EngineFactory::create`].  The sink is wired once,
//! at construction, so events flow regardless of which operation is running.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use super::artifacts::EngineArtifacts;

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// All errors a codec engine can report.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// An operation other than `load` was called before a successful load.
    #[error("engine is not loaded")]
    NotLoaded,

    /// The engine rejected its artifacts or failed to start.
    #[error("engine load failed: {0}")]
    Load(String),

    /// The named file does not exist in the engine filesystem.
    #[error("no such file in engine filesystem: {0}")]
    NotFound(String),

    /// A filesystem operation failed.
    #[error("engine I/O error: {0}")]
    Io(String),

    /// The execute call could not be started or was interrupted.
    #[error("engine exec failed: {0}")]
    Exec(String),
}

// ---------------------------------------------------------------------------
// EngineEvent
// ---------------------------------------------------------------------------

/// Out-of-band notifications emitted by a running engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A diagnostic line from the engine.
    Log(String),
    /// Transcode progress.
    Progress {
        /// Completed fraction in `0.0..=1.0`.
        ratio: f64,
        /// Media timestamp reached so far, in microseconds.
        time_us: Option<i64>,
    },
}

/// Channel end an engine pushes its [`EngineEvent`]s into.
pub type EventSink = mpsc::UnboundedSender<EngineEvent>;

// ---------------------------------------------------------------------------
// DirEntry
// ---------------------------------------------------------------------------

/// One entry of an engine filesystem listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

// ---------------------------------------------------------------------------
// CodecEngine trait
// ---------------------------------------------------------------------------

/// Object-safe, thread-safe interface to a transcoding engine.
///
/// The engine is **not re-entrant**: callers must not overlap `exec` calls.
/// The worker's executor serialises them.
#[async_trait]
pub trait CodecEngine: Send + Sync {
    /// Prepare the engine from its resolved artifacts.
    async fn load(&self, artifacts: &EngineArtifacts) -> Result<(), EngineError>;

    /// Store `data` under `name` in the engine filesystem.
    async fn write_file(&self, name: &str, data: &[u8]) -> Result<(), EngineError>;

    /// Run the engine with `args` and return its exit code.
    async fn exec(&self, args: &[String]) -> Result<i32, EngineError>;

    /// Read the full contents of `name`.
    async fn read_file(&self, name: &str) -> Result<Vec<u8>, EngineError>;

    /// Remove `name` from the engine filesystem.
    async fn delete_file(&self, name: &str) -> Result<(), EngineError>;

    /// List the entries under `path`.
    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, EngineError>;
}

// Compile-time assertion: Box<dyn CodecEngine> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn CodecEngine>) {}
};

// ---------------------------------------------------------------------------
// EngineFactory
// ---------------------------------------------------------------------------

/// Builds fresh engine instances wired to an event sink.
///
/// The lifecycle manager asks for a new instance on every load attempt, so
/// an engine never outlives the execution context that created it.
pub trait EngineFactory: Send + Sync {
    fn create(&self, events: EventSink) -> Arc<dyn CodecEngine>;
}
