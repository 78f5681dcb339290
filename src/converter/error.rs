//! Errors surfaced by [`VideoConverter`](super::VideoConverter).

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::worker::FailureKind;

/// Outcome of a failed `load()`.
///
/// `Clone` because one outcome is shared by every caller waiting on the
/// same load.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// No `loaded` reply within the client-side limit.
    #[error("engine load timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),

    /// The execution context reported a load failure.
    #[error("{0}")]
    Engine(String),

    /// `cancel()` discarded the load.
    #[error("engine load was canceled")]
    Cancelled,

    #[error("converter has been destroyed")]
    Destroyed,

    /// The execution context could not accept the request.
    #[error("execution context is unavailable")]
    ContextUnavailable,
}

/// Outcome of a failed `convert()`.
#[derive(Debug, Clone, Error)]
pub enum ConversionError {
    /// No load has completed and none is in flight.
    #[error("engine not loaded; call load() first")]
    NotLoaded,

    /// Another conversion is still running.
    #[error("a conversion is already in progress")]
    Busy,

    /// The load this conversion waited on failed.
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("cannot read {}: {message}", path.display())]
    ReadInput { path: PathBuf, message: String },

    /// The execution context reported a failure for this conversion.
    #[error("{message}")]
    Engine {
        kind: FailureKind,
        message: String,
        stack: Option<String>,
    },

    /// The execution context crashed or stopped.
    #[error("execution context fault: {0}")]
    Fault(String),

    #[error("conversion canceled")]
    Cancelled,

    #[error("converter has been destroyed")]
    Destroyed,
}

impl ConversionError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            ConversionError::Cancelled | ConversionError::Load(LoadError::Cancelled)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ConversionError::Engine {
                kind: FailureKind::Timeout,
                ..
            } | ConversionError::Load(LoadError::Timeout(_))
        )
    }

    /// Failure category, when the execution context supplied one.
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            ConversionError::Engine { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
