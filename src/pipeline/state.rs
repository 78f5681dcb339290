//! Per-attempt conversion state machine.
//!
//! [`ConversionState`] tracks where the current attempt is. The
//! [`ConversionManager`](super::ConversionManager) moves it along and the
//! CLI reads it to decide the exit status.

// ---------------------------------------------------------------------------
// ConversionState
// ---------------------------------------------------------------------------

/// States of one conversion attempt.
///
/// The state machine transitions are:
///
/// ```text
/// Idle ──convert (engine loading)──▶ AwaitingLoad ──loaded──▶ Sent
///      ──convert (engine loaded)───▶ Sent
///                                    Sent ──result──▶ Completed
///                                         ──error───▶ Failed
/// AwaitingLoad / Sent ──cancel──▶ Cancelled
/// Completed / Failed / Cancelled ──next convert──▶ Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConversionState {
    /// No attempt in flight.
    #[default]
    Idle,

    /// Waiting for the engine to finish loading before the request is sent.
    AwaitingLoad,

    /// The convert request has been posted; progress may arrive.
    Sent,

    /// Output bytes are available for download.
    Completed,

    /// The attempt ended with an error, already shown to the user.
    Failed,

    /// The user cancelled; a fresh execution context is being loaded.
    Cancelled,
}

impl ConversionState {
    /// Returns `true` while an attempt is in flight.
    ///
    /// ```
    /// use webm_convert::pipeline::ConversionState;
    ///
    /// assert!(!ConversionState::Idle.is_busy());
    /// assert!(ConversionState::AwaitingLoad.is_busy());
    /// assert!(ConversionState::Sent.is_busy());
    /// assert!(!ConversionState::Completed.is_busy());
    /// assert!(!ConversionState::Failed.is_busy());
    /// assert!(!ConversionState::Cancelled.is_busy());
    /// ```
    pub fn is_busy(&self) -> bool {
        matches!(self, ConversionState::AwaitingLoad | ConversionState::Sent)
    }

    /// A short human-readable label for log lines and status output.
    pub fn label(&self) -> &'static str {
        match self {
            ConversionState::Idle => "Idle",
            ConversionState::AwaitingLoad => "Loading engine",
            ConversionState::Sent => "Converting",
            ConversionState::Completed => "Done",
            ConversionState::Failed => "Error",
            ConversionState::Cancelled => "Canceled",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
