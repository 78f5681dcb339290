//! Caller-side handle for one running conversion.

use tokio::sync::{mpsc, oneshot};

use crate::worker::RequestId;

use super::error::ConversionError;

/// One progress update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionProgress {
    /// `0..=100`.
    pub percent: u8,
    /// Media timestamp reached, in microseconds, when the engine knows it.
    pub time_hint: Option<i64>,
}

/// A finished conversion. The caller owns the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionResult {
    pub output_bytes: Vec<u8>,
    pub output_name: String,
}

pub type ConversionOutcome = Result<ConversionResult, ConversionError>;

/// A finite progress stream plus exactly one terminal outcome.
///
/// The progress stream ends when the outcome is settled. Dropping the task
/// does not stop the conversion; use `VideoConverter::cancel` for that.
#[derive(Debug)]
pub struct ConversionTask {
    id: RequestId,
    progress: mpsc::UnboundedReceiver<ConversionProgress>,
    outcome: oneshot::Receiver<ConversionOutcome>,
}

impl ConversionTask {
    pub(crate) fn new(
        id: RequestId,
        progress: mpsc::UnboundedReceiver<ConversionProgress>,
        outcome: oneshot::Receiver<ConversionOutcome>,
    ) -> Self {
        Self {
            id,
            progress,
            outcome,
        }
    }

    /// Request id of this conversion.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Next progress update, or `None` once the conversion has settled.
    pub async fn next_progress(&mut self) -> Option<ConversionProgress> {
        self.progress.recv().await
    }

    /// Drive the conversion to its end, handing every progress update to
    /// `on_progress` in arrival order.
    pub async fn finish(mut self, mut on_progress: impl FnMut(ConversionProgress)) -> ConversionOutcome {
        loop {
            tokio::select! {
                biased;

                Some(update) = self.progress.recv() => on_progress(update),
                outcome = &mut self.outcome => {
                    while let Ok(update) = self.progress.try_recv() {
                        on_progress(update);
                    }
                    return outcome.unwrap_or(Err(ConversionError::Cancelled));
                }
            }
        }
    }

    /// Wait for the outcome, discarding progress.
    pub async fn outcome(self) -> ConversionOutcome {
        self.finish(|_| {}).await
    }
}
