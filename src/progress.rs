//! Progress projection: phase labels and ETA from a raw percentage.
//!
//! Everything here is a pure function of `(percent, started, now)`.

use std::time::{Duration, Instant};

/// Coarse conversion phase derived from the percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initializing,
    Analyzing,
    Encoding,
    Finalizing,
    WrappingUp,
}

impl Phase {
    /// Step function over the percentage.
    ///
    /// ```
    /// use webm_convert::progress::Phase;
    ///
    /// assert_eq!(Phase::for_percent(0), Phase::Initializing);
    /// assert_eq!(Phase::for_percent(24), Phase::Analyzing);
    /// assert_eq!(Phase::for_percent(75), Phase::Finalizing);
    /// assert_eq!(Phase::for_percent(100), Phase::WrappingUp);
    /// ```
    pub fn for_percent(percent: u8) -> Self {
        match percent {
            0..=4 => Phase::Initializing,
            5..=24 => Phase::Analyzing,
            25..=74 => Phase::Encoding,
            75..=94 => Phase::Finalizing,
            _ => Phase::WrappingUp,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Phase::Initializing => "Initializing",
            Phase::Analyzing => "Analyzing",
            Phase::Encoding => "Encoding",
            Phase::Finalizing => "Finalizing",
            Phase::WrappingUp => "Wrapping up",
        }
    }

    /// Status line shown while in this phase.
    pub fn message(&self) -> &'static str {
        match self {
            Phase::Initializing => "Initializing encoder...",
            Phase::Analyzing => "Analyzing video...",
            Phase::Encoding => "Encoding frames...",
            Phase::Finalizing => "Finalizing output...",
            Phase::WrappingUp => "Wrapping up...",
        }
    }
}

/// Linear extrapolation of the time left. `None` until some progress exists.
pub fn estimate_remaining(percent: u8, elapsed: Duration) -> Option<Duration> {
    if percent == 0 {
        return None;
    }
    let percent = u32::from(percent.min(100));
    Some(elapsed / percent * (100 - percent))
}

/// `"4m 0s"` from a minute up, `"10s"` below. Rounds up to whole seconds.
pub fn format_eta(remaining: Duration) -> String {
    let secs = remaining.as_millis().div_ceil(1000);
    let (minutes, seconds) = (secs / 60, secs % 60);
    if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// Everything the UI needs for one progress update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressProjection {
    pub percent: u8,
    pub phase: Phase,
    /// Formatted ETA, absent at 0%.
    pub eta: Option<String>,
}

pub fn project(percent: u8, started: Instant, now: Instant) -> ProgressProjection {
    let percent = percent.min(100);
    let elapsed = now.saturating_duration_since(started);
    ProgressProjection {
        percent,
        phase: Phase::for_percent(percent),
        eta: estimate_remaining(percent, elapsed).map(format_eta),
    }
}
