//! Caller-side conversion API.
//!
//! [`VideoConverter`] is the bridge to the execution context. A successful
//! `convert()` hands back a [`ConversionTask`] that streams
//! [`ConversionProgress`] and settles once with a [`ConversionResult`] or a
//! [`ConversionError`].

pub mod bridge;
pub mod error;
pub mod task;

pub use bridge::{BridgeDiagnostics, BridgeSettings, VideoConverter};
pub use error::{ConversionError, LoadError};
pub use task::{ConversionOutcome, ConversionProgress, ConversionResult, ConversionTask};
