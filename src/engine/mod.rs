//! Codec engine abstraction for webm-convert.
//!
//! Re-exports the [`CodecEngine`] trait, its event and error types, artifact
//! resolution and the production [`FfmpegEngine`].

pub mod artifacts;
pub mod codec;
pub mod ffmpeg;

#[cfg(test)]
pub mod mock;

pub use artifacts::{
    artifact_source_for, resolve_artifacts, ArtifactError, ArtifactSource, EngineArtifacts,
    HttpArtifacts, LocalArtifacts, SystemArtifacts,
};
pub use codec::{CodecEngine, DirEntry, EngineError, EngineEvent, EngineFactory, EventSink};
pub use ffmpeg::{FfmpegEngine, FfmpegEngineFactory};
