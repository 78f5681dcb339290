//! Conversion executor: one transcode, start to finish.
//!
//! ```text
//! write input.mp4 ─▶ exec(profile args) ─┬─ timeout        ─▶ Timeout
//!                                        ├─ exit code != 0 ─▶ ExitCode
//!                                        └─ exit code 0
//!                                             └─▶ settle ─▶ read output.webm ─▶ Complete
//!                                                              └─ error ─▶ Read (+ listing)
//! cleanup (both files, best effort) runs on every path
//! ```

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::ProfileConfig;
use crate::engine::{CodecEngine, EngineError};

use super::lifecycle::EngineLifecycle;
use super::protocol::{error_stack, FailureKind, Outbox, RequestId, WorkerResponse};
use super::WorkerSettings;

/// Name of the input file inside the engine filesystem.
pub const INPUT_FILE: &str = "input.mp4";
/// Name of the output file inside the engine filesystem.
pub const OUTPUT_FILE: &str = "output.webm";

// ---------------------------------------------------------------------------
// ExecutorError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("engine not initialized")]
    NotInitialized,

    #[error("failed to write input: {0}")]
    Write(#[source] EngineError),

    #[error("engine execution failed: {0}")]
    ExecCall(#[source] EngineError),

    #[error("conversion timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),

    #[error("conversion failed with exit code {0}")]
    ExitCode(i32),

    #[error("failed to read output: {source} (files: {listing})")]
    Read {
        #[source]
        source: EngineError,
        listing: String,
    },
}

impl ExecutorError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ExecutorError::NotInitialized => FailureKind::NotInitialized,
            ExecutorError::Write(_) => FailureKind::Write,
            ExecutorError::ExecCall(_) => FailureKind::Exec,
            ExecutorError::Timeout(_) => FailureKind::Timeout,
            ExecutorError::ExitCode(_) => FailureKind::ExitCode,
            ExecutorError::Read { .. } => FailureKind::Read,
        }
    }
}

// ---------------------------------------------------------------------------
// Output profile
// ---------------------------------------------------------------------------

/// Engine argument vector for `profile`, reading `input` and writing `output`.
pub fn profile_args(profile: &ProfileConfig, input: &str, output: &str) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-i".into(),
        input.into(),
        "-c:v".into(),
        profile.video_codec.clone(),
        "-b:v".into(),
        profile.video_bitrate.clone(),
        "-pix_fmt".into(),
        profile.pixel_format.clone(),
    ];
    if profile.strip_audio {
        args.push("-an".into());
    }
    args.extend([
        "-quality".into(),
        profile.quality.clone(),
        "-cpu-used".into(),
        profile.cpu_used.to_string(),
        output.into(),
    ]);
    args
}

/// Matroska codec id a file encoded with `profile` carries.
pub fn codec_tag(profile: &ProfileConfig) -> &'static str {
    if profile.video_codec.contains("vp9") {
        "V_VP9"
    } else {
        "V_VP8"
    }
}

// ---------------------------------------------------------------------------
// ConversionExecutor
// ---------------------------------------------------------------------------

pub struct ConversionExecutor {
    lifecycle: Arc<EngineLifecycle>,
    outbox: Outbox,
    exec_timeout: Duration,
    settle_delay: Duration,
    profile: ProfileConfig,
    /// The engine is not re-entrant; one conversion at a time.
    gate: Mutex<()>,
}

impl ConversionExecutor {
    pub fn new(lifecycle: Arc<EngineLifecycle>, settings: &WorkerSettings, outbox: Outbox) -> Self {
        Self {
            lifecycle,
            outbox,
            exec_timeout: settings.exec_timeout,
            settle_delay: settings.settle_delay,
            profile: settings.profile.clone(),
            gate: Mutex::new(()),
        }
    }

    /// Convert and post `Complete` or `Error` for request `id`.
    pub async fn handle_convert(&self, id: RequestId, video_data: Vec<u8>, video_name: String) {
        match self.convert(id, &video_data, &video_name).await {
            Ok(output) => {
                log::info!(
                    "executor: request {id} complete ({} bytes from {video_name})",
                    output.len()
                );
                self.outbox.post(WorkerResponse::Complete {
                    id,
                    video_data: output,
                    video_name: OUTPUT_FILE.to_string(),
                });
            }
            Err(e) => {
                let stack = error_stack(&e);
                match &stack {
                    Some(stack) => log::error!("executor: request {id} failed: {e}\n{stack}"),
                    None => log::error!("executor: request {id} failed: {e}"),
                }
                self.outbox.post(WorkerResponse::Error {
                    id: Some(id),
                    kind: e.kind(),
                    message: e.to_string(),
                    stack,
                });
            }
        }
    }

    /// Run one conversion and return the output bytes.
    pub async fn convert(
        &self,
        id: RequestId,
        video_data: &[u8],
        video_name: &str,
    ) -> Result<Vec<u8>, ExecutorError> {
        let _gate = self.gate.lock().await;
        let engine = self.lifecycle.engine().ok_or(ExecutorError::NotInitialized)?;

        log::info!(
            "executor: request {id} converting {video_name} ({} bytes)",
            video_data.len()
        );

        self.lifecycle.set_active_conversion(Some(id));
        let result = self.transcode(engine.as_ref(), video_data).await;
        self.lifecycle.set_active_conversion(None);

        cleanup(engine.as_ref()).await;
        result
    }

    async fn transcode(
        &self,
        engine: &dyn CodecEngine,
        video_data: &[u8],
    ) -> Result<Vec<u8>, ExecutorError> {
        engine
            .write_file(INPUT_FILE, video_data)
            .await
            .map_err(ExecutorError::Write)?;

        let args = profile_args(&self.profile, INPUT_FILE, OUTPUT_FILE);
        log::debug!("executor: exec {}", args.join(" "));

        let code = tokio::time::timeout(self.exec_timeout, engine.exec(&args))
            .await
            .map_err(|_| ExecutorError::Timeout(self.exec_timeout))?
            .map_err(ExecutorError::ExecCall)?;
        if code != 0 {
            return Err(ExecutorError::ExitCode(code));
        }

        tokio::time::sleep(self.settle_delay).await;

        match engine.read_file(OUTPUT_FILE).await {
            Ok(bytes) => Ok(bytes),
            Err(source) => Err(ExecutorError::Read {
                source,
                listing: listing(engine).await,
            }),
        }
    }
}

async fn listing(engine: &dyn CodecEngine) -> String {
    match engine.list_dir("/").await {
        Ok(entries) if entries.is_empty() => "<empty>".into(),
        Ok(entries) => entries
            .iter()
            .map(|e| if e.is_dir { format!("{}/", e.name) } else { e.name.clone() })
            .collect::<Vec<_>>()
            .join(", "),
        Err(e) => format!("<unavailable: {e}>"),
    }
}

async fn cleanup(engine: &dyn CodecEngine) {
    for name in [INPUT_FILE, OUTPUT_FILE] {
        match engine.delete_file(name).await {
            Ok(()) | Err(EngineError::NotFound(_)) => {}
            Err(e) => log::warn!("executor: cleanup of {name} failed: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::{fake_webm, MockArtifacts, MockExec, MockFactory, MockScript};
    use tokio::sync::mpsc;

    async fn loaded_executor(
        script: MockScript,
    ) -> (
        ConversionExecutor,
        Arc<MockFactory>,
        mpsc::UnboundedReceiver<WorkerResponse>,
    ) {
        let factory = MockFactory::new(script);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outbox = Outbox::new(tx);
        let settings = WorkerSettings::default();
        let lifecycle = Arc::new(EngineLifecycle::new(
            factory.clone(),
            MockArtifacts::new(),
            &settings,
            outbox.clone(),
        ));
        lifecycle.ensure_loaded(1).await.unwrap();
        assert_eq!(rx.recv().await, Some(WorkerResponse::Loaded { id: 1 }));
        (ConversionExecutor::new(lifecycle, &settings, outbox), factory, rx)
    }

    #[test]
    fn default_profile_args() {
        let args = profile_args(&ProfileConfig::default(), INPUT_FILE, OUTPUT_FILE);
        assert_eq!(
            args.join(" "),
            "-i input.mp4 -c:v libvpx -b:v 1000k -pix_fmt yuv420p -an -quality good -cpu-used 5 output.webm"
        );
    }

    #[test]
    fn audio_is_kept_when_not_stripped() {
        let profile = ProfileConfig {
            strip_audio: false,
            ..ProfileConfig::default()
        };
        let args = profile_args(&profile, "a", "b");
        assert!(!args.contains(&"-an".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("b"));
    }

    #[test]
    fn codec_tag_follows_codec() {
        assert_eq!(codec_tag(&ProfileConfig::default()), "V_VP8");
        let vp9 = ProfileConfig {
            video_codec: "libvpx-vp9".into(),
            ..ProfileConfig::default()
        };
        assert_eq!(codec_tag(&vp9), "V_VP9");
    }

    #[tokio::test]
    async fn unloaded_engine_is_not_initialized() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let outbox = Outbox::new(tx);
        let settings = WorkerSettings::default();
        let lifecycle = Arc::new(EngineLifecycle::new(
            MockFactory::new(MockScript::default()),
            MockArtifacts::new(),
            &settings,
            outbox.clone(),
        ));
        let executor = ConversionExecutor::new(lifecycle, &settings, outbox);

        let err = executor.convert(2, b"video", "clip.mp4").await.unwrap_err();
        assert!(matches!(err, ExecutorError::NotInitialized));
        assert_eq!(err.kind(), FailureKind::NotInitialized);
    }

    #[tokio::test]
    async fn successful_conversion_posts_complete_and_cleans_up() {
        let (executor, factory, mut rx) = loaded_executor(MockScript::default()).await;

        executor.handle_convert(2, b"mp4 bytes".to_vec(), "clip.mp4".into()).await;

        let mut complete = None;
        while let Some(message) = rx.recv().await {
            if let WorkerResponse::Complete { .. } = message {
                complete = Some(message);
                break;
            }
        }
        assert_eq!(
            complete,
            Some(WorkerResponse::Complete {
                id: 2,
                video_data: fake_webm(),
                video_name: OUTPUT_FILE.into(),
            })
        );

        let engine = factory.last().unwrap();
        assert!(engine.file_names().is_empty());
        assert_eq!(engine.exec_calls().len(), 1);
        assert_eq!(engine.exec_calls()[0][1], INPUT_FILE);
    }

    #[tokio::test]
    async fn nonzero_exit_is_exit_code_failure() {
        let script = MockScript {
            exec: MockExec::Exit(1),
            ..MockScript::default()
        };
        let (executor, factory, _rx) = loaded_executor(script).await;

        let err = executor.convert(2, b"x", "clip.mp4").await.unwrap_err();
        assert!(matches!(err, ExecutorError::ExitCode(1)));
        assert_eq!(err.kind(), FailureKind::ExitCode);
        assert!(factory.last().unwrap().file_names().is_empty());
    }

    #[tokio::test]
    async fn exec_call_failure_is_exec_kind() {
        let script = MockScript {
            exec: MockExec::Fail("out of memory".into()),
            ..MockScript::default()
        };
        let (executor, _factory, _rx) = loaded_executor(script).await;

        let err = executor.convert(2, b"x", "clip.mp4").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Exec);
        assert!(err.to_string().contains("out of memory"));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_exec_times_out() {
        let script = MockScript {
            exec: MockExec::Hang,
            ..MockScript::default()
        };
        let (executor, _factory, mut rx) = loaded_executor(script).await;

        let started = tokio::time::Instant::now();
        executor.handle_convert(3, b"x".to_vec(), "clip.mp4".into()).await;
        assert!(started.elapsed() >= Duration::from_secs(120));

        let mut error = None;
        while let Some(message) = rx.recv().await {
            if let WorkerResponse::Error { .. } = message {
                error = Some(message);
                break;
            }
        }
        match error {
            Some(WorkerResponse::Error {
                id, kind, message, ..
            }) => {
                assert_eq!(id, Some(3));
                assert_eq!(kind, FailureKind::Timeout);
                assert_eq!(message, "conversion timed out after 120 seconds");
            }
            other => panic!("expected timeout error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_output_is_read_failure_with_listing() {
        let script = MockScript {
            output: None,
            ..MockScript::default()
        };
        let (executor, _factory, _rx) = loaded_executor(script).await;

        let err = executor.convert(2, b"x", "clip.mp4").await.unwrap_err();
        match &err {
            ExecutorError::Read { listing, .. } => assert_eq!(listing, INPUT_FILE),
            other => panic!("expected read failure, got {other:?}"),
        }
        assert_eq!(err.kind(), FailureKind::Read);
    }

    #[tokio::test]
    async fn cleanup_failure_does_not_override_success() {
        let script = MockScript {
            delete_fails: true,
            ..MockScript::default()
        };
        let (executor, _factory, _rx) = loaded_executor(script).await;

        let output = executor.convert(2, b"x", "clip.mp4").await.unwrap();
        assert_eq!(output, fake_webm());
    }

    #[tokio::test]
    async fn error_response_carries_stack_for_chained_errors() {
        let script = MockScript {
            exec: MockExec::Fail("segfault".into()),
            ..MockScript::default()
        };
        let (executor, _factory, mut rx) = loaded_executor(script).await;

        executor.handle_convert(5, b"x".to_vec(), "clip.mp4".into()).await;

        loop {
            match rx.recv().await {
                Some(WorkerResponse::Error { stack, .. }) => {
                    assert_eq!(
                        stack.as_deref(),
                        Some("caused by: engine exec failed: segfault")
                    );
                    break;
                }
                Some(_) => continue,
                None => panic!("channel closed"),
            }
        }
    }
}
