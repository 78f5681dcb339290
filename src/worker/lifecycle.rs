//! Engine lifecycle inside one execution context.
//!
//! [`EngineLifecycle`] owns the context's single engine. The state lives in a
//! `watch` channel: the first `Load` claims [`EngineState::Loading`] with
//! `send_if_modified`, and any `Load` that arrives meanwhile subscribes to the
//! channel and waits, bounded by `load_wait`, for that load to settle. Only
//! one engine load ever runs at a time.
//!
//! ```text
//! Unloaded ──▶ Loading ──▶ Ready
//!                 │
//!                 └──────▶ Failed ──(explicit Load)──▶ Loading
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::engine::{
    resolve_artifacts, ArtifactError, ArtifactSource, CodecEngine, EngineError, EngineEvent,
    EngineFactory,
};

use super::protocol::{error_stack, FailureKind, Outbox, RequestId, WorkerResponse};
use super::WorkerSettings;

// ---------------------------------------------------------------------------
// EngineState
// ---------------------------------------------------------------------------

/// Load state of the context's engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    Unloaded,
    Loading,
    Ready,
    Failed,
}

// ---------------------------------------------------------------------------
// LoadError
// ---------------------------------------------------------------------------

/// Why a `Load` request failed inside the context.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to resolve engine artifacts: {0}")]
    Artifact(#[source] ArtifactError),

    #[error("engine failed to load: {0}")]
    Engine(#[source] EngineError),

    /// Another request's load settled as failed while this one waited.
    #[error("concurrent engine load failed")]
    ConcurrentLoadFailed,

    /// The concurrent load did not settle within the wait bound.
    #[error("timed out after {}s waiting for engine load", .0.as_secs())]
    WaitTimeout(Duration),
}

// ---------------------------------------------------------------------------
// LoadingClaim
// ---------------------------------------------------------------------------

/// Held while this request owns [`EngineState::Loading`]. If the load
/// unwinds or is dropped before settling, the state falls back to
/// [`EngineState::Failed`] so the next `Load` can claim it again.
struct LoadingClaim<'a> {
    state: &'a watch::Sender<EngineState>,
}

impl Drop for LoadingClaim<'_> {
    fn drop(&mut self) {
        let released = self.state.send_if_modified(|state| {
            if *state == EngineState::Loading {
                *state = EngineState::Failed;
                true
            } else {
                false
            }
        });
        if released {
            log::warn!("lifecycle: engine load abandoned before settling");
        }
    }
}

// ---------------------------------------------------------------------------
// EngineLifecycle
// ---------------------------------------------------------------------------

pub struct EngineLifecycle {
    factory: Arc<dyn EngineFactory>,
    artifacts: Arc<dyn ArtifactSource>,
    core_name: String,
    module_name: String,
    load_wait: Duration,
    outbox: Outbox,
    state: watch::Sender<EngineState>,
    engine: Mutex<Option<Arc<dyn CodecEngine>>>,
    /// Id of the running conversion, `0` when idle.
    active_conversion: Arc<AtomicU64>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl EngineLifecycle {
    pub fn new(
        factory: Arc<dyn EngineFactory>,
        artifacts: Arc<dyn ArtifactSource>,
        settings: &WorkerSettings,
        outbox: Outbox,
    ) -> Self {
        let (state, _) = watch::channel(EngineState::Unloaded);
        Self {
            factory,
            artifacts,
            core_name: settings.core_name.clone(),
            module_name: settings.module_name.clone(),
            load_wait: settings.load_wait,
            outbox,
            state,
            engine: Mutex::new(None),
            active_conversion: Arc::new(AtomicU64::new(0)),
            forwarder: Mutex::new(None),
        }
    }

    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// The loaded engine, if the last load succeeded.
    pub fn engine(&self) -> Option<Arc<dyn CodecEngine>> {
        lock(&self.engine).clone()
    }

    /// Tag forwarded progress with `id` until cleared with `None`.
    pub fn set_active_conversion(&self, id: Option<RequestId>) {
        self.active_conversion.store(id.unwrap_or(0), Ordering::SeqCst);
    }

    /// Run [`ensure_loaded`](Self::ensure_loaded) and report a failure as an
    /// `Error` response.
    pub async fn handle_load(&self, id: RequestId) {
        if let Err(e) = self.ensure_loaded(id).await {
            log::error!("lifecycle: load request {id} failed: {e}");
            self.outbox.post(WorkerResponse::Error {
                id: Some(id),
                kind: FailureKind::Load,
                message: e.to_string(),
                stack: error_stack(&e),
            });
        }
    }

    /// Make sure the engine is ready, posting `Loaded { id }` on success.
    pub async fn ensure_loaded(&self, id: RequestId) -> Result<(), LoadError> {
        let claimed = self.state.send_if_modified(|state| match state {
            EngineState::Unloaded | EngineState::Failed => {
                *state = EngineState::Loading;
                true
            }
            EngineState::Loading | EngineState::Ready => false,
        });

        if !claimed {
            if self.state() == EngineState::Ready {
                log::debug!("lifecycle: engine already ready for request {id}");
                self.outbox.post(WorkerResponse::Loaded { id });
                return Ok(());
            }
            return self.wait_for_concurrent_load(id).await;
        }

        let _claim = LoadingClaim { state: &self.state };
        log::info!("lifecycle: loading engine for request {id}");
        match self.load_engine().await {
            Ok(engine) => {
                *lock(&self.engine) = Some(engine);
                self.state.send_replace(EngineState::Ready);
                log::info!("lifecycle: engine ready");
                self.outbox.post(WorkerResponse::Loaded { id });
                Ok(())
            }
            Err(e) => {
                self.state.send_replace(EngineState::Failed);
                Err(e)
            }
        }
    }

    async fn wait_for_concurrent_load(&self, id: RequestId) -> Result<(), LoadError> {
        log::debug!("lifecycle: request {id} waiting for in-flight load");
        let mut rx = self.state.subscribe();
        let settled = tokio::time::timeout(self.load_wait, async {
            rx.wait_for(|s| *s != EngineState::Loading)
                .await
                .map(|s| *s)
        })
        .await;

        match settled {
            Ok(Ok(EngineState::Ready)) => {
                self.outbox.post(WorkerResponse::Loaded { id });
                Ok(())
            }
            Ok(_) => Err(LoadError::ConcurrentLoadFailed),
            Err(_) => Err(LoadError::WaitTimeout(self.load_wait)),
        }
    }

    async fn load_engine(&self) -> Result<Arc<dyn CodecEngine>, LoadError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let engine = self.factory.create(events_tx);
        self.spawn_forwarder(events_rx);

        let artifacts = resolve_artifacts(
            self.artifacts.as_ref(),
            &self.core_name,
            &self.module_name,
        )
        .await
        .map_err(LoadError::Artifact)?;

        engine.load(&artifacts).await.map_err(LoadError::Engine)?;
        Ok(engine)
    }

    /// Relay engine events: progress becomes a `Progress` response, log
    /// lines go to the debug log.
    fn spawn_forwarder(&self, mut events: mpsc::UnboundedReceiver<EngineEvent>) {
        let outbox = self.outbox.clone();
        let active = Arc::clone(&self.active_conversion);

        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    EngineEvent::Log(line) => log::debug!("engine: {line}"),
                    EngineEvent::Progress { ratio, time_us } => {
                        let id = match active.load(Ordering::SeqCst) {
                            0 => None,
                            id => Some(id),
                        };
                        outbox.post(WorkerResponse::Progress {
                            id,
                            progress: percent_from_ratio(ratio),
                            time: time_us,
                        });
                    }
                }
            }
        });

        if let Some(previous) = lock(&self.forwarder).replace(handle) {
            previous.abort();
        }
    }
}

impl Drop for EngineLifecycle {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.forwarder).take() {
            handle.abort();
        }
    }
}

/// `ratio` in `0.0..=1.0` to a whole percentage.
pub fn percent_from_ratio(ratio: f64) -> u8 {
    if !ratio.is_finite() {
        return 0;
    }
    (ratio * 100.0).round().clamp(0.0, 100.0) as u8
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
