//! The orchestrator side of the worker bridge.
//!
//! [`VideoConverter`] owns one [`ExecutionContext`] at a time and a
//! dispatcher task that routes the context's responses back to callers.
//!
//! # Routing
//!
//! | Response             | Goes to                                              |
//! |----------------------|------------------------------------------------------|
//! | `Loaded { id }`      | pending load with that id; always marks loaded       |
//! | `Progress { id }`    | active conversion (id matches or is absent)          |
//! | `Complete { id }`    | active conversion with that id                       |
//! | `Error { id: Some }` | whichever pending operation owns the id              |
//! | `Error { id: None }` | pending load if not loaded, else active conversion   |
//!
//! Every context gets a generation number. Responses from an older
//! generation are dropped, so nothing from a cancelled context can settle
//! work started against its replacement.
//!
//! Bridge state sits behind a `std::sync::Mutex` that is never held across
//! an `.await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::intake::VideoFile;
use crate::worker::{
    ExecutionContext, FailureKind, RequestId, WorkerRequest, WorkerResponse, WorkerSpec,
};

use super::error::{ConversionError, LoadError};
use super::task::{ConversionOutcome, ConversionProgress, ConversionResult, ConversionTask};

// ---------------------------------------------------------------------------
// Settings and diagnostics
// ---------------------------------------------------------------------------

/// Caller-side limits.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeSettings {
    /// Client-side bound on one `load()` round trip.
    pub load_timeout: Duration,
    /// Recreate the context after a conversion times out.
    pub recycle_on_timeout: bool,
}

impl BridgeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            load_timeout: config.engine.load_timeout(),
            recycle_on_timeout: config.conversion.recycle_on_timeout,
        }
    }
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Point-in-time view of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeDiagnostics {
    pub is_loaded: bool,
    pub load_pending: bool,
    pub conversion_active: bool,
    pub load_requests_sent: u64,
    pub convert_requests_sent: u64,
    /// Number of times the execution context has been replaced.
    pub generation: u64,
    pub destroyed: bool,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

type LoadOutcome = Option<Result<(), LoadError>>;

struct PendingLoad {
    id: RequestId,
    outcome: watch::Sender<LoadOutcome>,
    timer: JoinHandle<()>,
}

struct ActiveConversion {
    id: RequestId,
    progress: mpsc::UnboundedSender<ConversionProgress>,
    outcome: oneshot::Sender<ConversionOutcome>,
}

struct ContextSlot {
    context: ExecutionContext,
    dispatcher: JoinHandle<()>,
}

impl ContextSlot {
    fn shutdown(self) {
        self.context.terminate();
        self.dispatcher.abort();
    }
}

#[derive(Default)]
struct BridgeState {
    slot: Option<ContextSlot>,
    generation: u64,
    last_id: RequestId,
    is_loaded: bool,
    pending_load: Option<PendingLoad>,
    active: Option<ActiveConversion>,
    destroyed: bool,
    load_requests_sent: u64,
    convert_requests_sent: u64,
}

impl BridgeState {
    fn next_id(&mut self) -> RequestId {
        self.last_id += 1;
        self.last_id
    }

    fn pending_load_id(&self) -> Option<RequestId> {
        self.pending_load.as_ref().map(|p| p.id)
    }

    fn active_id(&self) -> Option<RequestId> {
        self.active.as_ref().map(|a| a.id)
    }

    fn settle_load(&mut self, outcome: Result<(), LoadError>) {
        if let Some(pending) = self.pending_load.take() {
            pending.timer.abort();
            pending.outcome.send_replace(Some(outcome));
        }
    }

    fn settle_conversion(&mut self, outcome: ConversionOutcome) {
        if let Some(active) = self.active.take() {
            // The receiver is gone if the caller dropped its task.
            let _ = active.outcome.send(outcome);
        }
    }

    fn post(&self, request: WorkerRequest) -> bool {
        self.slot
            .as_ref()
            .map(|slot| slot.context.post(request))
            .unwrap_or(false)
    }
}

struct Shared {
    spec: WorkerSpec,
    settings: BridgeSettings,
    state: Mutex<BridgeState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BridgeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_context(self: &Arc<Self>, state: &mut BridgeState) {
        let (context, responses) = ExecutionContext::spawn(&self.spec);
        let dispatcher = tokio::spawn(dispatch(Arc::downgrade(self), state.generation, responses));
        state.slot = Some(ContextSlot {
            context,
            dispatcher,
        });
    }

    /// Post a `Load` and register the pending load it settles.
    fn start_load(
        self: &Arc<Self>,
        state: &mut BridgeState,
    ) -> Result<watch::Receiver<LoadOutcome>, LoadError> {
        if state.slot.is_none() {
            log::info!("bridge: starting execution context");
            self.spawn_context(state);
        }

        let id = state.next_id();
        if !state.post(WorkerRequest::Load { id }) {
            return Err(LoadError::ContextUnavailable);
        }
        state.load_requests_sent += 1;
        log::info!("bridge: load request {id} sent");

        let (outcome, rx) = watch::channel(None);
        let timer = tokio::spawn(load_timer(
            Arc::downgrade(self),
            id,
            self.settings.load_timeout,
        ));
        state.pending_load = Some(PendingLoad { id, outcome, timer });
        Ok(rx)
    }

    /// Tear down the current context, settle everything that depended on it
    /// and start over with a fresh context and a new load.
    fn recycle(self: &Arc<Self>, state: &mut BridgeState) {
        if let Some(slot) = state.slot.take() {
            slot.shutdown();
        }
        state.is_loaded = false;
        state.generation += 1;
        state.settle_load(Err(LoadError::Cancelled));
        state.settle_conversion(Err(ConversionError::Cancelled));

        self.spawn_context(state);
        if let Err(e) = self.start_load(state) {
            log::error!("bridge: reload after recycle failed: {e}");
        }
    }

    fn handle_message(self: &Arc<Self>, generation: u64, message: WorkerResponse) {
        let mut state = self.lock();
        if state.destroyed || state.generation != generation {
            log::warn!("bridge: dropping message from stale context (generation {generation})");
            return;
        }

        match message {
            WorkerResponse::Loaded { id } => {
                state.is_loaded = true;
                if state.pending_load_id() == Some(id) {
                    log::info!("bridge: engine loaded (request {id})");
                    state.settle_load(Ok(()));
                } else {
                    log::debug!("bridge: loaded reply {id} has no pending load");
                }
            }

            WorkerResponse::Progress { id, progress, time } => match &state.active {
                Some(active) if id.map_or(true, |id| id == active.id) => {
                    let _ = active.progress.send(ConversionProgress {
                        percent: progress.min(100),
                        time_hint: time,
                    });
                }
                _ => log::debug!("bridge: progress {progress}% with no matching conversion"),
            },

            WorkerResponse::Complete {
                id,
                video_data,
                video_name,
            } => {
                if state.active_id() == Some(id) {
                    log::info!(
                        "bridge: conversion {id} complete ({} bytes)",
                        video_data.len()
                    );
                    state.settle_conversion(Ok(ConversionResult {
                        output_bytes: video_data,
                        output_name: video_name,
                    }));
                } else {
                    log::warn!("bridge: completion for unknown conversion {id}");
                }
            }

            WorkerResponse::Error {
                id: Some(id),
                kind,
                message,
                stack,
            } => {
                if state.pending_load_id() == Some(id) {
                    log::error!("bridge: load request {id} failed: {message}");
                    state.settle_load(Err(LoadError::Engine(message)));
                } else if state.active_id() == Some(id) {
                    log::error!("bridge: conversion {id} failed: {message}");
                    state.settle_conversion(Err(ConversionError::Engine {
                        kind,
                        message,
                        stack,
                    }));
                    if kind == FailureKind::Timeout && self.settings.recycle_on_timeout {
                        log::warn!("bridge: recycling execution context after timeout");
                        self.recycle(&mut state);
                    }
                } else {
                    log::warn!("bridge: error for unknown request {id}: {message}");
                }
            }

            WorkerResponse::Error {
                id: None,
                kind,
                message,
                stack,
            } => {
                log::error!("bridge: execution context fault: {message}");
                if state.pending_load.is_some() && !state.is_loaded {
                    state.settle_load(Err(LoadError::Engine(message)));
                } else if state.active.is_some() {
                    state.settle_conversion(Err(ConversionError::Engine {
                        kind,
                        message,
                        stack,
                    }));
                }
            }
        }
    }

    /// The response channel closed without the bridge asking for it. Nothing
    /// that context was working on can finish.
    fn handle_context_closed(&self, generation: u64) {
        let mut state = self.lock();
        if state.destroyed || state.generation != generation {
            return;
        }
        log::error!("bridge: execution context stopped unexpectedly");

        state.slot = None;
        state.is_loaded = false;
        state.generation += 1;
        state.settle_load(Err(LoadError::ContextUnavailable));
        state.settle_conversion(Err(ConversionError::Fault(
            "execution context stopped unexpectedly".into(),
        )));
    }
}

async fn dispatch(
    shared: Weak<Shared>,
    generation: u64,
    mut responses: mpsc::UnboundedReceiver<WorkerResponse>,
) {
    while let Some(message) = responses.recv().await {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        shared.handle_message(generation, message);
    }
    if let Some(shared) = shared.upgrade() {
        shared.handle_context_closed(generation);
    }
}

async fn load_timer(shared: Weak<Shared>, id: RequestId, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    let Some(shared) = shared.upgrade() else {
        return;
    };
    let mut state = shared.lock();
    if state.pending_load_id() != Some(id) {
        return;
    }
    if let Some(pending) = state.pending_load.take() {
        log::error!("bridge: load request {id} timed out after {timeout:?}");
        pending.outcome.send_replace(Some(Err(LoadError::Timeout(timeout))));
    }
}

async fn wait_for_load(rx: &mut watch::Receiver<LoadOutcome>) -> Result<(), LoadError> {
    match rx.wait_for(Option::is_some).await {
        Ok(outcome) => (*outcome).clone().unwrap_or(Err(LoadError::Cancelled)),
        Err(_) => Err(LoadError::Cancelled),
    }
}

// ---------------------------------------------------------------------------
// VideoConverter
// ---------------------------------------------------------------------------

/// Single-flight load, single-flight convert, hard cancel.
///
/// Must be created inside a Tokio runtime; the execution context is spawned
/// immediately.
///
/// ```rust,no_run
/// use webm_convert::config::AppConfig;
/// use webm_convert::converter::{BridgeSettings, VideoConverter};
/// use webm_convert::intake::VideoFile;
/// use webm_convert::worker::WorkerSpec;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = AppConfig::default();
/// let converter = VideoConverter::new(
///     WorkerSpec::from_config(&config),
///     BridgeSettings::from_config(&config),
/// );
/// converter.load().await?;
///
/// let file = VideoFile::open("clip.mp4").await?;
/// let result = converter
///     .convert(&file)
///     .await?
///     .finish(|p| println!("{}%", p.percent))
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct VideoConverter {
    shared: Arc<Shared>,
}

impl VideoConverter {
    pub fn new(spec: WorkerSpec, settings: BridgeSettings) -> Self {
        let shared = Arc::new(Shared {
            spec,
            settings,
            state: Mutex::new(BridgeState::default()),
        });
        {
            let mut state = shared.lock();
            shared.spawn_context(&mut state);
        }
        Self { shared }
    }

    /// Load the engine. Concurrent callers share one `Load` request.
    pub async fn load(&self) -> Result<(), LoadError> {
        let mut rx = {
            let mut state = self.shared.lock();
            if state.destroyed {
                return Err(LoadError::Destroyed);
            }
            if state.is_loaded {
                return Ok(());
            }
            match &state.pending_load {
                Some(pending) => pending.outcome.subscribe(),
                None => self.shared.start_load(&mut state)?,
            }
        };
        wait_for_load(&mut rx).await
    }

    /// Start converting `file`.
    ///
    /// Waits for a pending load but never starts one. Nothing is sent to the
    /// execution context unless the input was read successfully.
    pub async fn convert(&self, file: &VideoFile) -> Result<ConversionTask, ConversionError> {
        let pending = {
            let state = self.shared.lock();
            check_can_convert(&state)?;
            if state.is_loaded {
                None
            } else {
                match &state.pending_load {
                    Some(pending) => Some(pending.outcome.subscribe()),
                    None => return Err(ConversionError::NotLoaded),
                }
            }
        };

        if let Some(mut rx) = pending {
            log::debug!("bridge: convert waiting for pending load");
            wait_for_load(&mut rx).await?;
        }

        let video_data = tokio::fs::read(&file.path)
            .await
            .map_err(|e| ConversionError::ReadInput {
                path: file.path.clone(),
                message: e.to_string(),
            })?;

        let mut state = self.shared.lock();
        check_can_convert(&state)?;
        if !state.is_loaded {
            return Err(ConversionError::NotLoaded);
        }

        let id = state.next_id();
        let size = video_data.len();
        let request = WorkerRequest::Convert {
            id,
            video_data,
            video_name: file.name.clone(),
        };
        if !state.post(request) {
            return Err(ConversionError::Fault(
                "execution context is unavailable".into(),
            ));
        }
        state.convert_requests_sent += 1;
        log::info!("bridge: convert request {id} sent ({}, {size} bytes)", file.name);

        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        state.active = Some(ActiveConversion {
            id,
            progress: progress_tx,
            outcome: outcome_tx,
        });
        Ok(ConversionTask::new(id, progress_rx, outcome_rx))
    }

    /// Kill the execution context, fail pending work with `Cancelled`, and
    /// immediately start loading a fresh context.
    pub fn cancel(&self) {
        let mut state = self.shared.lock();
        if state.destroyed {
            return;
        }
        log::info!("bridge: cancel requested");
        self.shared.recycle(&mut state);
    }

    /// Kill the execution context for good. Every later call fails with
    /// `Destroyed`.
    pub fn destroy(&self) {
        let mut state = self.shared.lock();
        if state.destroyed {
            return;
        }
        state.destroyed = true;
        state.is_loaded = false;
        if let Some(slot) = state.slot.take() {
            slot.shutdown();
        }
        state.settle_load(Err(LoadError::Destroyed));
        state.settle_conversion(Err(ConversionError::Destroyed));
        log::info!("bridge: destroyed");
    }

    pub fn is_loaded(&self) -> bool {
        self.shared.lock().is_loaded
    }

    pub fn diagnostics(&self) -> BridgeDiagnostics {
        let state = self.shared.lock();
        BridgeDiagnostics {
            is_loaded: state.is_loaded,
            load_pending: state.pending_load.is_some(),
            conversion_active: state.active.is_some(),
            load_requests_sent: state.load_requests_sent,
            convert_requests_sent: state.convert_requests_sent,
            generation: state.generation,
            destroyed: state.destroyed,
        }
    }
}

impl Drop for VideoConverter {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn check_can_convert(state: &BridgeState) -> Result<(), ConversionError> {
    if state.destroyed {
        Err(ConversionError::Destroyed)
    } else if state.active.is_some() {
        Err(ConversionError::Busy)
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
