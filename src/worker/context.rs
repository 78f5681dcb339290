//! The execution context: a killable task hosting the lifecycle and executor.
//!
//! The context shares no state with its owner. Requests go in over one
//! channel and responses come back over another. [`ExecutionContext::terminate`]
//! (or dropping the handle) aborts the task. The child tasks in its `JoinSet`
//! are aborted with it, and so is the engine they hold.

use std::any::Any;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};

use super::executor::ConversionExecutor;
use super::lifecycle::EngineLifecycle;
use super::protocol::{FailureKind, Outbox, WorkerRequest, WorkerResponse};
use super::WorkerSpec;

/// Handle to a running execution context.
#[derive(Debug)]
pub struct ExecutionContext {
    requests: mpsc::UnboundedSender<WorkerRequest>,
    task: JoinHandle<()>,
}

impl ExecutionContext {
    /// Start a fresh context. The returned receiver yields its responses and
    /// closes when the context stops.
    pub fn spawn(spec: &WorkerSpec) -> (Self, mpsc::UnboundedReceiver<WorkerResponse>) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run(spec.clone(), request_rx, Outbox::new(response_tx)));
        log::debug!("worker: execution context started");

        (
            Self {
                requests: request_tx,
                task,
            },
            response_rx,
        )
    }

    /// Queue a request. Returns `false` when the context is gone.
    pub fn post(&self, request: WorkerRequest) -> bool {
        self.requests.send(request).is_ok()
    }

    /// Hard-stop the context and everything running in it.
    pub fn terminate(&self) {
        self.task.abort();
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    spec: WorkerSpec,
    mut requests: mpsc::UnboundedReceiver<WorkerRequest>,
    outbox: Outbox,
) {
    let lifecycle = Arc::new(EngineLifecycle::new(
        spec.factory,
        spec.artifacts,
        &spec.settings,
        outbox.clone(),
    ));
    let executor = Arc::new(ConversionExecutor::new(
        Arc::clone(&lifecycle),
        &spec.settings,
        outbox.clone(),
    ));
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            request = requests.recv() => {
                let Some(request) = request else { break };
                log::debug!("worker: received {} request {}", request_type(&request), request.id());
                match request {
                    WorkerRequest::Load { id } => {
                        let lifecycle = Arc::clone(&lifecycle);
                        tasks.spawn(async move { lifecycle.handle_load(id).await });
                    }
                    WorkerRequest::Convert { id, video_data, video_name } => {
                        let executor = Arc::clone(&executor);
                        tasks.spawn(async move {
                            executor.handle_convert(id, video_data, video_name).await
                        });
                    }
                }
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    report_fault(&outbox, e);
                }
            }
        }
    }

    log::debug!("worker: request channel closed, stopping");
}

fn request_type(request: &WorkerRequest) -> &'static str {
    match request {
        WorkerRequest::Load { .. } => "load",
        WorkerRequest::Convert { .. } => "convert",
    }
}

/// A request task died without responding. Its id is unknown here, so the
/// fault goes out uncorrelated.
fn report_fault(outbox: &Outbox, err: JoinError) {
    if !err.is_panic() {
        return;
    }
    let message = panic_message(err.into_panic());
    log::error!("worker: request task panicked: {message}");
    outbox.post(WorkerResponse::Error {
        id: None,
        kind: FailureKind::Internal,
        message: format!("worker task panicked: {message}"),
        stack: None,
    });
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
