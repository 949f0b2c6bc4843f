//! Subscription worker: drives a [`BrokerSession`] in its own task, feeds
//! the [`TelemetryBuffer`] and owns the ordered shutdown.
//!
//! Shutdown runs exactly once, however many times [`SubscriptionWorker::quit`]
//! is called and from however many tasks:
//!
//! 1. stop the session task and disconnect (no further appends);
//! 2. seal and snapshot the buffer;
//! 3. export the snapshot, if requested;
//! 4. release the live renderer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use gnbwatch_protocol::{SessionState, StompFrame, TelemetryFrame};
use gnbwatch_telemetry::{ExportError, ExportOutcome, ExportRequest, TelemetryBuffer};

use crate::client::BrokerError;
use crate::lifecycle::Lifecycle;
use crate::session::{BrokerSession, Connector};

/// Errors from the subscription worker.
///
/// Cloneable so every caller of [`SubscriptionWorker::quit`] gets the same
/// outcome.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Broker(Arc<BrokerError>),

    #[error("export failed: {0}")]
    Export(Arc<ExportError>),

    #[error("export task failed: {0}")]
    ExportTask(String),

    #[error("worker already started")]
    AlreadyStarted,

    #[error("session ended before connecting (state {0:?})")]
    NotConnected(SessionState),
}

/// What the worker subscribes to and where the buffer goes on shutdown.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub topic: String,
    /// `None` when the operator chose the live renderer instead.
    pub export: Option<ExportRequest>,
}

/// Summary of a completed shutdown.
#[derive(Debug, Clone, PartialEq)]
pub struct ShutdownReport {
    /// Frames buffered over the whole session.
    pub frames: usize,
    pub export: Option<ExportOutcome>,
}

/// Decodes one MESSAGE body and appends it to `buffer`.
///
/// Malformed bodies are logged and dropped. Returns whether a frame was
/// appended.
pub fn on_frame(buffer: &TelemetryBuffer, frame: &StompFrame) -> bool {
    let telemetry = match TelemetryFrame::from_slice(&frame.body) {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, bytes = frame.body.len(), "dropping malformed telemetry frame");
            return false;
        }
    };
    if buffer.append(telemetry) {
        trace!(buffered = buffer.len(), "telemetry frame buffered");
        true
    } else {
        debug!("buffer sealed, dropping late telemetry frame");
        false
    }
}

/// Runs one telemetry subscription.
pub struct SubscriptionWorker<C: Connector> {
    session: Arc<BrokerSession<C>>,
    buffer: TelemetryBuffer,
    lifecycle: Lifecycle,
    config: WorkerConfig,
    cancel: CancellationToken,
    renderer: CancellationToken,
    started: AtomicBool,
    task: Mutex<Option<JoinHandle<Result<(), WorkerError>>>>,
    shutdown: OnceCell<Result<ShutdownReport, WorkerError>>,
}

impl<C: Connector> SubscriptionWorker<C> {
    pub fn new(
        session: BrokerSession<C>,
        buffer: TelemetryBuffer,
        lifecycle: Lifecycle,
        config: WorkerConfig,
    ) -> Self {
        Self {
            session: Arc::new(session),
            buffer,
            lifecycle,
            config,
            cancel: CancellationToken::new(),
            renderer: CancellationToken::new(),
            started: AtomicBool::new(false),
            task: Mutex::new(None),
            shutdown: OnceCell::new(),
        }
    }

    /// Spawns the session task and returns immediately.
    ///
    /// Observe progress with [`wait_connected`](Self::wait_connected) or the
    /// [`Lifecycle`].
    pub async fn start(&self) -> Result<(), WorkerError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(WorkerError::AlreadyStarted);
        }
        self.lifecycle.advance(SessionState::Connecting);

        let mut task = self.task.lock().await;
        *task = Some(tokio::spawn(run_session(
            self.session.clone(),
            self.buffer.clone(),
            self.lifecycle.clone(),
            self.config.topic.clone(),
            self.cancel.clone(),
        )));
        Ok(())
    }

    /// Waits until the subscription is live.
    pub async fn wait_connected(&self) -> Result<(), WorkerError> {
        self.lifecycle
            .wait_connected()
            .await
            .map_err(WorkerError::NotConnected)
    }

    pub fn is_connected(&self) -> bool {
        self.lifecycle.state() == SessionState::Connected && self.session.is_connected()
    }

    pub fn buffer(&self) -> &TelemetryBuffer {
        &self.buffer
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Token a live renderer should stop on. Cancelled as the last step of
    /// shutdown.
    pub fn renderer_token(&self) -> CancellationToken {
        self.renderer.clone()
    }

    /// Runs the shutdown sequence once. Later and concurrent calls wait for
    /// it and get the same result.
    pub async fn quit(&self) -> Result<ShutdownReport, WorkerError> {
        self.shutdown
            .get_or_init(|| self.shutdown_sequence())
            .await
            .clone()
    }

    async fn shutdown_sequence(&self) -> Result<ShutdownReport, WorkerError> {
        info!("shutting down subscription");
        self.cancel.cancel();
        self.session.disconnect().await;

        // Joining the task also waits out a subscribe in progress.
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            match task.await {
                Ok(Err(e)) => debug!(error = %e, "session task ended with error"),
                Err(e) => warn!(error = %e, "session task did not finish cleanly"),
                Ok(Ok(())) => {}
            }
        }

        self.buffer.seal();
        self.lifecycle.advance(SessionState::Disconnected);
        let frames = self.buffer.snapshot();
        let count = frames.len();
        info!(frames = count, "telemetry buffer drained");

        let export = match &self.config.export {
            Some(request) => export_snapshot(request.clone(), frames).await.map(Some),
            None => Ok(None),
        };

        self.renderer.cancel();
        self.lifecycle.advance(SessionState::Terminated);

        Ok(ShutdownReport {
            frames: count,
            export: export?,
        })
    }
}

async fn export_snapshot(
    request: ExportRequest,
    frames: Vec<Arc<TelemetryFrame>>,
) -> Result<ExportOutcome, WorkerError> {
    let epoch = chrono::Utc::now().timestamp();
    match tokio::task::spawn_blocking(move || request.export(&frames, epoch)).await {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(e)) => {
            error!(error = %e, "telemetry export failed");
            Err(WorkerError::Export(Arc::new(e)))
        }
        Err(e) => Err(WorkerError::ExportTask(e.to_string())),
    }
}

async fn run_session<C: Connector>(
    session: Arc<BrokerSession<C>>,
    buffer: TelemetryBuffer,
    lifecycle: Lifecycle,
    topic: String,
    cancel: CancellationToken,
) -> Result<(), WorkerError> {
    let fail = |e: BrokerError| {
        if !matches!(e, BrokerError::Cancelled) {
            error!(error = %e, "broker session failed");
            lifecycle.advance(SessionState::Disconnected);
        }
        WorkerError::Broker(Arc::new(e))
    };

    session.connect(&cancel).await.map_err(fail)?;

    let lost = lifecycle.clone();
    session
        .on_connection_lost(Box::new(move || {
            warn!("broker connection lost, no further telemetry will arrive");
            lost.advance(SessionState::Disconnected);
        }))
        .await
        .map_err(fail)?;

    let sink = buffer.clone();
    let id = session
        .subscribe(
            &topic,
            Box::new(move |frame| {
                on_frame(&sink, &frame);
            }),
        )
        .await
        .map_err(fail)?;

    if !session.is_connected() {
        return Err(fail(BrokerError::Closed));
    }
    if lifecycle.advance(SessionState::Connected) {
        info!(%topic, subscription = %id, "subscribed to telemetry");
    }
    Ok(())
}
