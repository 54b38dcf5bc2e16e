//! Inference boundary: the frame loop's side of the worker.
//!
//! [`InferenceChannel`] owns the request sender, the response receiver and the
//! worker thread. Every wait on the worker is bounded by [`InferenceTimeouts`],
//! and at most one frame request is queued on the worker at a time, including
//! one whose caller gave up waiting.

pub mod protocol;
mod worker;

use crate::capture::Frame;
use crate::config::{InferenceTimeouts, ModelConfig};
use crate::error::{InferenceError, LoadError};
use crate::segmentation::{InferenceBackend, SegmentationMask, TensorLedger};
use protocol::{Request, Response, WorkerStatus};
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

/// Where the channel is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Uninitialized,
    BackendReady,
    ModelLoading,
    ModelReady,
    Error,
}

/// Handle for one submitted frame request.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a submitted frame must be received or it stays in flight"]
pub struct Ticket {
    id: u64,
}

impl Ticket {
    pub fn id(&self) -> u64 {
        self.id
    }
}

pub struct InferenceChannel {
    requests: UnboundedSender<Request>,
    responses: UnboundedReceiver<Response>,
    worker: Option<JoinHandle<()>>,
    state: ChannelState,
    backend_ready: bool,
    backend_failure: Option<String>,
    loaded_url: Option<String>,
    next_id: u64,
    in_flight: Option<(u64, Instant)>,
    /// Timed-out request the worker has not answered yet.
    abandoned: Option<u64>,
    timeouts: InferenceTimeouts,
    ledger: TensorLedger,
}

impl InferenceChannel {
    /// Start the worker thread with `backend`. The backend initializes on the
    /// worker; `load_model` waits for it.
    pub fn spawn(
        backend: Box<dyn InferenceBackend>,
        timeouts: InferenceTimeouts,
    ) -> std::io::Result<Self> {
        let (requests, worker_requests) = mpsc::unbounded_channel();
        let (worker_responses, responses) = mpsc::unbounded_channel();
        let ledger = TensorLedger::new();
        let worker = worker::spawn(backend, ledger.clone(), worker_requests, worker_responses)?;

        Ok(Self {
            requests,
            responses,
            worker: Some(worker),
            state: ChannelState::Uninitialized,
            backend_ready: false,
            backend_failure: None,
            loaded_url: None,
            next_id: 1,
            in_flight: None,
            abandoned: None,
            timeouts,
            ledger,
        })
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_model_ready(&self) -> bool {
        self.state == ChannelState::ModelReady
    }

    pub fn loaded_model(&self) -> Option<&str> {
        self.loaded_url.as_deref()
    }

    /// Tensor accounting shared with the worker.
    pub fn ledger(&self) -> &TensorLedger {
        &self.ledger
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Load `model_url` on the worker and warm it up.
    ///
    /// Loading the model that is already loaded is a no-op. A failed load leaves
    /// the channel in [`ChannelState::Error`]; calling this again retries.
    pub async fn load_model(
        &mut self,
        model_url: &str,
        config: &ModelConfig,
    ) -> Result<(), LoadError> {
        let loaded = self.loaded_url.as_deref() == Some(model_url);
        if self.state == ChannelState::ModelReady && loaded {
            tracing::debug!("Model {} already loaded", model_url);
            return Ok(());
        }

        self.wait_backend_ready().await?;

        let id = self.next_id();
        self.state = ChannelState::ModelLoading;
        self.loaded_url = None;
        tracing::info!("Loading segmentation model {}", model_url);

        let request = Request::LoadModel {
            id,
            model_url: model_url.to_string(),
            model_config: config.clone(),
        };
        if self.requests.send(request).is_err() {
            self.state = ChannelState::Error;
            return Err(LoadError::Disconnected);
        }

        let limit = self.timeouts.model_load;
        let result = match tokio::time::timeout(limit, self.await_load(id)).await {
            Ok(result) => result,
            Err(_) => Err(LoadError::LoadTimeout(limit)),
        };

        match &result {
            Ok(()) => {
                self.state = ChannelState::ModelReady;
                self.loaded_url = Some(model_url.to_string());
                tracing::info!("Model ready");
            }
            Err(e) => {
                self.state = ChannelState::Error;
                tracing::error!("Model load failed: {}", e);
            }
        }
        result
    }

    /// Poll until the worker reports its backend ready.
    async fn wait_backend_ready(&mut self) -> Result<(), LoadError> {
        let started = Instant::now();
        loop {
            loop {
                match self.responses.try_recv() {
                    Ok(response) => self.observe(response),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        if self.backend_ready {
                            break;
                        }
                        self.state = ChannelState::Error;
                        return Err(match self.backend_failure.clone() {
                            Some(failure) => LoadError::Rejected(failure),
                            None => LoadError::Disconnected,
                        });
                    }
                }
            }

            if self.backend_ready {
                return Ok(());
            }
            if let Some(failure) = &self.backend_failure {
                return Err(LoadError::Rejected(failure.clone()));
            }
            if started.elapsed() >= self.timeouts.backend_ready {
                self.state = ChannelState::Error;
                return Err(LoadError::BackendTimeout(self.timeouts.backend_ready));
            }
            tokio::time::sleep(self.timeouts.poll_interval).await;
        }
    }

    async fn await_load(&mut self, id: u64) -> Result<(), LoadError> {
        loop {
            let response = self.responses.recv().await.ok_or(LoadError::Disconnected)?;
            match response {
                Response::Status {
                    id: Some(got),
                    status: WorkerStatus::ModelLoaded,
                } if got == id => return Ok(()),
                Response::Status {
                    id: Some(got),
                    status: WorkerStatus::LoadingModel,
                } if got == id => tracing::debug!("Worker is loading the model"),
                Response::Error {
                    id: Some(got),
                    error,
                    ..
                } if got == id => return Err(LoadError::Rejected(error)),
                other => self.observe(other),
            }
        }
    }

    /// Handle a message that answers nothing currently awaited.
    fn observe(&mut self, response: Response) {
        match response {
            Response::Status {
                id: None,
                status: WorkerStatus::BackendInitialized,
            } => {
                tracing::info!("Inference backend initialized");
                self.backend_ready = true;
                if self.state == ChannelState::Uninitialized {
                    self.state = ChannelState::BackendReady;
                }
            }
            Response::Error {
                id: None, error, ..
            } => {
                tracing::error!("Inference worker error: {}", error);
                self.backend_failure = Some(error);
                self.state = ChannelState::Error;
            }
            Response::Status { id, status } => {
                tracing::debug!("Ignoring status {:?} for request {:?}", status, id);
            }
            Response::SegmentationResult { id, .. } => {
                tracing::debug!("Discarding stale result for request {}", id);
                self.settle(id);
            }
            Response::Error {
                id: Some(id), error, ..
            } => {
                tracing::debug!("Discarding stale error for request {}: {}", id, error);
                self.settle(id);
            }
        }
    }

    /// The worker has answered `id`; it no longer holds that request.
    fn settle(&mut self, id: u64) {
        if self.abandoned == Some(id) {
            self.abandoned = None;
        }
        if self.in_flight.map(|(pending, _)| pending) == Some(id) {
            self.in_flight = None;
        }
    }

    /// Take every answer already waiting without blocking.
    fn drain(&mut self) -> Result<(), InferenceError> {
        loop {
            match self.responses.try_recv() {
                Ok(response) => self.observe(response),
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => {
                    self.state = ChannelState::Error;
                    return Err(InferenceError::Disconnected);
                }
            }
        }
    }

    /// Move the frame's pixels to the worker.
    ///
    /// Fails with [`InferenceError::Busy`] while the worker still holds an
    /// earlier request, even one whose caller timed out. A request unanswered
    /// past the frame timeout is abandoned; its answer is discarded on
    /// arrival and only then is the next frame accepted.
    pub fn submit(&mut self, frame: Frame) -> Result<Ticket, InferenceError> {
        if self.state != ChannelState::ModelReady {
            return Err(InferenceError::NotReady);
        }

        if let Some((pending, sent_at)) = self.in_flight {
            if sent_at.elapsed() < self.timeouts.frame {
                return Err(InferenceError::Busy(pending));
            }
            tracing::warn!("Abandoning request {} after {:?}", pending, sent_at.elapsed());
            self.in_flight = None;
            self.abandoned = Some(pending);
        }
        if self.abandoned.is_some() {
            self.drain()?;
        }
        if let Some(stale) = self.abandoned {
            return Err(InferenceError::Busy(stale));
        }

        let id = self.next_id();
        let (width, height) = (frame.width(), frame.height());
        let request = Request::ProcessFrame {
            id,
            image_buffer: frame.into_raw(),
            width,
            height,
        };
        if self.requests.send(request).is_err() {
            self.state = ChannelState::Error;
            return Err(InferenceError::Disconnected);
        }

        self.in_flight = Some((id, Instant::now()));
        Ok(Ticket { id })
    }

    /// Wait for the answer to `ticket`, at most the frame timeout.
    pub async fn receive(&mut self, ticket: Ticket) -> Result<SegmentationMask, InferenceError> {
        let limit = self.timeouts.frame;
        let result = match tokio::time::timeout(limit, self.await_result(ticket.id)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("Abandoning request {} after {:?}", ticket.id, limit);
                self.abandoned = Some(ticket.id);
                Err(InferenceError::Timeout(limit))
            }
        };

        if self.in_flight.map(|(id, _)| id) == Some(ticket.id) {
            self.in_flight = None;
        }
        if result == Err(InferenceError::Disconnected) {
            self.state = ChannelState::Error;
        }
        result
    }

    async fn await_result(&mut self, id: u64) -> Result<SegmentationMask, InferenceError> {
        loop {
            let response = self.responses.recv().await.ok_or(InferenceError::Disconnected)?;
            match response {
                Response::SegmentationResult {
                    id: got,
                    segmentation,
                } if got == id => return Ok(segmentation),
                Response::Error {
                    id: Some(got),
                    kind,
                    error,
                } if got == id => return Err(kind.into_error(error)),
                other => self.observe(other),
            }
        }
    }

    /// Segment one frame: submit, then wait for the matching answer.
    pub async fn process_frame(
        &mut self,
        frame: Frame,
    ) -> Result<SegmentationMask, InferenceError> {
        let ticket = self.submit(frame)?;
        self.receive(ticket).await
    }

    /// Ask the worker to exit and stop listening to it.
    ///
    /// The worker thread is detached; it exits after the request it is
    /// currently handling, if any.
    pub fn dispose(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let _ = self.requests.send(Request::Shutdown);
        self.responses.close();
        self.in_flight = None;
        self.abandoned = None;
        self.loaded_url = None;
        self.state = ChannelState::Uninitialized;
        drop(worker);
        tracing::debug!("Inference channel disposed");
    }
}

impl Drop for InferenceChannel {
    fn drop(&mut self) {
        self.dispose();
    }
}
