//! The offloaded side of the inference boundary.
//!
//! Runs on its own OS thread, owns the backend and the loaded model, and
//! handles requests strictly one at a time.

use super::protocol::{ErrorKind, Request, Response, WorkerStatus};
use crate::config::ModelConfig;
use crate::error::InferenceError;
use crate::segmentation::{
    postprocess, InferenceBackend, Preprocessor, SegmentationMask, SegmentationModel, TensorLedger,
};
use anyhow::{anyhow, Context, Result};
use image::RgbaImage;
use std::thread::JoinHandle;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

struct LoadedModel {
    model: Box<dyn SegmentationModel>,
    config: ModelConfig,
    preprocessor: Preprocessor,
}

struct Worker {
    backend: Box<dyn InferenceBackend>,
    model: Option<LoadedModel>,
    ledger: TensorLedger,
    responses: UnboundedSender<Response>,
}

pub(crate) fn spawn(
    backend: Box<dyn InferenceBackend>,
    ledger: TensorLedger,
    requests: UnboundedReceiver<Request>,
    responses: UnboundedSender<Response>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("inference-worker".to_string())
        .spawn(move || {
            let worker = Worker {
                backend,
                model: None,
                ledger,
                responses,
            };
            worker.run(requests);
        })
}

impl Worker {
    fn run(mut self, mut requests: UnboundedReceiver<Request>) {
        let initialized = match self.backend.initialize() {
            Ok(()) => self.send(Response::Status {
                id: None,
                status: WorkerStatus::BackendInitialized,
            }),
            Err(e) => self.send(Response::Error {
                id: None,
                kind: ErrorKind::Backend,
                error: format!("Failed to initialize inference backend: {e:#}"),
            }),
        };
        if !initialized {
            return;
        }

        while let Some(request) = requests.blocking_recv() {
            let delivered = match request {
                Request::LoadModel {
                    id,
                    model_url,
                    model_config,
                } => self.load(id, &model_url, model_config),
                Request::ProcessFrame {
                    id,
                    image_buffer,
                    width,
                    height,
                } => self.process(id, image_buffer, width, height),
                Request::Shutdown => break,
            };
            if !delivered {
                break;
            }
        }

        tracing::debug!("Inference worker exiting");
    }

    /// Returns false once nobody is listening any more.
    fn send(&self, response: Response) -> bool {
        self.responses.send(response).is_ok()
    }

    fn load(&mut self, id: u64, model_url: &str, config: ModelConfig) -> bool {
        if !self.send(Response::Status {
            id: Some(id),
            status: WorkerStatus::LoadingModel,
        }) {
            return false;
        }

        self.model = None;
        match self.load_and_warm_up(model_url, config) {
            Ok(loaded) => {
                tracing::info!("Model {} loaded and warmed up", model_url);
                self.model = Some(loaded);
                self.send(Response::Status {
                    id: Some(id),
                    status: WorkerStatus::ModelLoaded,
                })
            }
            Err(e) => self.send(Response::Error {
                id: Some(id),
                kind: ErrorKind::Backend,
                error: format!("Failed to load model: {e:#}"),
            }),
        }
    }

    fn load_and_warm_up(&mut self, model_url: &str, config: ModelConfig) -> Result<LoadedModel> {
        if model_url.is_empty() {
            return Err(anyhow!("modelUrl cannot be empty"));
        }

        let mut model = self.backend.load(model_url, &config)?;
        let preprocessor = Preprocessor::new(&config);

        // Surface shape mismatches before live frames arrive
        let _span = tracing::debug_span!("warm_up").entered();
        let input = preprocessor.zeros(&self.ledger);
        let output = self
            .ledger
            .track(model.execute(&input).context("Model warmup failed")?);
        postprocess(&output, &config, &self.ledger).context("Model warmup failed")?;
        model.reset_state();

        Ok(LoadedModel {
            model,
            config,
            preprocessor,
        })
    }

    fn process(&mut self, id: u64, image_buffer: Vec<u8>, width: u32, height: u32) -> bool {
        let response = match self.segment(image_buffer, width, height) {
            Ok(segmentation) => Response::SegmentationResult { id, segmentation },
            Err(e) => {
                let (kind, error) = ErrorKind::split(e);
                Response::Error {
                    id: Some(id),
                    kind,
                    error,
                }
            }
        };
        self.send(response)
    }

    /// Every tensor created here is released before this returns.
    fn segment(
        &mut self,
        image_buffer: Vec<u8>,
        width: u32,
        height: u32,
    ) -> Result<SegmentationMask, InferenceError> {
        let _span = tracing::debug_span!("segment").entered();

        let loaded = self.model.as_mut().ok_or(InferenceError::NotReady)?;
        let image = RgbaImage::from_raw(width, height, image_buffer).ok_or_else(|| {
            let message = format!("image buffer does not hold {width}x{height} RGBA pixels");
            InferenceError::Backend(message)
        })?;

        let input = loaded.preprocessor.preprocess(&image, &self.ledger);
        let output = {
            let _span = tracing::debug_span!("inference").entered();
            let raw = loaded
                .model
                .execute(&input)
                .map_err(|e| InferenceError::Backend(format!("Processing error: {e:#}")))?;
            self.ledger.track(raw)
        };
        drop(input);

        postprocess(&output, &loaded.config, &self.ledger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use tokio::sync::mpsc;

    struct NoRuntime;

    impl InferenceBackend for NoRuntime {
        fn initialize(&mut self) -> Result<()> {
            bail!("environment creation failed")
        }

        fn load(&mut self, _: &str, _: &ModelConfig) -> Result<Box<dyn SegmentationModel>> {
            bail!("not initialized")
        }
    }

    #[test]
    fn test_failed_initialization_is_reported_instead_of_ready() {
        let (requests, worker_requests) = mpsc::unbounded_channel();
        let (worker_responses, mut responses) = mpsc::unbounded_channel();
        let handle = spawn(
            Box::new(NoRuntime),
            TensorLedger::new(),
            worker_requests,
            worker_responses,
        )
        .unwrap();

        match responses.blocking_recv() {
            Some(Response::Error { id: None, error, .. }) => {
                assert!(error.contains("environment creation failed"), "{error}");
            }
            other => panic!("unexpected response: {other:?}"),
        }
        // The worker exits without announcing a ready backend
        assert_eq!(responses.blocking_recv(), None);
        handle.join().unwrap();
        drop(requests);
    }
}
