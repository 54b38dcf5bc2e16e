//! Messages exchanged with the inference worker.
//!
//! Requests that expect an answer carry an `id`; the worker echoes it so late
//! answers to abandoned requests can be recognised and dropped.

use crate::config::ModelConfig;
use crate::error::InferenceError;
use crate::segmentation::SegmentationMask;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum Request {
    LoadModel {
        id: u64,
        model_url: String,
        model_config: ModelConfig,
    },
    ProcessFrame {
        id: u64,
        /// RGBA bytes, moved into the message.
        image_buffer: Vec<u8>,
        width: u32,
        height: u32,
    },
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    #[serde(rename = "TF_INITIALIZED")]
    BackendInitialized,
    LoadingModel,
    ModelLoaded,
}

/// Class of failure carried by an `ERROR` response. Missing on the wire means
/// a backend failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    #[default]
    Backend,
    InvalidOutput,
    NotReady,
}

impl ErrorKind {
    /// Split a frame failure into its kind and bare message.
    pub fn split(error: InferenceError) -> (Self, String) {
        match error {
            InferenceError::Backend(message) => (ErrorKind::Backend, message),
            InferenceError::InvalidOutput(message) => (ErrorKind::InvalidOutput, message),
            InferenceError::NotReady => (ErrorKind::NotReady, error.to_string()),
            other => (ErrorKind::Backend, other.to_string()),
        }
    }

    pub fn into_error(self, message: String) -> InferenceError {
        match self {
            ErrorKind::Backend => InferenceError::Backend(message),
            ErrorKind::InvalidOutput => InferenceError::InvalidOutput(message),
            ErrorKind::NotReady => InferenceError::NotReady,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Response {
    Status {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        status: WorkerStatus,
    },
    SegmentationResult {
        id: u64,
        segmentation: SegmentationMask,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        #[serde(default)]
        kind: ErrorKind,
        error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_tags() {
        let request = Request::LoadModel {
            id: 1,
            model_url: "model.onnx".to_string(),
            model_config: ModelConfig::default(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["type"], "LOAD_MODEL");
        assert_eq!(value["modelUrl"], "model.onnx");
        assert_eq!(value["modelConfig"]["inputFormat"], "NCHW");
        assert_eq!(value["modelConfig"]["inputShape"], json!([256, 256]));

        let frame = Request::ProcessFrame {
            id: 2,
            image_buffer: vec![1, 2, 3, 4],
            width: 1,
            height: 1,
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "PROCESS_FRAME");
        assert_eq!(value["imageBuffer"], json!([1, 2, 3, 4]));
    }

    #[test]
    fn test_response_wire_tags() {
        let status = Response::Status {
            id: None,
            status: WorkerStatus::BackendInitialized,
        };
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            json!({"type": "STATUS", "status": "TF_INITIALIZED"})
        );

        let result = Response::SegmentationResult {
            id: 3,
            segmentation: SegmentationMask::flat(2, 1, vec![0, 1]),
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["type"], "SEGMENTATION_RESULT");
        assert_eq!(value["segmentation"]["shape"], "flat");
        assert_eq!(value["segmentation"]["data"], json!([0, 1]));
        assert_eq!(value["segmentation"]["width"], 2);
    }

    #[test]
    fn test_nested_mask_round_trips() {
        let json = json!({
            "type": "SEGMENTATION_RESULT",
            "id": 9,
            "segmentation": {"width": 2, "height": 2, "shape": "nested", "data": [[0, 1], [1, 1]]}
        });
        let response: Response = serde_json::from_value(json).unwrap();
        match response {
            Response::SegmentationResult { id, segmentation } => {
                assert_eq!(id, 9);
                let expected = SegmentationMask::nested(2, vec![vec![0, 1], vec![1, 1]]);
                assert_eq!(segmentation, expected);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn test_error_kind_keeps_the_variant() {
        let failure = InferenceError::InvalidOutput("unsupported output rank 2".to_string());
        let (kind, error) = ErrorKind::split(failure.clone());
        assert_eq!(error, "unsupported output rank 2");

        let response = Response::Error {
            id: Some(4),
            kind,
            error,
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["kind"], "INVALID_OUTPUT");

        match serde_json::from_value::<Response>(value).unwrap() {
            Response::Error { kind, error, .. } => assert_eq!(kind.into_error(error), failure),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn test_error_without_kind_is_a_backend_failure() {
        let json = json!({"type": "ERROR", "id": 5, "error": "Processing error: boom"});
        match serde_json::from_value::<Response>(json).unwrap() {
            Response::Error { kind, error, .. } => {
                let failure = kind.into_error(error);
                assert_eq!(failure.to_string(), "Inference backend error: Processing error: boom");
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }
}
