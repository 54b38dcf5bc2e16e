//! Inference channel lifecycle against a scripted backend

mod common;

use camola::capture::Frame;
use camola::config::InferenceTimeouts;
use camola::error::{InferenceError, LoadError};
use camola::inference::{ChannelState, InferenceChannel};
use common::{fast_timeouts, model_config, source_image, Probe, ScriptedBackend, Step};
use std::sync::atomic::Ordering;
use std::time::Duration;

fn frame() -> Frame {
    Frame::new(source_image())
}

fn spawn(probe: &Probe, timeouts: InferenceTimeouts) -> InferenceChannel {
    InferenceChannel::spawn(Box::new(ScriptedBackend::new(probe.clone())), timeouts).unwrap()
}

#[tokio::test]
async fn test_load_then_segment() {
    let probe = Probe::default();
    let mut channel = spawn(&probe, fast_timeouts());
    assert_eq!(channel.state(), ChannelState::Uninitialized);

    channel.load_model("scripted.onnx", &model_config()).await.unwrap();
    assert_eq!(channel.state(), ChannelState::ModelReady);
    assert_eq!(channel.loaded_model(), Some("scripted.onnx"));

    let mask = channel.process_frame(frame()).await.unwrap();
    assert_eq!((mask.width, mask.height), (4, 4));
    assert_eq!(mask.class_at(0, 0), Some(1));
    assert_eq!(mask.class_at(3, 3), Some(0));

    assert_eq!(channel.ledger().live(), 0);
    assert!(channel.ledger().allocated() > 0);
}

#[tokio::test]
async fn test_load_is_idempotent_per_url() {
    let probe = Probe::default();
    let mut channel = spawn(&probe, fast_timeouts());

    channel.load_model("a.onnx", &model_config()).await.unwrap();
    channel.load_model("a.onnx", &model_config()).await.unwrap();
    assert_eq!(probe.loads(), 1);

    channel.load_model("b.onnx", &model_config()).await.unwrap();
    assert_eq!(probe.loads(), 2);
    assert_eq!(channel.loaded_model(), Some("b.onnx"));
}

#[tokio::test]
async fn test_frames_rejected_before_model_ready() {
    let probe = Probe::default();
    let mut channel = spawn(&probe, fast_timeouts());
    assert_eq!(channel.process_frame(frame()).await, Err(InferenceError::NotReady));
    assert_eq!(probe.executions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_model_is_rejected_and_retryable() {
    let probe = Probe::default();
    let mut channel = spawn(&probe, fast_timeouts());

    let err = channel.load_model("missing.onnx", &model_config()).await.unwrap_err();
    match err {
        LoadError::Rejected(msg) => {
            assert!(msg.contains("Failed to load model"));
            assert!(msg.contains("missing.onnx"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(channel.state(), ChannelState::Error);
    assert_eq!(channel.process_frame(frame()).await, Err(InferenceError::NotReady));

    channel.load_model("present.onnx", &model_config()).await.unwrap();
    assert!(channel.is_model_ready());
}

#[tokio::test]
async fn test_warmup_surfaces_shape_mismatch() {
    let probe = Probe::default();
    probe.push([Step::Malformed]);
    let mut channel = spawn(&probe, fast_timeouts());

    let err = channel.load_model("scripted.onnx", &model_config()).await.unwrap_err();
    match err {
        LoadError::Rejected(msg) => assert!(msg.contains("warmup"), "{msg}"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(channel.ledger().live(), 0);
}

#[tokio::test]
async fn test_backend_initialization_failure() {
    let backend = ScriptedBackend {
        init_fails: true,
        ..ScriptedBackend::default()
    };
    let mut channel = InferenceChannel::spawn(Box::new(backend), fast_timeouts()).unwrap();

    let err = channel.load_model("scripted.onnx", &model_config()).await.unwrap_err();
    match err {
        LoadError::Rejected(msg) => assert!(msg.contains("no accelerator"), "{msg}"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(channel.state(), ChannelState::Error);
}

#[tokio::test]
async fn test_backend_readiness_is_bounded() {
    let backend = ScriptedBackend {
        init_delay: Some(Duration::from_millis(500)),
        ..ScriptedBackend::default()
    };
    let timeouts = InferenceTimeouts {
        backend_ready: Duration::from_millis(50),
        ..fast_timeouts()
    };
    let mut channel = InferenceChannel::spawn(Box::new(backend), timeouts).unwrap();

    let err = channel.load_model("scripted.onnx", &model_config()).await.unwrap_err();
    assert_eq!(err, LoadError::BackendTimeout(Duration::from_millis(50)));
}

#[tokio::test]
async fn test_tensors_released_after_failures() {
    let probe = Probe::default();
    let mut channel = spawn(&probe, fast_timeouts());
    channel.load_model("scripted.onnx", &model_config()).await.unwrap();

    probe.push([Step::Subject, Step::Malformed, Step::Fail, Step::Subject, Step::Malformed]);
    let mut outcomes = Vec::new();
    for _ in 0..6 {
        outcomes.push(channel.process_frame(frame()).await.is_ok());
        assert_eq!(channel.ledger().live(), 0);
    }
    assert_eq!(outcomes, vec![true, false, false, true, false, true]);
}

#[tokio::test]
async fn test_invalid_output_reported_as_error() {
    let probe = Probe::default();
    let mut channel = spawn(&probe, fast_timeouts());
    channel.load_model("scripted.onnx", &model_config()).await.unwrap();

    probe.push([Step::Malformed]);
    let err = channel.process_frame(frame()).await.unwrap_err();
    match &err {
        InferenceError::InvalidOutput(msg) => {
            assert!(msg.contains("unsupported output rank"), "{msg}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.to_string().matches("Invalid segmentation output").count(), 1);

    // The channel stays usable
    assert!(channel.process_frame(frame()).await.is_ok());
}

#[tokio::test]
async fn test_backend_failure_message_is_not_wrapped_twice() {
    let probe = Probe::default();
    let mut channel = spawn(&probe, fast_timeouts());
    channel.load_model("scripted.onnx", &model_config()).await.unwrap();

    probe.push([Step::Fail]);
    let err = channel.process_frame(frame()).await.unwrap_err();
    assert_eq!(err, InferenceError::Backend("Processing error: scripted failure".to_string()));
    assert_eq!(
        err.to_string(),
        "Inference backend error: Processing error: scripted failure"
    );
}

#[tokio::test]
async fn test_second_submission_while_in_flight_is_busy() {
    let probe = Probe::default();
    let mut channel = spawn(&probe, fast_timeouts());
    channel.load_model("scripted.onnx", &model_config()).await.unwrap();

    probe.push([Step::Slow(Duration::from_millis(100))]);
    let ticket = channel.submit(frame()).unwrap();
    assert_eq!(channel.submit(frame()), Err(InferenceError::Busy(ticket.id())));

    let mask = channel.receive(ticket).await.unwrap();
    assert_eq!(mask.class_at(1, 1), Some(1));
    assert!(channel.process_frame(frame()).await.is_ok());
    assert_eq!(probe.max_active(), 1);
}

#[tokio::test]
async fn test_timeout_frees_the_channel_and_discards_stale_result() {
    let probe = Probe::default();
    let timeouts = InferenceTimeouts {
        frame: Duration::from_millis(400),
        ..fast_timeouts()
    };
    let mut channel = spawn(&probe, timeouts);
    channel.load_model("scripted.onnx", &model_config()).await.unwrap();

    probe.push([Step::Slow(Duration::from_millis(600)), Step::Empty]);
    let first = channel.submit(frame()).unwrap();
    let first_id = first.id();
    assert_eq!(
        channel.receive(first).await,
        Err(InferenceError::Timeout(Duration::from_millis(400)))
    );

    // The worker still holds the first request
    assert_eq!(channel.submit(frame()), Err(InferenceError::Busy(first_id)));

    tokio::time::sleep(Duration::from_millis(400)).await;

    // The late answer to the first request must not be taken for this one
    let mask = channel.process_frame(frame()).await.unwrap();
    assert_eq!(mask.class_at(0, 0), Some(0));

    assert_eq!(probe.max_active(), 1);
    assert_eq!(channel.ledger().live(), 0);
}

#[tokio::test]
async fn test_slow_model_never_queues_more_than_one_frame() {
    let probe = Probe::default();
    let timeouts = InferenceTimeouts {
        frame: Duration::from_millis(50),
        ..fast_timeouts()
    };
    let mut channel = spawn(&probe, timeouts);
    channel.load_model("scripted.onnx", &model_config()).await.unwrap();
    let warm = probe.executions.load(Ordering::SeqCst);

    probe.push([Step::Slow(Duration::from_millis(300))]);
    let mut results = Vec::new();
    for _ in 0..10 {
        results.push(channel.process_frame(frame()).await);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(results[0], Err(InferenceError::Timeout(Duration::from_millis(50))));
    assert!(
        results[1..].iter().all(|r| matches!(r, Err(InferenceError::Busy(_)))),
        "{results:?}"
    );

    // Only the slow request ever reached the worker
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(probe.executions.load(Ordering::SeqCst), warm + 1);

    // Once its answer is drained the channel serves frames again
    assert!(channel.process_frame(frame()).await.is_ok());
    assert_eq!(probe.executions.load(Ordering::SeqCst), warm + 2);
    assert_eq!(probe.max_active(), 1);
    assert_eq!(channel.ledger().live(), 0);
}

#[tokio::test]
async fn test_dispose_stops_accepting_frames() {
    let probe = Probe::default();
    let mut channel = spawn(&probe, fast_timeouts());
    channel.load_model("scripted.onnx", &model_config()).await.unwrap();

    channel.dispose();
    assert_eq!(channel.state(), ChannelState::Uninitialized);
    assert_eq!(channel.process_frame(frame()).await, Err(InferenceError::NotReady));
    // Idempotent
    channel.dispose();
}
