use ndarray::ArrayD;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts tensors allocated on the inference worker.
///
/// Every buffer the worker creates is wrapped in a [`Tensor`] registered here;
/// dropping the wrapper releases it, so `live()` returns to zero once a frame
/// has been processed, whichever way processing ended.
#[derive(Debug, Clone, Default)]
pub struct TensorLedger {
    live: Arc<AtomicUsize>,
    allocated: Arc<AtomicU64>,
}

impl TensorLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, array: ArrayD<f32>) -> Tensor {
        self.live.fetch_add(1, Ordering::SeqCst);
        self.allocated.fetch_add(1, Ordering::Relaxed);
        Tensor {
            array,
            ledger: self.clone(),
        }
    }

    /// Tensors currently held.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Tensors ever allocated.
    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }
}

/// An f32 tensor owned by the inference worker, released on drop.
#[derive(Debug)]
pub struct Tensor {
    array: ArrayD<f32>,
    ledger: TensorLedger,
}

impl Tensor {
    pub fn array(&self) -> &ArrayD<f32> {
        &self.array
    }
}

impl Deref for Tensor {
    type Target = ArrayD<f32>;

    fn deref(&self) -> &Self::Target {
        &self.array
    }
}

impl Drop for Tensor {
    fn drop(&mut self) {
        self.ledger.live.fetch_sub(1, Ordering::SeqCst);
    }
}
