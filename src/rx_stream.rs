//! Asynchronous sample stream
//!
//! Decouples the driver-draining worker from the consumer with a bounded
//! channel. The worker never waits on the consumer: when the channel is full
//! the newest block is dropped and counted, so a slow consumer loses data
//! instead of stalling USB transfers.
//!
//! ```no_run
//! use futures::StreamExt;
//! use starsdr::replay::{ReplayBackend, ReplaySource};
//! use starsdr::StarSdr;
//!
//! # async fn example() -> starsdr::Result<()> {
//! let sdr = StarSdr::new(ReplayBackend::new().with_source(ReplaySource::from_file("fm.cu8")?));
//! let device = sdr.open(0)?;
//! let mut stream = device.rx_stream(16_384, 32)?;
//! while let Some(block) = stream.next().await {
//!     let block = block?;
//!     println!("block {}: {} samples", block.sequence, block.num_samples);
//! }
//! # Ok(())
//! # }
//! ```

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::Stream;
use num_complex::Complex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::trace;

use crate::device::Device;
use crate::driver::TunerDriver;
use crate::error::{Error, Result};
use crate::stream::RxHandler;

/// Owned copy of one converted transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IqBlock {
    /// Position of the transfer in the stream, counting dropped blocks
    pub sequence: u64,
    /// Number of complex samples
    pub num_samples: usize,
    /// Interleaved I/Q, `2 * num_samples` elements centered on zero
    pub samples: Vec<i16>,
}

impl IqBlock {
    /// Samples normalized to roughly [-1.0, 1.0]
    pub fn to_complex(&self) -> Vec<Complex<f32>> {
        self.samples
            .chunks_exact(2)
            .map(|c| Complex::new(c[0] as f32 / 128.0, c[1] as f32 / 128.0))
            .collect()
    }

    /// Mean power of the normalized samples
    pub fn mean_power(&self) -> f32 {
        if self.num_samples == 0 {
            return 0.0;
        }
        let total: f32 = self.to_complex().iter().map(|c| c.norm_sqr()).sum();
        total / self.num_samples as f32
    }
}

/**
 * Stream of [`IqBlock`]s produced by a running device
 */
pub struct RxStream {
    rx: mpsc::Receiver<IqBlock>,
    dropped: Arc<AtomicU64>,
    error: Arc<Mutex<Option<Error>>>,
}

impl RxStream {
    /// Blocks discarded because the consumer fell behind
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn take_error(&self) -> Option<Error> {
        self.error.lock().ok().and_then(|mut slot| slot.take())
    }
}

impl Stream for RxStream {
    type Item = Result<IqBlock>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(block)) => Poll::Ready(Some(Ok(block))),
            Poll::Ready(None) => Poll::Ready(self.take_error().map(Err)),
            Poll::Pending => Poll::Pending,
        }
    }
}

struct ChannelHandler {
    tx: mpsc::Sender<IqBlock>,
    sequence: u64,
    dropped: Arc<AtomicU64>,
    error: Arc<Mutex<Option<Error>>>,
}

impl RxHandler for ChannelHandler {
    fn on_samples(&mut self, samples: &[i16], num_samples: usize) {
        let block = IqBlock {
            sequence: self.sequence,
            num_samples,
            samples: samples.to_vec(),
        };
        self.sequence += 1;

        match self.tx.try_send(block) {
            Ok(()) => {}
            Err(TrySendError::Full(block)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!(sequence = block.sequence, "rx stream full, block dropped");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    fn on_error(&mut self, err: &Error) {
        if let Ok(mut slot) = self.error.lock() {
            *slot = Some(Error::driver(err.to_string()));
        }
    }
}

impl<D: TunerDriver> Device<D> {
    /// Start streaming into a bounded channel of `capacity` blocks.
    ///
    /// The stream ends after [`Device::stop_rx`], or with one error item if
    /// the driver fails.
    pub fn rx_stream(&self, buffer_samples: usize, capacity: usize) -> Result<RxStream> {
        if capacity == 0 {
            return Err(Error::invalid("rx stream capacity must be non-zero"));
        }
        let (tx, rx) = mpsc::channel(capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        let error = Arc::new(Mutex::new(None));

        let handler = ChannelHandler {
            tx,
            sequence: 0,
            dropped: Arc::clone(&dropped),
            error: Arc::clone(&error),
        };
        self.start_rx(handler, buffer_samples)?;

        Ok(RxStream { rx, dropped, error })
    }
}
