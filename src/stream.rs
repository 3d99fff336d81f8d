//! Streaming engine
//!
//! One worker thread per streaming device drains raw USB transfers from the
//! driver, converts the unsigned 8-bit I/Q bytes to signed 16-bit samples and
//! hands them to an [`RxHandler`] on that same thread.
//!
//! ```text
//!          start()                     stop()
//!   Idle ──────────► Starting ──► Running ──────► Stopping ──► Idle
//!                       │                            (cancel + join)
//!                       └── spawn failed ──► Idle
//! ```
//!
//! Transitions out of `Idle` and `Running` are compare-and-set, so two
//! concurrent starts on one device can never leave two workers behind.

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, trace, warn};

use crate::driver::TunerDriver;
use crate::error::{Error, Result};

/// Transfer size used when no buffer size is requested (multiple of 512)
pub const DEFAULT_TRANSFER_LEN: usize = 128 * 512;

/// Requested buffer sizes must be a multiple of this many complex samples
pub const BUFFER_GRANULARITY: usize = 256;

/// Unsigned 8-bit samples are centered on this value
pub const DC_OFFSET: i16 = 127;

/// Receive callback, invoked on the worker thread.
///
/// Any `FnMut(&[i16], usize)` closure is a handler; state it captures plays
/// the role of a callback context.
pub trait RxHandler: Send + 'static {
    /// Called once per transfer with interleaved I/Q samples and the number
    /// of complex samples. The slice is only valid for the duration of the
    /// call.
    fn on_samples(&mut self, samples: &[i16], num_samples: usize);

    /// Called once if the driver fails and the stream ends without `stop`
    fn on_error(&mut self, _err: &Error) {}
}

impl<F> RxHandler for F
where
    F: FnMut(&[i16], usize) + Send + 'static,
{
    fn on_samples(&mut self, samples: &[i16], num_samples: usize) {
        self(samples, num_samples)
    }
}

/// Streaming state of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamState {
    Idle = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl StreamState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => StreamState::Starting,
            2 => StreamState::Running,
            3 => StreamState::Stopping,
            _ => StreamState::Idle,
        }
    }
}

/// Counters accumulated over the lifetime of a device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Transfers received from the driver
    pub transfers: u64,
    /// Complex samples delivered to the handler
    pub samples: u64,
    /// Transfers skipped because the sample buffer could not be allocated
    pub dropped: u64,
    /// Sample buffer (re)allocations
    pub reallocations: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    transfers: AtomicU64,
    samples: AtomicU64,
    dropped: AtomicU64,
    reallocations: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn snapshot(&self) -> StreamStats {
        StreamStats {
            transfers: self.transfers.load(Ordering::Relaxed),
            samples: self.samples.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            reallocations: self.reallocations.load(Ordering::Relaxed),
        }
    }
}

/// Raw transfer size in bytes for a requested buffer of complex samples.
///
/// Each complex sample is two bytes on the wire; zero selects
/// [`DEFAULT_TRANSFER_LEN`]. Sizes that are not a multiple of
/// [`BUFFER_GRANULARITY`] or whose byte length overflows are rejected.
pub fn transfer_len_for(buffer_samples: usize) -> Result<usize> {
    if buffer_samples % BUFFER_GRANULARITY != 0 {
        return Err(Error::InvalidBufferSize(buffer_samples));
    }
    if buffer_samples == 0 {
        return Ok(DEFAULT_TRANSFER_LEN);
    }
    buffer_samples
        .checked_mul(2)
        .ok_or(Error::InvalidBufferSize(buffer_samples))
}

/// Converted samples of the latest transfer.
///
/// Holds `2 * num_samples` interleaved elements and is only replaced when the
/// complex-sample count of a transfer changes.
#[derive(Debug, Default)]
pub(crate) struct SampleBuffer {
    data: Vec<i16>,
    num_samples: usize,
    allocated: bool,
    #[cfg(test)]
    fail_alloc: bool,
}

impl SampleBuffer {
    /// Convert one raw transfer, or `None` if the buffer could not be
    /// allocated. A failed allocation is retried on the next transfer.
    pub(crate) fn convert(&mut self, raw: &[u8], stats: &StatsCounters) -> Option<&[i16]> {
        let num_samples = raw.len() / 2;
        let len = num_samples * 2;

        if num_samples != self.num_samples || !self.allocated {
            self.data = Vec::new();
            self.num_samples = num_samples;
            self.allocated = self.allocate(len);
            if !self.allocated {
                return None;
            }
            stats.reallocations.fetch_add(1, Ordering::Relaxed);
            trace!(num_samples, "sample buffer reallocated");
        }

        self.data.clear();
        self.data.extend(raw[..len].iter().map(|&b| b as i16 - DC_OFFSET));
        Some(&self.data)
    }

    fn allocate(&mut self, len: usize) -> bool {
        #[cfg(test)]
        {
            if std::mem::take(&mut self.fail_alloc) {
                return false;
            }
        }
        self.data.try_reserve_exact(len).is_ok()
    }

    #[cfg(test)]
    fn as_ptr(&self) -> *const i16 {
        self.data.as_ptr()
    }
}

/// Worker thread ownership and the Idle/Starting/Running/Stopping machine
pub(crate) struct StreamEngine<D: TunerDriver> {
    driver: Arc<D>,
    state: AtomicU8,
    transfer_len: AtomicUsize,
    worker: Mutex<Option<JoinHandle<SampleBuffer>>>,
    // Parked between sessions; the worker owns it while running
    buffer: Mutex<Option<SampleBuffer>>,
    stats: Arc<StatsCounters>,
}

impl<D: TunerDriver> StreamEngine<D> {
    pub(crate) fn new(driver: Arc<D>) -> Self {
        Self {
            driver,
            state: AtomicU8::new(StreamState::Idle as u8),
            transfer_len: AtomicUsize::new(0),
            worker: Mutex::new(None),
            buffer: Mutex::new(None),
            stats: Arc::new(StatsCounters::default()),
        }
    }

    pub(crate) fn state(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Transfer size of the current or most recent session, 0 before the first
    pub(crate) fn transfer_len(&self) -> usize {
        self.transfer_len.load(Ordering::Acquire)
    }

    pub(crate) fn stats(&self) -> StreamStats {
        self.stats.snapshot()
    }

    pub(crate) fn start<H: RxHandler>(&self, handler: H, buffer_samples: usize) -> Result<()> {
        let transfer_len = transfer_len_for(buffer_samples)?;

        self.transition(StreamState::Idle, StreamState::Starting)
            .map_err(|current| match current {
                StreamState::Running => Error::AlreadyStreaming,
                _ => Error::StreamBusy,
            })?;

        match self.spawn_worker(handler, transfer_len) {
            Ok(()) => {
                self.state.store(StreamState::Running as u8, Ordering::Release);
                Ok(())
            }
            Err(e) => {
                self.state.store(StreamState::Idle as u8, Ordering::Release);
                Err(e)
            }
        }
    }

    fn spawn_worker<H: RxHandler>(&self, mut handler: H, transfer_len: usize) -> Result<()> {
        let mut worker = self.worker.lock().map_err(|_| Error::poisoned("worker"))?;
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| Error::poisoned("sample buffer"))?
            .take()
            .unwrap_or_default();

        self.driver.reset_buffer()?;
        self.transfer_len.store(transfer_len, Ordering::Release);

        let driver = Arc::clone(&self.driver);
        let stats = Arc::clone(&self.stats);
        let handle = thread::Builder::new()
            .name("starsdr-rx".to_string())
            .spawn(move || {
                run_worker(&*driver, transfer_len, &mut handler, &mut buffer, &stats);
                buffer
            })
            .map_err(|e| Error::Thread(format!("failed to spawn rx worker: {e}")))?;

        debug!(transfer_len, "rx worker spawned");
        *worker = Some(handle);
        Ok(())
    }

    /// Cancel the driver read loop and join the worker. A no-op when idle.
    ///
    /// Fails without touching the stream when called from the worker itself,
    /// since the worker cannot join itself.
    pub(crate) fn stop(&self) -> Result<()> {
        if self.on_worker_thread()? {
            return Err(Error::Thread("stop called from the rx worker thread".to_string()));
        }

        match self.transition(StreamState::Running, StreamState::Stopping) {
            Ok(()) => {}
            Err(StreamState::Idle) => return Ok(()),
            Err(_) => return Err(Error::StreamBusy),
        }

        if let Err(e) = self.driver.cancel_async() {
            self.state.store(StreamState::Running as u8, Ordering::Release);
            return Err(e);
        }

        let joined = self.join_worker();
        self.state.store(StreamState::Idle as u8, Ordering::Release);
        debug!("rx worker stopped");
        joined
    }

    fn join_worker(&self) -> Result<()> {
        let handle = self
            .worker
            .lock()
            .map_err(|_| Error::poisoned("worker"))?
            .take();
        let Some(handle) = handle else {
            return Ok(());
        };

        match handle.join() {
            Ok(buffer) => {
                *self
                    .buffer
                    .lock()
                    .map_err(|_| Error::poisoned("sample buffer"))? = Some(buffer);
                Ok(())
            }
            Err(_) => {
                warn!("rx worker panicked");
                Err(Error::Thread("rx worker panicked".to_string()))
            }
        }
    }

    fn on_worker_thread(&self) -> Result<bool> {
        let worker = self.worker.lock().map_err(|_| Error::poisoned("worker"))?;
        Ok(worker
            .as_ref()
            .is_some_and(|handle| handle.thread().id() == thread::current().id()))
    }

    fn transition(
        &self,
        from: StreamState,
        to: StreamState,
    ) -> std::result::Result<(), StreamState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(StreamState::from_u8)
    }
}

impl<D: TunerDriver> Drop for StreamEngine<D> {
    fn drop(&mut self) {
        // Dropped from inside the callback: the worker cannot be joined, but
        // its read loop must still end once the callback returns
        if matches!(self.on_worker_thread(), Ok(true)) {
            let _ = self.driver.cancel_async();
            return;
        }
        if let Err(e) = self.stop() {
            warn!(error = %e, "failed to stop rx worker on drop");
        }
    }
}

fn run_worker<D: TunerDriver, H: RxHandler>(
    driver: &D,
    transfer_len: usize,
    handler: &mut H,
    buffer: &mut SampleBuffer,
    stats: &StatsCounters,
) {
    let result = driver.read_async(transfer_len, &mut |raw: &[u8]| {
        stats.transfers.fetch_add(1, Ordering::Relaxed);
        match buffer.convert(raw, stats) {
            Some(samples) => {
                let num_samples = samples.len() / 2;
                stats.samples.fetch_add(num_samples as u64, Ordering::Relaxed);
                handler.on_samples(samples, num_samples);
            }
            None => {
                stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(len = raw.len(), "sample buffer allocation failed, transfer dropped");
            }
        }
    });

    if let Err(e) = result {
        warn!(error = %e, "rx stream ended by driver error");
        handler.on_error(&e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_len_for() {
        assert_eq!(transfer_len_for(0).unwrap(), 65_536);
        assert_eq!(transfer_len_for(512).unwrap(), 1024);
        assert_eq!(transfer_len_for(256).unwrap(), 512);
        assert_eq!(DEFAULT_TRANSFER_LEN % 512, 0);
        assert!(matches!(
            transfer_len_for(300),
            Err(Error::InvalidBufferSize(300))
        ));
    }

    #[test]
    fn test_transfer_len_overflow_rejected() {
        let huge = usize::MAX & !(BUFFER_GRANULARITY - 1);
        assert!(matches!(
            transfer_len_for(huge),
            Err(Error::InvalidBufferSize(n)) if n == huge
        ));
    }

    #[test]
    fn test_convert_subtracts_dc_offset() {
        let stats = StatsCounters::default();
        let mut buffer = SampleBuffer::default();
        let raw: Vec<u8> = (0..=255).collect();

        let out = buffer.convert(&raw, &stats).unwrap();
        assert_eq!(out.len(), 256);
        for (i, &s) in out.iter().enumerate() {
            assert_eq!(s, i as i16 - 127);
        }
        assert_eq!(out[0], -127);
        assert_eq!(out[127], 0);
        assert_eq!(out[255], 128);
    }

    #[test]
    fn test_convert_ignores_trailing_odd_byte() {
        let stats = StatsCounters::default();
        let mut buffer = SampleBuffer::default();
        let out = buffer.convert(&[127, 128, 129], &stats).unwrap();
        assert_eq!(out, &[0, 1]);
    }

    #[test]
    fn test_same_size_transfers_reuse_buffer() {
        let stats = StatsCounters::default();
        let mut buffer = SampleBuffer::default();

        buffer.convert(&[10u8; 1024], &stats).unwrap();
        let first = buffer.as_ptr();
        buffer.convert(&[20u8; 1024], &stats).unwrap();
        assert_eq!(buffer.as_ptr(), first);
        assert_eq!(stats.snapshot().reallocations, 1);

        buffer.convert(&[30u8; 2048], &stats).unwrap();
        assert_eq!(stats.snapshot().reallocations, 2);
        assert_eq!(buffer.data.len(), 2048);
        assert_eq!(buffer.num_samples, 1024);
    }

    #[test]
    fn test_failed_allocation_skips_and_retries() {
        let stats = StatsCounters::default();
        let mut buffer = SampleBuffer {
            fail_alloc: true,
            ..Default::default()
        };

        assert!(buffer.convert(&[127u8; 512], &stats).is_none());
        assert_eq!(stats.snapshot().reallocations, 0);

        let out = buffer.convert(&[127u8; 512], &stats).unwrap();
        assert_eq!(out.len(), 512);
        assert!(out.iter().all(|&s| s == 0));
        assert_eq!(stats.snapshot().reallocations, 1);
    }

    #[test]
    fn test_state_from_u8() {
        assert_eq!(StreamState::from_u8(0), StreamState::Idle);
        assert_eq!(StreamState::from_u8(2), StreamState::Running);
        assert_eq!(StreamState::from_u8(3), StreamState::Stopping);
    }

    #[test]
    fn test_closure_is_handler() {
        let mut seen = Vec::new();
        let mut handler = move |samples: &[i16], n: usize| {
            seen.push((samples.len(), n));
            assert_eq!(seen.len(), 1);
        };
        handler.on_samples(&[0, 0, 0, 0], 2);
        handler.on_error(&Error::driver("usb transfer failed"));
    }
}
