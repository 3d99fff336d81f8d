//! Tuner driver abstraction
//!
//! The adapter talks to hardware only through these two traits. A
//! [`Backend`] enumerates and opens devices; the [`TunerDriver`] it returns
//! is the exclusively owned handle for one physical dongle.
//!
//! Drivers are shared between the controlling thread and the streaming
//! worker, so every method takes `&self`.
//!
//! # Cancellation contract
//!
//! [`TunerDriver::cancel_async`] must make a running
//! [`TunerDriver::read_async`] return, and must also make a `read_async`
//! that has not started yet return immediately. The pending cancellation is
//! cleared by [`TunerDriver::reset_buffer`], which the streaming engine calls
//! on the controlling thread before it spawns a worker.

use crate::error::Result;
use crate::tuner::TunerModel;

/// Enumerates and opens devices of one driver family
pub trait Backend {
    type Driver: TunerDriver;

    /// Number of devices currently attached
    fn device_count(&self) -> usize;

    /// Display name of the device at `index`
    fn device_name(&self, index: usize) -> Option<String>;

    /// Open the device at `index`
    fn open(&self, index: usize) -> Result<Self::Driver>;
}

/// Handle to one opened tuner
pub trait TunerDriver: Send + Sync + 'static {
    fn tuner_model(&self) -> TunerModel;

    /// Gain steps in tenths of a dB, queried live from the driver
    fn tuner_gains(&self) -> Result<Vec<i32>>;

    fn set_sample_rate(&self, rate: u32) -> Result<()>;
    fn sample_rate(&self) -> u32;

    fn set_center_freq(&self, freq: u32) -> Result<()>;
    fn center_freq(&self) -> u32;

    /// RTL2832U digital AGC
    fn set_agc_mode(&self, enabled: bool) -> Result<()>;

    /// `true` selects manual tuner gain, `false` lets the tuner control it
    fn set_tuner_gain_mode(&self, manual: bool) -> Result<()>;

    /// Set tuner gain in tenths of a dB
    fn set_tuner_gain(&self, gain: i32) -> Result<()>;

    /// Current tuner gain in tenths of a dB
    fn tuner_gain(&self) -> i32;

    /// Flush the transfer queue and clear any pending cancellation
    fn reset_buffer(&self) -> Result<()>;

    /// Block, delivering transfers of `transfer_len` bytes of interleaved
    /// unsigned 8-bit I/Q to `on_transfer` in order, until cancelled.
    ///
    /// Returns `Ok(())` after cancellation and `Err` when the device fails.
    fn read_async(&self, transfer_len: usize, on_transfer: &mut dyn FnMut(&[u8])) -> Result<()>;

    /// Ask a running or upcoming `read_async` to return
    fn cancel_async(&self) -> Result<()>;
}
