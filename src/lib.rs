#![doc = include_str!("../readme.md")]

pub mod device;
pub mod driver;
pub mod error;
pub mod gain;
pub mod replay;
#[cfg(feature = "rtlsdr")]
pub mod rtlsdr;
pub mod rx_stream;
pub mod stream;
pub mod tuner;

pub use device::{Capability, Device};
pub use driver::{Backend, TunerDriver};
pub use error::{Error, Result};
pub use gain::{Gain, GainMode, GainTable};
pub use rx_stream::{IqBlock, RxStream};
pub use stream::{RxHandler, StreamState, StreamStats, DEFAULT_TRANSFER_LEN};
pub use tuner::{TunerModel, TuningRange};

/// Canonical sample rates of RTL2832U dongles, in Hz
pub const SAMPLE_RATES: &[u32] = &[
    1_024_000, 1_800_000, 1_920_000, 2_048_000, 2_400_000, 2_600_000, 2_800_000, 3_000_000,
    3_200_000,
];

/// Sample rate applied when a device is opened
pub const DEFAULT_SAMPLE_RATE: u32 = 2_048_000;

/// Resolution of each I and Q component before conversion to 16-bit storage
pub const SAMPLE_BIT_SIZE: u32 = 8;

/**
 * Receiver configuration
 */
#[derive(Debug, Clone, PartialEq)]
pub struct RxConfig {
    /// Device index among attached devices
    pub device_index: usize,
    /// Center frequency in Hz
    pub center_freq: u64,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Tuner gain (Auto or Manual in dB)
    pub gain: Gain,
    /// Transfer size in complex samples, multiple of 256 (0 for the default)
    pub buffer_samples: usize,
}

impl RxConfig {
    pub fn new(device_index: usize, center_freq: u64, sample_rate: u32, gain: Gain) -> Self {
        Self {
            device_index,
            center_freq,
            sample_rate,
            gain,
            buffer_samples: 0,
        }
    }
}

impl Default for RxConfig {
    fn default() -> Self {
        Self::new(0, 100_000_000, DEFAULT_SAMPLE_RATE, Gain::Auto)
    }
}

/**
 * Library entry point bound to one driver backend
 */
pub struct StarSdr<B: Backend> {
    backend: B,
}

impl<B: Backend> StarSdr<B> {
    /// Initialize the library on top of `backend`
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn device_count(&self) -> usize {
        self.backend.device_count()
    }

    /// Display name of the device at `index`
    pub fn device_name(&self, index: usize) -> Option<String> {
        self.backend.device_name(index)
    }

    pub fn open(&self, index: usize) -> Result<Device<B::Driver>> {
        Device::open(&self.backend, index)
    }

    /// Open `config.device_index` and apply the rest of `config`
    pub fn open_with_config(&self, config: &RxConfig) -> Result<Device<B::Driver>> {
        let mut device = self.open(config.device_index)?;
        device.configure(config)?;
        Ok(device)
    }
}

#[cfg(feature = "rtlsdr")]
impl StarSdr<rtlsdr::RtlSdrBackend> {
    /// Initialize the library on attached RTL-SDR hardware
    pub fn rtlsdr() -> Self {
        Self::new(rtlsdr::RtlSdrBackend)
    }
}
