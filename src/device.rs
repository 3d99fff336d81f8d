//! Device handle
//!
//! A [`Device`] exclusively owns one opened tuner driver together with the
//! gain table and tuning envelope captured at open time, and the streaming
//! engine that feeds sample callbacks.

use std::sync::Arc;

use tracing::debug;

use crate::driver::{Backend, TunerDriver};
use crate::error::{Error, Result};
use crate::gain::{tenths_to_db, Gain, GainMode, GainTable};
use crate::stream::{RxHandler, StreamEngine, StreamState, StreamStats};
use crate::tuner::{TunerModel, TuningRange};
use crate::{RxConfig, DEFAULT_SAMPLE_RATE, SAMPLE_BIT_SIZE, SAMPLE_RATES};

/// Feature flags reported by [`Device::capability`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Rx,
    Tx,
    Agc,
    /// Identifier this adapter does not know about
    Other(i32),
}

impl From<i32> for Capability {
    fn from(raw: i32) -> Self {
        match raw {
            0 => Capability::Rx,
            1 => Capability::Tx,
            2 => Capability::Agc,
            other => Capability::Other(other),
        }
    }
}

/// An opened receiver
pub struct Device<D: TunerDriver> {
    index: usize,
    tuner: TunerModel,
    gains: GainTable,
    tuning_range: TuningRange,
    gain_mode: GainMode,
    // Dropped before `driver` so the worker is joined first
    engine: StreamEngine<D>,
    driver: Arc<D>,
}

impl<D: TunerDriver> Device<D> {
    /// Open the device at `index` on `backend`.
    ///
    /// Fails if the driver cannot open the device or reports no gain steps.
    /// The sample rate is set to 2.048 MS/s.
    pub fn open<B>(backend: &B, index: usize) -> Result<Self>
    where
        B: Backend<Driver = D>,
    {
        let driver = backend.open(index)?;
        Self::from_driver(driver, index)
    }

    /// Wrap an already opened driver
    pub fn from_driver(driver: D, index: usize) -> Result<Self> {
        let tuner = driver.tuner_model();
        let gains = GainTable::new(driver.tuner_gains()?)?;
        driver.set_sample_rate(DEFAULT_SAMPLE_RATE)?;
        let tuning_range = tuner.tuning_range();

        debug!(
            index,
            %tuner,
            gain_steps = gains.len(),
            min_freq = tuning_range.min,
            max_freq = tuning_range.max,
            "device opened"
        );

        let driver = Arc::new(driver);
        Ok(Self {
            index,
            tuner,
            gains,
            tuning_range,
            gain_mode: GainMode::Auto,
            engine: StreamEngine::new(Arc::clone(&driver)),
            driver,
        })
    }

    /// Stop streaming if needed and release the driver
    pub fn close(self) -> Result<()> {
        let result = self.engine.stop();
        debug!(index = self.index, "device closed");
        result
    }

    /// Apply sample rate, center frequency and gain from `config`
    pub fn configure(&mut self, config: &RxConfig) -> Result<()> {
        self.set_sample_rate(config.sample_rate)?;
        self.set_center_freq(config.center_freq)?;
        match config.gain {
            Gain::Auto => self.set_gain_mode(GainMode::Auto),
            Gain::Manual(db) => {
                self.set_gain_mode(GainMode::Manual)?;
                self.set_gain(db).map(|_| ())
            }
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// The underlying driver handle
    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn tuner(&self) -> TunerModel {
        self.tuner
    }

    pub fn set_sample_rate(&mut self, rate: u32) -> Result<()> {
        self.driver.set_sample_rate(rate)
    }

    pub fn sample_rate(&self) -> u32 {
        self.driver.sample_rate()
    }

    /// Canonical sample rates, in Hz. Not queried from the hardware.
    pub fn sample_rates(&self) -> &'static [u32] {
        SAMPLE_RATES
    }

    /// Tune to `freq` Hz. The tuning envelope is not enforced.
    pub fn set_center_freq(&mut self, freq: u64) -> Result<()> {
        let freq = u32::try_from(freq)
            .map_err(|_| Error::invalid(format!("frequency {freq} Hz out of driver range")))?;
        self.driver.set_center_freq(freq)
    }

    pub fn center_freq(&self) -> u64 {
        u64::from(self.driver.center_freq())
    }

    /// Hard frequency range of the tuner, `(0, 0)` when unknown
    pub fn tuning_range(&self) -> TuningRange {
        self.tuning_range
    }

    /// Switch between tuner AGC and manual gain.
    ///
    /// The RTL2832U digital AGC is off in both modes and is disabled first,
    /// so a failing tuner switch leaves the driver in the previous mode and
    /// [`Device::gain_mode`] unchanged.
    pub fn set_gain_mode(&mut self, mode: GainMode) -> Result<()> {
        self.driver.set_agc_mode(false)?;
        self.driver.set_tuner_gain_mode(mode == GainMode::Manual)?;
        self.gain_mode = mode;
        Ok(())
    }

    /// Set the gain mode from a raw identifier (0 auto, 1 manual).
    ///
    /// Unknown identifiers fail before anything reaches the driver.
    pub fn set_gain_mode_raw(&mut self, raw: i32) -> Result<()> {
        let mode = GainMode::try_from(raw)?;
        self.set_gain_mode(mode)
    }

    pub fn gain_mode(&self) -> GainMode {
        self.gain_mode
    }

    /// Lowest and highest gain step, in dB
    pub fn gain_range(&self) -> (f32, f32) {
        self.gains.range_db()
    }

    /// Gain steps captured at open time, in dB
    pub fn gains(&self) -> Vec<f32> {
        self.gains.to_db()
    }

    pub fn gain_table(&self) -> &GainTable {
        &self.gains
    }

    /// Gain steps as currently reported by the driver, in dB
    pub fn tuner_gains(&self) -> Result<Vec<f32>> {
        Ok(self
            .driver
            .tuner_gains()?
            .into_iter()
            .map(tenths_to_db)
            .collect())
    }

    /// Select the highest gain step at or below `gain_db` (or the lowest
    /// step) and apply it. Returns the step in tenths of a dB.
    pub fn set_gain(&mut self, gain_db: f32) -> Result<i32> {
        let step = self.gains.select(gain_db);
        self.driver.set_tuner_gain(step)?;
        debug!(requested = gain_db, step, "tuner gain set");
        Ok(step)
    }

    /// Current tuner gain, in dB
    pub fn tuner_gain(&self) -> f32 {
        tenths_to_db(self.driver.tuner_gain())
    }

    /// `Some(supported)` for known capabilities, `None` otherwise
    pub fn capability(&self, cap: impl Into<Capability>) -> Option<bool> {
        match cap.into() {
            Capability::Rx => Some(true),
            Capability::Tx => Some(false),
            Capability::Agc => Some(true),
            Capability::Other(_) => None,
        }
    }

    /// Bits per I or Q component delivered by the hardware
    pub fn sample_bit_size(&self) -> u32 {
        SAMPLE_BIT_SIZE
    }

    /// Start streaming to `handler`.
    ///
    /// `buffer_samples` sets the USB transfer size in complex samples and
    /// must be a multiple of 256; zero selects the default transfer size.
    pub fn start_rx<H: RxHandler>(&self, handler: H, buffer_samples: usize) -> Result<()> {
        self.engine.start(handler, buffer_samples)
    }

    /// Stop streaming and wait for the worker thread to exit
    pub fn stop_rx(&self) -> Result<()> {
        self.engine.stop()
    }

    pub fn stream_state(&self) -> StreamState {
        self.engine.state()
    }

    pub fn is_streaming(&self) -> bool {
        self.engine.state() == StreamState::Running
    }

    /// Raw transfer size in bytes used by the current or last stream
    pub fn transfer_len(&self) -> usize {
        self.engine.transfer_len()
    }

    pub fn stream_stats(&self) -> StreamStats {
        self.engine.stats()
    }

    pub fn set_tx_sample_rate(&mut self, _rate: u64) -> Result<()> {
        Err(Error::Unsupported("transmit"))
    }

    pub fn tx_sample_rate(&self) -> u64 {
        0
    }

    pub fn set_tx_frequency(&mut self, _freq: u64) -> Result<()> {
        Err(Error::Unsupported("transmit"))
    }

    pub fn tx_frequency(&self) -> u64 {
        0
    }

    pub fn tx_gain_range(&self) -> Option<(f32, f32)> {
        None
    }

    pub fn set_tx_gain(&mut self, _gain_db: f32) -> Result<()> {
        Err(Error::Unsupported("transmit"))
    }

    pub fn start_tx(&self) -> Result<()> {
        Err(Error::Unsupported("transmit"))
    }

    pub fn stop_tx(&self) -> Result<()> {
        Err(Error::Unsupported("transmit"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::gain::R820T_GAIN_STEPS;

    /// Driver whose tuner gain switch always fails
    #[derive(Default)]
    struct StuckGainDriver {
        agc: AtomicBool,
    }

    impl TunerDriver for StuckGainDriver {
        fn tuner_model(&self) -> TunerModel {
            TunerModel::R820T
        }

        fn tuner_gains(&self) -> Result<Vec<i32>> {
            Ok(R820T_GAIN_STEPS.to_vec())
        }

        fn set_sample_rate(&self, _rate: u32) -> Result<()> {
            Ok(())
        }

        fn sample_rate(&self) -> u32 {
            DEFAULT_SAMPLE_RATE
        }

        fn set_center_freq(&self, _freq: u32) -> Result<()> {
            Ok(())
        }

        fn center_freq(&self) -> u32 {
            0
        }

        fn set_agc_mode(&self, enabled: bool) -> Result<()> {
            self.agc.store(enabled, Ordering::Relaxed);
            Ok(())
        }

        fn set_tuner_gain_mode(&self, _manual: bool) -> Result<()> {
            Err(Error::driver("tuner gain mode rejected"))
        }

        fn set_tuner_gain(&self, _gain: i32) -> Result<()> {
            Ok(())
        }

        fn tuner_gain(&self) -> i32 {
            0
        }

        fn reset_buffer(&self) -> Result<()> {
            Ok(())
        }

        fn read_async(&self, _len: usize, _on_transfer: &mut dyn FnMut(&[u8])) -> Result<()> {
            Ok(())
        }

        fn cancel_async(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_gain_mode_switch_keeps_mode() {
        let driver = StuckGainDriver::default();
        driver.agc.store(true, Ordering::Relaxed);
        let mut device = Device::from_driver(driver, 0).unwrap();

        let result = device.set_gain_mode(GainMode::Manual);
        assert!(matches!(result, Err(Error::Driver(_))));
        assert_eq!(device.gain_mode(), GainMode::Auto);
        assert!(!device.driver().agc.load(Ordering::Relaxed));
    }

    #[test]
    fn test_capability_from_raw() {
        assert_eq!(Capability::from(0), Capability::Rx);
        assert_eq!(Capability::from(2), Capability::Agc);
        assert_eq!(Capability::from(7), Capability::Other(7));
    }
}
