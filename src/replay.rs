//! Replay backend
//!
//! Plays back recorded interleaved unsigned 8-bit I/Q (`.cu8`, the native
//! RTL-SDR format) as if it came from attached hardware. Recordings are cut
//! into transfers of exactly the size the streaming engine asks for, which
//! makes the backend useful both for offline processing and for exercising
//! the streaming engine without a dongle.
//!
//! ```no_run
//! use starsdr::replay::{ReplayBackend, ReplaySource};
//! use starsdr::StarSdr;
//!
//! let source = ReplaySource::from_file("~/recordings/fm.cu8")?;
//! let sdr = StarSdr::new(ReplayBackend::new().with_source(source));
//! let device = sdr.open(0)?;
//! device.start_rx(
//!     |samples: &[i16], n: usize| println!("{n} samples, first I={}", samples[0]),
//!     0,
//! )?;
//! # Ok::<(), starsdr::Error>(())
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::driver::{Backend, TunerDriver};
use crate::error::{Error, Result};
use crate::gain::R820T_GAIN_STEPS;
use crate::tuner::TunerModel;

const IDLE_POLL: Duration = Duration::from_millis(1);

/// What a replay device does once the recording is exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndOfData {
    /// Deliver nothing more until cancelled
    #[default]
    Wait,
    /// Start again from the beginning
    Repeat,
    /// End the stream with a driver error, like an unplugged dongle
    Fail,
}

/**
 * One recorded device
 */
#[derive(Debug, Clone)]
pub struct ReplaySource {
    name: String,
    tuner: TunerModel,
    gains: Vec<i32>,
    data: Arc<[u8]>,
    end_of_data: EndOfData,
    realtime: bool,
}

impl ReplaySource {
    /// Replay `data`, presented as an R820T dongle
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        let data: Vec<u8> = data.into();
        Self {
            name: "Replay".to_string(),
            tuner: TunerModel::R820T,
            gains: R820T_GAIN_STEPS.to_vec(),
            data: Arc::from(data),
            end_of_data: EndOfData::Wait,
            realtime: false,
        }
    }

    /// Load a `.cu8` recording (a leading `~` expands to the home directory)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = expanduser(path.as_ref().to_path_buf());
        let data = std::fs::read(&path)?;
        let name = path
            .file_name()
            .map(|n| format!("Replay: {}", n.to_string_lossy()))
            .unwrap_or_else(|| "Replay".to_string());
        debug!(path = %path.display(), bytes = data.len(), "loaded replay recording");
        Ok(Self::new(data).with_name(name))
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_tuner(mut self, tuner: TunerModel) -> Self {
        self.tuner = tuner;
        self
    }

    /// Gain steps reported by the device, in tenths of a dB
    pub fn with_gains(mut self, gains: Vec<i32>) -> Self {
        self.gains = gains;
        self
    }

    pub fn with_end_of_data(mut self, end_of_data: EndOfData) -> Self {
        self.end_of_data = end_of_data;
        self
    }

    /// Pace transfers at the configured sample rate instead of as fast as
    /// the handler consumes them
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/**
 * Backend serving a fixed list of recordings
 */
#[derive(Debug, Clone, Default)]
pub struct ReplayBackend {
    sources: Vec<ReplaySource>,
}

impl ReplayBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: ReplaySource) -> Self {
        self.sources.push(source);
        self
    }

    pub fn push(&mut self, source: ReplaySource) {
        self.sources.push(source);
    }
}

impl Backend for ReplayBackend {
    type Driver = ReplayDriver;

    fn device_count(&self) -> usize {
        self.sources.len()
    }

    fn device_name(&self, index: usize) -> Option<String> {
        self.sources.get(index).map(|s| s.name.clone())
    }

    fn open(&self, index: usize) -> Result<ReplayDriver> {
        let source = self
            .sources
            .get(index)
            .ok_or(Error::DeviceNotFound(index))?;
        Ok(ReplayDriver::new(source.clone()))
    }
}

/// Opened replay device
#[derive(Debug)]
pub struct ReplayDriver {
    source: ReplaySource,
    sample_rate: AtomicU32,
    center_freq: AtomicU32,
    tuner_gain: AtomicI32,
    agc: AtomicBool,
    manual_gain: AtomicBool,
    cancel: AtomicBool,
    position: AtomicUsize,
}

impl ReplayDriver {
    fn new(source: ReplaySource) -> Self {
        Self {
            source,
            sample_rate: AtomicU32::new(0),
            center_freq: AtomicU32::new(0),
            tuner_gain: AtomicI32::new(0),
            agc: AtomicBool::new(false),
            manual_gain: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
            position: AtomicUsize::new(0),
        }
    }

    pub fn agc_enabled(&self) -> bool {
        self.agc.load(Ordering::Relaxed)
    }

    pub fn manual_gain_enabled(&self) -> bool {
        self.manual_gain.load(Ordering::Relaxed)
    }

    /// Byte offset of the next transfer in the recording
    pub fn position(&self) -> usize {
        self.position.load(Ordering::Relaxed)
    }

    fn pace(&self, bytes: usize) {
        let rate = self.sample_rate.load(Ordering::Relaxed);
        if self.source.realtime && rate > 0 {
            let samples = (bytes / 2) as f64;
            thread::sleep(Duration::from_secs_f64(samples / f64::from(rate)));
        }
    }
}

impl TunerDriver for ReplayDriver {
    fn tuner_model(&self) -> TunerModel {
        self.source.tuner
    }

    fn tuner_gains(&self) -> Result<Vec<i32>> {
        Ok(self.source.gains.clone())
    }

    fn set_sample_rate(&self, rate: u32) -> Result<()> {
        if rate == 0 {
            return Err(Error::invalid("sample rate must be non-zero"));
        }
        self.sample_rate.store(rate, Ordering::Relaxed);
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    fn set_center_freq(&self, freq: u32) -> Result<()> {
        self.center_freq.store(freq, Ordering::Relaxed);
        Ok(())
    }

    fn center_freq(&self) -> u32 {
        self.center_freq.load(Ordering::Relaxed)
    }

    fn set_agc_mode(&self, enabled: bool) -> Result<()> {
        self.agc.store(enabled, Ordering::Relaxed);
        Ok(())
    }

    fn set_tuner_gain_mode(&self, manual: bool) -> Result<()> {
        self.manual_gain.store(manual, Ordering::Relaxed);
        Ok(())
    }

    fn set_tuner_gain(&self, gain: i32) -> Result<()> {
        self.tuner_gain.store(gain, Ordering::Relaxed);
        Ok(())
    }

    fn tuner_gain(&self) -> i32 {
        self.tuner_gain.load(Ordering::Relaxed)
    }

    fn reset_buffer(&self) -> Result<()> {
        self.cancel.store(false, Ordering::Release);
        Ok(())
    }

    fn read_async(&self, transfer_len: usize, on_transfer: &mut dyn FnMut(&[u8])) -> Result<()> {
        if transfer_len == 0 {
            return Err(Error::invalid("transfer length must be non-zero"));
        }
        let data = &self.source.data;
        let mut pos = self.position.load(Ordering::Relaxed);

        while !self.cancel.load(Ordering::Acquire) {
            if pos >= data.len() {
                match self.source.end_of_data {
                    EndOfData::Repeat if !data.is_empty() => pos = 0,
                    EndOfData::Fail => {
                        return Err(Error::driver(format!(
                            "{}: end of recording",
                            self.source.name
                        )));
                    }
                    _ => {
                        thread::sleep(IDLE_POLL);
                        continue;
                    }
                }
            }

            let end = (pos + transfer_len).min(data.len());
            on_transfer(&data[pos..end]);
            self.position.store(end, Ordering::Relaxed);
            self.pace(end - pos);
            pos = end;
        }
        Ok(())
    }

    fn cancel_async(&self) -> Result<()> {
        self.cancel.store(true, Ordering::Release);
        Ok(())
    }
}

fn expanduser(path: PathBuf) -> PathBuf {
    if let Some(stripped) = path.to_str().and_then(|p| p.strip_prefix("~"))
        && let Some(home_dir) = dirs::home_dir()
    {
        return home_dir.join(stripped.trim_start_matches('/'));
    }
    path
}
