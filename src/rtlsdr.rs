//! RTL-SDR hardware backend
//! (requires the `rtlsdr` feature)
//!
//! Drives attached dongles through the `rtl_sdr_rs` crate. Device discovery
//! goes through `rusb` directly since `rtl_sdr_rs` does not expose
//! enumeration. Streaming is emulated with a loop of bulk reads that checks a
//! cancel flag between transfers.
//!
//! `rtl_sdr_rs` does not report which tuner it found, so every dongle is
//! reported as an R820T and its gain steps are the fixed R82xx table, not a
//! value queried from the device. Dongles with another tuner chip still open
//! but will show the wrong model and gain list.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use rtl_sdr_rs::{RtlSdr, TunerGain};
use rusb::{Context, DeviceDescriptor, UsbContext};
use tracing::{debug, warn};

use crate::driver::{Backend, TunerDriver};
use crate::error::{Error, Result};
use crate::gain::R820T_GAIN_STEPS;
use crate::tuner::TunerModel;

// Known RTL-SDR device VID/PID pairs
const KNOWN_DEVICES: &[(u16, u16)] = &[
    (0x0bda, 0x2832), // Realtek RTL2832U
    (0x0bda, 0x2838), // Realtek RTL2838
];

fn is_known_device(vid: u16, pid: u16) -> bool {
    KNOWN_DEVICES.iter().any(|&(v, p)| v == vid && p == pid)
}

/// USB descriptor strings of one attached dongle
#[derive(Debug, Clone, PartialEq)]
pub struct UsbDeviceInfo {
    pub index: usize,
    pub manufacturer: String,
    pub product: String,
    pub serial: String,
}

impl UsbDeviceInfo {
    fn display_name(&self) -> String {
        format!("{} {}, SN: {}", self.manufacturer, self.product, self.serial)
    }
}

/// List attached RTL-SDR dongles in index order
pub fn list_devices() -> Result<Vec<UsbDeviceInfo>> {
    let context = Context::new()?;
    let mut found = Vec::new();

    for device in context.devices()?.iter() {
        let desc: DeviceDescriptor = match device.device_descriptor() {
            Ok(d) => d,
            Err(_) => continue,
        };
        if !is_known_device(desc.vendor_id(), desc.product_id()) {
            continue;
        }

        let index = found.len();
        let vid = format!("VID:{:04x}", desc.vendor_id());
        let pid = format!("PID:{:04x}", desc.product_id());
        let unknown = format!("Unknown-{index}");

        // Devices we cannot open (permissions, busy) are still listed
        let info = match device.open() {
            Ok(handle) => {
                let read = |idx: Option<u8>| {
                    idx.and_then(|i| handle.read_string_descriptor_ascii(i).ok())
                };
                UsbDeviceInfo {
                    index,
                    manufacturer: read(desc.manufacturer_string_index()).unwrap_or(vid),
                    product: read(desc.product_string_index()).unwrap_or(pid),
                    serial: read(desc.serial_number_string_index()).unwrap_or(unknown),
                }
            }
            Err(_) => UsbDeviceInfo {
                index,
                manufacturer: vid,
                product: pid,
                serial: unknown,
            },
        };
        found.push(info);
    }

    Ok(found)
}

/**
 * Backend for attached RTL-SDR hardware
 */
#[derive(Debug, Clone, Copy, Default)]
pub struct RtlSdrBackend;

impl Backend for RtlSdrBackend {
    type Driver = RtlSdrDriver;

    fn device_count(&self) -> usize {
        match list_devices() {
            Ok(devices) => devices.len(),
            Err(e) => {
                warn!(error = %e, "USB enumeration failed");
                0
            }
        }
    }

    fn device_name(&self, index: usize) -> Option<String> {
        list_devices()
            .ok()?
            .into_iter()
            .find(|d| d.index == index)
            .map(|d| d.display_name())
    }

    fn open(&self, index: usize) -> Result<RtlSdrDriver> {
        let rtl = RtlSdr::open_with_index(index)?;
        debug!(index, "RTL-SDR opened");
        Ok(RtlSdrDriver {
            rtl: Mutex::new(rtl),
            sample_rate: AtomicU32::new(0),
            center_freq: AtomicU32::new(0),
            tuner_gain: AtomicI32::new(0),
            manual_gain: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
        })
    }
}

/// Opened RTL-SDR dongle
pub struct RtlSdrDriver {
    rtl: Mutex<RtlSdr>,
    sample_rate: AtomicU32,
    center_freq: AtomicU32,
    tuner_gain: AtomicI32,
    manual_gain: AtomicBool,
    cancel: AtomicBool,
}

impl RtlSdrDriver {
    fn rtl(&self) -> Result<MutexGuard<'_, RtlSdr>> {
        self.rtl.lock().map_err(|_| Error::poisoned("RTL-SDR handle"))
    }

    fn apply_gain(&self) -> Result<()> {
        let gain = if self.manual_gain.load(Ordering::Relaxed) {
            TunerGain::Manual(self.tuner_gain.load(Ordering::Relaxed))
        } else {
            TunerGain::Auto
        };
        self.rtl()?.set_tuner_gain(gain)?;
        Ok(())
    }
}

impl TunerDriver for RtlSdrDriver {
    /// Always R820T; the actual chip is not queried
    fn tuner_model(&self) -> TunerModel {
        TunerModel::R820T
    }

    /// Fixed R82xx gain table
    fn tuner_gains(&self) -> Result<Vec<i32>> {
        Ok(R820T_GAIN_STEPS.to_vec())
    }

    fn set_sample_rate(&self, rate: u32) -> Result<()> {
        self.rtl()?.set_sample_rate(rate)?;
        self.sample_rate.store(rate, Ordering::Relaxed);
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    fn set_center_freq(&self, freq: u32) -> Result<()> {
        self.rtl()?.set_center_freq(freq)?;
        self.center_freq.store(freq, Ordering::Relaxed);
        Ok(())
    }

    fn center_freq(&self) -> u32 {
        self.center_freq.load(Ordering::Relaxed)
    }

    /// The RTL2832U digital AGC is not exposed by `rtl_sdr_rs`; only
    /// disabling it is accepted
    fn set_agc_mode(&self, enabled: bool) -> Result<()> {
        if enabled {
            return Err(Error::Unsupported("RTL2832U digital AGC"));
        }
        Ok(())
    }

    fn set_tuner_gain_mode(&self, manual: bool) -> Result<()> {
        self.manual_gain.store(manual, Ordering::Relaxed);
        self.apply_gain()
    }

    fn set_tuner_gain(&self, gain: i32) -> Result<()> {
        self.tuner_gain.store(gain, Ordering::Relaxed);
        if self.manual_gain.load(Ordering::Relaxed) {
            self.apply_gain()?;
        }
        Ok(())
    }

    fn tuner_gain(&self) -> i32 {
        self.tuner_gain.load(Ordering::Relaxed)
    }

    fn reset_buffer(&self) -> Result<()> {
        self.cancel.store(false, Ordering::Release);
        self.rtl()?.reset_buffer()?;
        Ok(())
    }

    fn read_async(&self, transfer_len: usize, on_transfer: &mut dyn FnMut(&[u8])) -> Result<()> {
        if transfer_len == 0 {
            return Err(Error::invalid("transfer length must be non-zero"));
        }
        let mut buf = vec![0u8; transfer_len];

        while !self.cancel.load(Ordering::Acquire) {
            let read = self.rtl()?.read_sync(&mut buf)?;
            if read == 0 {
                return Err(Error::driver("RTL-SDR returned an empty transfer"));
            }
            on_transfer(&buf[..read]);
        }
        Ok(())
    }

    fn cancel_async(&self) -> Result<()> {
        self.cancel.store(true, Ordering::Release);
        Ok(())
    }
}
