//! Tuner gain model
//!
//! Gains are exchanged with the driver in tenths of a decibel. The
//! [`GainTable`] captured at open time drives gain selection and range
//! queries; it is never modified afterwards.

use std::str::FromStr;

use crate::error::{Error, Result};

/// Gain control strategy exposed to applications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GainMode {
    /// Tuner-controlled gain
    #[default]
    Auto,
    /// Gain selected through [`crate::Device::set_gain`]
    Manual,
}

impl TryFrom<i32> for GainMode {
    type Error = Error;

    fn try_from(raw: i32) -> Result<Self> {
        match raw {
            0 => Ok(GainMode::Auto),
            1 => Ok(GainMode::Manual),
            other => Err(Error::InvalidGainMode(other)),
        }
    }
}

impl FromStr for GainMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" | "agc" => Ok(GainMode::Auto),
            "manual" => Ok(GainMode::Manual),
            _ => Err(Error::invalid(format!("unknown gain mode '{s}'"))),
        }
    }
}

/// Requested receiver gain, as found in configurations and on the command line
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Gain {
    #[default]
    Auto,
    /// Manual gain in dB, snapped to the nearest step at or below
    Manual(f32),
}

impl FromStr for Gain {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("auto") {
            return Ok(Gain::Auto);
        }
        let db = s
            .trim_end_matches("dB")
            .trim()
            .parse::<f32>()
            .map_err(|_| Error::invalid(format!("invalid gain '{s}'")))?;
        if !db.is_finite() {
            return Err(Error::invalid(format!("invalid gain '{s}'")));
        }
        Ok(Gain::Manual(db))
    }
}

/// Ascending list of gain steps supported by a tuner, in tenths of a dB
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GainTable {
    steps: Vec<i32>,
}

impl GainTable {
    /// Build a table from driver-reported steps.
    ///
    /// Steps are sorted ascending; an empty list means the device is unusable.
    pub fn new(mut steps: Vec<i32>) -> Result<Self> {
        if steps.is_empty() {
            return Err(Error::NoGainSteps);
        }
        steps.sort_unstable();
        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[i32] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Lowest and highest step, in dB
    pub fn range_db(&self) -> (f32, f32) {
        let min = self.steps[0];
        let max = self.steps[self.steps.len() - 1];
        (tenths_to_db(min), tenths_to_db(max))
    }

    /// Every step converted to dB, in table order
    pub fn to_db(&self) -> Vec<f32> {
        self.steps.iter().copied().map(tenths_to_db).collect()
    }

    /// Highest step not exceeding `gain_db`, or the lowest step when the
    /// request is below the whole table.
    ///
    /// The request is truncated to whole tenths of a dB before comparison.
    pub fn select(&self, gain_db: f32) -> i32 {
        let requested = (gain_db * 10.0) as i32;
        self.steps
            .iter()
            .rev()
            .copied()
            .find(|&step| requested >= step)
            .unwrap_or(self.steps[0])
    }
}

pub(crate) fn tenths_to_db(tenths: i32) -> f32 {
    tenths as f32 / 10.0
}

/// Gain steps reported by librtlsdr for the R820T/R828D family
pub const R820T_GAIN_STEPS: &[i32] = &[
    0, 9, 14, 27, 37, 77, 87, 125, 144, 157, 166, 197, 207, 229, 254, 280, 297, 328, 338, 364,
    372, 386, 402, 421, 434, 439, 445, 480, 496,
];
