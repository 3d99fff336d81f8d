//! Tuner chipsets and their tuning envelopes

use std::fmt;

/// Tuner chip found behind the RTL2832U demodulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TunerModel {
    Unknown,
    E4000,
    Fc0012,
    Fc0013,
    Fc2580,
    R820T,
    R828D,
}

impl TunerModel {
    /// Hard center-frequency range of this tuner, in Hz.
    ///
    /// Unrecognized tuners report a zero-width `(0, 0)` range.
    pub fn tuning_range(self) -> TuningRange {
        let (min, max) = match self {
            TunerModel::E4000 => (52_000_000, 2_200_000_000),
            TunerModel::Fc0012 => (22_000_000, 948_600_000),
            TunerModel::Fc0013 => (22_000_000, 1_100_000_000),
            TunerModel::Fc2580 => (146_000_000, 924_000_000),
            TunerModel::R820T => (24_000_000, 1_766_000_000),
            TunerModel::R828D => (24_000_000, 1_766_000_000),
            TunerModel::Unknown => (0, 0),
        };
        TuningRange { min, max }
    }

    pub fn name(self) -> &'static str {
        match self {
            TunerModel::Unknown => "Unknown",
            TunerModel::E4000 => "Elonics E4000",
            TunerModel::Fc0012 => "Fitipower FC0012",
            TunerModel::Fc0013 => "Fitipower FC0013",
            TunerModel::Fc2580 => "FCI FC2580",
            TunerModel::R820T => "Rafael Micro R820T",
            TunerModel::R828D => "Rafael Micro R828D",
        }
    }
}

impl fmt::Display for TunerModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Supported center-frequency range `[min, max]` in Hz
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TuningRange {
    pub min: u64,
    pub max: u64,
}

impl TuningRange {
    /// True for the `(0, 0)` range reported by unrecognized tuners
    pub fn is_empty(&self) -> bool {
        self.max <= self.min
    }

    /// Whether `freq` lies inside the envelope (advisory, never enforced)
    pub fn contains(&self, freq: u64) -> bool {
        !self.is_empty() && freq >= self.min && freq <= self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuning_range_table() {
        let cases = [
            (TunerModel::E4000, 52_000_000, 2_200_000_000),
            (TunerModel::Fc0012, 22_000_000, 948_600_000),
            (TunerModel::Fc0013, 22_000_000, 1_100_000_000),
            (TunerModel::Fc2580, 146_000_000, 924_000_000),
            (TunerModel::R820T, 24_000_000, 1_766_000_000),
            (TunerModel::R828D, 24_000_000, 1_766_000_000),
        ];
        for (model, min, max) in cases {
            assert_eq!(model.tuning_range(), TuningRange { min, max }, "{model}");
        }
    }

    #[test]
    fn test_unknown_tuner_is_zero_width() {
        let range = TunerModel::Unknown.tuning_range();
        assert_eq!(range, TuningRange { min: 0, max: 0 });
        assert!(range.is_empty());
        assert!(!range.contains(0));
    }

    #[test]
    fn test_contains_is_inclusive() {
        let range = TunerModel::R820T.tuning_range();
        assert!(range.contains(24_000_000));
        assert!(range.contains(1_766_000_000));
        assert!(!range.contains(1_766_000_001));
        assert!(!range.contains(23_999_999));
    }
}
