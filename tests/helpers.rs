//! Test helper utilities: synthetic cu8 recordings and sample collectors
#![allow(dead_code)]

use std::f32::consts::PI;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use starsdr::replay::{EndOfData, ReplayBackend, ReplayDriver, ReplaySource};
use starsdr::{Device, Error, RxHandler, StarSdr};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Generate a complex sine wave as interleaved cu8 bytes
pub fn generate_sine_wave_cu8(frequency: f32, sample_rate: u32, num_samples: usize) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(num_samples * 2);
    let angular_freq = 2.0 * PI * frequency / sample_rate as f32;

    for n in 0..num_samples {
        let phase = angular_freq * n as f32;
        // [-1, 1] to [0, 255]
        buffer.push(((phase.cos() + 1.0) * 127.5) as u8);
        buffer.push(((phase.sin() + 1.0) * 127.5) as u8);
    }

    buffer
}

/// Constant cu8 samples
pub fn generate_dc_signal_cu8(num_samples: usize, i_byte: u8, q_byte: u8) -> Vec<u8> {
    [i_byte, q_byte].repeat(num_samples)
}

/// Bytes counting up and wrapping, so every transfer is distinguishable
pub fn generate_ramp_cu8(num_bytes: usize) -> Vec<u8> {
    (0..num_bytes).map(|n| (n % 256) as u8).collect()
}

/// Library instance serving a single recording
pub fn replay_sdr(source: ReplaySource) -> StarSdr<ReplayBackend> {
    StarSdr::new(ReplayBackend::new().with_source(source))
}

/// Open a replay device over `data` with the given gain steps
pub fn replay_device(
    data: Vec<u8>,
    gains: Vec<i32>,
    end_of_data: EndOfData,
) -> Device<ReplayDriver> {
    replay_sdr(
        ReplaySource::new(data)
            .with_gains(gains)
            .with_end_of_data(end_of_data),
    )
    .open(0)
    .expect("replay device should open")
}

/// What a [`Collector`] observed for one callback or error
#[derive(Debug)]
pub enum Event {
    Samples { samples: Vec<i16>, num_samples: usize },
    Error(String),
}

/// Handler forwarding every callback to a channel
pub struct Collector {
    tx: Sender<Event>,
}

impl Collector {
    pub fn new() -> (Self, Receiver<Event>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl RxHandler for Collector {
    fn on_samples(&mut self, samples: &[i16], num_samples: usize) {
        let _ = self.tx.send(Event::Samples {
            samples: samples.to_vec(),
            num_samples,
        });
    }

    fn on_error(&mut self, err: &Error) {
        let _ = self.tx.send(Event::Error(err.to_string()));
    }
}

/// Next sample callback; panics on timeout or stream error
pub fn next_samples(rx: &Receiver<Event>) -> (Vec<i16>, usize) {
    match rx.recv_timeout(TIMEOUT).expect("no callback before timeout") {
        Event::Samples {
            samples,
            num_samples,
        } => (samples, num_samples),
        Event::Error(e) => panic!("unexpected stream error: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_sine_wave_cu8_length() {
        let samples = generate_sine_wave_cu8(1000.0, 96000, 100);
        assert_eq!(samples.len(), 200);
    }

    #[test]
    fn test_generate_dc_signal_cu8() {
        let samples = generate_dc_signal_cu8(50, 127, 200);
        assert_eq!(samples.len(), 100);
        assert!(samples.chunks(2).all(|c| c == [127, 200]));
    }

    #[test]
    fn test_generate_ramp_wraps() {
        let ramp = generate_ramp_cu8(258);
        assert_eq!(ramp[255], 255);
        assert_eq!(ramp[256], 0);
        assert_eq!(ramp[257], 1);
    }
}
