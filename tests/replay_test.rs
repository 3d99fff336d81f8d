//! Integration tests for recordings loaded from disk

mod helpers;

use std::fs;

use starsdr::replay::{EndOfData, ReplayBackend, ReplaySource};
use starsdr::{Error, StarSdr};

use helpers::{next_samples, Collector};

#[test]
fn test_from_file_streams_recording() {
    let path = std::env::temp_dir().join("starsdr_replay_stream.cu8");
    let data = helpers::generate_dc_signal_cu8(512, 200, 50);
    fs::write(&path, &data).expect("Failed to write test file");

    let source = ReplaySource::from_file(&path).unwrap();
    assert_eq!(source.len(), 1024);
    assert_eq!(source.name(), "Replay: starsdr_replay_stream.cu8");

    let source = source.with_end_of_data(EndOfData::Wait);
    let sdr = StarSdr::new(ReplayBackend::new().with_source(source));
    assert_eq!(sdr.device_name(0).as_deref(), Some("Replay: starsdr_replay_stream.cu8"));

    let device = sdr.open(0).unwrap();
    let (collector, rx) = Collector::new();
    device.start_rx(collector, 512).unwrap();
    let (samples, num_samples) = next_samples(&rx);
    device.stop_rx().unwrap();

    assert_eq!(num_samples, 512);
    assert!(samples.chunks(2).all(|c| c == [73, -77]));

    fs::remove_file(&path).ok();
}

#[test]
fn test_from_file_with_tilde() {
    let home = dirs::home_dir().expect("Could not get home directory");
    let test_file = home.join(".starsdr_replay_test.cu8");
    fs::write(&test_file, [127u8, 127, 128, 128]).expect("Failed to write test file");

    let result = ReplaySource::from_file("~/.starsdr_replay_test.cu8");
    assert!(
        result.is_ok(),
        "Failed to open file with tilde path: {:?}",
        result.err()
    );
    assert_eq!(result.unwrap().len(), 4);

    fs::remove_file(&test_file).ok();
}

#[test]
fn test_from_file_missing() {
    match ReplaySource::from_file("~/nonexistent_file_12345.cu8") {
        Err(Error::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
        other => panic!("expected a NotFound I/O error, got {other:?}"),
    }
}
