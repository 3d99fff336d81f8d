//! Integration tests for the async sample stream

mod helpers;

use futures::StreamExt;
use starsdr::replay::EndOfData;
use starsdr::{Error, StreamState};

use helpers::replay_device;

#[tokio::test]
async fn test_stream_delivers_blocks_then_error() {
    let device = replay_device(helpers::generate_ramp_cu8(4 * 512), vec![0], EndOfData::Fail);
    let mut stream = device.rx_stream(256, 16).unwrap();

    let mut blocks = Vec::new();
    let mut error = None;
    while let Some(item) = stream.next().await {
        match item {
            Ok(block) => blocks.push(block),
            Err(e) => error = Some(e),
        }
    }

    assert_eq!(blocks.len(), 4);
    for (n, block) in blocks.iter().enumerate() {
        assert_eq!(block.sequence, n as u64);
        assert_eq!(block.num_samples, 256);
        assert_eq!(block.samples.len(), 512);
    }
    // Ramp byte 0 at the start of the first block
    assert_eq!(blocks[0].samples[0], -127);
    assert!(matches!(error, Some(Error::Driver(_))));
    assert_eq!(stream.dropped(), 0);

    device.stop_rx().unwrap();
}

#[tokio::test]
async fn test_stream_ends_after_stop() {
    let device = replay_device(helpers::generate_ramp_cu8(4096), vec![0], EndOfData::Repeat);
    let mut stream = device.rx_stream(256, 4).unwrap();

    for _ in 0..3 {
        let block = stream.next().await.unwrap().unwrap();
        assert_eq!(block.num_samples, 256);
    }

    device.stop_rx().unwrap();
    assert_eq!(device.stream_state(), StreamState::Idle);

    // Whatever was buffered drains, then the stream terminates cleanly
    while let Some(item) = stream.next().await {
        assert!(item.is_ok());
    }
}

#[tokio::test]
async fn test_slow_consumer_drops_newest() {
    let device = replay_device(helpers::generate_ramp_cu8(16 * 512), vec![0], EndOfData::Fail);
    let mut stream = device.rx_stream(256, 2).unwrap();

    // Let the worker run to the end of the recording before consuming
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let first = stream.next().await.unwrap().unwrap();
    let second = stream.next().await.unwrap().unwrap();
    assert_eq!(first.sequence, 0);
    assert_eq!(second.sequence, 1);
    assert!(matches!(stream.next().await, Some(Err(_))));
    assert!(stream.next().await.is_none());
    assert_eq!(stream.dropped(), 14);

    device.stop_rx().unwrap();
}

#[tokio::test]
async fn test_zero_capacity_rejected() {
    let device = replay_device(helpers::generate_ramp_cu8(512), vec![0], EndOfData::Wait);
    assert!(matches!(device.rx_stream(256, 0), Err(Error::InvalidArgument(_))));
    assert_eq!(device.stream_state(), StreamState::Idle);
}

#[tokio::test]
async fn test_stream_while_streaming() {
    let device = replay_device(helpers::generate_ramp_cu8(512), vec![0], EndOfData::Wait);
    let _stream = device.rx_stream(256, 4).unwrap();
    assert!(matches!(device.rx_stream(256, 4), Err(Error::AlreadyStreaming)));
    device.stop_rx().unwrap();
}

#[test]
fn test_to_complex() {
    let device = replay_device(vec![255u8, 0, 127, 191], vec![0], EndOfData::Fail);
    let (collector, rx) = helpers::Collector::new();
    device.start_rx(collector, 0).unwrap();
    let (samples, num_samples) = helpers::next_samples(&rx);
    device.stop_rx().unwrap();

    let block = starsdr::IqBlock {
        sequence: 0,
        num_samples,
        samples,
    };
    let iq = block.to_complex();
    assert_eq!(iq.len(), 2);
    assert_eq!(iq[0].re, 1.0);
    assert_eq!(iq[0].im, -127.0 / 128.0);
    assert_eq!(iq[1].re, 0.0);
    assert_eq!(iq[1].im, 0.5);
}
