//! Receive I/Q samples from an RTL-SDR dongle or a `.cu8` recording
//!
//! Samples are converted to signed 16-bit I/Q centered on zero and can be
//! written to a file as raw little-endian pairs.
//!
//! # Usage Examples
//!
//! ## List attached dongles
//! ```bash
//! starsdr-rx --list
//! ```
//!
//! ## Capture 100 transfers at 1090 MHz
//! ```bash
//! starsdr-rx -c 1090M -s 2400000 -g 49.6 --blocks 100 -o adsb.cs16
//! ```
//!
//! ## Replay a recording
//! ```bash
//! starsdr-rx -c 105.1M --file fm.cu8 --realtime -v
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::str::FromStr;

use clap::{ArgAction, Parser};
use futures::StreamExt;
use starsdr::replay::{EndOfData, ReplayBackend, ReplaySource};
use starsdr::{Backend, Gain, RxConfig, StarSdr};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Frequency(u64);

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let scaled = |stripped: &str, factor: f64, unit: &str| -> Result<Frequency, String> {
            let val: f64 = stripped
                .trim()
                .parse()
                .map_err(|_| format!("Invalid {unit} value"))?;
            if !val.is_finite() || val < 0.0 {
                return Err(format!("Invalid {unit} value"));
            }
            Ok(Frequency((val * factor).round() as u64))
        };
        if let Some(stripped) = s.strip_suffix('G') {
            scaled(stripped, 1e9, "GHz")
        } else if let Some(stripped) = s.strip_suffix('M') {
            scaled(stripped, 1e6, "MHz")
        } else if let Some(stripped) = s.strip_suffix('k') {
            scaled(stripped, 1e3, "kHz")
        } else {
            let val: u64 = s.parse().map_err(|_| "Invalid Hz value")?;
            Ok(Frequency(val))
        }
    }
}

fn parse_gain(s: &str) -> Result<Gain, String> {
    s.parse::<Gain>().map_err(|e| e.to_string())
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Receive I/Q samples from an RTL-SDR dongle or a recording",
    long_about = None
)]
struct Args {
    /// List available devices and exit
    #[arg(long, default_value_t = false)]
    list: bool,

    /// Replay a .cu8 recording instead of using hardware
    #[arg(long)]
    file: Option<PathBuf>,

    /// Loop the recording instead of stopping at its end
    #[arg(long, default_value_t = false)]
    repeat: bool,

    /// Pace the recording at the sample rate
    #[arg(long, default_value_t = false)]
    realtime: bool,

    /// Device index
    #[arg(long, default_value_t = 0)]
    device_index: usize,

    /// Center frequency in Hz (accepts k/M/G suffix, e.g. 105.1M)
    #[arg(short, long, value_parser = Frequency::from_str, default_value = "100M")]
    center_freq: Frequency,

    /// Sample rate in Hz
    #[arg(short, long, default_value_t = starsdr::DEFAULT_SAMPLE_RATE)]
    sample_rate: u32,

    /// Tuner gain in dB, or "auto"
    #[arg(short, long, value_parser = parse_gain, default_value = "auto")]
    gain: Gain,

    /// Transfer size in complex samples, multiple of 256 (0 for the default)
    #[arg(long, default_value_t = 0)]
    buffer_samples: usize,

    /// Number of transfers to receive (0 to run until interrupted)
    #[arg(long, default_value_t = 0)]
    blocks: u64,

    /// Write interleaved signed 16-bit little-endian I/Q to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Verbosity level (-v=info, -vv=debug, -vvv=trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

const STREAM_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> starsdr::Result<()> {
    let args = Args::parse();

    // 0 = WARN (quiet), 1 = INFO, 2 = DEBUG, 3+ = TRACE
    let log_level = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    let _ = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .try_init();

    match &args.file {
        Some(path) => {
            let end_of_data = if args.repeat {
                EndOfData::Repeat
            } else {
                EndOfData::Fail
            };
            let source = ReplaySource::from_file(path)?
                .with_end_of_data(end_of_data)
                .with_realtime(args.realtime);
            run(StarSdr::new(ReplayBackend::new().with_source(source)), &args).await
        }
        None => run_hardware(&args).await,
    }
}

#[cfg(feature = "rtlsdr")]
async fn run_hardware(args: &Args) -> starsdr::Result<()> {
    run(StarSdr::rtlsdr(), args).await
}

#[cfg(not(feature = "rtlsdr"))]
async fn run_hardware(_args: &Args) -> starsdr::Result<()> {
    Err(starsdr::Error::Unsupported(
        "hardware access (built without the rtlsdr feature, use --file)",
    ))
}

async fn run<B: Backend>(sdr: StarSdr<B>, args: &Args) -> starsdr::Result<()> {
    if args.list {
        let count = sdr.device_count();
        println!("Found {count} device(s)");
        for index in 0..count {
            let name = sdr.device_name(index).unwrap_or_default();
            println!("  [{index}] {name}");
        }
        return Ok(());
    }

    let mut config = RxConfig::new(
        args.device_index,
        args.center_freq.0,
        args.sample_rate,
        args.gain,
    );
    config.buffer_samples = args.buffer_samples;

    let device = sdr.open_with_config(&config)?;
    info!(
        tuner = %device.tuner(),
        center_freq = device.center_freq(),
        sample_rate = device.sample_rate(),
        gain_db = device.tuner_gain(),
        "receiving"
    );
    if !device.tuning_range().contains(config.center_freq) {
        warn!(
            center_freq = config.center_freq,
            min = device.tuning_range().min,
            max = device.tuning_range().max,
            "center frequency outside the tuner range"
        );
    }

    let mut output = match &args.output {
        Some(path) => Some(BufWriter::new(File::create(path)?)),
        None => None,
    };

    let mut stream = device.rx_stream(config.buffer_samples, STREAM_CAPACITY)?;
    let mut received = 0u64;
    let mut result = Ok(());

    loop {
        let next = tokio::select! {
            next = stream.next() => next,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        };
        let block = match next {
            Some(Ok(block)) => block,
            Some(Err(e)) => {
                warn!(error = %e, "stream ended");
                break;
            }
            None => break,
        };

        let power = block.mean_power();
        debug!(
            sequence = block.sequence,
            samples = block.num_samples,
            power_dbfs = 10.0 * power.max(f32::MIN_POSITIVE).log10(),
            "block"
        );

        if let Some(out) = output.as_mut() {
            let bytes: Vec<u8> = block.samples.iter().flat_map(|s| s.to_le_bytes()).collect();
            if let Err(e) = out.write_all(&bytes) {
                result = Err(e.into());
                break;
            }
        }

        received += 1;
        if args.blocks > 0 && received >= args.blocks {
            break;
        }
    }

    device.stop_rx()?;
    if let Some(mut out) = output {
        out.flush()?;
    }

    let stats = device.stream_stats();
    info!(
        received,
        transfers = stats.transfers,
        samples = stats.samples,
        dropped = stats.dropped + stream.dropped(),
        "done"
    );
    device.close()?;
    result
}
