//! Error handling for the starsdr library
//!
//! All fallible operations return [`Result`], whose error type covers device
//! acquisition, configuration rejection, streaming state conflicts and the
//! failures reported by the underlying tuner driver.

use std::io;

use thiserror::Error;

/// A specialized Result type for starsdr operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for starsdr operations
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (replay files, output files)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Device open or initialization error
    #[error("Device error: {0}")]
    Device(String),

    /// The tuner driver rejected or failed an operation
    #[error("Driver error: {0}")]
    Driver(String),

    /// No device exists at the requested index
    #[error("No device found at index {0}")]
    DeviceNotFound(usize),

    /// The driver reported an empty gain step list
    #[error("Tuner reports no gain steps")]
    NoGainSteps,

    /// Streaming buffer size is not a multiple of 256 complex samples
    #[error("Buffer size of {0} samples is not a multiple of 256")]
    InvalidBufferSize(usize),

    /// Unknown gain mode identifier
    #[error("Unsupported gain mode: {0}")]
    InvalidGainMode(i32),

    /// Argument outside of what the device accepts
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Streaming was requested while a worker is already bound to the device
    #[error("Streaming is already active on this device")]
    AlreadyStreaming,

    /// Start or stop raced with another transition in progress
    #[error("Streaming state is changing, try again")]
    StreamBusy,

    /// Worker thread could not be spawned, joined or synchronized
    #[error("Thread error: {0}")]
    Thread(String),

    /// Operation is not supported by a receive-only device
    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),

    /// RTL-SDR specific error (requires "rtlsdr" feature)
    #[cfg(feature = "rtlsdr")]
    #[error("RTL-SDR error: {0:?}")]
    RtlSdr(rtl_sdr_rs::error::RtlsdrError),

    /// USB enumeration error (requires "rtlsdr" feature)
    #[cfg(feature = "rtlsdr")]
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),
}

#[cfg(feature = "rtlsdr")]
impl From<rtl_sdr_rs::error::RtlsdrError> for Error {
    fn from(err: rtl_sdr_rs::error::RtlsdrError) -> Self {
        Error::RtlSdr(err)
    }
}

impl Error {
    /// Create a device error with a custom message
    pub fn device<S: Into<String>>(msg: S) -> Self {
        Error::Device(msg.into())
    }

    /// Create a driver error with a custom message
    pub fn driver<S: Into<String>>(msg: S) -> Self {
        Error::Driver(msg.into())
    }

    /// Create an invalid argument error with a custom message
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub(crate) fn poisoned(what: &str) -> Self {
        Error::Thread(format!("{what} lock poisoned"))
    }
}
