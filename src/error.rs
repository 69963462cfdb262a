//! # Error Types
//!
//! Custom error types for the radio engine using `thiserror`.

use thiserror::Error;

use crate::packet::Modulation;
use crate::si446x::ChipState;

/// Main error type for the radio engine
#[derive(Debug, Error)]
pub enum RadioError {
    /// SPI bus transfer failed
    #[error("Bus error: {0}")]
    Bus(String),

    /// The chip never raised clear-to-send
    #[error("Radio not clear to send after {0} polls")]
    ChipNotReady(u32),

    /// Frequency is not covered by any band of the radio
    #[error("Frequency {0} Hz is outside the supported bands")]
    FrequencyOutOfRange(u32),

    /// The chip did not reach a requested state in time
    #[error("Timed out waiting for chip state {0:?}")]
    StateTimeout(ChipState),

    /// Encoder destination cannot hold the stream
    #[error("Encode buffer too small: need {needed} bytes, have {available}")]
    EncodeBufferTooSmall { needed: usize, available: usize },

    /// Frame exceeds the protocol maximum
    #[error("Frame of {0} bytes exceeds the maximum frame length")]
    FrameTooLong(usize),

    /// Modulation not available for the requested direction
    #[error("Modulation {0:?} is not supported here")]
    UnsupportedModulation(Modulation),

    /// A bounded wait for a shared resource expired
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// The dispatcher no longer accepts tasks
    #[error("Radio dispatcher is closed")]
    DispatcherClosed,

    /// Decoder or packet service collaborator failure
    #[error("Decoder error: {0}")]
    Decoder(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Telemetry serialization errors
    #[error("Telemetry error: {0}")]
    Telemetry(#[from] serde_json::Error),
}

/// Result type alias for the radio engine
pub type Result<T> = std::result::Result<T, RadioError>;
