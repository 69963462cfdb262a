//! # Outbound Packet Types
//!
//! Frames handed to the radio are opaque, already-assembled AX.25 frames
//! (addresses, control, PID and information field). The frame check
//! sequence is appended by the bitstream encoder.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{RadioError, Result};

/// Maximum number of address fields (destination, source, 8 repeaters)
pub const AX25_MAX_ADDRS: usize = 10;

/// Length of one encoded address field
pub const AX25_ADDRESS_LEN: usize = 7;

/// Maximum information field length used for APRS
pub const AX25_MAX_INFO_LEN: usize = 2048;

/// Largest frame accepted for transmission (FCS excluded)
pub const MAX_FRAME_LEN: usize = AX25_MAX_ADDRS * AX25_ADDRESS_LEN + 1 + 1 + AX25_MAX_INFO_LEN;

/// Modulation used by a radio task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modulation {
    /// No modulation selected (no decoder attached)
    #[default]
    NotSet,
    /// 1200 baud Bell 202 AFSK
    Afsk,
    /// 2FSK/2GFSK (9600 baud G3RUH by default)
    Fsk,
}

/// An outbound frame with a bounded length
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Bytes,
}

impl Frame {
    /// Wrap frame bytes
    ///
    /// # Errors
    ///
    /// Returns `FrameTooLong` if the frame exceeds [`MAX_FRAME_LEN`]
    ///
    /// # Examples
    ///
    /// ```
    /// use aprs_radio::packet::Frame;
    ///
    /// let frame = Frame::new(&b"payload"[..]).unwrap();
    /// assert_eq!(frame.len(), 7);
    /// ```
    pub fn new(bytes: impl Into<Bytes>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.len() > MAX_FRAME_LEN {
            return Err(RadioError::FrameTooLong(bytes.len()));
        }
        Ok(Self { bytes })
    }

    /// A frame with no content
    pub fn empty() -> Self {
        Self { bytes: Bytes::new() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Operating frequency for a base frequency, channel step and channel number
pub fn operating_frequency(base_frequency: u32, step_hz: u32, channel: u8) -> u32 {
    base_frequency.saturating_add(step_hz.saturating_mul(channel as u32))
}
