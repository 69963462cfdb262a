//! FIFO byte sources for the two transmit schemes

use std::time::Duration;

use crate::modem::upsampler::{Upsampler, BAUD_RATE, SAMPLES_PER_BAUD};

/// Produces the bytes written to the TX FIFO
pub trait FifoSource: Send {
    /// Total FIFO bytes for the whole transmission
    fn total(&self) -> usize;

    /// Fill `out` with the next bytes of the stream
    fn pull(&mut self, out: &mut [u8]);

    /// Pause between FIFO top-ups
    fn feed_interval(&self) -> Duration;
}

/// Upsampled AFSK: eleven FIFO bytes per encoded byte
#[derive(Debug)]
pub struct AfskSource {
    encoded: Vec<u8>,
    upsampler: Upsampler,
}

impl AfskSource {
    pub fn new(encoded: Vec<u8>) -> Self {
        Self {
            encoded,
            upsampler: Upsampler::new(),
        }
    }
}

impl FifoSource for AfskSource {
    fn total(&self) -> usize {
        self.encoded.len() * SAMPLES_PER_BAUD as usize
    }

    fn pull(&mut self, out: &mut [u8]) {
        self.upsampler.fill(&self.encoded, out);
    }

    /// Eight AFSK bit times
    fn feed_interval(&self) -> Duration {
        Duration::from_micros(8 * 1_000_000 / BAUD_RATE as u64)
    }
}

/// 2FSK: encoded bytes go to the FIFO as they are
#[derive(Debug)]
pub struct FskSource {
    encoded: Vec<u8>,
    cursor: usize,
    bitrate: u32,
}

impl FskSource {
    pub fn new(encoded: Vec<u8>, bitrate: u32) -> Self {
        Self {
            encoded,
            cursor: 0,
            bitrate,
        }
    }
}

impl FifoSource for FskSource {
    fn total(&self) -> usize {
        self.encoded.len()
    }

    fn pull(&mut self, out: &mut [u8]) {
        let end = (self.cursor + out.len()).min(self.encoded.len());
        let available = end - self.cursor;
        out[..available].copy_from_slice(&self.encoded[self.cursor..end]);
        out[available..].fill(0);
        self.cursor = end;
    }

    /// Ten byte times at the bit rate
    fn feed_interval(&self) -> Duration {
        Duration::from_micros(10 * 8 * 1_000_000 / self.bitrate.max(1) as u64)
    }
}
