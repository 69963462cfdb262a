//! # AFSK Tone Upsampler
//!
//! The Si446x has no native Bell 202 modulator. Instead the chip runs in
//! direct 2FSK at the playback rate and the FIFO is loaded with a bit pattern
//! whose transitions follow a 1200 Hz (mark) or 2200 Hz (space) tone.
//!
//! Each output bit is bit 16 of a running phase accumulator. A Bresenham
//! accumulator moves to the next source bit every [`SAMPLES_PER_BAUD`]
//! samples without rounding drift.

/// Sample rate of the upsampled stream
pub const PLAYBACK_RATE: u32 = 13_200;

/// AFSK symbol rate
pub const BAUD_RATE: u32 = 1_200;

/// Output samples per source bit
pub const SAMPLES_PER_BAUD: u32 = PLAYBACK_RATE / BAUD_RATE;

/// Phase increment per sample for the 1200 Hz mark tone
pub const PHASE_DELTA_MARK: u32 = ((2 * 1_200) << 16) / PLAYBACK_RATE;

/// Phase increment per sample for the 2200 Hz space tone
pub const PHASE_DELTA_SPACE: u32 = ((2 * 2_200) << 16) / PLAYBACK_RATE;

/// Per-transmission upsampler state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Upsampler {
    phase: u32,
    baud_accumulator: u32,
    bit_position: usize,
    current_byte: u8,
}

impl Upsampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restart at the first bit of a new stream
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Index of the source bit currently being played
    pub fn bit_position(&self) -> usize {
        self.bit_position
    }

    /// Produce the next 8 samples (LSB first) from `source`
    ///
    /// Reading past the end of `source` plays zero bits.
    ///
    /// # Examples
    ///
    /// ```
    /// use aprs_radio::modem::upsampler::Upsampler;
    ///
    /// let mut upsampler = Upsampler::new();
    /// assert_eq!(upsampler.next_byte(&[0xFF]), 0xE0);
    /// ```
    pub fn next_byte(&mut self, source: &[u8]) -> u8 {
        let mut out = 0u8;

        for i in 0..8 {
            if self.baud_accumulator == 0 {
                if self.bit_position & 7 == 0 {
                    self.current_byte = source.get(self.bit_position >> 3).copied().unwrap_or(0);
                } else {
                    self.current_byte >>= 1;
                }
            }

            let delta = if self.current_byte & 1 == 1 {
                PHASE_DELTA_MARK
            } else {
                PHASE_DELTA_SPACE
            };
            self.phase = self.phase.wrapping_add(delta);
            out |= (((self.phase >> 16) & 1) as u8) << i;

            self.baud_accumulator += BAUD_RATE;
            if self.baud_accumulator >= PLAYBACK_RATE {
                self.baud_accumulator -= PLAYBACK_RATE;
                self.bit_position += 1;
            }
        }

        out
    }

    /// Fill `out` with consecutive upsampled bytes
    pub fn fill(&mut self, source: &[u8], out: &mut [u8]) {
        for byte in out.iter_mut() {
            *byte = self.next_byte(source);
        }
    }
}
