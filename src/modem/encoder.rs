//! # HDLC Bitstream Encoder
//!
//! Turns an outbound frame into the line bitstream handed to the radio FIFO:
//!
//! ```text
//! preamble flags | frame + FCS (bit stuffed) | postamble flags | tail zeros
//! ```
//!
//! Every bit is NRZI coded (a zero toggles the line level) and, for 2FSK,
//! passed through the G3RUH scrambler (1 + x^12 + x^17). Bits are packed LSB
//! first, matching the chip's LSB-first packet handler setting.
//!
//! The stream is produced lazily by [`LineBits`]. Sizing and encoding walk the
//! same iterator, so the length reported by the sizing pass is always the
//! length written by the encoding pass.

use super::crc::crc16_x25;
use crate::error::{RadioError, Result};

/// HDLC flag byte
pub const HDLC_FLAG: u8 = 0x7E;

/// Consecutive one bits that force a stuffed zero
const STUFF_RUN: u8 = 5;

/// Framing parameters for one transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderConfig {
    /// Flags sent before the frame
    pub preamble_flags: u16,
    /// Flags sent after the frame (the first one closes the frame)
    pub postamble_flags: u16,
    /// Zero bytes sent after the postamble
    pub tail_bytes: u16,
    /// Apply G3RUH scrambling after NRZI
    pub scramble: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            preamble_flags: 30,
            postamble_flags: 10,
            tail_bytes: 10,
            scramble: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Body,
    Postamble,
    Tail,
    Done,
}

impl Section {
    fn next(self) -> Self {
        match self {
            Section::Preamble => Section::Body,
            Section::Body => Section::Postamble,
            Section::Postamble => Section::Tail,
            Section::Tail | Section::Done => Section::Done,
        }
    }
}

/// Lazy iterator over the line bits of one frame
#[derive(Debug, Clone)]
pub struct LineBits<'a> {
    frame: &'a [u8],
    fcs: [u8; 2],
    config: EncoderConfig,
    section: Section,
    index: usize,
    bit: u8,
    ones: u8,
    stuff_pending: bool,
    level: bool,
    lfsr: u32,
}

impl<'a> LineBits<'a> {
    /// Start a stream for `frame`. An empty frame yields no bits at all.
    pub fn new(frame: &'a [u8], config: EncoderConfig) -> Self {
        let section = if frame.is_empty() {
            Section::Done
        } else {
            Section::Preamble
        };

        Self {
            frame,
            fcs: crc16_x25(frame).to_le_bytes(),
            config,
            section,
            index: 0,
            bit: 0,
            ones: 0,
            stuff_pending: false,
            level: false,
            lfsr: 0,
        }
    }

    fn section_len(&self) -> usize {
        match self.section {
            Section::Preamble => self.config.preamble_flags as usize,
            Section::Body => self.frame.len() + self.fcs.len(),
            Section::Postamble => self.config.postamble_flags as usize,
            Section::Tail => self.config.tail_bytes as usize,
            Section::Done => 0,
        }
    }

    fn section_byte(&self) -> u8 {
        match self.section {
            Section::Preamble | Section::Postamble => HDLC_FLAG,
            Section::Body => {
                if self.index < self.frame.len() {
                    self.frame[self.index]
                } else {
                    self.fcs[self.index - self.frame.len()]
                }
            }
            Section::Tail | Section::Done => 0x00,
        }
    }

    /// Next bit before line coding
    fn next_data_bit(&mut self) -> Option<bool> {
        if self.stuff_pending {
            self.stuff_pending = false;
            self.ones = 0;
            return Some(false);
        }

        while self.index >= self.section_len() {
            if self.section == Section::Done {
                return None;
            }
            self.section = self.section.next();
            self.index = 0;
            self.bit = 0;
        }

        let bit = (self.section_byte() >> self.bit) & 1 == 1;
        self.bit += 1;
        if self.bit == 8 {
            self.bit = 0;
            self.index += 1;
        }

        if self.section == Section::Body {
            if bit {
                self.ones += 1;
                if self.ones == STUFF_RUN {
                    self.stuff_pending = true;
                }
            } else {
                self.ones = 0;
            }
        } else {
            self.ones = 0;
        }

        Some(bit)
    }
}

impl Iterator for LineBits<'_> {
    type Item = bool;

    fn next(&mut self) -> Option<bool> {
        let bit = self.next_data_bit()?;

        // NRZI: zero toggles the line
        if !bit {
            self.level = !self.level;
        }

        if !self.config.scramble {
            return Some(self.level);
        }

        let tap12 = (self.lfsr >> 11) & 1 == 1;
        let tap17 = (self.lfsr >> 16) & 1 == 1;
        let out = self.level ^ tap12 ^ tap17;
        self.lfsr = ((self.lfsr << 1) | out as u32) & 0x1_FFFF;
        Some(out)
    }
}

/// Two-pass bitstream encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BitstreamEncoder {
    config: EncoderConfig,
}

impl BitstreamEncoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> EncoderConfig {
        self.config
    }

    /// Lazy line bits for `frame`
    pub fn bits<'a>(&self, frame: &'a [u8]) -> LineBits<'a> {
        LineBits::new(frame, self.config)
    }

    /// Dry run: number of bytes the encoding pass will write
    ///
    /// # Examples
    ///
    /// ```
    /// use aprs_radio::modem::encoder::{BitstreamEncoder, EncoderConfig};
    ///
    /// let encoder = BitstreamEncoder::new(EncoderConfig::default());
    /// assert_eq!(encoder.size_only(&[]), 0);
    /// assert!(encoder.size_only(b"test") > 50);
    /// ```
    pub fn size_only(&self, frame: &[u8]) -> usize {
        self.bits(frame).count().div_ceil(8)
    }

    /// Encode `frame` into `out`, returning the number of bytes written
    ///
    /// # Errors
    ///
    /// Returns `EncodeBufferTooSmall` instead of writing past the end of `out`
    pub fn encode(&self, frame: &[u8], out: &mut [u8]) -> Result<usize> {
        out.fill(0);

        let mut written_bits = 0usize;
        for bit in self.bits(frame) {
            let byte = written_bits >> 3;
            if byte >= out.len() {
                return Err(RadioError::EncodeBufferTooSmall {
                    needed: self.size_only(frame),
                    available: out.len(),
                });
            }
            out[byte] |= (bit as u8) << (written_bits & 7);
            written_bits += 1;
        }

        Ok(written_bits.div_ceil(8))
    }
}
