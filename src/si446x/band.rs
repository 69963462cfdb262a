//! # Band Selection and Synthesizer Maths
//!
//! Picks the output divider for a carrier frequency and computes the
//! fractional-N synthesizer words, channel step and AFSK deviation.
//!
//! All arithmetic is integer so the same inputs always give the same
//! register bytes.

use super::registers::{
    property_command, CLKGEN_SY_SEL, FREQ_CONTROL_INTE, MODEM_CLKGEN_BAND, MODEM_FREQ_DEV,
};
use crate::error::{RadioError, Result};

/// Lowest carrier frequency the driver accepts
pub const MIN_FREQUENCY_HZ: u32 = 144_000_000;

/// Highest carrier frequency the driver accepts
pub const MAX_FREQUENCY_HZ: u32 = 900_000_000;

/// AFSK deviation programmed with the band
pub const AFSK_DEVIATION_HZ: u64 = 1_300;

/// One synthesizer band
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Band {
    pub min_hz: u32,
    pub max_hz: u32,
    pub outdiv: u32,
    pub code: u8,
}

/// Bands ordered from high to low frequency
pub const BANDS: [Band; 6] = [
    Band { min_hz: 705_000_000, max_hz: MAX_FREQUENCY_HZ, outdiv: 4, code: 0 },
    Band { min_hz: 525_000_000, max_hz: 705_000_000, outdiv: 6, code: 1 },
    Band { min_hz: 353_000_000, max_hz: 525_000_000, outdiv: 8, code: 2 },
    Band { min_hz: 239_000_000, max_hz: 353_000_000, outdiv: 12, code: 3 },
    Band { min_hz: 177_000_000, max_hz: 239_000_000, outdiv: 16, code: 4 },
    Band { min_hz: MIN_FREQUENCY_HZ, max_hz: 177_000_000, outdiv: 24, code: 5 },
];

/// Whether `freq` is covered by any band
pub fn in_band(freq: u32) -> bool {
    (MIN_FREQUENCY_HZ..=MAX_FREQUENCY_HZ).contains(&freq)
}

/// Find the band for a carrier frequency
///
/// # Errors
///
/// Returns `FrequencyOutOfRange` below 144 MHz or above 900 MHz
pub fn band_for(freq: u32) -> Result<Band> {
    if !in_band(freq) {
        return Err(RadioError::FrequencyOutOfRange(freq));
    }

    BANDS
        .iter()
        .copied()
        .find(|band| freq >= band.min_hz)
        .ok_or(RadioError::FrequencyOutOfRange(freq))
}

/// Register values for one frequency / channel step pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandSettings {
    pub band: Band,
    /// Phase detector frequency (2 * reference / outdiv)
    pub f_pfd: u32,
    /// Integer part of the divider, minus one
    pub integer: u8,
    /// 19 bit fractional part of the divider
    pub fraction: u32,
    /// Channel step in synthesizer units
    pub channel_increment: u16,
    /// AFSK deviation in synthesizer units
    pub deviation: u32,
}

impl BandSettings {
    /// MODEM_CLKGEN_BAND write
    pub fn band_command(&self) -> Vec<u8> {
        property_command(MODEM_CLKGEN_BAND, &[self.band.code + CLKGEN_SY_SEL])
    }

    /// FREQ_CONTROL_INTE, FRAC[3] and CHANNEL_STEP_SIZE[2] in one write
    pub fn frequency_command(&self) -> Vec<u8> {
        property_command(
            FREQ_CONTROL_INTE,
            &[
                self.integer,
                ((self.fraction >> 16) & 0xFF) as u8,
                ((self.fraction >> 8) & 0xFF) as u8,
                (self.fraction & 0xFF) as u8,
                (self.channel_increment >> 8) as u8,
                (self.channel_increment & 0xFF) as u8,
            ],
        )
    }

    /// MODEM_FREQ_DEV write
    pub fn deviation_command(&self) -> Vec<u8> {
        property_command(
            MODEM_FREQ_DEV,
            &[
                ((self.deviation >> 16) & 0xFF) as u8,
                ((self.deviation >> 8) & 0xFF) as u8,
                (self.deviation & 0xFF) as u8,
            ],
        )
    }
}

/// Compute synthesizer settings
///
/// # Arguments
///
/// * `freq` - Carrier frequency in Hz
/// * `step` - Channel step in Hz
/// * `reference_clock` - Crystal or TCXO frequency in Hz
///
/// # Errors
///
/// Returns `FrequencyOutOfRange` if `freq` is outside every band
///
/// # Examples
///
/// ```
/// use aprs_radio::si446x::band::compute_band_settings;
///
/// let settings = compute_band_settings(144_800_000, 12_500, 26_000_000).unwrap();
/// assert_eq!(settings.band.outdiv, 24);
/// assert_eq!(settings.integer, 65);
/// ```
pub fn compute_band_settings(freq: u32, step: u32, reference_clock: u32) -> Result<BandSettings> {
    let band = band_for(freq)?;

    let outdiv = band.outdiv as u64;
    let clock = reference_clock as u64;
    let f_pfd = 2 * clock / outdiv;
    let integer = (freq as u64 / f_pfd).saturating_sub(1);
    let fraction = ((freq as u64 - integer * f_pfd) << 19) / f_pfd;
    let channel_increment = (1u64 << 19) * outdiv * step as u64 / (2 * clock);
    // Truncated to whole units before doubling
    let deviation = (1u64 << 19) * outdiv * AFSK_DEVIATION_HZ / (2 * clock) * 2;

    Ok(BandSettings {
        band,
        f_pfd: f_pfd as u32,
        integer: integer as u8,
        fraction: fraction as u32,
        channel_increment: channel_increment.min(u16::MAX as u64) as u16,
        deviation: deviation as u32,
    })
}
