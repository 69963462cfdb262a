//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{RadioError, Result};
use crate::packet::Modulation;
use crate::si446x::band::{in_band, MAX_FREQUENCY_HZ, MIN_FREQUENCY_HZ};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub radio: RadioConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub transmit: TransmitConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Transceiver hardware configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RadioConfig {
    #[serde(default)]
    pub unit: u8,

    #[serde(default = "default_reference_clock_hz")]
    pub reference_clock_hz: u32,

    /// Reference is a TCXO rather than a crystal
    #[serde(default = "default_tcxo")]
    pub tcxo: bool,

    #[serde(default = "default_cts_poll_limit")]
    pub cts_poll_limit: u32,

    #[serde(default = "default_state_change_timeout_ms")]
    pub state_change_timeout_ms: u64,
}

/// Task pool and dispatcher timing
#[derive(Debug, Deserialize, Clone)]
pub struct DispatcherConfig {
    #[serde(default = "default_task_pool_size")]
    pub task_pool_size: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_task_acquire_timeout_ms")]
    pub task_acquire_timeout_ms: u64,

    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    #[serde(default = "default_decoder_close_timeout_ms")]
    pub decoder_close_timeout_ms: u64,
}

/// Transmission framing, timing and the beacon channel
#[derive(Debug, Deserialize, Clone)]
pub struct TransmitConfig {
    #[serde(default = "default_transmit_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_preamble_flags")]
    pub preamble_flags: u16,

    #[serde(default = "default_postamble_flags")]
    pub postamble_flags: u16,

    #[serde(default = "default_tail_bytes")]
    pub tail_bytes: u16,

    #[serde(default = "default_cca_window_ms")]
    pub cca_window_ms: u16,

    #[serde(default = "default_clear_channel_timeout_ms")]
    pub clear_channel_timeout_ms: u64,

    #[serde(default = "default_frequency_hz")]
    pub frequency_hz: u32,

    #[serde(default = "default_step_hz")]
    pub step_hz: u32,

    #[serde(default)]
    pub channel: u8,

    #[serde(default = "default_power")]
    pub power: u8,

    #[serde(default = "default_bitrate")]
    pub bitrate: u32,

    #[serde(default = "default_squelch")]
    pub squelch: u8,

    #[serde(default = "default_modulation")]
    pub modulation: Modulation,

    #[serde(default = "default_beacon_interval_s")]
    pub beacon_interval_s: u64,
}

/// Log output configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily rolling log files; stderr only when unset
    #[serde(default)]
    pub log_dir: Option<String>,
}

/// Transmit report logging
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,

    #[serde(default = "default_telemetry_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,
}

// Default value functions
fn default_reference_clock_hz() -> u32 { 26_000_000 }
fn default_tcxo() -> bool { true }
fn default_cts_poll_limit() -> u32 { 1000 }
fn default_state_change_timeout_ms() -> u64 { 100 }

fn default_task_pool_size() -> usize { 10 }
fn default_poll_interval_ms() -> u64 { 100 }
fn default_task_acquire_timeout_ms() -> u64 { 1000 }
fn default_lock_timeout_ms() -> u64 { 15_000 }
fn default_decoder_close_timeout_ms() -> u64 { 5000 }

fn default_transmit_timeout_ms() -> u64 { 10_000 }
fn default_preamble_flags() -> u16 { 30 }
fn default_postamble_flags() -> u16 { 10 }
fn default_tail_bytes() -> u16 { 10 }
fn default_cca_window_ms() -> u16 { 50 }
fn default_clear_channel_timeout_ms() -> u64 { 10_000 }
fn default_frequency_hz() -> u32 { 144_800_000 }
fn default_step_hz() -> u32 { 12_500 }
fn default_power() -> u8 { 0x7F }
fn default_bitrate() -> u32 { 9600 }
fn default_squelch() -> u8 { 0x4F }
fn default_modulation() -> Modulation { Modulation::Afsk }
fn default_beacon_interval_s() -> u64 { 60 }

fn default_log_level() -> String { "info".to_string() }

fn default_telemetry_enabled() -> bool { true }
fn default_telemetry_dir() -> String { "./logs".to_string() }
fn default_max_records_per_file() -> usize { 10000 }
fn default_max_files_to_keep() -> usize { 10 }

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            unit: 0,
            reference_clock_hz: default_reference_clock_hz(),
            tcxo: default_tcxo(),
            cts_poll_limit: default_cts_poll_limit(),
            state_change_timeout_ms: default_state_change_timeout_ms(),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            task_pool_size: default_task_pool_size(),
            poll_interval_ms: default_poll_interval_ms(),
            task_acquire_timeout_ms: default_task_acquire_timeout_ms(),
            lock_timeout_ms: default_lock_timeout_ms(),
            decoder_close_timeout_ms: default_decoder_close_timeout_ms(),
        }
    }
}

impl Default for TransmitConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_transmit_timeout_ms(),
            preamble_flags: default_preamble_flags(),
            postamble_flags: default_postamble_flags(),
            tail_bytes: default_tail_bytes(),
            cca_window_ms: default_cca_window_ms(),
            clear_channel_timeout_ms: default_clear_channel_timeout_ms(),
            frequency_hz: default_frequency_hz(),
            step_hz: default_step_hz(),
            channel: 0,
            power: default_power(),
            bitrate: default_bitrate(),
            squelch: default_squelch(),
            modulation: default_modulation(),
            beacon_interval_s: default_beacon_interval_s(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: None,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_telemetry_enabled(),
            log_dir: default_telemetry_dir(),
            max_records_per_file: default_max_records_per_file(),
            max_files_to_keep: default_max_files_to_keep(),
        }
    }
}

fn invalid(message: impl std::fmt::Display) -> RadioError {
    RadioError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use aprs_radio::config::Config;
    ///
    /// let config = Config::load("config/radio.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if !(10_000_000..=32_000_000).contains(&self.radio.reference_clock_hz) {
            return Err(invalid("reference_clock_hz must be between 10 MHz and 32 MHz"));
        }

        if self.radio.cts_poll_limit == 0 {
            return Err(invalid("cts_poll_limit must be greater than 0"));
        }

        if self.radio.state_change_timeout_ms == 0 || self.radio.state_change_timeout_ms > 10_000 {
            return Err(invalid("state_change_timeout_ms must be between 1 and 10000"));
        }

        if self.dispatcher.task_pool_size == 0 || self.dispatcher.task_pool_size > 256 {
            return Err(invalid("task_pool_size must be between 1 and 256"));
        }

        for (name, value) in [
            ("poll_interval_ms", self.dispatcher.poll_interval_ms),
            ("task_acquire_timeout_ms", self.dispatcher.task_acquire_timeout_ms),
            ("lock_timeout_ms", self.dispatcher.lock_timeout_ms),
            ("decoder_close_timeout_ms", self.dispatcher.decoder_close_timeout_ms),
            ("timeout_ms", self.transmit.timeout_ms),
            ("clear_channel_timeout_ms", self.transmit.clear_channel_timeout_ms),
        ] {
            if value == 0 || value > 60_000 {
                return Err(invalid(format!("{} must be between 1 and 60000", name)));
            }
        }

        if self.transmit.preamble_flags == 0 {
            return Err(invalid("preamble_flags must be greater than 0"));
        }

        if self.transmit.cca_window_ms == 0 {
            return Err(invalid("cca_window_ms must be greater than 0"));
        }

        if !in_band(self.transmit.frequency_hz) {
            return Err(invalid(format!(
                "frequency_hz must be between {} and {}",
                MIN_FREQUENCY_HZ, MAX_FREQUENCY_HZ
            )));
        }

        if self.transmit.power > 0x7F {
            return Err(invalid("power must be between 0 and 127"));
        }

        if self.transmit.modulation == Modulation::Fsk
            && !(1200..=100_000).contains(&self.transmit.bitrate)
        {
            return Err(invalid("bitrate must be between 1200 and 100000"));
        }

        if self.transmit.beacon_interval_s == 0 {
            return Err(invalid("beacon_interval_s must be greater than 0"));
        }

        if self.telemetry.enabled && self.telemetry.log_dir.is_empty() {
            return Err(invalid("telemetry log_dir cannot be empty when enabled"));
        }

        if self.telemetry.max_records_per_file == 0 {
            return Err(invalid("max_records_per_file must be greater than 0"));
        }

        if self.telemetry.max_files_to_keep == 0 {
            return Err(invalid("max_files_to_keep must be greater than 0"));
        }

        Ok(())
    }
}
