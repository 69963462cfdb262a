//! # Si446x Transceiver Driver
//!
//! Command/response protocol for the Si4463/Si4464 over SPI.
//!
//! This module handles:
//! - Clear-to-send handshaking and command buffer reads
//! - One-time power-up and baseline register load
//! - Band, channel step and modulation programming
//! - TX/RX state transitions and clear channel assessment
//! - TX FIFO access and the on-chip temperature sensor
//!
//! Every wait on the chip is bounded. A chip that stops answering surfaces
//! as `ChipNotReady` or `StateTimeout` instead of hanging the caller.

pub mod band;
pub mod registers;
pub mod state;

pub use state::ChipState;

use std::time::Duration;

use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::bus::SpiBus;
use crate::config::Config;
use crate::error::{RadioError, Result};
use crate::packet::{operating_frequency, Modulation};
use band::{compute_band_settings, in_band, BandSettings};
use registers::*;

/// Settle time after POWER_UP and GPIO_PIN_CFG
const POWER_UP_SETTLE: Duration = Duration::from_millis(25);

/// Interval between state polls while waiting for a transition
const STATE_POLL_INTERVAL: Duration = Duration::from_micros(500);

/// Interval between state polls while a transmission drains before RX
const TX_DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Longest wait for a running transmission to end before RX is forced
const TX_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// CCA line sample period
const CCA_SAMPLE_PERIOD: Duration = Duration::from_micros(100);

/// Chip timing and clock settings
#[derive(Debug, Clone, PartialEq)]
pub struct ChipSettings {
    /// Radio unit number (for logging)
    pub unit: u8,
    /// Crystal or TCXO frequency in Hz
    pub reference_clock_hz: u32,
    /// Reference is a TCXO rather than a crystal
    pub tcxo: bool,
    /// Clear-to-send polls before giving up
    pub cts_poll_limit: u32,
    /// Longest wait for the chip to reach a requested state
    pub state_change_timeout: Duration,
    /// CCA sampling window before transmit
    pub cca_window_ms: u16,
    /// Longest wait for a clear channel before transmitting anyway
    pub clear_channel_timeout: Duration,
}

impl Default for ChipSettings {
    fn default() -> Self {
        Self {
            unit: 0,
            reference_clock_hz: 26_000_000,
            tcxo: true,
            cts_poll_limit: 1000,
            state_change_timeout: Duration::from_millis(100),
            cca_window_ms: 50,
            clear_channel_timeout: Duration::from_secs(10),
        }
    }
}

impl ChipSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            unit: config.radio.unit,
            reference_clock_hz: config.radio.reference_clock_hz,
            tcxo: config.radio.tcxo,
            cts_poll_limit: config.radio.cts_poll_limit,
            state_change_timeout: Duration::from_millis(config.radio.state_change_timeout_ms),
            cca_window_ms: config.transmit.cca_window_ms,
            clear_channel_timeout: Duration::from_millis(config.transmit.clear_channel_timeout_ms),
        }
    }
}

/// Modem configuration selected before TX or RX
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModemScheme {
    /// Upsampled Bell 202 from the FIFO
    AfskTx,
    /// Direct mode for the software AFSK demodulator
    AfskRx,
    /// 2GFSK from the FIFO at `bitrate`
    FskTx { bitrate: u32 },
}

/// Parameters for one transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmitParams {
    pub base_frequency: u32,
    pub step_hz: u32,
    pub channel: u8,
    pub power: u8,
    /// RSSI threshold used for the clear channel check
    pub squelch: u8,
    /// Bytes the chip will send after START_TX
    pub size: usize,
}

/// Parameters for continuous reception
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveParams {
    pub base_frequency: u32,
    pub step_hz: u32,
    pub channel: u8,
    pub squelch: u8,
    pub modulation: Modulation,
}

impl ReceiveParams {
    pub fn operating_frequency(&self) -> u32 {
        operating_frequency(self.base_frequency, self.step_hz, self.channel)
    }
}

/// Carrier detect decision from a CCA sample count
///
/// Allows at most one spike per millisecond of the window.
pub fn cca_occupied(count: u32, window_ms: u32) -> bool {
    count > window_ms
}

/// Centidegrees Celsius from the 11 bit temperature ADC value
pub fn temperature_from_adc(adc: u16) -> i16 {
    ((89_900 * adc as i32) / 4096 - 29_300) as i16
}

/// One Si446x radio unit
pub struct Si446x<B: SpiBus> {
    bus: B,
    settings: ChipSettings,
    initialized: bool,
    last_state: ChipState,
    temperature: Option<i16>,
}

impl<B: SpiBus> std::fmt::Debug for Si446x<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Si446x")
            .field("unit", &self.settings.unit)
            .field("initialized", &self.initialized)
            .field("last_state", &self.last_state)
            .finish_non_exhaustive()
    }
}

impl<B: SpiBus> Si446x<B> {
    pub fn new(bus: B, settings: ChipSettings) -> Self {
        Self {
            bus,
            settings,
            initialized: false,
            last_state: ChipState::Unknown,
            temperature: None,
        }
    }

    pub fn settings(&self) -> &ChipSettings {
        &self.settings
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// State seen by the last state query
    pub fn cached_state(&self) -> ChipState {
        self.last_state
    }

    async fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<()> {
        self.bus
            .exchange(tx, rx)
            .await
            .map_err(|e| RadioError::Bus(e.to_string()))
    }

    /// Poll the command buffer until the chip raises CTS
    async fn wait_cts(&mut self) -> Result<()> {
        let poll = [CMD_READ_CMD_BUFF, 0x00];
        let mut rx = [0u8; 2];

        for _ in 0..self.settings.cts_poll_limit {
            self.exchange(&poll, &mut rx).await?;
            if rx[1] == CTS_READY {
                return Ok(());
            }
        }

        error!(
            "Radio {} not clear to send after {} polls",
            self.settings.unit, self.settings.cts_poll_limit
        );
        Err(RadioError::ChipNotReady(self.settings.cts_poll_limit))
    }

    /// Send a command, discarding the read-back
    pub async fn write(&mut self, cmd: &[u8]) -> Result<()> {
        self.wait_cts().await?;
        let mut rx = vec![0u8; cmd.len()];
        self.exchange(cmd, &mut rx).await
    }

    /// Send a command and fetch `len` response bytes
    pub async fn read(&mut self, cmd: &[u8], len: usize) -> Result<Vec<u8>> {
        self.wait_cts().await?;
        let mut rx = vec![0u8; cmd.len()];
        self.exchange(cmd, &mut rx).await?;

        let mut poll = vec![0u8; len + 2];
        poll[0] = CMD_READ_CMD_BUFF;
        let mut response = vec![0u8; len + 2];

        for _ in 0..self.settings.cts_poll_limit {
            self.exchange(&poll, &mut response).await?;
            if response[1] == CTS_READY {
                return Ok(response.split_off(2));
            }
        }

        error!(
            "Radio {} response to 0x{:02X} not ready after {} polls",
            self.settings.unit, cmd[0], self.settings.cts_poll_limit
        );
        Err(RadioError::ChipNotReady(self.settings.cts_poll_limit))
    }

    pub async fn set_property(&mut self, property: u16, values: &[u8]) -> Result<()> {
        self.write(&property_command(property, values)).await
    }

    /// Power up and load the baseline registers
    ///
    /// Only the first call after construction or [`shutdown`](Self::shutdown)
    /// touches the chip.
    pub async fn initialize_once(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        info!("Initializing radio {}", self.settings.unit);

        let clock = self.settings.reference_clock_hz.to_be_bytes();
        let power_up = [
            CMD_POWER_UP,
            0x01,
            self.settings.tcxo as u8,
            clock[0],
            clock[1],
            clock[2],
            clock[3],
        ];
        self.write(&power_up).await?;
        sleep(POWER_UP_SETTLE).await;

        self.write(&GPIO_PIN_CFG).await?;
        sleep(POWER_UP_SETTLE).await;

        if !self.settings.tcxo {
            self.set_property(GLOBAL_XO_TUNE, &[0x00]).await?;
        }

        for &(property, values) in INIT_PROPERTIES {
            self.set_property(property, values).await?;
        }

        self.reset_fifo().await?;

        for &(property, values) in MODEM_BASELINE {
            self.set_property(property, values).await?;
        }

        self.initialized = true;
        self.last_state = ChipState::Ready;
        Ok(())
    }

    /// Program band, synthesizer, channel step and AFSK deviation
    ///
    /// # Errors
    ///
    /// Returns `FrequencyOutOfRange` without any bus traffic if `freq` is
    /// outside 144 to 900 MHz
    pub async fn set_band_parameters(&mut self, freq: u32, step: u32) -> Result<BandSettings> {
        let settings = compute_band_settings(freq, step, self.settings.reference_clock_hz)?;

        self.initialize_once().await?;

        debug!(
            "Radio {} band {} outdiv {} for {} Hz (step {} Hz)",
            self.settings.unit, settings.band.code, settings.band.outdiv, freq, step
        );

        self.write(&settings.band_command()).await?;
        self.write(&settings.frequency_command()).await?;
        self.write(&settings.deviation_command()).await?;
        Ok(settings)
    }

    /// Select the modem configuration
    pub async fn set_modulation(&mut self, scheme: ModemScheme) -> Result<()> {
        match scheme {
            ModemScheme::AfskTx => {
                self.set_tx_nco().await?;
                self.set_property(MODEM_DATA_RATE, &AFSK_DATA_RATE).await?;
                self.set_property(MODEM_MOD_TYPE, &[MOD_TYPE_AFSK_TX]).await?;
                self.set_tx_filter(&AFSK_TX_FILTER).await?;
            }
            ModemScheme::AfskRx => {
                self.set_property(MODEM_MOD_TYPE, &[MOD_TYPE_AFSK_RX]).await?;
                for (i, &coefficient) in AFSK_RX_CHANNEL_FILTER.iter().enumerate() {
                    self.set_property(MODEM_CHFLT_RX1_BASE + i as u16, &[coefficient])
                        .await?;
                }
            }
            ModemScheme::FskTx { bitrate } => {
                self.set_tx_nco().await?;
                let rate = bitrate.to_be_bytes();
                self.set_property(MODEM_DATA_RATE, &rate[1..]).await?;
                self.set_property(MODEM_MOD_TYPE, &[MOD_TYPE_FSK_TX]).await?;
                self.set_tx_filter(&FSK_TX_FILTER).await?;
            }
        }
        Ok(())
    }

    async fn set_tx_nco(&mut self) -> Result<()> {
        let nco = (self.settings.reference_clock_hz / 10).to_be_bytes();
        self.set_property(MODEM_TX_NCO_MODE, &nco).await
    }

    async fn set_tx_filter(&mut self, coefficients: &[u8; 9]) -> Result<()> {
        for (i, &coefficient) in coefficients.iter().enumerate() {
            self.set_property(MODEM_TX_FILTER_COEFF_0 - i as u16, &[coefficient])
                .await?;
        }
        Ok(())
    }

    /// Query the current operating state
    pub async fn state(&mut self) -> Result<ChipState> {
        let response = self.read(&[CMD_REQUEST_DEVICE_STATE], 2).await?;
        let state = ChipState::from_code(response[0]);
        self.last_state = state;
        Ok(state)
    }

    pub async fn request_ready(&mut self) -> Result<()> {
        self.write(&[CMD_CHANGE_STATE, ChipState::Ready.code()]).await
    }

    pub async fn request_receive(&mut self, channel: u8) -> Result<()> {
        self.write(&[CMD_START_RX, channel, 0x00, 0x00, 0x00, 0x00, 0x08, 0x08])
            .await
    }

    /// START_TX returning to READY when done
    ///
    /// The length field is 13 bits wide; larger sizes are truncated.
    pub async fn request_transmit(&mut self, channel: u8, size: usize) -> Result<()> {
        if size > MAX_TX_LENGTH {
            warn!(
                "Radio {} transmit length {} exceeds the {} byte length field",
                self.settings.unit, size, MAX_TX_LENGTH
            );
        }

        self.write(&[
            CMD_START_TX,
            channel,
            ChipState::Ready.code() << 4,
            ((size >> 8) & 0x1F) as u8,
            (size & 0xFF) as u8,
        ])
        .await
    }

    pub async fn set_power(&mut self, level: u8) -> Result<()> {
        self.set_property(PA_PWR_LVL, &[level]).await
    }

    /// Wait until the chip reports `target`
    pub async fn wait_for_state(&mut self, target: ChipState, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.state().await? == target {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(RadioError::StateTimeout(target));
            }
            sleep(STATE_POLL_INTERVAL).await;
        }
    }

    /// Sample the CCA line every 100 µs for `window_ms` milliseconds
    ///
    /// # Returns
    ///
    /// * `Result<bool>` - true if the channel is occupied
    pub async fn sense_clear_channel(&mut self, window_ms: u16) -> Result<bool> {
        let samples = window_ms as u32 * 10;
        let mut ticker = interval(CCA_SAMPLE_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

        let mut count = 0u32;
        for _ in 0..samples {
            ticker.tick().await;
            if self
                .bus
                .read_cca()
                .await
                .map_err(|e| RadioError::Bus(e.to_string()))?
            {
                count += 1;
            }
        }

        let occupied = cca_occupied(count, window_ms as u32);
        debug!(
            "Radio {} CCA {} of {} samples, occupied={}",
            self.settings.unit, count, samples, occupied
        );
        Ok(occupied)
    }

    /// Free space in the TX FIFO
    pub async fn free_fifo(&mut self) -> Result<u8> {
        let response = self.read(&[CMD_FIFO_INFO, 0x00], 2).await?;
        Ok(response[1])
    }

    /// Append bytes to the TX FIFO
    pub async fn write_fifo(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let mut cmd = Vec::with_capacity(data.len() + 1);
        cmd.push(CMD_WRITE_TX_FIFO);
        cmd.extend_from_slice(data);
        self.write(&cmd).await
    }

    pub async fn reset_fifo(&mut self) -> Result<()> {
        self.write(&[CMD_FIFO_INFO, FIFO_RESET_TX]).await
    }

    /// Chip temperature in centidegrees Celsius
    ///
    /// Measured once per power session. Returns `None` if the chip has not
    /// been initialised.
    pub async fn temperature(&mut self) -> Result<Option<i16>> {
        if let Some(temperature) = self.temperature {
            return Ok(Some(temperature));
        }

        if !self.initialized {
            info!("Radio {} temperature not available", self.settings.unit);
            return Ok(None);
        }

        let response = self.read(&[CMD_GET_ADC_READING, ADC_TEMPERATURE], 6).await?;
        let adc = response[5] as u16 | (((response[4] & 0x07) as u16) << 8);
        let temperature = temperature_from_adc(adc);

        info!(
            "Radio {} temperature {}.{:02} degC",
            self.settings.unit,
            temperature / 100,
            (temperature % 100).abs()
        );
        self.temperature = Some(temperature);
        Ok(Some(temperature))
    }

    /// Tune, wait for a clear channel and enter TX
    ///
    /// The FIFO should already hold the first part of the stream.
    ///
    /// # Errors
    ///
    /// Returns `FrequencyOutOfRange` for an operating frequency outside the
    /// bands, or `StateTimeout` if the chip never reports TX (the chip is
    /// put back to READY first)
    pub async fn start_transmit(&mut self, params: &TransmitParams) -> Result<()> {
        let op_freq = operating_frequency(params.base_frequency, params.step_hz, params.channel);
        if !in_band(op_freq) {
            error!(
                "Radio {} frequency {} Hz out of range, abort transmission",
                self.settings.unit, op_freq
            );
            return Err(RadioError::FrequencyOutOfRange(op_freq));
        }

        if self.state().await? == ChipState::Rx {
            debug!("Radio {} switching to ready state", self.settings.unit);
            self.request_ready().await?;
            sleep(Duration::from_millis(1)).await;
        }

        self.set_property(MODEM_RSSI_THRESH, &[params.squelch]).await?;
        self.set_band_parameters(params.base_frequency, params.step_hz)
            .await?;

        // Listen on the transmit channel for carrier
        self.request_receive(params.channel).await?;

        let deadline = Instant::now() + self.settings.clear_channel_timeout;
        let window = self.settings.cca_window_ms;
        let mut waited = false;
        loop {
            let listening = self.state().await? == ChipState::Rx;
            if listening && !self.sense_clear_channel(window).await? {
                break;
            }
            if !waited {
                info!(
                    "Radio {} waiting for clear channel on {}.{:03} MHz",
                    self.settings.unit,
                    op_freq / 1_000_000,
                    (op_freq % 1_000_000) / 1_000
                );
                waited = true;
            }
            if Instant::now() >= deadline {
                warn!(
                    "Radio {} channel not clear after {:?}, transmitting anyway",
                    self.settings.unit, self.settings.clear_channel_timeout
                );
                break;
            }
            sleep(CCA_SAMPLE_PERIOD).await;
        }

        debug!("Radio {} tune (TX)", self.settings.unit);
        self.request_ready().await?;
        self.set_power(params.power).await?;
        self.request_transmit(params.channel, params.size).await?;

        if let Err(e) = self
            .wait_for_state(ChipState::Tx, self.settings.state_change_timeout)
            .await
        {
            error!("Radio {} did not enter TX: {}", self.settings.unit, e);
            self.request_ready().await?;
            return Err(e);
        }
        Ok(())
    }

    /// Tune and enter continuous AFSK reception
    ///
    /// # Errors
    ///
    /// Returns `FrequencyOutOfRange`, `UnsupportedModulation` for anything
    /// other than AFSK, or `StateTimeout` if RX is never reported
    pub async fn start_receive(&mut self, params: &ReceiveParams) -> Result<()> {
        let op_freq = params.operating_frequency();
        if !in_band(op_freq) {
            error!(
                "Radio {} frequency {} Hz out of range, abort reception",
                self.settings.unit, op_freq
            );
            return Err(RadioError::FrequencyOutOfRange(op_freq));
        }

        let drain_deadline = Instant::now() + TX_DRAIN_TIMEOUT;
        while self.state().await? == ChipState::Tx {
            if Instant::now() >= drain_deadline {
                error!(
                    "Radio {} timeout waiting for TX state end, forcing ready",
                    self.settings.unit
                );
                self.request_ready().await?;
                break;
            }
            sleep(TX_DRAIN_POLL_INTERVAL).await;
        }

        if params.modulation != Modulation::Afsk {
            error!(
                "Radio {} modulation {:?} not supported in receive",
                self.settings.unit, params.modulation
            );
            return Err(RadioError::UnsupportedModulation(params.modulation));
        }

        info!(
            "Radio {} enable reception {}.{:03} MHz (ch {}), RSSI {}",
            self.settings.unit,
            op_freq / 1_000_000,
            (op_freq % 1_000_000) / 1_000,
            params.channel,
            params.squelch
        );

        self.set_band_parameters(params.base_frequency, params.step_hz)
            .await?;
        self.set_modulation(ModemScheme::AfskRx).await?;
        self.set_property(MODEM_RSSI_THRESH, &[params.squelch]).await?;
        self.request_receive(params.channel).await?;
        self.wait_for_state(ChipState::Rx, self.settings.state_change_timeout)
            .await
    }

    /// Leave RX for READY if currently receiving
    pub async fn pause_receive(&mut self) -> Result<()> {
        if self.state().await? != ChipState::Rx {
            return Ok(());
        }

        self.request_ready().await?;
        let deadline = Instant::now() + self.settings.state_change_timeout;
        while self.state().await? == ChipState::Rx {
            if Instant::now() >= deadline {
                return Err(RadioError::StateTimeout(ChipState::Ready));
            }
            sleep(STATE_POLL_INTERVAL).await;
        }
        Ok(())
    }

    /// Mark the chip powered down
    ///
    /// The next operation repeats the power-up sequence and the temperature
    /// is measured again.
    pub fn shutdown(&mut self) {
        info!("Shutdown radio {}", self.settings.unit);
        self.initialized = false;
        self.temperature = None;
        self.last_state = ChipState::Unknown;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SimulatedChip;

    fn radio() -> (Si446x<SimulatedChip>, SimulatedChip) {
        let chip = SimulatedChip::new();
        (Si446x::new(chip.clone(), ChipSettings::default()), chip)
    }

    fn tx_params(size: usize) -> TransmitParams {
        TransmitParams {
            base_frequency: 144_800_000,
            step_hz: 12_500,
            channel: 0,
            power: 0x7F,
            squelch: 0x4F,
            size,
        }
    }

    fn rx_params(modulation: Modulation) -> ReceiveParams {
        ReceiveParams {
            base_frequency: 144_800_000,
            step_hz: 12_500,
            channel: 0,
            squelch: 0x4F,
            modulation,
        }
    }

    #[test]
    fn test_cca_heuristic() {
        assert!(!cca_occupied(0, 50));
        assert!(!cca_occupied(50, 50));
        assert!(cca_occupied(51, 50));
    }

    #[test]
    fn test_temperature_formula() {
        assert_eq!(temperature_from_adc(0), -29_300);
        // 89900 * 1400 / 4096 = 30727
        assert_eq!(temperature_from_adc(1400), 1_427);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_once_is_idempotent() {
        let (mut radio, chip) = radio();
        radio.initialize_once().await.unwrap();
        let after_first = chip.commands().len();
        assert!(radio.is_initialized());

        radio.initialize_once().await.unwrap();
        assert_eq!(chip.commands().len(), after_first);

        let commands = chip.commands();
        assert_eq!(commands[0], vec![0x02, 0x01, 0x01, 0x01, 0x8C, 0xBA, 0x80]);
        assert_eq!(commands[1], GPIO_PIN_CFG.to_vec());
        assert_eq!(chip.property(GLOBAL_CONFIG), Some(0x70));
    }

    #[tokio::test(start_paused = true)]
    async fn test_crystal_reference_tunes_xo() {
        let chip = SimulatedChip::new();
        let settings = ChipSettings {
            tcxo: false,
            ..ChipSettings::default()
        };
        let mut radio = Si446x::new(chip.clone(), settings);
        radio.initialize_once().await.unwrap();

        assert_eq!(chip.commands()[0][2], 0x00);
        assert_eq!(chip.property(GLOBAL_XO_TUNE), Some(0x00));
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_band_writes_nothing() {
        let (mut radio, chip) = radio();

        for freq in [143_999_999, 900_000_001] {
            match radio.set_band_parameters(freq, 12_500).await {
                Err(RadioError::FrequencyOutOfRange(f)) => assert_eq!(f, freq),
                other => panic!("Expected FrequencyOutOfRange, got: {:?}", other),
            }
        }
        assert!(chip.commands().is_empty());
        assert!(!radio.is_initialized());
    }

    #[tokio::test(start_paused = true)]
    async fn test_band_parameters_written() {
        let (mut radio, chip) = radio();
        radio.set_band_parameters(144_800_000, 12_500).await.unwrap();

        assert_eq!(chip.property(MODEM_CLKGEN_BAND), Some(0x0D));
        assert_eq!(chip.property(FREQ_CONTROL_INTE), Some(65));
        assert_eq!(chip.property(FREQ_CONTROL_FRAC), Some(14));
        assert_eq!(chip.property(FREQ_CONTROL_FRAC + 1), Some(165));
        assert_eq!(chip.property(FREQ_CONTROL_FRAC + 2), Some(117));
        assert_eq!(chip.property(FREQ_CONTROL_CHANNEL_STEP_SIZE), Some(0x0B));
        assert_eq!(chip.property(FREQ_CONTROL_CHANNEL_STEP_SIZE + 1), Some(0xD0));
        assert_eq!(chip.property(MODEM_FREQ_DEV + 2), Some(0x74));
    }

    #[tokio::test(start_paused = true)]
    async fn test_modulation_last_write_wins() {
        let (mut radio, chip) = radio();
        radio.initialize_once().await.unwrap();

        radio.set_modulation(ModemScheme::AfskTx).await.unwrap();
        assert_eq!(chip.property(MODEM_MOD_TYPE), Some(MOD_TYPE_AFSK_TX));
        assert_eq!(chip.property(MODEM_DATA_RATE + 1), Some(0x33));
        assert_eq!(chip.property(MODEM_TX_FILTER_COEFF_0), Some(0x81));
        assert_eq!(chip.property(0x200F), Some(0x76));

        radio
            .set_modulation(ModemScheme::FskTx { bitrate: 9600 })
            .await
            .unwrap();
        assert_eq!(chip.property(MODEM_MOD_TYPE), Some(MOD_TYPE_FSK_TX));
        assert_eq!(chip.property(MODEM_DATA_RATE), Some(0x00));
        assert_eq!(chip.property(MODEM_DATA_RATE + 1), Some(0x25));
        assert_eq!(chip.property(MODEM_DATA_RATE + 2), Some(0x80));
        assert_eq!(chip.property(MODEM_TX_FILTER_COEFF_0), Some(0x01));

        radio.set_modulation(ModemScheme::AfskRx).await.unwrap();
        assert_eq!(chip.property(MODEM_MOD_TYPE), Some(MOD_TYPE_AFSK_RX));
        assert_eq!(chip.property(MODEM_CHFLT_RX1_BASE), Some(0xFF));
        assert_eq!(chip.property(MODEM_CHFLT_RX1_BASE + 14), Some(0x15));

        // NCO is the reference divided by ten
        assert_eq!(chip.property(MODEM_TX_NCO_MODE + 1), Some(0x27));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_cts_is_reported() {
        let chip = SimulatedChip::new();
        chip.set_cts_stuck(true);
        let settings = ChipSettings {
            cts_poll_limit: 5,
            ..ChipSettings::default()
        };
        let mut radio = Si446x::new(chip, settings);

        match radio.state().await {
            Err(RadioError::ChipNotReady(polls)) => assert_eq!(polls, 5),
            other => panic!("Expected ChipNotReady, got: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_cts_is_tolerated() {
        let (mut radio, chip) = radio();
        chip.set_cts_busy_polls(3);
        assert_eq!(radio.state().await.unwrap(), ChipState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bus_error_is_mapped() {
        let (mut radio, chip) = radio();
        chip.set_bus_error(std::io::ErrorKind::BrokenPipe);
        assert!(matches!(radio.state().await, Err(RadioError::Bus(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_primitives() {
        let (mut radio, chip) = radio();
        radio.initialize_once().await.unwrap();

        assert_eq!(radio.free_fifo().await.unwrap(), 64);
        radio.write_fifo(&[0xAA; 20]).await.unwrap();
        assert_eq!(radio.free_fifo().await.unwrap(), 44);
        radio.reset_fifo().await.unwrap();
        assert_eq!(radio.free_fifo().await.unwrap(), 64);

        let before = chip.commands().len();
        radio.write_fifo(&[]).await.unwrap();
        assert_eq!(chip.commands().len(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_temperature_cached_until_shutdown() {
        let (mut radio, chip) = radio();
        assert_eq!(radio.temperature().await.unwrap(), None);

        chip.set_temperature_adc(1400);
        radio.initialize_once().await.unwrap();
        assert_eq!(radio.temperature().await.unwrap(), Some(1_427));

        chip.set_temperature_adc(0);
        assert_eq!(radio.temperature().await.unwrap(), Some(1_427));

        radio.shutdown();
        assert_eq!(radio.temperature().await.unwrap(), None);
        radio.initialize_once().await.unwrap();
        assert_eq!(radio.temperature().await.unwrap(), Some(-29_300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_channel_sampling() {
        let (mut radio, chip) = radio();
        assert!(!radio.sense_clear_channel(5).await.unwrap());
        chip.set_cca_busy(true);
        assert!(radio.sense_clear_channel(5).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_transmit_sequence() {
        let (mut radio, chip) = radio();
        radio.initialize_once().await.unwrap();
        chip.clear_commands();

        radio.start_transmit(&tx_params(300)).await.unwrap();

        let opcodes = chip.opcodes();
        let rx = opcodes.iter().position(|&op| op == CMD_START_RX).unwrap();
        let tx = opcodes.iter().position(|&op| op == CMD_START_TX).unwrap();
        assert!(rx < tx);
        assert_eq!(chip.state(), ChipState::Tx);
        assert_eq!(chip.property(PA_PWR_LVL), Some(0x7F));
        assert_eq!(chip.property(MODEM_RSSI_THRESH), Some(0x4F));

        let start_tx = chip
            .commands()
            .into_iter()
            .find(|cmd| cmd[0] == CMD_START_TX)
            .unwrap();
        assert_eq!(start_tx, vec![0x31, 0x00, 0x30, 0x01, 0x2C]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_transmit_rejects_out_of_band_channel() {
        let (mut radio, chip) = radio();
        let params = TransmitParams {
            base_frequency: 899_990_000,
            step_hz: 25_000,
            channel: 1,
            ..tx_params(10)
        };

        assert!(matches!(
            radio.start_transmit(&params).await,
            Err(RadioError::FrequencyOutOfRange(900_015_000))
        ));
        assert!(chip.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_channel_transmits_after_timeout() {
        let chip = SimulatedChip::new();
        chip.set_cca_busy(true);
        let settings = ChipSettings {
            cca_window_ms: 5,
            clear_channel_timeout: Duration::from_millis(100),
            ..ChipSettings::default()
        };
        let mut radio = Si446x::new(chip.clone(), settings);

        let start = Instant::now();
        radio.start_transmit(&tx_params(100)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(chip.state(), ChipState::Tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_start_tx_returns_to_ready() {
        let (mut radio, chip) = radio();
        chip.set_reject_tx(true);

        assert!(matches!(
            radio.start_transmit(&tx_params(100)).await,
            Err(RadioError::StateTimeout(ChipState::Tx))
        ));
        assert_eq!(chip.state(), ChipState::Ready);
        assert_eq!(chip.opcodes().last(), Some(&CMD_CHANGE_STATE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_receive_requires_afsk() {
        let (mut radio, _chip) = radio();
        assert!(matches!(
            radio.start_receive(&rx_params(Modulation::Fsk)).await,
            Err(RadioError::UnsupportedModulation(Modulation::Fsk))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_then_pause() {
        let (mut radio, chip) = radio();
        radio.start_receive(&rx_params(Modulation::Afsk)).await.unwrap();
        assert_eq!(chip.state(), ChipState::Rx);
        assert_eq!(chip.property(MODEM_MOD_TYPE), Some(MOD_TYPE_AFSK_RX));

        radio.pause_receive().await.unwrap();
        assert_eq!(chip.state(), ChipState::Ready);

        // Not receiving: nothing to do
        chip.clear_commands();
        radio.pause_receive().await.unwrap();
        assert!(!chip.opcodes().contains(&CMD_CHANGE_STATE));
    }
}
