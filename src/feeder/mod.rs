//! # FIFO Feeder
//!
//! One feeder task runs per transmission. It owns the radio for the whole
//! transmission and keeps the 64 byte TX FIFO topped up from the encoded
//! bitstream (through the upsampler for AFSK) until the stream is sent or
//! the transmit deadline expires.
//!
//! ```text
//! lock -> init -> pause RX -> band -> modem -> size -> encode
//!      -> reset FIFO -> initial fill -> START_TX -> feed loop -> wait TX end
//! ```

pub mod source;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::bus::SpiBus;
use crate::config::Config;
use crate::error::{RadioError, Result};
use crate::modem::encoder::{BitstreamEncoder, EncoderConfig};
use crate::packet::{Frame, Modulation};
use crate::si446x::{ChipState, ModemScheme, Si446x, TransmitParams};
use source::{AfskSource, FifoSource, FskSource};

/// A radio shared between the dispatcher and its feeder tasks
pub type SharedRadio<B> = Arc<Mutex<Si446x<B>>>;

/// Largest FIFO write the feeder issues in one go
const MAX_CHUNK: usize = 256;

/// How a transmission ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TxOutcome {
    /// Whole stream handed to the chip and TX finished
    Sent,
    /// The frame encoded to nothing
    NoData,
    /// Deadline expired; the chip was forced to READY
    Timeout,
    /// Frequency outside the bands or modulation not transmittable
    Rejected,
    /// Chip or bus failure
    Failed,
    /// The radio stayed locked by someone else
    LockTimeout,
}

/// Summary of one transmission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxReport {
    pub sequence: u32,
    pub modulation: Modulation,
    pub outcome: TxOutcome,
    /// Bytes produced by the encoder
    pub encoded_bytes: usize,
    /// Bytes the FIFO had to carry (upsampled for AFSK)
    pub fifo_bytes: usize,
    /// Lowest free FIFO space seen while feeding
    pub fifo_low_water: Option<u8>,
}

impl TxReport {
    fn new(sequence: u32, modulation: Modulation) -> Self {
        Self {
            sequence,
            modulation,
            outcome: TxOutcome::Failed,
            encoded_bytes: 0,
            fifo_bytes: 0,
            fifo_low_water: None,
        }
    }
}

/// Everything a feeder needs about the frame and the channel
#[derive(Debug, Clone)]
pub struct TransmitJob {
    pub sequence: u32,
    pub modulation: Modulation,
    pub base_frequency: u32,
    pub step_hz: u32,
    pub channel: u8,
    pub power: u8,
    pub squelch: u8,
    pub bitrate: u32,
    pub frame: Frame,
}

/// Feeder timing and framing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeederSettings {
    /// Longest wait to take ownership of the radio
    pub lock_timeout: Duration,
    /// Transmit deadline, armed before START_TX
    pub transmit_timeout: Duration,
    /// Flag and tail counts (scrambling is chosen per modulation)
    pub encoder: EncoderConfig,
}

impl Default for FeederSettings {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(15),
            transmit_timeout: Duration::from_secs(10),
            encoder: EncoderConfig::default(),
        }
    }
}

impl FeederSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            lock_timeout: Duration::from_millis(config.dispatcher.lock_timeout_ms),
            transmit_timeout: Duration::from_millis(config.transmit.timeout_ms),
            encoder: EncoderConfig {
                preamble_flags: config.transmit.preamble_flags,
                postamble_flags: config.transmit.postamble_flags,
                tail_bytes: config.transmit.tail_bytes,
                scramble: false,
            },
        }
    }
}

/// Start a feeder task for one transmission
pub fn spawn_feeder<B>(
    radio: SharedRadio<B>,
    job: TransmitJob,
    settings: FeederSettings,
) -> JoinHandle<TxReport>
where
    B: SpiBus + 'static,
{
    tokio::spawn(run_feeder(radio, job, settings))
}

/// Run one transmission to completion
///
/// Never fails: every problem ends up in the report's outcome.
pub async fn run_feeder<B: SpiBus>(
    radio: SharedRadio<B>,
    job: TransmitJob,
    settings: FeederSettings,
) -> TxReport {
    let mut report = TxReport::new(job.sequence, job.modulation);

    let mut chip = match timeout(settings.lock_timeout, radio.lock_owned()).await {
        Ok(guard) => guard,
        Err(_) => {
            error!(
                "TX {:03} could not acquire radio within {:?}",
                job.sequence, settings.lock_timeout
            );
            report.outcome = TxOutcome::LockTimeout;
            return report;
        }
    };

    report.outcome = match transmit(&mut chip, &job, &settings, &mut report).await {
        Ok(outcome) => outcome,
        Err(e @ RadioError::FrequencyOutOfRange(_))
        | Err(e @ RadioError::UnsupportedModulation(_)) => {
            error!("TX {:03} rejected: {}", job.sequence, e);
            TxOutcome::Rejected
        }
        Err(e) => {
            error!("TX {:03} failed: {}", job.sequence, e);
            if let Err(e) = chip.request_ready().await {
                warn!("TX {:03} could not return radio to ready: {}", job.sequence, e);
            }
            TxOutcome::Failed
        }
    };

    info!(
        "TX {:03} {:?} {:?}: {} encoded, {} FIFO bytes, lowest free FIFO {:?}",
        report.sequence,
        report.modulation,
        report.outcome,
        report.encoded_bytes,
        report.fifo_bytes,
        report.fifo_low_water
    );
    report
}

async fn transmit<B: SpiBus>(
    chip: &mut Si446x<B>,
    job: &TransmitJob,
    settings: &FeederSettings,
    report: &mut TxReport,
) -> Result<TxOutcome> {
    let (scheme, scramble) = match job.modulation {
        Modulation::Afsk => (ModemScheme::AfskTx, false),
        Modulation::Fsk => (ModemScheme::FskTx { bitrate: job.bitrate }, true),
        Modulation::NotSet => return Err(RadioError::UnsupportedModulation(job.modulation)),
    };

    chip.initialize_once().await?;
    chip.set_band_parameters(job.base_frequency, job.step_hz)
        .await?;
    chip.pause_receive().await?;
    chip.set_modulation(scheme).await?;

    let encoder = BitstreamEncoder::new(EncoderConfig {
        scramble,
        ..settings.encoder
    });
    let frame = job.frame.as_bytes();
    let size = encoder.size_only(frame);
    debug!("TX {:03} packet stream bytes {}", job.sequence, size);

    if size == 0 {
        debug!("TX {:03} no data encoded", job.sequence);
        return Ok(TxOutcome::NoData);
    }

    let mut encoded = vec![0u8; size];
    encoder.encode(frame, &mut encoded)?;
    report.encoded_bytes = size;

    let mut source: Box<dyn FifoSource> = match job.modulation {
        Modulation::Fsk => Box::new(FskSource::new(encoded, job.bitrate)),
        _ => Box::new(AfskSource::new(encoded)),
    };
    let total = source.total();
    report.fifo_bytes = total;

    chip.reset_fifo().await?;
    let free = chip.free_fifo().await? as usize;

    let mut chunk = [0u8; MAX_CHUNK];
    let mut sent = free.min(total).min(MAX_CHUNK);
    source.pull(&mut chunk[..sent]);
    chip.write_fifo(&chunk[..sent]).await?;

    let deadline = sleep(settings.transmit_timeout);
    tokio::pin!(deadline);

    let params = TransmitParams {
        base_frequency: job.base_frequency,
        step_hz: job.step_hz,
        channel: job.channel,
        power: job.power,
        squelch: job.squelch,
        size: total,
    };
    chip.start_transmit(&params).await?;

    let interval = source.feed_interval();
    let mut low_water: Option<u8> = None;

    while sent < total {
        let free = chip.free_fifo().await?;
        low_water = Some(low_water.map_or(free, |low| low.min(free)));
        report.fifo_low_water = low_water;

        let more = (free as usize).min(total - sent).min(MAX_CHUNK);
        if more > 0 {
            source.pull(&mut chunk[..more]);
            chip.write_fifo(&chunk[..more]).await?;
            sent += more;
        }

        tokio::select! {
            biased;
            _ = &mut deadline => {
                warn!(
                    "TX {:03} timed out with {} of {} FIFO bytes written",
                    job.sequence, sent, total
                );
                chip.request_ready().await?;
                return Ok(TxOutcome::Timeout);
            }
            _ = sleep(interval) => {}
        }
    }

    // Everything is in the FIFO; wait for the chip to finish sending it
    while chip.state().await? == ChipState::Tx {
        tokio::select! {
            biased;
            _ = &mut deadline => {
                warn!("TX {:03} timed out waiting for TX to end", job.sequence);
                chip.request_ready().await?;
                return Ok(TxOutcome::Timeout);
            }
            _ = sleep(interval) => {}
        }
    }

    Ok(TxOutcome::Sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SimulatedChip;
    use crate::si446x::registers::{
        CMD_CHANGE_STATE, CMD_SET_PROPERTY, CMD_START_TX, MOD_TYPE_FSK_TX, MODEM_CLKGEN_BAND,
        MODEM_MOD_TYPE,
    };
    use crate::si446x::{ChipSettings, ReceiveParams};
    use tokio::time::Instant;

    fn shared(chip: &SimulatedChip) -> SharedRadio<SimulatedChip> {
        Arc::new(Mutex::new(Si446x::new(chip.clone(), ChipSettings::default())))
    }

    fn job(modulation: Modulation, frame: &'static [u8]) -> TransmitJob {
        TransmitJob {
            sequence: 7,
            modulation,
            base_frequency: 144_800_000,
            step_hz: 12_500,
            channel: 0,
            power: 0x7F,
            squelch: 0x4F,
            bitrate: 9600,
            frame: Frame::new(frame).unwrap(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_afsk_transmission_completes() {
        let chip = SimulatedChip::new();
        let report = run_feeder(
            shared(&chip),
            job(Modulation::Afsk, b"WIDE1-1 test payload"),
            FeederSettings::default(),
        )
        .await;

        assert_eq!(report.outcome, TxOutcome::Sent);
        assert_eq!(report.sequence, 7);
        assert_eq!(report.fifo_bytes, report.encoded_bytes * 11);
        assert_eq!(chip.bytes_written(), report.fifo_bytes);
        assert_eq!(chip.tx_length(), report.fifo_bytes);
        assert!(!chip.overflowed());
        assert!(report.fifo_low_water.unwrap() <= 64);
        assert_eq!(chip.state(), ChipState::Ready);
    }

    async fn receiving(chip: &SimulatedChip) -> SharedRadio<SimulatedChip> {
        let radio = shared(chip);
        radio
            .lock()
            .await
            .start_receive(&ReceiveParams {
                base_frequency: 144_800_000,
                step_hz: 12_500,
                channel: 0,
                squelch: 0x4F,
                modulation: Modulation::Afsk,
            })
            .await
            .unwrap();
        assert_eq!(chip.state(), ChipState::Rx);
        chip.clear_commands();
        radio
    }

    #[tokio::test(start_paused = true)]
    async fn test_band_programmed_before_leaving_receive() {
        let chip = SimulatedChip::new();
        let radio = receiving(&chip).await;

        let report = run_feeder(
            radio,
            job(Modulation::Afsk, b"band first"),
            FeederSettings::default(),
        )
        .await;
        assert_eq!(report.outcome, TxOutcome::Sent);

        let [group, index] = MODEM_CLKGEN_BAND.to_be_bytes();
        let commands = chip.commands();
        let band = commands
            .iter()
            .position(|cmd| cmd[0] == CMD_SET_PROPERTY && cmd[1] == group && cmd[3] == index)
            .unwrap();
        let ready = commands.iter().position(|cmd| cmd[0] == CMD_CHANGE_STATE).unwrap();
        assert!(band < ready, "band at {}, ready at {}", band, ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_band_keeps_receiving() {
        let chip = SimulatedChip::new();
        let radio = receiving(&chip).await;

        let mut far = job(Modulation::Afsk, b"nowhere");
        far.base_frequency = 100_000_000;
        let report = run_feeder(radio, far, FeederSettings::default()).await;

        assert_eq!(report.outcome, TxOutcome::Rejected);
        assert_eq!(chip.state(), ChipState::Rx);
        assert!(!chip.opcodes().contains(&CMD_CHANGE_STATE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fsk_transmission_writes_raw_stream() {
        let chip = SimulatedChip::new();
        let report = run_feeder(
            shared(&chip),
            job(Modulation::Fsk, b"9600 baud G3RUH frame"),
            FeederSettings::default(),
        )
        .await;

        assert_eq!(report.outcome, TxOutcome::Sent);
        assert_eq!(report.fifo_bytes, report.encoded_bytes);
        assert_eq!(chip.bytes_written(), report.encoded_bytes);
        assert_eq!(chip.property(MODEM_MOD_TYPE), Some(MOD_TYPE_FSK_TX));
        assert!(!chip.overflowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_frame_is_no_data() {
        let chip = SimulatedChip::new();
        let mut empty = job(Modulation::Afsk, b"");
        empty.frame = Frame::empty();

        let report = run_feeder(shared(&chip), empty, FeederSettings::default()).await;

        assert_eq!(report.outcome, TxOutcome::NoData);
        assert_eq!(report.encoded_bytes, 0);
        assert!(!chip.opcodes().contains(&CMD_START_TX));
        assert_eq!(chip.bytes_written(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_starved_fifo_times_out() {
        let chip = SimulatedChip::new();
        chip.set_fifo_free_override(Some(0));

        let start = Instant::now();
        let report = run_feeder(
            shared(&chip),
            job(Modulation::Afsk, b"never leaves the radio"),
            FeederSettings::default(),
        )
        .await;
        let elapsed = start.elapsed();

        assert_eq!(report.outcome, TxOutcome::Timeout);
        assert!(elapsed >= Duration::from_secs(10), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(11), "elapsed {:?}", elapsed);
        assert_eq!(report.fifo_low_water, Some(0));

        let opcodes = chip.opcodes();
        assert!(opcodes.contains(&CMD_START_TX));
        assert_eq!(opcodes.last(), Some(&CMD_CHANGE_STATE));
        assert_eq!(chip.state(), ChipState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_timeout() {
        let chip = SimulatedChip::new();
        let radio = shared(&chip);
        let _held = radio.clone().lock_owned().await;

        let settings = FeederSettings {
            lock_timeout: Duration::from_millis(100),
            ..FeederSettings::default()
        };
        let report = run_feeder(radio.clone(), job(Modulation::Afsk, b"x"), settings).await;

        assert_eq!(report.outcome, TxOutcome::LockTimeout);
        assert!(chip.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_band_is_rejected() {
        let chip = SimulatedChip::new();
        let mut low = job(Modulation::Afsk, b"too low");
        low.base_frequency = 50_000_000;

        let report = run_feeder(shared(&chip), low, FeederSettings::default()).await;

        assert_eq!(report.outcome, TxOutcome::Rejected);
        assert!(!chip.opcodes().contains(&CMD_START_TX));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unset_modulation_is_rejected() {
        let chip = SimulatedChip::new();
        let report = run_feeder(
            shared(&chip),
            job(Modulation::NotSet, b"frame"),
            FeederSettings::default(),
        )
        .await;

        assert_eq!(report.outcome, TxOutcome::Rejected);
        assert!(chip.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_chip_refusing_tx_fails() {
        let chip = SimulatedChip::new();
        chip.set_reject_tx(true);

        let report = run_feeder(
            shared(&chip),
            job(Modulation::Afsk, b"refused"),
            FeederSettings::default(),
        )
        .await;

        assert_eq!(report.outcome, TxOutcome::Failed);
        assert_eq!(chip.state(), ChipState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_feeder_reports_through_handle() {
        let chip = SimulatedChip::new();
        let handle = spawn_feeder(
            shared(&chip),
            job(Modulation::Fsk, b"spawned"),
            FeederSettings::default(),
        );

        let report = handle.await.unwrap();
        assert_eq!(report.outcome, TxOutcome::Sent);
    }
}
