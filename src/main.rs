//! # Radio Bench
//!
//! Runs the radio dispatcher and transceiver engine against the simulated
//! Si446x and sends a periodic APRS status beacon.
//!
//! Usage: `radio-bench [config.toml]`

use anyhow::{Context, Result};
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use aprs_radio::bus::SimulatedChip;
use aprs_radio::config::Config;
use aprs_radio::dispatcher::{NoDecoderServices, RadioManager, RadioTask, TaskResult};
use aprs_radio::packet::{Frame, Modulation};
use aprs_radio::si446x::{ChipSettings, ReceiveParams, Si446x};
use aprs_radio::telemetry::TelemetryLogger;

/// AX.25 UI control field
const AX25_CONTROL_UI: u8 = 0x03;

/// AX.25 "no layer 3" protocol identifier
const AX25_PID_NONE: u8 = 0xF0;

/// Encode one AX.25 address field (callsign shifted left, SSID byte last)
fn encode_address(call: &str, ssid: u8, last: bool) -> [u8; 7] {
    let mut field = [b' ' << 1; 7];
    for (slot, byte) in field.iter_mut().zip(call.bytes().take(6)) {
        *slot = byte.to_ascii_uppercase() << 1;
    }
    field[6] = 0x60 | ((ssid & 0x0F) << 1) | u8::from(last);
    field
}

/// Build an APRS status frame from `source` to APRS
fn beacon_frame(source: &str, sequence: u32) -> aprs_radio::error::Result<Frame> {
    let mut bytes = Vec::with_capacity(64);
    bytes.extend_from_slice(&encode_address("APRS", 0, false));
    bytes.extend_from_slice(&encode_address(source, 0, true));
    bytes.push(AX25_CONTROL_UI);
    bytes.push(AX25_PID_NONE);
    bytes.extend_from_slice(format!(">radio-bench beacon {}", sequence).as_bytes());
    Frame::new(bytes)
}

fn init_logging(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));

    let (file_layer, guard) = match &config.logging.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "radio-bench.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    guard
}

/// Main entry point for the radio bench
///
/// # Control Flow
///
/// 1. Load configuration (defaults when no path is given) and set up logging
/// 2. Start the dispatcher for the simulated radio and OPEN it
/// 3. Start AFSK reception when configured for AFSK
/// 4. Send a beacon every `beacon_interval_s` until Ctrl+C
/// 5. CLOSE the radio and stop the dispatcher
///
/// # Errors
///
/// Returns error if the configuration cannot be loaded or the radio
/// cannot be opened
#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(&path).with_context(|| format!("loading {}", path))?,
        None => Config::default(),
    };
    let _log_guard = init_logging(&config);

    info!("Radio bench v{} starting...", env!("CARGO_PKG_VERSION"));

    let mut telemetry = if config.telemetry.enabled {
        match TelemetryLogger::new(&config.telemetry, config.radio.unit) {
            Ok(logger) => Some(logger),
            Err(e) => {
                warn!("Telemetry disabled: {}", e);
                None
            }
        }
    } else {
        None
    };

    let chip = Si446x::new(SimulatedChip::new(), ChipSettings::from_config(&config));
    let (handle, dispatcher) = RadioManager::spawn(chip, Box::new(NoDecoderServices), &config);
    let wait = Duration::from_millis(config.dispatcher.task_acquire_timeout_ms);
    let tx = &config.transmit;

    let opened = handle.request(RadioTask::open(tx.modulation), wait).await?;
    if opened.result() != Some(TaskResult::Ok) {
        handle.terminate();
        anyhow::bail!("radio {} failed to open: {:?}", config.radio.unit, opened.result());
    }

    if let Some(temperature) = handle.temperature().await? {
        info!("Radio temperature {}.{:02} degC", temperature / 100, (temperature % 100).abs());
    }

    if tx.modulation == Modulation::Afsk {
        let rx = RadioTask::start_receive(ReceiveParams {
            base_frequency: tx.frequency_hz,
            step_hz: tx.step_hz,
            channel: tx.channel,
            squelch: tx.squelch,
            modulation: Modulation::Afsk,
        });
        let outcome = handle.request(rx, wait).await?;
        info!("Reception start: {:?}", outcome.result());
    }

    let mut beacon = interval(Duration::from_secs(tx.beacon_interval_s));
    let mut sequence: u32 = 0;

    info!("Beacon every {} s, press Ctrl+C to exit", tx.beacon_interval_s);

    loop {
        tokio::select! {
            _ = beacon.tick() => {
                let frame = beacon_frame("N0CALL", sequence)?;
                let task = RadioTask::send(frame, tx.modulation)
                    .tuned(tx.frequency_hz, tx.step_hz, tx.channel)
                    .with_power(tx.power)
                    .with_squelch(tx.squelch)
                    .with_bitrate(tx.bitrate)
                    .with_sequence(sequence);

                match handle.request(task, wait).await {
                    Ok(outcome) => {
                        info!("Beacon {} finished: {:?}", sequence, outcome.result());
                        if let (Some(logger), Some(report)) = (telemetry.as_mut(), outcome.tx_report.as_ref()) {
                            if let Err(e) = logger.record(report) {
                                warn!("Failed to record telemetry: {}", e);
                            }
                        }
                    }
                    Err(e) => error!("Beacon {} not sent: {}", sequence, e),
                }
                sequence = sequence.wrapping_add(1);
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    match handle.request(RadioTask::close(), wait).await {
        Ok(outcome) => info!("Radio closed: {:?}", outcome.result()),
        Err(e) => warn!("Close not processed: {}", e),
    }

    handle.terminate();
    dispatcher.await.context("dispatcher task panicked")?;
    info!("Total beacons: {}", sequence);

    Ok(())
}
