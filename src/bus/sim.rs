//! Simulated Si446x on the other end of the bus
//!
//! Models the parts of the chip the driver depends on: CTS handshaking,
//! the property map, operating state, the 64 byte TX FIFO and its drain
//! while transmitting, the CCA line and the temperature ADC.
//!
//! The model drains the FIFO each time it is asked for FIFO space or state
//! while in TX, so tests run without wall-clock timing. Clones share state.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use super::SpiBus;
use crate::si446x::registers::*;
use crate::si446x::ChipState;

/// Shared record of events across collaborators, in order
pub type Journal = Arc<Mutex<Vec<String>>>;

/// Bytes the chip sends per status query while in TX
const DEFAULT_DRAIN_PER_QUERY: usize = 32;

#[derive(Debug)]
struct ChipModel {
    state: ChipState,
    channel: u8,
    properties: HashMap<u16, u8>,
    commands: Vec<Vec<u8>>,
    response: Vec<u8>,
    fifo_level: usize,
    fifo_overflow: bool,
    fifo_free_override: Option<u8>,
    drain_per_query: usize,
    tx_length: usize,
    tx_sent: usize,
    tx_written: usize,
    reject_tx: bool,
    cts_busy_polls: u32,
    cts_stuck: bool,
    cca_busy: bool,
    temperature_adc: u16,
    bus_error: Option<io::ErrorKind>,
    journal: Option<Journal>,
}

impl Default for ChipModel {
    fn default() -> Self {
        Self {
            state: ChipState::Ready,
            channel: 0,
            properties: HashMap::new(),
            commands: Vec::new(),
            response: Vec::new(),
            fifo_level: 0,
            fifo_overflow: false,
            fifo_free_override: None,
            drain_per_query: DEFAULT_DRAIN_PER_QUERY,
            tx_length: 0,
            tx_sent: 0,
            tx_written: 0,
            reject_tx: false,
            cts_busy_polls: 0,
            cts_stuck: false,
            cca_busy: false,
            temperature_adc: 0,
            bus_error: None,
            journal: None,
        }
    }
}

impl ChipModel {
    fn record(&mut self, cmd: &[u8]) {
        self.commands.push(cmd.to_vec());
        if let Some(journal) = &self.journal {
            journal
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(format!("cmd {:02X}", cmd[0]));
        }
    }

    /// Send FIFO bytes while transmitting; finish when the length is reached
    fn drain(&mut self) {
        if self.state != ChipState::Tx {
            return;
        }

        let sent = self.drain_per_query.min(self.fifo_level);
        self.fifo_level -= sent;
        self.tx_sent += sent;

        if self.tx_sent >= self.tx_length {
            self.state = ChipState::Ready;
        }
    }

    fn fifo_free(&self) -> u8 {
        self.fifo_free_override
            .unwrap_or((FIFO_SIZE - self.fifo_level) as u8)
    }

    fn handle(&mut self, cmd: &[u8]) {
        self.record(cmd);
        self.response.clear();

        match cmd[0] {
            CMD_POWER_UP => {
                self.state = ChipState::Ready;
                self.properties.clear();
                self.fifo_level = 0;
            }
            CMD_SET_PROPERTY if cmd.len() >= 4 => {
                let group = cmd[1] as u16;
                let count = (cmd[2] as usize).min(cmd.len() - 4);
                let index = cmd[3] as u16;
                for i in 0..count {
                    let property = (group << 8) | ((index + i as u16) & 0xFF);
                    self.properties.insert(property, cmd[4 + i]);
                }
            }
            CMD_FIFO_INFO => {
                if cmd.get(1).copied().unwrap_or(0) & FIFO_RESET_TX != 0 {
                    self.fifo_level = 0;
                }
                self.drain();
                self.response = vec![0x00, self.fifo_free()];
            }
            CMD_WRITE_TX_FIFO => {
                let len = cmd.len() - 1;
                if self.fifo_level + len > FIFO_SIZE {
                    self.fifo_overflow = true;
                }
                self.fifo_level = (self.fifo_level + len).min(FIFO_SIZE);
                self.tx_written += len;
            }
            CMD_REQUEST_DEVICE_STATE => {
                self.response = vec![self.state.code(), self.channel];
                self.drain();
            }
            CMD_START_TX if cmd.len() >= 5 => {
                if self.reject_tx {
                    return;
                }
                self.state = ChipState::Tx;
                self.channel = cmd[1];
                self.tx_length = (((cmd[3] & 0x1F) as usize) << 8) | cmd[4] as usize;
                self.tx_sent = 0;
            }
            CMD_START_RX if cmd.len() >= 2 => {
                self.state = ChipState::Rx;
                self.channel = cmd[1];
            }
            CMD_CHANGE_STATE if cmd.len() >= 2 => {
                self.state = ChipState::from_code(cmd[1]);
            }
            CMD_GET_ADC_READING => {
                let adc = self.temperature_adc & 0x07FF;
                self.response = vec![0, 0, 0, 0, (adc >> 8) as u8, (adc & 0xFF) as u8];
            }
            _ => {}
        }
    }
}

/// Clonable in-memory Si446x model
#[derive(Debug, Clone, Default)]
pub struct SimulatedChip {
    model: Arc<Mutex<ChipModel>>,
}

impl SimulatedChip {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record command opcodes into a shared journal as `cmd XX`
    pub fn with_journal(self, journal: Journal) -> Self {
        self.model().journal = Some(journal);
        self
    }

    fn model(&self) -> MutexGuard<'_, ChipModel> {
        self.model.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every command received, CTS polls excluded
    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.model().commands.clone()
    }

    /// First byte of every command received
    pub fn opcodes(&self) -> Vec<u8> {
        self.model().commands.iter().map(|cmd| cmd[0]).collect()
    }

    pub fn clear_commands(&self) {
        self.model().commands.clear();
    }

    pub fn property(&self, property: u16) -> Option<u8> {
        self.model().properties.get(&property).copied()
    }

    pub fn state(&self) -> ChipState {
        self.model().state
    }

    pub fn fifo_level(&self) -> usize {
        self.model().fifo_level
    }

    /// A FIFO write ever exceeded the 64 byte capacity
    pub fn overflowed(&self) -> bool {
        self.model().fifo_overflow
    }

    /// Total bytes written to the FIFO since creation
    pub fn bytes_written(&self) -> usize {
        self.model().tx_written
    }

    /// Length programmed by the last START_TX
    pub fn tx_length(&self) -> usize {
        self.model().tx_length
    }

    /// Report this much free FIFO space regardless of the fill level
    pub fn set_fifo_free_override(&self, free: Option<u8>) {
        self.model().fifo_free_override = free;
    }

    pub fn set_drain_per_query(&self, bytes: usize) {
        self.model().drain_per_query = bytes;
    }

    /// Ignore START_TX
    pub fn set_reject_tx(&self, reject: bool) {
        self.model().reject_tx = reject;
    }

    /// Answer the next `polls` CTS polls with "busy"
    pub fn set_cts_busy_polls(&self, polls: u32) {
        self.model().cts_busy_polls = polls;
    }

    /// Never raise CTS
    pub fn set_cts_stuck(&self, stuck: bool) {
        self.model().cts_stuck = stuck;
    }

    pub fn set_cca_busy(&self, busy: bool) {
        self.model().cca_busy = busy;
    }

    pub fn set_temperature_adc(&self, adc: u16) {
        self.model().temperature_adc = adc;
    }

    /// Fail every bus transfer with `kind`
    pub fn set_bus_error(&self, kind: io::ErrorKind) {
        self.model().bus_error = Some(kind);
    }
}

#[async_trait]
impl SpiBus for SimulatedChip {
    async fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> io::Result<()> {
        let mut model = self.model();

        if let Some(kind) = model.bus_error {
            return Err(io::Error::new(kind, "Simulated bus error"));
        }
        if tx.is_empty() {
            return Ok(());
        }
        rx.fill(0);

        if tx[0] != CMD_READ_CMD_BUFF {
            model.handle(tx);
            return Ok(());
        }

        if model.cts_stuck {
            return Ok(());
        }
        if model.cts_busy_polls > 0 {
            model.cts_busy_polls -= 1;
            return Ok(());
        }

        if rx.len() > 1 {
            rx[1] = CTS_READY;
        }
        for (slot, byte) in rx.iter_mut().skip(2).zip(model.response.iter()) {
            *slot = *byte;
        }
        Ok(())
    }

    async fn read_cca(&mut self) -> io::Result<bool> {
        let model = self.model();
        if let Some(kind) = model.bus_error {
            return Err(io::Error::new(kind, "Simulated bus error"));
        }
        Ok(model.cca_busy)
    }
}
