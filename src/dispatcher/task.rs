//! Radio task objects, pool slots and completions

use std::fmt;

use serde::Serialize;
use tokio::sync::{oneshot, OwnedSemaphorePermit};
use tracing::debug;

use crate::feeder::{TxOutcome, TxReport};
use crate::packet::{Frame, Modulation};
use crate::si446x::ReceiveParams;

/// Operation requested from the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCommand {
    Open,
    RxStart,
    RxStop,
    TxSend,
    Close,
}

/// Result code set by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskResult {
    Ok,
    /// Transmission had nothing to send
    NoData,
    Timeout,
    /// Not allowed in the current link state, or bad parameters
    Rejected,
    Failed,
}

impl From<TxOutcome> for TaskResult {
    fn from(outcome: TxOutcome) -> Self {
        match outcome {
            TxOutcome::Sent => TaskResult::Ok,
            TxOutcome::NoData => TaskResult::NoData,
            TxOutcome::Timeout | TxOutcome::LockTimeout => TaskResult::Timeout,
            TxOutcome::Rejected => TaskResult::Rejected,
            TxOutcome::Failed => TaskResult::Failed,
        }
    }
}

/// One request against a radio unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioTask {
    pub command: TaskCommand,
    pub modulation: Modulation,
    pub base_frequency: u32,
    pub step_hz: u32,
    pub channel: u8,
    /// RSSI threshold
    pub squelch: u8,
    pub frame: Option<Frame>,
    pub tx_power: u8,
    pub tx_bitrate: u32,
    pub sequence: u32,
    /// Set once the dispatcher has processed the task
    pub result: Option<TaskResult>,
}

impl RadioTask {
    pub fn new(command: TaskCommand) -> Self {
        Self {
            command,
            modulation: Modulation::NotSet,
            base_frequency: 0,
            step_hz: 0,
            channel: 0,
            squelch: 0,
            frame: None,
            tx_power: 0,
            tx_bitrate: 9600,
            sequence: 0,
            result: None,
        }
    }

    pub fn open(modulation: Modulation) -> Self {
        Self {
            modulation,
            ..Self::new(TaskCommand::Open)
        }
    }

    pub fn start_receive(params: ReceiveParams) -> Self {
        Self {
            modulation: params.modulation,
            base_frequency: params.base_frequency,
            step_hz: params.step_hz,
            channel: params.channel,
            squelch: params.squelch,
            ..Self::new(TaskCommand::RxStart)
        }
    }

    pub fn stop_receive() -> Self {
        Self::new(TaskCommand::RxStop)
    }

    pub fn send(frame: Frame, modulation: Modulation) -> Self {
        Self {
            modulation,
            frame: Some(frame),
            ..Self::new(TaskCommand::TxSend)
        }
    }

    pub fn close() -> Self {
        Self::new(TaskCommand::Close)
    }

    /// Set base frequency, channel step and channel number
    pub fn tuned(mut self, base_frequency: u32, step_hz: u32, channel: u8) -> Self {
        self.base_frequency = base_frequency;
        self.step_hz = step_hz;
        self.channel = channel;
        self
    }

    pub fn with_power(mut self, power: u8) -> Self {
        self.tx_power = power;
        self
    }

    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.tx_bitrate = bitrate;
        self
    }

    pub fn with_squelch(mut self, squelch: u8) -> Self {
        self.squelch = squelch;
        self
    }

    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn receive_params(&self) -> ReceiveParams {
        ReceiveParams {
            base_frequency: self.base_frequency,
            step_hz: self.step_hz,
            channel: self.channel,
            squelch: self.squelch,
            modulation: self.modulation,
        }
    }
}

/// A processed task handed to its completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub task: RadioTask,
    /// Present for TX_SEND once a feeder has run
    pub tx_report: Option<TxReport>,
}

impl TaskOutcome {
    pub fn result(&self) -> Option<TaskResult> {
        self.task.result
    }
}

/// What to do with the outcome after the slot is back in the pool
pub enum Completion {
    None,
    Callback(Box<dyn FnOnce(TaskOutcome) + Send>),
    Notify(oneshot::Sender<TaskOutcome>),
}

impl Completion {
    pub fn callback<F>(f: F) -> Self
    where
        F: FnOnce(TaskOutcome) + Send + 'static,
    {
        Completion::Callback(Box::new(f))
    }

    pub(crate) fn complete(self, outcome: TaskOutcome) {
        match self {
            Completion::None => {}
            Completion::Callback(f) => f(outcome),
            Completion::Notify(tx) => {
                if tx.send(outcome).is_err() {
                    debug!("Task requester went away before completion");
                }
            }
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::None => write!(f, "Completion::None"),
            Completion::Callback(_) => write!(f, "Completion::Callback(..)"),
            Completion::Notify(_) => write!(f, "Completion::Notify(..)"),
        }
    }
}

/// A reserved place in the task pool
///
/// Dropping the slot returns it to the pool.
#[derive(Debug)]
pub struct TaskSlot {
    _permit: OwnedSemaphorePermit,
}

impl TaskSlot {
    pub(crate) fn new(permit: OwnedSemaphorePermit) -> Self {
        Self { _permit: permit }
    }
}

/// A task in the queue together with its slot and completion
#[derive(Debug)]
pub(crate) struct Submission {
    pub slot: TaskSlot,
    pub task: RadioTask,
    pub completion: Completion,
}
